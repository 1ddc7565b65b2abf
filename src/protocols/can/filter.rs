//! CAN receive filters.
//!
//! A frame passes a filter when `received_id & mask == id & mask`. A zero
//! mask therefore matches every id, which makes `{id: 0, mask: 0}` the
//! accept-all filter installed when none are given.

use std::fmt;

use crate::core::error::{HwError, Result};

/// A single id/mask receive filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CanFilter {
    /// Identifier to match.
    pub id: u32,
    /// Bits of the identifier that must match.
    pub mask: u32,
}

impl CanFilter {
    /// Filter matching every frame.
    pub const ACCEPT_ALL: Self = Self { id: 0, mask: 0 };

    /// Create a filter.
    pub const fn new(id: u32, mask: u32) -> Self {
        Self { id, mask }
    }

    /// Whether a frame with raw id `can_id` passes this filter.
    #[inline]
    pub fn matches(&self, can_id: u32) -> bool {
        can_id & self.mask == self.id & self.mask
    }
}

impl fmt::Display for CanFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03x}:{:03x}", self.id, self.mask)
    }
}

/// Parse a comma-separated `id:mask` list (hex values, optional `0x`).
///
/// Entries that do not parse are skipped with a warning. A list that
/// yields no valid filter at all is an error.
///
/// ```
/// use hwkit::protocols::can::{parse_filters, CanFilter};
///
/// let filters = parse_filters("023:fff,006:00f").unwrap();
/// assert_eq!(filters, vec![CanFilter::new(0x023, 0xfff), CanFilter::new(0x006, 0x00f)]);
/// ```
pub fn parse_filters(s: &str) -> Result<Vec<CanFilter>> {
    let mut filters = Vec::with_capacity(s.matches(',').count() + 1);

    for entry in s.split(',') {
        match parse_filter(entry) {
            Some(filter) => filters.push(filter),
            None => tracing::warn!("Ignoring malformed CAN filter '{}'", entry.trim()),
        }
    }

    if filters.is_empty() {
        return Err(HwError::Filter(format!(
            "no valid filter in '{}' (expected id:mask in hex)",
            s
        )));
    }

    Ok(filters)
}

fn parse_filter(entry: &str) -> Option<CanFilter> {
    let (id, mask) = entry.trim().split_once(':')?;
    Some(CanFilter::new(parse_hex(id)?, parse_hex(mask)?))
}

fn parse_hex(s: &str) -> Option<u32> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).ok()
}

/// Filters to install: the given ones, or the accept-all filter.
pub fn effective_filters(filters: &[CanFilter]) -> Vec<CanFilter> {
    if filters.is_empty() {
        vec![CanFilter::ACCEPT_ALL]
    } else {
        filters.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_filters() {
        let filters = parse_filters("023:fff,006:00f").unwrap();

        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0], CanFilter { id: 0x023, mask: 0xfff });
        assert_eq!(filters[1], CanFilter { id: 0x006, mask: 0x00f });
    }

    #[test]
    fn test_parse_skips_malformed_entries() {
        let filters = parse_filters("123:7ff, bogus ,0x18ff0000:0x1fff0000,12").unwrap();

        assert_eq!(
            filters,
            vec![
                CanFilter::new(0x123, 0x7ff),
                CanFilter::new(0x18ff_0000, 0x1fff_0000)
            ]
        );
    }

    #[test]
    fn test_parse_without_valid_entry() {
        assert!(matches!(parse_filters("xyz"), Err(HwError::Filter(_))));
        assert!(matches!(parse_filters(""), Err(HwError::Filter(_))));
    }

    #[test]
    fn test_accept_all_matches_everything() {
        for id in [0, 0x7ff, 0x123, 0x8000_0000 | 0x1fff_ffff] {
            assert!(CanFilter::ACCEPT_ALL.matches(id));
        }
    }

    #[test]
    fn test_filter_matching() {
        let filter = CanFilter::new(0x006, 0x00f);

        assert!(filter.matches(0x006));
        assert!(filter.matches(0x016));
        assert!(!filter.matches(0x007));
    }

    #[test]
    fn test_effective_filters() {
        assert_eq!(effective_filters(&[]), vec![CanFilter::ACCEPT_ALL]);

        let given = [CanFilter::new(0x023, 0xfff)];
        assert_eq!(effective_filters(&given), given.to_vec());
    }

    #[test]
    fn test_display() {
        assert_eq!(CanFilter::new(0x23, 0xfff).to_string(), "023:fff");
    }
}
