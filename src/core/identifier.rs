//! Peripheral identifiers given on the command line.
//!
//! An identifier is either a decimal number or a name. Names are looked up
//! in the settings alias tables before being used as-is.

use std::fmt;
use std::str::FromStr;

use super::config::AliasTable;
use super::error::{HwError, Result};

/// A numeric or named peripheral identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    /// Decimal index (CAN interface number, GPIO line offset, ...).
    Number(u32),
    /// Alias or literal device name.
    Name(String),
}

impl FromStr for Identifier {
    type Err = HwError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(HwError::invalid("empty peripheral identifier"));
        }

        if s.bytes().all(|b| b.is_ascii_digit()) {
            return s
                .parse::<u32>()
                .map(Self::Number)
                .map_err(|e| HwError::invalid(format!("identifier '{}': {}", s, e)));
        }

        Ok(Self::Name(s.to_string()))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl AliasTable {
    /// Resolve a CAN identifier to an interface name.
    ///
    /// `N` becomes `canN`; a configured alias maps to its interface; any
    /// other name is returned unchanged and fails later at open time if no
    /// such interface exists.
    pub fn resolve_can(&self, ident: &Identifier) -> String {
        match ident {
            Identifier::Number(n) => format!("can{}", n),
            Identifier::Name(name) => match self.can.get(name) {
                Some(iface) => {
                    tracing::debug!("CAN alias '{}' -> {}", name, iface);
                    iface.clone()
                }
                None => name.clone(),
            },
        }
    }

    /// Look up a GPIO alias.
    pub fn gpio_alias(&self, name: &str) -> Option<&str> {
        self.gpio.get(name).map(String::as_str)
    }
}
