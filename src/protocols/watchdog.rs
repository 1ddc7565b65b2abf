//! Hardware watchdog peripheral.
//!
//! Opening a Linux watchdog device (`/dev/watchdogN`) arms its timer. The
//! timer must be refreshed with [`WatchdogHandle::keepalive`] before the
//! timeout expires, otherwise the board resets. Releasing the handle closes
//! the device without the magic close character, so a watchdog that stops
//! being refreshed still fires.
//!
//! # Example
//!
//! ```rust,ignore
//! use hwkit::protocols::watchdog::WatchdogHandle;
//!
//! let mut wd = WatchdogHandle::open("/dev/watchdog".as_ref())?;
//! wd.set_timeout(10)?;
//! loop {
//!     wd.keepalive()?;
//!     tokio::time::sleep(Duration::from_secs(1)).await;
//! }
//! ```

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;

use crate::core::error::{HwError, Result};
use crate::core::lifecycle::Peripheral;

/// Device opened when none is given.
pub const DEFAULT_DEVICE: &str = "/dev/watchdog";

/// Timeout applied by the test tool (seconds).
pub const DEFAULT_TIMEOUT: u32 = 10;

/// Refresh phase length of the test tool (seconds).
pub const DEFAULT_TEST_TIME: u32 = 60;

// <linux/watchdog.h>
const WDIOC_KEEPALIVE: libc::c_ulong = 0x8004_5705;
const WDIOC_SETTIMEOUT: libc::c_ulong = 0xC004_5706;
const WDIOC_GETTIMEOUT: libc::c_ulong = 0x8004_5707;

/// Operations of an open watchdog device.
pub trait WatchdogDevice: Send {
    /// Refresh the timer.
    fn keepalive(&mut self) -> io::Result<()>;

    /// Request a timeout in seconds. Returns the timeout the driver
    /// applied, which may be rounded.
    fn set_timeout(&mut self, secs: u32) -> io::Result<u32>;

    /// Current timeout in seconds.
    fn timeout(&mut self) -> io::Result<u32>;
}

/// Watchdog character device.
#[derive(Debug)]
pub struct WatchdogFile {
    file: File,
}

impl WatchdogFile {
    /// Open `path` for writing, which starts the timer.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().write(true).open(path)?;
        Ok(Self { file })
    }

    fn ioctl_int(&self, request: libc::c_ulong, value: &mut libc::c_int) -> io::Result<()> {
        // SAFETY: the descriptor stays open for the lifetime of `self.file` and
        // every watchdog request used here takes a pointer to one int.
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), request as _, value as *mut libc::c_int) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

impl WatchdogDevice for WatchdogFile {
    fn keepalive(&mut self) -> io::Result<()> {
        let mut dummy = 0;
        self.ioctl_int(WDIOC_KEEPALIVE, &mut dummy)
    }

    fn set_timeout(&mut self, secs: u32) -> io::Result<u32> {
        let mut value = libc::c_int::try_from(secs)
            .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
        self.ioctl_int(WDIOC_SETTIMEOUT, &mut value)?;
        Ok(u32::try_from(value).unwrap_or(secs))
    }

    fn timeout(&mut self) -> io::Result<u32> {
        let mut value = 0;
        self.ioctl_int(WDIOC_GETTIMEOUT, &mut value)?;
        u32::try_from(value).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
    }
}

/// An open watchdog.
#[derive(Debug)]
pub struct WatchdogHandle<D: WatchdogDevice = WatchdogFile> {
    device: String,
    dev: Option<D>,
    refreshes: u64,
}

impl WatchdogHandle<WatchdogFile> {
    /// Open the watchdog at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let dev = WatchdogFile::open(path)
            .map_err(|e| HwError::acquire(format!("watchdog {}", path.display()), e))?;
        tracing::info!("Watchdog {} opened", path.display());
        Ok(Self::with_device(path.display().to_string(), dev))
    }
}

impl<D: WatchdogDevice> WatchdogHandle<D> {
    pub(crate) fn with_device(device: impl Into<String>, dev: D) -> Self {
        Self {
            device: device.into(),
            dev: Some(dev),
            refreshes: 0,
        }
    }

    fn dev(&mut self) -> Result<&mut D> {
        self.dev.as_mut().ok_or(HwError::NotAcquired)
    }

    /// Device path.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Set the timeout and return the value the driver applied.
    pub fn set_timeout(&mut self, secs: u32) -> Result<u32> {
        if secs == 0 {
            return Err(HwError::invalid("watchdog timeout must be positive"));
        }

        let device = self.device.clone();
        let applied = self.dev()?.set_timeout(secs).map_err(|e| {
            HwError::Config(format!(
                "{}: failed to set watchdog timeout to {} seconds: {}",
                device, secs, e
            ))
        })?;

        if applied != secs {
            tracing::warn!("{}: timeout {} s rounded to {} s", device, secs, applied);
        }
        Ok(applied)
    }

    /// Current timeout in seconds.
    pub fn timeout(&mut self) -> Result<u32> {
        let device = self.device.clone();
        self.dev()?.timeout().map_err(|e| {
            HwError::Peripheral(format!("{}: failed to read watchdog timeout: {}", device, e))
        })
    }

    /// Refresh the timer.
    pub fn keepalive(&mut self) -> Result<()> {
        let device = self.device.clone();
        self.dev()?.keepalive().map_err(|e| {
            HwError::Peripheral(format!("{}: failed to refresh watchdog: {}", device, e))
        })?;
        self.refreshes += 1;
        Ok(())
    }

    /// Successful refreshes so far.
    #[inline]
    pub fn refreshes(&self) -> u64 {
        self.refreshes
    }

    /// Whether the handle has been released.
    pub fn is_released(&self) -> bool {
        self.dev.is_none()
    }
}

impl<D: WatchdogDevice> Peripheral for WatchdogHandle<D> {
    fn describe(&self) -> String {
        format!("watchdog {}", self.device)
    }

    fn release(&mut self) -> Result<()> {
        if self.dev.take().is_some() {
            tracing::debug!("{}: closed, timer left armed", self.device);
        }
        Ok(())
    }
}
