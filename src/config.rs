//! Device configuration
//!
//! Dibaca sekali saat startup (CLI flag atau environment), immutable setelahnya.

use std::time::Duration;

use clap::{ArgAction, Args};

use crate::error::{Error, Result};

pub const DEFAULT_MAJOR: u32 = 0;
pub const DEFAULT_MINOR_BASE: u32 = 0;
pub const DEFAULT_NUM_DEVICES: u32 = 1;
pub const DEFAULT_BUFFER_CAPACITY: usize = 4000;

/// Lebar field device number, sama dengan `MKDEV` di Linux
pub const MINOR_BITS: u32 = 20;
pub const MAJOR_BITS: u32 = 12;
pub const MAX_MINOR: u32 = (1 << MINOR_BITS) - 1;
pub const MAX_MAJOR: u32 = (1 << MAJOR_BITS) - 1;

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Major number (0 = auto-assign)
    #[arg(long, env = "RWDEV_MAJOR", default_value_t = DEFAULT_MAJOR)]
    pub major_number: u32,

    /// First minor number
    #[arg(long, env = "RWDEV_MINOR_BASE", default_value_t = DEFAULT_MINOR_BASE)]
    pub minor_base: u32,

    /// Number of device instances
    #[arg(long, env = "RWDEV_NUM_DEVICES", default_value_t = DEFAULT_NUM_DEVICES)]
    pub num_devices: u32,

    /// Ring buffer size per device, in bytes
    #[arg(long, env = "RWDEV_BUFFER_CAPACITY", default_value_t = DEFAULT_BUFFER_CAPACITY)]
    pub buffer_capacity: usize,

    /// Give up on a blocked read/write after this many milliseconds
    #[arg(long, env = "RWDEV_IO_TIMEOUT_MS")]
    pub io_timeout_ms: Option<u64>,

    /// Reset both cursors on every open, not only the first
    #[arg(
        long,
        env = "RWDEV_RESET_ON_OPEN",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub reset_on_open: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            major_number: DEFAULT_MAJOR,
            minor_base: DEFAULT_MINOR_BASE,
            num_devices: DEFAULT_NUM_DEVICES,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            io_timeout_ms: None,
            reset_on_open: true,
        }
    }
}

impl Config {
    /// Tolak konfigurasi yang tidak bisa dipakai membuat device table.
    pub fn validate(&self) -> Result<()> {
        if self.num_devices == 0 {
            return Err(Error::InvalidConfig("num_devices must be at least 1".into()));
        }
        if self.buffer_capacity == 0 {
            return Err(Error::InvalidConfig(
                "buffer_capacity must be at least 1".into(),
            ));
        }
        if self.major_number > MAX_MAJOR {
            return Err(Error::InvalidConfig(format!(
                "major_number {} exceeds {}",
                self.major_number, MAX_MAJOR
            )));
        }
        let last_minor = self.minor_base as u64 + self.num_devices as u64 - 1;
        if last_minor > MAX_MINOR as u64 {
            return Err(Error::InvalidConfig(format!(
                "minor range {}..={} exceeds {}",
                self.minor_base, last_minor, MAX_MINOR
            )));
        }
        Ok(())
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_ms.map(Duration::from_millis)
    }
}
