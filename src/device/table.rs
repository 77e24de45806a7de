//! Device Table: semua device instance, diindeks oleh minor number
//!
//! Dibuat sekali saat startup dan di-teardown sekali saat shutdown.
//! Host wajib me-route setiap call untuk satu minor ke handle yang sama.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use super::file::{OpenFile, OpenMode};
use super::handle::DeviceHandle;
use super::wait::Signal;
use crate::config::{Config, MAX_MINOR, MINOR_BITS};
use crate::error::{Error, Result};

/// Major yang dipakai saat config meminta auto-assign (major = 0).
///
/// Sama dengan major dinamis pertama yang dibagikan Linux.
pub const DYNAMIC_MAJOR: u32 = 254;

/// Device number (major, minor) dalam satu `u32`, layout `MKDEV`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceNumber(u32);

impl DeviceNumber {
    #[inline(always)]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self((major << MINOR_BITS) | (minor & MAX_MINOR))
    }

    #[inline(always)]
    pub const fn major(self) -> u32 {
        self.0 >> MINOR_BITS
    }

    #[inline(always)]
    pub const fn minor(self) -> u32 {
        self.0 & MAX_MINOR
    }

    #[inline(always)]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major(), self.minor())
    }
}

pub struct DeviceTable {
    major: u32,
    minor_base: u32,
    devices: Vec<Arc<DeviceHandle>>,
}

impl DeviceTable {
    /// Alokasi `num_devices` handle tanpa buffer, tanpa reader/writer.
    pub fn init(config: &Config) -> Result<Self> {
        config.validate()?;

        let major = match config.major_number {
            0 => DYNAMIC_MAJOR,
            major => major,
        };

        let devices = (0..config.num_devices)
            .map(|index| Arc::new(DeviceHandle::new(config.minor_base + index, config)))
            .collect();

        info!(
            major,
            minor_base = config.minor_base,
            num_devices = config.num_devices,
            capacity = config.buffer_capacity,
            "device table initialized"
        );

        Ok(Self {
            major,
            minor_base: config.minor_base,
            devices,
        })
    }

    #[inline(always)]
    pub fn major(&self) -> u32 {
        self.major
    }

    #[inline(always)]
    pub fn minor_base(&self) -> u32 {
        self.minor_base
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Resolve minor number ke handle-nya.
    pub fn lookup(&self, minor: u32) -> Result<&Arc<DeviceHandle>> {
        minor
            .checked_sub(self.minor_base)
            .and_then(|index| self.devices.get(index as usize))
            .ok_or(Error::NotFound(minor))
    }

    /// Lookup + open dengan signal baru.
    pub fn open(&self, minor: u32, mode: OpenMode) -> Result<OpenFile> {
        self.lookup(minor)?.open(mode, Signal::new())
    }

    pub fn device_number(&self, minor: u32) -> Result<DeviceNumber> {
        self.lookup(minor)?;
        Ok(DeviceNumber::new(self.major, minor))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<DeviceHandle>> {
        self.devices.iter()
    }

    /// Tutup semua device. Buffer yang masih hidup (opener tidak pernah
    /// release) di-free paksa, dan waiter yang tersisa bangun dengan `Shutdown`.
    ///
    /// Returns jumlah buffer yang di-free paksa.
    pub fn teardown(self) -> usize {
        let leaked = self
            .devices
            .iter()
            .filter(|device| device.force_teardown())
            .count();

        if leaked > 0 {
            warn!(leaked, "device table torn down with open buffers");
        }
        info!(major = self.major, "device table torn down");
        leaked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(num_devices: u32, minor_base: u32) -> Config {
        Config {
            num_devices,
            minor_base,
            buffer_capacity: 32,
            ..Config::default()
        }
    }

    #[test]
    fn test_device_number_packing() {
        let dev = DeviceNumber::new(254, 3);
        assert_eq!(dev.major(), 254);
        assert_eq!(dev.minor(), 3);
        assert_eq!(dev.as_raw(), (254 << 20) | 3);
        assert_eq!(dev.to_string(), "254:3");
    }

    #[test]
    fn test_init_and_lookup() {
        let table = DeviceTable::init(&config(3, 10)).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.major(), DYNAMIC_MAJOR);

        assert_eq!(table.lookup(10).unwrap().minor(), 10);
        assert_eq!(table.lookup(12).unwrap().minor(), 12);
        assert!(matches!(table.lookup(9), Err(Error::NotFound(9))));
        assert!(matches!(table.lookup(13), Err(Error::NotFound(13))));

        for device in table.iter() {
            assert!(!device.stats().allocated);
        }
        assert_eq!(table.teardown(), 0);
    }

    #[test]
    fn test_explicit_major() {
        let table = DeviceTable::init(&Config {
            major_number: 42,
            ..Config::default()
        })
        .unwrap();
        assert_eq!(table.device_number(0).unwrap(), DeviceNumber::new(42, 0));
        assert!(table.device_number(1).is_err());
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            DeviceTable::init(&config(0, 0)),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_devices_are_independent() {
        let table = DeviceTable::init(&config(2, 0)).unwrap();
        let a = table.open(0, OpenMode::ReadWrite).unwrap();
        let b = table.open(1, OpenMode::ReadWrite).unwrap();

        a.write_bytes(b"only-a", false).unwrap();
        assert!(matches!(b.read_to_vec(8, true), Err(Error::WouldBlock)));
        assert_eq!(a.read_to_vec(8, false).unwrap(), b"only-a");

        a.release();
        b.release();
        assert_eq!(table.teardown(), 0);
    }

    #[test]
    fn test_teardown_frees_leaked_buffers() {
        let table = DeviceTable::init(&config(2, 0)).unwrap();
        let leaked = table.open(1, OpenMode::WriteOnly).unwrap();
        let device = Arc::clone(leaked.device());

        assert_eq!(table.teardown(), 1);
        assert!(!device.stats().allocated);
        assert!(matches!(leaked.write_bytes(b"x", false), Err(Error::Shutdown)));

        // Release setelah teardown tidak underflow
        leaked.release();
        assert_eq!(device.stats().num_writers, 0);
    }
}
