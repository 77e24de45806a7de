//! rwdev - Blocking Circular-Buffer Character Devices
//!
//! Arsitektur:
//! - Ring Buffer: index pair di atas mmap-backed storage
//! - Device Handle: satu mutex + dua condvar per device
//! - Lazy Lifetime: buffer dialokasi saat open pertama, di-free saat release terakhir
//! - Device Table: owned table per minor number, tanpa global state
//!
//! ```
//! use rwdev::{Config, DeviceTable, OpenMode};
//!
//! let table = DeviceTable::init(&Config::default())?;
//! let writer = table.open(0, OpenMode::WriteOnly)?;
//! let reader = table.open(0, OpenMode::ReadOnly)?;
//!
//! writer.write_bytes(b"hello", false)?;
//! assert_eq!(reader.read_to_vec(16, false)?, b"hello");
//!
//! writer.release();
//! reader.release();
//! assert_eq!(table.teardown(), 0);
//! # Ok::<(), rwdev::Error>(())
//! ```

pub mod config;
pub mod core;
pub mod device;
pub mod error;

pub use config::Config;
pub use device::{DeviceHandle, DeviceTable, OpenFile, OpenMode, Signal};
pub use error::{Error, Result};
