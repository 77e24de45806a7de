//! Device layer: open/read/write/release di atas ring buffer
//!
//! Susunan (dari bawah):
//! - wait: Condvar data-available & space-available, plus `Signal`
//! - io: transfer buffer milik caller
//! - handle: state machine per device
//! - table: semua device, diindeks minor number

mod file;
mod handle;
mod io;
mod table;
mod wait;

pub use file::{OpenFile, OpenMode};
pub use handle::{DeviceHandle, DeviceStats};
pub use io::{IoBufferReader, IoBufferWriter, SliceReader, SliceWriter, VecWriter};
pub use table::{DeviceNumber, DeviceTable, DYNAMIC_MAJOR};
pub use wait::Signal;
