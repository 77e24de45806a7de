//! Open file: handle hasil `open`, dipakai untuk read/write/release

use std::fmt;
use std::sync::Arc;

use super::handle::DeviceHandle;
use super::io::{IoBufferReader, IoBufferWriter, SliceReader, VecWriter};
use super::wait::Signal;
use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpenMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl OpenMode {
    #[inline(always)]
    pub fn readable(self) -> bool {
        matches!(self, OpenMode::ReadOnly | OpenMode::ReadWrite)
    }

    #[inline(always)]
    pub fn writable(self) -> bool {
        matches!(self, OpenMode::WriteOnly | OpenMode::ReadWrite)
    }
}

/// Satu open terhadap device.
///
/// Release eksplisit lewat [`release`](Self::release), atau otomatis saat
/// di-drop (seperti host yang menutup descriptor proses yang crash).
pub struct OpenFile {
    device: Arc<DeviceHandle>,
    mode: OpenMode,
    signal: Signal,
    released: bool,
}

impl OpenFile {
    pub(crate) fn new(device: Arc<DeviceHandle>, mode: OpenMode, signal: Signal) -> Self {
        Self {
            device,
            mode,
            signal,
            released: false,
        }
    }

    #[inline(always)]
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    #[inline(always)]
    pub fn minor(&self) -> u32 {
        self.device.minor()
    }

    pub fn device(&self) -> &Arc<DeviceHandle> {
        &self.device
    }

    /// Signal milik open ini. Clone lalu `raise()` dari thread lain untuk
    /// membatalkan read/write yang sedang blocked.
    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    /// Baca ke `buf`. Returns jumlah bytes, minimal 1 kecuali `buf` kosong.
    pub fn read<W>(&self, buf: &mut W, nonblock: bool) -> Result<usize>
    where
        W: IoBufferWriter + ?Sized,
    {
        self.device.read(self.mode, &self.signal, buf, nonblock)
    }

    /// Baca maksimal `max_count` bytes ke `Vec` baru
    pub fn read_to_vec(&self, max_count: usize, nonblock: bool) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(max_count.min(self.device.capacity()));
        self.read(&mut VecWriter::new(&mut out, max_count), nonblock)?;
        Ok(out)
    }

    /// Tulis dari `data`. Returns jumlah bytes yang diterima device.
    pub fn write<R>(&self, data: &mut R, nonblock: bool) -> Result<usize>
    where
        R: IoBufferReader + ?Sized,
    {
        self.device.write(self.mode, &self.signal, data, nonblock)
    }

    pub fn write_bytes(&self, data: &[u8], nonblock: bool) -> Result<usize> {
        self.write(&mut SliceReader::new(data), nonblock)
    }

    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.device.release(self.mode);
        }
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenFile")
            .field("minor", &self.device.minor())
            .field("mode", &self.mode)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_mode_flags() {
        assert!(OpenMode::ReadOnly.readable());
        assert!(!OpenMode::ReadOnly.writable());
        assert!(OpenMode::WriteOnly.writable());
        assert!(!OpenMode::WriteOnly.readable());
        assert!(OpenMode::ReadWrite.readable() && OpenMode::ReadWrite.writable());
    }

    #[test]
    fn test_drop_releases() {
        let device = Arc::new(DeviceHandle::new(3, &Config::default()));
        {
            let file = device.open(OpenMode::WriteOnly, Signal::new()).unwrap();
            assert_eq!(file.minor(), 3);
            assert_eq!(device.stats().num_writers, 1);
        }
        let stats = device.stats();
        assert_eq!(stats.num_writers, 0);
        assert!(!stats.allocated);
    }
}
