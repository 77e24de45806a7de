//! Device Handle: satu ring buffer + lock + dua wait condition
//!
//! State machine per device:
//! - open: alokasi buffer secara lazy, reset cursor, tambah counter
//! - read: block selama kosong, transfer contiguous, wake writer
//! - write: block selama penuh, transfer contiguous, wake reader
//! - release: kurangi counter, free buffer saat reader & writer = 0
//!
//! Semua state mutable (buffer, cursor, counter) hanya diubah di bawah
//! satu mutex per device. Device berbeda tidak pernah berbagi lock.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use super::file::{OpenFile, OpenMode};
use super::io::{IoBufferReader, IoBufferWriter};
use super::wait::{lock, Signal, WaitCondition, WaitPolicy, WakeFn};
use crate::config::Config;
use crate::core::RingBuffer;
use crate::error::{Error, Result};

/// State yang dijaga oleh lock device
struct DeviceState {
    buffer: Option<RingBuffer>,
    num_readers: usize,
    num_writers: usize,
    torn_down: bool,
}

impl DeviceState {
    /// Buffer yang masih hidup, atau `Shutdown` jika table sudah di-teardown.
    fn live_buffer(&self) -> Result<&RingBuffer> {
        if self.torn_down {
            return Err(Error::Shutdown);
        }
        self.buffer.as_ref().ok_or(Error::Shutdown)
    }

    fn live_buffer_mut(&mut self) -> Result<&mut RingBuffer> {
        if self.torn_down {
            return Err(Error::Shutdown);
        }
        self.buffer.as_mut().ok_or(Error::Shutdown)
    }
}

/// Snapshot state device, untuk monitoring & test
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub allocated: bool,
    pub num_readers: usize,
    pub num_writers: usize,
    pub buffered: usize,
    pub read_pos: usize,
    pub write_pos: usize,
}

/// Satu instance device, diidentifikasi oleh minor number.
///
/// Dibuat sekali oleh [`DeviceTable`](super::DeviceTable), hidup sampai
/// teardown. Buffer di dalamnya punya lifecycle sendiri: ada sejak open
/// pertama, hilang saat release terakhir.
pub struct DeviceHandle {
    minor: u32,
    capacity: usize,
    reset_on_open: bool,
    policy: WaitPolicy,
    state: Mutex<DeviceState>,
    data_available: WaitCondition,
    space_available: WaitCondition,
}

impl DeviceHandle {
    pub(crate) fn new(minor: u32, config: &Config) -> Self {
        Self {
            minor,
            capacity: config.buffer_capacity,
            reset_on_open: config.reset_on_open,
            policy: WaitPolicy {
                timeout: config.io_timeout(),
            },
            state: Mutex::new(DeviceState {
                buffer: None,
                num_readers: 0,
                num_writers: 0,
                torn_down: false,
            }),
            data_available: WaitCondition::new("data_available"),
            space_available: WaitCondition::new("space_available"),
        }
    }

    #[inline(always)]
    pub fn minor(&self) -> u32 {
        self.minor
    }

    /// Kapasitas buffer yang akan dialokasi saat open
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Open device dengan `mode`.
    ///
    /// Buffer dialokasi saat belum ada. Kedua cursor di-reset ke 0 pada
    /// SETIAP open (bukan hanya yang pertama) kecuali `reset_on_open`
    /// dimatikan: opener yang datang belakangan bisa membuang data yang
    /// belum dibaca oleh opener lain.
    ///
    /// Gagal dengan `Interrupted` jika `signal` pending, `OutOfMemory` jika
    /// alokasi gagal. Keduanya tanpa perubahan state.
    pub fn open(self: &Arc<Self>, mode: OpenMode, signal: Signal) -> Result<OpenFile> {
        let mut state = self.lock_interruptible(&signal)?;
        if state.torn_down {
            return Err(Error::Shutdown);
        }

        let mut reset = false;
        if state.buffer.is_none() {
            state.buffer = Some(RingBuffer::new(self.capacity)?);
            debug!(minor = self.minor, capacity = self.capacity, "buffer allocated");
        } else if self.reset_on_open {
            if let Some(buffer) = state.buffer.as_mut() {
                buffer.reset();
                reset = true;
            }
        }

        if mode.readable() {
            state.num_readers += 1;
        }
        if mode.writable() {
            state.num_writers += 1;
        }
        debug!(
            minor = self.minor,
            ?mode,
            readers = state.num_readers,
            writers = state.num_writers,
            "device opened"
        );
        drop(state);

        if reset {
            // Buffer kosong lagi: writer yang menunggu ruang bisa lanjut
            self.space_available.notify_all();
        }

        Ok(OpenFile::new(Arc::clone(self), mode, signal))
    }

    /// Baca maksimal `buf.len()` bytes.
    ///
    /// Block selama buffer kosong (atau `WouldBlock` jika `nonblock`).
    /// Transfer tidak pernah melewati ujung fisik buffer, jadi hasil bisa
    /// kurang dari yang diminta walau masih ada data setelah wrap.
    pub(crate) fn read<W>(
        self: &Arc<Self>,
        mode: OpenMode,
        signal: &Signal,
        buf: &mut W,
        nonblock: bool,
    ) -> Result<usize>
    where
        W: IoBufferWriter + ?Sized,
    {
        if !mode.readable() {
            return Err(Error::BadMode("reading"));
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let state = self.lock_interruptible(signal)?;
        let mut state = self.data_available.wait_while(
            state,
            nonblock,
            signal,
            &self.policy,
            self.wake_hook(|device| &device.data_available),
            |state| Ok(state.live_buffer()?.is_empty()),
        )?;

        let buffer = state.live_buffer_mut()?;
        let chunk = buffer.readable();
        let n = chunk.len().min(buf.len());
        // Fault di sini: cursor belum bergerak
        buf.write_slice(&chunk[..n])?;
        buffer.advance_read(n);
        drop(state);

        self.space_available.notify_all();
        Ok(n)
    }

    /// Tulis maksimal `data.len()` bytes, simetris dengan [`read`](Self::read).
    pub(crate) fn write<R>(
        self: &Arc<Self>,
        mode: OpenMode,
        signal: &Signal,
        data: &mut R,
        nonblock: bool,
    ) -> Result<usize>
    where
        R: IoBufferReader + ?Sized,
    {
        if !mode.writable() {
            return Err(Error::BadMode("writing"));
        }
        if data.is_empty() {
            return Ok(0);
        }

        let state = self.lock_interruptible(signal)?;
        let mut state = self.space_available.wait_while(
            state,
            nonblock,
            signal,
            &self.policy,
            self.wake_hook(|device| &device.space_available),
            |state| Ok(state.live_buffer()?.is_full()),
        )?;

        let buffer = state.live_buffer_mut()?;
        let dst = buffer.writable();
        let n = dst.len().min(data.len());
        // Bytes yang sudah ter-copy sebelum fault tidak terlihat: write_pos tetap
        data.read_slice(&mut dst[..n])?;
        buffer.advance_write(n);
        drop(state);

        self.data_available.notify_all();
        Ok(n)
    }

    /// Kurangi counter sesuai `mode`, free buffer saat keduanya nol.
    pub(crate) fn release(&self, mode: OpenMode) {
        let mut state = lock(&self.state);

        if mode.readable() {
            match state.num_readers.checked_sub(1) {
                Some(n) => state.num_readers = n,
                None => warn!(minor = self.minor, "release without open reader"),
            }
        }
        if mode.writable() {
            match state.num_writers.checked_sub(1) {
                Some(n) => state.num_writers = n,
                None => warn!(minor = self.minor, "release without open writer"),
            }
        }

        if state.num_readers == 0 && state.num_writers == 0 && state.buffer.take().is_some() {
            debug!(minor = self.minor, "last opener released, buffer freed");
        }
    }

    /// Teardown paksa: free buffer yang masih hidup dan bangunkan semua waiter.
    ///
    /// Returns `true` jika buffer masih ada (opener tidak pernah release).
    pub(crate) fn force_teardown(&self) -> bool {
        let mut state = lock(&self.state);
        state.torn_down = true;

        let leaked = state.buffer.take().is_some();
        if leaked {
            warn!(
                minor = self.minor,
                readers = state.num_readers,
                writers = state.num_writers,
                "buffer still allocated at teardown, forcing free"
            );
        }
        state.num_readers = 0;
        state.num_writers = 0;
        drop(state);

        self.data_available.notify_all();
        self.space_available.notify_all();
        leaked
    }

    pub fn stats(&self) -> DeviceStats {
        let state = lock(&self.state);
        match state.buffer.as_ref() {
            Some(buffer) => DeviceStats {
                allocated: true,
                num_readers: state.num_readers,
                num_writers: state.num_writers,
                buffered: buffer.len(),
                read_pos: buffer.read_pos(),
                write_pos: buffer.write_pos(),
            },
            None => DeviceStats {
                num_readers: state.num_readers,
                num_writers: state.num_writers,
                ..DeviceStats::default()
            },
        }
    }

    /// Lock device. Signal dicek (dan dikonsumsi) sebelum dan sesudah lock
    /// diambil, jadi caller yang sudah di-interrupt keluar tanpa menyentuh
    /// state, dan call berikutnya tidak ikut gagal.
    fn lock_interruptible(&self, signal: &Signal) -> Result<MutexGuard<'_, DeviceState>> {
        if signal.take() {
            return Err(Error::Interrupted);
        }
        let state = lock(&self.state);
        if signal.take() {
            return Err(Error::Interrupted);
        }
        Ok(state)
    }

    /// Wake hook untuk [`Signal::raise`]. Lock device diambil dulu, jadi
    /// notify tidak bisa jatuh di antara cek signal dan `wait` milik waiter.
    fn wake_hook(
        self: &Arc<Self>,
        condition: fn(&Self) -> &WaitCondition,
    ) -> impl FnOnce() -> WakeFn + '_ {
        move || {
            let device = Arc::clone(self);
            let wake: WakeFn = Arc::new(move || {
                drop(lock(&device.state));
                condition(&*device).notify_all();
            });
            wake
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::io::SliceWriter;
    use std::thread;
    use std::time::{Duration, Instant};

    fn device(capacity: usize) -> Arc<DeviceHandle> {
        let config = Config {
            buffer_capacity: capacity,
            ..Config::default()
        };
        Arc::new(DeviceHandle::new(0, &config))
    }

    #[test]
    fn test_open_allocates_lazily() {
        let dev = device(16);
        assert!(!dev.stats().allocated);

        let file = dev.open(OpenMode::ReadWrite, Signal::new()).unwrap();
        let stats = dev.stats();
        assert!(stats.allocated);
        assert_eq!(stats.num_readers, 1);
        assert_eq!(stats.num_writers, 1);

        file.release();
        assert_eq!(dev.stats(), DeviceStats::default());
    }

    #[test]
    fn test_fill_exactly_then_drain() {
        let dev = device(8);
        let file = dev.open(OpenMode::ReadWrite, Signal::new()).unwrap();

        assert_eq!(file.write_bytes(b"ABCDEFGH", false).unwrap(), 8);
        assert!(matches!(file.write_bytes(b"I", true), Err(Error::WouldBlock)));
        assert_eq!(file.read_to_vec(8, false).unwrap(), b"ABCDEFGH");
        assert!(matches!(file.read_to_vec(8, true), Err(Error::WouldBlock)));
    }

    #[test]
    fn test_short_read_does_not_block() {
        let dev = device(4);
        let file = dev.open(OpenMode::ReadWrite, Signal::new()).unwrap();

        file.write_bytes(b"AB", false).unwrap();
        let start = Instant::now();
        assert_eq!(file.read_to_vec(4, false).unwrap(), b"AB");
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_every_open_resets_cursors() {
        let dev = device(8);
        let first = dev.open(OpenMode::ReadWrite, Signal::new()).unwrap();
        first.write_bytes(b"abcde", false).unwrap();
        first.read_to_vec(2, false).unwrap();
        assert_eq!(dev.stats().read_pos, 2);
        assert_eq!(dev.stats().write_pos, 5);

        // Opener kedua membuang data yang belum dibaca oleh opener pertama
        let second = dev.open(OpenMode::ReadOnly, Signal::new()).unwrap();
        let stats = dev.stats();
        assert_eq!((stats.read_pos, stats.write_pos, stats.buffered), (0, 0, 0));
        assert!(matches!(first.read_to_vec(8, true), Err(Error::WouldBlock)));

        second.release();
        first.release();
    }

    #[test]
    fn test_reset_on_open_disabled_keeps_data() {
        let config = Config {
            buffer_capacity: 8,
            reset_on_open: false,
            ..Config::default()
        };
        let dev = Arc::new(DeviceHandle::new(0, &config));
        let writer = dev.open(OpenMode::WriteOnly, Signal::new()).unwrap();
        writer.write_bytes(b"keep", false).unwrap();

        let reader = dev.open(OpenMode::ReadOnly, Signal::new()).unwrap();
        assert_eq!(reader.read_to_vec(8, false).unwrap(), b"keep");
    }

    #[test]
    fn test_mode_enforced() {
        let dev = device(8);
        let reader = dev.open(OpenMode::ReadOnly, Signal::new()).unwrap();
        let writer = dev.open(OpenMode::WriteOnly, Signal::new()).unwrap();

        assert!(matches!(reader.write_bytes(b"x", false), Err(Error::BadMode(_))));
        assert!(matches!(writer.read_to_vec(1, false), Err(Error::BadMode(_))));
    }

    #[test]
    fn test_release_frees_only_after_last() {
        let dev = device(8);
        let reader = dev.open(OpenMode::ReadOnly, Signal::new()).unwrap();
        let writer = dev.open(OpenMode::WriteOnly, Signal::new()).unwrap();

        writer.release();
        assert!(dev.stats().allocated);
        reader.release();
        assert!(!dev.stats().allocated);
    }

    #[test]
    fn test_release_never_underflows() {
        let dev = device(8);
        dev.release(OpenMode::ReadWrite);
        let stats = dev.stats();
        assert_eq!(stats.num_readers, 0);
        assert_eq!(stats.num_writers, 0);
    }

    #[test]
    fn test_read_fault_keeps_cursors() {
        struct Faulty;
        impl IoBufferWriter for Faulty {
            fn len(&self) -> usize {
                4
            }
            fn write_slice(&mut self, _data: &[u8]) -> Result<()> {
                Err(Error::Fault)
            }
        }

        let dev = device(8);
        let file = dev.open(OpenMode::ReadWrite, Signal::new()).unwrap();
        file.write_bytes(b"data", false).unwrap();

        assert!(matches!(file.read(&mut Faulty, false), Err(Error::Fault)));
        assert_eq!(dev.stats().read_pos, 0);
        assert_eq!(file.read_to_vec(8, false).unwrap(), b"data");
    }

    #[test]
    fn test_write_fault_keeps_cursors() {
        struct Faulty;
        impl IoBufferReader for Faulty {
            fn len(&self) -> usize {
                4
            }
            fn read_slice(&mut self, out: &mut [u8]) -> Result<()> {
                out.fill(b'!');
                Err(Error::Fault)
            }
        }

        let dev = device(8);
        let file = dev.open(OpenMode::ReadWrite, Signal::new()).unwrap();

        assert!(matches!(file.write(&mut Faulty, false), Err(Error::Fault)));
        assert_eq!(dev.stats().write_pos, 0);
        assert!(matches!(file.read_to_vec(8, true), Err(Error::WouldBlock)));
    }

    #[test]
    fn test_blocked_read_woken_by_write() {
        let dev = device(16);
        let reader = dev.open(OpenMode::ReadOnly, Signal::new()).unwrap();
        let writer = dev.open(OpenMode::WriteOnly, Signal::new()).unwrap();

        let handle = thread::spawn(move || {
            let mut buf = [0u8; 10];
            let mut out = SliceWriter::new(&mut buf);
            let n = reader.read(&mut out, false).unwrap();
            buf[..n].to_vec()
        });

        thread::sleep(Duration::from_millis(20));
        writer.write_bytes(b"wake", false).unwrap();

        assert_eq!(handle.join().unwrap(), b"wake");
    }

    #[test]
    fn test_signal_interrupts_blocked_read() {
        let dev = device(16);
        let reader = dev.open(OpenMode::ReadOnly, Signal::new()).unwrap();
        let signal = reader.signal().clone();

        let handle = thread::spawn(move || reader.read_to_vec(4, false));

        thread::sleep(Duration::from_millis(20));
        signal.raise();

        assert!(matches!(handle.join().unwrap(), Err(Error::Interrupted)));
        assert!(!dev.stats().allocated);
    }

    #[test]
    fn test_interrupted_open_changes_nothing() {
        let dev = device(16);
        let signal = Signal::new();
        signal.raise();

        assert!(matches!(
            dev.open(OpenMode::ReadWrite, signal),
            Err(Error::Interrupted)
        ));
        assert_eq!(dev.stats(), DeviceStats::default());
    }

    #[test]
    fn test_teardown_wakes_waiters() {
        let dev = device(16);
        let reader = dev.open(OpenMode::ReadOnly, Signal::new()).unwrap();

        let handle = thread::spawn(move || reader.read_to_vec(4, false));

        thread::sleep(Duration::from_millis(20));
        assert!(dev.force_teardown());

        assert!(matches!(handle.join().unwrap(), Err(Error::Shutdown)));
        assert!(matches!(
            dev.open(OpenMode::ReadOnly, Signal::new()),
            Err(Error::Shutdown)
        ));
    }

    #[test]
    fn test_teardown_wakes_blocked_writer() {
        let dev = device(2);
        let writer = dev.open(OpenMode::WriteOnly, Signal::new()).unwrap();
        writer.write_bytes(b"ab", false).unwrap();

        let handle = thread::spawn(move || writer.write_bytes(b"c", false));

        thread::sleep(Duration::from_millis(20));
        assert!(dev.force_teardown());

        assert!(matches!(handle.join().unwrap(), Err(Error::Shutdown)));
    }

    #[test]
    fn test_signal_interrupts_blocked_write() {
        let dev = device(2);
        let writer = dev.open(OpenMode::WriteOnly, Signal::new()).unwrap();
        writer.write_bytes(b"ab", false).unwrap();
        let signal = writer.signal().clone();

        let handle = thread::spawn(move || {
            let result = writer.write_bytes(b"c", false);
            (writer, result)
        });

        thread::sleep(Duration::from_millis(20));
        signal.raise();

        let (writer, result) = handle.join().unwrap();
        assert!(matches!(result, Err(Error::Interrupted)));
        // Write yang di-interrupt tidak mengubah buffer
        let stats = dev.stats();
        assert_eq!((stats.buffered, stats.write_pos), (2, 0));
        writer.release();
    }

    #[test]
    fn test_retry_after_interrupt_succeeds() {
        let dev = device(2);
        let reader = dev.open(OpenMode::ReadOnly, Signal::new()).unwrap();
        let writer = dev.open(OpenMode::WriteOnly, Signal::new()).unwrap();
        let signal = reader.signal().clone();

        let handle = thread::spawn(move || {
            let result = reader.read_to_vec(4, false);
            (reader, result)
        });

        thread::sleep(Duration::from_millis(20));
        signal.raise();
        let (reader, result) = handle.join().unwrap();
        assert!(matches!(result, Err(Error::Interrupted)));
        assert!(!signal.is_pending());

        // Signal sudah terkirim sekali: retry di file yang sama jalan normal
        writer.write_bytes(b"ok", false).unwrap();
        assert_eq!(reader.read_to_vec(4, true).unwrap(), b"ok");

        // Sisi writer: signal yang pending hanya menggagalkan satu call
        writer.signal().raise();
        assert!(matches!(writer.write_bytes(b"x", true), Err(Error::Interrupted)));
        assert_eq!(writer.write_bytes(b"x", true).unwrap(), 1);
    }

    #[test]
    fn test_out_of_memory_open_changes_nothing() {
        let config = Config {
            buffer_capacity: isize::MAX as usize,
            ..Config::default()
        };
        let dev = Arc::new(DeviceHandle::new(0, &config));

        match dev.open(OpenMode::ReadWrite, Signal::new()) {
            Err(Error::OutOfMemory { capacity, .. }) => {
                assert_eq!(capacity, isize::MAX as usize);
            }
            other => panic!("expected OutOfMemory, got {:?}", other.map(|f| f.mode())),
        }
        assert_eq!(dev.stats(), DeviceStats::default());
    }
}
