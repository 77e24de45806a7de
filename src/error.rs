//! Error types untuk device operations
//!
//! Setiap error dikembalikan ke caller langsung, tidak ada retry internal.

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Blocking wait dibatalkan oleh signal. Tidak ada perubahan state, aman di-retry:
    /// signal dikonsumsi oleh call yang gagal, jadi call berikutnya berjalan normal.
    #[error("interrupted while waiting")]
    Interrupted,

    /// Non-blocking call tidak menemukan data (read) atau ruang kosong (write).
    #[error("operation would block")]
    WouldBlock,

    /// Alokasi buffer gagal saat open. Device tetap seperti sebelum call.
    #[error("failed to allocate {capacity}-byte buffer: {source}")]
    OutOfMemory {
        capacity: usize,
        #[source]
        source: io::Error,
    },

    /// Transfer buffer milik caller tidak valid. Cursor tidak berubah.
    #[error("bad address in transfer buffer")]
    Fault,

    #[error("no device with minor number {0}")]
    NotFound(u32),

    #[error("file not opened for {0}")]
    BadMode(&'static str),

    #[error("timed out while waiting")]
    TimedOut,

    #[error("device table has been torn down")]
    Shutdown,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Errno yang setara, untuk host yang meneruskan error ke user space.
    #[cfg(unix)]
    pub fn errno(&self) -> i32 {
        match self {
            Error::Interrupted => libc::EINTR,
            Error::WouldBlock => libc::EAGAIN,
            Error::OutOfMemory { .. } => libc::ENOMEM,
            Error::Fault => libc::EFAULT,
            Error::NotFound(_) => libc::ENODEV,
            Error::BadMode(_) => libc::EBADF,
            Error::TimedOut => libc::ETIMEDOUT,
            Error::Shutdown => libc::ENXIO,
            Error::InvalidConfig(_) => libc::EINVAL,
        }
    }

    /// `true` untuk error yang boleh di-retry oleh caller tanpa mengubah apa pun.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Interrupted | Error::WouldBlock | Error::TimedOut
        )
    }
}
