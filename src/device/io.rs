//! Transfer buffer milik caller
//!
//! Device tidak pernah menyentuh memory caller secara langsung: copy
//! lewat trait ini, sehingga host bisa menolak alamat yang tidak valid
//! dengan [`Error::Fault`]. Copy selalu terjadi sebelum cursor dimajukan.

use crate::error::{Error, Result};

/// Sumber data untuk write (user -> device)
pub trait IoBufferReader {
    /// Sisa bytes yang belum dibaca
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Isi `out` penuh dengan data berikutnya.
    fn read_slice(&mut self, out: &mut [u8]) -> Result<()>;
}

/// Tujuan data untuk read (device -> user)
pub trait IoBufferWriter {
    /// Sisa ruang yang bisa diisi
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tulis seluruh `data` ke posisi berikutnya.
    fn write_slice(&mut self, data: &[u8]) -> Result<()>;
}

/// Reader di atas slice biasa
pub struct SliceReader<'a> {
    data: &'a [u8],
}

impl<'a> SliceReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl IoBufferReader for SliceReader<'_> {
    #[inline]
    fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    fn read_slice(&mut self, out: &mut [u8]) -> Result<()> {
        if out.len() > self.data.len() {
            return Err(Error::Fault);
        }
        let (head, tail) = self.data.split_at(out.len());
        out.copy_from_slice(head);
        self.data = tail;
        Ok(())
    }
}

/// Writer di atas slice mutable
pub struct SliceWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> SliceWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes yang sudah ditulis
    pub fn written(&self) -> usize {
        self.pos
    }
}

impl IoBufferWriter for SliceWriter<'_> {
    #[inline]
    fn len(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[inline]
    fn write_slice(&mut self, data: &[u8]) -> Result<()> {
        let end = self.pos + data.len();
        if end > self.buf.len() {
            return Err(Error::Fault);
        }
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
        Ok(())
    }
}

/// Writer yang append ke `Vec`, dibatasi `limit` bytes
pub struct VecWriter<'a> {
    out: &'a mut Vec<u8>,
    limit: usize,
}

impl<'a> VecWriter<'a> {
    pub fn new(out: &'a mut Vec<u8>, limit: usize) -> Self {
        Self { out, limit }
    }
}

impl IoBufferWriter for VecWriter<'_> {
    #[inline]
    fn len(&self) -> usize {
        self.limit
    }

    #[inline]
    fn write_slice(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.limit {
            return Err(Error::Fault);
        }
        self.out.extend_from_slice(data);
        self.limit -= data.len();
        Ok(())
    }
}
