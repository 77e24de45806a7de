//! Byte Ring Buffer dengan read/write cursor
//!
//! Dua offset integer ke storage milik sendiri, wrap ke 0 tepat saat
//! mencapai capacity. Tidak ada locking di sini: semua sinkronisasi
//! dilakukan oleh device yang memiliki buffer ini.
//!
//! Empty vs full: `read_pos == write_pos` bisa berarti keduanya, jadi
//! fullness dicatat eksplisit di flag `full`. Seluruh `capacity` bytes bisa dipakai.

use super::storage::Storage;
use crate::error::Result;

/// Fixed-capacity circular byte buffer
pub struct RingBuffer {
    storage: Storage,
    read_pos: usize,
    write_pos: usize,
    // read_pos == write_pos && full => buffer penuh
    full: bool,
}

impl RingBuffer {
    /// Membuat ring buffer baru dengan `capacity` bytes.
    ///
    /// Alokasi hanya terjadi di sini; read/write tidak pernah alokasi.
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            storage: Storage::allocate(capacity)?,
            read_pos: 0,
            write_pos: 0,
            full: false,
        })
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    #[inline(always)]
    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    #[inline(always)]
    pub fn write_pos(&self) -> usize {
        self.write_pos
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.read_pos == self.write_pos && !self.full
    }

    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Jumlah bytes yang belum dibaca (logical, termasuk setelah wrap)
    #[inline(always)]
    pub fn len(&self) -> usize {
        if self.full {
            self.capacity()
        } else if self.write_pos >= self.read_pos {
            self.write_pos - self.read_pos
        } else {
            self.capacity() - self.read_pos + self.write_pos
        }
    }

    /// Bytes yang bisa dibaca tanpa melewati ujung fisik buffer.
    #[inline(always)]
    pub fn readable_contiguous_len(&self) -> usize {
        if self.is_empty() {
            0
        } else if self.write_pos > self.read_pos {
            self.write_pos - self.read_pos
        } else {
            // Wrapped (atau penuh): baca sampai ujung, sisanya di read berikutnya
            self.capacity() - self.read_pos
        }
    }

    /// Ruang kosong yang bisa ditulis tanpa melewati ujung fisik buffer.
    #[inline(always)]
    pub fn writable_contiguous_len(&self) -> usize {
        if self.full {
            0
        } else if self.write_pos < self.read_pos {
            self.read_pos - self.write_pos
        } else {
            self.capacity() - self.write_pos
        }
    }

    /// Slice contiguous yang siap dibaca, panjang = `readable_contiguous_len()`
    #[inline(always)]
    pub fn readable(&self) -> &[u8] {
        let len = self.readable_contiguous_len();
        &self.storage[self.read_pos..self.read_pos + len]
    }

    /// Slice contiguous yang siap ditulis, panjang = `writable_contiguous_len()`
    #[inline(always)]
    pub fn writable(&mut self) -> &mut [u8] {
        let len = self.writable_contiguous_len();
        let start = self.write_pos;
        &mut self.storage[start..start + len]
    }

    /// Majukan read cursor sebanyak `n` bytes.
    ///
    /// `n` harus <= `readable_contiguous_len()`.
    #[inline(always)]
    pub fn advance_read(&mut self, n: usize) {
        debug_assert!(n <= self.readable_contiguous_len());
        if n == 0 {
            return;
        }
        self.read_pos += n;
        if self.read_pos == self.capacity() {
            self.read_pos = 0;
        }
        self.full = false;
    }

    /// Majukan write cursor sebanyak `n` bytes.
    ///
    /// `n` harus <= `writable_contiguous_len()`.
    #[inline(always)]
    pub fn advance_write(&mut self, n: usize) {
        debug_assert!(n <= self.writable_contiguous_len());
        if n == 0 {
            return;
        }
        self.write_pos += n;
        if self.write_pos == self.capacity() {
            self.write_pos = 0;
        }
        self.full = self.write_pos == self.read_pos;
    }

    /// Kembalikan kedua cursor ke awal. Isi buffer dianggap hilang.
    #[inline(always)]
    pub fn reset(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.full = false;
    }
}
