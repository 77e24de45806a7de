//! Anonymous mmap storage untuk ring buffer
//!
//! Region di-mmap langsung dari kernel (bukan heap), sehingga:
//! - Alokasi bisa gagal dengan error, bukan abort
//! - Page di-zero oleh kernel
//! - Memory dikembalikan ke OS saat buffer di-drop

use std::ops::{Deref, DerefMut};

use memmap2::{MmapMut, MmapOptions};

use crate::error::{Error, Result};

/// Fixed-size byte region, zero-filled saat dibuat
pub struct Storage {
    mmap: MmapMut,
}

impl Storage {
    /// Alokasi region berukuran `capacity` bytes.
    ///
    /// Gagal dengan [`Error::OutOfMemory`] jika mapping ditolak OS, dan
    /// [`Error::InvalidConfig`] untuk `capacity` nol.
    pub fn allocate(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidConfig(
                "buffer capacity must be at least 1".into(),
            ));
        }

        let mmap = MmapOptions::new()
            .len(capacity)
            .map_anon()
            .map_err(|source| Error::OutOfMemory { capacity, source })?;

        Ok(Self { mmap })
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }
}

impl Deref for Storage {
    type Target = [u8];

    #[inline(always)]
    fn deref(&self) -> &[u8] {
        &self.mmap
    }
}

impl DerefMut for Storage {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.mmap
    }
}
