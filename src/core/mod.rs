//! Core module: Byte Ring Buffer dengan mmap-backed storage
//!
//! Prinsip desain:
//! - No-Locking: Sinkronisasi adalah tanggung jawab device, bukan buffer
//! - Index Pair: Cursor berupa offset, bukan pointer
//! - Fallible Allocation: Storage gagal dengan error, tidak abort

mod ring_buffer;
mod storage;

pub use ring_buffer::RingBuffer;
pub use storage::Storage;
