//! Blocking conditions: data-available & space-available
//!
//! Setiap condition adalah `Condvar` yang dipakai bersama mutex device.
//! Wake selalu broadcast (`notify_all`), dan setiap waiter memeriksa ulang
//! predicate setelah bangun, jadi spurious wakeup aman.
//!
//! Std mutex/condvar tidak bisa di-interrupt oleh signal. Waiter yang akan
//! tidur mendaftarkan wake hook ke [`Signal`]-nya, dan `raise()` memanggil
//! hook itu: hook mengambil mutex device lalu `notify_all`, jadi tidak ada
//! lost wakeup dan waiter tidak perlu polling.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::{Error, Result};

/// Hook yang membangunkan satu waiter yang sedang blocked
pub(crate) type WakeFn = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct SignalInner {
    pending: AtomicBool,
    next_id: AtomicU64,
    wakers: Mutex<Vec<(u64, WakeFn)>>,
}

/// Cancellation token per open file, setara pending signal pada proses.
///
/// Clone berbagi flag yang sama, jadi thread lain bisa `raise()` untuk
/// membangunkan caller yang sedang blocked. Signal dikirim sekali: call
/// yang gagal dengan `Interrupted` sudah mengkonsumsinya, jadi retry pada
/// file yang sama berjalan normal.
#[derive(Clone, Default)]
pub struct Signal {
    inner: Arc<SignalInner>,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tandai pending dan bangunkan waiter yang sedang tidur.
    pub fn raise(&self) {
        self.inner.pending.store(true, Ordering::SeqCst);

        // Snapshot dulu: hook mengambil mutex device, list lock harus sudah lepas
        let wakers: Vec<WakeFn> = lock(&self.inner.wakers)
            .iter()
            .map(|(_, wake)| Arc::clone(wake))
            .collect();
        for wake in wakers {
            wake();
        }
    }

    pub fn clear(&self) {
        self.inner.pending.store(false, Ordering::SeqCst);
    }

    #[inline(always)]
    pub fn is_pending(&self) -> bool {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Konsumsi signal: `true` jika tadi pending.
    #[inline(always)]
    pub fn take(&self) -> bool {
        self.inner.pending.swap(false, Ordering::SeqCst)
    }

    fn register(&self, wake: WakeFn) -> WakerGuard<'_> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.wakers).push((id, wake));
        WakerGuard { signal: self, id }
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// Lepas registrasi wake hook saat waiter selesai menunggu
struct WakerGuard<'s> {
    signal: &'s Signal,
    id: u64,
}

impl Drop for WakerGuard<'_> {
    fn drop(&mut self) {
        lock(&self.signal.inner.wakers).retain(|(id, _)| *id != self.id);
    }
}

/// Timeout untuk blocking wait
#[derive(Clone, Copy, Debug)]
pub(crate) struct WaitPolicy {
    pub timeout: Option<Duration>,
}

pub(crate) struct WaitCondition {
    name: &'static str,
    condvar: Condvar,
}

impl WaitCondition {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            condvar: Condvar::new(),
        }
    }

    /// Bangunkan semua waiter.
    #[inline]
    pub fn notify_all(&self) {
        self.condvar.notify_all();
    }

    /// Tunggu selama `blocked` mengembalikan `true`.
    ///
    /// Guard dilepas selama tidur dan diambil lagi saat bangun. Semua error
    /// return melepas lock tanpa mengubah state.
    ///
    /// `waker` dipanggil sekali, hanya jika caller benar-benar harus tidur.
    /// Hook yang dihasilkannya wajib mengambil mutex yang sama dengan `guard`
    /// sebelum `notify_all` pada condition ini.
    pub fn wait_while<'a, T>(
        &self,
        mut guard: MutexGuard<'a, T>,
        nonblock: bool,
        signal: &Signal,
        policy: &WaitPolicy,
        waker: impl FnOnce() -> WakeFn,
        mut blocked: impl FnMut(&T) -> Result<bool>,
    ) -> Result<MutexGuard<'a, T>> {
        let deadline = policy.timeout.map(|t| Instant::now() + t);
        let mut waker = Some(waker);
        let mut _registration = None;

        loop {
            if !blocked(&*guard)? {
                return Ok(guard);
            }
            if nonblock {
                return Err(Error::WouldBlock);
            }
            // Register sebelum cek pending: raise() setelah titik ini pasti
            // memanggil hook, dan hook menunggu sampai kita masuk wait.
            if let Some(make) = waker.take() {
                _registration = Some(signal.register(make()));
            }
            if signal.take() {
                return Err(Error::Interrupted);
            }

            trace!(condition = self.name, "sleeping");
            guard = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::TimedOut);
                    }
                    self.condvar
                        .wait_timeout(guard, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0)
                }
                None => self
                    .condvar
                    .wait(guard)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }
}

/// Ambil lock tanpa panic pada poisoning: state device selalu konsisten
/// di antara statement, jadi guard dari thread yang panic tetap valid.
#[inline]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
