//! Small atomic building blocks used by the loop and connection state
//! machines: a last-write-wins boolean, a monotonic counter, and a
//! pointer-less spin lock.
//!
//! These exist instead of reaching for `parking_lot`/`crossbeam` because
//! every use site in this crate holds the lock for a handful of
//! instructions (append to a `Vec`, swap a pointer) and contention is
//! expected to be low, matching the spin lock the framework this crate is
//! modeled on uses for its job queue.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// A boolean that can be read and written from any thread without
/// synchronising with anything else. Used for the connection `connected`
/// flag and the loop's `eventHandling` flag.
#[derive(Debug, Default)]
pub struct AtomicFlag(AtomicBool);

impl AtomicFlag {
    pub const fn new(value: bool) -> Self {
        AtomicFlag(AtomicBool::new(value))
    }

    #[inline]
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: bool) {
        self.0.store(value, Ordering::Release);
    }

    /// Transitions the flag from `false` to `true`, returning whether this
    /// call made the transition. Used to guarantee exactly-once close
    /// semantics.
    #[inline]
    pub fn compare_and_set(&self, current: bool, new: bool) -> bool {
        self.0
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// A 64-bit counter, used for the connection id generator and the
/// last-activity timestamp.
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicI64);

impl AtomicCounter {
    pub const fn new(value: i64) -> Self {
        AtomicCounter(AtomicI64::new(value))
    }

    #[inline]
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Release);
    }

    #[inline]
    pub fn fetch_add(&self, delta: i64) -> i64 {
        self.0.fetch_add(delta, Ordering::AcqRel)
    }
}

/// A simple test-and-test-and-set spin lock guarding a value.
///
/// Not reentrant. Intended for critical sections of a few instructions,
/// such as appending a job to the async job queue.
#[derive(Debug)]
pub struct SpinLock<T> {
    locked: AtomicBool,
    value: std::cell::UnsafeCell<T>,
}

// SAFETY: access to `value` is only ever granted while `locked` is held,
// so `SpinLock<T>` behaves like a `Mutex<T>`.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
            value: std::cell::UnsafeCell::new(value),
        }
    }

    /// Runs `f` with exclusive access to the guarded value.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        // SAFETY: we hold the lock exclusively until it is released below.
        let result = f(unsafe { &mut *self.value.get() });
        self.locked.store(false, Ordering::Release);
        result
    }
}
