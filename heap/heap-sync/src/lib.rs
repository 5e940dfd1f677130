//! # Allocator synchronization primitive
//!
//! A single coarse [`SpinLock`] guards the entire allocator state. Every
//! public allocator operation acquires it on entry and releases it on return,
//! so operations are linearizable in lock-acquisition order.
//!
//! The lock must not depend on the allocator it protects, which rules out
//! anything that allocates (queues, parker lists). A busy-wait flag lock is
//! sufficient: critical sections are short (no I/O, no blocking) and the only
//! potentially slow path inside one is the memory source during arena growth.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A spinlock protecting a value of type `T`.
///
/// Busy-waits until the lock becomes available; not fair and not reentrant.
/// Access is provided through an RAII [`SpinLockGuard`], so the lock is
/// released even if the critical section panics (a double-free diagnostic
/// panics while the lock is held).
///
/// # Guarantees
/// - Mutual exclusion for access to the protected value.
/// - `Sync` when `T: Send`: the lock enforces interior mutability.
///
/// # Examples
///
/// ```
/// use heap_sync::SpinLock;
///
/// let lock = SpinLock::new(0);
/// {
///     let mut guard = lock.lock();
///     *guard = 1;
/// } // guard drops, unlocking
/// assert_eq!(*lock.lock(), 1);
/// ```
pub struct SpinLock<T> {
    /// Lock state (`false` = unlocked, `true` = locked).
    held: AtomicBool,
    /// The protected value.
    inner: UnsafeCell<T>,
}

// Safety: SpinLock provides mutual exclusion; it can be shared across threads as long as T is Send.
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Create a new unlocked `SpinLock` wrapping `inner`.
    #[must_use]
    pub const fn new(inner: T) -> Self {
        Self {
            held: AtomicBool::new(false),
            inner: UnsafeCell::new(inner),
        }
    }

    /// Acquire the lock, spinning until it becomes available.
    ///
    /// Uses [`core::hint::spin_loop`] while waiting. Never yields or blocks
    /// the current thread.
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        // Fast path: try once, then spin on a relaxed load until free.
        while self.held.swap(true, Ordering::Acquire) {
            while self.held.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
        SpinLockGuard { lock: self }
    }

    /// Attempt to acquire the lock without blocking.
    ///
    /// Returns `None` if the lock is currently held.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.held.swap(true, Ordering::Acquire) {
            None
        } else {
            Some(SpinLockGuard { lock: self })
        }
    }

    /// Execute `f` with exclusive access to the inner value.
    #[inline]
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut *self.lock())
    }

    /// Returns a mutable reference to the inner value.
    ///
    /// Because this requires `&mut self`, no other references can exist and
    /// locking is unnecessary.
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

/// A guard that releases a [`SpinLock`] when dropped.
///
/// Created by [`SpinLock::lock`] and [`SpinLock::try_lock`]. Implements
/// [`Deref`] and [`DerefMut`] to access the protected value.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard holds the lock exclusively.
        unsafe { &*self.lock.inner.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard holds the lock exclusively.
        unsafe { &mut *self.lock.inner.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // Unlock on scope exit, including unwinding.
        self.lock.held.store(false, Ordering::Release);
    }
}
