//! Exclusive, non-reentrant region lock.
//!
//! One [`TerrainLock`] guards one region. Acquiring it returns a
//! [`TerrainGuard`]; the lock is released when the guard is dropped. The lock
//! remembers which thread holds it so mutation paths can assert ownership and
//! so an accidental re-acquire on the holding thread fails loudly instead of
//! deadlocking. Code that needs the lock recursively passes the guard down.

use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

/// No thread holds the lock.
const NO_OWNER: u64 = 0;

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CONTEXT: u64 = NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed);
}

/// Identifier of the calling thread, never `NO_OWNER`.
fn current_context() -> u64 {
    CONTEXT.with(|id| *id)
}

pub struct TerrainLock {
    mutex: Mutex<()>,
    owner: AtomicU64,
}

impl Default for TerrainLock {
    fn default() -> Self {
        Self::new()
    }
}

impl TerrainLock {
    pub fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            owner: AtomicU64::new(NO_OWNER),
        }
    }

    /// Block until the lock is available.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds this lock.
    pub fn lock(&self) -> TerrainGuard<'_> {
        let me = current_context();
        assert!(
            self.owner.load(Ordering::Acquire) != me,
            "terrain lock is not reentrant; pass the held guard instead of locking again"
        );
        let inner = self.mutex.lock();
        self.owner.store(me, Ordering::Release);
        TerrainGuard {
            lock: self,
            _inner: inner,
        }
    }

    /// Acquire the lock only if it is free right now.
    pub fn try_lock(&self) -> Option<TerrainGuard<'_>> {
        let inner = self.mutex.try_lock()?;
        self.owner.store(current_context(), Ordering::Release);
        Some(TerrainGuard {
            lock: self,
            _inner: inner,
        })
    }

    /// Release a held lock. Same as dropping the guard.
    pub fn unlock(guard: TerrainGuard<'_>) {
        drop(guard);
    }

    /// Whether any thread currently holds the lock. Diagnostic only.
    pub fn locked(&self) -> bool {
        self.mutex.is_locked()
    }

    pub fn held_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Acquire) == current_context()
    }

    /// # Panics
    ///
    /// Panics if the calling thread does not hold the lock.
    pub fn assert_held(&self) {
        assert!(
            self.held_by_current_thread(),
            "terrain accessed without holding the region lock"
        );
    }
}

/// Proof that the current thread holds a [`TerrainLock`].
pub struct TerrainGuard<'a> {
    lock: &'a TerrainLock,
    _inner: MutexGuard<'a, ()>,
}

impl TerrainGuard<'_> {
    /// Whether this guard was issued by `lock`.
    pub fn guards(&self, lock: &TerrainLock) -> bool {
        ptr::eq(self.lock, lock)
    }
}

impl Drop for TerrainGuard<'_> {
    fn drop(&mut self) {
        // Runs before `_inner` releases the mutex.
        self.lock.owner.store(NO_OWNER, Ordering::Release);
    }
}
