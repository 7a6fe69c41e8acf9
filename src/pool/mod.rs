//! Thread-confined object pools for hot per-tick scratch values.
//!
//! Each pool is a bounded stack of recyclable instances owned by exactly one
//! thread; there is no synchronization because nothing is shared. Acquired
//! values keep whatever state they had when released, so callers must
//! overwrite every field before reading any.

pub mod scratch;

pub use scratch::{with_thread_arena, ScratchArena};

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

/// Decides whether a released value goes back on the stack.
///
/// Returning `false` discards the instance; collections use this to drop
/// buffers that grew past their retention ceiling.
type RecycleFn<T> = Box<dyn Fn(&mut T) -> bool>;

/// Bounded stack of reusable instances of one value kind.
pub struct Pool<T> {
    slots: RefCell<Vec<T>>,
    capacity: usize,
    create: Box<dyn Fn() -> T>,
    recycle: RecycleFn<T>,
    hits: Cell<u64>,
    misses: Cell<u64>,
    // Confined to the owning thread; never Send or Sync.
    _not_send: PhantomData<*const ()>,
}

impl<T> Pool<T> {
    /// Pool whose instances are reused as-is.
    pub fn new(capacity: usize, create: impl Fn() -> T + 'static) -> Self {
        Self::with_recycle(capacity, create, |_| true)
    }

    /// Pool with a release-time hook that can reset or veto reuse.
    pub fn with_recycle(
        capacity: usize,
        create: impl Fn() -> T + 'static,
        recycle: impl Fn(&mut T) -> bool + 'static,
    ) -> Self {
        Self {
            slots: RefCell::new(Vec::with_capacity(capacity)),
            capacity,
            create: Box::new(create),
            recycle: Box::new(recycle),
            hits: Cell::new(0),
            misses: Cell::new(0),
            _not_send: PhantomData,
        }
    }

    /// Borrow an instance; it returns to the pool when the guard drops,
    /// on every exit path including unwinding.
    pub fn acquire(&self) -> Pooled<'_, T> {
        let value = match self.slots.borrow_mut().pop() {
            Some(value) => {
                self.hits.set(self.hits.get() + 1);
                value
            }
            None => {
                self.misses.set(self.misses.get() + 1);
                (self.create)()
            }
        };
        Pooled {
            pool: self,
            value: Some(value),
        }
    }

    /// Return an instance taken out of a guard with [`Pooled::detach`].
    pub fn release(&self, mut value: T) {
        if (self.recycle)(&mut value) {
            let mut slots = self.slots.borrow_mut();
            if slots.len() < self.capacity {
                slots.push(value);
            }
        }
    }

    /// Instances currently held for reuse.
    pub fn retained(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Acquisitions served from the pool.
    pub fn hits(&self) -> u64 {
        self.hits.get()
    }

    /// Acquisitions that had to construct a fresh instance.
    pub fn misses(&self) -> u64 {
        self.misses.get()
    }
}

impl<T> std::fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("retained", &self.retained())
            .field("capacity", &self.capacity)
            .field("hits", &self.hits.get())
            .field("misses", &self.misses.get())
            .finish()
    }
}

/// Scoped borrow of a pooled instance.
pub struct Pooled<'p, T> {
    pool: &'p Pool<T>,
    value: Option<T>,
}

impl<T> Pooled<'_, T> {
    /// Take ownership; the caller becomes responsible for
    /// [`Pool::release`].
    pub fn detach(mut self) -> T {
        self.value.take().expect("pooled value already detached")
    }
}

impl<T> Deref for Pooled<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.value.as_ref().expect("pooled value already detached")
    }
}

impl<T> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("pooled value already detached")
    }
}

impl<T> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.release(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_constructs_when_empty() {
        let pool: Pool<Vec<u8>> = Pool::new(4, Vec::new);
        let guard = pool.acquire();
        assert!(guard.is_empty());
        assert_eq!(pool.misses(), 1);
        assert_eq!(pool.hits(), 0);
    }

    #[test]
    fn test_round_trip_reuses_instance() {
        let pool: Pool<Vec<u8>> = Pool::new(4, Vec::new);
        {
            let mut guard = pool.acquire();
            guard.push(42);
        }
        assert_eq!(pool.retained(), 1);

        let guard = pool.acquire();
        assert_eq!(pool.hits(), 1);
        // Contents are NOT cleared; the previous state is still visible
        assert_eq!(&guard[..], &[42]);
    }

    #[test]
    fn test_retained_never_exceeds_capacity() {
        let pool: Pool<Vec<u8>> = Pool::new(2, Vec::new);
        let a = pool.acquire().detach();
        let b = pool.acquire().detach();
        let c = pool.acquire().detach();
        pool.release(a);
        pool.release(b);
        pool.release(c);
        assert_eq!(pool.retained(), 2);
    }

    #[test]
    fn test_no_double_issue() {
        let pool: Pool<Vec<u8>> = Pool::new(4, Vec::new);
        {
            let mut a = pool.acquire();
            let mut b = pool.acquire();
            a.push(1);
            b.push(2);
            // Two live borrows are always distinct instances
            assert_ne!(&a[..], &b[..]);
        }
        assert_eq!(pool.retained(), 2);
    }

    #[test]
    fn test_guard_releases_on_early_return() {
        let pool: Pool<Vec<u8>> = Pool::new(4, Vec::new);
        fn early(pool: &Pool<Vec<u8>>, bail: bool) -> u32 {
            let _guard = pool.acquire();
            if bail {
                return 0;
            }
            1
        }
        early(&pool, true);
        assert_eq!(pool.retained(), 1);
    }

    #[test]
    fn test_guard_releases_on_unwind() {
        let pool: Pool<Vec<u8>> = Pool::new(4, Vec::new);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = pool.acquire();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(pool.retained(), 1);
    }

    #[test]
    fn test_recycle_veto_discards() {
        // Discard anything that grew beyond 8 elements
        let pool: Pool<Vec<u8>> = Pool::with_recycle(4, Vec::new, |v| {
            v.clear();
            v.capacity() <= 8
        });
        let mut big = pool.acquire().detach();
        big.reserve(1024);
        pool.release(big);
        assert_eq!(pool.retained(), 0);

        pool.release(Vec::new());
        assert_eq!(pool.retained(), 1);
    }

    #[test]
    fn test_zero_capacity_pool_always_discards() {
        let pool: Pool<Vec<u8>> = Pool::new(0, Vec::new);
        pool.release(Vec::new());
        assert_eq!(pool.retained(), 0);
        let _ = pool.acquire();
        assert_eq!(pool.misses(), 1);
    }
}
