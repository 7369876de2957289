use crate::internal::smr_common::{AcquiredPtr, AcquireRetire};
use crate::internal::utils::MarkedCntObjPtr;
use crate::weak_ptr::WeakPtr;
use crate::weak_snapshot_ptr::WeakSnapshotPtr;
use atomic::{Atomic, Ordering};

/// A shared, atomically updatable weak reference.
pub struct AtomicWeakPtr<T, G: AcquireRetire> {
    link: Atomic<MarkedCntObjPtr<T>>,
    _marker: std::marker::PhantomData<G>,
}

unsafe impl<T: Send + Sync, G: AcquireRetire> Send for AtomicWeakPtr<T, G> {}
unsafe impl<T: Send + Sync, G: AcquireRetire> Sync for AtomicWeakPtr<T, G> {}

impl<T, G: AcquireRetire> AtomicWeakPtr<T, G> {
    pub fn null() -> Self {
        Self {
            link: Atomic::new(MarkedCntObjPtr::null()),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn store_null(&self, guard: &G) {
        let old = self.link.swap(MarkedCntObjPtr::null(), Ordering::AcqRel);
        if !old.is_null() {
            guard.decrement_weak_cnt(old);
        }
    }

    /// Stores `new`, taking ownership of its weak reference (no
    /// increment), and releases whatever was previously linked.
    pub fn store(&self, guard: &G, new: WeakPtr<T, G>) {
        let new_ptr = new.as_counted_ptr();
        std::mem::forget(new);
        let old = self.link.swap(new_ptr, Ordering::AcqRel);
        if !old.is_null() {
            guard.decrement_weak_cnt(old);
        }
    }

    /// Loads the current value as an owned weak reference.
    pub fn load(&self, guard: &G) -> WeakPtr<T, G> {
        let ptr = self.link.load(Ordering::Acquire);
        if ptr.is_null() {
            return WeakPtr::null();
        }
        let incremented = guard.increment_weak_cnt(&ptr);
        debug_assert!(incremented, "cdrc: weak link held a dead weak count");
        unsafe { WeakPtr::from_raw_without_incr(ptr) }
    }

    /// Loads the current value as a guard-scoped weak snapshot. Returns a
    /// null snapshot both when the link is null and when it points to a
    /// block whose strong count has already reached zero.
    pub fn load_snapshot<'g>(&self, guard: &'g G) -> WeakSnapshotPtr<'g, T, G> {
        let acquired = guard.protect_snapshot(&self.link);
        if acquired.is_null() {
            return WeakSnapshotPtr::new(acquired, guard);
        }
        let ptr = acquired.as_counted_ptr();
        if unsafe { ptr.deref() }.use_count() > 0 {
            WeakSnapshotPtr::new(acquired, guard)
        } else {
            guard.release(acquired);
            WeakSnapshotPtr::null(guard)
        }
    }

    /// Replaces the current value with `new` iff it is still `current`,
    /// consuming `new` on success and returning the previous value as an
    /// owned weak reference; on failure, `new` is dropped and the current
    /// cell value is reported back as a protected weak snapshot, mirroring
    /// [`AtomicRcPtr::compare_exchange`](crate::AtomicRcPtr::compare_exchange).
    pub fn compare_exchange<'g>(
        &self,
        guard: &'g G,
        current: &WeakSnapshotPtr<'g, T, G>,
        new: WeakPtr<T, G>,
    ) -> Result<WeakPtr<T, G>, WeakSnapshotPtr<'g, T, G>> {
        let expected = current.as_counted_ptr();
        let new_ptr = new.as_counted_ptr();
        match self
            .link
            .compare_exchange(expected, new_ptr, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(old) => {
                std::mem::forget(new);
                Ok(unsafe { WeakPtr::from_raw_without_incr(old) })
            }
            Err(_) => {
                drop(new);
                Err(self.load_snapshot(guard))
            }
        }
    }

    /// Whether this cell's atomic operations are lock-free on this
    /// platform (always true on every supported target).
    pub fn is_lock_free(&self) -> bool {
        Atomic::<MarkedCntObjPtr<T>>::is_lock_free()
    }
}

impl<T, G: AcquireRetire> Drop for AtomicWeakPtr<T, G> {
    fn drop(&mut self) {
        let ptr = self.link.load(Ordering::Relaxed);
        if !ptr.is_null() {
            G::handle().decrement_weak_cnt(ptr);
        }
    }
}

impl<T, G: AcquireRetire> Default for AtomicWeakPtr<T, G> {
    fn default() -> Self {
        Self::null()
    }
}
