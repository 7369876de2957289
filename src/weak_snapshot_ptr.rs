use crate::internal::smr_common::{AcquiredPtr, AcquireRetire};
use crate::internal::utils::MarkedCntObjPtr;
use crate::rc_ptr::RcPtr;
use crate::weak_ptr::WeakPtr;

/// A transient, guard-scoped view into a block reached through an
/// [`AtomicWeakPtr`](crate::AtomicWeakPtr), without incrementing the weak
/// count. Unlike [`SnapshotPtr`](crate::SnapshotPtr), acquiring one also
/// checks that the strong count has not already reached zero — a live
/// weak-pointed-to block whose payload has already been disposed must be
/// treated as expired, even though its control block memory is still
/// protected and safe to read.
pub struct WeakSnapshotPtr<'g, T, G: AcquireRetire> {
    acquired: G::AcquiredPtr<T>,
    guard: &'g G,
}

impl<'g, T, G: AcquireRetire> WeakSnapshotPtr<'g, T, G> {
    pub(crate) fn new(acquired: G::AcquiredPtr<T>, guard: &'g G) -> Self {
        Self { acquired, guard }
    }

    pub fn null(guard: &'g G) -> Self {
        Self::new(guard.reserve_nothing(), guard)
    }

    pub fn is_null(&self) -> bool {
        self.acquired.is_null()
    }

    pub(crate) fn as_counted_ptr(&self) -> MarkedCntObjPtr<T> {
        self.acquired.as_counted_ptr()
    }

    pub fn clear(&mut self) {
        let old = std::mem::replace(&mut self.acquired, self.guard.reserve_nothing());
        self.guard.release(old);
    }

    pub fn clone(&self, guard: &'g G) -> Self {
        if self.is_null() {
            return Self::null(guard);
        }
        Self::new(guard.reserve_snapshot(self.as_counted_ptr()), guard)
    }

    /// Converts this snapshot into an owned weak reference.
    pub fn as_weak(&self) -> WeakPtr<T, G> {
        if self.is_null() {
            return WeakPtr::null();
        }
        let ptr = self.as_counted_ptr();
        let incremented = G::handle().increment_weak_cnt(&ptr);
        debug_assert!(incremented, "cdrc: protected snapshot outlived its block's weak unit");
        unsafe { WeakPtr::from_raw_without_incr(ptr) }
    }

    /// Attempts to promote this snapshot into an owned strong reference.
    pub fn as_rc(self) -> Option<RcPtr<'g, T, G>> {
        if self.is_null() {
            return None;
        }
        let ptr = self.as_counted_ptr();
        if self.guard.increment_ref_cnt(&ptr) {
            Some(unsafe { RcPtr::new_without_incr(ptr, self.guard) })
        } else {
            None
        }
    }
}

impl<'g, T, G: AcquireRetire> Drop for WeakSnapshotPtr<'g, T, G> {
    fn drop(&mut self) {
        self.clear();
    }
}
