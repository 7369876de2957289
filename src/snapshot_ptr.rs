use crate::internal::smr_common::{AcquiredPtr, AcquireRetire};
use crate::internal::utils::MarkedCntObjPtr;
use crate::local_ptr::LocalPtr;
use crate::rc_ptr::RcPtr;

/// A transient, guard-scoped view into a [`CountedObject`](crate::internal::CountedObject)
/// that does **not** carry an owned strong reference. The object is kept
/// alive only by the protection the back end's announcement mechanism
/// grants for as long as this `SnapshotPtr` (or its underlying acquired
/// handle) is alive — this is what lets `AtomicRcPtr::load_snapshot` avoid
/// the atomic increment that `AtomicRcPtr::load` must pay.
pub struct SnapshotPtr<'g, T, G: AcquireRetire> {
    acquired: G::AcquiredPtr<T>,
    guard: &'g G,
}

impl<'g, T, G: AcquireRetire> SnapshotPtr<'g, T, G> {
    pub(crate) fn new(acquired: G::AcquiredPtr<T>, guard: &'g G) -> Self {
        Self { acquired, guard }
    }

    pub fn null(guard: &'g G) -> Self {
        Self::new(guard.reserve_nothing(), guard)
    }

    /// Whether the protection slot backing this snapshot still holds this
    /// exact pointer (as opposed to having been given up already).
    pub fn is_protected(&self) -> bool {
        self.acquired.is_protected()
    }

    pub fn clear(&mut self) {
        let old = std::mem::replace(&mut self.acquired, self.guard.reserve_nothing());
        self.guard.release(old);
    }
}

impl<'g, T, G: AcquireRetire> LocalPtr<'g, T, G> for SnapshotPtr<'g, T, G> {
    fn is_null(&self) -> bool {
        self.acquired.is_null()
    }

    unsafe fn as_ref(&self) -> Option<&'g T> {
        if self.is_null() {
            None
        } else {
            Some(self.deref())
        }
    }

    unsafe fn deref(&self) -> &'g T {
        self.acquired.deref_counted_ptr().deref().data()
    }

    unsafe fn deref_mut(&mut self) -> &'g mut T {
        self.acquired.deref_counted_ptr_mut().deref_mut().data_mut()
    }

    fn as_counted_ptr(&self) -> MarkedCntObjPtr<T> {
        self.acquired.as_counted_ptr()
    }

    fn is_protected(&self) -> bool {
        SnapshotPtr::is_protected(self)
    }

    fn clone(&self, guard: &'g G) -> Self {
        if self.is_null() {
            return Self::null(guard);
        }
        Self::new(guard.reserve_snapshot(self.as_counted_ptr()), guard)
    }

    /// Promotes this snapshot into an owned strong reference. If the
    /// strong count has already been driven to zero by a racing decrement
    /// (the object is logically dead even though this snapshot's
    /// protection has kept its memory alive), the increment fails and a
    /// null `RcPtr` is returned rather than resurrecting it.
    fn as_rc(self) -> RcPtr<'g, T, G> {
        let ptr = self.as_counted_ptr();
        if ptr.is_null() {
            return RcPtr::null(self.guard);
        }
        if self.guard.increment_ref_cnt(&ptr) {
            unsafe { RcPtr::new_without_incr(ptr, self.guard) }
        } else {
            RcPtr::null(self.guard)
        }
    }
}

impl<'g, T, G: AcquireRetire> Drop for SnapshotPtr<'g, T, G> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<'g, T, G: AcquireRetire> PartialEq for SnapshotPtr<'g, T, G> {
    fn eq(&self, other: &Self) -> bool {
        self.as_counted_ptr() == other.as_counted_ptr()
    }
}

impl<'g, T, G: AcquireRetire> std::fmt::Debug for SnapshotPtr<'g, T, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotPtr")
            .field("ptr", &self.as_counted_ptr().as_usize())
            .finish()
    }
}
