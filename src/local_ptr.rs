use crate::internal::smr_common::AcquireRetire;
use crate::rc_ptr::RcPtr;

/// Common operations shared by [`RcPtr`](crate::RcPtr) and
/// [`SnapshotPtr`](crate::SnapshotPtr): both are "local", guard-scoped
/// references into a [`CountedObject`](crate::internal::CountedObject),
/// differing only in whether they carry an owned strong reference.
pub trait LocalPtr<'g, T, G: AcquireRetire> {
    fn is_null(&self) -> bool;

    /// # Safety
    /// The caller must ensure the pointee is still alive, i.e. that this
    /// handle has not been cleared and that no one has raced it to zero.
    unsafe fn as_ref(&self) -> Option<&'g T>;

    /// # Safety
    /// Same requirements as [`LocalPtr::as_ref`].
    unsafe fn deref(&self) -> &'g T;

    /// # Safety
    /// Same requirements as [`LocalPtr::as_ref`], plus exclusive access.
    unsafe fn deref_mut(&mut self) -> &'g mut T;

    fn as_counted_ptr(&self) -> crate::internal::utils::MarkedCntObjPtr<T>;

    fn is_protected(&self) -> bool;

    fn as_usize(&self) -> usize {
        self.as_counted_ptr().as_usize()
    }

    fn mark(&self) -> usize {
        self.as_counted_ptr().mark()
    }

    fn unmarked(&self) -> usize {
        self.as_counted_ptr().as_usize() & !self.mark()
    }

    /// Returns a fresh handle to the same object, incrementing whatever
    /// count (strong, for `RcPtr`; none, for `SnapshotPtr`, which instead
    /// re-protects via `guard`) this handle's kind requires.
    fn clone(&self, guard: &'g G) -> Self
    where
        Self: Sized;

    /// Converts this handle into an owned strong reference, incrementing
    /// the strong count if this handle did not already carry one.
    fn as_rc(self) -> RcPtr<'g, T, G>;
}
