//! The trait surface that every safe-memory-reclamation back end must
//! implement. `AtomicRcPtr`/`RcPtr`/`SnapshotPtr` and their weak
//! counterparts are generic over `G: AcquireRetire`, so swapping
//! [`crate::internal::smr::announce::GuardHP`] for
//! [`crate::internal::smr::ebr::GuardEBR`] (or any third-party back end
//! implementing this trait) changes only performance characteristics, never
//! the observable semantics of the pointer types built on top of it.

use crate::internal::utils::{CountedObject, EjectAction, MarkedCntObjPtr};

/// Disposes the payload at `raw` (a [`MarkedCntObjPtr::unmarked`] value) and,
/// if that was the last weak unit, frees the control block. Shared by every
/// back end's retired-object bookkeeping so there is exactly one place that
/// encodes "what finalizing a `Dispose` entry means".
///
/// # Safety
/// The caller must have already established that no live announcement (of
/// any kind, in any back end) can observe `raw`, and that `raw` really does
/// point to a `CountedObject<T>` whose strong count has reached zero.
pub(crate) unsafe fn finalize_dispose<T>(raw: usize) {
    let mut ptr: MarkedCntObjPtr<T> = MarkedCntObjPtr::new(raw as *mut CountedObject<T>);
    ptr.deref_mut().dispose();
    if ptr.deref().release_weak_refs(1) {
        drop(Box::from_raw(ptr.unmarked()));
    }
}

/// # Safety
/// Same requirements as [`finalize_dispose`].
pub(crate) unsafe fn finalize_decrement_strong<T>(raw: usize) {
    let mut ptr: MarkedCntObjPtr<T> = MarkedCntObjPtr::new(raw as *mut CountedObject<T>);
    match ptr.deref_mut().release_refs(1) {
        EjectAction::Nothing => {}
        EjectAction::Delay => finalize_dispose::<T>(raw),
        // The payload was already disposed inline by `release_refs`; only
        // the collective weak unit it held needs releasing now.
        EjectAction::Destroy => finalize_decrement_weak::<T>(raw),
    }
}

/// # Safety
/// Same requirements as [`finalize_dispose`].
pub(crate) unsafe fn finalize_decrement_weak<T>(raw: usize) {
    let ptr: MarkedCntObjPtr<T> = MarkedCntObjPtr::new(raw as *mut CountedObject<T>);
    if ptr.deref().release_weak_refs(1) {
        drop(Box::from_raw(ptr.unmarked()));
    }
}

/// What kind of deferred work a retired pointer represents.
pub enum RetireType {
    /// Release one strong reference once no announcement can observe it.
    DecrementStrongCount,
    /// Release one weak reference once no announcement can observe it.
    DecrementWeakCount,
    /// Destroy the payload (the strong count has already reached zero)
    /// once no announcement can observe it.
    Dispose,
}

/// A handle to a pointer that has been protected against concurrent
/// reclamation by some back-end-specific mechanism (an announcement slot,
/// an owned reference count, or nothing at all for back ends that protect
/// everything implicitly, e.g. EBR).
pub trait AcquiredPtr<T> {
    /// # Safety
    /// The returned reference is only valid as long as the protection this
    /// handle represents remains in force.
    unsafe fn deref_counted_ptr(&self) -> &MarkedCntObjPtr<T>;

    /// # Safety
    /// The returned reference is only valid as long as the protection this
    /// handle represents remains in force.
    unsafe fn deref_counted_ptr_mut(&mut self) -> &mut MarkedCntObjPtr<T>;

    fn as_counted_ptr(&self) -> MarkedCntObjPtr<T>;

    fn is_null(&self) -> bool {
        self.as_counted_ptr().is_null()
    }

    /// Whether this handle is actively protecting its pointee (as opposed
    /// to merely carrying an owned strong reference, which needs no
    /// protection slot).
    fn is_protected(&self) -> bool;

    /// Gives up whatever protection this handle was holding, without
    /// affecting the reference counts of the pointee.
    fn clear_protection(&mut self);

    /// Atomically swaps the pointer this handle protects, returning the
    /// previous value.
    fn swap(&mut self, new_ptr: MarkedCntObjPtr<T>) -> MarkedCntObjPtr<T>;

    fn eq(&self, other: &MarkedCntObjPtr<T>) -> bool {
        self.as_counted_ptr() == *other
    }
}

/// Implemented once per safe-memory-reclamation back end. A `Guard`
/// (`G: AcquireRetire`) is created per critical section (in practice, per
/// pointer dereference) and is responsible for making sure a pointer
/// published to other threads cannot be deallocated out from under a
/// reader, and for eventually driving deferred decrements/destructions to
/// completion.
pub trait AcquireRetire {
    type AcquiredPtr<T>: AcquiredPtr<T>;

    /// Returns a guard for the calling thread's current critical section.
    fn handle() -> Self;

    fn create_object<T>(&self, val: T) -> MarkedCntObjPtr<T> {
        let b = Box::new(CountedObject::new(val));
        MarkedCntObjPtr::new(Box::into_raw(b))
    }

    /// Protects `link`'s current value against reclamation and returns a
    /// handle to it, retrying if the value changes while protection is
    /// being established.
    fn acquire<T>(&self, link: &atomic::Atomic<MarkedCntObjPtr<T>>) -> Self::AcquiredPtr<T>;

    /// Protects exactly `ptr` (which the caller already knows is live, e.g.
    /// because it was just loaded from a link this thread owns) rather than
    /// re-reading `link`.
    fn reserve<T>(&self, ptr: MarkedCntObjPtr<T>) -> Self::AcquiredPtr<T>;

    /// Returns a handle that protects nothing; used as the starting point
    /// for a handle that will be filled in by a later `swap`.
    fn reserve_nothing<T>(&self) -> Self::AcquiredPtr<T>;

    /// Protects `link`'s current value using a snapshot slot: unlike
    /// [`AcquireRetire::acquire`], the resulting handle does not entitle
    /// the caller to an owned strong reference and must be released via
    /// [`AcquireRetire::release`] rather than dropped into an `RcPtr`.
    fn protect_snapshot<T>(&self, link: &atomic::Atomic<MarkedCntObjPtr<T>>) -> Self::AcquiredPtr<T>;

    fn reserve_snapshot<T>(&self, ptr: MarkedCntObjPtr<T>) -> Self::AcquiredPtr<T>;

    /// Releases a handle obtained from `protect_snapshot`/`reserve_snapshot`.
    fn release<T>(&self, ptr: Self::AcquiredPtr<T>);

    /// # Safety
    /// `ptr` must not be dereferenced by any other thread, even via an
    /// announcement slot, after this call.
    unsafe fn delete_object<T>(&self, ptr: MarkedCntObjPtr<T>);

    /// Defers `ptr`'s `retire_type` action until no announcement can still
    /// observe it.
    ///
    /// # Safety
    /// `ptr` must be a valid, currently-retired pointer obtained from this
    /// back end, and must not be retired twice for the same action.
    unsafe fn retire<T>(&self, ptr: MarkedCntObjPtr<T>, retire_type: RetireType);

    fn dispose<T>(&self, ptr: MarkedCntObjPtr<T>) {
        unsafe { self.retire(ptr, RetireType::Dispose) }
    }

    fn destroy<T>(&self, ptr: MarkedCntObjPtr<T>) {
        unsafe { self.delete_object(ptr) }
    }

    /// Applies `action` to a block whose payload has already been disposed
    /// (or never needed disposal) as reported by
    /// [`CountedObject::release_refs`]/[`CountedObject::release_weak_refs`].
    fn eject<T>(&self, ptr: MarkedCntObjPtr<T>, action: EjectAction) {
        match action {
            EjectAction::Nothing => {}
            EjectAction::Delay => self.dispose(ptr),
            EjectAction::Destroy => self.destroy(ptr),
        }
    }

    fn increment_ref_cnt<T>(&self, ptr: &MarkedCntObjPtr<T>) -> bool {
        if ptr.is_null() {
            return false;
        }
        unsafe { ptr.deref() }.add_refs(1)
    }

    fn increment_weak_cnt<T>(&self, ptr: &MarkedCntObjPtr<T>) -> bool {
        if ptr.is_null() {
            return false;
        }
        unsafe { ptr.deref() }.add_weak_refs(1)
    }

    fn decrement_ref_cnt<T>(&self, mut ptr: MarkedCntObjPtr<T>) {
        if ptr.is_null() {
            return;
        }
        let action = unsafe { ptr.deref_mut() }.release_refs(1);
        self.eject(ptr, action);
    }

    fn decrement_weak_cnt<T>(&self, ptr: MarkedCntObjPtr<T>) {
        if ptr.is_null() {
            return;
        }
        if unsafe { ptr.deref() }.release_weak_refs(1) {
            self.destroy(ptr);
        }
    }

    /// Like [`AcquireRetire::decrement_ref_cnt`] but defers the decrement
    /// itself (not just the eventual destruction) until no announcement
    /// can observe `ptr`; used when the caller cannot prove `ptr` is not
    /// concurrently being read through an announcement slot.
    fn delayed_decrement_ref_cnt<T>(&self, ptr: MarkedCntObjPtr<T>) {
        if ptr.is_null() {
            return;
        }
        unsafe { self.retire(ptr, RetireType::DecrementStrongCount) };
    }

    fn delayed_decrement_weak_cnt<T>(&self, ptr: MarkedCntObjPtr<T>) {
        if ptr.is_null() {
            return;
        }
        unsafe { self.retire(ptr, RetireType::DecrementWeakCount) };
    }
}
