use crate::error::CdrcError;
use crate::internal::smr_common::AcquireRetire;
use crate::internal::utils::{CountedObject, MarkedCntObjPtr};
use crate::local_ptr::LocalPtr;
use std::alloc::Layout;

/// An owned, guard-scoped strong reference to a `T` managed by a
/// [`CountedObject`]. Holding an `RcPtr` guarantees the strong reference
/// count never reaches zero while it is alive, exactly like
/// [`std::sync::Arc`], but it is produced from (and tied to the lifetime
/// of) an SMR guard rather than being freestanding.
pub struct RcPtr<'g, T, G: AcquireRetire> {
    ptr: MarkedCntObjPtr<T>,
    guard: &'g G,
}

impl<'g, T, G: AcquireRetire> RcPtr<'g, T, G> {
    pub fn null(guard: &'g G) -> Self {
        Self {
            ptr: MarkedCntObjPtr::null(),
            guard,
        }
    }

    /// # Safety
    /// `ptr` must already represent one held strong reference (the caller
    /// is transferring ownership of that reference to the returned
    /// `RcPtr`, not creating a new one).
    pub(crate) unsafe fn new_without_incr(ptr: MarkedCntObjPtr<T>, guard: &'g G) -> Self {
        Self { ptr, guard }
    }

    /// Increments the strong count of `ptr` and wraps it.
    pub(crate) fn new_with_incr(ptr: MarkedCntObjPtr<T>, guard: &'g G) -> Self {
        if !ptr.is_null() {
            let incremented = guard.increment_ref_cnt(&ptr);
            debug_assert!(incremented, "cdrc: acquired a pointer with a dead refcount");
        }
        Self { ptr, guard }
    }

    /// Promotes a protected snapshot into an owned strong reference,
    /// incrementing the strong count.
    pub fn from_snapshot<S>(snapshot: &S, guard: &'g G) -> Self
    where
        S: LocalPtr<'g, T, G>,
    {
        Self::new_with_incr(snapshot.as_counted_ptr(), guard)
    }

    /// Allocates a new counted object holding `val` and returns an owning
    /// strong reference to it.
    pub fn make_shared(guard: &'g G, val: T) -> Result<Self, CdrcError> {
        let layout = Layout::new::<CountedObject<T>>();
        // SAFETY: the layout is that of a concrete, non-packed struct type.
        let raw = unsafe { std::alloc::alloc(layout) } as *mut CountedObject<T>;
        if raw.is_null() {
            return Err(CdrcError::AllocationFailed);
        }
        unsafe { raw.write(CountedObject::new(val)) };
        Ok(unsafe { Self::new_without_incr(MarkedCntObjPtr::new(raw), guard) })
    }

    pub fn clear(&mut self) {
        if !self.ptr.is_null() {
            self.guard.decrement_ref_cnt(self.ptr);
            self.ptr = MarkedCntObjPtr::null();
        }
    }

    pub fn use_count(&self) -> u32 {
        if self.ptr.is_null() {
            0
        } else {
            unsafe { self.ptr.deref() }.use_count()
        }
    }

    pub fn weak_count(&self) -> u32 {
        if self.ptr.is_null() {
            0
        } else {
            unsafe { self.ptr.deref() }.weak_count()
        }
    }

    /// Relinquishes ownership of the held strong reference without
    /// releasing it, returning the raw counted pointer.
    pub(crate) fn release(mut self) -> MarkedCntObjPtr<T> {
        let ptr = self.ptr;
        self.ptr = MarkedCntObjPtr::null();
        ptr
    }

    pub fn with_mark(&self, mark: usize) -> Self
    where
        T: Sized,
    {
        let mut copy = Self::new_with_incr(self.ptr, self.guard);
        copy.ptr = copy.ptr.with_mark(mark);
        copy
    }
}

impl<'g, T, G: AcquireRetire> LocalPtr<'g, T, G> for RcPtr<'g, T, G> {
    fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    unsafe fn as_ref(&self) -> Option<&'g T> {
        if self.ptr.is_null() {
            None
        } else {
            Some(self.deref())
        }
    }

    unsafe fn deref(&self) -> &'g T {
        self.ptr.deref().data()
    }

    unsafe fn deref_mut(&mut self) -> &'g mut T {
        self.ptr.deref_mut().data_mut()
    }

    fn as_counted_ptr(&self) -> MarkedCntObjPtr<T> {
        self.ptr
    }

    fn is_protected(&self) -> bool {
        false
    }

    fn clone(&self, guard: &'g G) -> Self {
        Self::new_with_incr(self.ptr, guard)
    }

    fn as_rc(self) -> RcPtr<'g, T, G> {
        self
    }
}

impl<'g, T, G: AcquireRetire> Drop for RcPtr<'g, T, G> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<'g, T, G: AcquireRetire> PartialEq for RcPtr<'g, T, G> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

/// Allocates a new counted object holding `val` and returns an owning
/// strong reference to it, scoped to `guard`.
pub fn make_rc<'g, T, G: AcquireRetire>(guard: &'g G, val: T) -> Result<RcPtr<'g, T, G>, CdrcError> {
    RcPtr::make_shared(guard, val)
}
