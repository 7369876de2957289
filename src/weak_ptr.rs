use crate::internal::smr_common::AcquireRetire;
use crate::internal::utils::MarkedCntObjPtr;
use crate::local_ptr::LocalPtr;
use crate::rc_ptr::RcPtr;

/// An owned weak reference: keeps the control block of a `T` alive without
/// keeping `T` itself alive. [`WeakPtr::upgrade`] is the only way to get
/// back a strong reference, and it fails once the strong count has already
/// reached zero — it never resurrects a disposed payload.
pub struct WeakPtr<T, G: AcquireRetire> {
    ptr: MarkedCntObjPtr<T>,
    _marker: std::marker::PhantomData<G>,
}

impl<T, G: AcquireRetire> WeakPtr<T, G> {
    pub fn null() -> Self {
        Self {
            ptr: MarkedCntObjPtr::null(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Creates a new weak reference to the object `rc` points to.
    pub fn from_strong(rc: &RcPtr<'_, T, G>) -> Self {
        let ptr = rc.as_counted_ptr();
        if !ptr.is_null() {
            let incremented = G::handle().increment_weak_cnt(&ptr);
            debug_assert!(
                incremented,
                "cdrc: a live strong reference implies a live weak unit"
            );
        }
        Self {
            ptr,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    pub(crate) fn as_counted_ptr(&self) -> MarkedCntObjPtr<T> {
        self.ptr
    }

    /// # Safety
    /// `ptr` must already represent one held weak reference being
    /// transferred into the returned `WeakPtr`.
    pub(crate) unsafe fn from_raw_without_incr(ptr: MarkedCntObjPtr<T>) -> Self {
        Self {
            ptr,
            _marker: std::marker::PhantomData,
        }
    }

    /// Attempts to promote this weak reference into an owned strong
    /// reference. Returns `None` if the strong count has already been
    /// driven to (and stuck at) zero.
    pub fn upgrade<'g>(&self, guard: &'g G) -> Option<RcPtr<'g, T, G>> {
        if self.ptr.is_null() {
            return None;
        }
        if guard.increment_ref_cnt(&self.ptr) {
            Some(unsafe { RcPtr::new_without_incr(self.ptr, guard) })
        } else {
            None
        }
    }

    pub fn weak_count(&self) -> u32 {
        if self.ptr.is_null() {
            0
        } else {
            unsafe { self.ptr.deref() }.weak_count()
        }
    }
}

impl<T, G: AcquireRetire> Clone for WeakPtr<T, G> {
    fn clone(&self) -> Self {
        if !self.ptr.is_null() {
            let incremented = G::handle().increment_weak_cnt(&self.ptr);
            debug_assert!(incremented, "cdrc: cloned a weak reference past its last unit");
        }
        Self {
            ptr: self.ptr,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T, G: AcquireRetire> Drop for WeakPtr<T, G> {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            G::handle().decrement_weak_cnt(self.ptr);
        }
    }
}

impl<T, G: AcquireRetire> PartialEq for WeakPtr<T, G> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}
