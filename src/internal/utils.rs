use atomic::{Atomic, Ordering};
use core::mem;
use static_assertions::const_assert;
use std::{
    mem::ManuallyDrop,
    ptr,
    sync::atomic::{compiler_fence, AtomicBool},
};

/// The width of a strong or weak reference count.
pub(crate) type Count = u32;

/// A wait-free atomic counter that supports increment and decrement,
/// such that attempting to increment the counter from zero fails and
/// does not perform the increment.
///
/// Useful for implementing reference counting, where the underlying
/// managed memory is freed when the counter hits zero, so that other
/// racing threads can not increment the counter back up from zero.
///
/// Assumption: the counter should never go negative. The caller must
/// never decrement the counter by more than its current value.
///
/// The counter steals the top two bits of the integer for book-keeping
/// purposes, so the maximum representable value is `2^(8*size_of::<Count>() - 2) - 1`.
pub(crate) struct StickyCounter {
    x: Atomic<Count>,
}

const_assert!(Atomic::<Count>::is_lock_free());

impl StickyCounter {
    const fn zero_flag() -> Count {
        1 << (mem::size_of::<Count>() * 8 - 1)
    }

    const fn zero_pending_flag() -> Count {
        1 << (mem::size_of::<Count>() * 8 - 2)
    }

    pub fn new() -> Self {
        Self { x: Atomic::new(1) }
    }

    /// Increments the counter by `add` iff the counter is not stuck at zero.
    ///
    /// Returns `true` on success, `false` if the counter was already stuck
    /// at zero. This is implemented with a CAS loop rather than a plain
    /// fetch-add: a fetch-add could race with the transition into the
    /// absorbing zero state and resurrect a dead object.
    pub fn increment(&self, add: Count, order: Ordering) -> bool {
        let mut cur = self.x.load(Ordering::Relaxed);
        loop {
            if cur & Self::zero_flag() != 0 {
                return false;
            }
            match self
                .x
                .compare_exchange_weak(cur, cur + add, order, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Decrements the counter by `sub`. The counter must hold at least
    /// `sub` units; this makes a plain `fetch_sub` safe.
    ///
    /// Returns whether the post-decrement value is zero. If so, the counter
    /// is also atomically marked as absorbed against future increments.
    pub fn decrement(&self, sub: Count, order: Ordering) -> bool {
        if self.x.fetch_sub(sub, order) == sub {
            compiler_fence(Ordering::Acquire);
            match self
                .x
                .compare_exchange(0, Self::zero_flag(), Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return true,
                Err(actual) => {
                    return (actual & Self::zero_pending_flag()) > 0
                        && (self.x.swap(Self::zero_flag(), Ordering::SeqCst)
                            & Self::zero_pending_flag())
                            > 0;
                }
            }
        }
        false
    }

    /// An unsynchronised snapshot of the current value. If the current
    /// value is zero, it is guaranteed to remain zero forever.
    pub fn load(&self, order: Ordering) -> Count {
        let val = self.x.load(order);
        if val != 0 {
            return if (val & Self::zero_flag()) > 0 { 0 } else { val };
        }

        match self.x.compare_exchange(
            val,
            Self::zero_flag() | Self::zero_pending_flag(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => 0,
            Err(actual) => {
                if (actual & Self::zero_flag()) > 0 {
                    0
                } else {
                    actual
                }
            }
        }
    }
}

impl From<Count> for StickyCounter {
    fn from(value: Count) -> Self {
        Self {
            x: Atomic::new(if value == 0 { Self::zero_flag() } else { value }),
        }
    }
}

/// What a caller of [`CountedObject::release_refs`]/`release_weak_refs` must
/// do once the refcount operation has completed.
pub enum EjectAction {
    /// Nothing further is required.
    Nothing,
    /// The payload has not been destroyed yet; the caller must defer the
    /// disposal until no announcement slot can still observe the object.
    Delay,
    /// The payload has already been destroyed and no weak reference
    /// survives it; the caller must free the control block immediately.
    Destroy,
}

/// A heap block holding a payload of type `T` together with a sticky strong
/// count and a sticky weak count (see spec §3: the weak count starts at 1,
/// representing "all strong references collectively hold one weak unit").
pub struct CountedObject<T> {
    storage: ManuallyDrop<T>,
    ref_cnt: StickyCounter,
    weak_cnt: StickyCounter,
    disposed: AtomicBool,
}

impl<T> CountedObject<T> {
    pub fn new(val: T) -> Self {
        Self {
            storage: ManuallyDrop::new(val),
            ref_cnt: StickyCounter::new(),
            weak_cnt: StickyCounter::new(),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn data(&self) -> &T {
        &self.storage
    }

    pub fn data_mut(&mut self) -> &mut T {
        &mut self.storage
    }

    /// Destroys the managed payload but keeps the control block intact.
    ///
    /// # Safety
    /// Must be called at most once, and only once the strong count has
    /// reached zero.
    pub unsafe fn dispose(&mut self) {
        self.disposed.store(true, Ordering::Release);
        ManuallyDrop::drop(&mut self.storage)
    }

    pub fn use_count(&self) -> Count {
        self.ref_cnt.load(Ordering::SeqCst)
    }

    pub fn weak_count(&self) -> Count {
        self.weak_cnt.load(Ordering::SeqCst)
    }

    pub fn add_refs(&self, count: Count) -> bool {
        self.ref_cnt.increment(count, Ordering::SeqCst)
    }

    /// Releases `count` strong references. If this brings the strong count
    /// to zero, the payload is disposed of right away: if no weak reference
    /// survives it can also be freed immediately, otherwise a live weak
    /// pointer might still take a snapshot of the block, so disposal only
    /// (not deallocation) is reported back for the caller to finish off
    /// once the SMR back end confirms nothing can still observe it.
    pub fn release_refs(&mut self, count: Count) -> EjectAction {
        // A decrement-release + an acquire fence is recommended by Boost's
        // documentation for reference-counted destruction races; it is
        // cheaper than a full acquire-release decrement since the acquire
        // is only needed on the path that actually zeroes the counter.
        if self.ref_cnt.decrement(count, Ordering::Release) {
            compiler_fence(Ordering::Acquire);
            if self.weak_cnt.load(Ordering::Relaxed) == 1 {
                unsafe { self.dispose() };
                EjectAction::Destroy
            } else {
                EjectAction::Delay
            }
        } else {
            EjectAction::Nothing
        }
    }

    pub fn add_weak_refs(&self, count: Count) -> bool {
        self.weak_cnt.increment(count, Ordering::Relaxed)
    }

    /// Releases `count` weak references, reporting whether the block can
    /// now be freed.
    pub fn release_weak_refs(&self, count: Count) -> bool {
        self.weak_cnt.decrement(count, Ordering::Release)
    }
}

impl<T> Drop for CountedObject<T> {
    fn drop(&mut self) {
        assert!(self.disposed.load(Ordering::Acquire));
    }
}

/// A raw pointer to `T` with the low `k` bits (`k = align_of::<T>().trailing_zeros()`)
/// reserved for a mark/tag that travels alongside the pointer through every
/// atomic operation, including compare-and-swap.
pub struct MarkedPtr<T> {
    ptr: *mut T,
}

impl<T> Default for MarkedPtr<T> {
    fn default() -> Self {
        Self {
            ptr: ptr::null_mut(),
        }
    }
}

impl<T> Clone for MarkedPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for MarkedPtr<T> {}

impl<T> PartialEq for MarkedPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T> Eq for MarkedPtr<T> {}

unsafe impl<T> Send for MarkedPtr<T> {}
unsafe impl<T> Sync for MarkedPtr<T> {}

impl<T> MarkedPtr<T> {
    pub fn new(ptr: *mut T) -> Self {
        Self { ptr }
    }

    /// Reconstructs a marked pointer from the encoded word returned by
    /// [`MarkedPtr::as_usize`]. Used at the public API boundary so callers
    /// building marked-pointer data structures (e.g. a Harris-style list's
    /// logical-deletion bit) can round-trip through `usize` without this
    /// crate-internal type ever appearing in their signatures.
    pub fn from_usize(raw: usize) -> Self {
        Self {
            ptr: raw as *mut T,
        }
    }

    pub fn null() -> Self {
        Self {
            ptr: ptr::null_mut(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.unmarked().is_null()
    }

    pub fn mark(&self) -> usize {
        (self.ptr as usize) & low_bits::<T>()
    }

    pub fn unmarked(&self) -> *mut T {
        ((self.ptr as usize) & !low_bits::<T>()) as *mut T
    }

    pub fn with_mark(&self, mark: usize) -> Self {
        Self::new(with_mark(self.ptr, mark))
    }

    pub fn set_ptr(&mut self, ptr: *mut T) {
        self.ptr = with_mark(ptr, self.mark());
    }

    pub fn set_mark(&mut self, mark: usize) {
        self.ptr = with_mark(self.ptr, mark);
    }

    /// # Safety
    /// The unmarked pointer must reference a live, validly aligned `T`.
    pub unsafe fn deref<'g>(&self) -> &'g T {
        &*self.unmarked()
    }

    /// # Safety
    /// The unmarked pointer must reference a live, validly aligned `T`.
    pub unsafe fn deref_mut<'g>(&mut self) -> &'g mut T {
        &mut *self.unmarked()
    }

    pub fn as_usize(&self) -> usize {
        self.ptr as usize
    }
}

/// Returns a bitmask containing the unused least-significant bits of an
/// aligned pointer to `T`.
#[inline]
const fn low_bits<T>() -> usize {
    (1 << mem::align_of::<T>().trailing_zeros()) - 1
}

/// Returns `ptr` with its low bits replaced by `mark`.
#[inline]
fn with_mark<T>(ptr: *mut T, mark: usize) -> *mut T {
    ((ptr as usize & !low_bits::<T>()) | (mark & low_bits::<T>())) as *mut T
}

pub(crate) type MarkedCntObjPtr<T> = MarkedPtr<CountedObject<T>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sticky_counter_basic_increment_decrement() {
        let c = StickyCounter::new();
        assert_eq!(c.load(Ordering::SeqCst), 1);
        assert!(c.increment(1, Ordering::SeqCst));
        assert_eq!(c.load(Ordering::SeqCst), 2);
        assert!(!c.decrement(1, Ordering::SeqCst));
        assert_eq!(c.load(Ordering::SeqCst), 1);
        assert!(c.decrement(1, Ordering::SeqCst));
        assert_eq!(c.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn sticky_counter_refuses_increment_from_zero() {
        let c = StickyCounter::new();
        assert!(c.decrement(1, Ordering::SeqCst));
        assert!(!c.increment(1, Ordering::SeqCst));
        assert_eq!(c.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn sticky_counter_from_nonzero() {
        let c = StickyCounter::from(5);
        assert_eq!(c.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn sticky_counter_from_zero_is_already_stuck() {
        let c = StickyCounter::from(0);
        assert_eq!(c.load(Ordering::SeqCst), 0);
        assert!(!c.increment(1, Ordering::SeqCst));
    }

    #[test]
    fn marked_ptr_round_trips_mark_bits() {
        let x: Box<u64> = Box::new(42);
        let raw = Box::into_raw(x);
        let mut m = MarkedPtr::new(raw);
        assert_eq!(m.mark(), 0);
        m.set_mark(1);
        assert_eq!(m.mark(), 1);
        assert_eq!(m.unmarked(), raw);
        unsafe {
            assert_eq!(*m.deref(), 42);
        }
        unsafe { drop(Box::from_raw(raw)) };
    }

    #[test]
    fn marked_ptr_null_is_null_regardless_of_mark() {
        let m: MarkedPtr<u64> = MarkedPtr::null();
        assert!(m.is_null());
        assert_eq!(m.mark(), 0);
    }

    #[test]
    fn counted_object_destroys_immediately_with_no_weak_refs_outstanding() {
        use std::sync::atomic::AtomicUsize;
        static DROPS: AtomicUsize = AtomicUsize::new(0);
        struct D;
        impl Drop for D {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }
        let mut obj = CountedObject::new(D);
        // No weak pointer was ever taken out, so the last strong release
        // disposes the payload right away instead of deferring through the
        // SMR back end.
        match obj.release_refs(1) {
            EjectAction::Destroy => {}
            _ => panic!("expected Destroy"),
        }
        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn counted_object_keeps_block_alive_while_weak_outstanding() {
        let mut obj = CountedObject::new(7_u32);
        assert!(obj.add_weak_refs(1));
        match obj.release_refs(1) {
            EjectAction::Delay => {}
            _ => panic!("expected Delay"),
        }
        unsafe { obj.dispose() };
        // The implicit "strong" weak unit plus the real weak reference
        // means the block only frees once both are released.
        assert!(!obj.release_weak_refs(1));
        assert!(obj.release_weak_refs(1));
    }
}
