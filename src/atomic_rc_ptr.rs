use crate::error::CdrcError;
use crate::internal::smr_common::{AcquireRetire, AcquiredPtr};
use crate::internal::utils::{CountedObject, MarkedCntObjPtr};
use crate::local_ptr::LocalPtr;
use crate::rc_ptr::RcPtr;
use crate::snapshot_ptr::SnapshotPtr;
use atomic::{Atomic, Ordering};
use static_assertions::const_assert;
use std::alloc::Layout;

const_assert!(Atomic::<usize>::is_lock_free());

/// A shared, atomically updatable strong reference, analogous to
/// `std::sync::atomic::AtomicPtr` but refcounted and reclamation-safe:
/// every thread may concurrently `load`, `load_snapshot`, `store`, `swap`
/// or `compare_exchange` the pointee without external synchronization.
pub struct AtomicRcPtr<T, G: AcquireRetire> {
    link: Atomic<MarkedCntObjPtr<T>>,
    _marker: std::marker::PhantomData<G>,
}

// `Atomic<MarkedCntObjPtr<T>>` is Send+Sync whenever `T` is, independent of
// whether `T` itself is Sync: the counted object's synchronization is
// entirely handled through the atomic link and the SMR back end.
unsafe impl<T: Send + Sync, G: AcquireRetire> Send for AtomicRcPtr<T, G> {}
unsafe impl<T: Send + Sync, G: AcquireRetire> Sync for AtomicRcPtr<T, G> {}

impl<T, G: AcquireRetire> AtomicRcPtr<T, G> {
    pub fn null() -> Self {
        Self {
            link: Atomic::new(MarkedCntObjPtr::null()),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn new(val: T) -> Result<Self, CdrcError> {
        let layout = Layout::new::<CountedObject<T>>();
        let raw = unsafe { std::alloc::alloc(layout) } as *mut CountedObject<T>;
        if raw.is_null() {
            return Err(CdrcError::AllocationFailed);
        }
        unsafe { raw.write(CountedObject::new(val)) };
        Ok(Self {
            link: Atomic::new(MarkedCntObjPtr::new(raw)),
            _marker: std::marker::PhantomData,
        })
    }

    /// Builds an `AtomicRcPtr` that takes over ownership of `rc`'s strong
    /// reference (no increment).
    pub fn from_rc(rc: RcPtr<'_, T, G>) -> Self {
        let ptr = rc.release();
        Self {
            link: Atomic::new(ptr),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn store_null(&self, guard: &G) {
        let old = self.link.swap(MarkedCntObjPtr::null(), Ordering::AcqRel);
        if !old.is_null() {
            guard.decrement_ref_cnt(old);
        }
    }

    /// Stores an owned strong reference, taking ownership of it (no
    /// increment), and releases whatever was previously linked.
    pub fn store(&self, guard: &G, new: RcPtr<'_, T, G>) {
        let new_ptr = new.release();
        let old = self.link.swap(new_ptr, Ordering::AcqRel);
        if !old.is_null() {
            guard.decrement_ref_cnt(old);
        }
    }

    /// Like [`AtomicRcPtr::store`], but increments `new`'s protected object
    /// rather than consuming an owned reference to it.
    pub fn store_snapshot(&self, guard: &G, new: &SnapshotPtr<'_, T, G>) {
        let new_ptr = new.as_counted_ptr();
        if !new_ptr.is_null() {
            let incremented = guard.increment_ref_cnt(&new_ptr);
            debug_assert!(incremented, "cdrc: stored an already-expired snapshot");
        }
        let old = self.link.swap(new_ptr, Ordering::AcqRel);
        if !old.is_null() {
            guard.decrement_ref_cnt(old);
        }
    }

    /// Loads the current value as an owned strong reference.
    pub fn load<'g>(&self, guard: &'g G) -> RcPtr<'g, T, G> {
        let acquired = guard.acquire(&self.link);
        RcPtr::new_with_incr(acquired.as_counted_ptr(), guard)
    }

    /// Loads the current value as a guard-scoped snapshot, without
    /// incrementing the strong count.
    pub fn load_snapshot<'g>(&self, guard: &'g G) -> SnapshotPtr<'g, T, G> {
        let acquired = guard.protect_snapshot(&self.link);
        SnapshotPtr::new(acquired, guard)
    }

    /// Unconditionally replaces the current value, returning the previous
    /// one as an owned strong reference.
    pub fn swap<'g>(&self, guard: &'g G, new: RcPtr<'_, T, G>) -> RcPtr<'g, T, G> {
        let new_ptr = new.release();
        let old = self.link.swap(new_ptr, Ordering::AcqRel);
        unsafe { RcPtr::new_without_incr(old, guard) }
    }

    /// Replaces the current value with `new` iff it is still `current`,
    /// consuming `new` on success and returning the previous value as an
    /// owned strong reference. On failure, `new` is dropped and the current
    /// cell value is handed back as a protected snapshot rather than as the
    /// caller's own rejected `new`, so a failed caller always sees a live
    /// view of what the cell actually holds instead of stale input.
    pub fn compare_exchange<'g, P>(
        &self,
        guard: &'g G,
        current: &P,
        new: RcPtr<'g, T, G>,
    ) -> Result<RcPtr<'g, T, G>, SnapshotPtr<'g, T, G>>
    where
        P: LocalPtr<'g, T, G>,
    {
        let expected = current.as_counted_ptr();
        let new_ptr = new.as_counted_ptr();
        match self
            .link
            .compare_exchange(expected, new_ptr, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(old) => {
                // `new`'s reference has now been transferred into the link.
                std::mem::forget(new);
                Ok(unsafe { RcPtr::new_without_incr(old, guard) })
            }
            Err(_) => {
                drop(new);
                Err(self.load_snapshot(guard))
            }
        }
    }

    /// Replaces the mark bits of the current value with `mark`, leaving
    /// the pointee and its reference counts untouched, iff the current
    /// value (pointer and mark) still equals `current` (obtained from
    /// [`LocalPtr::as_usize`] on whatever handle the caller last read).
    /// Returns the previous encoded value either way, so a failed caller
    /// can re-check what actually changed without a second load.
    pub fn compare_and_set_mark(&self, current: usize, mark: usize) -> Result<usize, usize> {
        let current_ptr = MarkedCntObjPtr::<T>::from_usize(current);
        let desired = current_ptr.with_mark(mark);
        self.link
            .compare_exchange(current_ptr, desired, Ordering::AcqRel, Ordering::Acquire)
            .map(|p| p.as_usize())
            .map_err(|p| p.as_usize())
    }

    /// Extracts the mark bits from an encoded value previously obtained
    /// from [`LocalPtr::as_usize`], [`AtomicRcPtr::compare_and_set_mark`]
    /// or [`AtomicRcPtr::fetch_or_mark`].
    pub fn mark_of(raw: usize) -> usize {
        MarkedCntObjPtr::<T>::from_usize(raw).mark()
    }

    /// Strips the mark bits from an encoded value, returning the plain
    /// pointer value (as `usize`, for comparison against other handles'
    /// [`LocalPtr::unmarked`]).
    pub fn unmarked_of(raw: usize) -> usize {
        MarkedCntObjPtr::<T>::from_usize(raw).unmarked() as usize
    }

    /// Whether this cell's atomic operations are lock-free on this
    /// platform. A `const_assert!` at module scope already guarantees this
    /// at compile time, so the method always returns `true`; it exists so
    /// callers don't have to rely on that assertion holding to know it.
    pub fn is_lock_free(&self) -> bool {
        Atomic::<MarkedCntObjPtr<T>>::is_lock_free()
    }

    /// Atomically ORs `mark` into the low bits of the current value,
    /// returning the previous encoded value. Used to set a
    /// logical-deletion bit on a node in a marked-pointer data structure
    /// without disturbing whichever pointer is stored underneath it.
    pub fn fetch_or_mark(&self, mark: usize, order: Ordering) -> usize {
        let mut current = self.link.load(Ordering::Relaxed);
        loop {
            let desired = current.with_mark(current.mark() | mark);
            match self
                .link
                .compare_exchange_weak(current, desired, order, Ordering::Relaxed)
            {
                Ok(prev) => return prev.as_usize(),
                Err(actual) => current = actual,
            }
        }
    }
}

impl<T, G: AcquireRetire> Drop for AtomicRcPtr<T, G> {
    fn drop(&mut self) {
        let ptr = self.link.load(Ordering::Relaxed);
        if !ptr.is_null() {
            let guard = G::handle();
            guard.decrement_ref_cnt(ptr);
        }
    }
}

impl<T, G: AcquireRetire> Default for AtomicRcPtr<T, G> {
    fn default() -> Self {
        Self::null()
    }
}
