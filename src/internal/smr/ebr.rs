//! Epoch-based reclamation back end, offered as a drop-in alternative to
//! [`super::announce::GuardHP`]. Every pointer type in this crate is generic
//! over the `AcquireRetire` back end, so switching from `GuardHP` to
//! `GuardEBR` is purely a type-level choice (e.g. `AtomicRcPtr<T, GuardEBR>`)
//! with no change to call sites.

use super::epoch_tracker::{Epoch, EpochTracker};
use crate::internal::registry;
use crate::internal::smr_common::{
    finalize_decrement_strong, finalize_decrement_weak, finalize_dispose, AcquiredPtr,
    AcquireRetire, RetireType,
};
use crate::internal::utils::MarkedCntObjPtr;
use atomic::{Atomic, Ordering};
use std::cell::{Cell, RefCell};
use std::sync::{Mutex, OnceLock};

const RECLAIM_THRESHOLD_BASE: usize = 30;
const RECLAIM_DELAY: usize = 2;

fn tracker() -> &'static EpochTracker {
    static TRACKER: OnceLock<EpochTracker> = OnceLock::new();
    TRACKER.get_or_init(|| EpochTracker::new(registry::max_threads()))
}

fn threshold() -> usize {
    RECLAIM_THRESHOLD_BASE.max(RECLAIM_DELAY * registry::max_threads())
}

struct Record {
    ptr: usize,
    run: unsafe fn(usize),
    retired_at: Epoch,
}

unsafe impl Send for Record {}

static ORPHANED: Mutex<Vec<Record>> = Mutex::new(Vec::new());

struct RetiredList(RefCell<Vec<Record>>);

impl Drop for RetiredList {
    fn drop(&mut self) {
        let mut v = self.0.borrow_mut();
        if !v.is_empty() {
            ORPHANED.lock().unwrap().append(&mut v);
        }
    }
}

thread_local! {
    static RETIRED: RetiredList = RetiredList(RefCell::new(Vec::new()));
    // See the identical flag in `smr::announce`: prevents `collect` from
    // being re-entered while a deleter it's running retires further objects
    // on this same thread.
    static COLLECT_IN_PROGRESS: Cell<bool> = Cell::new(false);
}

fn collect(tid: usize, retired: &mut Vec<Record>) {
    {
        let mut orphaned = ORPHANED.lock().unwrap();
        if !orphaned.is_empty() {
            retired.append(&mut orphaned);
        }
    }

    tracker().advance_global_epoch();
    let safe_before = tracker().min_announced_epoch();

    let before = retired.len();
    let mut still_pending = Vec::with_capacity(before);
    for rec in retired.drain(..) {
        if rec.retired_at < safe_before {
            unsafe { (rec.run)(rec.ptr) };
        } else {
            still_pending.push(rec);
        }
    }
    log::trace!(
        "cdrc: thread {tid} epoch collection reclaimed {}/{before} retired objects, {} deferred",
        before - still_pending.len(),
        still_pending.len()
    );
    *retired = still_pending;
}

/// An acquired pointer under EBR: since the whole critical section is
/// implicitly protected by the guard, there is nothing to individually
/// release per pointer.
pub struct AcquiredPtrEBR<T>(MarkedCntObjPtr<T>);

impl<T> AcquiredPtr<T> for AcquiredPtrEBR<T> {
    unsafe fn deref_counted_ptr(&self) -> &MarkedCntObjPtr<T> {
        &self.0
    }

    unsafe fn deref_counted_ptr_mut(&mut self) -> &mut MarkedCntObjPtr<T> {
        &mut self.0
    }

    fn as_counted_ptr(&self) -> MarkedCntObjPtr<T> {
        self.0
    }

    fn is_protected(&self) -> bool {
        !self.0.is_null()
    }

    fn clear_protection(&mut self) {
        self.0 = MarkedCntObjPtr::null();
    }

    fn swap(&mut self, new_ptr: MarkedCntObjPtr<T>) -> MarkedCntObjPtr<T> {
        std::mem::replace(&mut self.0, new_ptr)
    }
}

/// Epoch-based reclamation back end. `handle()` enters a critical section
/// for the calling thread; dropping the guard leaves it.
pub struct GuardEBR {
    tid: usize,
}

impl AcquireRetire for GuardEBR {
    type AcquiredPtr<T> = AcquiredPtrEBR<T>;

    fn handle() -> Self {
        let tid = registry::ThreadId::get();
        tracker().begin_critical_section(tid);
        GuardEBR { tid }
    }

    fn acquire<T>(&self, link: &Atomic<MarkedCntObjPtr<T>>) -> Self::AcquiredPtr<T> {
        AcquiredPtrEBR(link.load(Ordering::Acquire))
    }

    fn reserve<T>(&self, ptr: MarkedCntObjPtr<T>) -> Self::AcquiredPtr<T> {
        AcquiredPtrEBR(ptr)
    }

    fn reserve_nothing<T>(&self) -> Self::AcquiredPtr<T> {
        AcquiredPtrEBR(MarkedCntObjPtr::null())
    }

    fn protect_snapshot<T>(&self, link: &Atomic<MarkedCntObjPtr<T>>) -> Self::AcquiredPtr<T> {
        AcquiredPtrEBR(link.load(Ordering::Acquire))
    }

    fn reserve_snapshot<T>(&self, ptr: MarkedCntObjPtr<T>) -> Self::AcquiredPtr<T> {
        AcquiredPtrEBR(ptr)
    }

    fn release<T>(&self, _ptr: Self::AcquiredPtr<T>) {
        // Protection is scoped to the whole critical section; nothing to
        // release per pointer.
    }

    unsafe fn delete_object<T>(&self, ptr: MarkedCntObjPtr<T>) {
        drop(Box::from_raw(ptr.unmarked()));
    }

    unsafe fn retire<T>(&self, ptr: MarkedCntObjPtr<T>, retire_type: RetireType) {
        let run: unsafe fn(usize) = match retire_type {
            RetireType::Dispose => finalize_dispose::<T>,
            RetireType::DecrementStrongCount => finalize_decrement_strong::<T>,
            RetireType::DecrementWeakCount => finalize_decrement_weak::<T>,
        };
        let record = Record {
            ptr: ptr.unmarked() as usize,
            run,
            retired_at: tracker().current_epoch(),
        };
        let should_collect = RETIRED.with(|r| {
            let mut v = r.0.borrow_mut();
            v.push(record);
            let eager = cfg!(debug_assertions) && std::env::var_os("CDRC_EAGER_RECLAIM").is_some();
            v.len() >= threshold() || eager
        });
        if !should_collect || COLLECT_IN_PROGRESS.with(Cell::get) {
            return;
        }
        COLLECT_IN_PROGRESS.with(|f| f.set(true));
        let mut local = RETIRED.with(|r| std::mem::take(&mut *r.0.borrow_mut()));
        collect(self.tid, &mut local);
        RETIRED.with(|r| r.0.borrow_mut().extend(local));
        COLLECT_IN_PROGRESS.with(|f| f.set(false));
    }
}

impl Drop for GuardEBR {
    fn drop(&mut self) {
        tracker().end_critical_section(self.tid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_enters_and_leaves_a_critical_section() {
        let tid = registry::ThreadId::get();
        assert!(!tracker().min_announced_epoch().eq(&Epoch::MAX));
        {
            let _guard = GuardEBR::handle();
            assert!(tracker().min_announced_epoch() <= tracker().current_epoch());
        }
        let _ = tid;
    }
}
