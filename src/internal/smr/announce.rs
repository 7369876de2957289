//! Hazard-pointer-style "announcement array" back end: the default SMR
//! engine. Each thread owns one reservation slot and a small fixed array of
//! snapshot slots; readers publish the raw pointer they are about to
//! dereference before touching it, and retirement amortizes a full scan of
//! every thread's slots across a batch of retired objects rather than
//! synchronizing on every single one (see spec §4.2).

use crate::internal::registry;
use crate::internal::smr_common::{
    finalize_decrement_strong, finalize_decrement_weak, finalize_dispose, AcquiredPtr,
    AcquireRetire, RetireType,
};
use crate::internal::utils::MarkedCntObjPtr;
use atomic::{Atomic, Ordering};
use crossbeam_utils::CachePadded;
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::sync::atomic::fence;
use std::sync::{Mutex, OnceLock};

/// Number of snapshot slots each thread carries, matching the original
/// implementation's default.
const SNAPSHOT_SLOTS: usize = 7;
/// Retirement amortization factor: the scan threshold is
/// `max(30, DELAY * num_threads)`.
const DELAY: usize = 1;

struct ThreadSlot {
    announcement: Atomic<usize>,
    snapshot: [Atomic<usize>; SNAPSHOT_SLOTS],
}

impl ThreadSlot {
    fn new() -> Self {
        Self {
            announcement: Atomic::new(0),
            snapshot: std::array::from_fn(|_| Atomic::new(0)),
        }
    }
}

fn slots() -> &'static Vec<CachePadded<ThreadSlot>> {
    static SLOTS: OnceLock<Vec<CachePadded<ThreadSlot>>> = OnceLock::new();
    SLOTS.get_or_init(|| {
        (0..registry::max_threads())
            .map(|_| CachePadded::new(ThreadSlot::new()))
            .collect()
    })
}

fn threshold() -> usize {
    30.max(DELAY * registry::max_threads())
}

struct Record {
    ptr: usize,
    run: unsafe fn(usize),
}

// The function pointer closes over no thread-local state; the raw pointer
// is only ever touched through `run`, which requires the same safety
// invariants regardless of which thread executes it.
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
    static FREE_SNAPSHOT_SLOTS: RefCell<Vec<usize>> = RefCell::new((0..SNAPSHOT_SLOTS).rev().collect());
    // Set for the duration of this thread's own `scan_and_reclaim` call. A
    // deleter run from within the scan can itself retire further objects
    // (e.g. disposing a list node drops its own `next` field); while this
    // flag is set, `retire` only appends to `RETIRED` instead of trying to
    // scan again, so it never re-enters `scan_and_reclaim` while the outer
    // call is mid-iteration.
    static SCAN_IN_PROGRESS: Cell<bool> = Cell::new(false);
}

fn scan_and_reclaim(tid: usize, retired: &mut Vec<Record>) {
    {
        let mut orphaned = ORPHANED.lock().unwrap();
        if !orphaned.is_empty() {
            retired.append(&mut orphaned);
        }
    }

    fence(Ordering::SeqCst);

    let mut announced: FxHashMap<usize, u32> = FxHashMap::default();
    for slot in slots().iter() {
        let a = slot.announcement.load(Ordering::SeqCst);
        if a != 0 {
            *announced.entry(a).or_insert(0) += 1;
        }
        for s in slot.snapshot.iter() {
            let a = s.load(Ordering::SeqCst);
            if a != 0 {
                *announced.entry(a).or_insert(0) += 1;
            }
        }
    }

    let before = retired.len();
    let mut still_pending = Vec::with_capacity(before);
    for rec in retired.drain(..) {
        let survives = match announced.get_mut(&rec.ptr) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        };
        if survives {
            still_pending.push(rec);
        } else {
            unsafe { (rec.run)(rec.ptr) };
        }
    }
    log::trace!(
        "cdrc: thread {tid} scan reclaimed {}/{before} retired objects, {} deferred",
        before - still_pending.len(),
        still_pending.len()
    );
    *retired = still_pending;
}

enum Protection {
    None,
    Reservation,
    Snapshot(usize),
}

/// A pointer protected by the announcement array, either via this thread's
/// single reservation slot or via one of its snapshot slots.
pub struct AcquiredPtrHP<T> {
    ptr: MarkedCntObjPtr<T>,
    protection: Protection,
}

impl<T> AcquiredPtr<T> for AcquiredPtrHP<T> {
    unsafe fn deref_counted_ptr(&self) -> &MarkedCntObjPtr<T> {
        &self.ptr
    }

    unsafe fn deref_counted_ptr_mut(&mut self) -> &mut MarkedCntObjPtr<T> {
        &mut self.ptr
    }

    fn as_counted_ptr(&self) -> MarkedCntObjPtr<T> {
        self.ptr
    }

    fn is_protected(&self) -> bool {
        !matches!(self.protection, Protection::None)
    }

    fn clear_protection(&mut self) {
        let tid = registry::ThreadId::get();
        match self.protection {
            Protection::None => {}
            Protection::Reservation => {
                slots()[tid].announcement.store(0, Ordering::Release);
            }
            Protection::Snapshot(idx) => {
                slots()[tid].snapshot[idx].store(0, Ordering::Release);
                FREE_SNAPSHOT_SLOTS.with(|f| f.borrow_mut().push(idx));
            }
        }
        self.protection = Protection::None;
    }

    fn swap(&mut self, new_ptr: MarkedCntObjPtr<T>) -> MarkedCntObjPtr<T> {
        std::mem::replace(&mut self.ptr, new_ptr)
    }
}

impl<T> Drop for AcquiredPtrHP<T> {
    fn drop(&mut self) {
        self.clear_protection();
    }
}

fn claim_snapshot_slot() -> usize {
    FREE_SNAPSHOT_SLOTS.with(|f| f.borrow_mut().pop()).expect(
        "cdrc: exhausted this thread's snapshot slots; too many nested snapshot pointers are \
         live at once",
    )
}

/// The default safe-memory-reclamation back end: a hazard-pointer-style
/// announcement array with amortized, threshold-triggered reclamation.
pub struct GuardHP;

impl AcquireRetire for GuardHP {
    type AcquiredPtr<T> = AcquiredPtrHP<T>;

    fn handle() -> Self {
        GuardHP
    }

    fn acquire<T>(&self, link: &Atomic<MarkedCntObjPtr<T>>) -> Self::AcquiredPtr<T> {
        let tid = registry::ThreadId::get();
        loop {
            let ptr = link.load(Ordering::Acquire);
            slots()[tid].announcement.store(ptr.as_usize(), Ordering::SeqCst);
            fence(Ordering::SeqCst);
            let observed = link.load(Ordering::Acquire);
            if observed == ptr {
                return AcquiredPtrHP {
                    ptr,
                    protection: Protection::Reservation,
                };
            }
        }
    }

    fn reserve<T>(&self, ptr: MarkedCntObjPtr<T>) -> Self::AcquiredPtr<T> {
        let tid = registry::ThreadId::get();
        slots()[tid].announcement.store(ptr.as_usize(), Ordering::SeqCst);
        fence(Ordering::SeqCst);
        AcquiredPtrHP {
            ptr,
            protection: Protection::Reservation,
        }
    }

    fn reserve_nothing<T>(&self) -> Self::AcquiredPtr<T> {
        AcquiredPtrHP {
            ptr: MarkedCntObjPtr::null(),
            protection: Protection::None,
        }
    }

    fn protect_snapshot<T>(&self, link: &Atomic<MarkedCntObjPtr<T>>) -> Self::AcquiredPtr<T> {
        let tid = registry::ThreadId::get();
        let idx = claim_snapshot_slot();
        loop {
            let ptr = link.load(Ordering::Acquire);
            slots()[tid].snapshot[idx].store(ptr.as_usize(), Ordering::SeqCst);
            fence(Ordering::SeqCst);
            let observed = link.load(Ordering::Acquire);
            if observed == ptr {
                return AcquiredPtrHP {
                    ptr,
                    protection: Protection::Snapshot(idx),
                };
            }
        }
    }

    fn reserve_snapshot<T>(&self, ptr: MarkedCntObjPtr<T>) -> Self::AcquiredPtr<T> {
        let tid = registry::ThreadId::get();
        let idx = claim_snapshot_slot();
        slots()[tid].snapshot[idx].store(ptr.as_usize(), Ordering::SeqCst);
        fence(Ordering::SeqCst);
        AcquiredPtrHP {
            ptr,
            protection: Protection::Snapshot(idx),
        }
    }

    fn release<T>(&self, mut ptr: Self::AcquiredPtr<T>) {
        ptr.clear_protection();
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
        };
        let tid = registry::ThreadId::get();
        let should_scan = RETIRED.with(|r| {
            let mut v = r.0.borrow_mut();
            v.push(record);
            let eager = cfg!(debug_assertions) && std::env::var_os("CDRC_EAGER_RECLAIM").is_some();
            v.len() >= threshold() || eager
        });
        if !should_scan || SCAN_IN_PROGRESS.with(Cell::get) {
            return;
        }
        SCAN_IN_PROGRESS.with(|f| f.set(true));
        // Drain into a local `Vec` before scanning so the `RefCell` isn't
        // held borrowed while `(rec.run)(rec.ptr)` runs below: that call can
        // drop a payload whose fields retire further objects on this same
        // thread, which needs to append to `RETIRED` without re-entering
        // this scan.
        let mut local = RETIRED.with(|r| std::mem::take(&mut *r.0.borrow_mut()));
        scan_and_reclaim(tid, &mut local);
        RETIRED.with(|r| r.0.borrow_mut().extend(local));
        SCAN_IN_PROGRESS.with(|f| f.set(false));
    }
}
