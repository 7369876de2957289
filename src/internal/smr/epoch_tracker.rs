//! Global and per-thread epoch bookkeeping shared by [`super::ebr::GuardEBR`].

use atomic::{Atomic, Ordering};
use crossbeam_utils::CachePadded;
use std::sync::atomic::{fence, AtomicBool};

pub(crate) type Epoch = u64;
pub(crate) const NO_EPOCH: Epoch = Epoch::MAX;

pub(crate) struct EpochTracker {
    global_epoch: CachePadded<Atomic<Epoch>>,
    local_epoch: Vec<CachePadded<Atomic<Epoch>>>,
    in_critical: Vec<CachePadded<AtomicBool>>,
}

impl EpochTracker {
    pub(crate) fn new(max_threads: usize) -> Self {
        Self {
            global_epoch: CachePadded::new(Atomic::new(0)),
            local_epoch: (0..max_threads)
                .map(|_| CachePadded::new(Atomic::new(NO_EPOCH)))
                .collect(),
            in_critical: (0..max_threads)
                .map(|_| CachePadded::new(AtomicBool::new(false)))
                .collect(),
        }
    }

    pub(crate) fn current_epoch(&self) -> Epoch {
        self.global_epoch.load(Ordering::Acquire)
    }

    pub(crate) fn advance_global_epoch(&self) -> Epoch {
        self.global_epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// The lowest epoch that any thread currently inside a critical section
    /// announced entering at, or the current global epoch if no thread is
    /// inside one. An object retired while the global epoch was `e` is safe
    /// to reclaim once this returns an epoch strictly greater than `e`.
    pub(crate) fn min_announced_epoch(&self) -> Epoch {
        let mut min = self.current_epoch();
        for (i, local) in self.local_epoch.iter().enumerate() {
            if self.in_critical[i].load(Ordering::Acquire) {
                let announced = local.load(Ordering::Acquire);
                if announced < min {
                    min = announced;
                }
            }
        }
        min
    }

    pub(crate) fn begin_critical_section(&self, tid: usize) {
        self.local_epoch[tid].store(self.current_epoch(), Ordering::Relaxed);
        self.in_critical[tid].store(true, Ordering::Release);
        fence(Ordering::SeqCst);
    }

    pub(crate) fn end_critical_section(&self, tid: usize) {
        self.in_critical[tid].store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_announced_epoch_ignores_threads_outside_a_critical_section() {
        let tracker = EpochTracker::new(4);
        tracker.advance_global_epoch();
        tracker.advance_global_epoch();
        assert_eq!(tracker.min_announced_epoch(), tracker.current_epoch());

        tracker.begin_critical_section(1);
        assert_eq!(tracker.min_announced_epoch(), tracker.current_epoch());

        tracker.advance_global_epoch();
        assert_eq!(tracker.min_announced_epoch(), tracker.current_epoch() - 1);

        tracker.end_critical_section(1);
        assert_eq!(tracker.min_announced_epoch(), tracker.current_epoch());
    }
}
