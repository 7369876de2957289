//! Lock-free, concurrently accessible smart pointers built on a pluggable
//! safe-memory-reclamation back end.
//!
//! [`AtomicRcPtr<T, G>`] plays the role of `Arc<T>` wrapped in an atomic
//! cell: it can be loaded, stored, swapped and compare-exchanged by any
//! number of threads at once, and its [`AtomicRcPtr::load_snapshot`] method
//! hands back a [`SnapshotPtr`] that protects the pointee without paying
//! for a reference-count increment on every read. [`WeakPtr`] and
//! [`AtomicWeakPtr`] mirror [`std::sync::Weak`] in the same style.
//!
//! Every pointer type is generic over `G: AcquireRetire`, the trait that
//! abstracts over the reclamation strategy. Two back ends ship here: the
//! default [`GuardHP`], a hazard-pointer-style announcement array, and
//! [`GuardEBR`], an epoch-based alternative — pick one per pointer type by
//! naming it as the second type parameter, or use the `GuardHP`-flavored
//! aliases ([`AtomicRc`], [`Rc`], [`Snapshot`], [`Weak`], [`AtomicWeak`],
//! [`WeakSnapshot`]) or their `EBR`-suffixed counterparts.

mod atomic_rc_ptr;
mod atomic_weak_ptr;
mod error;
pub(crate) mod internal;
mod local_ptr;
mod rc_ptr;
mod snapshot_ptr;
mod weak_ptr;
mod weak_snapshot_ptr;

pub use atomic_rc_ptr::AtomicRcPtr;
pub use atomic_weak_ptr::AtomicWeakPtr;
pub use error::CdrcError;
pub use internal::{AcquiredPtr, AcquireRetire, GuardEBR, GuardHP, RetireType};
pub use local_ptr::LocalPtr;
pub use rc_ptr::{make_rc, RcPtr};
pub use snapshot_ptr::SnapshotPtr;
pub use weak_ptr::WeakPtr;
pub use weak_snapshot_ptr::WeakSnapshotPtr;

/// `AtomicRcPtr` using the default hazard-pointer-style back end.
pub type AtomicRc<T> = AtomicRcPtr<T, GuardHP>;
/// `RcPtr` using the default hazard-pointer-style back end.
pub type Rc<'g, T> = RcPtr<'g, T, GuardHP>;
/// `SnapshotPtr` using the default hazard-pointer-style back end.
pub type Snapshot<'g, T> = SnapshotPtr<'g, T, GuardHP>;
/// `WeakPtr` using the default hazard-pointer-style back end.
pub type Weak<T> = WeakPtr<T, GuardHP>;
/// `AtomicWeakPtr` using the default hazard-pointer-style back end.
pub type AtomicWeak<T> = AtomicWeakPtr<T, GuardHP>;
/// `WeakSnapshotPtr` using the default hazard-pointer-style back end.
pub type WeakSnapshot<'g, T> = WeakSnapshotPtr<'g, T, GuardHP>;

/// `AtomicRcPtr` using the epoch-based back end.
pub type AtomicRcEBR<T> = AtomicRcPtr<T, GuardEBR>;
/// `RcPtr` using the epoch-based back end.
pub type RcEBR<'g, T> = RcPtr<'g, T, GuardEBR>;
/// `SnapshotPtr` using the epoch-based back end.
pub type SnapshotEBR<'g, T> = SnapshotPtr<'g, T, GuardEBR>;
/// `WeakPtr` using the epoch-based back end.
pub type WeakEBR<T> = WeakPtr<T, GuardEBR>;
/// `AtomicWeakPtr` using the epoch-based back end.
pub type AtomicWeakEBR<T> = AtomicWeakPtr<T, GuardEBR>;
/// `WeakSnapshotPtr` using the epoch-based back end.
pub type WeakSnapshotEBR<'g, T> = WeakSnapshotPtr<'g, T, GuardEBR>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_rc_round_trips_through_a_load() {
        let guard = GuardHP::handle();
        let rc = make_rc(&guard, 42_i32).unwrap();
        assert_eq!(*unsafe { rc.deref() }, 42);
        assert_eq!(rc.use_count(), 1);
    }

    #[test]
    fn atomic_rc_ptr_store_and_load_round_trip() {
        let guard = GuardHP::handle();
        let atomic = AtomicRc::new(1_i32).unwrap();
        let loaded = atomic.load(&guard);
        assert_eq!(*unsafe { loaded.deref() }, 1);
        drop(loaded);

        let new_rc = make_rc(&guard, 2_i32).unwrap();
        atomic.store(&guard, new_rc);
        let loaded = atomic.load(&guard);
        assert_eq!(*unsafe { loaded.deref() }, 2);
    }

    #[test]
    fn atomic_rc_ptr_compare_exchange_success_and_failure() {
        let guard = GuardHP::handle();
        let atomic = AtomicRc::new(10_i32).unwrap();
        let current = atomic.load(&guard);
        let new_rc = make_rc(&guard, 20_i32).unwrap();
        let old = atomic
            .compare_exchange(&guard, &current, new_rc)
            .expect("current value should still match");
        assert_eq!(*unsafe { old.deref() }, 10);

        let stale = current;
        let rejected = make_rc(&guard, 30_i32).unwrap();
        let result = atomic.compare_exchange(&guard, &stale, rejected);
        assert!(result.is_err());
    }

    #[test]
    fn snapshot_does_not_increment_strong_count() {
        let guard = GuardHP::handle();
        let atomic = AtomicRc::new(7_i32).unwrap();
        let rc = atomic.load(&guard);
        assert_eq!(rc.use_count(), 1);
        let snap = atomic.load_snapshot(&guard);
        assert_eq!(rc.use_count(), 1);
        assert_eq!(*unsafe { snap.deref() }, 7);
    }

    #[test]
    fn weak_upgrade_fails_after_all_strong_refs_drop() {
        let guard = GuardHP::handle();
        let atomic = AtomicRc::new(99_i32).unwrap();
        let rc = atomic.load(&guard);
        let weak = Weak::from_strong(&rc);
        assert!(weak.upgrade(&guard).is_some());

        atomic.store_null(&guard);
        drop(rc);

        assert!(weak.upgrade(&guard).is_none());
    }
}
