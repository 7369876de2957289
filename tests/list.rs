//! Lock-free sorted linked-list set built directly on the marked atomic
//! pointer: disjoint-range concurrent insert/remove across many threads,
//! and a marked compare-and-swap (logical deletion) commuting correctly
//! with a concurrent insertion. The traversal/cleanup technique (mark a
//! removed node's `next` field, physically unlink it on the next pass
//! that notices the mark) is the standard Harris list.

use cdrc::{make_rc, AcquireRetire, AtomicRc, GuardHP, LocalPtr, RcPtr};
use std::cmp::Ordering::{Equal, Greater, Less};

struct Node<K> {
    key: Option<K>,
    next: AtomicRc<Node<K>>,
}

struct List<K> {
    head: AtomicRc<Node<K>>,
}

impl<K: Ord + Clone> List<K> {
    fn new(guard: &GuardHP) -> Self {
        let sentinel = make_rc(
            guard,
            Node {
                key: None,
                next: AtomicRc::null(),
            },
        )
        .unwrap();
        Self {
            head: AtomicRc::from_rc(sentinel),
        }
    }

    /// Returns `(prev, curr, found)`: `curr` is the first unmarked node
    /// with key >= `key`, `prev` is its live predecessor, and `found` is
    /// whether `curr`'s key equals `key`. Marked nodes encountered along
    /// the way are physically unlinked before this returns.
    fn find<'g>(
        &self,
        key: &K,
        guard: &'g GuardHP,
    ) -> (RcPtr<'g, Node<K>, GuardHP>, RcPtr<'g, Node<K>, GuardHP>, bool) {
        'retry: loop {
            let mut prev = self.head.load(guard);
            let mut curr = unsafe { prev.deref() }.next.load(guard);
            loop {
                if curr.is_null() {
                    return (prev, curr, false);
                }
                let curr_next = unsafe { curr.deref() }.next.load(guard);
                if AtomicRc::<Node<K>>::mark_of(curr_next.as_usize()) != 0 {
                    let unmarked_next = curr_next.with_mark(0);
                    match unsafe { prev.deref() }.next.compare_exchange(guard, &curr, unmarked_next) {
                        Ok(_) => {
                            curr = unsafe { prev.deref() }.next.load(guard);
                            continue;
                        }
                        Err(_) => continue 'retry,
                    }
                }
                match unsafe { curr.deref() }.key.as_ref().unwrap().cmp(key) {
                    Less => {
                        prev = curr;
                        curr = curr_next;
                    }
                    Equal => return (prev, curr, true),
                    Greater => return (prev, curr, false),
                }
            }
        }
    }

    fn contains(&self, key: &K, guard: &GuardHP) -> bool {
        self.find(key, guard).2
    }

    fn insert(&self, key: K, guard: &GuardHP) -> bool {
        loop {
            let (prev, curr, found) = self.find(&key, guard);
            if found {
                return false;
            }
            let new_node = make_rc(
                guard,
                Node {
                    key: Some(key.clone()),
                    next: AtomicRc::null(),
                },
            )
            .unwrap();
            unsafe { new_node.deref() }.next.store(guard, curr.clone(guard));
            match unsafe { prev.deref() }.next.compare_exchange(guard, &curr, new_node) {
                Ok(_) => return true,
                Err(_) => continue,
            }
        }
    }

    fn remove(&self, key: &K, guard: &GuardHP) -> bool {
        loop {
            let (prev, curr, found) = self.find(key, guard);
            if !found {
                return false;
            }
            let curr_next = unsafe { curr.deref() }.next.load(guard);
            let marked_next = curr_next.with_mark(1);
            match unsafe { curr.deref() }.next.compare_exchange(guard, &curr_next, marked_next) {
                Ok(_) => {
                    // Best-effort physical unlink; if this loses a race, a
                    // later `find` will notice the mark and clean it up.
                    let _ = unsafe { prev.deref() }
                        .next
                        .compare_exchange(guard, &curr, curr_next.with_mark(0));
                    return true;
                }
                Err(_) => continue,
            }
        }
    }
}

impl<K> Drop for List<K> {
    fn drop(&mut self) {
        let guard = GuardHP::handle();
        let mut curr = self.head.load(&guard);
        while !curr.is_null() {
            let next = unsafe { curr.deref() }.next.load(&guard);
            unsafe { curr.deref() }.next.store_null(&guard);
            curr = next;
        }
    }
}

#[test]
fn sequential_insert_contains_remove() {
    let guard = GuardHP::handle();
    let list: List<i32> = List::new(&guard);

    for k in [5, 1, 9, 3, 7] {
        assert!(list.insert(k, &guard));
    }
    assert!(!list.insert(5, &guard), "duplicate insert must fail");

    for k in [1, 3, 5, 7, 9] {
        assert!(list.contains(&k, &guard));
    }
    assert!(!list.contains(&4, &guard));

    assert!(list.remove(&3, &guard));
    assert!(!list.remove(&3, &guard), "double remove must fail");
    assert!(!list.contains(&3, &guard));
    assert!(list.contains(&1, &guard));
    assert!(list.contains(&9, &guard));
}

#[test]
fn marked_deletion_commutes_with_concurrent_insertion() {
    let guard = GuardHP::handle();
    let list: List<i32> = List::new(&guard);
    list.insert(1, &guard);
    list.insert(3, &guard);

    crossbeam_utils::thread::scope(|scope| {
        scope.spawn(|_| {
            let guard = GuardHP::handle();
            list.remove(&1, &guard);
        });
        scope.spawn(|_| {
            let guard = GuardHP::handle();
            list.insert(2, &guard);
        });
    })
    .unwrap();

    let guard = GuardHP::handle();
    assert!(!list.contains(&1, &guard));
    assert!(list.contains(&2, &guard));
    assert!(list.contains(&3, &guard));
}

#[test]
fn concurrent_disjoint_range_insert_and_remove() {
    const THREADS: i32 = 16;
    const RANGE: i32 = 200;

    let guard = GuardHP::handle();
    let list: List<i32> = List::new(&guard);

    let list = &list;
    crossbeam_utils::thread::scope(|scope| {
        for p in 0..THREADS {
            scope.spawn(move |_| {
                let guard = GuardHP::handle();
                for k in (p * RANGE)..((p + 1) * RANGE) {
                    assert!(list.insert(k, &guard));
                }
                for k in (p * RANGE)..((p + 1) * RANGE) {
                    assert!(list.remove(&k, &guard));
                }
            });
        }
    })
    .unwrap();

    let guard = GuardHP::handle();
    for k in 0..(THREADS * RANGE) {
        assert!(!list.contains(&k, &guard));
    }
    // head -> tail should now hold only the sentinel.
    assert!(unsafe { list.head.load(&guard).deref() }.next.load(&guard).is_null());
}
