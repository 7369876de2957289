//! Michael-Scott style lock-free queue built on the atomic strong/snapshot
//! pointers: every enqueue/dequeue goes through `AtomicRc::compare_exchange`
//! and `load_snapshot`, so this exercises the pointer API under the kind of
//! producer/consumer workload it is meant to support, including the
//! helping behaviour (a thread that sees a lagging tail swings it forward
//! on behalf of whoever is still mid-enqueue).

use cdrc::{make_rc, AcquireRetire, AtomicRc, GuardHP, LocalPtr};
use std::sync::Mutex;

struct Node<T> {
    value: Mutex<Option<T>>,
    next: AtomicRc<Node<T>>,
}

struct Queue<T> {
    head: AtomicRc<Node<T>>,
    tail: AtomicRc<Node<T>>,
}

impl<T: Clone> Queue<T> {
    fn new(guard: &GuardHP) -> Self {
        let sentinel = make_rc(
            guard,
            Node {
                value: Mutex::new(None),
                next: AtomicRc::null(),
            },
        )
        .unwrap();
        let head = AtomicRc::from_rc(sentinel.clone(guard));
        let tail = AtomicRc::from_rc(sentinel);
        Self { head, tail }
    }

    fn enqueue(&self, val: T, guard: &GuardHP) {
        let new_node = make_rc(
            guard,
            Node {
                value: Mutex::new(Some(val)),
                next: AtomicRc::null(),
            },
        )
        .unwrap();
        loop {
            let tail_snap = self.tail.load_snapshot(guard);
            let tail_next = unsafe { tail_snap.deref() }.next.load_snapshot(guard);
            if tail_next.is_null() {
                match unsafe { tail_snap.deref() }
                    .next
                    .compare_exchange(guard, &tail_next, new_node.clone(guard))
                {
                    Ok(_) => {
                        let _ = self.tail.compare_exchange(guard, &tail_snap, new_node);
                        return;
                    }
                    Err(_) => continue,
                }
            } else {
                // Tail is lagging one node behind; help swing it forward.
                let _ = self.tail.compare_exchange(guard, &tail_snap, tail_next.as_rc());
            }
        }
    }

    fn dequeue(&self, guard: &GuardHP) -> Option<T> {
        loop {
            let head_snap = self.head.load_snapshot(guard);
            let tail_snap = self.tail.load_snapshot(guard);
            let head_next = unsafe { head_snap.deref() }.next.load_snapshot(guard);

            if head_snap.as_usize() == tail_snap.as_usize() {
                if head_next.is_null() {
                    return None;
                }
                let _ = self.tail.compare_exchange(guard, &tail_snap, head_next.clone(guard).as_rc());
                continue;
            }

            if head_next.is_null() {
                // Racing with an enqueue that has linked but not yet
                // swung tail; retry.
                continue;
            }

            // Read non-destructively: only the thread that wins the head
            // swing below gets to act on this value. Losers discard theirs
            // and retry from the (by then advanced) head.
            let value = unsafe { head_next.deref() }.value.lock().unwrap().clone();
            match self.head.compare_exchange(guard, &head_snap, head_next.clone(guard).as_rc()) {
                Ok(_) => return value,
                Err(_) => continue,
            }
        }
    }
}

impl<T> Drop for Queue<T> {
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
fn sequential_fifo_order() {
    let guard = GuardHP::handle();
    let queue: Queue<i32> = Queue::new(&guard);

    assert_eq!(queue.dequeue(&guard), None);
    for v in 0..10 {
        queue.enqueue(v, &guard);
    }
    for v in 0..10 {
        assert_eq!(queue.dequeue(&guard), Some(v));
    }
    assert_eq!(queue.dequeue(&guard), None);
}

#[test]
fn concurrent_producers_and_consumers_preserve_every_item() {
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: usize = 2000;

    let guard = GuardHP::handle();
    let queue: Queue<u64> = Queue::new(&guard);
    let consumed: Mutex<Vec<u64>> = Mutex::new(Vec::with_capacity(PRODUCERS * PER_PRODUCER));

    let queue_ref = &queue;
    let consumed_ref = &consumed;
    crossbeam_utils::thread::scope(|scope| {
        for p in 0..PRODUCERS {
            scope.spawn(move |_| {
                let guard = GuardHP::handle();
                let base = (p * PER_PRODUCER) as u64;
                for i in 0..PER_PRODUCER as u64 {
                    queue_ref.enqueue(base + i, &guard);
                }
            });
        }
        for _ in 0..CONSUMERS {
            scope.spawn(move |_| {
                let guard = GuardHP::handle();
                loop {
                    match queue_ref.dequeue(&guard) {
                        Some(v) => consumed_ref.lock().unwrap().push(v),
                        None => {
                            if consumed_ref.lock().unwrap().len() >= PRODUCERS * PER_PRODUCER {
                                return;
                            }
                            std::thread::yield_now();
                        }
                    }
                }
            });
        }
    })
    .unwrap();

    let mut got = consumed.into_inner().unwrap();
    got.sort_unstable();
    let expected: Vec<u64> = (0..(PRODUCERS * PER_PRODUCER) as u64).collect();
    assert_eq!(got, expected);
}
