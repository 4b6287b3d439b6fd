//! An unbounded, multi-producer/multi-consumer FIFO queue.
//!
//! This is the global overflow queue shared by every dispatch variant: the
//! sole queue for the single-global-queue variant, and the landing zone for
//! producer-side submissions in the work-stealing variant. It is a
//! Michael-Scott queue: a singly linked list of single-item nodes with
//! CAS-updated head and tail pointers, reclaimed through `crossbeam-epoch`
//! so a thread that has just unlinked a node can defer freeing it until no
//! other thread can still be dereferencing it.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_epoch::{self as epoch, Atomic, Owned, Shared};
use crossbeam_utils::Backoff;

struct Node<T> {
    /// Populated for every node except the sentinel currently at `head`.
    data: UnsafeCell<MaybeUninit<T>>,
    next: Atomic<Node<T>>,
}

/// An unbounded multi-producer/multi-consumer FIFO queue.
///
/// `enqueue` and `try_dequeue` are linearizable with respect to each other.
/// `try_dequeue` may spuriously observe an empty queue mid-enqueue and
/// return `None` even though a concurrent push is in flight; callers that
/// need to distinguish "truly empty" from "momentarily unreachable" should
/// retry after re-checking [`GlobalQueue::is_empty`].
pub struct GlobalQueue<T> {
    head: Atomic<Node<T>>,
    tail: Atomic<Node<T>>,
    len: AtomicUsize,
}

impl<T> GlobalQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        let guard = epoch::pin();
        let sentinel = Owned::new(Node {
            data: UnsafeCell::new(MaybeUninit::uninit()),
            next: Atomic::null(),
        })
        .into_shared(&guard);
        GlobalQueue {
            head: Atomic::from(sentinel),
            tail: Atomic::from(sentinel),
            len: AtomicUsize::new(0),
        }
    }

    /// Pushes a value onto the tail of the queue.
    pub fn enqueue(&self, value: T) {
        let guard = &epoch::pin();
        let new_node = Owned::new(Node {
            data: UnsafeCell::new(MaybeUninit::new(value)),
            next: Atomic::null(),
        });
        let new_node = new_node.into_shared(guard);

        let backoff = Backoff::new();
        loop {
            let tail = self.tail.load(Ordering::Acquire, guard);
            let tail_ref = unsafe { tail.deref() };
            let next = tail_ref.next.load(Ordering::Acquire, guard);

            if next.is_null() {
                match tail_ref.next.compare_exchange(
                    Shared::null(),
                    new_node,
                    Ordering::Release,
                    Ordering::Relaxed,
                    guard,
                ) {
                    Ok(_) => {
                        // Best-effort: swing the tail forward. If this
                        // fails another thread has already done it for us.
                        let _ = self.tail.compare_exchange(
                            tail,
                            new_node,
                            Ordering::Release,
                            Ordering::Relaxed,
                            guard,
                        );
                        self.len.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    Err(_) => backoff.spin(),
                }
            } else {
                // Tail lagged behind; help it catch up before retrying.
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                    guard,
                );
                backoff.spin();
            }
        }
    }

    /// Attempts to pop a value from the head of the queue.
    ///
    /// Returns `None` if the queue is empty. See the type-level docs for the
    /// spurious-failure caveat under concurrent enqueues.
    pub fn try_dequeue(&self) -> Option<T> {
        let guard = &epoch::pin();
        let backoff = Backoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire, guard);
            let head_ref = unsafe { head.deref() };
            let next = head_ref.next.load(Ordering::Acquire, guard);

            match unsafe { next.as_ref() } {
                None => return None,
                Some(next_ref) => {
                    if self
                        .head
                        .compare_exchange(
                            head,
                            next,
                            Ordering::Release,
                            Ordering::Relaxed,
                            guard,
                        )
                        .is_ok()
                    {
                        let value = unsafe { (*next_ref.data.get()).assume_init_read() };
                        unsafe { guard.defer_destroy(head) };
                        self.len.fetch_sub(1, Ordering::Relaxed);
                        return Some(value);
                    }
                    backoff.spin();
                }
            }
        }
    }

    /// An approximate count of items currently reachable in the queue.
    ///
    /// This is eventually consistent: it can be stale by the time the
    /// caller observes it, which is acceptable for the backlog heuristics
    /// that consult it (§4.8 of the design).
    pub fn approximate_count(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.approximate_count() == 0
    }
}

impl<T> Default for GlobalQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for GlobalQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalQueue")
            .field("len", &self.approximate_count())
            .finish()
    }
}

unsafe impl<T: Send> Send for GlobalQueue<T> {}
unsafe impl<T: Send> Sync for GlobalQueue<T> {}

impl<T> Drop for GlobalQueue<T> {
    fn drop(&mut self) {
        unsafe {
            let guard = epoch::unprotected();
            let mut node = self.head.load(Ordering::Relaxed, guard);
            let mut first = true;
            while !node.is_null() {
                let owned = node.into_owned();
                let next = owned.next.load(Ordering::Relaxed, guard);
                if first {
                    // The sentinel's `data` was never initialized.
                    first = false;
                } else {
                    let mut owned = owned;
                    owned.data.get_mut().assume_init_drop();
                }
                node = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_single_thread() {
        let q = GlobalQueue::new();
        for i in 0..10 {
            q.enqueue(i);
        }
        for i in 0..10 {
            assert_eq!(q.try_dequeue(), Some(i));
        }
        assert_eq!(q.try_dequeue(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn approximate_count_tracks_pushes_and_pops() {
        let q = GlobalQueue::new();
        assert_eq!(q.approximate_count(), 0);
        q.enqueue(1);
        q.enqueue(2);
        assert_eq!(q.approximate_count(), 2);
        q.try_dequeue();
        assert_eq!(q.approximate_count(), 1);
    }

    #[test]
    fn concurrent_producers_preserve_total_count() {
        let q = Arc::new(GlobalQueue::new());
        let producers = 8;
        let per_producer = 500;
        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let q = q.clone();
                thread::spawn(move || {
                    for i in 0..per_producer {
                        q.enqueue(p * per_producer + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut seen = Vec::new();
        while let Some(v) = q.try_dequeue() {
            seen.push(v);
        }
        seen.sort_unstable();
        let expected: Vec<_> = (0..producers * per_producer).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn per_producer_order_is_preserved() {
        let q = Arc::new(GlobalQueue::new());
        let q1 = q.clone();
        let t1 = thread::spawn(move || {
            for i in 0..1000 {
                q1.enqueue(("a", i));
            }
        });
        let q2 = q.clone();
        let t2 = thread::spawn(move || {
            for i in 0..1000 {
                q2.enqueue(("b", i));
            }
        });
        t1.join().unwrap();
        t2.join().unwrap();

        let mut last_a = -1i64;
        let mut last_b = -1i64;
        while let Some((who, i)) = q.try_dequeue() {
            let i = i as i64;
            match who {
                "a" => {
                    assert!(i > last_a);
                    last_a = i;
                }
                "b" => {
                    assert!(i > last_b);
                    last_b = i;
                }
                _ => unreachable!(),
            }
        }
        assert_eq!(last_a, 999);
        assert_eq!(last_b, 999);
    }
}
