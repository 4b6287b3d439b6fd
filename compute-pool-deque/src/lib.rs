//! Concurrent queueing primitives for a work-stealing compute thread pool.
//!
//! This crate provides the two queue structures a scheduler needs:
//!
//! * [`GlobalQueue`] — an unbounded multi-producer/multi-consumer FIFO,
//!   used as the sole queue of a single-global-queue dispatcher and as the
//!   overflow path of a work-stealing one.
//! * [`Deque`] / [`Stealer`] — a bounded, growable work-stealing deque
//!   owned by a single thread. The owner pushes and pops from the tail
//!   (LIFO); any [`Stealer`] clone may take from the head (FIFO), which is
//!   the classical work-stealing contract.
//!
//! Neither structure is tied to any particular scheduler or task
//! representation; both are generic over the item type and usable on
//! their own.
//!
//! # Example
//!
//! A minimal work-stealing search order:
//!
//! ```
//! use compute_pool_deque::{Deque, GlobalQueue, Steal};
//!
//! fn find_task<T>(local: &Deque<T>, global: &GlobalQueue<T>, peers: &[compute_pool_deque::Stealer<T>]) -> Option<T> {
//!     local.pop().or_else(|| {
//!         global.try_dequeue().or_else(|| {
//!             peers.iter().find_map(|s| s.steal().success())
//!         })
//!     })
//! }
//!
//! let local = Deque::new();
//! let global = GlobalQueue::new();
//! global.enqueue(1);
//! assert_eq!(find_task(&local, &global, &[]), Some(1));
//! ```

#![warn(missing_debug_implementations)]

mod global_queue;
mod stealing_deque;

pub use global_queue::GlobalQueue;
pub use stealing_deque::{Deque, Pusher, Steal, Stealer};
