//! A bounded-lifecycle FIFO queue shared between the acceptor and the worker
//! pool (and reused, element type aside, for each file's lock-waiter queue).
//!
//! Generalizes the teacher's `SharedIOContainer`/`FileStateContainer` shape
//! (one `HashMap` behind a single `RwLock`, all access funneled through
//! narrow `*_op` closures) to an ordered FIFO with an explicit open/closed
//! lifecycle and a mutually-exclusive iteration cursor, per §4.2 of the spec.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopOutcome<T> {
	Item(T),
	Empty,
	Closed,
	ClosedAndEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
	Open,
	Closed,
}

struct Inner<T> {
	items: VecDeque<T>,
	state: State,
	iterating: bool,
}

/// FIFO queue with an open/closed lifecycle and a safe iteration-with-removal
/// cursor. At most one iterator may be active at a time; concurrent
/// `push`/`pop` block while one is.
pub struct ConcurrentQueue<T> {
	inner: Mutex<Inner<T>>,
	not_empty_or_closed: Condvar,
	not_iterating: Condvar,
}

impl<T> ConcurrentQueue<T> {
	pub fn new() -> ConcurrentQueue<T> {
		ConcurrentQueue {
			inner: Mutex::new(Inner {
				items: VecDeque::new(),
				state: State::Open,
				iterating: false,
			}),
			not_empty_or_closed: Condvar::new(),
			not_iterating: Condvar::new(),
		}
	}

	/// Appends `x`. Fails (returning `x` back) iff the queue is closed.
	pub fn push(&self, x: T) -> Result<(), T> {
		let mut inner = self.inner.lock();
		while inner.iterating {
			self.not_iterating.wait(&mut inner);
		}
		if inner.state == State::Closed {
			return Err(x);
		}
		inner.items.push_back(x);
		self.not_empty_or_closed.notify_one();
		Ok(())
	}

	/// Pops the head. Blocks while empty and open; wakes with
	/// `ClosedAndEmpty` once the queue is closed and drained.
	pub fn pop_blocking(&self) -> PopOutcome<T> {
		let mut inner = self.inner.lock();
		loop {
			while inner.iterating {
				self.not_iterating.wait(&mut inner);
			}
			if let Some(item) = inner.items.pop_front() {
				return PopOutcome::Item(item);
			}
			if inner.state == State::Closed {
				return PopOutcome::ClosedAndEmpty;
			}
			self.not_empty_or_closed.wait(&mut inner);
		}
	}

	/// Pops the head without blocking.
	pub fn pop_nonblocking(&self) -> PopOutcome<T> {
		let mut inner = self.inner.lock();
		while inner.iterating {
			self.not_iterating.wait(&mut inner);
		}
		if let Some(item) = inner.items.pop_front() {
			return PopOutcome::Item(item);
		}
		if inner.state == State::Closed {
			PopOutcome::Closed
		}
		else {
			PopOutcome::Empty
		}
	}

	pub fn close(&self) {
		let mut inner = self.inner.lock();
		inner.state = State::Closed;
		self.not_empty_or_closed.notify_all();
	}

	pub fn open(&self) {
		let mut inner = self.inner.lock();
		inner.state = State::Open;
		self.not_empty_or_closed.notify_all();
	}

	pub fn is_closed(&self) -> bool { self.inner.lock().state == State::Closed }

	pub fn size(&self) -> usize { self.inner.lock().items.len() }

	/// Drops every element, calling `f` on each (mirrors the teacher's
	/// pattern of taking a free-function for resources the queue doesn't own
	/// the cleanup of).
	pub fn flush<F: FnMut(T)>(&self, mut f: F) {
		let mut inner = self.inner.lock();
		while let Some(item) = inner.items.pop_front() {
			f(item);
		}
	}

	/// Closes the queue and flushes it, calling `f` on each remaining
	/// element.
	pub fn destroy<F: FnMut(T)>(&self, f: F) {
		self.close();
		self.flush(f);
	}

	/// Acquires exclusive iteration rights. Panics if an iterator is already
	/// active (nested iterators are disallowed by construction, not just by
	/// convention).
	pub fn iter_init(&self) -> QueueCursor<'_, T> {
		let mut inner = self.inner.lock();
		assert!(!inner.iterating, "ConcurrentQueue: nested iterator");
		inner.iterating = true;
		drop(inner);
		QueueCursor {
			queue: self,
			position: 0,
		}
	}
}

impl<T> Default for ConcurrentQueue<T> {
	fn default() -> Self { Self::new() }
}

/// A cursor over a `ConcurrentQueue`'s current contents. `push`/`pop` on the
/// queue block for the cursor's lifetime.
pub struct QueueCursor<'a, T> {
	queue: &'a ConcurrentQueue<T>,
	position: usize,
}

impl<'a, T: Clone> QueueCursor<'a, T> {
	/// Returns a copy of the next element without consuming it, or `None` at
	/// the end.
	pub fn next(&mut self) -> Option<T> {
		let inner = self.queue.inner.lock();
		inner.items.get(self.position).cloned()
	}

	/// Advances past the element just returned by `next` without removing
	/// it.
	pub fn advance(&mut self) { self.position += 1; }

	/// Removes the element last returned by `next` (at the cursor's current
	/// position) and returns it to the caller. Does not advance the cursor's
	/// logical position, since the next element shifts into it.
	pub fn iter_remove(&mut self) -> Option<T> {
		let mut inner = self.queue.inner.lock();
		if self.position < inner.items.len() {
			inner.items.remove(self.position)
		}
		else {
			None
		}
	}
}

impl<'a, T> Drop for QueueCursor<'a, T> {
	fn drop(&mut self) {
		let mut inner = self.queue.inner.lock();
		inner.iterating = false;
		self.queue.not_iterating.notify_all();
		self.queue.not_empty_or_closed.notify_all();
	}
}
