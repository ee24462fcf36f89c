//! A reader/writer lock that can park a thread, mid-hold, on an external
//! condition variable.
//!
//! `parking_lot::RwLock` doesn't have this — once a reader or writer role is
//! acquired there's no "drop the role, block on something else, retake the
//! role" primitive. The FSS's `lock()` operation needs exactly that: hold the
//! global reader role, wait for a specific file's owner to call `unlock`,
//! then resume with the reader role back in hand. `WaitableRwLock` is built
//! directly on `parking_lot::Mutex`/`Condvar` rather than `std::sync`, the
//! same choice the crate has always made for its locking primitives.
//!
//! Writer-preference: a writer that starts waiting blocks new readers from
//! acquiring (`waiting_writers > 0`), so a steady stream of readers can't
//! starve a writer out indefinitely.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

use parking_lot::{Condvar, Mutex};

struct LockState {
	readers: usize,
	writer: bool,
	waiting_writers: usize,
}

pub struct WaitableRwLock<T> {
	state: Mutex<LockState>,
	state_changed: Condvar,
	data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for WaitableRwLock<T> {}
unsafe impl<T: Send> Sync for WaitableRwLock<T> {}

impl<T> WaitableRwLock<T> {
	pub fn new(data: T) -> WaitableRwLock<T> {
		WaitableRwLock {
			state: Mutex::new(LockState {
				readers: 0,
				writer: false,
				waiting_writers: 0,
			}),
			state_changed: Condvar::new(),
			data: UnsafeCell::new(data),
		}
	}

	/// Acquire the reader role. Blocks while a writer holds or is waiting.
	pub fn read(&self) -> ReadGuard<'_, T> {
		let mut st = self.state.lock();
		while st.writer || st.waiting_writers > 0 {
			self.state_changed.wait(&mut st);
		}
		st.readers += 1;
		drop(st);
		ReadGuard { lock: self }
	}

	/// Acquire the writer role. Blocks while any reader or writer holds.
	pub fn write(&self) -> WriteGuard<'_, T> {
		let mut st = self.state.lock();
		st.waiting_writers += 1;
		while st.writer || st.readers > 0 {
			self.state_changed.wait(&mut st);
		}
		st.waiting_writers -= 1;
		st.writer = true;
		drop(st);
		WriteGuard { lock: self }
	}

	pub fn into_inner(self) -> T { self.data.into_inner() }
}

pub struct ReadGuard<'a, T> {
	lock: &'a WaitableRwLock<T>,
}

impl<'a, T> Deref for ReadGuard<'a, T> {
	type Target = T;
	fn deref(&self) -> &T { unsafe { &*self.lock.data.get() } }
}

impl<'a, T> Drop for ReadGuard<'a, T> {
	fn drop(&mut self) {
		let mut st = self.lock.state.lock();
		st.readers -= 1;
		if st.readers == 0 {
			self.lock.state_changed.notify_all();
		}
	}
}

impl<'a, T> ReadGuard<'a, T> {
	/// Release the reader role, block on `waiter`, then reacquire the reader
	/// role before returning. Atomic with respect to any third thread ever
	/// observing this lock as "held but the role gone" — the role drop and
	/// the wait happen under the same internal mutex acquisition.
	pub fn wait(&mut self, waiter: &Condvar) {
		let mut st = self.lock.state.lock();
		st.readers -= 1;
		if st.readers == 0 {
			self.lock.state_changed.notify_all();
		}
		waiter.wait(&mut st);
		while st.writer || st.waiting_writers > 0 {
			self.lock.state_changed.wait(&mut st);
		}
		st.readers += 1;
	}
}

pub struct WriteGuard<'a, T> {
	lock: &'a WaitableRwLock<T>,
}

impl<'a, T> Deref for WriteGuard<'a, T> {
	type Target = T;
	fn deref(&self) -> &T { unsafe { &*self.lock.data.get() } }
}

impl<'a, T> DerefMut for WriteGuard<'a, T> {
	fn deref_mut(&mut self) -> &mut T { unsafe { &mut *self.lock.data.get() } }
}

impl<'a, T> Drop for WriteGuard<'a, T> {
	fn drop(&mut self) {
		let mut st = self.lock.state.lock();
		st.writer = false;
		self.lock.state_changed.notify_all();
	}
}

impl<'a, T> WriteGuard<'a, T> {
	/// Release the writer role, block on `waiter`, then reacquire the writer
	/// role before returning.
	pub fn wait(&mut self, waiter: &Condvar) {
		let mut st = self.lock.state.lock();
		st.writer = false;
		self.lock.state_changed.notify_all();
		waiter.wait(&mut st);
		st.waiting_writers += 1;
		while st.writer || st.readers > 0 {
			self.lock.state_changed.wait(&mut st);
		}
		st.waiting_writers -= 1;
		st.writer = true;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::thread;
	use std::time::Duration;

	#[test]
	fn readers_share_writer_excludes() {
		let lock = Arc::new(WaitableRwLock::new(0u32));
		let r1 = lock.read();
		let r2 = lock.read();
		assert_eq!(*r1, 0);
		assert_eq!(*r2, 0);
		drop(r1);
		drop(r2);

		let mut w = lock.write();
		*w = 42;
		drop(w);
		assert_eq!(*lock.read(), 42);
	}

	#[test]
	fn writer_excludes_concurrent_writer() {
		let lock = Arc::new(WaitableRwLock::new(0u32));
		let l2 = lock.clone();
		let mut w = lock.write();
		*w = 1;
		let handle = thread::spawn(move || {
			let mut w2 = l2.write();
			*w2 += 1;
		});
		thread::sleep(Duration::from_millis(20));
		*w += 1;
		drop(w);
		handle.join().unwrap();
		assert_eq!(*lock.read(), 3);
	}

	#[test]
	fn wait_releases_and_reacquires_role() {
		let lock = Arc::new(WaitableRwLock::new(false));
		let cond = Arc::new(Condvar::new());
		let l2 = lock.clone();
		let c2 = cond.clone();

		let handle = thread::spawn(move || {
			thread::sleep(Duration::from_millis(20));
			let mut w = l2.write();
			*w = true;
			c2.notify_all();
		});

		let mut w = lock.write();
		while !*w {
			w.wait(&cond);
		}
		assert!(*w);
		drop(w);
		handle.join().unwrap();
	}
}
