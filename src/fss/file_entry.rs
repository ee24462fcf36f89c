//! `FileEntry`: one stored file's bytes, flags, and lock-waiter queue.
//!
//! Generalizes the teacher's `FileState` (`state/file_state.rs`: a rope plus
//! a `HashSet<ThreadId>` of clients) from "which clients have this file
//! open" to the full per-(client, file) flag set the spec requires
//! (`OPEN`/`OWNER`/`MAY_WRITE`), and adds the FIFO lock-waiter queue (§4.3)
//! the teacher never got to.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::error::{FssError, FssResult};
use crate::queue::{ConcurrentQueue, PopOutcome};

pub type ClientId = i64;

bitflags! {
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct ClientFlags: u8 {
		const OPEN      = 0b001;
		const OWNER     = 0b010;
		const MAY_WRITE = 0b100;
	}
}

bitflags! {
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct GlobalFlags: u8 {
		const VALID = 0b01;
		const DIRTY = 0b10;
	}
}

/// Outcome of a `lock` attempt: either the caller became owner immediately,
/// or must be enqueued as a waiter by the caller (the storage engine, which
/// owns the global bookkeeping `remove()`/eviction need to notify waiters
/// through).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
	Granted,
	Wait,
}

pub struct FileEntry {
	data: Vec<u8>,
	global_flags: GlobalFlags,
	clients: HashMap<ClientId, ClientFlags>,
	waiters: ConcurrentQueue<ClientId>,
}

impl FileEntry {
	/// Constructs a new, empty entry. `lock = true` atomically grants the
	/// creator `OWNER | MAY_WRITE`.
	pub fn new(creator: ClientId, lock: bool) -> FileEntry {
		let mut clients = HashMap::new();
		let mut flags = ClientFlags::OPEN;
		if lock {
			flags |= ClientFlags::OWNER | ClientFlags::MAY_WRITE;
		}
		clients.insert(creator, flags);
		FileEntry {
			data: Vec::new(),
			global_flags: GlobalFlags::VALID,
			clients,
			waiters: ConcurrentQueue::new(),
		}
	}

	pub fn size(&self) -> usize { self.data.len() }

	pub fn is_dirty(&self) -> bool { self.global_flags.contains(GlobalFlags::DIRTY) }

	pub fn owner(&self) -> Option<ClientId> {
		self.clients
			.iter()
			.find(|(_, flags)| flags.contains(ClientFlags::OWNER))
			.map(|(&id, _)| id)
	}

	fn flags_of(&self, client: ClientId) -> ClientFlags {
		self.clients.get(&client).copied().unwrap_or(ClientFlags::empty())
	}

	pub fn is_open(&self, client: ClientId) -> bool {
		self.flags_of(client).contains(ClientFlags::OPEN)
	}

	/// [writer] Opens the file for `client`. `EBADF` if already open;
	/// `EBUSY` if `lock` is requested but another client owns the file.
	pub fn open(&mut self, client: ClientId, lock: bool) -> FssResult<()> {
		let existing = self.flags_of(client);
		if existing.contains(ClientFlags::OPEN) {
			return Err(FssError::BadFd);
		}
		if lock {
			if let Some(owner) = self.owner() {
				if owner != client {
					return Err(FssError::Busy);
				}
			}
		}
		let mut flags = existing | ClientFlags::OPEN;
		if lock {
			flags |= ClientFlags::OWNER;
		}
		self.clients.insert(client, flags);
		Ok(())
	}

	/// [writer] Clears `OPEN`/`MAY_WRITE` for `client`. `OWNER` survives a
	/// `close` — the lock is independent of open state (§9 resolved open
	/// question).
	pub fn close(&mut self, client: ClientId) {
		if let Some(flags) = self.clients.get_mut(&client) {
			flags.remove(ClientFlags::OPEN | ClientFlags::MAY_WRITE);
		}
	}

	/// [reader] `EBADF` if not open; `EPERM` if another client owns the
	/// lock.
	pub fn read(&self, client: ClientId) -> FssResult<Vec<u8>> {
		let flags = self.flags_of(client);
		if !flags.contains(ClientFlags::OPEN) {
			return Err(FssError::BadFd);
		}
		if let Some(owner) = self.owner() {
			if owner != client {
				return Err(FssError::NotPermitted);
			}
		}
		Ok(self.data.clone())
	}

	/// [reader or writer] `EPERM` if another client owns the lock, or
	/// (non-append) `MAY_WRITE` is unset; `EBADF` if (append) the client
	/// hasn't opened the file. Split out from `write` so the storage engine
	/// can validate permission before committing to an eviction it would
	/// otherwise have to unwind.
	pub fn check_write_permission(&self, client: ClientId, append: bool) -> FssResult<()> {
		if let Some(owner) = self.owner() {
			if owner != client {
				return Err(FssError::NotPermitted);
			}
		}
		let flags = self.flags_of(client);
		if append {
			if !flags.contains(ClientFlags::OPEN) {
				return Err(FssError::BadFd);
			}
		}
		else if !flags.contains(ClientFlags::MAY_WRITE) {
			return Err(FssError::NotPermitted);
		}
		Ok(())
	}

	/// [writer] Whole-file replace (`append = false`) or append. Caller must
	/// have already checked `check_write_permission`.
	pub fn write(&mut self, client: ClientId, buf: &[u8], append: bool) -> FssResult<()> {
		self.check_write_permission(client, append)?;
		if append {
			self.data.extend_from_slice(buf);
		}
		else {
			self.data.clear();
			self.data.extend_from_slice(buf);
		}
		if let Some(flags) = self.clients.get_mut(&client) {
			flags.remove(ClientFlags::MAY_WRITE);
		}
		self.global_flags.insert(GlobalFlags::DIRTY);
		Ok(())
	}

	/// Raw content snapshot, bypassing the `OPEN`/`OWNER` checks `read` makes
	/// (used by `read_n`, which surfaces every file the client isn't locked
	/// out of regardless of its own open state, and by eviction, which needs
	/// the bytes of a file the evicted client may not even be a client of).
	pub fn raw_data(&self) -> Vec<u8> { self.data.clone() }

	/// [writer] Grants the lock immediately if unowned or already owned by
	/// `client`; otherwise the caller must enqueue `client` via
	/// `enqueue_waiter` (in the same writer critical section, so the check
	/// and the enqueue are atomic with respect to a concurrent `unlock`).
	pub fn try_lock(&mut self, client: ClientId) -> LockOutcome {
		match self.owner() {
			None => {
				let flags = self.flags_of(client) | ClientFlags::OWNER;
				self.clients.insert(client, flags);
				LockOutcome::Granted
			}
			Some(owner) if owner == client => LockOutcome::Granted,
			Some(_) => LockOutcome::Wait,
		}
	}

	/// [writer] `EPERM` if `client` is not the current owner. Clears
	/// `OWNER`, promotes the oldest waiter (if any) to owner, and returns
	/// it so the caller can notify them.
	pub fn unlock(&mut self, client: ClientId) -> FssResult<Option<ClientId>> {
		match self.owner() {
			Some(owner) if owner == client => {
				if let Some(flags) = self.clients.get_mut(&client) {
					flags.remove(ClientFlags::OWNER);
				}
			}
			_ => return Err(FssError::NotPermitted),
		}
		let next = match self.waiters.pop_nonblocking() {
			PopOutcome::Item(id) => Some(id),
			_ => None,
		};
		if let Some(id) = next {
			let flags = self.flags_of(id) | ClientFlags::OWNER;
			self.clients.insert(id, flags);
		}
		Ok(next)
	}

	/// [writer] Clears every per-client flag for the listed clients (used by
	/// `client_cleanup` and on file destruction).
	pub fn remove_clients(&mut self, clients: &[ClientId]) {
		for id in clients {
			self.clients.remove(id);
		}
	}

	pub fn enqueue_waiter(&self, client: ClientId) { let _ = self.waiters.push(client); }

	/// Whether `client` is already queued (used to avoid double-enqueueing a
	/// spuriously-woken waiter retrying its lock attempt).
	pub fn is_waiting(&self, client: ClientId) -> bool {
		let mut cursor = self.waiters.iter_init();
		loop {
			match cursor.next() {
				Some(id) if id == client => return true,
				Some(_) => cursor.advance(),
				None => return false,
			}
		}
	}

	/// Removes `client` from the waiter queue if present (used when a
	/// waiting client disconnects). Returns whether it was present.
	pub fn remove_waiter(&self, client: ClientId) -> bool {
		let mut cursor = self.waiters.iter_init();
		loop {
			match cursor.next() {
				Some(id) if id == client => {
					cursor.iter_remove();
					return true;
				}
				Some(_) => cursor.advance(),
				None => return false,
			}
		}
	}

	/// Drains every waiter, calling `f` on each (used on removal/eviction to
	/// notify them with `ENOENT`).
	pub fn drain_waiters<F: FnMut(ClientId)>(&self, mut f: F) { self.waiters.flush(&mut f); }

	pub fn has_waiters(&self) -> bool { self.waiters.size() > 0 }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn create_locked_grants_owner_and_may_write() {
		let f = FileEntry::new(1, true);
		assert_eq!(f.owner(), Some(1));
		assert!(f.flags_of(1).contains(ClientFlags::MAY_WRITE));
	}

	#[test]
	fn write_then_read_round_trips() {
		let mut f = FileEntry::new(1, true);
		f.write(1, b"hello", false).unwrap();
		assert_eq!(f.read(1).unwrap(), b"hello");
	}

	#[test]
	fn append_concatenates() {
		let mut f = FileEntry::new(1, true);
		f.open(1, false).ok();
		f.write(1, b"abc", true).unwrap();
		f.write(1, b"def", true).unwrap();
		assert_eq!(f.read(1).unwrap(), b"abcdef");
	}

	#[test]
	fn non_owner_read_fails_eperm() {
		let mut f = FileEntry::new(1, true);
		f.open(2, false).unwrap();
		assert_eq!(f.read(2), Err(FssError::NotPermitted));
	}

	#[test]
	fn second_write_without_reopen_fails_eperm() {
		let mut f = FileEntry::new(1, true);
		f.write(1, b"first", false).unwrap();
		assert_eq!(f.write(1, b"second", false), Err(FssError::NotPermitted));
	}

	#[test]
	fn close_preserves_owner() {
		let mut f = FileEntry::new(1, true);
		f.close(1);
		assert_eq!(f.owner(), Some(1));
		assert!(!f.is_open(1));
	}

	#[test]
	fn lock_queues_when_owned() {
		let mut f = FileEntry::new(1, true);
		assert_eq!(f.try_lock(2), LockOutcome::Wait);
	}

	#[test]
	fn unlock_promotes_oldest_waiter() {
		let mut f = FileEntry::new(1, true);
		f.try_lock(2);
		f.enqueue_waiter(2);
		f.try_lock(3);
		f.enqueue_waiter(3);
		let next = f.unlock(1).unwrap();
		assert_eq!(next, Some(2));
		assert_eq!(f.owner(), Some(2));
	}

	#[test]
	fn unlock_by_non_owner_fails() {
		let mut f = FileEntry::new(1, true);
		assert_eq!(f.unlock(2), Err(FssError::NotPermitted));
	}
}
