//! The storage engine: path -> `FileEntry` dictionary, capacity accounting,
//! and FIFO eviction.
//!
//! Generalizes the teacher's `SharedIOContainer`
//! (`state/shared_io_container.rs`: one `RwLock<HashMap<...>>` behind a
//! narrow `*_op` closure interface) to the bounded, evicting dictionary
//! §4.4 describes, and reaches for `WaitableRwLock`/`Condvar` where the
//! teacher reaches for a plain `RwLock`, because `lock()` has to block a
//! thread mid-hold of the global role.
//!
//! FSS never touches a socket. Every notification a caller needs — an
//! evicted file's last content, a waiter who must learn the file they
//! queued on vanished — goes through the narrow `SendbackHandler`/
//! `WaitHandler` callbacks, the same split the teacher draws between
//! `FileStateContainer` and the thread that actually owns the connection
//! (§9 "Dynamic callback handlers").

pub mod file_entry;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Condvar;

use crate::error::{FssError, FssResult};
use crate::path::FilePath;
use crate::sync::WaitableRwLock;

pub use file_entry::{ClientFlags, ClientId, GlobalFlags, LockOutcome};
use file_entry::FileEntry;

/// Notified when a file a client is blocked on (queued via `lock`) is
/// removed or evicted out from under them.
pub trait WaitHandler {
	fn notify_waiter(&mut self, client: ClientId, err: FssError);
}

/// Notified when eviction drops a file, with its last content and whether
/// it carried unflushed (`DIRTY`) writes.
pub trait SendbackHandler {
	fn send_victim(&mut self, path: &FilePath, data: Vec<u8>, dirty: bool);
}

struct FileSlot {
	entry: WaitableRwLock<FileEntry>,
	/// Signaled whenever this file's ownership changes (unlock, promotion,
	/// removal) so a thread parked in `Storage::lock` wakes to recheck.
	wake: Condvar,
}

impl FileSlot {
	fn new(entry: FileEntry) -> FileSlot { FileSlot { entry: WaitableRwLock::new(entry), wake: Condvar::new() } }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
	pub bytes_high_water: usize,
	pub files_high_water: usize,
	pub evictions: u64,
}

struct StorageInner {
	files: HashMap<FilePath, Arc<FileSlot>>,
	/// FIFO creation order, the eviction scan order for both the byte and
	/// file-count policies.
	order: VecDeque<FilePath>,
	bytes_used: usize,
	files_used: usize,
	stats: Stats,
}

/// The bounded, evicting file dictionary. One instance per server; shared
/// across worker threads behind an `Arc`.
pub struct Storage {
	inner: WaitableRwLock<StorageInner>,
	max_bytes: usize,
	max_files: usize,
}

impl Storage {
	pub fn new(max_bytes: usize, max_files: usize) -> Storage {
		Storage {
			inner: WaitableRwLock::new(StorageInner {
				files: HashMap::new(),
				order: VecDeque::new(),
				bytes_used: 0,
				files_used: 0,
				stats: Stats::default(),
			}),
			max_bytes,
			max_files,
		}
	}

	pub fn stats(&self) -> Stats { self.inner.read().stats }

	/// [global writer] `EEXIST` if the path is taken. If the dictionary is
	/// already at `max_files`, evicts the oldest unlocked file first;
	/// `EBUSY` if every existing file is locked.
	pub fn create(
		&self,
		path: &FilePath,
		client: ClientId,
		lock: bool,
		wait: &mut dyn WaitHandler,
		sendback: &mut dyn SendbackHandler,
	) -> FssResult<()> {
		let mut inner = self.inner.write();
		if inner.files.contains_key(path) {
			return Err(FssError::Exists);
		}
		if inner.files_used >= self.max_files && !self.evict_one(&mut inner, wait, sendback) {
			return Err(FssError::Busy);
		}
		let slot = Arc::new(FileSlot::new(FileEntry::new(client, lock)));
		inner.files.insert(path.clone(), slot);
		inner.order.push_back(path.clone());
		inner.files_used += 1;
		if inner.files_used > inner.stats.files_high_water {
			inner.stats.files_high_water = inner.files_used;
		}
		Ok(())
	}

	/// [global reader, then per-file writer] `ENOENT` if the path doesn't
	/// exist.
	pub fn open(&self, path: &FilePath, client: ClientId, lock: bool) -> FssResult<()> {
		let inner = self.inner.read();
		let slot = inner.files.get(path).ok_or(FssError::NotFound)?;
		slot.entry.write().open(client, lock)
	}

	pub fn close(&self, path: &FilePath, client: ClientId) -> FssResult<()> {
		let inner = self.inner.read();
		let slot = inner.files.get(path).ok_or(FssError::NotFound)?;
		slot.entry.write().close(client);
		Ok(())
	}

	pub fn read(&self, path: &FilePath, client: ClientId) -> FssResult<Vec<u8>> {
		let inner = self.inner.read();
		let slot = inner.files.get(path).ok_or(FssError::NotFound)?;
		slot.entry.read().read(client)
	}

	/// Returns up to `n` (or all, if `n <= 0`) files the client isn't locked
	/// out of, in creation order, bypassing the per-client `OPEN` check
	/// `read` makes — `readN` is a bulk snapshot, not a per-descriptor read.
	pub fn read_n(&self, client: ClientId, n: i64) -> Vec<(FilePath, Vec<u8>)> {
		let inner = self.inner.read();
		let mut out = Vec::new();
		for path in inner.order.iter() {
			if n > 0 && out.len() as i64 >= n {
				break;
			}
			if let Some(slot) = inner.files.get(path) {
				let guard = slot.entry.read();
				if let Some(owner) = guard.owner() {
					if owner != client {
						continue;
					}
				}
				out.push((path.clone(), guard.raw_data()));
			}
		}
		out
	}

	pub fn write(
		&self,
		path: &FilePath,
		client: ClientId,
		buf: &[u8],
		wait: &mut dyn WaitHandler,
		sendback: &mut dyn SendbackHandler,
	) -> FssResult<()> {
		self.put(path, client, buf, false, wait, sendback)
	}

	pub fn append(
		&self,
		path: &FilePath,
		client: ClientId,
		buf: &[u8],
		wait: &mut dyn WaitHandler,
		sendback: &mut dyn SendbackHandler,
	) -> FssResult<()> {
		self.put(path, client, buf, true, wait, sendback)
	}

	/// [global writer] Unlike `open`/`close`/`read`/`lock`/`unlock`, `write`
	/// and `append` take the global *writer* role, not the reader role —
	/// they may need to evict other files to make room, which mutates the
	/// dictionary's shape. Permission is checked before anything (including
	/// eviction) happens, so a rejected write never evicts on its way to
	/// failing.
	fn put(
		&self,
		path: &FilePath,
		client: ClientId,
		buf: &[u8],
		append: bool,
		wait: &mut dyn WaitHandler,
		sendback: &mut dyn SendbackHandler,
	) -> FssResult<()> {
		let mut inner = self.inner.write();
		let slot = inner.files.get(path).cloned().ok_or(FssError::NotFound)?;
		let mut entry = slot.entry.write();
		entry.check_write_permission(client, append)?;
		let old_size = entry.size();
		let new_len = if append { old_size + buf.len() } else { buf.len() };
		if new_len > old_size {
			let projected = inner.bytes_used - old_size + new_len;
			if projected > self.max_bytes {
				let needed = projected - self.max_bytes;
				drop(entry);
				self.evict_for_bytes(&mut inner, path, needed, wait, sendback)?;
				entry = slot.entry.write();
			}
		}
		entry.write(client, buf, append)?;
		let new_size = entry.size();
		drop(entry);
		inner.bytes_used = inner.bytes_used - old_size + new_size;
		if inner.bytes_used > inner.stats.bytes_high_water {
			inner.stats.bytes_high_water = inner.bytes_used;
		}
		Ok(())
	}

	/// [global reader, then per-file writer] Grants the lock immediately, or
	/// enqueues `client` as a waiter (unless already queued), without
	/// blocking. The non-blocking counterpart to `lock`, in the same spirit
	/// as the queue's `pop_blocking`/`pop_nonblocking` split.
	pub fn try_lock_or_enqueue(&self, path: &FilePath, client: ClientId) -> FssResult<LockOutcome> {
		let inner = self.inner.read();
		let slot = inner.files.get(path).ok_or(FssError::NotFound)?;
		let mut entry = slot.entry.write();
		match entry.try_lock(client) {
			LockOutcome::Granted => Ok(LockOutcome::Granted),
			LockOutcome::Wait => {
				if !entry.is_waiting(client) {
					entry.enqueue_waiter(client);
				}
				Ok(LockOutcome::Wait)
			}
		}
	}

	/// [global reader, held across the block] Grants immediately if the file
	/// is unowned or already owned by `client`. Otherwise enqueues `client`
	/// and blocks on the file's wake condition, releasing the *global*
	/// reader role for the duration (§4.1 `read_wait`) so a concurrent
	/// `remove`/eviction elsewhere in the dictionary isn't starved by this
	/// thread's outstanding role.
	pub fn lock(&self, path: &FilePath, client: ClientId) -> FssResult<()> {
		let mut inner = self.inner.read();
		loop {
			let slot = inner.files.get(path).cloned().ok_or(FssError::NotFound)?;
			let mut entry = slot.entry.write();
			match entry.try_lock(client) {
				LockOutcome::Granted => return Ok(()),
				LockOutcome::Wait => {
					if !entry.is_waiting(client) {
						entry.enqueue_waiter(client);
					}
					drop(entry);
					inner.wait(&slot.wake);
				}
			}
		}
	}

	/// [global reader, then per-file writer] `EPERM` if `client` doesn't
	/// hold the lock.
	pub fn unlock(&self, path: &FilePath, client: ClientId) -> FssResult<()> {
		let inner = self.inner.read();
		let slot = inner.files.get(path).ok_or(FssError::NotFound)?;
		let promoted = slot.entry.write().unlock(client)?;
		if promoted.is_some() {
			slot.wake.notify_all();
		}
		Ok(())
	}

	/// [global writer] `EPERM` unless `client` owns the lock.
	pub fn remove(&self, path: &FilePath, client: ClientId, wait: &mut dyn WaitHandler) -> FssResult<()> {
		let mut inner = self.inner.write();
		let owns = match inner.files.get(path) {
			Some(slot) => slot.entry.read().owner() == Some(client),
			None => return Err(FssError::NotFound),
		};
		if !owns {
			return Err(FssError::NotPermitted);
		}
		self.delete_entry(&mut inner, path, wait);
		Ok(())
	}

	/// Detaches `client` from every file: clears its per-client flags,
	/// drops it from any waiter queue it's sitting in, and — if it held a
	/// lock — promotes the next waiter exactly as `unlock` would. Called
	/// once per connection teardown; never touches the dictionary's shape,
	/// so the global reader role suffices.
	pub fn client_cleanup(&self, client: ClientId) {
		let inner = self.inner.read();
		for slot in inner.files.values() {
			let promoted = {
				let mut entry = slot.entry.write();
				let promoted = if entry.owner() == Some(client) {
					entry.unlock(client).unwrap_or(None)
				}
				else {
					entry.remove_waiter(client);
					None
				};
				entry.remove_clients(&[client]);
				promoted
			};
			if promoted.is_some() {
				slot.wake.notify_all();
			}
		}
	}

	/// [global reader] Server shutdown (§5): drains every file's waiter queue
	/// with `ENOENT`, without touching the dictionary itself — the process is
	/// exiting, not the files.
	pub fn teardown(&self, wait: &mut dyn WaitHandler) {
		let inner = self.inner.read();
		for slot in inner.files.values() {
			slot.entry.read().drain_waiters(|id| wait.notify_waiter(id, FssError::NotFound));
		}
	}

	/// Evicts one unlocked file, FIFO-oldest first. Returns whether one was
	/// found.
	fn evict_one(&self, inner: &mut StorageInner, wait: &mut dyn WaitHandler, sendback: &mut dyn SendbackHandler) -> bool {
		let victim = inner
			.order
			.iter()
			.find(|p| inner.files.get(*p).map(|slot| slot.entry.read().owner().is_none()).unwrap_or(false))
			.cloned();
		match victim {
			Some(p) => {
				self.evict_path(inner, &p, wait, sendback);
				true
			}
			None => false,
		}
	}

	/// Evicts the minimum FIFO prefix of unlocked files (excluding `exclude`,
	/// the file currently being written) whose combined size covers `needed`
	/// bytes. Fails `E2BIG` without evicting anything if even evicting every
	/// eligible file wouldn't be enough — no partial state is left behind on
	/// failure.
	fn evict_for_bytes(
		&self,
		inner: &mut StorageInner,
		exclude: &FilePath,
		needed: usize,
		wait: &mut dyn WaitHandler,
		sendback: &mut dyn SendbackHandler,
	) -> FssResult<()> {
		let mut candidates = Vec::new();
		let mut sum = 0usize;
		for p in inner.order.iter() {
			if sum >= needed {
				break;
			}
			if p == exclude {
				continue;
			}
			if let Some(slot) = inner.files.get(p) {
				let guard = slot.entry.read();
				if guard.owner().is_none() {
					sum += guard.size();
					candidates.push(p.clone());
				}
			}
		}
		if sum < needed {
			return Err(FssError::TooBig);
		}
		for p in candidates {
			self.evict_path(inner, &p, wait, sendback);
		}
		Ok(())
	}

	fn evict_path(&self, inner: &mut StorageInner, path: &FilePath, wait: &mut dyn WaitHandler, sendback: &mut dyn SendbackHandler) {
		let slot = match inner.files.get(path).cloned() {
			Some(s) => s,
			None => return,
		};
		let (data, dirty) = {
			let guard = slot.entry.read();
			(guard.raw_data(), guard.is_dirty())
		};
		self.delete_entry(inner, path, wait);
		inner.stats.evictions += 1;
		sendback.send_victim(path, data, dirty);
	}

	/// Removes `path` from the dictionary, draining its waiter queue through
	/// `wait` (each waiter gets `ENOENT`) and waking any thread parked in
	/// `lock` on this file.
	fn delete_entry(&self, inner: &mut StorageInner, path: &FilePath, wait: &mut dyn WaitHandler) -> Option<Arc<FileSlot>> {
		let slot = inner.files.remove(path)?;
		inner.order.retain(|p| p != path);
		let size = slot.entry.read().size();
		inner.files_used -= 1;
		inner.bytes_used -= size;
		slot.entry.read().drain_waiters(|id| wait.notify_waiter(id, FssError::NotFound));
		slot.wake.notify_all();
		Some(slot)
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{mpsc, Arc, Mutex};
	use std::thread;

	use super::*;

	#[derive(Default)]
	struct Recorder {
		notified: Vec<(ClientId, FssError)>,
		evicted: Vec<(String, Vec<u8>, bool)>,
	}

	impl WaitHandler for Recorder {
		fn notify_waiter(&mut self, client: ClientId, err: FssError) { self.notified.push((client, err)); }
	}

	impl SendbackHandler for Recorder {
		fn send_victim(&mut self, path: &FilePath, data: Vec<u8>, dirty: bool) {
			self.evicted.push((path.as_str().to_string(), data, dirty));
		}
	}

	fn p(s: &str) -> FilePath { FilePath::parse(s).unwrap() }

	#[test]
	fn create_then_read_round_trips() {
		let fss = Storage::new(1024, 10);
		let mut r = Recorder::default();
		fss.create(&p("/a"), 1, true, &mut r, &mut r).unwrap();
		fss.write(&p("/a"), 1, b"hi", &mut r, &mut r).unwrap();
		assert_eq!(fss.read(&p("/a"), 1).unwrap(), b"hi");
	}

	#[test]
	fn create_duplicate_fails_exist() {
		let fss = Storage::new(1024, 10);
		let mut r = Recorder::default();
		fss.create(&p("/a"), 1, false, &mut r, &mut r).unwrap();
		assert_eq!(fss.create(&p("/a"), 2, false, &mut r, &mut r), Err(FssError::Exists));
	}

	#[test]
	fn missing_file_ops_fail_not_found() {
		let fss = Storage::new(1024, 10);
		assert_eq!(fss.open(&p("/nope"), 1, false), Err(FssError::NotFound));
		assert_eq!(fss.read(&p("/nope"), 1), Err(FssError::NotFound));
	}

	#[test]
	fn file_count_eviction_drops_oldest_unlocked() {
		let fss = Storage::new(1024, 2);
		let mut r = Recorder::default();
		fss.create(&p("/a"), 1, false, &mut r, &mut r).unwrap();
		fss.create(&p("/b"), 1, false, &mut r, &mut r).unwrap();
		fss.create(&p("/c"), 1, false, &mut r, &mut r).unwrap();
		assert_eq!(fss.open(&p("/a"), 1, false), Err(FssError::NotFound));
		assert!(fss.open(&p("/b"), 1, false).is_ok());
		assert!(fss.open(&p("/c"), 1, false).is_ok());
		assert_eq!(r.evicted.len(), 1);
		assert_eq!(r.evicted[0].0, "/a");
	}

	#[test]
	fn count_eviction_fails_busy_when_everything_locked() {
		let fss = Storage::new(1024, 1);
		let mut r = Recorder::default();
		fss.create(&p("/a"), 1, true, &mut r, &mut r).unwrap();
		assert_eq!(fss.create(&p("/b"), 2, false, &mut r, &mut r), Err(FssError::Busy));
	}

	#[test]
	fn byte_eviction_drops_minimum_fifo_prefix() {
		let fss = Storage::new(10, 10);
		let mut r = Recorder::default();
		fss.create(&p("/a"), 1, false, &mut r, &mut r).unwrap();
		fss.write(&p("/a"), 1, b"123", &mut r, &mut r).unwrap();
		fss.create(&p("/b"), 1, false, &mut r, &mut r).unwrap();
		fss.write(&p("/b"), 1, b"123", &mut r, &mut r).unwrap();
		fss.create(&p("/c"), 1, false, &mut r, &mut r).unwrap();
		// 6 bytes already used out of 10; writing 5 to /c needs 1 more,
		// which evicting the oldest file (/a, 3 bytes) alone covers.
		fss.write(&p("/c"), 1, b"12345", &mut r, &mut r).unwrap();
		assert_eq!(r.evicted.len(), 1);
		assert_eq!(r.evicted[0].0, "/a");
		assert_eq!(fss.read(&p("/b"), 1).unwrap(), b"123");
	}

	#[test]
	fn byte_eviction_fails_too_big_without_partial_state() {
		let fss = Storage::new(5, 10);
		let mut r = Recorder::default();
		fss.create(&p("/a"), 1, true, &mut r, &mut r).unwrap();
		assert_eq!(fss.write(&p("/a"), 1, b"123456", &mut r, &mut r), Err(FssError::TooBig));
		assert_eq!(fss.read(&p("/a"), 1).unwrap(), b"");
		assert!(r.evicted.is_empty());
	}

	#[test]
	fn locked_files_are_never_eviction_candidates() {
		let fss = Storage::new(10, 10);
		let mut r = Recorder::default();
		fss.create(&p("/locked"), 1, true, &mut r, &mut r).unwrap();
		fss.write(&p("/locked"), 1, b"12345", &mut r, &mut r).unwrap();
		fss.create(&p("/free"), 2, false, &mut r, &mut r).unwrap();
		assert_eq!(fss.write(&p("/free"), 2, b"123456", &mut r, &mut r), Err(FssError::TooBig));
		assert!(r.evicted.is_empty());
	}

	#[test]
	fn remove_requires_ownership() {
		let fss = Storage::new(1024, 10);
		let mut r = Recorder::default();
		fss.create(&p("/a"), 1, true, &mut r, &mut r).unwrap();
		assert_eq!(fss.remove(&p("/a"), 2, &mut r), Err(FssError::NotPermitted));
		fss.remove(&p("/a"), 1, &mut r).unwrap();
		assert_eq!(fss.open(&p("/a"), 1, false), Err(FssError::NotFound));
	}

	#[test]
	fn lock_blocks_then_grants_fifo_on_unlock() {
		let fss = Arc::new(Storage::new(1024, 10));
		let mut r = Recorder::default();
		fss.create(&p("/a"), 1, true, &mut r, &mut r).unwrap();

		// Waiter order established deterministically, single-threaded, before
		// any thread ever blocks on it.
		assert_eq!(fss.try_lock_or_enqueue(&p("/a"), 2).unwrap(), LockOutcome::Wait);
		assert_eq!(fss.try_lock_or_enqueue(&p("/a"), 3).unwrap(), LockOutcome::Wait);

		let order = Arc::new(Mutex::new(Vec::new()));
		let (tx2, rx2) = mpsc::channel();
		let (tx3, rx3) = mpsc::channel();
		let mut handles = Vec::new();
		for (id, done) in [(2i64, tx2), (3i64, tx3)] {
			let fss = fss.clone();
			let order = order.clone();
			handles.push(thread::spawn(move || {
				fss.lock(&p("/a"), id).unwrap();
				order.lock().unwrap().push(id);
				done.send(()).unwrap();
			}));
		}

		fss.unlock(&p("/a"), 1).unwrap();
		rx2.recv().unwrap();
		fss.unlock(&p("/a"), 2).unwrap();
		rx3.recv().unwrap();
		for h in handles {
			h.join().unwrap();
		}
		assert_eq!(*order.lock().unwrap(), vec![2, 3]);
	}

	#[test]
	fn lock_wakes_with_not_found_when_file_removed() {
		let fss = Arc::new(Storage::new(1024, 10));
		let mut r = Recorder::default();
		fss.create(&p("/a"), 1, true, &mut r, &mut r).unwrap();
		assert_eq!(fss.try_lock_or_enqueue(&p("/a"), 2).unwrap(), LockOutcome::Wait);

		let fss2 = fss.clone();
		let handle = thread::spawn(move || fss2.lock(&p("/a"), 2));
		let mut r2 = Recorder::default();
		fss.remove(&p("/a"), 1, &mut r2).unwrap();
		assert_eq!(handle.join().unwrap(), Err(FssError::NotFound));
	}

	#[test]
	fn client_cleanup_promotes_next_waiter() {
		let fss = Storage::new(1024, 10);
		let mut r = Recorder::default();
		fss.create(&p("/a"), 1, true, &mut r, &mut r).unwrap();
		assert_eq!(fss.try_lock_or_enqueue(&p("/a"), 2).unwrap(), LockOutcome::Wait);

		let fss = Arc::new(fss);
		let fss2 = fss.clone();
		let handle = thread::spawn(move || fss2.lock(&p("/a"), 2));
		fss.client_cleanup(1);
		handle.join().unwrap().unwrap();
		assert!(fss.read(&p("/a"), 2).is_ok());
	}

	#[test]
	fn read_n_skips_files_locked_by_others() {
		let fss = Storage::new(1024, 10);
		let mut r = Recorder::default();
		fss.create(&p("/a"), 1, true, &mut r, &mut r).unwrap();
		fss.create(&p("/b"), 2, false, &mut r, &mut r).unwrap();
		let seen = fss.read_n(2, -1);
		let paths: Vec<_> = seen.iter().map(|(p, _)| p.as_str().to_string()).collect();
		assert_eq!(paths, vec!["/b"]);
	}
}
