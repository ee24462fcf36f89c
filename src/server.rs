//! Accept loop, fixed worker pool, and shutdown.
//!
//! Generalizes the teacher's `text_server.rs` (a `TcpListener` accept loop
//! over a shared `thread_data: Mutex<HashMap<ThreadId, ClientState>>`, one
//! thread per connection, never joined) to the fixed-size worker pool §5
//! calls for: one acceptor thread feeds accepted connections into a
//! `ConcurrentQueue`; `n_workers` long-lived worker threads pop and serve one
//! connection to completion before popping the next.

use std::io::ErrorKind;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::dispatch::dispatch;
use crate::error::{ConnError, FssError};
use crate::fss::{ClientId, Storage, WaitHandler};
use crate::protocol::codec::{decode, encode, read_message, write_message};
use crate::queue::{ConcurrentQueue, PopOutcome};

/// How long the acceptor blocks on one `accept()` attempt before re-checking
/// the shutdown flag. `UnixListener` has no "wake me on shutdown" primitive,
/// so the loop polls a nonblocking socket instead of parking forever.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

struct TeardownLogger;

impl WaitHandler for TeardownLogger {
	fn notify_waiter(&mut self, client: ClientId, err: FssError) {
		debug!(target: "fss::lock", "teardown: notified waiter {} {}", client, err.as_errno());
	}
}

/// Owns the connection queue and worker pool for one server lifetime. Built
/// around a single `Storage`, shared read-only (aside from its own internal
/// locking) across every worker.
pub struct Server {
	storage: Arc<Storage>,
	queue: Arc<ConcurrentQueue<UnixStream>>,
	shutdown: Arc<AtomicBool>,
}

impl Server {
	pub fn new(storage: Arc<Storage>) -> Server {
		Server { storage, queue: Arc::new(ConcurrentQueue::new()), shutdown: Arc::new(AtomicBool::new(false)) }
	}

	/// A handle that, when called, flips the server into its shutdown
	/// sequence (§5: "the manager receives a signal, flips server state to
	/// CLOSED"). Cheap to clone into a signal handler.
	pub fn shutdown_handle(&self) -> Arc<AtomicBool> { self.shutdown.clone() }

	/// Runs the accept loop on the calling thread until `shutdown_handle`'s
	/// flag is set, then drains the connection queue, joins every worker, and
	/// tears down the FSS's outstanding waiters. Returns once shutdown is
	/// complete.
	pub fn run(&self, listener: UnixListener, n_workers: usize) -> std::io::Result<()> {
		listener.set_nonblocking(true)?;

		let workers: Vec<JoinHandle<()>> = (0..n_workers)
			.map(|id| {
				let queue = self.queue.clone();
				let storage = self.storage.clone();
				thread::Builder::new()
					.name(format!("fss-worker-{}", id))
					.spawn(move || worker_loop(&storage, &queue))
					.expect("failed to spawn worker thread")
			})
			.collect();

		info!(target: "fss::server", "accepting connections, {} workers", n_workers);
		while !self.shutdown.load(Ordering::Acquire) {
			match listener.accept() {
				Ok((stream, _addr)) => {
					let fd = stream.as_raw_fd();
					info!(target: "fss::server", "accepted connection fd={}", fd);
					if self.queue.push(stream).is_err() {
						warn!(target: "fss::server", "connection queue closed mid-accept, dropping fd={}", fd);
					}
				}
				Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
				Err(e) => warn!(target: "fss::server", "accept failed: {}", e),
			}
		}

		info!(target: "fss::server", "shutdown signaled, draining connection queue");
		self.queue.close();
		for worker in workers {
			let _ = worker.join();
		}

		let mut teardown = TeardownLogger;
		self.storage.teardown(&mut teardown);
		info!(target: "fss::server", "shutdown complete");
		Ok(())
	}
}

fn worker_loop(storage: &Storage, queue: &ConcurrentQueue<UnixStream>) {
	loop {
		match queue.pop_blocking() {
			PopOutcome::Item(stream) => serve_connection(storage, stream),
			PopOutcome::ClosedAndEmpty => return,
			PopOutcome::Empty | PopOutcome::Closed => unreachable!("pop_blocking never yields a non-terminal empty state"),
		}
	}
}

/// Serves one connection to completion: reads framed requests, dispatches
/// each to the FSS, writes the reply sequence back, until the peer
/// disconnects or a frame is malformed. Always runs `client_cleanup` on the
/// way out, connection-fatal or not.
fn serve_connection(storage: &Storage, mut stream: UnixStream) {
	let client: ClientId = stream.as_raw_fd() as ClientId;
	loop {
		let raw = match read_message(&mut stream) {
			Ok(raw) => raw,
			Err(ConnError::Eof) => {
				debug!(target: "fss::server", "client {} disconnected", client);
				break;
			}
			Err(e) => {
				warn!(target: "fss::protocol", "client {} read failed: {}", client, e);
				break;
			}
		};
		let msg = match decode(raw) {
			Ok(msg) => msg,
			Err(e) => {
				warn!(target: "fss::protocol", "client {} sent a malformed frame: {}", client, e);
				break;
			}
		};
		for reply in dispatch(storage, client, msg) {
			let (kind, packets) = encode(&reply);
			if let Err(e) = write_message(&mut stream, kind, &packets) {
				warn!(target: "fss::protocol", "client {} write failed: {}", client, e);
				storage.client_cleanup(client);
				return;
			}
		}
	}
	storage.client_cleanup(client);
}
