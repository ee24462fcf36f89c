//! Typed error handling for the storage engine and the wire layer.
//!
//! `FssError` is client-visible: it maps one-to-one onto the errno-style wire
//! codes in §6 of the spec and is what `ERR` replies carry. `ConnError` is
//! connection-fatal I/O failure, kept separate so the two categories from
//! §7 are never conflated in the same `Result`.

use std::fmt;
use std::io;

/// Wire errno values carried in an `ERR` message's single argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Errno {
	EExist = 1,
	ENoEnt = 2,
	EBadF = 3,
	EPerm = 4,
	EBusy = 5,
	E2Big = 6,
	EInval = 7,
	ENoMem = 8,
}

impl fmt::Display for Errno {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Errno::EExist => "EEXIST",
			Errno::ENoEnt => "ENOENT",
			Errno::EBadF => "EBADF",
			Errno::EPerm => "EPERM",
			Errno::EBusy => "EBUSY",
			Errno::E2Big => "E2BIG",
			Errno::EInval => "EINVAL",
			Errno::ENoMem => "ENOMEM",
		};
		f.write_str(s)
	}
}

impl Errno {
	/// Recovers an `Errno` from the raw wire value, used when decoding an
	/// `ERR` message received from the other end.
	pub fn from_wire(value: i64) -> Option<Errno> {
		Some(match value {
			1 => Errno::EExist,
			2 => Errno::ENoEnt,
			3 => Errno::EBadF,
			4 => Errno::EPerm,
			5 => Errno::EBusy,
			6 => Errno::E2Big,
			7 => Errno::EInval,
			8 => Errno::ENoMem,
			_ => return None,
		})
	}

	pub fn wire_value(self) -> i64 { self as i64 }
}

/// Client-visible errors raised by the storage engine. The connection
/// survives; the caller turns this into an `ERR` reply.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum FssError {
	#[error("file already exists")]
	Exists,
	#[error("no such file")]
	NotFound,
	#[error("bad file descriptor: file not open in the required state for this client")]
	BadFd,
	#[error("operation not permitted for this client")]
	NotPermitted,
	#[error("no evictable file available to satisfy the request")]
	Busy,
	#[error("requested size exceeds steady-state capacity")]
	TooBig,
	#[error("invalid argument")]
	Invalid,
	#[error("out of memory")]
	OutOfMemory,
}

impl FssError {
	pub fn as_errno(&self) -> Errno {
		match self {
			FssError::Exists => Errno::EExist,
			FssError::NotFound => Errno::ENoEnt,
			FssError::BadFd => Errno::EBadF,
			FssError::NotPermitted => Errno::EPerm,
			FssError::Busy => Errno::EBusy,
			FssError::TooBig => Errno::E2Big,
			FssError::Invalid => Errno::EInval,
			FssError::OutOfMemory => Errno::ENoMem,
		}
	}
}

pub type FssResult<T> = Result<T, FssError>;

/// Connection-fatal errors: I/O failure while framing a message. The worker
/// closes the connection and runs `client_cleanup` when this propagates.
#[derive(Debug, thiserror::Error)]
pub enum ConnError {
	#[error("i/o error: {0}")]
	Io(#[from] io::Error),
	#[error("connection closed by peer")]
	Eof,
	#[error("malformed frame: {0}")]
	Malformed(&'static str),
}

pub type ConnResult<T> = Result<T, ConnError>;
