//! Wire message kinds and the in-memory `Message` representation.
//!
//! Restructures the teacher's `Message` enum (`message.rs`: one variant per
//! rope-edit operation, encoded with `serde_cbor`) onto the fixed kind set
//! and per-kind argument counts in SPEC_FULL.md §4.5 — a 1-byte kind tag
//! plus `argn` length-prefixed packets, not a self-describing serde format.

use bitflags::bitflags;

use crate::path::FilePath;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
	Ok = 0,
	Err = 1,
	Open = 2,
	Read = 3,
	ReadN = 4,
	GetF = 5,
	Write = 6,
	Append = 7,
	Close = 8,
	Lock = 9,
	Unlock = 10,
	Remove = 11,
}

impl MessageKind {
	pub fn from_wire(byte: u8) -> Option<MessageKind> {
		Some(match byte {
			0 => MessageKind::Ok,
			1 => MessageKind::Err,
			2 => MessageKind::Open,
			3 => MessageKind::Read,
			4 => MessageKind::ReadN,
			5 => MessageKind::GetF,
			6 => MessageKind::Write,
			7 => MessageKind::Append,
			8 => MessageKind::Close,
			9 => MessageKind::Lock,
			10 => MessageKind::Unlock,
			11 => MessageKind::Remove,
			_ => return None,
		})
	}

	/// The canonical `argn` used when this crate constructs an outgoing
	/// message of this kind.
	pub fn expected_argn(self) -> i64 {
		match self {
			MessageKind::Ok => 0,
			MessageKind::Err => 1,
			MessageKind::Open => 2,
			MessageKind::Read | MessageKind::Close | MessageKind::Lock | MessageKind::Unlock | MessageKind::Remove => 1,
			MessageKind::ReadN => 1,
			MessageKind::GetF => 2,
			MessageKind::Write => 2,
			MessageKind::Append => 2,
		}
	}

	/// Whether `argn` is an acceptable count for an *incoming* message of
	/// this kind. `OK` is the one kind with two legal shapes (§4.5): bare,
	/// or carrying a single "more replies follow" count.
	pub fn valid_argn(self, argn: i64) -> bool {
		match self {
			MessageKind::Ok => argn == 0 || argn == 1,
			other => argn == other.expected_argn(),
		}
	}
}

bitflags! {
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct OpenFlags: u8 {
		const CREATE = 0b01;
		const LOCK   = 0b10;
	}
}

/// A fully decoded message, carrying owned byte buffers rather than
/// NUL-terminated strings (§9 "opaque byte payloads").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
	Ok { more: Option<i64> },
	Err { errno: crate::error::Errno },
	Open { path: FilePath, flags: OpenFlags },
	Read { path: FilePath },
	ReadN { n: i64 },
	GetF { path: FilePath, data: Vec<u8> },
	Write { path: FilePath, data: Vec<u8> },
	Append { path: FilePath, data: Vec<u8> },
	Close { path: FilePath },
	Lock { path: FilePath },
	Unlock { path: FilePath },
	Remove { path: FilePath },
}

impl Message {
	pub fn kind(&self) -> MessageKind {
		match self {
			Message::Ok { .. } => MessageKind::Ok,
			Message::Err { .. } => MessageKind::Err,
			Message::Open { .. } => MessageKind::Open,
			Message::Read { .. } => MessageKind::Read,
			Message::ReadN { .. } => MessageKind::ReadN,
			Message::GetF { .. } => MessageKind::GetF,
			Message::Write { .. } => MessageKind::Write,
			Message::Append { .. } => MessageKind::Append,
			Message::Close { .. } => MessageKind::Close,
			Message::Lock { .. } => MessageKind::Lock,
			Message::Unlock { .. } => MessageKind::Unlock,
			Message::Remove { .. } => MessageKind::Remove,
		}
	}
}
