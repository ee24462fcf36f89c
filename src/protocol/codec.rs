//! Wire framing: length-prefixed packets, kind+argn+packets messages.
//!
//! Generalizes the teacher's `ThreadIO` (`state/thread_io.rs`: a raw
//! length-prefixed read/write wrapper around a stream) to the exact frame
//! layout SPEC_FULL.md §4.5 specifies, fixing the wire integer width and
//! endianness the teacher left to a serde backend's host-dependent
//! defaults.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{ConnError, ConnResult, Errno};
use crate::path::FilePath;
use crate::protocol::message::{Message, MessageKind, OpenFlags};

/// Reads one length-prefixed packet. Retries the length read on
/// `Interrupted`; any other I/O error, or EOF mid-frame, is connection-fatal.
pub fn read_packet<R: Read>(r: &mut R) -> ConnResult<Vec<u8>> {
	let len = loop {
		match r.read_u64::<LittleEndian>() {
			Ok(n) => break n,
			Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
			Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(ConnError::Eof),
			Err(e) => return Err(ConnError::Io(e)),
		}
	};
	let mut buf = vec![0u8; len as usize];
	read_exact_retrying(r, &mut buf)?;
	Ok(buf)
}

fn read_exact_retrying<R: Read>(r: &mut R, buf: &mut [u8]) -> ConnResult<()> {
	let mut filled = 0;
	while filled < buf.len() {
		match r.read(&mut buf[filled..]) {
			Ok(0) => return Err(ConnError::Eof),
			Ok(n) => filled += n,
			Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
			Err(e) => return Err(ConnError::Io(e)),
		}
	}
	Ok(())
}

pub fn write_packet<W: Write>(w: &mut W, data: &[u8]) -> ConnResult<()> {
	w.write_u64::<LittleEndian>(data.len() as u64)?;
	w.write_all(data)?;
	Ok(())
}

/// Raw `(kind, packets)` as read off the wire, before per-kind argument
/// decoding.
pub struct RawMessage {
	pub kind: MessageKind,
	pub packets: Vec<Vec<u8>>,
}

pub fn read_message<R: Read>(r: &mut R) -> ConnResult<RawMessage> {
	let mut kind_byte = [0u8; 1];
	read_exact_retrying(r, &mut kind_byte)?;
	let kind = MessageKind::from_wire(kind_byte[0]).ok_or(ConnError::Malformed("unknown message kind"))?;
	let argn = r.read_i64::<LittleEndian>().map_err(ConnError::Io)?;
	if argn < 0 || !kind.valid_argn(argn) {
		return Err(ConnError::Malformed("argument count mismatch"));
	}
	let mut packets = Vec::with_capacity(argn as usize);
	for _ in 0..argn {
		packets.push(read_packet(r)?);
	}
	Ok(RawMessage { kind, packets })
}

/// Writes one message. Atomic at the logical-message level per §4.5: once
/// any byte of the frame is written, a failure is a connection-fatal `Io`
/// error, never silently retried as a partial send.
pub fn write_message<W: Write>(w: &mut W, kind: MessageKind, packets: &[Vec<u8>]) -> ConnResult<()> {
	w.write_u8(kind as u8)?;
	w.write_i64::<LittleEndian>(packets.len() as i64)?;
	for packet in packets {
		write_packet(w, packet)?;
	}
	Ok(())
}

fn encode_i64(n: i64) -> Vec<u8> {
	let mut buf = Vec::with_capacity(8);
	buf.write_i64::<LittleEndian>(n).expect("writing to a Vec never fails");
	buf
}

fn decode_i64(packet: &[u8]) -> ConnResult<i64> {
	let mut cursor: &[u8] = packet;
	cursor.read_i64::<LittleEndian>().map_err(|_| ConnError::Malformed("expected an 8-byte integer packet"))
}

fn path_from_packet(packet: &[u8]) -> ConnResult<FilePath> {
	let raw = std::str::from_utf8(packet).map_err(|_| ConnError::Malformed("path is not valid utf-8"))?;
	FilePath::parse(raw).map_err(|_| ConnError::Malformed("malformed path"))
}

/// Encodes a `Message` into `(kind, packets)`, ready for `write_message`.
pub fn encode(msg: &Message) -> (MessageKind, Vec<Vec<u8>>) {
	match msg {
		Message::Ok { more: None } => (MessageKind::Ok, vec![]),
		Message::Ok { more: Some(n) } => (MessageKind::Ok, vec![encode_i64(*n)]),
		Message::Err { errno } => (MessageKind::Err, vec![encode_i64(errno.wire_value())]),
		Message::Open { path, flags } => (MessageKind::Open, vec![path.as_str().as_bytes().to_vec(), vec![flags.bits()]]),
		Message::Read { path } => (MessageKind::Read, vec![path.as_str().as_bytes().to_vec()]),
		Message::ReadN { n } => (MessageKind::ReadN, vec![encode_i64(*n)]),
		Message::GetF { path, data } => (MessageKind::GetF, vec![path.as_str().as_bytes().to_vec(), data.clone()]),
		Message::Write { path, data } => (MessageKind::Write, vec![path.as_str().as_bytes().to_vec(), data.clone()]),
		Message::Append { path, data } => (MessageKind::Append, vec![path.as_str().as_bytes().to_vec(), data.clone()]),
		Message::Close { path } => (MessageKind::Close, vec![path.as_str().as_bytes().to_vec()]),
		Message::Lock { path } => (MessageKind::Lock, vec![path.as_str().as_bytes().to_vec()]),
		Message::Unlock { path } => (MessageKind::Unlock, vec![path.as_str().as_bytes().to_vec()]),
		Message::Remove { path } => (MessageKind::Remove, vec![path.as_str().as_bytes().to_vec()]),
	}
}

/// Decodes a `RawMessage` into a typed `Message`. `read_message` already
/// validated the argument *count*; this validates each argument's shape.
pub fn decode(raw: RawMessage) -> ConnResult<Message> {
	let RawMessage { kind, packets } = raw;
	Ok(match kind {
		MessageKind::Ok => Message::Ok {
			more: match packets.first() {
				Some(p) => Some(decode_i64(p)?),
				None => None,
			},
		},
		MessageKind::Err => {
			let errno = Errno::from_wire(decode_i64(&packets[0])?).ok_or(ConnError::Malformed("unknown errno"))?;
			Message::Err { errno }
		}
		MessageKind::Open => {
			let path = path_from_packet(&packets[0])?;
			let bits = *packets[1].first().ok_or(ConnError::Malformed("empty open-flags packet"))?;
			let flags = OpenFlags::from_bits(bits).ok_or(ConnError::Malformed("invalid open flags"))?;
			Message::Open { path, flags }
		}
		MessageKind::Read => Message::Read { path: path_from_packet(&packets[0])? },
		MessageKind::ReadN => Message::ReadN { n: decode_i64(&packets[0])? },
		MessageKind::GetF => Message::GetF { path: path_from_packet(&packets[0])?, data: packets[1].clone() },
		MessageKind::Write => Message::Write { path: path_from_packet(&packets[0])?, data: packets[1].clone() },
		MessageKind::Append => Message::Append { path: path_from_packet(&packets[0])?, data: packets[1].clone() },
		MessageKind::Close => Message::Close { path: path_from_packet(&packets[0])? },
		MessageKind::Lock => Message::Lock { path: path_from_packet(&packets[0])? },
		MessageKind::Unlock => Message::Unlock { path: path_from_packet(&packets[0])? },
		MessageKind::Remove => Message::Remove { path: path_from_packet(&packets[0])? },
	})
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use super::*;

	fn roundtrip(msg: Message) {
		let (kind, packets) = encode(&msg);
		let mut buf = Vec::new();
		write_message(&mut buf, kind, &packets).unwrap();
		let mut cursor = Cursor::new(buf);
		let raw = read_message(&mut cursor).unwrap();
		assert_eq!(decode(raw).unwrap(), msg);
	}

	#[test]
	fn roundtrips_every_kind() {
		let path = FilePath::parse("/a/b").unwrap();
		roundtrip(Message::Ok { more: None });
		roundtrip(Message::Ok { more: Some(3) });
		roundtrip(Message::Err { errno: Errno::ENoEnt });
		roundtrip(Message::Open { path: path.clone(), flags: OpenFlags::CREATE | OpenFlags::LOCK });
		roundtrip(Message::Read { path: path.clone() });
		roundtrip(Message::ReadN { n: -1 });
		roundtrip(Message::GetF { path: path.clone(), data: b"hello".to_vec() });
		roundtrip(Message::Write { path: path.clone(), data: b"world".to_vec() });
		roundtrip(Message::Append { path: path.clone(), data: vec![] });
		roundtrip(Message::Close { path: path.clone() });
		roundtrip(Message::Lock { path: path.clone() });
		roundtrip(Message::Unlock { path: path.clone() });
		roundtrip(Message::Remove { path });
	}

	#[test]
	fn rejects_unknown_kind_byte() {
		let mut buf = vec![255u8];
		buf.extend_from_slice(&0i64.to_le_bytes());
		let mut cursor = Cursor::new(buf);
		assert!(matches!(read_message(&mut cursor), Err(ConnError::Malformed(_))));
	}

	#[test]
	fn rejects_wrong_argument_count() {
		let mut buf = vec![MessageKind::Read as u8];
		buf.extend_from_slice(&2i64.to_le_bytes());
		let mut cursor = Cursor::new(buf);
		assert!(matches!(read_message(&mut cursor), Err(ConnError::Malformed(_))));
	}

	#[test]
	fn eof_before_header_is_connection_fatal() {
		let mut cursor = Cursor::new(Vec::<u8>::new());
		assert!(matches!(read_message(&mut cursor), Err(ConnError::Eof)));
	}
}
