//! Framed wire protocol: message kinds/argument tables (`message`) and
//! packet/message (de)serialization over a byte stream (`codec`).

pub mod codec;
pub mod message;

pub use codec::{decode, encode, read_message, write_message, RawMessage};
pub use message::{Message, MessageKind, OpenFlags};
