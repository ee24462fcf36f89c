//! In-memory, content-addressable file storage server.
//!
//! `fss` (the engine, `fss::fss::Storage`) never touches a socket; `server`
//! wires it to a local stream socket through the `protocol` codec and
//! `dispatch`'s thin request translation. See `SPEC_FULL.md` for the full
//! design.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod fss;
pub mod path;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod sync;
