//! `fss-cli`: a minimal command-line client, demoing the server end-to-end.
//! Carries no business logic beyond argument parsing and the shared codec.

use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use fss::path::FilePath;
use fss::protocol::codec::{decode, encode, read_message, write_message};
use fss::protocol::message::{Message, OpenFlags};

#[derive(Parser, Debug)]
#[command(name = "fss-cli", about = "Command-line client for fssd")]
struct Args {
	/// Path to the server's UNIX domain socket.
	#[arg(long, default_value = "/tmp/fssd.sock")]
	socket_path: PathBuf,

	#[command(subcommand)]
	op: Op,
}

#[derive(Subcommand, Debug)]
enum Op {
	Open {
		path: String,
		#[arg(long)]
		create: bool,
		#[arg(long)]
		lock: bool,
	},
	Read {
		path: String,
	},
	ReadN {
		#[arg(default_value_t = -1)]
		n: i64,
	},
	Write {
		path: String,
		data: String,
	},
	Append {
		path: String,
		data: String,
	},
	Lock {
		path: String,
	},
	Unlock {
		path: String,
	},
	Remove {
		path: String,
	},
}

fn parse_path(raw: &str) -> Result<FilePath, String> {
	FilePath::parse(raw).map_err(|e| format!("invalid path {:?}: {}", raw, e))
}

fn build_message(op: Op) -> Result<Message, String> {
	Ok(match op {
		Op::Open { path, create, lock } => {
			let mut flags = OpenFlags::empty();
			if create {
				flags |= OpenFlags::CREATE;
			}
			if lock {
				flags |= OpenFlags::LOCK;
			}
			Message::Open { path: parse_path(&path)?, flags }
		}
		Op::Read { path } => Message::Read { path: parse_path(&path)? },
		Op::ReadN { n } => Message::ReadN { n },
		Op::Write { path, data } => Message::Write { path: parse_path(&path)?, data: data.into_bytes() },
		Op::Append { path, data } => Message::Append { path: parse_path(&path)?, data: data.into_bytes() },
		Op::Lock { path } => Message::Lock { path: parse_path(&path)? },
		Op::Unlock { path } => Message::Unlock { path: parse_path(&path)? },
		Op::Remove { path } => Message::Remove { path: parse_path(&path)? },
	})
}

fn print_reply(msg: &Message) {
	match msg {
		Message::Ok { .. } => println!("OK"),
		Message::Err { errno } => println!("ERR {}", errno),
		Message::GetF { path, data } => println!("GETF {} {:?}", path, String::from_utf8_lossy(data)),
		other => println!("{:?}", other),
	}
}

fn run() -> Result<(), String> {
	let args = Args::parse();
	let request = build_message(args.op)?;

	let mut stream =
		UnixStream::connect(&args.socket_path).map_err(|e| format!("connecting to {:?}: {}", args.socket_path, e))?;

	let (kind, packets) = encode(&request);
	write_message(&mut stream, kind, &packets).map_err(|e| format!("sending request: {}", e))?;

	loop {
		let raw = read_message(&mut stream).map_err(|e| format!("reading reply: {}", e))?;
		let is_final = !matches!(raw.kind, fss::protocol::message::MessageKind::GetF);
		let reply = decode(raw).map_err(|e| format!("decoding reply: {}", e))?;
		print_reply(&reply);
		if is_final {
			break;
		}
	}
	Ok(())
}

fn main() -> ExitCode {
	match run() {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			eprintln!("fss-cli: {}", e);
			ExitCode::FAILURE
		}
	}
}
