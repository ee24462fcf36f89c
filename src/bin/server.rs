//! `fssd`: the storage server binary. Parses configuration, initializes
//! logging, binds the socket, and runs the server until a shutdown signal.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::net::UnixListener;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::Parser;
use log::{info, warn};

use fss::config::{Cli, Config};
use fss::fss::Storage;
use fss::server::Server;

fn init_logging(config: &Config) {
	let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
	if let Some(path) = &config.log_file_path {
		match OpenOptions::new().create(true).append(true).open(path) {
			Ok(file) => {
				builder.target(env_logger::Target::Pipe(Box::new(file)));
			}
			Err(e) => {
				// The logger isn't initialized yet; this has to go to stderr directly.
				eprintln!("warning: could not open log_file_path {:?} ({}), logging to stderr", path, e);
			}
		}
	}
	builder.init();
}

fn run() -> Result<(), String> {
	let cli = Cli::parse();
	let mut config = Config::load(cli.config.as_deref()).map_err(|e| format!("loading configuration: {}", e))?;
	config.apply_cli(&cli);
	config.validate().map_err(|e| format!("invalid configuration: {}", e))?;

	init_logging(&config);
	info!(target: "fss::server", "starting with config: {:?}", config);

	if std::fs::remove_file(&config.socket_path).is_ok() {
		warn!(target: "fss::server", "removed stale socket at {:?}", config.socket_path);
	}
	let listener = UnixListener::bind(&config.socket_path)
		.map_err(|e| format!("binding socket {:?}: {}", config.socket_path, e))?;

	let storage = Arc::new(Storage::new(config.max_bytes, config.max_files));
	let server = Server::new(storage);
	let shutdown = server.shutdown_handle();
	ctrlc::set_handler(move || {
		shutdown.store(true, Ordering::Release);
	})
	.map_err(|e| format!("installing signal handler: {}", e))?;

	server.run(listener, config.n_workers).map_err(|e| format!("server loop: {}", e))?;

	if std::fs::remove_file(&config.socket_path).is_err() {
		warn!(target: "fss::server", "could not remove socket at {:?} during shutdown", config.socket_path);
	}
	Ok(())
}

fn main() -> ExitCode {
	match run() {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			// May fire before `init_logging` runs (e.g. a bad config file),
			// so this goes straight to stderr rather than through `log`.
			eprintln!("fssd: fatal: {}", e);
			let _ = std::io::stderr().flush();
			ExitCode::FAILURE
		}
	}
}
