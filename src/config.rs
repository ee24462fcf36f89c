//! Server configuration: defaults, TOML file, CLI overrides.
//!
//! Mirrors §6's external-interface field list verbatim. Grounded in
//! `hahatianx-lumo/server/src/config/app_config.rs`'s shape (a
//! `serde`-deserializable struct with every field optional, a `merge`-style
//! precedence layer on top) rather than anything in the teacher, which has
//! no configuration file at all.

use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

use crate::error::{FssError, FssResult};

/// CLI overlay (§12): `--config` selects the TOML file; the remaining flags
/// override whichever of its fields are most commonly tuned at the command
/// line. CLI > file > built-in defaults.
#[derive(Parser, Debug)]
#[command(name = "fssd", about = "In-memory content-addressable file storage server")]
pub struct Cli {
	/// Path to a TOML configuration file.
	#[arg(long)]
	pub config: Option<PathBuf>,
	#[arg(long)]
	pub socket_path: Option<PathBuf>,
	#[arg(long)]
	pub n_workers: Option<usize>,
	#[arg(long)]
	pub max_files: Option<usize>,
	#[arg(long)]
	pub max_bytes: Option<usize>,
}

/// One field per §6 external interface entry. Every field is optional here
/// so a config file only needs to name what it's overriding; `Config::load`
/// fills the rest from `Defaults`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
	pub socket_path: Option<PathBuf>,
	pub log_file_path: Option<PathBuf>,
	pub n_workers: Option<usize>,
	pub max_files: Option<usize>,
	pub max_bytes: Option<usize>,
	pub max_clients_at_start: Option<usize>,
	pub socket_backlog: Option<i32>,
	pub hash_buckets: Option<usize>,
}

/// The resolved configuration a server actually runs with: every field
/// present, CLI overrides already folded in over the file, which was
/// already folded in over built-in defaults.
#[derive(Debug, Clone)]
pub struct Config {
	pub socket_path: PathBuf,
	pub log_file_path: Option<PathBuf>,
	pub n_workers: usize,
	pub max_files: usize,
	pub max_bytes: usize,
	pub max_clients_at_start: usize,
	pub socket_backlog: i32,
	pub hash_buckets: usize,
}

impl Default for Config {
	fn default() -> Config {
		Config {
			socket_path: PathBuf::from("/tmp/fssd.sock"),
			log_file_path: None,
			n_workers: 4,
			max_files: 1024,
			max_bytes: 64 * 1024 * 1024,
			max_clients_at_start: 64,
			socket_backlog: 128,
			hash_buckets: 256,
		}
	}
}

impl Config {
	/// Reads a TOML file, if given, and layers it over `Config::default()`.
	/// Missing file path, or an unset field within a present file, falls
	/// back to the default.
	pub fn load(path: Option<&std::path::Path>) -> FssResult<Config> {
		let mut config = Config::default();
		if let Some(path) = path {
			let text = std::fs::read_to_string(path).map_err(|_| FssError::Invalid)?;
			let file: FileConfig = toml::from_str(&text).map_err(|_| FssError::Invalid)?;
			config.apply(file);
		}
		Ok(config)
	}

	fn apply(&mut self, file: FileConfig) {
		if let Some(v) = file.socket_path {
			self.socket_path = v;
		}
		if let Some(v) = file.log_file_path {
			self.log_file_path = Some(v);
		}
		if let Some(v) = file.n_workers {
			self.n_workers = v;
		}
		if let Some(v) = file.max_files {
			self.max_files = v;
		}
		if let Some(v) = file.max_bytes {
			self.max_bytes = v;
		}
		if let Some(v) = file.max_clients_at_start {
			self.max_clients_at_start = v;
		}
		if let Some(v) = file.socket_backlog {
			self.socket_backlog = v;
		}
		if let Some(v) = file.hash_buckets {
			self.hash_buckets = v;
		}
	}

	/// Folds CLI overrides on top of whatever `load` already resolved.
	pub fn apply_cli(&mut self, cli: &Cli) {
		if let Some(v) = &cli.socket_path {
			self.socket_path = v.clone();
		}
		if let Some(v) = cli.n_workers {
			self.n_workers = v;
		}
		if let Some(v) = cli.max_files {
			self.max_files = v;
		}
		if let Some(v) = cli.max_bytes {
			self.max_bytes = v;
		}
	}

	/// Rejects configuration that would never let the server start
	/// correctly (§12): zero workers, zero capacity, a relative
	/// `socket_path`.
	pub fn validate(&self) -> FssResult<()> {
		if self.n_workers == 0 || self.max_files == 0 || self.max_bytes == 0 {
			return Err(FssError::Invalid);
		}
		if self.socket_path.is_relative() {
			return Err(FssError::Invalid);
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn defaults_are_valid() { Config::default().validate().unwrap(); }

	#[test]
	fn load_with_no_path_is_defaults() {
		let config = Config::load(None).unwrap();
		assert_eq!(config.n_workers, Config::default().n_workers);
	}

	#[test]
	fn file_overrides_layer_over_defaults() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "n_workers = 8\nsocket_path = \"/run/fssd.sock\"").unwrap();
		let config = Config::load(Some(file.path())).unwrap();
		assert_eq!(config.n_workers, 8);
		assert_eq!(config.socket_path, PathBuf::from("/run/fssd.sock"));
		assert_eq!(config.max_files, Config::default().max_files);
	}

	#[test]
	fn rejects_zero_workers() {
		let mut config = Config::default();
		config.n_workers = 0;
		assert_eq!(config.validate(), Err(FssError::Invalid));
	}

	#[test]
	fn rejects_relative_socket_path() {
		let mut config = Config::default();
		config.socket_path = PathBuf::from("relative.sock");
		assert_eq!(config.validate(), Err(FssError::Invalid));
	}
}
