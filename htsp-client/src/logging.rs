//! Logger setup for applications embedding the client.
//!
//! The library itself only emits through the `log` facade. Hosts that have
//! no logger of their own can call [`init_logging`] to get timestamped
//! output on stderr or appended to a file.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{error, info, LevelFilter};
use once_cell::sync::OnceCell;

/// Destination chosen by the first successful [`init_logging`] call.
static LOG_TARGET: OnceCell<Option<PathBuf>> = OnceCell::new();

/// Initialize the global logger.
///
/// `RUST_LOG` overrides the default level. When `log_file` is given, output
/// is appended to it instead of stderr. Returns `false` if the file cannot
/// be opened; later calls are no-ops returning `true`.
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> bool {
    if LOG_TARGET.get().is_some() {
        return true;
    }

    let default_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(default_level)
        .parse_default_env()
        .format(|buf, record| {
            let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            writeln!(
                buf,
                "[{}] [{:<5}] {}: {}",
                timestamp,
                record.level(),
                record.target(),
                record.args()
            )
        });

    if let Some(path) = log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!("Failed to open log file {:?}: {}", path, e);
                return false;
            }
        }
    }

    if builder.try_init().is_err() {
        // Another logger owns the facade; keep using it.
        let _ = LOG_TARGET.set(None);
        return true;
    }

    let _ = LOG_TARGET.set(log_file.map(Path::to_path_buf));
    match log_file {
        Some(path) => info!("Logging to {:?}", path),
        None => info!("Logging to stderr"),
    }
    true
}

/// Log file in use, if [`init_logging`] was given one.
pub fn log_file() -> Option<&'static Path> {
    LOG_TARGET.get().and_then(|p| p.as_deref())
}

/// Route panics of client threads through the logger.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let thread = std::thread::current();
        let name = thread.name().unwrap_or("<unnamed>");
        match info.location() {
            Some(location) => error!(
                "[PANIC] thread '{}' at {}:{}:{}: {}",
                name,
                location.file(),
                location.line(),
                location.column(),
                info
            ),
            None => error!("[PANIC] thread '{}': {}", name, info),
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        assert!(init_logging(false, None));
        assert!(init_logging(true, None));
        assert!(log_file().is_none());
    }
}
