//! Setup of [tracing] subscribers for simulations built on this crate.
use crate::SystemError;
use tracing_subscriber::{filter, prelude::*};

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

/// Install a global subscriber.
///
/// Events of level `INFO` and above are printed to stdout in the human-readable "pretty"
/// format. If `log_file` is given, all events are additionally written to this file.
/// Fails if a global subscriber was already set.
pub fn init_tracing(log_file: Option<&Path>) -> Result<(), SystemError> {
    let stdout_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_line_number(true)
        .with_level(true);
    let debug_log = match log_file {
        Some(path) => Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(File::create(path)?)),
        ),
        None => None,
    };
    tracing_subscriber::registry()
        .with(
            stdout_log
                .with_filter(filter::LevelFilter::INFO)
                .and_then(debug_log),
        )
        .try_init()
        .map_err(|e| SystemError::IoError(std::io::Error::other(e)))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn logs_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debug.log");
        init_tracing(Some(&path)).unwrap();
        tracing::debug!("solver ready");
        assert!(path.exists());
        assert!(init_tracing(None).is_err());
    }
}
