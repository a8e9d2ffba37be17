//! Tracing subscriber setup: console output plus an optional log file.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

const CRATES: [&str; 3] = ["ratsensor_agent", "ratsensor_core", "ratsensor_store"];

/// Filter used when `RUST_LOG` is not set.
pub fn default_filter(verbose: bool) -> EnvFilter {
    let level = if verbose { "debug" } else { "info" };
    let directives = CRATES
        .iter()
        .map(|c| format!("{}={}", c, level))
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::new(format!("warn,{}", directives))
}

fn filter(verbose: bool) -> EnvFilter {
    if verbose {
        return default_filter(true);
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(false))
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global subscriber.
///
/// A log file that cannot be opened is reported once the console layer is
/// up; the agent keeps running with console output only.
pub fn init(verbose: bool, log_file: Option<&Path>) {
    let mut layers: Vec<Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>> =
        vec![fmt::layer().with_filter(filter(verbose)).boxed()];

    let mut file_error = None;
    if let Some(path) = log_file {
        match open_log_file(path) {
            Ok(file) => layers.push(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(filter(verbose))
                    .boxed(),
            ),
            Err(e) => file_error = Some((path.to_path_buf(), e)),
        }
    }

    if tracing_subscriber::registry().with(layers).try_init().is_err() {
        return;
    }

    if let Some((path, e)) = file_error {
        warn!(
            "Could not open log file {}: {}; logging to console only",
            path.display(),
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_levels() {
        let quiet = default_filter(false).to_string();
        assert!(quiet.contains("ratsensor_agent=info"));
        assert!(quiet.contains("ratsensor_store=info"));

        let verbose = default_filter(true).to_string();
        assert!(verbose.contains("ratsensor_core=debug"));
    }

    #[test]
    fn test_open_log_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log").join("ratsensor.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }
}
