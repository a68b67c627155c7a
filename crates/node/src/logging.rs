//! Runtime logging control.
//!
//! The subscriber is installed once per process. Every node start re-applies
//! the node's [`LogConfig`]: the level filter is swapped through a reload
//! handle and output is switched between stdout and a non-blocking file
//! writer.

use crate::error::LogError;
use parking_lot::RwLock;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};
use walletd_types::LogConfig;

enum LogTarget {
    Stdout,
    File {
        path: PathBuf,
        writer: NonBlocking,
        // Flushes pending lines when the target is replaced.
        _guard: WorkerGuard,
    },
}

/// Writer factory that follows the current [`LogTarget`].
#[derive(Clone)]
pub struct LogWriter {
    target: Arc<RwLock<LogTarget>>,
}

/// A single writer handed out by [`LogWriter`].
pub enum LogOutput {
    Stdout(io::Stdout),
    File(NonBlocking),
}

impl Write for LogOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            LogOutput::Stdout(out) => out.write(buf),
            LogOutput::File(out) => out.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            LogOutput::Stdout(out) => out.flush(),
            LogOutput::File(out) => out.flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = LogOutput;

    fn make_writer(&'a self) -> Self::Writer {
        match &*self.target.read() {
            LogTarget::Stdout => LogOutput::Stdout(io::stdout()),
            LogTarget::File { writer, .. } => LogOutput::File(writer.clone()),
        }
    }
}

/// Handle for changing level and output of the installed subscriber.
pub struct LogControl {
    filter: reload::Handle<EnvFilter, Registry>,
    target: Arc<RwLock<LogTarget>>,
    level: RwLock<String>,
}

impl LogControl {
    /// Build a control handle and the subscriber it drives.
    ///
    /// The caller decides how to install the subscriber; tests scope it with
    /// `tracing::subscriber::with_default`.
    pub fn build(
        default_level: &str,
    ) -> Result<(Self, impl Subscriber + Send + Sync + 'static), LogError> {
        let filter = parse_filter(default_level)?;
        let (filter_layer, filter_handle) = reload::Layer::new(filter);

        let target = Arc::new(RwLock::new(LogTarget::Stdout));
        let writer = LogWriter {
            target: Arc::clone(&target),
        };

        let subscriber = Registry::default()
            .with(filter_layer)
            .with(fmt::layer().with_target(true).with_writer(writer));

        let control = Self {
            filter: filter_handle,
            target,
            level: RwLock::new(default_level.to_string()),
        };
        Ok((control, subscriber))
    }

    /// Build and install as the global default subscriber.
    pub fn install(default_level: &str) -> Result<Self, LogError> {
        let (control, subscriber) = Self::build(default_level)?;
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|_| LogError::AlreadyInstalled)?;
        Ok(control)
    }

    /// Apply a node's logging configuration.
    ///
    /// An invalid level is an error and changes nothing. A log file that
    /// cannot be opened is not: output falls back to stdout.
    pub fn apply(&self, config: &LogConfig) -> Result<(), LogError> {
        let filter = parse_filter(&config.level)?;
        self.filter
            .reload(filter)
            .map_err(|e| LogError::Reload(e.to_string()))?;
        *self.level.write() = config.level.clone();

        let next = match &config.file {
            Some(path) => match open_log_file(path) {
                Ok(file) => {
                    let (writer, guard) = tracing_appender::non_blocking(file);
                    LogTarget::File {
                        path: path.clone(),
                        writer,
                        _guard: guard,
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to open log file, using stdout");
                    LogTarget::Stdout
                }
            },
            None => LogTarget::Stdout,
        };

        let previous = std::mem::replace(&mut *self.target.write(), next);
        // Dropped outside the lock: the guard blocks until its worker drains.
        drop(previous);

        info!(level = %config.level, file = ?self.log_file(), "Logging configured");
        Ok(())
    }

    /// Currently applied level directive.
    pub fn level(&self) -> String {
        self.level.read().clone()
    }

    /// Currently open log file, if output is not stdout.
    pub fn log_file(&self) -> Option<PathBuf> {
        match &*self.target.read() {
            LogTarget::Stdout => None,
            LogTarget::File { path, .. } => Some(path.clone()),
        }
    }
}

impl std::fmt::Debug for LogControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogControl")
            .field("level", &self.level())
            .field("file", &self.log_file())
            .finish()
    }
}

fn parse_filter(directive: &str) -> Result<EnvFilter, LogError> {
    EnvFilter::try_new(directive).map_err(|source| LogError::InvalidFilter {
        directive: directive.to_string(),
        source,
    })
}

fn open_log_file(path: &Path) -> io::Result<fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_switches_to_file_and_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("node.log");
        let (control, subscriber) = LogControl::build("info").unwrap();

        tracing::subscriber::with_default(subscriber, || {
            control
                .apply(&LogConfig {
                    level: "debug".into(),
                    file: Some(path.clone()),
                })
                .unwrap();
            assert_eq!(control.level(), "debug");
            assert_eq!(control.log_file(), Some(path.clone()));

            tracing::debug!(marker = "file-line", "written to file");

            // Switching back drops the file worker and flushes it.
            control.apply(&LogConfig::default()).unwrap();
            assert!(control.log_file().is_none());
            assert_eq!(control.level(), "info");
        });

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("file-line"));
    }

    #[test]
    fn test_unopenable_file_falls_back_to_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let (control, subscriber) = LogControl::build("info").unwrap();

        tracing::subscriber::with_default(subscriber, || {
            // A directory cannot be opened for appending.
            let result = control.apply(&LogConfig {
                level: "warn".into(),
                file: Some(dir.path().to_path_buf()),
            });
            assert!(result.is_ok());
            assert!(control.log_file().is_none());
            assert_eq!(control.level(), "warn");
        });
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        let (control, _subscriber) = LogControl::build("info").unwrap();
        let result = control.apply(&LogConfig {
            level: "walletd=loud".into(),
            file: None,
        });
        assert!(matches!(result, Err(LogError::InvalidFilter { .. })));
        assert_eq!(control.level(), "info");

        assert!(LogControl::build("walletd=loud").is_err());
    }
}
