use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_PATH: &str = "/tmp/deploy.log";

// Quiet by default: a successful prd run prints nothing.
const DEFAULT_FILTER: &str = "warn";

/// Copies every log line to a console stream and, when available, a log file.
pub struct TeeWriter<W> {
    console: W,
    file: Option<Arc<Mutex<File>>>,
}

impl<W: Write> TeeWriter<W> {
    pub fn new(console: W, file: Option<Arc<Mutex<File>>>) -> Self {
        Self { console, file }
    }
}

impl<W: Write> Write for TeeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.console.write_all(buf)?;
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.console.flush()?;
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

pub fn resolve_log_path(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    lookup("DEPLOY_LOG_PATH")
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_PATH))
}

pub fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory {}", parent.display()))?;
        }
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open deploy log file {}", path.display()))
}

/// Installs the global subscriber and returns the log file path in use.
pub fn init() -> PathBuf {
    let log_path = resolve_log_path(|name| std::env::var(name).ok());
    let file_writer = match open_log_file(&log_path) {
        Ok(file) => Some(Arc::new(Mutex::new(file))),
        Err(err) => {
            eprintln!("deploy: could not enable file logging at {}: {err:#}", log_path.display());
            None
        }
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .with_writer(move || TeeWriter::new(io::stderr(), file_writer.clone()))
        .init();

    log_path
}
