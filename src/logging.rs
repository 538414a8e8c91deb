use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing_subscriber::fmt::MakeWriter;

/// Log file name under `<home>/logs`.
pub const LOG_FILE: &str = "pcfdev.log";

// ── DeferredFileWriter ───────────────────────────────────

/// A `MakeWriter` that discards writes until a file is set via
/// `handle.set_file(path)`.
///
/// The subscriber is installed before the config (and so the home
/// directory) is known; the file is attached once it is.
#[derive(Clone)]
pub struct DeferredFileWriter {
    inner: Arc<Mutex<Option<File>>>,
}

/// Handle returned by `DeferredFileWriter::new()`.
#[derive(Clone)]
pub struct DeferredFileHandle {
    inner: Arc<Mutex<Option<File>>>,
}

impl DeferredFileWriter {
    pub fn new() -> (Self, DeferredFileHandle) {
        let inner = Arc::new(Mutex::new(None));
        (
            Self {
                inner: inner.clone(),
            },
            DeferredFileHandle { inner },
        )
    }
}

fn lock(inner: &Mutex<Option<File>>) -> io::Result<MutexGuard<'_, Option<File>>> {
    inner
        .lock()
        .map_err(|_| io::Error::other("log file lock poisoned"))
}

impl DeferredFileHandle {
    /// Start appending to `path`, creating its directory.
    pub fn set_file(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *lock(&self.inner)? = Some(file);
        Ok(())
    }
}

/// Writer returned by `MakeWriter::make_writer`.
pub struct DeferredWriter {
    inner: Arc<Mutex<Option<File>>>,
}

impl io::Write for DeferredWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match lock(&self.inner)?.as_mut() {
            Some(f) => f.write(buf),
            None => Ok(buf.len()), // discard
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match lock(&self.inner)?.as_mut() {
            Some(f) => f.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for DeferredFileWriter {
    type Writer = DeferredWriter;

    fn make_writer(&'a self) -> Self::Writer {
        DeferredWriter {
            inner: self.inner.clone(),
        }
    }
}
