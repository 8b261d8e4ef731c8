use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

// ── Subscriber setup ─────────────────────────────────────

/// Install the global subscriber: a stderr layer for the operator and an
/// operations-log layer that stays silent until [`OpsLogHandle::open`].
pub fn init(verbose: bool) -> OpsLogHandle {
    let terminal_filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cirrus=warn"))
    };

    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(terminal_filter);

    let (writer, handle) = OpsLogWriter::new();
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(EnvFilter::new("cirrus=debug"));

    tracing_subscriber::registry()
        .with(terminal_layer)
        .with(file_layer)
        .init();

    handle
}

// ── OpsLogWriter ─────────────────────────────────────────

type Slot = Arc<Mutex<Option<File>>>;

fn lock(slot: &Slot) -> MutexGuard<'_, Option<File>> {
    // A panic while holding the lock leaves the file usable.
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// `MakeWriter` for the operations log. Events are dropped until the
/// handle opens a file, because the VM root is only known after settings
/// and flags are resolved.
#[derive(Clone)]
pub struct OpsLogWriter {
    slot: Slot,
}

/// Activates the paired [`OpsLogWriter`].
#[derive(Clone)]
pub struct OpsLogHandle {
    slot: Slot,
}

impl OpsLogWriter {
    pub fn new() -> (Self, OpsLogHandle) {
        let slot: Slot = Arc::new(Mutex::new(None));
        (Self { slot: slot.clone() }, OpsLogHandle { slot })
    }
}

impl OpsLogHandle {
    /// Start appending to `path`, creating it and its parent as needed.
    pub fn open(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *lock(&self.slot) = Some(file);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        lock(&self.slot).is_some()
    }
}

pub struct OpsLogEntry {
    slot: Slot,
}

impl Write for OpsLogEntry {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match lock(&self.slot).as_mut() {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match lock(&self.slot).as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for OpsLogWriter {
    type Writer = OpsLogEntry;

    fn make_writer(&'a self) -> Self::Writer {
        OpsLogEntry {
            slot: self.slot.clone(),
        }
    }
}
