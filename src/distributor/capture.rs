//! Recording distributor: one JSON line per envelope.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chill_bus::{Distributor, Envelope, MessageListener};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

struct Sink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

/// Appends every envelope it sees to a capture file, or does nothing when
/// disabled.
pub struct CaptureDistributor {
    sink: Option<Sink>,
    written: AtomicU64,
    shut_down: AtomicBool,
}

impl CaptureDistributor {
    pub fn disabled() -> Self {
        Self {
            sink: None,
            written: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Capture to `path`, appending if it already exists.
    pub fn to_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), "capturing messages");
        Ok(Self {
            sink: Some(Sink {
                path,
                writer: Mutex::new(BufWriter::new(file)),
            }),
            written: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.sink.as_ref().map(|s| s.path.as_path())
    }

    /// Records written so far.
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    fn write(sink: &Sink, envelope: &Envelope) -> io::Result<()> {
        let mut writer = sink.writer.lock();
        serde_json::to_writer(&mut *writer, envelope)?;
        writer.write_all(b"\n")
    }
}

impl Default for CaptureDistributor {
    fn default() -> Self {
        Self::disabled()
    }
}

impl MessageListener for CaptureDistributor {
    fn on_message(&self, envelope: &Envelope) {
        let Some(sink) = &self.sink else {
            return;
        };
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        match Self::write(sink, envelope) {
            Ok(()) => {
                self.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => debug!(error = %e, "failed to capture message"),
        }
    }
}

impl Distributor for CaptureDistributor {
    fn start(&self) {
        self.shut_down.store(false, Ordering::SeqCst);
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(sink) = &self.sink else {
            return;
        };
        if let Err(e) = sink.writer.lock().flush() {
            warn!(path = %sink.path.display(), error = %e, "failed to flush capture file");
        }
        info!(
            path = %sink.path.display(),
            written = self.written(),
            "capture closed"
        );
    }
}
