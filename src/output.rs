//! Output backends for status snapshots.

use std::path::PathBuf;

use chill_types::StatusSnapshot;
use tokio::sync::mpsc;

/// Where a [`StatusReporter`](crate::StatusReporter) sends snapshots.
#[derive(Debug)]
pub enum Output {
    /// Write snapshots to a JSON file.
    ///
    /// The file is overwritten with each snapshot.
    File(PathBuf),

    /// Send snapshots to a TCP server as newline-delimited JSON.
    Tcp(String),

    /// Send snapshots through a channel.
    ///
    /// Use `Output::channel()` to create this variant and get the receiver.
    Channel(mpsc::Sender<StatusSnapshot>),
}

impl Output {
    /// Create a file output.
    ///
    /// # Example
    ///
    /// ```rust
    /// use chill_monitor::Output;
    ///
    /// let output = Output::file("status.json");
    /// ```
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Output::File(path.into())
    }

    pub fn tcp(addr: impl Into<String>) -> Self {
        Output::Tcp(addr.into())
    }

    /// Create a channel output and return both the output and receiver.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use chill_bus::MemoryBus;
    /// use chill_monitor::{MonitorConfig, Output, StatusReporter, SubscriptionController};
    ///
    /// # tokio_test::block_on(async {
    /// let (output, mut rx) = Output::channel(16);
    /// let controller =
    ///     SubscriptionController::builder(MonitorConfig::default(), Arc::new(MemoryBus::new()))
    ///         .build();
    /// let reporter = StatusReporter::builder(controller).output(output).build();
    ///
    /// reporter.emit_now().await;
    /// let snapshot = rx.recv().await.unwrap();
    /// assert_eq!(snapshot.receipt_count, 0);
    /// # });
    /// ```
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<StatusSnapshot>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Output::Channel(tx), rx)
    }

    /// Emit a snapshot to this output.
    pub(crate) async fn emit(&self, snapshot: &StatusSnapshot) -> std::io::Result<()> {
        match self {
            Output::File(path) => {
                let json = serde_json::to_string_pretty(snapshot)?;
                tokio::fs::write(path, json).await?;
            }
            Output::Tcp(addr) => {
                use tokio::io::AsyncWriteExt;
                use tokio::net::TcpStream;

                // Best effort: a missing listener is not an error
                if let Ok(mut stream) = TcpStream::connect(addr).await {
                    let mut json = serde_json::to_vec(snapshot)?;
                    json.push(b'\n');
                    let _ = stream.write_all(&json).await;
                }
            }
            Output::Channel(tx) => {
                // Never block the reporter on a slow consumer
                let _ = tx.try_send(snapshot.clone());
            }
        }
        Ok(())
    }
}
