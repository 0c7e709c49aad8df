//! Periodic status reporting.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::controller::SubscriptionController;
use crate::output::Output;

/// Periodically collects a controller's status and emits it to outputs.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use chill_bus::MemoryBus;
/// use chill_monitor::{MonitorConfig, Output, StatusReporter, SubscriptionController};
///
/// #[tokio::main]
/// async fn main() {
///     let controller =
///         SubscriptionController::builder(MonitorConfig::default(), Arc::new(MemoryBus::new()))
///             .build();
///
///     let reporter = StatusReporter::builder(controller)
///         .output(Output::file("status.json"))
///         .interval(Duration::from_secs(1))
///         .build();
///
///     let handle = reporter.start();
///     tokio::time::sleep(Duration::from_secs(5)).await;
///     handle.stop();
/// }
/// ```
pub struct StatusReporter {
    controller: Arc<SubscriptionController>,
    outputs: Arc<Vec<Output>>,
    interval: Duration,
}

impl StatusReporter {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

    pub fn builder(controller: Arc<SubscriptionController>) -> StatusReporterBuilder {
        StatusReporterBuilder::new(controller)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start background emission.
    ///
    /// Spawns a tokio task that emits a snapshot every interval, the first
    /// one immediately. Must be called from within a tokio runtime.
    pub fn start(&self) -> EmissionHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let controller = self.controller.clone();
        let outputs = self.outputs.clone();
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        emit(&controller, &outputs).await;
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("status reporting stopped");
        });

        EmissionHandle { stop_tx, task }
    }

    /// Emit a snapshot to all outputs immediately.
    pub async fn emit_now(&self) {
        emit(&self.controller, &self.outputs).await;
    }
}

async fn emit(controller: &SubscriptionController, outputs: &[Output]) {
    let snapshot = controller.status();
    for output in outputs {
        if let Err(e) = output.emit(&snapshot).await {
            debug!(error = %e, "failed to emit status");
        }
    }
}

/// Builder for a [`StatusReporter`].
pub struct StatusReporterBuilder {
    controller: Arc<SubscriptionController>,
    outputs: Vec<Output>,
    interval: Option<Duration>,
}

impl StatusReporterBuilder {
    pub fn new(controller: Arc<SubscriptionController>) -> Self {
        Self {
            controller,
            outputs: Vec::new(),
            interval: None,
        }
    }

    /// Add an output destination.
    ///
    /// Multiple outputs can be added; snapshots will be emitted to all of them.
    pub fn output(mut self, output: Output) -> Self {
        self.outputs.push(output);
        self
    }

    /// Defaults to 1 second if not specified.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn build(self) -> StatusReporter {
        StatusReporter {
            controller: self.controller,
            outputs: Arc::new(self.outputs),
            interval: self.interval.unwrap_or(StatusReporter::DEFAULT_INTERVAL),
        }
    }
}

/// Handle for controlling background emission.
///
/// Drop this handle to stop emission, or call `stop()` explicitly.
pub struct EmissionHandle {
    stop_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl EmissionHandle {
    /// Stop background emission.
    pub fn stop(self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stop background emission and wait for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.task.await;
    }
}
