//! Distributor for channel telemetry (EHA and alarms).
//!
//! Channel traffic is the heaviest stream, so delivery threads only enqueue
//! and a single worker hands envelopes to the sinks in arrival order. The
//! enqueue never blocks: a full queue drops the envelope and counts it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chill_bus::{Distributor, Envelope, MessageListener};
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use tracing::{error, info, warn};

type Sinks = Arc<RwLock<Vec<Arc<dyn MessageListener>>>>;

struct Worker {
    stop: Sender<()>,
    join: JoinHandle<()>,
}

pub struct ChannelDistributor {
    tx: Sender<Envelope>,
    rx: Receiver<Envelope>,
    sinks: Sinks,
    worker: Mutex<Option<Worker>>,
    dropped: AtomicU64,
    delivered: Arc<AtomicU64>,
    shut_down: AtomicBool,
}

impl ChannelDistributor {
    pub const DEFAULT_QUEUE_SIZE: usize = 8192;

    pub fn new(queue_size: usize) -> Self {
        let (tx, rx) = bounded(queue_size.max(1));
        Self {
            tx,
            rx,
            sinks: Arc::new(RwLock::new(Vec::new())),
            worker: Mutex::new(None),
            dropped: AtomicU64::new(0),
            delivered: Arc::new(AtomicU64::new(0)),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn add_sink(&self, sink: Arc<dyn MessageListener>) {
        self.sinks.write().push(sink);
    }

    /// Envelopes waiting for the worker.
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }
}

impl Default for ChannelDistributor {
    fn default() -> Self {
        Self::new(Self::DEFAULT_QUEUE_SIZE)
    }
}

impl MessageListener for ChannelDistributor {
    fn on_message(&self, envelope: &Envelope) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        match self.tx.try_send(envelope.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    warn!(dropped, "channel distributor queue full, dropping telemetry");
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl Distributor for ChannelDistributor {
    fn start(&self) {
        let mut worker = self.worker.lock();
        self.shut_down.store(false, Ordering::SeqCst);
        if worker.is_some() {
            return;
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let rx = self.rx.clone();
        let sinks = self.sinks.clone();
        let delivered = self.delivered.clone();
        let spawned = thread::Builder::new()
            .name("chill-channel".to_string())
            .spawn(move || worker_loop(rx, stop_rx, sinks, delivered));

        match spawned {
            Ok(join) => {
                *worker = Some(Worker {
                    stop: stop_tx,
                    join,
                });
                info!("channel distributor started");
            }
            Err(e) => error!(error = %e, "failed to spawn channel distributor worker"),
        }
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.stop.try_send(());
            if worker.join.join().is_err() {
                error!("channel distributor worker panicked");
            }
        }
        info!(
            delivered = self.delivered(),
            dropped = self.dropped(),
            "channel distributor shut down"
        );
    }
}

fn worker_loop(rx: Receiver<Envelope>, stop_rx: Receiver<()>, sinks: Sinks, delivered: Arc<AtomicU64>) {
    let deliver = |envelope: Envelope| {
        let sinks = sinks.read().clone();
        for sink in &sinks {
            sink.on_message(&envelope);
        }
        delivered.fetch_add(1, Ordering::Relaxed);
    };

    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(envelope) => deliver(envelope),
                Err(_) => break,
            },
            recv(stop_rx) -> _ => {
                for envelope in rx.try_iter() {
                    deliver(envelope);
                }
                break;
            }
        }
    }
}
