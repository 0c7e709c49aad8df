use std::future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chill_bus::MemoryBus;
use chill_monitor::duration::{format_duration, parse_duration};
use chill_monitor::simulate::{schedule_outage, Outage, TrafficGenerator};
use chill_monitor::{
    resolve_topics, CaptureDistributor, ControllerError, Distributors, MonitorConfig, Output,
    StatusReporter, SubscriptionController,
};
use chill_types::StatusSnapshot;

#[derive(Parser, Debug)]
#[command(name = "chill-monitor")]
#[command(about = "Subscribe to a monitoring session's message-bus topics and report receive statistics")]
struct Args {
    /// Session configuration file (TOML). CHILL__SECTION__KEY variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subscription topic; repeat to subscribe to several. Replaces the configured list.
    #[arg(short, long = "topic")]
    topics: Vec<String>,

    /// Print the resolved topic set and exit
    #[arg(long)]
    print_topics: bool,

    /// Write a JSON status snapshot to this file every interval
    #[arg(short, long)]
    report: Option<PathBuf>,

    /// Status reporting interval (e.g., "1s", "500ms")
    #[arg(short, long, default_value = "1s", value_parser = parse_duration)]
    interval: Duration,

    /// How long to run (e.g., "30s", "5m"); runs until Ctrl-C when omitted
    #[arg(long, value_parser = parse_duration)]
    duration: Option<Duration>,

    /// Synthetic messages per second per topic
    #[arg(long, default_value = "10")]
    rate: u32,

    /// Take the bus down after this long (e.g., "10s")
    #[arg(long, value_parser = parse_duration)]
    outage_after: Option<Duration>,

    /// Length of the simulated outage
    #[arg(long, default_value = "15s", value_parser = parse_duration, requires = "outage_after")]
    outage_for: Duration,

    /// Append every received message to this file as JSON lines
    #[arg(long)]
    capture: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, conflicts_with = "quiet")]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let mut config = MonitorConfig::load(args.config.as_deref()).with_context(|| match &args.config {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Failed to load configuration".to_string(),
    })?;
    if !args.topics.is_empty() {
        config.context.subscription_topics = args.topics.clone();
        config.validate().context("Invalid --topic")?;
    }

    if args.print_topics {
        for topic in resolve_topics(&config) {
            println!("{}", topic);
        }
        return Ok(());
    }

    run(args, config)
}

fn init_logging(args: &Args) {
    let level = if args.debug {
        "debug"
    } else if args.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Run a session against the in-process bus with synthetic traffic
fn run(args: Args, config: MonitorConfig) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;

    let bus = MemoryBus::new();
    let mut distributors = Distributors::new(config.subscriber.channel_queue_size);
    if let Some(path) = &args.capture {
        let capture = CaptureDistributor::to_file(path)
            .with_context(|| format!("Failed to open capture file {}", path.display()))?;
        distributors = distributors.with_capture(capture);
    }

    let controller = SubscriptionController::builder(config.clone(), Arc::new(bus.clone()))
        .distributors(distributors)
        .build();
    controller.create_subscriptions()?;
    controller.start_message_receipt()?;

    let mut reporter = StatusReporter::builder(controller.clone()).interval(args.interval);
    if let Some(path) = &args.report {
        reporter = reporter.output(Output::file(path));
    }
    let reporter = reporter.build();

    let fatal = rt.block_on(async {
        let emission = reporter.start();
        let traffic = TrafficGenerator::new(bus.clone(), controller.subscribed_topics(), args.rate)
            .for_session(&config)
            .start();
        let outage = args.outage_after.map(|after| {
            schedule_outage(
                bus.clone(),
                Outage {
                    after,
                    length: args.outage_for,
                },
            )
        });

        let fatal = watch(&controller, args.duration).await;

        traffic.abort();
        if let Some(outage) = outage {
            outage.abort();
        }
        emission.shutdown().await;
        fatal
    });

    controller.close_subscriptions();
    rt.block_on(reporter.emit_now());
    print_summary(&controller.status());

    match fatal {
        Some(e) => Err(e).context("Monitoring session failed"),
        None => Ok(()),
    }
}

/// Wait for Ctrl-C, the end of the run, or a fatal controller error
async fn watch(controller: &SubscriptionController, duration: Option<Duration>) -> Option<ControllerError> {
    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut poll = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, closing subscriptions");
                return None;
            }
            _ = &mut deadline => {
                info!("run finished, closing subscriptions");
                return None;
            }
            _ = poll.tick() => {
                if let Some(e) = controller.take_fatal_error() {
                    warn!(error = %e, "stopping after fatal controller error");
                    return Some(e);
                }
            }
        }
    }
}

fn print_summary(snapshot: &StatusSnapshot) {
    println!(
        "{} messages received on {} topics, {} discarded",
        snapshot.receipt_count,
        snapshot.len(),
        snapshot.total_discards()
    );
    for (topic, status) in &snapshot.subscribers {
        println!(
            "  {:<48} {:>8} received {:>6} discarded  lag {}",
            topic,
            status.received,
            status.total_discards(),
            format_duration(Duration::from_millis(status.last_lag_ms))
        );
    }
}
