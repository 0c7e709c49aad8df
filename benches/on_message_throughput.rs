use chill_bus::{Envelope, MessageListener};
use chill_monitor::ReceiptTracker;
use chill_types::UnixMillis;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;

const TOPICS: [&str; 4] = [
    "mpcs.msl.testbed.mstb.lv.eha",
    "mpcs.msl.testbed.mstb.lv.evr",
    "mpcs.msl.testbed.mstb.lv.product",
    "mpcs.msl.testbed.general",
];

fn messages(topic: &str, count: u64) -> Vec<Envelope> {
    (1..=count)
        .map(|sequence| {
            Envelope::builder("EhaChannel")
                .source_pid(4021)
                .sequence(sequence)
                .publish_time(UnixMillis::now())
                .topic(topic)
                .build()
        })
        .collect()
}

fn tracker() -> Arc<ReceiptTracker> {
    let tracker = Arc::new(ReceiptTracker::new());
    for topic in TOPICS {
        tracker.track(topic);
    }
    tracker
}

/// Benchmark single-message latency (hot path)
fn bench_on_message(c: &mut Criterion) {
    let tracker = tracker();
    let envelope = messages(TOPICS[0], 1).remove(0);

    c.bench_function("on_message", |b| {
        b.iter(|| {
            tracker.on_message(black_box(&envelope));
        });
    });
}

/// Benchmark one delivery thread per topic, as the bus delivers
fn bench_concurrent_topics(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_topics");

    for thread_count in [1usize, 2, 4].iter() {
        let batches: Vec<Arc<Vec<Envelope>>> = TOPICS[..*thread_count]
            .iter()
            .map(|topic| Arc::new(messages(topic, 1000)))
            .collect();

        group.throughput(Throughput::Elements(*thread_count as u64 * 1000));
        group.bench_with_input(
            BenchmarkId::new("threads", thread_count),
            &batches,
            |b, batches| {
                b.iter(|| {
                    let tracker = tracker();
                    let handles: Vec<_> = batches
                        .iter()
                        .map(|batch| {
                            let tracker = Arc::clone(&tracker);
                            let batch = Arc::clone(batch);
                            thread::spawn(move || {
                                for envelope in batch.iter() {
                                    tracker.on_message(black_box(envelope));
                                }
                            })
                        })
                        .collect();

                    for handle in handles {
                        handle.join().unwrap();
                    }
                });
            },
        );
    }
    group.finish();
}

/// Benchmark many threads delivering to the same topic (high contention)
fn bench_same_topic(c: &mut Criterion) {
    let mut group = c.benchmark_group("same_topic");

    for thread_count in [2usize, 4, 8].iter() {
        let batch = Arc::new(messages(TOPICS[0], 1000));

        group.throughput(Throughput::Elements(*thread_count as u64 * 1000));
        group.bench_with_input(
            BenchmarkId::from_parameter(thread_count),
            thread_count,
            |b, &thread_count| {
                b.iter(|| {
                    let tracker = tracker();
                    let handles: Vec<_> = (0..thread_count)
                        .map(|_| {
                            let tracker = Arc::clone(&tracker);
                            let batch = Arc::clone(&batch);
                            thread::spawn(move || {
                                for envelope in batch.iter() {
                                    tracker.on_message(black_box(envelope));
                                }
                            })
                        })
                        .collect();

                    for handle in handles {
                        handle.join().unwrap();
                    }
                });
            },
        );
    }
    group.finish();
}

/// Benchmark status collection while topics carry discards
fn bench_statuses(c: &mut Criterion) {
    let tracker = tracker();
    for topic in TOPICS {
        for envelope in messages(topic, 100).iter().step_by(3) {
            tracker.on_message(envelope);
        }
    }

    c.bench_function("statuses", |b| {
        b.iter(|| {
            black_box(tracker.statuses());
        });
    });
}

criterion_group!(
    benches,
    bench_on_message,
    bench_concurrent_topics,
    bench_same_topic,
    bench_statuses
);
criterion_main!(benches);
