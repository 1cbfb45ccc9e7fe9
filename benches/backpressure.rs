use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stage_pipeline::{
    connect, Aggregator, CancellationToken, Generator, Pipeline, StageConfig, Transform,
};
use std::time::Duration;

/// Fast source into a slow consumer; the bounded conduits hold the source
/// back to the consumer's pace
fn slow_consumer(messages: u32, buffer: isize) {
    let source = Generator::with_config(
        move |_: &CancellationToken| Ok(bounded_source(messages)),
        StageConfig::new().with_output_buffer_size(buffer),
    );
    let slow = Transform::with_config(
        |data: Vec<u8>| {
            std::thread::sleep(Duration::from_micros(100));
            Ok(data)
        },
        StageConfig::new().with_output_buffer_size(buffer),
    );
    let sink = Aggregator::new(|data: Vec<u8>| {
        black_box(data);
        Ok(())
    });
    connect(&source, &slow).expect("connect failed");
    connect(&slow, &sink).expect("connect failed");

    let mut pipeline = Pipeline::new();
    pipeline.add(source).add(slow).add(sink);
    pipeline
        .run(&CancellationToken::new())
        .expect("pipeline failed");
}

fn bounded_source(messages: u32) -> stage_pipeline::Receiver<Vec<u8>> {
    let (tx, rx) = crossbeam::channel::bounded(0);
    std::thread::spawn(move || {
        for i in 0..messages {
            if tx.send(vec![i as u8; 64]).is_err() {
                return;
            }
        }
    });
    rx
}

fn benchmark_backpressure_slow_consumer(c: &mut Criterion) {
    c.bench_function("backpressure_slow_consumer_1000_msgs", |b| {
        b.iter(|| slow_consumer(1000, 100));
    });
}

fn benchmark_backpressure_rendezvous(c: &mut Criterion) {
    c.bench_function("backpressure_rendezvous_1000_msgs", |b| {
        b.iter(|| slow_consumer(1000, 0));
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(15)).sample_size(10);
    targets = benchmark_backpressure_slow_consumer, benchmark_backpressure_rendezvous
);
criterion_main!(benches);
