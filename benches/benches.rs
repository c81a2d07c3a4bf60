use metro_slurper::{
    capture::RawSample,
    exfil::{BatchStream, Transport},
    process::{Layout, Processor, Record},
    unwrap::{AngleUnit, Unwrapper},
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::prelude::*;

/// Swallows every datagram, so only the batching itself is measured
struct NullTransport;

impl Transport for NullTransport {
    fn send(&mut self, payload: &[u8]) -> std::io::Result<()> {
        black_box(payload);
        Ok(())
    }

    fn service_inbound(&mut self) {}
}

fn benchmark(c: &mut Criterion) {
    let mut rng = rand::thread_rng();

    let layout = Layout::metrology();
    let mut sample = RawSample::new(layout.raw_channels);
    rng.fill(&mut sample.channels[..]);

    // Containers
    let mut processor = Processor::new(layout.clone()).unwrap();
    let mut record = Record::with_width(layout.width());
    let mut stream = BatchStream::new(NullTransport, layout.width(), 10).unwrap();
    let mut unwrapper = Unwrapper::new(AngleUnit::Radians);
    let angles: Vec<f64> = (0..1024)
        .map(|_| rng.gen_range(-std::f64::consts::PI..std::f64::consts::PI))
        .collect();

    c.bench_function("process metrology sample", |b| {
        b.iter(|| processor.process(black_box(&sample), black_box(&mut record)))
    });

    c.bench_function("unwrap", |b| {
        b.iter(|| {
            for a in &angles {
                black_box(unwrapper.update(black_box(*a)));
            }
        })
    });

    processor.process(&sample, &mut record);
    c.bench_function("batch push", |b| {
        b.iter(|| stream.push(black_box(&record)).unwrap())
    });

    let mut phase_only = Processor::new(Layout::phase_only()).unwrap();
    let quad = RawSample {
        counter: 1,
        channels: vec![rng.gen(), rng.gen()],
    };
    c.bench_function("process phase-only sample", |b| {
        b.iter(|| phase_only.process(black_box(&quad), black_box(&mut record)))
    });
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
