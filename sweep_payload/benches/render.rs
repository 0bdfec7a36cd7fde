//! Benchmarks for series rendering.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use rand::{SeedableRng, rngs::SmallRng};
use std::{io, time::Duration};
use sweep_payload::{Config, Payload, Render, Series};

const LOOPS: u32 = 10;

fn render_day(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_day");
    let formats = [
        ("import", Config::Import),
        ("line_protocol", Config::LineProtocol { sensor_tag: true }),
    ];
    for (name, config) in formats {
        let payload = Payload::new(config, 5).expect("failed to build payload");
        group.throughput(Throughput::Elements(u64::from(
            sweep_payload::ROWS_PER_DAY * LOOPS,
        )));
        group.bench_with_input(BenchmarkId::from_parameter(name), &payload, |b, payload| {
            let mut rng = SmallRng::seed_from_u64(19_690_716);
            let mut writer = io::BufWriter::with_capacity(16 * 1024, io::sink());
            b.iter(|| {
                for key in 0..LOOPS {
                    let series = Series::day(i64::from(key), 1_546_300_800_000);
                    payload
                        .render(&mut rng, &series, &mut writer)
                        .expect("failed to render");
                }
            });
        });
    }
    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(10));
    targets = render_day,
);
criterion_main!(benches);
