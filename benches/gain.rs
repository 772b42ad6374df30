use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use lan_wireless_mic::audio::gain::{decode_frame, encode_frame};
use lan_wireless_mic::constants::DEFAULT_SAMPLES_PER_PACKET;

fn bench_gain(c: &mut Criterion) {
    let samples: Vec<i16> = (0..DEFAULT_SAMPLES_PER_PACKET)
        .map(|i| ((i as f32 * 0.05).sin() * 20_000.0) as i16)
        .collect();
    let mut out = BytesMut::with_capacity(DEFAULT_SAMPLES_PER_PACKET * 2);

    let mut group = c.benchmark_group("packet");
    group.throughput(Throughput::Elements(samples.len() as u64));

    group.bench_function("encode_unity", |b| {
        b.iter(|| {
            out.clear();
            encode_frame(black_box(&samples), 1.0, &mut out);
        })
    });

    group.bench_function("encode_clipping", |b| {
        b.iter(|| {
            out.clear();
            encode_frame(black_box(&samples), 2.0, &mut out);
        })
    });

    out.clear();
    encode_frame(&samples, 0.7, &mut out);
    let packet = out.clone().freeze();
    group.bench_function("decode", |b| b.iter(|| decode_frame(black_box(&packet))));

    group.finish();
}

criterion_group!(benches, bench_gain);
criterion_main!(benches);
