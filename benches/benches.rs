use criterion::{black_box, criterion_group, criterion_main, Criterion};
use das_slurper::{decimate, decode, encode, Matrix, Packet};
use rand::prelude::*;

// Full-size acquisition window from the field deployment
const TIME_POINTS: usize = 1600;
const SPACE_POINTS: usize = 3334;

fn benchmark(c: &mut Criterion) {
    let mut rng = rand::thread_rng();

    let samples: Vec<f32> = (0..TIME_POINTS * SPACE_POINTS).map(|_| rng.gen()).collect();

    let packet = Packet {
        set_count: 1,
        timestamp: 1690449193.04,
        spacing: [4.8, 2.5, 1.0],
        origin: [0.0; 3],
        index: [0, SPACE_POINTS as i32 - 1, 0, TIME_POINTS as i32 - 1, 0, 0],
        unit_size: 4,
        samples: Matrix::from_vec(TIME_POINTS, SPACE_POINTS, samples).unwrap(),
        decoded: true,
    };
    let parts = encode(&packet);

    c.bench_function("decode packet", |b| b.iter(|| decode(black_box(&parts))));

    c.bench_function("decimate time", |b| {
        b.iter(|| decimate(black_box(&packet), black_box(100), black_box(0.0)))
    });

    c.bench_function("decimate time and space", |b| {
        b.iter(|| decimate(black_box(&packet), black_box(100), black_box(9.6)))
    });
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
