use criterion::{black_box, criterion_group, criterion_main, Criterion};
use varc::channel::{Channel, MemChannel, Mode};
use varc::Counter;

fn bench_wire(c: &mut Criterion) {
    let mut big = Counter::from(1u64);
    for i in 2u64..40 {
        big = big.mul(&Counter::from(i));
    }

    c.bench_function("counter_dump_small", |b| {
        let v = Counter::from(123_456u64);
        b.iter(|| {
            let mut ch = MemChannel::new(Mode::WriteOnly);
            black_box(&v).dump(&mut ch).unwrap();
            black_box(ch.contents().len())
        })
    });

    c.bench_function("counter_roundtrip_wide", |b| {
        b.iter(|| {
            let mut ch = MemChannel::new(Mode::ReadWrite);
            big.dump(&mut ch).unwrap();
            ch.skip(&Counter::zero()).unwrap();
            black_box(Counter::read(&mut ch).unwrap())
        })
    });
}

fn bench_euclide(c: &mut Criterion) {
    let mut a = Counter::from(1u64);
    for i in 2u64..30 {
        a = a.mul(&Counter::from(i));
    }
    let b_val = Counter::from(86_400u64);

    c.bench_function("counter_euclide", |bench| {
        bench.iter(|| {
            let (q, r) = Counter::euclide(black_box(&a), black_box(&b_val)).unwrap();
            black_box((q, r))
        })
    });
}

criterion_group!(benches, bench_wire, bench_euclide);
criterion_main!(benches);
