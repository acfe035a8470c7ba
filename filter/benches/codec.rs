use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use valvfilter::{Aes256Filter, FRAMED_BLOCK_SIZE, KEY_SIZE};
use valvfilter_host::{Action, Mode};

fn bench_key() -> [u8; KEY_SIZE] {
    let mut raw = [0u8; KEY_SIZE];
    for (i, byte) in raw.iter_mut().enumerate() {
        *byte = (i * 13 + 5) as u8;
    }
    raw
}

fn encrypt_all(filter: &mut Aes256Filter, data: &[u8]) -> usize {
    let mut out = vec![0u8; FRAMED_BLOCK_SIZE];
    let mut total = 0;
    let mut action = Action::DataEnd;
    loop {
        let (n, next) = filter.process(data, &mut out, action).unwrap();
        total += n;
        if next != Action::Repeat {
            break;
        }
        action = next;
    }
    total
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("encrypt");
    for size in [1024usize, 16 * 1024, 1024 * 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || {
                    (
                        Aes256Filter::with_key(Mode::Upload, bench_key()),
                        (0..size).map(|i| (i % 256) as u8).collect::<Vec<u8>>(),
                    )
                },
                |(mut filter, input)| encrypt_all(&mut filter, &input),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
