use criterion::{black_box, criterion_group, criterion_main, Criterion};
use scatterflow_core::{Dataflow, Node};

fn build_chain(df: &mut Dataflow, depth: usize) -> (Node<u64>, Node<u64>) {
    let root = df.value("root", 0u64);
    let mut tip = df.derive("n0", (root,), |(v,)| *v + 1).unwrap();
    for i in 1..depth {
        tip = df.derive(format!("n{i}"), (tip,), |(v,)| *v + 1).unwrap();
    }
    (root, tip)
}

fn bench_cached_read(c: &mut Criterion) {
    let mut df = Dataflow::new();
    let (_root, tip) = build_chain(&mut df, 256);
    df.get(tip).unwrap();
    c.bench_function("cached read, 256-deep chain", |b| {
        b.iter(|| black_box(*df.get(tip).unwrap()))
    });
}

fn bench_invalidate_and_read(c: &mut Criterion) {
    let mut df = Dataflow::new();
    let (root, tip) = build_chain(&mut df, 256);
    let mut v = 0u64;
    c.bench_function("set + full recompute, 256-deep chain", |b| {
        b.iter(|| {
            v += 1;
            df.set(root, v).unwrap();
            black_box(*df.get(tip).unwrap())
        })
    });
}

criterion_group!(benches, bench_cached_read, bench_invalidate_and_read);
criterion_main!(benches);
