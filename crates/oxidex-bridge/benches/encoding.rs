// Type encoding benchmarks
//
// This benchmark suite measures:
// - Signature parsing for simple and nested encodings
// - Memoized signature lookup through the registry
// - Selector interning and script name conversion

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use oxidex_bridge::encoding::Signature;
use oxidex_bridge::native::SimRuntime;
use oxidex_bridge::{Bridge, Selector};
use std::rc::Rc;

const ENCODINGS: &[(&str, &str)] = &[
    ("simple", "v@:"),
    ("keyword", "@@:@@q"),
    ("offsets", "v24@0:8i16d20"),
    ("nested", "{Rect={Point=dd}{Size=dd}}#:{Rect={Point=dd}{Size=dd}}d"),
    ("pointers", "^v@:^*[16C]^{Node=@^{Node}}"),
];

/// Benchmark raw parsing of representative encodings
fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("signature_parse");
    for (name, encoding) in ENCODINGS {
        group.bench_with_input(BenchmarkId::from_parameter(name), encoding, |b, encoding| {
            b.iter(|| black_box(Signature::parse(black_box(encoding)).unwrap()))
        });
    }
    group.finish();
}

/// Benchmark repeated lookups that hit the registry's parse cache
fn bench_memoized_parse(c: &mut Criterion) {
    let bridge = Bridge::new(Rc::new(SimRuntime::new()));
    let encoding = ENCODINGS[3].1;
    bridge.registry().signature(encoding).unwrap();

    c.bench_function("signature_memoized", |b| {
        b.iter(|| black_box(bridge.registry().signature(black_box(encoding)).unwrap()))
    });
}

/// Benchmark selector interning and script name mapping
fn bench_selectors(c: &mut Criterion) {
    let _warm: Selector = "replaceObjectAtIndex:withObject:".parse().unwrap();

    c.bench_function("selector_intern_hit", |b| {
        b.iter(|| {
            black_box(
                black_box("replaceObjectAtIndex:withObject:")
                    .parse::<Selector>()
                    .unwrap(),
            )
        })
    });
    c.bench_function("selector_from_script_name", |b| {
        b.iter(|| {
            black_box(Selector::from_script_name(black_box("replaceObjectAtIndex_withObject_")).unwrap())
        })
    });
}

criterion_group!(benches, bench_parse, bench_memoized_parse, bench_selectors);

criterion_main!(benches);
