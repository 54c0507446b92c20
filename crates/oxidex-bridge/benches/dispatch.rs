// Message send benchmarks
//
// This benchmark suite measures:
// - Script to native sends with registry-resolved signatures
// - Sends with explicit signatures
// - Native to script calls through trampolines
// - Script name dispatch to bridged methods
// - Native function calls

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use oxidex_bridge::native::SimRuntime;
use oxidex_bridge::{Bridge, ClassDecl, Result, Value};
use std::rc::Rc;

fn setup() -> Bridge {
    let bridge = Bridge::new(Rc::new(SimRuntime::new()));
    ClassDecl::new("BenchTarget", "Object")
        .method(
            "addTo:",
            Some("q@:q"),
            |_bridge: &Bridge, _this: &Value, args: &[Value]| -> Result<Value> {
                Ok(Value::Int(args[0].as_i64().unwrap_or(0) + 1))
            },
        )
        .declare(&bridge)
        .unwrap();
    bridge
}

/// Benchmark a native method with a looked-up signature
fn bench_native_send(c: &mut Criterion) {
    let bridge = setup();
    let string = bridge.string("benchmark").unwrap();

    c.bench_function("send_native_lookup", |b| {
        b.iter(|| black_box(bridge.send(&string, "length", &[]).unwrap()))
    });
    c.bench_function("send_native_explicit", |b| {
        b.iter(|| {
            black_box(
                bridge
                    .send_with_signature(&string, "length", "Q@:", &[])
                    .unwrap(),
            )
        })
    });
}

/// Benchmark a native send that lands in a script method
fn bench_trampoline(c: &mut Criterion) {
    let bridge = setup();
    let target = bridge.new_object("BenchTarget").unwrap();
    let args = [Value::Int(41)];

    c.bench_function("send_to_script_method", |b| {
        b.iter(|| black_box(bridge.send(&target, "addTo:", black_box(&args)).unwrap()))
    });
    c.bench_function("call_script_name", |b| {
        b.iter(|| black_box(bridge.call(&target, "addTo_", black_box(&args)).unwrap()))
    });
}

/// Benchmark struct marshalling through a class method
fn bench_struct_send(c: &mut Criterion) {
    let bridge = setup();
    let geometry = bridge.class("Geometry").unwrap();
    let size = [Value::Struct(vec![Value::Double(3.0), Value::Double(4.0)])];

    c.bench_function("send_struct_by_value", |b| {
        b.iter(|| black_box(bridge.send(&geometry, "areaOfSize:", black_box(&size)).unwrap()))
    });
}

/// Benchmark a native function call
fn bench_function_call(c: &mut Criterion) {
    let bridge = setup();
    let iadd = bridge.function("iadd").unwrap();
    let args = [Value::Int(20), Value::Int(22)];

    c.bench_function("native_function_call", |b| {
        b.iter(|| black_box(iadd.call(black_box(&args)).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_native_send,
    bench_trampoline,
    bench_struct_send,
    bench_function_call
);

criterion_main!(benches);
