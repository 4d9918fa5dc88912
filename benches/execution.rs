//! Execution throughput benchmark
//!
//! Measures the per-call cost of the full pipeline (validate, fresh sandbox,
//! marshal in, run, marshal out) for a trivial identity script and for a
//! small compute-and-mutate script. The sandbox is rebuilt for every call by
//! design, so this is the floor for any real workload.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

use script_sandbox::{ExecutionLimits, SandboxConfig, ScriptExecutor};

fn bench_identity(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let executor = ScriptExecutor::new(SandboxConfig::default());
    let context = json!({"k": "v", "nested": {"a": [1, 2, 3]}});

    c.bench_function("execute_identity", |b| {
        b.iter(|| {
            let result = runtime.block_on(executor.execute(
                black_box("function run(c) return c end"),
                black_box(&context),
                ExecutionLimits::default(),
            ));
            result.unwrap()
        })
    });
}

fn bench_compute(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let executor = ScriptExecutor::new(SandboxConfig::default());
    let source = r#"
        function run(c)
            local s = 0
            for i = 1, 1000 do s = s + i end
            c.sum = s
            c.nums = {1, 2, 3, 4, 5}
            return c
        end
    "#;

    c.bench_function("execute_compute", |b| {
        b.iter(|| {
            let result = runtime.block_on(executor.execute(
                black_box(source),
                black_box(&json!({})),
                ExecutionLimits::default(),
            ));
            result.unwrap()
        })
    });
}

criterion_group!(benches, bench_identity, bench_compute);
criterion_main!(benches);
