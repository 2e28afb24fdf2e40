//! WASI Shim Benchmarks
//!
//! Run with: cargo run -p wasi-shim --example shim_benchmark --release

use futures::executor::block_on;
use futures::FutureExt;
use std::time::Instant;
use wasi_shim::wasi::{CaptureSink, ScriptedInput};
use wasi_shim::{
    HostImports, HostValue, ShimConfig, ShimError, ShimInstance, ShimRuntime, StdioStreams, Val,
    ValType,
};

const ADD_WAT: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "add") (param i32 i32) (result i32)
    (i32.add (local.get 0) (local.get 1))))
"#;

const WRITE_WAT: &str = r#"
(module
  (import "wasi_snapshot_preview1" "fd_write"
    (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 1024) "tick\n")
  (func (export "tick") (result i32)
    (i32.store (i32.const 2048) (i32.const 1024))
    (i32.store (i32.const 2052) (i32.const 5))
    (call $fd_write (i32.const 1) (i32.const 2048) (i32.const 1) (i32.const 2064))))
"#;

/// Same shape as an asyncify-instrumented function: saves its argument on
/// unwind and restores it on rewind.
const ASYNC_WAT: &str = r#"
(module
  (import "env" "lookup" (func $lookup (param i32) (result i32)))
  (memory (export "memory") 1)
  (global $state (mut i32) (i32.const 0))
  (global $data (mut i32) (i32.const 0))
  (func (export "asyncify_get_state") (result i32) (global.get $state))
  (func (export "asyncify_start_unwind") (param i32)
    (global.set $state (i32.const 1))
    (global.set $data (local.get 0)))
  (func (export "asyncify_stop_unwind") (global.set $state (i32.const 0)))
  (func (export "asyncify_start_rewind") (param i32)
    (global.set $state (i32.const 2))
    (global.set $data (local.get 0)))
  (func (export "asyncify_stop_rewind") (global.set $state (i32.const 0)))
  (func (export "run") (param $x i32) (result i32)
    (local $r i32)
    (if (i32.eq (global.get $state) (i32.const 2))
      (then (local.set $x (i32.load (i32.load (global.get $data))))))
    (local.set $r (call $lookup (local.get $x)))
    (if (i32.eq (global.get $state) (i32.const 1))
      (then
        (i32.store (i32.load (global.get $data)) (local.get $x))
        (return (i32.const 0))))
    (i32.add (local.get $r) (local.get $x))))
"#;

fn main() {
    println!("=== WASI Shim Benchmarks ===\n");

    bench_module_loading();
    bench_instantiation();
    bench_function_calls();
    bench_fd_write();
    bench_asyncify();
    bench_with_fuel_metering();

    println!("\n=== Benchmark Complete ===");
}

fn bench_module_loading() {
    println!("## Module Loading");

    let runtime = ShimRuntime::new(ShimConfig::default()).unwrap();
    let _ = runtime.load_module_bytes("async", ASYNC_WAT).unwrap();

    let mut times = Vec::new();
    for _ in 0..100 {
        let start = Instant::now();
        let _ = runtime.load_module_bytes("async", ASYNC_WAT).unwrap();
        times.push(start.elapsed().as_micros() as u64);
    }

    print_stats("load_module_bytes", &times);
    println!();
}

fn bench_instantiation() {
    println!("## Instantiation");

    let runtime = ShimRuntime::new(ShimConfig::default()).unwrap();
    let module = runtime.load_module_bytes("async", ASYNC_WAT).unwrap();
    let imports = lookup_import(false);

    // Warm up
    for _ in 0..5 {
        let _ = runtime.instantiate_with(&module, &imports, captured_streams()).unwrap();
    }

    let mut times = Vec::new();
    for _ in 0..100 {
        let start = Instant::now();
        let _ = runtime.instantiate_with(&module, &imports, captured_streams()).unwrap();
        times.push(start.elapsed().as_micros() as u64);
    }

    print_stats("instantiate (WASI + asyncify bounds)", &times);
    println!();
}

fn bench_function_calls() {
    println!("## Function Call Overhead");

    let mut instance = instance_for(ShimConfig::default(), ADD_WAT, &HostImports::new());

    let mut times = Vec::new();
    block_on(async {
        for _ in 0..100 {
            let _ = instance.call("add", &[Val::I32(1), Val::I32(1)]).await;
        }
        for i in 0..10_000 {
            let result = instance
                .call("add", &[Val::I32(i), Val::I32(1)])
                .await
                .unwrap();
            times.push(result.execution_time_us);
        }
    });

    print_stats("add(i32, i32)", &times);
    println!();
}

fn bench_fd_write() {
    println!("## WASI fd_write");

    let mut instance = instance_for(ShimConfig::default(), WRITE_WAT, &HostImports::new());

    let mut times = Vec::new();
    block_on(async {
        for _ in 0..10_000 {
            let result = instance.call("tick", &[]).await.unwrap();
            assert_eq!(result.values[0].unwrap_i32(), 0);
            times.push(result.execution_time_us);
        }
    });

    print_stats("fd_write (1 iovec, line flush)", &times);
    println!();
}

fn bench_asyncify() {
    println!("## Asyncify Round Trip");

    for (label, pending) in [("ready value", false), ("pending value", true)] {
        let mut instance =
            instance_for(ShimConfig::default(), ASYNC_WAT, &lookup_import(pending));

        let mut times = Vec::new();
        block_on(async {
            for i in 0..10_000 {
                let result = instance.call("run", &[Val::I32(i % 100)]).await.unwrap();
                assert_eq!(result.values[0].unwrap_i32(), (i % 100) * 2);
                times.push(result.execution_time_us);
            }
        });

        print_stats(label, &times);
    }
    println!();
}

fn bench_with_fuel_metering() {
    println!("## Fuel Metering Overhead");

    let mut instance_no_fuel = instance_for(ShimConfig::default(), ADD_WAT, &HostImports::new());
    let mut instance_fuel = instance_for(
        ShimConfig::default().fuel_limit(u64::MAX),
        ADD_WAT,
        &HostImports::new(),
    );

    let iterations = 10_000;
    let mut no_fuel = Vec::new();
    let mut fuel = Vec::new();
    let mut total_fuel_consumed = 0u64;

    block_on(async {
        for i in 0..iterations {
            let result = instance_no_fuel
                .call("add", &[Val::I32(i), Val::I32(1)])
                .await
                .unwrap();
            no_fuel.push(result.execution_time_us);
        }
        for i in 0..iterations {
            let result = instance_fuel
                .call("add", &[Val::I32(i), Val::I32(1)])
                .await
                .unwrap();
            fuel.push(result.execution_time_us);
            total_fuel_consumed += result.fuel_consumed.unwrap_or(0);
        }
    });

    print_stats("without fuel metering", &no_fuel);
    print_stats("with fuel metering", &fuel);
    println!("  avg fuel per call: {}", total_fuel_consumed / iterations as u64);

    let mean = |times: &[u64]| times.iter().sum::<u64>() as f64 / times.len() as f64;
    let overhead = if mean(&no_fuel) > 0.0 {
        ((mean(&fuel) - mean(&no_fuel)) / mean(&no_fuel)) * 100.0
    } else {
        0.0
    };
    println!("  overhead: {:.1}%", overhead);
    println!();
}

fn captured_streams() -> StdioStreams {
    StdioStreams::new(
        ScriptedInput::new(Vec::<String>::new()),
        CaptureSink::new(),
        CaptureSink::new(),
    )
}

fn instance_for(config: ShimConfig, wat: &str, imports: &HostImports) -> ShimInstance {
    let runtime = ShimRuntime::new(config).unwrap();
    let module = runtime.load_module_bytes("bench", wat).unwrap();
    runtime.instantiate_with(&module, imports, captured_streams()).unwrap()
}

/// `env.lookup(x) = x`, answered immediately or through an already
/// resolved future.
fn lookup_import(pending: bool) -> HostImports {
    let mut imports = HostImports::new();
    imports.define("env", "lookup", [ValType::I32], [ValType::I32], move |args| {
        let x = args[0].clone();
        if pending {
            HostValue::Pending(async move { Ok::<_, ShimError>(vec![x]) }.boxed())
        } else {
            HostValue::Ready(vec![x])
        }
    });
    imports
}

fn print_stats(name: &str, times: &[u64]) {
    if times.is_empty() {
        println!("  {}: no samples", name);
        return;
    }

    let mut sorted = times.to_vec();
    sorted.sort();

    let min = sorted[0];
    let max = sorted[sorted.len() - 1];
    let mean = times.iter().sum::<u64>() as f64 / times.len() as f64;
    let p50 = sorted[sorted.len() / 2];
    let p99 = sorted[(sorted.len() * 99) / 100];

    println!(
        "  {}: n={} min={}us mean={:.1}us p50={}us p99={}us max={}us",
        name,
        times.len(),
        min,
        mean,
        p50,
        p99,
        max
    );
}
