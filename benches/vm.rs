//! Benchmarks for the bytecode VM, with and without call memoization.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use shark::bytecode::{Bytecode, Compiler, Vm};
use shark::config::VmConfig;
use shark::lexer::Scanner;
use shark::parser::Parser;

const FIB: &str = r#"
let fib = (n) => {
    if (n < 2) { return n; }
    fib(n - 1) + fib(n - 2)
};
fib(N)
"#;

const LOOP_SUM: &str = r#"
let mut i = 0;
let mut sum = 0;
while (i < 10000) {
    sum += i * 2;
    i++;
};
sum
"#;

const CLOSURES: &str = r#"
let make = (n) => { (x) => { x + n } };
let mut i = 0;
let mut total = 0;
while (i < 2000) {
    total = make(i)(1) + total;
    i++;
};
total
"#;

/// Parse and compile source into bytecode.
fn compile(source: &str) -> Bytecode {
    let tokens = Scanner::new(source).scan_tokens().expect("lexer error");
    let program = Parser::new(tokens).parse().expect("parser error");
    let mut compiler = Compiler::new();
    compiler.compile(&program).expect("compile error");
    compiler.bytecode()
}

fn run(bytecode: &Bytecode, config: &VmConfig) {
    let mut vm = Vm::with_config(bytecode.clone(), config);
    vm.run().expect("vm runtime error");
}

fn uncached() -> VmConfig {
    VmConfig {
        cache_size: 0,
        ..VmConfig::default()
    }
}

fn fib_memoization(c: &mut Criterion) {
    let mut group = c.benchmark_group("fib_recursive");

    for n in [10, 15, 20].iter() {
        let bytecode = compile(&FIB.replace('N', &n.to_string()));

        group.bench_with_input(BenchmarkId::new("cached", n), &bytecode, |b, bytecode| {
            b.iter(|| run(black_box(bytecode), &VmConfig::default()))
        });
        group.bench_with_input(BenchmarkId::new("uncached", n), &bytecode, |b, bytecode| {
            b.iter(|| run(black_box(bytecode), &uncached()))
        });
    }

    group.finish();
}

fn loop_sum(c: &mut Criterion) {
    let bytecode = compile(LOOP_SUM);
    c.bench_function("loop_sum", |b| {
        b.iter(|| run(black_box(&bytecode), &VmConfig::default()))
    });
}

fn closure_creation(c: &mut Criterion) {
    let bytecode = compile(CLOSURES);
    c.bench_function("closure_creation", |b| {
        b.iter(|| run(black_box(&bytecode), &VmConfig::default()))
    });
}

/// Benchmark compilation time alone (not execution).
fn compilation_overhead(c: &mut Criterion) {
    let tokens = Scanner::new(CLOSURES).scan_tokens().expect("lexer error");
    let program = Parser::new(tokens).parse().expect("parser error");

    c.bench_function("compile_closures", |b| {
        b.iter(|| {
            let mut compiler = Compiler::new();
            compiler.compile(black_box(&program)).unwrap();
            compiler.bytecode()
        })
    });
}

criterion_group!(
    benches,
    fib_memoization,
    loop_sum,
    closure_creation,
    compilation_overhead
);
criterion_main!(benches);
