//! Resilience benchmarks
//!
//! Measures breaker overhead on the hot paths and the cost of backoff
//! computation.
//!
//! Run with: `cargo bench --bench resilience_bench -p ghostctl-common
//! --features test-utils`

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use ghostctl_common::resilience::{
    CircuitBreaker, CircuitBreakerConfig, FixedJitter, MockSleeper, ResilienceError,
    RetryExecutor, RetryPolicy, ThreadRngJitter,
};

// ============================================================================
// Circuit Breaker Benchmarks
// ============================================================================

fn bench_circuit_breaker_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit_breaker_paths");

    group.bench_function("call_success", |b| {
        let breaker = CircuitBreaker::default();
        b.iter(|| {
            let result: Result<_, ResilienceError<std::io::Error>> =
                breaker.call(|| Ok::<_, std::io::Error>(()));
            black_box(result.is_ok());
        });
    });

    group.bench_function("open_short_circuit", |b| {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .recovery_timeout(Duration::from_secs(3600))
            .build()
            .expect("valid circuit breaker config for benchmarks");
        let breaker = CircuitBreaker::new(config).expect("circuit breaker should build");

        // Trip the breaker so it remains open for the benchmark iterations.
        let _ = breaker.call(|| Err::<(), _>(std::io::Error::other("initial failure")));

        b.iter(|| {
            let result: Result<_, ResilienceError<std::io::Error>> =
                breaker.call(|| Ok::<_, std::io::Error>(()));
            black_box(result.is_err());
        });
    });

    group.finish();
}

// ============================================================================
// Retry Benchmarks
// ============================================================================

fn bench_backoff_calculation(c: &mut Criterion) {
    let mut group = c.benchmark_group("backoff_calculation");
    let policy = RetryPolicy::default();

    for attempt in [0u32, 3, 10, 64] {
        group.bench_with_input(BenchmarkId::new("calculate_delay", attempt), &attempt, |b, &n| {
            b.iter(|| black_box(policy.calculate_delay(black_box(n))));
        });
        group.bench_with_input(BenchmarkId::new("delay_for_rng", attempt), &attempt, |b, &n| {
            b.iter(|| black_box(policy.delay_for(black_box(n), &ThreadRngJitter)));
        });
    }

    group.finish();
}

fn bench_retry_executor(c: &mut Criterion) {
    let mut group = c.benchmark_group("retry_executor");

    group.bench_function("success_first_attempt", |b| {
        let executor: RetryExecutor<std::io::Error> = RetryExecutor::new(RetryPolicy::default());
        b.iter(|| black_box(executor.run(|| Ok::<_, std::io::Error>(1u32)).is_ok()));
    });

    group.bench_function("three_failures_mock_sleep", |b| {
        b.iter_batched(
            || {
                RetryExecutor::new(RetryPolicy::default())
                    .with_sleeper(Arc::new(MockSleeper::new()))
                    .with_jitter_source(Arc::new(FixedJitter(0.5)))
                    .with_retry_condition(|_: &std::io::Error| true)
            },
            |executor| {
                let mut calls = 0u32;
                let result = executor.run(|| {
                    calls += 1;
                    if calls < 4 {
                        Err(std::io::Error::other("transient"))
                    } else {
                        Ok(calls)
                    }
                });
                black_box(result.is_ok());
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(
    resilience_benches,
    bench_circuit_breaker_paths,
    bench_backoff_calculation,
    bench_retry_executor
);
criterion_main!(resilience_benches);
