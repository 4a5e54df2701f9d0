//! Step pipeline benchmarks over gate cascades
//!
//! Benchmarks the three regimes one step can hit:
//! - pure growth (Hadamard cascade, no collisions)
//! - heavy interference (Hadamard on a saturated register)
//! - forced truncation (explicit survivor cap)

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use num_complex::Complex64;
use superpose_core::{Engine, State, StepOptions, SymbolicBuffer};
use superpose_qubits::Hadamard;

/// Uniform superposition over `qubits` qubits via a Hadamard cascade.
fn saturated_state(engine: &Engine, qubits: usize) -> (State, State, SymbolicBuffer) {
    let mut state = State::new();
    let mut next = State::new();
    let mut symbolic = SymbolicBuffer::new();
    state.append(&vec![0u8; qubits], Complex64::new(1.0, 0.0));
    for q in 0..qubits {
        engine
            .step(&mut state, &Hadamard::new(q), &mut next, &mut symbolic, StepOptions::default())
            .unwrap();
    }
    (state, next, symbolic)
}

fn benchmark_growth_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("hadamard_growth");
    let engine = Engine::default();

    for qubits in [12, 16, 18] {
        group.bench_with_input(BenchmarkId::from_parameter(qubits), &qubits, |b, &qubits| {
            let (state, _, _) = saturated_state(&engine, qubits - 1);
            b.iter_batched(
                || (clone_state(&state), State::new(), SymbolicBuffer::new()),
                |(mut state, mut next, mut symbolic)| {
                    engine
                        .step(
                            &mut state,
                            &Hadamard::new(qubits - 1),
                            &mut next,
                            &mut symbolic,
                            StepOptions::default(),
                        )
                        .unwrap();
                    black_box(state.num_object());
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn benchmark_interference_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("hadamard_interference");
    let engine = Engine::default();

    for qubits in [12, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(qubits), &qubits, |b, &qubits| {
            // Re-applying H to a saturated register makes every pair of
            // parents collide on half its children.
            let (state, _, _) = saturated_state(&engine, qubits);
            b.iter_batched(
                || (clone_state(&state), State::new(), SymbolicBuffer::new()),
                |(mut state, mut next, mut symbolic)| {
                    engine
                        .step(
                            &mut state,
                            &Hadamard::new(0),
                            &mut next,
                            &mut symbolic,
                            StepOptions::default(),
                        )
                        .unwrap();
                    black_box(state.num_object());
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn benchmark_truncated_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("truncated_step");
    let engine = Engine::default();

    let qubits = 16;
    let (state, _, _) = saturated_state(&engine, qubits - 1);
    group.bench_function(BenchmarkId::from_parameter(qubits), |b| {
        b.iter_batched(
            || (clone_state(&state), State::new(), SymbolicBuffer::new()),
            |(mut state, mut next, mut symbolic)| {
                engine
                    .step(
                        &mut state,
                        &Hadamard::new(qubits - 1),
                        &mut next,
                        &mut symbolic,
                        StepOptions {
                            max_num_object: Some(1 << (qubits - 2)),
                            mid_step: None,
                        },
                    )
                    .unwrap();
                black_box(state.num_object());
            },
            criterion::BatchSize::LargeInput,
        );
    });

    group.finish();
}

fn clone_state(state: &State) -> State {
    let mut copy = State::new();
    for (amp, bytes) in state.iter() {
        copy.append(bytes, amp);
    }
    copy
}

criterion_group!(
    benches,
    benchmark_growth_step,
    benchmark_interference_step,
    benchmark_truncated_step
);
criterion_main!(benches);
