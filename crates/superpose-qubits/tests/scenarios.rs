//! End-to-end gate scenarios against the step pipeline

use num_complex::Complex64;
use std::collections::BTreeMap;
use superpose_core::{Engine, Rule, Salted, State, StepOptions, SymbolicBuffer};
use superpose_qubits::{CNot, Hadamard, PauliY};

const FRAC_1_SQRT_2: f64 = std::f64::consts::FRAC_1_SQRT_2;

struct Sim {
    engine: Engine,
    state: State,
    next: State,
    symbolic: SymbolicBuffer,
}

impl Sim {
    fn new(objects: &[(&[u8], Complex64)]) -> Self {
        let mut state = State::new();
        for &(bytes, amp) in objects {
            state.append(bytes, amp);
        }
        Self {
            engine: Engine::default(),
            state,
            next: State::new(),
            symbolic: SymbolicBuffer::new(),
        }
    }

    fn step<R: Rule + ?Sized>(&mut self, rule: &R) {
        self.engine
            .step(
                &mut self.state,
                rule,
                &mut self.next,
                &mut self.symbolic,
                StepOptions::default(),
            )
            .unwrap();
    }

    fn step_truncated<R: Rule>(&mut self, rule: &R, max_num_object: usize) {
        self.engine
            .step(
                &mut self.state,
                rule,
                &mut self.next,
                &mut self.symbolic,
                StepOptions {
                    max_num_object: Some(max_num_object),
                    mid_step: None,
                },
            )
            .unwrap();
    }

    fn amplitudes(&self) -> BTreeMap<Vec<u8>, Complex64> {
        self.state
            .iter()
            .map(|(amp, bytes)| (bytes.to_vec(), amp))
            .collect()
    }
}

/// `|⟨a|b⟩|` over the common object basis.
fn overlap(a: &BTreeMap<Vec<u8>, Complex64>, b: &BTreeMap<Vec<u8>, Complex64>) -> f64 {
    a.iter()
        .filter_map(|(bytes, amp_a)| b.get(bytes).map(|amp_b| amp_a.conj() * amp_b))
        .sum::<Complex64>()
        .norm()
}

#[test]
fn s1_hadamard_splits_the_ground_state() {
    use approx::assert_relative_eq;

    let mut sim = Sim::new(&[(&[0], Complex64::new(1.0, 0.0))]);
    sim.step(&Hadamard::new(0));

    let amps = sim.amplitudes();
    assert_eq!(amps.len(), 2);
    assert_relative_eq!(amps[&vec![0u8]].re, FRAC_1_SQRT_2, epsilon = 1e-12);
    assert_relative_eq!(amps[&vec![1u8]].re, FRAC_1_SQRT_2, epsilon = 1e-12);
    assert_relative_eq!(sim.state.total_proba(), 1.0, epsilon = 1e-12);
}

#[test]
fn s2_hadamard_recombines_by_interference() {
    let mut sim = Sim::new(&[
        (&[0], Complex64::new(FRAC_1_SQRT_2, 0.0)),
        (&[1], Complex64::new(FRAC_1_SQRT_2, 0.0)),
    ]);
    sim.step(&Hadamard::new(0));

    // The |1⟩ branch cancels exactly and is pruned.
    let amps = sim.amplitudes();
    assert_eq!(amps.len(), 1);
    assert!((amps[&vec![0u8]].re - 1.0).abs() < 1e-12);
}

#[test]
fn s3_cnot_entangles() {
    let mut sim = Sim::new(&[
        (&[0, 0], Complex64::new(FRAC_1_SQRT_2, 0.0)),
        (&[1, 0], Complex64::new(FRAC_1_SQRT_2, 0.0)),
    ]);
    sim.step(&CNot::new(0, 1));

    let amps = sim.amplitudes();
    assert_eq!(amps.len(), 2);
    assert!((amps[&vec![0u8, 0]].re - FRAC_1_SQRT_2).abs() < 1e-12);
    assert!((amps[&vec![1u8, 1]].re - FRAC_1_SQRT_2).abs() < 1e-12);
}

#[test]
fn s4_double_pauli_y_flips_the_sign() {
    let mut sim = Sim::new(&[(&[0], Complex64::new(1.0, 0.0))]);
    sim.step(&PauliY::new(0));
    sim.step(&PauliY::new(0));

    let amps = sim.amplitudes();
    assert_eq!(amps.len(), 1);
    assert!((amps[&vec![0u8]].re + 1.0).abs() < 1e-12);
    assert!((sim.state.total_proba() - 1.0).abs() < 1e-12);
}

#[test]
fn s5_reversed_circuit_returns_up_to_global_phase() {
    use superpose_qubits::{PauliX, PauliZ};

    // Mixed-length registers coexisting in one state.
    let mut sim = Sim::new(&[
        (&[1, 1, 0, 0], Complex64::new(FRAC_1_SQRT_2, 0.0)),
        (&[0, 1, 1, 0, 1], Complex64::new(0.0, FRAC_1_SQRT_2)),
    ]);
    let initial = sim.amplitudes();

    let h1 = Hadamard::new(1);
    let h2 = Hadamard::new(2);
    let cnot = CNot::new(1, 3);
    let x2 = PauliX::new(2);
    let y0 = PauliY::new(0);
    let z3 = PauliZ::new(3);

    let forward: [&dyn Rule; 6] = [&h1, &h2, &cnot, &x2, &y0, &z3];
    for gate in forward {
        sim.step(gate);
        // Every gate is norm-preserving.
        assert!((sim.state.total_proba() - 1.0).abs() < 1e-9);
    }

    let backward: [&dyn Rule; 6] = [&z3, &y0, &x2, &cnot, &h2, &h1];
    for gate in backward {
        sim.step(gate);
    }

    let along = overlap(&initial, &sim.amplitudes());
    assert!((along - 1.0).abs() < 1e-9, "overlap magnitude {along}");
}

#[test]
fn s6_truncation_is_unbiased_over_hash_seeds() {
    let qubits = 11;
    let trials = 40;

    let mut estimates = Vec::with_capacity(trials);
    for seed in 0..trials as u64 {
        let zeros = vec![0u8; qubits];
        let mut sim = Sim::new(&[(&zeros, Complex64::new(1.0, 0.0))]);

        // Uniform superposition over the first ten qubits: 1024 distinct
        // objects of equal weight.
        for q in 0..qubits - 1 {
            sim.step(&Hadamard::new(q));
        }
        assert_eq!(sim.state.num_object(), 1 << (qubits - 1));

        // The last split doubles the population; cap it at half so exactly
        // half the branches survive the sampler.
        sim.step_truncated(&Salted::new(Hadamard::new(qubits - 1), seed), 1 << (qubits - 1));
        assert_eq!(sim.state.num_object(), 1 << (qubits - 1));
        assert!((sim.state.total_proba() - 1.0).abs() < 1e-12);

        estimates.push(sim.state.expectation(|bytes| bytes[0] as f64));
    }

    // The untruncated expectation of qubit 0 is exactly 1/2; the seeded
    // estimates must scatter around it without bias.
    let mean = estimates.iter().sum::<f64>() / estimates.len() as f64;
    assert!(
        (mean - 0.5).abs() < 0.02,
        "estimator mean {mean} drifted from 0.5"
    );
}
