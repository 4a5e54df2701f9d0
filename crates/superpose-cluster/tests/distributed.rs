//! Multi-rank behavior against the in-process cluster

use num_complex::Complex64;
use std::collections::BTreeMap;
use superpose_cluster::{cluster_step, equalize, Communicator, LocalCluster};
use superpose_core::{Engine, Rule, State, StepOptions, SymbolicBuffer};
use superpose_qubits::{CNot, Hadamard};

fn amplitudes(state: &State) -> BTreeMap<Vec<u8>, Complex64> {
    state
        .iter()
        .map(|(amp, bytes)| (bytes.to_vec(), amp))
        .collect()
}

fn assert_same_state(a: &BTreeMap<Vec<u8>, Complex64>, b: &BTreeMap<Vec<u8>, Complex64>) {
    assert_eq!(
        a.keys().collect::<Vec<_>>(),
        b.keys().collect::<Vec<_>>(),
        "object sets differ"
    );
    for (bytes, amp_a) in a {
        let amp_b = b[bytes];
        assert!(
            (amp_a - amp_b).norm() < 1e-9,
            "amplitude mismatch on {bytes:?}: {amp_a} vs {amp_b}"
        );
    }
}

/// H on every qubit, an entangling CNOT, then H again on qubit 0 so that
/// branches spread across ranks have to interfere.
fn circuit() -> Vec<Box<dyn Rule>> {
    let mut gates: Vec<Box<dyn Rule>> = Vec::new();
    for q in 0..5 {
        gates.push(Box::new(Hadamard::new(q)));
    }
    gates.push(Box::new(CNot::new(0, 3)));
    gates.push(Box::new(Hadamard::new(0)));
    gates
}

fn run_single_rank() -> BTreeMap<Vec<u8>, Complex64> {
    let engine = Engine::default();
    let mut state = State::new();
    let (mut next, mut symbolic) = (State::new(), SymbolicBuffer::new());
    state.append(&[0u8; 5], Complex64::new(1.0, 0.0));

    for gate in circuit() {
        engine
            .step(&mut state, gate.as_ref(), &mut next, &mut symbolic, StepOptions::default())
            .unwrap();
    }
    amplitudes(&state)
}

#[test]
fn distributed_step_matches_single_rank() {
    let reference = run_single_rank();

    for ranks in [2, 4] {
        let mut gathered = LocalCluster::run(ranks, |comm| {
            let engine = Engine::default();
            let mut state = State::new();
            let (mut next, mut symbolic) = (State::new(), SymbolicBuffer::new());
            if comm.rank() == 0 {
                state.append(&[0u8; 5], Complex64::new(1.0, 0.0));
            }
            equalize::distribute_objects(&comm, &mut state, 0).unwrap();

            for gate in circuit() {
                cluster_step(
                    &engine,
                    &comm,
                    &mut state,
                    gate.as_ref(),
                    &mut next,
                    &mut symbolic,
                    StepOptions::default(),
                )
                .unwrap();
            }

            let total = equalize::total_num_object(&comm, &state).unwrap();
            assert_eq!(total as usize, reference.len());

            equalize::gather_objects(&comm, &mut state, 0).unwrap();
            state
        });

        let root_state = gathered.remove(0);
        assert_same_state(&reference, &amplitudes(&root_state));
        assert!((root_state.total_proba() - 1.0).abs() < 1e-9);
        for other in &gathered {
            assert_eq!(other.num_object(), 0);
        }
    }
}

#[test]
fn equalizer_balances_a_skewed_population() {
    let counts = LocalCluster::run(4, |comm| {
        let engine = Engine::default();
        let mut state = State::new();
        if comm.rank() == 0 {
            for k in 0..600u32 {
                state.append(&k.to_le_bytes(), Complex64::new(1.0, 0.0));
            }
        }

        equalize::equalize_until_balanced(&comm, &mut state, engine.config()).unwrap();
        state.num_object()
    });

    assert_eq!(counts.iter().sum::<usize>(), 600);
    let max = *counts.iter().max().unwrap();
    let avg = 600.0 / 4.0;
    let imbalance = (max as f32 - avg as f32) / max as f32;
    assert!(
        imbalance < 0.01,
        "population still skewed after equalization: {counts:?}"
    );
}

#[test]
fn equalizer_respects_the_minimum_size_threshold() {
    // All populations sit at or below min_equalize_size: nothing moves.
    let counts = LocalCluster::run(3, |comm| {
        let engine = Engine::default();
        let mut state = State::new();
        if comm.rank() == 0 {
            for k in 0..50u32 {
                state.append(&k.to_le_bytes(), Complex64::new(1.0, 0.0));
            }
        }
        equalize::equalize_until_balanced(&comm, &mut state, engine.config()).unwrap();
        state.num_object()
    });
    assert_eq!(counts, vec![50, 0, 0]);
}

#[test]
fn distribute_and_gather_roundtrip_preserves_objects() {
    let states = LocalCluster::run(4, |comm| {
        let mut state = State::new();
        if comm.rank() == 0 {
            for k in 0..10u8 {
                // Mixed sizes to exercise offset rebasing.
                let bytes = vec![k; 1 + (k as usize % 3)];
                state.append(&bytes, Complex64::new(f64::from(k) / 10.0, 0.1));
            }
        }

        equalize::distribute_objects(&comm, &mut state, 0).unwrap();
        let share = state.num_object();
        // An even spread: every rank holds 10/4 ± 1 objects.
        assert!((2..=3).contains(&share), "share {share}");

        equalize::gather_objects(&comm, &mut state, 0).unwrap();
        state
    });

    let root = &states[0];
    assert_eq!(root.num_object(), 10);
    let all = amplitudes(root);
    for k in 0..10u8 {
        let bytes = vec![k; 1 + (k as usize % 3)];
        let amp = all[&bytes];
        assert!((amp.re - f64::from(k) / 10.0).abs() < 1e-12);
        assert!((amp.im - 0.1).abs() < 1e-12);
    }
}
