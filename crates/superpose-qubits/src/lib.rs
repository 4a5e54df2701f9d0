//! # superpose-qubits — quantum-computer rules
//!
//! The gate rule family over qubit-string objects: each object is a byte
//! string holding one qubit value (0 or 1) per byte, least significant
//! qubit first. Objects of different lengths coexist in one state; a gate
//! addresses a qubit index and leaves the rest of the register alone.
//!
//! Branching gates ([`Hadamard`]) go through the full step pipeline so
//! their branches interfere; permutation gates ([`CNot`], [`PauliX`],
//! [`PauliY`], [`PauliZ`]) produce a single child each, and the diagonal
//! [`PhaseFlip`] is a [`Modifier`] that bypasses the pipeline entirely.
//!
//! The Pauli Y here is the real antisymmetric convention
//! `Y|0⟩ = |1⟩, Y|1⟩ = −|0⟩`, so `Y² = −I`: two applications flip the
//! global sign while preserving the norm.

use num_complex::Complex64;
use superpose_core::{ChildSpec, Modifier, Rule};

const FRAC_1_SQRT_2: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// Hadamard on one qubit: `|b⟩ → (|0⟩ + (−1)^b |1⟩)/√2`.
#[derive(Debug, Clone, Copy)]
pub struct Hadamard {
    target: usize,
}

impl Hadamard {
    pub fn new(target: usize) -> Self {
        Self { target }
    }
}

impl Rule for Hadamard {
    fn enumerate(&self, parent: &[u8]) -> ChildSpec {
        ChildSpec {
            num_children: 2,
            max_child_size: parent.len(),
        }
    }

    fn expand(&self, parent: &[u8], child_id: u32, amp: &mut Complex64, out: &mut [u8]) -> usize {
        out[..parent.len()].copy_from_slice(parent);
        out[self.target] = child_id as u8;
        let sign = if parent[self.target] == 1 && child_id == 1 {
            -FRAC_1_SQRT_2
        } else {
            FRAC_1_SQRT_2
        };
        *amp *= Complex64::new(sign, 0.0);
        parent.len()
    }
}

/// Controlled NOT: flips `target` when `control` is set.
#[derive(Debug, Clone, Copy)]
pub struct CNot {
    control: usize,
    target: usize,
}

impl CNot {
    pub fn new(control: usize, target: usize) -> Self {
        Self { control, target }
    }
}

impl Rule for CNot {
    fn enumerate(&self, parent: &[u8]) -> ChildSpec {
        ChildSpec {
            num_children: 1,
            max_child_size: parent.len(),
        }
    }

    fn expand(&self, parent: &[u8], _child_id: u32, _amp: &mut Complex64, out: &mut [u8]) -> usize {
        out[..parent.len()].copy_from_slice(parent);
        if parent[self.control] == 1 {
            out[self.target] ^= 1;
        }
        parent.len()
    }
}

/// Pauli X (bit flip).
#[derive(Debug, Clone, Copy)]
pub struct PauliX {
    target: usize,
}

impl PauliX {
    pub fn new(target: usize) -> Self {
        Self { target }
    }
}

impl Rule for PauliX {
    fn enumerate(&self, parent: &[u8]) -> ChildSpec {
        ChildSpec {
            num_children: 1,
            max_child_size: parent.len(),
        }
    }

    fn expand(&self, parent: &[u8], _child_id: u32, _amp: &mut Complex64, out: &mut [u8]) -> usize {
        out[..parent.len()].copy_from_slice(parent);
        out[self.target] ^= 1;
        parent.len()
    }
}

/// Pauli Y in the real antisymmetric convention: bit flip with a sign on
/// the `|1⟩ → |0⟩` branch.
#[derive(Debug, Clone, Copy)]
pub struct PauliY {
    target: usize,
}

impl PauliY {
    pub fn new(target: usize) -> Self {
        Self { target }
    }
}

impl Rule for PauliY {
    fn enumerate(&self, parent: &[u8]) -> ChildSpec {
        ChildSpec {
            num_children: 1,
            max_child_size: parent.len(),
        }
    }

    fn expand(&self, parent: &[u8], _child_id: u32, amp: &mut Complex64, out: &mut [u8]) -> usize {
        out[..parent.len()].copy_from_slice(parent);
        out[self.target] ^= 1;
        if parent[self.target] == 1 {
            *amp = -*amp;
        }
        parent.len()
    }
}

/// Pauli Z (phase flip on `|1⟩`), expressed as a branching-free rule.
#[derive(Debug, Clone, Copy)]
pub struct PauliZ {
    target: usize,
}

impl PauliZ {
    pub fn new(target: usize) -> Self {
        Self { target }
    }
}

impl Rule for PauliZ {
    fn enumerate(&self, parent: &[u8]) -> ChildSpec {
        ChildSpec {
            num_children: 1,
            max_child_size: parent.len(),
        }
    }

    fn expand(&self, parent: &[u8], _child_id: u32, amp: &mut Complex64, out: &mut [u8]) -> usize {
        out[..parent.len()].copy_from_slice(parent);
        if parent[self.target] == 1 {
            *amp = -*amp;
        }
        parent.len()
    }
}

/// The same phase flip as [`PauliZ`] in modifier form: mutates amplitudes
/// in place without expanding children.
#[derive(Debug, Clone, Copy)]
pub struct PhaseFlip {
    target: usize,
}

impl PhaseFlip {
    pub fn new(target: usize) -> Self {
        Self { target }
    }
}

impl Modifier for PhaseFlip {
    fn apply(&self, object: &mut [u8], amp: &mut Complex64) {
        if object[self.target] == 1 {
            *amp = -*amp;
        }
    }
}
