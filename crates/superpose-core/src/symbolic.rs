//! Symbolic (candidate-child) buffer
//!
//! Scratch storage for the children of one expansion, before interference
//! decides which survive. One entry per candidate; reorderings go through
//! the `next_oid` permutation so the heavy arrays never move. The buffer
//! grows monotonically to the step's peak and is reused across steps.

use crate::buffer::resize_upsized;
use crate::scan::identity_permutation;
use dashmap::DashMap;

/// Amplitude accumulator for one hash class during interference.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HashClass {
    /// Candidate index of the class representative (first insertion).
    pub oid: usize,
    pub re: f64,
    pub im: f64,
}

/// Per-candidate arrays for one step's expansion.
#[derive(Debug, Default)]
pub struct SymbolicBuffer {
    /// Candidate amplitude (parent amplitude times the rule's multiplier).
    pub re: Vec<f64>,
    pub im: Vec<f64>,
    /// Candidate object byte length.
    pub size: Vec<usize>,
    /// Rule-supplied hash of the candidate's bytes.
    pub hash: Vec<u64>,
    /// Index of the candidate's parent in the previous state.
    pub parent_oid: Vec<usize>,
    /// Which child of that parent this candidate is.
    pub child_id: Vec<u32>,
    /// Set by interference: true iff this candidate represents its hash
    /// class.
    pub is_unique: Vec<bool>,
    /// Permutation through which all reorderings operate.
    pub next_oid: Vec<usize>,
    /// Scratch permutation for out-of-place partitions.
    pub next_oid_scratch: Vec<usize>,
    /// Truncation selectors, valid only while stage 5 runs.
    pub random_selector: Vec<f64>,
    /// Number of candidates (Σ child counts over parents).
    pub num_object: usize,
    /// Number of candidates surviving interference and the tolerance cut.
    pub num_object_after_interferences: usize,

    pub(crate) elimination_map: DashMap<u64, HashClass>,
}

impl SymbolicBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resize every per-candidate array to `num_object` and reset
    /// `next_oid` to the identity permutation.
    pub fn resize(&mut self, num_object: usize) {
        resize_upsized(&mut self.re, num_object);
        resize_upsized(&mut self.im, num_object);
        resize_upsized(&mut self.size, num_object);
        resize_upsized(&mut self.hash, num_object);
        resize_upsized(&mut self.parent_oid, num_object);
        resize_upsized(&mut self.child_id, num_object);
        resize_upsized(&mut self.is_unique, num_object);
        resize_upsized(&mut self.next_oid, num_object);
        resize_upsized(&mut self.random_selector, num_object);
        identity_permutation(&mut self.next_oid[..num_object]);
        self.num_object = num_object;
    }
}
