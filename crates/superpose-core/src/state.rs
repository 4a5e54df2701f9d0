//! Packed state buffer
//!
//! A state is a multiset of variable-length byte objects, each weighted by a
//! complex amplitude. Storage is struct-of-arrays: parallel `re`/`im`
//! amplitude arrays, one concatenated byte payload, and a prefix-offset
//! array locating object `i` at `bytes[offset[i]..offset[i + 1]]`.
//!
//! Exactly three long-lived buffers participate in a step (current state,
//! next state, symbolic scratch); they are swapped rather than freed, so
//! steady-state allocation is zero.

use crate::buffer::resize_upsized;
use num_complex::Complex64;
use rayon::prelude::*;

/// A weighted multiset of byte-string objects.
#[derive(Debug)]
pub struct State {
    pub(crate) re: Vec<f64>,
    pub(crate) im: Vec<f64>,
    pub(crate) bytes: Vec<u8>,
    /// Prefix offsets, length `num_object + 1`, `offset[0] == 0`.
    pub(crate) offset: Vec<usize>,
    /// Per-parent child counts, reused as scratch each step.
    pub(crate) num_child: Vec<u64>,
    pub(crate) num_object: usize,
    pub(crate) total_proba: f64,
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    pub fn new() -> Self {
        Self {
            re: Vec::new(),
            im: Vec::new(),
            bytes: Vec::new(),
            offset: vec![0],
            num_child: vec![0],
            num_object: 0,
            total_proba: 1.0,
        }
    }

    /// Number of objects currently stored.
    pub fn num_object(&self) -> usize {
        self.num_object
    }

    /// Sum of squared amplitude magnitudes as of the last normalization
    /// (1 after a local normalize, the node-local share in distributed
    /// mode, 0 for a collapsed state).
    pub fn total_proba(&self) -> f64 {
        self.total_proba
    }

    /// Append one `(object, amplitude)` pair, growing the buffers.
    pub fn append(&mut self, object: &[u8], amp: Complex64) {
        let begin = self.offset[self.num_object];
        self.num_object += 1;
        self.resize(self.num_object);
        self.allocate(begin + object.len());

        self.bytes[begin..begin + object.len()].copy_from_slice(object);
        self.re[self.num_object - 1] = amp.re;
        self.im[self.num_object - 1] = amp.im;
        self.offset[self.num_object] = begin + object.len();
    }

    /// Bytes and amplitude of object `oid`.
    pub fn object(&self, oid: usize) -> (&[u8], Complex64) {
        let bytes = &self.bytes[self.offset[oid]..self.offset[oid + 1]];
        (bytes, Complex64::new(self.re[oid], self.im[oid]))
    }

    /// Iterate over `(amplitude, object_bytes)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Complex64, &[u8])> {
        (0..self.num_object).map(|oid| {
            let (bytes, amp) = self.object(oid);
            (amp, bytes)
        })
    }

    /// Amplitude component arrays.
    pub fn amplitudes(&self) -> (&[f64], &[f64]) {
        (&self.re[..self.num_object], &self.im[..self.num_object])
    }

    /// Prefix offsets, length `num_object + 1`.
    pub fn offsets(&self) -> &[usize] {
        &self.offset[..=self.num_object]
    }

    /// The concatenated object payload.
    pub fn object_bytes(&self) -> &[u8] {
        &self.bytes[..self.offset[self.num_object]]
    }

    /// Set the per-object property arrays to length `num_object`,
    /// preserving prefixes.
    pub(crate) fn resize(&mut self, num_object: usize) {
        resize_upsized(&mut self.re, num_object);
        resize_upsized(&mut self.im, num_object);
        resize_upsized(&mut self.offset, num_object + 1);
        resize_upsized(&mut self.num_child, num_object + 1);
    }

    /// Set the payload length without initializing grown bytes beyond the
    /// growth policy's zero fill.
    pub(crate) fn allocate(&mut self, len: usize) {
        resize_upsized(&mut self.bytes, len);
    }

    /// Sum of `re² + im²` over all objects.
    pub fn sum_norm(&self) -> f64 {
        self.re[..self.num_object]
            .par_iter()
            .zip_eq(&self.im[..self.num_object])
            .map(|(r, i)| r * r + i * i)
            .sum()
    }

    /// Rescale amplitudes so the global squared norm becomes 1, given this
    /// buffer's local contribution `local` and the global sum `global`.
    /// Records `local / global` as this buffer's `total_proba`.
    pub fn normalize_against(&mut self, local: f64, global: f64) {
        if self.num_object == 0 || global == 0.0 {
            self.total_proba = 0.0;
            return;
        }

        let factor = global.sqrt();
        if factor != 1.0 {
            self.re[..self.num_object]
                .par_iter_mut()
                .for_each(|r| *r /= factor);
            self.im[..self.num_object]
                .par_iter_mut()
                .for_each(|i| *i /= factor);
        }
        self.total_proba = local / global;
    }

    /// Normalize to unit total probability.
    pub fn normalize(&mut self) {
        let total = self.sum_norm();
        self.normalize_against(total, total);
    }

    /// Recompute `total_proba` from the stored amplitudes.
    pub fn refresh_total_proba(&mut self) {
        self.total_proba = self.sum_norm();
    }

    /// Expectation of a linear observable: `Σ f(object) · |amp|²`.
    pub fn expectation<F>(&self, observable: F) -> f64
    where
        F: Fn(&[u8]) -> f64 + Sync,
    {
        (0..self.num_object)
            .into_par_iter()
            .map(|oid| {
                let (bytes, amp) = self.object(oid);
                observable(bytes) * amp.norm_sqr()
            })
            .sum()
    }

    /// Drop the last `count` objects.
    pub fn pop_tail(&mut self, count: usize) {
        debug_assert!(count <= self.num_object);
        self.num_object -= count;
        let end = self.offset[self.num_object];
        self.re.truncate(self.num_object);
        self.im.truncate(self.num_object);
        self.offset.truncate(self.num_object + 1);
        self.num_child.truncate(self.num_object + 1);
        self.bytes.truncate(end);
    }

    /// Append a block of objects whose offsets were rebased to start at 0.
    ///
    /// `ends[k]` is the exclusive end of the `k`-th appended object within
    /// `payload`; `payload.len()` must equal `ends.last()`.
    pub fn append_block(&mut self, amps: &[Complex64], ends: &[u64], payload: &[u8]) {
        debug_assert_eq!(amps.len(), ends.len());
        debug_assert_eq!(payload.len() as u64, ends.last().copied().unwrap_or(0));

        let base_object = self.num_object;
        let base_byte = self.offset[base_object];
        self.num_object += amps.len();
        self.resize(self.num_object);
        self.allocate(base_byte + payload.len());

        self.bytes[base_byte..base_byte + payload.len()].copy_from_slice(payload);
        for (k, (amp, &end)) in amps.iter().zip(ends).enumerate() {
            self.re[base_object + k] = amp.re;
            self.im[base_object + k] = amp.im;
            self.offset[base_object + k + 1] = base_byte + end as usize;
        }
    }
}
