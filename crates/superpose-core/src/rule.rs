//! Rule and modifier interfaces
//!
//! A rule is the dynamics plug-in: for each object in the state it
//! enumerates zero or more successor objects ("children"), each carrying an
//! amplitude multiplier. The engine queries a rule `O(M)` times per step, so
//! implementations should stay small and branch-predictable; they are shared
//! across worker threads and must be `Sync`.

use num_complex::Complex64;
use xxhash_rust::xxh3::{xxh3_64, xxh3_64_with_seed};

/// Child enumeration result for one parent object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildSpec {
    /// Number of successor objects this parent produces. Zero is legal
    /// (child-free decay).
    pub num_children: u32,
    /// Upper bound on the byte length of any child of this parent. `expand`
    /// must not write past it.
    pub max_child_size: usize,
}

/// The dynamics of a simulation step.
///
/// For a fixed parent, `enumerate` and `expand(_, k, ..)` must be
/// deterministic; the engine expands every child twice per step (once for
/// hashing, once to materialize survivors) and treats size disagreements
/// between the passes as fatal.
pub trait Rule: Sync {
    /// Count the children of `parent` and bound their size.
    fn enumerate(&self, parent: &[u8]) -> ChildSpec;

    /// Write the `child_id`-th child of `parent` into `out`, multiplying
    /// `amp` in place by the transition's matrix element. Returns the number
    /// of bytes written, which must not exceed the declared
    /// `max_child_size`.
    fn expand(&self, parent: &[u8], child_id: u32, amp: &mut Complex64, out: &mut [u8]) -> usize;

    /// Hash of a child's byte string. Children with equal hashes are
    /// coalesced by amplitude summation, so a rule that cannot tolerate
    /// cross-object collisions should embed a stronger digest here.
    fn hash_child(&self, child: &[u8]) -> u64 {
        xxh3_64(child)
    }
}

/// A rule wrapper that reseeds the child hash.
///
/// Truncation sampling is derived deterministically from object hashes;
/// wrapping a rule in `Salted` with different seeds yields independent
/// sampling trials over the same dynamics.
#[derive(Debug, Clone, Copy)]
pub struct Salted<R> {
    inner: R,
    seed: u64,
}

impl<R> Salted<R> {
    pub fn new(inner: R, seed: u64) -> Self {
        Self { inner, seed }
    }
}

impl<R: Rule> Rule for Salted<R> {
    fn enumerate(&self, parent: &[u8]) -> ChildSpec {
        self.inner.enumerate(parent)
    }

    fn expand(&self, parent: &[u8], child_id: u32, amp: &mut Complex64, out: &mut [u8]) -> usize {
        self.inner.expand(parent, child_id, amp, out)
    }

    fn hash_child(&self, child: &[u8]) -> u64 {
        xxh3_64_with_seed(child, self.seed)
    }
}

/// In-place mutation of `(object, amplitude)` pairs.
///
/// Modifiers cover diagonal operators (phase gates and the like): they may
/// rewrite object bytes and amplitude but cannot change object sizes or
/// branch into several children, and they bypass the step pipeline entirely.
pub trait Modifier: Sync {
    fn apply(&self, object: &mut [u8], amp: &mut Complex64);
}

impl<F> Modifier for F
where
    F: Fn(&mut [u8], &mut Complex64) + Sync,
{
    fn apply(&self, object: &mut [u8], amp: &mut Complex64) {
        self(object, amp)
    }
}
