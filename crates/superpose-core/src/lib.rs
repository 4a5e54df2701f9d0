//! # superpose-core — parallel amplitude-weighted set dynamics
//!
//! A simulator core for discrete dynamics over weighted sets of
//! variable-length byte strings ("objects"), each carrying a complex
//! amplitude. One step applies a user-supplied [`Rule`] that enumerates
//! zero or more successor objects per parent; successors whose bytes hash
//! together interfere (their amplitudes sum), the survivor set is bounded
//! by a memory-budget oracle through unbiased hash-seeded sampling, and
//! the result is renormalized.
//!
//! ## Architecture
//!
//! - [`State`] — packed struct-of-arrays storage for `(amplitude, object)`
//!   pairs.
//! - [`SymbolicBuffer`] — per-candidate scratch between expansion and
//!   compaction; reorderings go through an index permutation, never the
//!   heavy arrays.
//! - [`Engine`] — owns the [`EngineConfig`] tunables and drives the
//!   eight-stage step pipeline; see [`pipeline`] for the stage breakdown
//!   and the building blocks reused by distributed front ends.
//!
//! Exactly three long-lived buffers take part in a step (current state,
//! next state, symbolic scratch). They are swapped rather than freed, so
//! amortized allocation is zero after warm-up, and all stages run over
//! static index partitions on the rayon pool.
//!
//! ## Example
//!
//! ```
//! use num_complex::Complex64;
//! use superpose_core::{ChildSpec, Engine, Rule, State, StepOptions, SymbolicBuffer};
//!
//! /// A one-bit walker: each object branches into itself and its negation.
//! struct Flip;
//!
//! impl Rule for Flip {
//!     fn enumerate(&self, _parent: &[u8]) -> ChildSpec {
//!         ChildSpec { num_children: 2, max_child_size: 1 }
//!     }
//!     fn expand(&self, parent: &[u8], child_id: u32, amp: &mut Complex64, out: &mut [u8]) -> usize {
//!         out[0] = parent[0] ^ child_id as u8;
//!         *amp *= Complex64::new(std::f64::consts::FRAC_1_SQRT_2, 0.0);
//!         1
//!     }
//! }
//!
//! let engine = Engine::default();
//! let mut state = State::new();
//! let mut next = State::new();
//! let mut symbolic = SymbolicBuffer::new();
//! state.append(&[0], Complex64::new(1.0, 0.0));
//!
//! engine.step(&mut state, &Flip, &mut next, &mut symbolic, StepOptions::default())?;
//! assert_eq!(state.num_object(), 2);
//! # Ok::<(), superpose_core::Error>(())
//! ```

mod buffer;
pub mod config;
pub mod error;
pub mod memory;
pub mod pipeline;
pub mod rule;
pub mod sampling;
pub mod scan;
pub mod state;
pub mod symbolic;

pub use config::{EngineConfig, MIN_STATE_SIZE};
pub use error::{Error, Result};
pub use pipeline::{Engine, StepOptions};
pub use rule::{ChildSpec, Modifier, Rule, Salted};
pub use state::State;
pub use symbolic::SymbolicBuffer;
