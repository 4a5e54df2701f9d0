//! # superpose-cluster — multi-rank operation for superpose
//!
//! Extends the shared-memory engine of `superpose-core` across SPMD ranks:
//! every rank runs identical code over its share of the state and meets the
//! others at collective operations. The transport is abstracted behind the
//! [`Communicator`] trait; [`LocalCluster`] ships an in-process
//! implementation (one thread per rank) for single-host clusters and tests.
//!
//! One distributed step reshards the hash space across ranks for
//! interference, truncates and compacts per rank under a globally agreed
//! memory budget, rebalances populations through the pairwise
//! [`equalize`] protocol, and normalizes collectively. With a single rank
//! everything reduces to the local pipeline.
//!
//! ## Example
//!
//! ```
//! use num_complex::Complex64;
//! use superpose_cluster::{cluster_step, equalize, Communicator, LocalCluster};
//! use superpose_core::{ChildSpec, Engine, Rule, State, StepOptions, SymbolicBuffer};
//!
//! struct Flip;
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
//! let states = LocalCluster::run(2, |comm| {
//!     let engine = Engine::default();
//!     let mut state = State::new();
//!     let (mut next, mut symbolic) = (State::new(), SymbolicBuffer::new());
//!     if comm.rank() == 0 {
//!         state.append(&[0], Complex64::new(1.0, 0.0));
//!     }
//!     equalize::distribute_objects(&comm, &mut state, 0).unwrap();
//!     cluster_step(&engine, &comm, &mut state, &Flip, &mut next, &mut symbolic, StepOptions::default())
//!         .unwrap();
//!     equalize::gather_objects(&comm, &mut state, 0).unwrap();
//!     state
//! });
//! assert_eq!(states[0].num_object(), 2);
//! ```

pub mod comm;
pub mod equalize;
pub mod error;
pub mod local;
pub mod partition;
pub mod pipeline;

pub use comm::Communicator;
pub use error::{Error, Result};
pub use local::{LocalCluster, LocalComm};
pub use pipeline::step as cluster_step;
