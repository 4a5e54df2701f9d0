//! Memory-budget oracle
//!
//! Estimates how many survivor objects the next state can hold without
//! exhausting host memory. The estimate charges the OS-reported available
//! memory (minus a configured reserve fraction of total RAM), credits back
//! the capacity already held by the three step buffers (they are reused,
//! not grown on top of), and divides by an estimated per-object cost. The
//! result is halved to leave slack for the next step's symbolic buffer.

use crate::buffer::UPSIZE_POLICY;
use crate::config::{EngineConfig, MIN_STATE_SIZE};
use crate::error::{Error, Result};
use crate::state::State;
use crate::symbolic::SymbolicBuffer;
use rayon::prelude::*;
use std::mem::size_of;

/// Fixed per-object cost of the state buffers: amplitude pair, prefix
/// offset, child-count scratch.
const STATE_ENTRY: u64 = (2 * size_of::<f64>() + size_of::<usize>() + size_of::<u64>()) as u64;

/// Fixed per-candidate cost of the symbolic buffer.
const SYMBOLIC_ENTRY: u64 = (2 * size_of::<f64>()      // re, im
    + size_of::<usize>()                               // size
    + size_of::<u64>()                                 // hash
    + size_of::<usize>()                               // parent_oid
    + size_of::<u32>()                                 // child_id
    + 1                                                // is_unique
    + 2 * size_of::<usize>()                           // next_oid + scratch
    + size_of::<f64>()) as u64; // random_selector

/// Buffer accounting inputs to the budget estimate. In distributed mode
/// every field is summed across ranks before the estimate runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetParts {
    pub last_object_bytes: u64,
    pub next_object_bytes: u64,
    pub last_num_props: u64,
    pub next_num_props: u64,
    pub sym_num_props: u64,
    pub sym_candidates: u64,
    pub last_num_object: u64,
    /// Byte total over surviving candidates.
    pub survivor_bytes: u64,
    pub survivors: u64,
}

impl BudgetParts {
    pub const FIELDS: usize = 9;

    /// Collect the accounting inputs from the three step buffers.
    pub fn gather(last: &State, next: &State, sym: &SymbolicBuffer) -> Self {
        let survivors = sym.num_object_after_interferences;
        let survivor_bytes: usize = sym.next_oid[..survivors]
            .par_iter()
            .map(|&oid| sym.size[oid])
            .sum();

        Self {
            last_object_bytes: last.bytes.len() as u64,
            next_object_bytes: next.bytes.len() as u64,
            last_num_props: last.re.len() as u64,
            next_num_props: next.re.len() as u64,
            sym_num_props: sym.re.len() as u64,
            sym_candidates: sym.num_object as u64,
            last_num_object: last.num_object as u64,
            survivor_bytes: survivor_bytes as u64,
            survivors: survivors as u64,
        }
    }

    /// Flatten for a collective sum.
    pub fn to_array(self) -> [u64; Self::FIELDS] {
        [
            self.last_object_bytes,
            self.next_object_bytes,
            self.last_num_props,
            self.next_num_props,
            self.sym_num_props,
            self.sym_candidates,
            self.last_num_object,
            self.survivor_bytes,
            self.survivors,
        ]
    }

    pub fn from_array(a: [u64; Self::FIELDS]) -> Self {
        Self {
            last_object_bytes: a[0],
            next_object_bytes: a[1],
            last_num_props: a[2],
            next_num_props: a[3],
            sym_num_props: a[4],
            sym_candidates: a[5],
            last_num_object: a[6],
            survivor_bytes: a[7],
            survivors: a[8],
        }
    }
}

/// OS-reported `(total, available)` memory in bytes.
pub fn host_memory() -> (u64, u64) {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    (system.total_memory(), system.available_memory())
}

/// The budget estimate proper; pure so it can be tested and fed summed
/// parts in distributed mode.
pub fn budget_from(
    config: &EngineConfig,
    parts: &BudgetParts,
    total_memory: u64,
    available_memory: u64,
) -> Result<usize> {
    if parts.survivors == 0 {
        return Ok(MIN_STATE_SIZE);
    }

    let reserve = (total_memory as f64 * config.safety_margin as f64) as i128;
    let free = available_memory as i128 - reserve;

    let held = (parts.last_object_bytes + parts.next_object_bytes) as i128
        + ((parts.last_num_props + parts.next_num_props) * STATE_ENTRY) as i128
        + (parts.sym_num_props * SYMBOLIC_ENTRY) as i128;
    let usable = free + held;
    if usable <= 0 {
        return Err(Error::MemoryExhausted {
            budget: 0,
            needed: parts.survivors as usize,
        });
    }

    let average_object = parts.survivor_bytes / parts.survivors;
    let symbolic_share =
        SYMBOLIC_ENTRY * parts.sym_candidates / parts.last_num_object.max(1) / 2;
    let per_object =
        (((average_object + symbolic_share + STATE_ENTRY) as f64) * UPSIZE_POLICY) as u64;

    let raw = (usable as u64 / per_object.max(1)) as usize / 2;
    if raw < MIN_STATE_SIZE {
        if parts.survivors as usize <= MIN_STATE_SIZE {
            // Truncating to the floor frees nothing further; the step
            // cannot fit.
            return Err(Error::MemoryExhausted {
                budget: raw,
                needed: parts.survivors as usize,
            });
        }
        return Ok(MIN_STATE_SIZE);
    }
    Ok(raw)
}

/// Single-host oracle: probe the OS and estimate from the local buffers.
pub fn max_num_object(
    config: &EngineConfig,
    last: &State,
    next: &State,
    sym: &SymbolicBuffer,
) -> Result<usize> {
    let (total, available) = host_memory();
    let parts = BudgetParts::gather(last, next, sym);
    budget_from(config, &parts, total, available)
}
