//! Population equalizer and object migration
//!
//! After truncation, per-rank populations can drift apart. The equalizer
//! iterates a pairwise exchange: rank 0 gathers every rank's object count,
//! pairs the most loaded with the least loaded, and each pair moves half
//! the difference from the larger to the smaller. Rounds are bounded by
//! `⌈log₂ P⌉` or by the configured imbalance threshold.
//!
//! A transfer is a fixed wire sequence: a `u64` count, the amplitudes, the
//! offsets rebased to start at 0, then the payload bytes chunked below the
//! 32-bit message limit.

use crate::comm::{self, Communicator};
use crate::error::{Error, Result};
use crate::partition::make_equal_pairs;
use num_complex::Complex64;
use superpose_core::{EngineConfig, State};
use tracing::debug;

/// Largest byte payload per point-to-point message.
const MAX_MESSAGE_BYTES: usize = (1 << 31) - 1;

/// Iterate pairwise exchanges until the population imbalance
/// `(max - avg) / max` drops under the configured threshold, every rank is
/// small enough not to bother, or `⌈log₂ P⌉` rounds have run.
pub fn equalize_until_balanced<C: Communicator + ?Sized>(
    comm: &C,
    state: &mut State,
    config: &EngineConfig,
) -> Result<()> {
    let size = comm.size();
    if size == 1 {
        return Ok(());
    }

    let max_rounds = size.next_power_of_two().trailing_zeros();
    for round in 0..max_rounds {
        let local = state.num_object() as u64;
        let max = comm::allreduce_max_u64(comm, local)?;
        let total = comm::allreduce_sum_u64(comm, local)?;
        if max <= config.min_equalize_size as u64 {
            break;
        }
        let imbalance = (max as f32 - total as f32 / size as f32) / max as f32;
        if !(imbalance > config.equalize_imbalance) {
            break;
        }
        debug!(round, max, total, imbalance, "equalizing populations");
        equalize_round(comm, state)?;
    }
    Ok(())
}

/// One pairing round.
fn equalize_round<C: Communicator + ?Sized>(comm: &C, state: &mut State) -> Result<()> {
    let me = comm.rank();

    // Rank 0 computes the pairing from everyone's counts.
    let counts = comm::allgather_u64(comm, state.num_object() as u64)?;
    let pairing: Vec<u64> = if me == 0 {
        make_equal_pairs(&counts).into_iter().map(|p| p as u64).collect()
    } else {
        Vec::new()
    };
    let pairing = comm::bcast_u64s(comm, 0, &pairing)?;
    let peer = pairing[me] as usize;
    if peer == me {
        return Ok(());
    }

    // One count each way; rank order keeps unbuffered transports safe.
    let mine = state.num_object() as u64;
    let theirs = if me < peer {
        comm.send(peer, &mine.to_le_bytes())?;
        recv_u64(comm, peer)?
    } else {
        let theirs = recv_u64(comm, peer)?;
        comm.send(peer, &mine.to_le_bytes())?;
        theirs
    };

    if mine > theirs {
        send_objects(comm, state, ((mine - theirs) / 2) as usize, peer)?;
    } else if mine < theirs {
        receive_objects(comm, state, peer)?;
    }
    Ok(())
}

fn recv_u64<C: Communicator + ?Sized>(comm: &C, src: usize) -> Result<u64> {
    let bytes = comm.recv(src)?;
    bytes
        .as_slice()
        .try_into()
        .map(u64::from_le_bytes)
        .map_err(|_| Error::Comm("malformed u64 payload".into()))
}

/// Send the last `count` objects to `dst` and drop them locally.
pub fn send_objects<C: Communicator + ?Sized>(
    comm: &C,
    state: &mut State,
    count: usize,
    dst: usize,
) -> Result<()> {
    comm.send(dst, &(count as u64).to_le_bytes())?;
    if count == 0 {
        return Ok(());
    }

    let begin = state.num_object() - count;
    let (re, im) = state.amplitudes();
    let amps: Vec<Complex64> = (begin..state.num_object())
        .map(|i| Complex64::new(re[i], im[i]))
        .collect();

    // Offsets are rebased so the receiver can append at its own tail.
    let offsets = state.offsets();
    let base = offsets[begin];
    let ends: Vec<u64> = offsets[begin + 1..]
        .iter()
        .map(|&end| (end - base) as u64)
        .collect();

    comm::send_slice(comm, dst, &amps)?;
    comm::send_slice(comm, dst, &ends)?;
    for chunk in state.object_bytes()[base..].chunks(MAX_MESSAGE_BYTES) {
        comm.send(dst, chunk)?;
    }

    state.pop_tail(count);
    Ok(())
}

/// Receive one `send_objects` transfer from `src` and append it.
pub fn receive_objects<C: Communicator + ?Sized>(
    comm: &C,
    state: &mut State,
    src: usize,
) -> Result<()> {
    let count = recv_u64(comm, src)? as usize;
    if count == 0 {
        return Ok(());
    }

    let amps: Vec<Complex64> = comm::recv_vec(comm, src)?;
    let ends: Vec<u64> = comm::recv_vec(comm, src)?;
    if amps.len() != count || ends.len() != count {
        return Err(Error::Comm("object transfer length mismatch".into()));
    }

    let total = ends.last().copied().unwrap_or(0) as usize;
    let mut payload = Vec::with_capacity(total);
    while payload.len() < total {
        payload.extend_from_slice(&comm.recv(src)?);
    }
    if payload.len() != total {
        return Err(Error::Comm("object transfer payload mismatch".into()));
    }

    state.append_block(&amps, &ends, &payload);
    Ok(())
}

/// Spread `root`'s objects evenly over all ranks.
pub fn distribute_objects<C: Communicator + ?Sized>(
    comm: &C,
    state: &mut State,
    root: usize,
) -> Result<()> {
    let size = comm.size();
    if comm.rank() == root {
        let initial = state.num_object();
        for node in 1..size {
            let dst = if node <= root { node - 1 } else { node };
            let share = initial * (node + 1) / size - initial * node / size;
            send_objects(comm, state, share, dst)?;
        }
    } else {
        receive_objects(comm, state, root)?;
    }
    state.refresh_total_proba();
    Ok(())
}

/// Collect every rank's objects onto `root`.
pub fn gather_objects<C: Communicator + ?Sized>(
    comm: &C,
    state: &mut State,
    root: usize,
) -> Result<()> {
    let size = comm.size();
    if comm.rank() == root {
        for node in 1..size {
            let src = if node <= root { node - 1 } else { node };
            receive_objects(comm, state, src)?;
        }
    } else {
        let all = state.num_object();
        send_objects(comm, state, all, root)?;
    }
    state.refresh_total_proba();
    Ok(())
}

/// Total object count across all ranks.
pub fn total_num_object<C: Communicator + ?Sized>(comm: &C, state: &State) -> Result<u64> {
    comm::allreduce_sum_u64(comm, state.num_object() as u64)
}

/// Globally summed expectation `Σ f(object) · |amp|²` of a normalized
/// distributed state.
pub fn global_expectation<C, F>(comm: &C, state: &State, observable: F) -> Result<f64>
where
    C: Communicator + ?Sized,
    F: Fn(&[u8]) -> f64 + Sync,
{
    comm::allreduce_sum_f64(comm, state.expectation(observable))
}
