//! Distributed step pipeline
//!
//! With one rank this is exactly the shared-memory pipeline. With more, the
//! interference stage becomes shard-coalesce-unshard: candidates are
//! partitioned by hash prefix into buckets, bucket ranges are packed into
//! `ranks × threads` segments with balanced global load, `(hash, amplitude)`
//! pairs travel to their segment's owner through an all-to-all exchange,
//! every thread coalesces its own disjoint bucket range, and the verdicts
//! travel back. Truncation and compaction then run per rank against a
//! globally agreed budget, the equalizer rebalances populations, and
//! normalization is a collective sum.

use crate::comm::{self, Communicator};
use crate::equalize;
use crate::error::{Error, Result};
use crate::partition::{
    bucket_partition, load_balancing_from_prefix_sum, BUCKETS_PER_SEGMENT,
};
use ahash::AHashMap;
use num_complex::Complex64;
use rayon::prelude::*;
use superpose_core::memory::{self, BudgetParts};
use superpose_core::scan::{par_partition_by, SharedSliceMut};
use superpose_core::pipeline as core_pipeline;
use superpose_core::{Engine, Rule, State, StepOptions, SymbolicBuffer};
use tracing::trace_span;

fn no_mid_step(_stage: usize) {}

/// Advance `state` by one application of `rule` across all ranks of `comm`.
///
/// Equivalent to [`Engine::step`] when the communicator has a single rank.
/// All ranks must call this collectively with the same rule and options.
pub fn step<R, C>(
    engine: &Engine,
    comm: &C,
    state: &mut State,
    rule: &R,
    next: &mut State,
    symbolic: &mut SymbolicBuffer,
    opts: StepOptions,
) -> Result<()>
where
    R: Rule + ?Sized,
    C: Communicator + ?Sized,
{
    if comm.size() == 1 {
        return engine.step(state, rule, next, symbolic, opts).map_err(Error::from);
    }

    let mid: &dyn Fn(usize) = match opts.mid_step {
        Some(f) => f,
        None => &no_mid_step,
    };

    core_pipeline::generate_symbolic(state, rule, symbolic, mid)?;
    compute_collisions(comm, symbolic, engine)?;

    let max_num_object = match opts.max_num_object {
        Some(n) => n,
        None => resolve_budget(comm, engine, state, next, symbolic)?,
    };

    core_pipeline::finalize(symbolic, rule, state, next, max_num_object, mid)?;
    equalize::equalize_until_balanced(comm, next, engine.config())?;

    let local = next.sum_norm();
    let global = comm::allreduce_sum_f64(comm, local)?;
    next.normalize_against(local, global);
    mid(8);

    std::mem::swap(state, next);
    Ok(())
}

/// Global memory budget: buffer accounting is summed across ranks, the
/// memory probe runs on rank 0, and the resulting global budget is split
/// evenly per rank.
fn resolve_budget<C: Communicator + ?Sized>(
    comm: &C,
    engine: &Engine,
    last: &State,
    next: &State,
    symbolic: &SymbolicBuffer,
) -> Result<usize> {
    let local = BudgetParts::gather(last, next, symbolic).to_array();
    let summed = comm::reduce_sum_u64(comm, 0, &local)?;
    let summed = comm::bcast_u64s(comm, 0, &summed)?;
    if summed.len() != BudgetParts::FIELDS {
        return Err(Error::Comm("budget exchange length mismatch".into()));
    }
    let mut fields = [0u64; BudgetParts::FIELDS];
    fields.copy_from_slice(&summed);
    let parts = BudgetParts::from_array(fields);

    let probe = if comm.rank() == 0 {
        let (total, available) = memory::host_memory();
        vec![total, available]
    } else {
        Vec::new()
    };
    let probe = comm::bcast_u64s(comm, 0, &probe)?;

    let global = memory::budget_from(engine.config(), &parts, probe[0], probe[1])?;
    Ok((global / comm.size()).max(1))
}

/// Distributed stage 4.
fn compute_collisions<C: Communicator + ?Sized>(
    comm: &C,
    symbolic: &mut SymbolicBuffer,
    engine: &Engine,
) -> Result<()> {
    if comm.size() == 1 {
        core_pipeline::compute_interferences(symbolic, engine.config());
        return Ok(());
    }

    let size = comm.size();
    let rank = comm.rank();
    let num_threads = rayon::current_num_threads().max(1);
    let n_segment = size * num_threads;
    let num_bucket = (BUCKETS_PER_SEGMENT * n_segment).next_power_of_two();
    let shift = 64 - num_bucket.trailing_zeros();
    let m = symbolic.num_object;

    let _span = trace_span!("distributed_interference", candidates = m, ranks = size).entered();

    // Local partition into bucket order; the permutation stays put until
    // the verdicts come back.
    let partition_begin = {
        let SymbolicBuffer {
            hash,
            next_oid,
            next_oid_scratch,
            ..
        } = symbolic;
        bucket_partition(&mut next_oid[..m], next_oid_scratch, hash, shift, num_bucket)
    };
    let partitioned_hash: Vec<u64> = symbolic.next_oid[..m]
        .par_iter()
        .map(|&oid| symbolic.hash[oid])
        .collect();
    let partitioned_mag: Vec<Complex64> = symbolic.next_oid[..m]
        .par_iter()
        .map(|&oid| Complex64::new(symbolic.re[oid], symbolic.im[oid]))
        .collect();

    // Rank 0 packs bucket ranges into segments with balanced global load.
    let bucket_counts: Vec<u64> = partition_begin
        .windows(2)
        .map(|w| (w[1] - w[0]) as u64)
        .collect();
    let total_counts = comm::reduce_sum_u64(comm, 0, &bucket_counts)?;
    let boundaries: Vec<u64> = if rank == 0 {
        let mut prefix = vec![0u64; num_bucket + 1];
        for (b, &c) in total_counts.iter().enumerate() {
            prefix[b + 1] = prefix[b] + c;
        }
        load_balancing_from_prefix_sum(&prefix, n_segment)
            .into_iter()
            .map(|b| b as u64)
            .collect()
    } else {
        Vec::new()
    };
    let boundaries: Vec<usize> = comm::bcast_u64s(comm, 0, &boundaries)?
        .into_iter()
        .map(|b| b as usize)
        .collect();

    // Translate the global bucket boundaries into local element ranges.
    let local_disp: Vec<usize> = boundaries.iter().map(|&b| partition_begin[b]).collect();
    let segment_counts: Vec<u64> = local_disp
        .windows(2)
        .map(|w| (w[1] - w[0]) as u64)
        .collect();
    let send_counts: Vec<usize> = (0..size)
        .map(|r| local_disp[(r + 1) * num_threads] - local_disp[r * num_threads])
        .collect();

    // Exchange per-segment counts, then the (hash, amplitude) pairs.
    let all_segment_counts = comm::allgather_u64_slices(comm, &segment_counts)?;
    let mut global_disp = vec![0usize; n_segment + 1];
    for node in 0..size {
        if all_segment_counts[node].len() != n_segment {
            return Err(Error::Comm("segment count exchange mismatch".into()));
        }
        for t in 0..num_threads {
            let incoming = all_segment_counts[node][rank * num_threads + t] as usize;
            global_disp[node * num_threads + t + 1] = incoming;
        }
    }
    for i in 0..n_segment {
        global_disp[i + 1] += global_disp[i];
    }
    let recv_counts: Vec<usize> = (0..size)
        .map(|r| global_disp[(r + 1) * num_threads] - global_disp[r * num_threads])
        .collect();

    let (hash_buffer, got) = comm::alltoallv::<u64, _>(comm, &partitioned_hash, &send_counts)?;
    if got != recv_counts {
        return Err(Error::Comm("hash exchange count mismatch".into()));
    }
    let (mut mag_buffer, _) = comm::alltoallv::<Complex64, _>(comm, &partitioned_mag, &send_counts)?;
    let mut unique_buffer = vec![0u8; hash_buffer.len()];

    // Coalesce: thread t owns, for every origin node, the incoming segment
    // (node, t); equal hashes always land in the same segment owner. The
    // representative migrates toward the origin node with fewer survivors
    // to bias load balance.
    {
        let rank_begin: Vec<usize> = (0..=size).map(|r| global_disp[r * num_threads]).collect();
        let mag = SharedSliceMut::new(&mut mag_buffer);
        let unique = SharedSliceMut::new(&mut unique_buffer);
        let hash_buffer = &hash_buffer;
        let global_disp = &global_disp;
        let rank_begin = &rank_begin;

        (0..num_threads).into_par_iter().for_each(|t| {
            let owned: usize = (0..size)
                .map(|node| {
                    global_disp[node * num_threads + t + 1] - global_disp[node * num_threads + t]
                })
                .sum();
            let mut classes: AHashMap<u64, usize> = AHashMap::with_capacity(owned);
            let mut survivors = vec![0i64; size];
            let node_of = |oid: usize| rank_begin.partition_point(|&b| b <= oid) - 1;

            for node in 0..size {
                let begin = global_disp[node * num_threads + t];
                let end = global_disp[node * num_threads + t + 1];
                for oid in begin..end {
                    match classes.entry(hash_buffer[oid]) {
                        std::collections::hash_map::Entry::Vacant(slot) => {
                            slot.insert(oid);
                            survivors[node] += 1;
                            // SAFETY: all indices touched in this task live
                            // in segments (.., t), disjoint from every other
                            // task's segments.
                            unsafe { unique.set(oid, 1) };
                        }
                        std::collections::hash_map::Entry::Occupied(mut slot) => {
                            let other = *slot.get();
                            let other_node = node_of(other);
                            if survivors[node] >= survivors[other_node] {
                                // SAFETY: as above; `other` shares this
                                // hash, hence this task's bucket range.
                                unsafe {
                                    let sum = mag.get(other) + mag.get(oid);
                                    mag.set(other, sum);
                                    unique.set(oid, 0);
                                }
                            } else {
                                // Demote the representative to the busier
                                // node's entry and keep ours.
                                slot.insert(oid);
                                // SAFETY: as above.
                                unsafe {
                                    let sum = mag.get(oid) + mag.get(other);
                                    mag.set(oid, sum);
                                    unique.set(oid, 1);
                                    unique.set(other, 0);
                                }
                                survivors[node] += 1;
                                survivors[other_node] -= 1;
                            }
                        }
                    }
                }
            }
        });
    }

    // Verdicts travel back along the same routes, then scatter out of the
    // partitioned order through the permutation.
    let (mag_back, _) = comm::alltoallv::<Complex64, _>(comm, &mag_buffer, &recv_counts)?;
    let (unique_back, _) = comm::alltoallv::<u8, _>(comm, &unique_buffer, &recv_counts)?;
    if mag_back.len() != m || unique_back.len() != m {
        return Err(Error::Comm("interference verdict exchange mismatch".into()));
    }

    {
        let SymbolicBuffer {
            re,
            im,
            is_unique,
            next_oid,
            ..
        } = symbolic;
        let re = SharedSliceMut::new(&mut re[..m]);
        let im = SharedSliceMut::new(&mut im[..m]);
        let is_unique = SharedSliceMut::new(&mut is_unique[..m]);
        next_oid[..m].par_iter().enumerate().for_each(|(id, &oid)| {
            // SAFETY: `next_oid` is a permutation, so each slot is written
            // by exactly one task.
            unsafe {
                re.set(oid, mag_back[id].re);
                im.set(oid, mag_back[id].im);
                is_unique.set(oid, unique_back[id] != 0);
            }
        });
    }

    let tolerance = engine.config().tolerance;
    let SymbolicBuffer {
        re,
        im,
        is_unique,
        next_oid,
        next_oid_scratch,
        num_object_after_interferences,
        ..
    } = symbolic;
    *num_object_after_interferences = par_partition_by(&mut next_oid[..m], next_oid_scratch, |oid| {
        is_unique[oid] && re[oid] * re[oid] + im[oid] * im[oid] > tolerance
    });

    Ok(())
}
