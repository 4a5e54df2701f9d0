//! The communicator seam
//!
//! Multi-rank operation is SPMD: every rank runs identical code and meets
//! the others at collective operations. [`Communicator`] is the seam
//! between the pipeline and the transport; implementations provide three
//! primitives (allgather, send, recv) and the typed collectives the
//! pipeline needs are derived here. The in-process [`crate::LocalCluster`]
//! implements it for single-host use and tests; an MPI binding would
//! implement the same trait.
//!
//! Collective calls must be made by every rank in the same order. Payloads
//! are raw little-endian bytes; typed helpers cast through `bytemuck` Pod
//! views.

use crate::error::{Error, Result};
use bytemuck::{Pod, Zeroable};
use std::mem::size_of;

/// Rank identity plus the three transport primitives.
pub trait Communicator {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Collect every rank's payload, in rank order, on every rank.
    fn allgather(&self, payload: &[u8]) -> Result<Vec<Vec<u8>>>;

    /// Point-to-point send to `dst`. May buffer.
    fn send(&self, dst: usize, payload: &[u8]) -> Result<()>;

    /// Blocking point-to-point receive of one `send` from `src`.
    fn recv(&self, src: usize) -> Result<Vec<u8>>;
}

/// Reinterpret a byte payload as Pod values, copying to fix alignment.
pub(crate) fn pods_from_bytes<T: Pod>(bytes: &[u8]) -> Result<Vec<T>> {
    if bytes.len() % size_of::<T>() != 0 {
        return Err(Error::Comm(format!(
            "payload of {} bytes is not a whole number of {}-byte elements",
            bytes.len(),
            size_of::<T>()
        )));
    }
    let mut out = vec![T::zeroed(); bytes.len() / size_of::<T>()];
    bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(bytes);
    Ok(out)
}

/// All ranks learn every rank's scalar.
pub fn allgather_u64<C: Communicator + ?Sized>(comm: &C, value: u64) -> Result<Vec<u64>> {
    let gathered = comm.allgather(&value.to_le_bytes())?;
    gathered
        .iter()
        .map(|bytes| {
            bytes
                .as_slice()
                .try_into()
                .map(u64::from_le_bytes)
                .map_err(|_| Error::Comm("malformed u64 payload".into()))
        })
        .collect()
}

pub fn allreduce_sum_u64<C: Communicator + ?Sized>(comm: &C, value: u64) -> Result<u64> {
    Ok(allgather_u64(comm, value)?.iter().sum())
}

pub fn allreduce_max_u64<C: Communicator + ?Sized>(comm: &C, value: u64) -> Result<u64> {
    Ok(allgather_u64(comm, value)?.into_iter().max().unwrap_or(0))
}

pub fn allreduce_sum_f64<C: Communicator + ?Sized>(comm: &C, value: f64) -> Result<f64> {
    let gathered = comm.allgather(&value.to_le_bytes())?;
    let mut sum = 0.0;
    for bytes in &gathered {
        let raw: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::Comm("malformed f64 payload".into()))?;
        sum += f64::from_le_bytes(raw);
    }
    Ok(sum)
}

/// Element-wise sum of every rank's slice; the result is meaningful on
/// `root` only (other ranks get an empty vector).
pub fn reduce_sum_u64<C: Communicator + ?Sized>(
    comm: &C,
    root: usize,
    values: &[u64],
) -> Result<Vec<u64>> {
    let gathered = comm.allgather(bytemuck::cast_slice(values))?;
    if comm.rank() != root {
        return Ok(Vec::new());
    }
    let mut sum = vec![0u64; values.len()];
    for bytes in &gathered {
        let contribution: Vec<u64> = pods_from_bytes(bytes)?;
        if contribution.len() != sum.len() {
            return Err(Error::Comm("reduce payload length mismatch".into()));
        }
        for (acc, x) in sum.iter_mut().zip(contribution) {
            *acc += x;
        }
    }
    Ok(sum)
}

/// Every rank receives `root`'s slice; non-root callers pass any slice
/// (conventionally empty).
pub fn bcast_u64s<C: Communicator + ?Sized>(
    comm: &C,
    root: usize,
    values: &[u64],
) -> Result<Vec<u64>> {
    let payload = if comm.rank() == root {
        bytemuck::cast_slice(values)
    } else {
        &[]
    };
    let gathered = comm.allgather(payload)?;
    pods_from_bytes(&gathered[root])
}

/// Each rank allgathers a fixed-length slice; returns one vector per rank.
pub fn allgather_u64_slices<C: Communicator + ?Sized>(
    comm: &C,
    values: &[u64],
) -> Result<Vec<Vec<u64>>> {
    let gathered = comm.allgather(bytemuck::cast_slice(values))?;
    gathered.iter().map(|bytes| pods_from_bytes(bytes)).collect()
}

/// Personalized all-to-all: rank `s` sends `counts[d]` consecutive elements
/// of `send` to rank `d`. Returns the received elements concatenated in
/// source-rank order, plus the per-source counts.
pub fn alltoallv<T: Pod, C: Communicator + ?Sized>(
    comm: &C,
    send: &[T],
    counts: &[usize],
) -> Result<(Vec<T>, Vec<usize>)> {
    let size = comm.size();
    let me = comm.rank();
    debug_assert_eq!(counts.len(), size);
    debug_assert_eq!(counts.iter().sum::<usize>(), send.len());

    // Header: per-destination counts; body: the full send buffer. Each
    // receiver slices out its own segment.
    let header: Vec<u64> = counts.iter().map(|&c| c as u64).collect();
    let mut message = Vec::with_capacity(size * size_of::<u64>() + std::mem::size_of_val(send));
    message.extend_from_slice(bytemuck::cast_slice(&header));
    message.extend_from_slice(bytemuck::cast_slice(send));

    let gathered = comm.allgather(&message)?;

    let mut received = Vec::new();
    let mut recv_counts = Vec::with_capacity(size);
    for blob in &gathered {
        let header_bytes = size * size_of::<u64>();
        if blob.len() < header_bytes {
            return Err(Error::Comm("truncated all-to-all message".into()));
        }
        let counts: Vec<u64> = pods_from_bytes(&blob[..header_bytes])?;
        let begin: u64 = counts[..me].iter().sum();
        let count = counts[me] as usize;

        let payload = &blob[header_bytes..];
        let lo = begin as usize * size_of::<T>();
        let hi = lo + count * size_of::<T>();
        if hi > payload.len() {
            return Err(Error::Comm("truncated all-to-all segment".into()));
        }
        received.extend(pods_from_bytes::<T>(&payload[lo..hi])?);
        recv_counts.push(count);
    }
    Ok((received, recv_counts))
}

/// Typed point-to-point send of a Pod slice.
pub fn send_slice<T: Pod, C: Communicator + ?Sized>(comm: &C, dst: usize, values: &[T]) -> Result<()> {
    comm.send(dst, bytemuck::cast_slice(values))
}

/// Typed point-to-point receive of a Pod vector.
pub fn recv_vec<T: Pod, C: Communicator + ?Sized>(comm: &C, src: usize) -> Result<Vec<T>> {
    pods_from_bytes(&comm.recv(src)?)
}
