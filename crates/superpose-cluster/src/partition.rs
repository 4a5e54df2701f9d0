//! Hash-space sharding helpers
//!
//! The distributed interference shards candidates by the leading bits of
//! their hash: a multi-way counting partition lays the local permutation
//! out bucket by bucket, a 1-D packing assigns contiguous bucket ranges to
//! the `ranks × threads` segments so each segment's global load is
//! balanced, and a largest-with-smallest pairing drives the equalizer.

use rayon::prelude::*;
use superpose_core::scan::SharedSliceMut;

/// Buckets per segment; more buckets give the packing finer granularity.
pub const BUCKETS_PER_SEGMENT: usize = 8;

/// Stable multi-way partition of `ids` by `hash >> shift`, through
/// `scratch`. Returns the bucket prefix offsets (`num_bucket + 1` entries).
pub fn bucket_partition(
    ids: &mut [usize],
    scratch: &mut Vec<usize>,
    hash: &[u64],
    shift: u32,
    num_bucket: usize,
) -> Vec<usize> {
    let bucket_of = |oid: usize| (hash[oid] >> shift) as usize;
    let chunk = ids
        .len()
        .div_ceil(rayon::current_num_threads() * 4)
        .max(1);

    // Pass 1: per-chunk histograms.
    let histograms: Vec<Vec<usize>> = ids
        .par_chunks(chunk)
        .map(|c| {
            let mut histogram = vec![0usize; num_bucket];
            for &oid in c {
                histogram[bucket_of(oid)] += 1;
            }
            histogram
        })
        .collect();

    let mut begin = vec![0usize; num_bucket + 1];
    for b in 0..num_bucket {
        begin[b + 1] = begin[b] + histograms.iter().map(|h| h[b]).sum::<usize>();
    }

    // Per-chunk write cursors: bucket start plus everything earlier chunks
    // will put in that bucket.
    let mut running = begin[..num_bucket].to_vec();
    let cursors: Vec<Vec<usize>> = histograms
        .iter()
        .map(|histogram| {
            let cursor = running.clone();
            for b in 0..num_bucket {
                running[b] += histogram[b];
            }
            cursor
        })
        .collect();

    // Pass 2: scatter into bucket order.
    scratch.resize(ids.len(), 0);
    {
        let out = SharedSliceMut::new(scratch);
        ids.par_chunks(chunk)
            .zip(cursors)
            .for_each(|(c, mut cursor)| {
                for &oid in c {
                    let b = bucket_of(oid);
                    // SAFETY: cursor ranges are disjoint across chunks by
                    // the histogram prefix construction above.
                    unsafe { out.set(cursor[b], oid) };
                    cursor[b] += 1;
                }
            });
    }
    ids.par_chunks_mut(chunk)
        .zip(scratch.par_chunks(chunk))
        .for_each(|(dst, src)| dst.copy_from_slice(src));

    begin
}

/// 1-D packing: given the global per-bucket load as a prefix sum
/// (`num_bucket + 1` entries), choose `n_segment` contiguous bucket ranges
/// with near-equal load. Returns the segment boundaries in bucket indices
/// (`n_segment + 1` entries, first 0, last `num_bucket`).
pub fn load_balancing_from_prefix_sum(prefix: &[u64], n_segment: usize) -> Vec<usize> {
    let num_bucket = prefix.len() - 1;
    let total = prefix[num_bucket];

    let mut boundaries = Vec::with_capacity(n_segment + 1);
    boundaries.push(0);
    let mut previous = 0;
    for segment in 1..n_segment {
        let target = total * segment as u64 / n_segment as u64;
        let boundary = prefix
            .partition_point(|&load| load < target)
            .min(num_bucket)
            .max(previous);
        boundaries.push(boundary);
        previous = boundary;
    }
    boundaries.push(num_bucket);
    boundaries
}

/// Pair the most loaded rank with the least loaded, second-most with
/// second-least, and so on. `pair[r] == r` means rank `r` sits this round
/// out (odd rank counts leave the median alone).
pub fn make_equal_pairs(sizes: &[u64]) -> Vec<usize> {
    let n = sizes.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&r| (sizes[r], r));

    let mut pair = vec![0usize; n];
    for k in 0..n {
        pair[order[k]] = order[n - 1 - k];
    }
    pair
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_partition_orders_and_counts() {
        let hash: Vec<u64> = (0..1000u64).map(|i| i.wrapping_mul(0x9E3779B97F4A7C15)).collect();
        let mut ids: Vec<usize> = (0..1000).collect();
        let mut scratch = Vec::new();
        let num_bucket = 16;
        let shift = 60;

        let begin = bucket_partition(&mut ids, &mut scratch, &hash, shift, num_bucket);

        assert_eq!(begin[0], 0);
        assert_eq!(begin[num_bucket], 1000);
        for b in 0..num_bucket {
            for &oid in &ids[begin[b]..begin[b + 1]] {
                assert_eq!((hash[oid] >> shift) as usize, b);
            }
        }
        // Still a permutation.
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert!(sorted.iter().enumerate().all(|(i, &x)| i == x));
    }

    #[test]
    fn load_balancing_covers_all_buckets_monotonically() {
        // Heavily skewed load: everything in the first two buckets.
        let loads = [500u64, 400, 1, 1, 1, 1, 1, 1];
        let mut prefix = vec![0u64; loads.len() + 1];
        for (b, &l) in loads.iter().enumerate() {
            prefix[b + 1] = prefix[b] + l;
        }

        let boundaries = load_balancing_from_prefix_sum(&prefix, 4);
        assert_eq!(boundaries.len(), 5);
        assert_eq!(boundaries[0], 0);
        assert_eq!(*boundaries.last().unwrap(), loads.len());
        assert!(boundaries.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn equal_pairs_match_extremes() {
        let sizes = [10u64, 500, 20, 80];
        let pair = make_equal_pairs(&sizes);
        // Largest (rank 1) pairs with smallest (rank 0).
        assert_eq!(pair[1], 0);
        assert_eq!(pair[0], 1);
        assert_eq!(pair[3], 2);
        assert_eq!(pair[2], 3);
        // Pairing is an involution.
        for r in 0..4 {
            assert_eq!(pair[pair[r]], r);
        }
    }

    #[test]
    fn odd_rank_count_leaves_median_alone() {
        let sizes = [5u64, 50, 500];
        let pair = make_equal_pairs(&sizes);
        assert_eq!(pair[1], 1);
        assert_eq!(pair[0], 2);
        assert_eq!(pair[2], 0);
    }
}
