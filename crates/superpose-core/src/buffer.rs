//! Buffer growth policy and offset-sliced views
//!
//! The three long-lived buffers of the engine (current state, next state,
//! symbolic scratch) are swapped across steps, never freed, and grown with a
//! fixed overallocation factor so incremental growth stays amortized O(1).
//! The memory oracle charges the same factor per object.

/// Overallocation factor applied when a buffer must grow.
pub(crate) const UPSIZE_POLICY: f64 = 1.5;

/// Resize `v` to `len`, overallocating by [`UPSIZE_POLICY`] when the current
/// capacity is insufficient. Shrinking truncates without releasing capacity.
pub(crate) fn resize_upsized<T: Clone + Default>(v: &mut Vec<T>, len: usize) {
    if len > v.capacity() {
        let target = ((len as f64) * UPSIZE_POLICY) as usize;
        v.reserve_exact(target - v.len());
    }
    v.resize(len, T::default());
}

/// Split `bytes` into the `n` consecutive mutable subslices delimited by the
/// `n + 1` prefix offsets. Offsets must be monotone with
/// `offsets[n] == bytes.len()`.
pub(crate) fn split_by_offsets<'a>(mut bytes: &'a mut [u8], offsets: &[usize]) -> Vec<&'a mut [u8]> {
    debug_assert_eq!(*offsets.last().unwrap(), bytes.len() + offsets[0]);

    let mut out = Vec::with_capacity(offsets.len() - 1);
    for window in offsets.windows(2) {
        let (head, tail) = bytes.split_at_mut(window[1] - window[0]);
        out.push(head);
        bytes = tail;
    }
    out
}
