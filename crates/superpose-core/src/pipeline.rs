//! Shared-memory step pipeline
//!
//! One step is eight ordered stages, each internally parallelized over
//! independent indices and separated from the next by a barrier:
//!
//! 1. enumerate child counts per parent
//! 2. prefix sum + scatter parentage into the symbolic buffer
//! 3. expand + hash every candidate (child bytes are discarded here)
//! 4. interference: coalesce hash-colliding candidates by amplitude sum
//! 5. memory-bounded stochastic truncation
//! 6. compaction into the next state's layout
//! 7. re-expansion of survivor bytes into the next state
//! 8. renormalization, then the buffer swap
//!
//! The stage building blocks are public so the distributed pipeline can
//! replace stage 4 with its shard-coalesce-unshard protocol and keep the
//! rest.

use crate::buffer::split_by_offsets;
use crate::config::{EngineConfig, MIN_STATE_SIZE};
use crate::error::{Error, Result};
use crate::memory;
use crate::rule::{Modifier, Rule};
use crate::sampling::survival_selector;
use crate::scan::{inclusive_prefix_sum, par_partition_by, SharedSliceMut};
use crate::state::State;
use crate::symbolic::{HashClass, SymbolicBuffer};
use dashmap::mapref::entry::Entry;
use num_complex::Complex64;
use rayon::prelude::*;
use tracing::{debug, trace_span};

/// Per-step options.
#[derive(Default, Clone, Copy)]
pub struct StepOptions<'a> {
    /// Override the memory oracle's survivor budget.
    pub max_num_object: Option<usize>,
    /// Invoked at every stage boundary with the completed stage's tag
    /// (0 fires before stage 1, 8 after normalization). Purely
    /// observational.
    pub mid_step: Option<&'a dyn Fn(usize)>,
}

fn no_mid_step(_stage: usize) {}

impl<'a> StepOptions<'a> {
    pub(crate) fn mid(&self) -> &'a dyn Fn(usize) {
        self.mid_step.unwrap_or(&no_mid_step)
    }
}

/// A simulator context: owns the tunables, drives steps.
///
/// Several engines with different configurations can coexist in one
/// process; nothing here is global.
#[derive(Debug, Default, Clone)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Advance `state` by one application of `rule`.
    ///
    /// `next` and `symbolic` are the scratch buffers of the three-buffer
    /// cycle; on success `state` and `next` are swapped so `state` holds
    /// the new normalized state. On error `state` is untouched.
    pub fn step<R: Rule + ?Sized>(
        &self,
        state: &mut State,
        rule: &R,
        next: &mut State,
        symbolic: &mut SymbolicBuffer,
        opts: StepOptions,
    ) -> Result<()> {
        let mid = opts.mid();

        generate_symbolic(state, rule, symbolic, mid)?;
        compute_interferences(symbolic, &self.config);

        let max_num_object = match opts.max_num_object {
            Some(n) => n,
            None => memory::max_num_object(&self.config, state, next, symbolic)?,
        };

        finalize(symbolic, rule, state, next, max_num_object, mid)?;
        next.normalize();
        mid(8);

        std::mem::swap(state, next);
        Ok(())
    }

    /// Apply an in-place modifier (diagonal operator) to every object.
    /// Bypasses the pipeline entirely; amplitudes are not renormalized.
    pub fn step_modifier<M: Modifier + ?Sized>(&self, state: &mut State, modifier: &M) {
        let n = state.num_object;
        let State {
            re,
            im,
            bytes,
            offset,
            ..
        } = state;

        let objects = split_by_offsets(&mut bytes[..offset[n]], &offset[..=n]);
        objects
            .into_par_iter()
            .zip_eq(&mut re[..n])
            .zip_eq(&mut im[..n])
            .for_each(|((object, re), im)| {
                let mut amp = Complex64::new(*re, *im);
                modifier.apply(object, &mut amp);
                *re = amp.re;
                *im = amp.im;
            });
    }
}

/// Stages 1–3: enumerate, scatter parentage, expand + hash.
pub fn generate_symbolic<R: Rule + ?Sized>(
    state: &mut State,
    rule: &R,
    symbolic: &mut SymbolicBuffer,
    mid: &dyn Fn(usize),
) -> Result<()> {
    let n = state.num_object;
    if n == 0 {
        symbolic.num_object = 0;
        return Ok(());
    }

    let State {
        re,
        im,
        bytes,
        offset,
        num_child,
        ..
    } = state;

    mid(0);

    // Stage 1: child counts per parent, reducing the scratch bound.
    let span = trace_span!("enumerate", parents = n).entered();
    num_child[0] = 0;
    let max_child_size = num_child[1..=n]
        .par_iter_mut()
        .enumerate()
        .map(|(parent, slot)| {
            let spec = rule.enumerate(&bytes[offset[parent]..offset[parent + 1]]);
            *slot = u64::from(spec.num_children);
            spec.max_child_size
        })
        .max()
        .unwrap_or(0);
    drop(span);
    mid(1);

    // Stage 2: prefix sum, then parentage by binary search into it.
    inclusive_prefix_sum(&mut num_child[1..=n]);
    let num_candidates = num_child[n] as usize;
    symbolic.resize(num_candidates);

    let counts = &num_child[..=n];
    symbolic.parent_oid[..num_candidates]
        .par_iter_mut()
        .zip_eq(&mut symbolic.child_id[..num_candidates])
        .enumerate()
        .for_each(|(i, (parent, child))| {
            let p = counts.partition_point(|&c| c <= i as u64) - 1;
            *parent = p;
            *child = (i as u64 - counts[p]) as u32;
        });
    mid(2);

    // Stage 3: expand every candidate into per-thread scratch; only the
    // hash and size survive into interference.
    let span = trace_span!("expand", candidates = num_candidates).entered();
    symbolic.re[..num_candidates]
        .par_iter_mut()
        .zip_eq(&mut symbolic.im[..num_candidates])
        .zip_eq(&mut symbolic.size[..num_candidates])
        .zip_eq(&mut symbolic.hash[..num_candidates])
        .zip_eq(&symbolic.parent_oid[..num_candidates])
        .zip_eq(&symbolic.child_id[..num_candidates])
        .try_for_each_init(
            || vec![0u8; max_child_size],
            |scratch, (((((c_re, c_im), c_size), c_hash), &parent), &child)| {
                let parent_bytes = &bytes[offset[parent]..offset[parent + 1]];
                let mut amp = Complex64::new(re[parent], im[parent]);
                let written = rule.expand(parent_bytes, child, &mut amp, scratch);
                if written > scratch.len() {
                    return Err(Error::RuleViolation {
                        parent,
                        child,
                        wrote: written,
                        declared: scratch.len(),
                    });
                }
                *c_re = amp.re;
                *c_im = amp.im;
                *c_size = written;
                *c_hash = rule.hash_child(&scratch[..written]);
                Ok(())
            },
        )?;
    drop(span);
    mid(3);

    Ok(())
}

/// Stage 4: interference. Hash-colliding candidates coalesce onto the
/// first-inserted representative, whose amplitude becomes the class sum;
/// survivors are the representatives above the tolerance cut, fronted in
/// `next_oid`.
pub fn compute_interferences(symbolic: &mut SymbolicBuffer, config: &EngineConfig) {
    let m = symbolic.num_object;
    if m == 0 {
        symbolic.num_object_after_interferences = 0;
        return;
    }

    let _span = trace_span!("interference", candidates = m).entered();

    let SymbolicBuffer {
        re,
        im,
        hash,
        is_unique,
        next_oid,
        next_oid_scratch,
        elimination_map,
        num_object_after_interferences,
        ..
    } = symbolic;

    let tolerance = config.tolerance;
    let skip_test = m < MIN_STATE_SIZE;
    let test_size = if skip_test {
        0
    } else {
        (m as f64 * config.collision_test_proportion as f64) as usize
    };

    let mut fast = false;
    if test_size > 0 {
        insert_classes(elimination_map, hash, re, im, is_unique, 0..test_size);
        let collisions = test_size - elimination_map.len();
        fast = collisions < (test_size as f64 * config.collision_tolerance as f64) as usize;

        if fast {
            // Mostly unique: skip the remaining inserts, keep the untested
            // tail wholesale, and only filter the tested prefix.
            write_back_classes(elimination_map, hash, re, im, is_unique, 0..test_size);
            is_unique[test_size..m].par_iter_mut().for_each(|u| *u = true);

            let kept = par_partition_by(&mut next_oid[..test_size], next_oid_scratch, |oid| {
                is_unique[oid] && re[oid] * re[oid] + im[oid] * im[oid] > tolerance
            });
            // Close the gap left by discarded prefix entries so the tail
            // follows the surviving prefix.
            next_oid[kept..m].rotate_left(test_size - kept);
            *num_object_after_interferences = kept + (m - test_size);
            debug!(
                candidates = m,
                tested = test_size,
                survivors = *num_object_after_interferences,
                "interference short-circuited"
            );
        }
    }

    if !fast {
        insert_classes(elimination_map, hash, re, im, is_unique, test_size..m);
        write_back_classes(elimination_map, hash, re, im, is_unique, 0..m);

        *num_object_after_interferences =
            par_partition_by(&mut next_oid[..m], next_oid_scratch, |oid| {
                is_unique[oid] && re[oid] * re[oid] + im[oid] * im[oid] > tolerance
            });
    }

    elimination_map.clear();
}

/// Run the insertion protocol over a candidate range: first insertion of a
/// hash becomes the class representative, later arrivals add their
/// amplitude into the class and drop out.
fn insert_classes(
    map: &dashmap::DashMap<u64, HashClass>,
    hash: &[u64],
    re: &[f64],
    im: &[f64],
    is_unique: &mut [bool],
    range: std::ops::Range<usize>,
) {
    let start = range.start;
    is_unique[range]
        .par_iter_mut()
        .enumerate()
        .for_each(|(k, unique)| {
            let i = start + k;
            match map.entry(hash[i]) {
                Entry::Vacant(slot) => {
                    slot.insert(HashClass {
                        oid: i,
                        re: re[i],
                        im: im[i],
                    });
                    *unique = true;
                }
                Entry::Occupied(mut slot) => {
                    let class = slot.get_mut();
                    class.re += re[i];
                    class.im += im[i];
                    *unique = false;
                }
            }
        });
}

/// Representatives fetch their class sums back into the amplitude arrays;
/// non-representatives keep their own amplitude and are dropped by the
/// survivor partition.
fn write_back_classes(
    map: &dashmap::DashMap<u64, HashClass>,
    hash: &[u64],
    re: &mut [f64],
    im: &mut [f64],
    is_unique: &[bool],
    range: std::ops::Range<usize>,
) {
    let start = range.start;
    re[range.clone()]
        .par_iter_mut()
        .zip_eq(&mut im[range.clone()])
        .zip_eq(&is_unique[range.clone()])
        .zip_eq(&hash[range])
        .enumerate()
        .for_each(|(k, (((re, im), &unique), h))| {
            if unique {
                let class = map
                    .get(h)
                    .expect("every unique candidate has an inserted hash class");
                debug_assert_eq!(class.oid, start + k);
                *re = class.re;
                *im = class.im;
            }
        });
}

/// Stages 5–7: truncate to the budget, compact survivors into `next`, then
/// re-expand their bytes from the old state.
pub fn finalize<R: Rule + ?Sized>(
    symbolic: &mut SymbolicBuffer,
    rule: &R,
    last: &State,
    next: &mut State,
    max_num_object: usize,
    mid: &dyn Fn(usize),
) -> Result<()> {
    if symbolic.num_object == 0 {
        next.num_object = 0;
        next.resize(0);
        next.allocate(0);
        next.offset[0] = 0;
        return Ok(());
    }

    mid(4);

    let SymbolicBuffer {
        re,
        im,
        size,
        hash,
        parent_oid,
        child_id,
        next_oid,
        random_selector,
        num_object_after_interferences,
        ..
    } = symbolic;
    let survivors = *num_object_after_interferences;

    // Stage 5: hash-seeded Poisson sampling when over budget.
    let keep = if survivors > max_num_object {
        let _span = trace_span!("truncate", survivors, max_num_object).entered();
        {
            let selectors = SharedSliceMut::new(&mut random_selector[..]);
            next_oid[..survivors].par_iter().for_each(|&oid| {
                let weight = re[oid] * re[oid] + im[oid] * im[oid];
                // SAFETY: `next_oid[..survivors]` is duplicate-free, so
                // each selector slot is written by exactly one task.
                unsafe { selectors.set(oid, survival_selector(hash[oid], weight)) };
            });
        }
        let selector = &random_selector[..];
        next_oid[..survivors].select_nth_unstable_by(max_num_object, |&a, &b| {
            selector[a].total_cmp(&selector[b])
        });
        debug!(survivors, kept = max_num_object, "state truncated");
        max_num_object
    } else {
        survivors
    };
    mid(5);

    // Stage 6: restore parent order for cache-friendly re-expansion, then
    // lay out the next state.
    next_oid[..keep].par_sort_unstable();

    next.resize(keep);
    next.num_object = keep;
    next.offset[0] = 0;
    {
        let State {
            re: next_re,
            im: next_im,
            offset: next_offset,
            ..
        } = next;
        next_offset[1..=keep]
            .par_iter_mut()
            .zip_eq(&mut next_re[..keep])
            .zip_eq(&mut next_im[..keep])
            .zip_eq(&next_oid[..keep])
            .for_each(|(((slot, re_out), im_out), &oid)| {
                *slot = size[oid];
                *re_out = re[oid];
                *im_out = im[oid];
            });
        inclusive_prefix_sum(&mut next_offset[1..=keep]);
    }
    let payload = next.offset[keep];
    next.allocate(payload);
    mid(6);

    // Stage 7: re-materialize survivor bytes straight into the new layout.
    // The amplitude output of this second expansion is discarded.
    {
        let State {
            bytes: next_bytes,
            offset: next_offset,
            ..
        } = next;
        let outputs = split_by_offsets(&mut next_bytes[..payload], &next_offset[..=keep]);
        outputs
            .into_par_iter()
            .enumerate()
            .try_for_each(|(i, out)| {
                let oid = next_oid[i];
                let parent = parent_oid[oid];
                let parent_bytes = &last.bytes[last.offset[parent]..last.offset[parent + 1]];
                let mut amp = Complex64::default();
                let written = rule.expand(parent_bytes, child_id[oid], &mut amp, out);
                if written != out.len() {
                    return Err(Error::ChildSizeMismatch {
                        parent,
                        child: child_id[oid],
                        recorded: out.len(),
                        actual: written,
                    });
                }
                Ok(())
            })?;
    }
    mid(7);

    Ok(())
}
