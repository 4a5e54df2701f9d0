//! Engine tunables
//!
//! All tunables live in an [`EngineConfig`] value owned by the engine
//! context rather than in process-wide globals, so several independent
//! simulators can coexist in one process.

use std::env;

/// Hard floor on the truncation budget, in objects. States at or below this
/// size are never truncated, and the stage-4 collision pre-test is skipped
/// for them.
pub const MIN_STATE_SIZE: usize = 4096;

/// Tunables for a simulator instance.
///
/// [`EngineConfig::from_env`] overrides individual fields of the defaults
/// from `SUPERPOSE_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Amplitude-squared cutoff below which a survivor is pruned after
    /// interference.
    pub tolerance: f64,
    /// Fraction of total RAM the memory oracle keeps in reserve.
    pub safety_margin: f32,
    /// Proportion of candidates inserted during the stage-4 collision
    /// pre-test.
    pub collision_test_proportion: f32,
    /// Collision fraction below which the pre-test declares the candidates
    /// mostly unique and short-circuits the remaining inserts.
    pub collision_tolerance: f32,
    /// Per-rank object count under which the equalizer does not run.
    pub min_equalize_size: usize,
    /// Relative imbalance `(max - avg) / max` under which the equalizer
    /// stops iterating.
    pub equalize_imbalance: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-18,
            safety_margin: 0.2,
            collision_test_proportion: 0.1,
            collision_tolerance: 0.05,
            min_equalize_size: 100,
            equalize_imbalance: 0.01,
        }
    }
}

impl EngineConfig {
    /// Build a configuration from the environment.
    ///
    /// # Environment Variables
    ///
    /// - `SUPERPOSE_TOLERANCE`
    /// - `SUPERPOSE_SAFETY_MARGIN`
    /// - `SUPERPOSE_COLLISION_TEST_PROPORTION`
    /// - `SUPERPOSE_COLLISION_TOLERANCE`
    /// - `SUPERPOSE_MIN_EQUALIZE_SIZE`
    /// - `SUPERPOSE_EQUALIZE_IMBALANCE`
    ///
    /// Unset or unparsable variables leave the default in place.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = parse_env("SUPERPOSE_TOLERANCE") {
            config.tolerance = v;
        }
        if let Some(v) = parse_env("SUPERPOSE_SAFETY_MARGIN") {
            config.safety_margin = v;
        }
        if let Some(v) = parse_env("SUPERPOSE_COLLISION_TEST_PROPORTION") {
            config.collision_test_proportion = v;
        }
        if let Some(v) = parse_env("SUPERPOSE_COLLISION_TOLERANCE") {
            config.collision_tolerance = v;
        }
        if let Some(v) = parse_env("SUPERPOSE_MIN_EQUALIZE_SIZE") {
            config.min_equalize_size = v;
        }
        if let Some(v) = parse_env("SUPERPOSE_EQUALIZE_IMBALANCE") {
            config.equalize_imbalance = v;
        }

        config
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|raw| raw.trim().parse().ok())
}
