//! Configuration for multiplier propagation and batched scoring.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Magnitude below which a nonlinearity's input difference is treated as zero.
pub const NEAR_ZERO_THRESHOLD: f32 = 1e-7;

/// Rule used to push multipliers through nonlinear activations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NonlinearMxtsMode {
    /// Δoutput / Δinput between the actual and reference points.
    #[default]
    Rescale,
    /// Plain chain rule at the actual point.
    Gradient,
}

/// Rule used to push multipliers through max pooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MaxPoolMxtsMode {
    /// Route each pooled multiplier to the arg-max of the actual input window.
    #[default]
    Gradient,
}

/// Propagation rules, fixed for a graph when it is converted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PropagationConfig {
    pub nonlinear_mxts_mode: NonlinearMxtsMode,
    pub maxpool_mxts_mode: MaxPoolMxtsMode,
    /// Below this |Δinput| the Rescale rule uses the derivative at the
    /// reference point instead of the finite-difference ratio.
    pub near_zero_threshold: f32,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            nonlinear_mxts_mode: NonlinearMxtsMode::Rescale,
            maxpool_mxts_mode: MaxPoolMxtsMode::Gradient,
            near_zero_threshold: NEAR_ZERO_THRESHOLD,
        }
    }
}

impl PropagationConfig {
    pub fn with_mode(nonlinear_mxts_mode: NonlinearMxtsMode) -> Self {
        Self {
            nonlinear_mxts_mode,
            ..Self::default()
        }
    }
}

/// Options for a single batched scoring or prediction call.
#[derive(Debug, Clone)]
pub struct ScoringOptions {
    /// Rows evaluated per chunk.
    pub batch_size: usize,
    /// Evaluate chunks on a rayon pool.
    pub parallel: bool,
    /// Thread limit for parallel evaluation. None means rayon's default.
    pub max_threads: Option<usize>,
    /// Checked between chunks; setting it aborts the call.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for ScoringOptions {
    fn default() -> Self {
        Self {
            batch_size: 200,
            parallel: false,
            max_threads: None,
            cancel: None,
        }
    }
}

impl ScoringOptions {
    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Self::default()
        }
    }
}
