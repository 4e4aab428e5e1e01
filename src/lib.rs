//! DeepLIFT contribution scores for multi-branch 1-D convolutional networks.
//!
//! A trained network description is [converted](conversion::convert) into an
//! immutable [`Graph`]. Scores are computed by running actual inputs and
//! reference inputs forward side by side ([`forward`]) and then propagating
//! multipliers backward from one target feature to the requested source
//! nodes ([`propagate`]). [`Graph::scoring_function`] wraps both steps with
//! batching for large input sets.

pub mod config;
pub mod conversion;
pub mod error;
pub mod forward;
pub mod ir;
pub mod propagate;
pub mod scoring;
pub mod tensor;

pub use config::{MaxPoolMxtsMode, NonlinearMxtsMode, PropagationConfig, ScoringOptions};
pub use conversion::{convert, SchemaVersion, TrainedNetwork};
pub use error::{DeepLiftError, Result};
pub use forward::{forward, ActivationRecord, TensorMap};
pub use ir::{Graph, LayerSpec, Node, NodeId};
pub use propagate::{propagate, propagate_scores, ScoreKind};
pub use scoring::{ChunkProgress, PredictionFunction, ScoringFunction};
pub use tensor::{Shape, Tensor};
