//! Batched scoring and prediction over arbitrarily large input sets.
//!
//! Inputs are split into row chunks of `batch_size`; each chunk gets its own
//! forward pass and multiplier propagation and the per-chunk results are
//! concatenated back along the batch axis in chunk order. Chunks share nothing
//! but the read-only graph, so they may run on a rayon pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, trace};

use crate::config::ScoringOptions;
use crate::error::{DeepLiftError, Result};
use crate::forward::{forward, forward_actual, validate_batches, TensorMap};
use crate::ir::{Graph, NodeId};
use crate::propagate::{propagate_scores, ScoreKind};
use crate::tensor::Tensor;

/// Reported to the progress callback after each chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkProgress {
    pub chunk_index: usize,
    pub chunk_count: usize,
    pub rows_done: usize,
    pub total_rows: usize,
}

/// Scores of a fixed target against fixed source nodes, see
/// [`Graph::scoring_function`].
#[derive(Debug, Clone)]
pub struct ScoringFunction<'g> {
    graph: &'g Graph,
    target: String,
    sources: Vec<String>,
    kind: ScoreKind,
}

/// Forward evaluation of one node, see [`Graph::prediction_function`].
#[derive(Debug, Clone)]
pub struct PredictionFunction<'g> {
    graph: &'g Graph,
    output: NodeId,
}

impl Graph {
    /// Contribution scores of `source_names` to `target_name`
    pub fn scoring_function(
        &self,
        target_name: &str,
        source_names: &[&str],
    ) -> Result<ScoringFunction<'_>> {
        self.scoring_function_with(target_name, source_names, ScoreKind::Contributions)
    }

    /// Raw multipliers of `source_names` with respect to `target_name`
    pub fn multipliers_function(
        &self,
        target_name: &str,
        source_names: &[&str],
    ) -> Result<ScoringFunction<'_>> {
        self.scoring_function_with(target_name, source_names, ScoreKind::Multipliers)
    }

    pub fn scoring_function_with(
        &self,
        target_name: &str,
        source_names: &[&str],
        kind: ScoreKind,
    ) -> Result<ScoringFunction<'_>> {
        self.node_id(target_name)?;
        for name in source_names {
            self.node_id(name)?;
        }
        Ok(ScoringFunction {
            graph: self,
            target: target_name.to_string(),
            sources: source_names.iter().map(|s| s.to_string()).collect(),
            kind,
        })
    }

    pub fn prediction_function(&self, output_name: &str) -> Result<PredictionFunction<'_>> {
        Ok(PredictionFunction {
            graph: self,
            output: self.node_id(output_name)?,
        })
    }
}

impl ScoringFunction<'_> {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Scores every row of `inputs` against the matching row of `references`.
    ///
    /// Returns one tensor per source, shaped `[rows, ..source shape]`.
    pub fn call(
        &self,
        inputs: &TensorMap,
        references: &TensorMap,
        task_index: usize,
        options: &ScoringOptions,
        progress: Option<&mut dyn FnMut(ChunkProgress)>,
    ) -> Result<TensorMap> {
        let total_rows = validate_batches(self.graph, &[inputs, references])?;
        let sources = self.sources.iter().map(String::as_str).collect::<Vec<_>>();
        info!(
            "Scoring {} row(s) of '{}' task {} against {:?}",
            total_rows, self.target, task_index, sources
        );

        let chunks = run_chunked(total_rows, options, progress, |start, end| {
            let chunk_inputs = slice_rows(inputs, start, end);
            let chunk_references = slice_rows(references, start, end);
            let record = forward(self.graph, &chunk_inputs, &chunk_references)?;
            propagate_scores(self.graph, &self.target, task_index, &sources, &record, self.kind)
        })?;

        self.sources
            .iter()
            .map(|name| {
                let id = self.graph.node_id(name)?;
                let stacked = stack_chunks(&chunks, name, self.graph, id)?;
                Ok((name.clone(), stacked))
            })
            .collect()
    }
}

impl PredictionFunction<'_> {
    /// Forward output of the node for every row of `inputs`
    pub fn call(
        &self,
        inputs: &TensorMap,
        options: &ScoringOptions,
        progress: Option<&mut dyn FnMut(ChunkProgress)>,
    ) -> Result<Tensor<f32>> {
        let total_rows = validate_batches(self.graph, &[inputs])?;
        let name = self.graph.node(self.output).name().to_string();

        let chunks = run_chunked(total_rows, options, progress, |start, end| {
            let mut activations = forward_actual(self.graph, &slice_rows(inputs, start, end))?;
            Ok(TensorMap::from([(
                name.clone(),
                activations.swap_remove(self.output),
            )]))
        })?;

        stack_chunks(&chunks, &name, self.graph, self.output)
    }
}

fn slice_rows(batches: &TensorMap, start: usize, end: usize) -> TensorMap {
    batches
        .iter()
        .map(|(name, tensor)| (name.clone(), tensor.slice_axis(0, start, end)))
        .collect()
}

fn stack_chunks(
    chunks: &[TensorMap],
    name: &str,
    graph: &Graph,
    id: NodeId,
) -> Result<Tensor<f32>> {
    if chunks.is_empty() {
        return Ok(Tensor::zeros(graph.node(id).shape().with_batch(0)));
    }
    let parts = chunks
        .iter()
        .map(|chunk| {
            chunk
                .get(name)
                .ok_or_else(|| DeepLiftError::NotFound(name.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Tensor::concat(&parts, 0))
}

fn is_cancelled(options: &ScoringOptions) -> bool {
    options
        .cancel
        .as_ref()
        .is_some_and(|flag| flag.load(Ordering::Relaxed))
}

/// Evaluates `run_chunk(start, end)` for every row chunk, returning results in
/// chunk order.
fn run_chunked<F>(
    total_rows: usize,
    options: &ScoringOptions,
    mut progress: Option<&mut dyn FnMut(ChunkProgress)>,
    run_chunk: F,
) -> Result<Vec<TensorMap>>
where
    F: Fn(usize, usize) -> Result<TensorMap> + Sync,
{
    if options.batch_size == 0 {
        return Err(DeepLiftError::InvalidConfig("batch_size must be positive".into()));
    }

    let start_time = Instant::now();
    let bounds = (0..total_rows)
        .step_by(options.batch_size)
        .map(|start| (start, (start + options.batch_size).min(total_rows)))
        .collect::<Vec<_>>();
    let chunk_count = bounds.len();

    let mut report = |chunk_index: usize| {
        if let Some(callback) = progress.as_mut() {
            callback(ChunkProgress {
                chunk_index,
                chunk_count,
                rows_done: bounds[chunk_index].1,
                total_rows,
            });
        }
    };

    let results = if options.parallel && chunk_count > 1 {
        let completed = AtomicUsize::new(0);
        let run_one = |&(start, end): &(usize, usize)| -> Result<TensorMap> {
            if is_cancelled(options) {
                return Err(DeepLiftError::Cancelled {
                    completed_chunks: completed.load(Ordering::Relaxed),
                });
            }
            trace!("chunk rows {}..{}", start, end);
            let result = run_chunk(start, end)?;
            completed.fetch_add(1, Ordering::Relaxed);
            Ok(result)
        };

        let results: Result<Vec<TensorMap>> = match options.max_threads {
            Some(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| {
                        DeepLiftError::InvalidConfig(format!("failed to create thread pool: {}", e))
                    })?;
                pool.install(|| bounds.par_iter().map(run_one).collect())
            }
            None => bounds.par_iter().map(run_one).collect(),
        };
        let results = results?;
        for chunk_index in 0..chunk_count {
            report(chunk_index);
        }
        results
    } else {
        let mut results = Vec::with_capacity(chunk_count);
        for (chunk_index, &(start, end)) in bounds.iter().enumerate() {
            if is_cancelled(options) {
                return Err(DeepLiftError::Cancelled {
                    completed_chunks: chunk_index,
                });
            }
            debug!("chunk {}/{}: rows {}..{}", chunk_index + 1, chunk_count, start, end);
            results.push(run_chunk(start, end)?);
            report(chunk_index);
        }
        results
    };

    info!(
        "Evaluated {} chunk(s) of up to {} row(s) in {}ms",
        chunk_count,
        options.batch_size,
        start_time.elapsed().as_millis()
    );
    Ok(results)
}
