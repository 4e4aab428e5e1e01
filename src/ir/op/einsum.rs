use std::collections::HashMap;

use itertools::Itertools;

use crate::error::{DeepLiftError, Result};
use crate::tensor::{Shape, Tensor};

/// Parsed form of an einsum instruction such as `"bi,io->bo"`
#[derive(Debug, Default, Clone)]
pub(crate) struct EinsumParams {
    pub(crate) input_str: Vec<Vec<char>>,
    pub(crate) output_str: Vec<char>,
    pub(crate) summed_indices: Vec<(char, usize)>,
    pub(crate) output_shape: Shape,
}

impl EinsumParams {
    pub(crate) fn new(instruction: &str, input_shapes: &[&Shape]) -> Result<Self> {
        let (input_insn, output_insn) = instruction.split_once("->").ok_or_else(|| {
            DeepLiftError::InvalidConfig(format!("malformed einsum instruction '{}'", instruction))
        })?;

        let input_insn = input_insn
            .split(',')
            .map(|s| s.chars().collect_vec())
            .collect_vec();
        let output_insn = output_insn.chars().collect_vec();

        if input_insn.len() != input_shapes.len() {
            return Err(DeepLiftError::InvalidConfig(format!(
                "einsum '{}' expects {} operands, got {}",
                instruction,
                input_insn.len(),
                input_shapes.len()
            )));
        }

        // map each character index to its dimension size
        let mut symbol_dimensions = HashMap::new();
        for (inst, shape) in input_insn.iter().zip(input_shapes.iter()) {
            if inst.len() != shape.rank() {
                return Err(DeepLiftError::shape_mismatch(
                    format!("einsum '{}' operand rank", instruction),
                    &[inst.len()],
                    &[shape.rank()],
                ));
            }
            for (&c, &dim) in inst.iter().zip(shape.dims().iter()) {
                if let Some(&seen) = symbol_dimensions.get(&c) {
                    if seen != dim {
                        return Err(DeepLiftError::shape_mismatch(
                            format!("einsum '{}' index '{}'", instruction, c),
                            &[seen],
                            &[dim],
                        ));
                    }
                }
                symbol_dimensions.insert(c, dim);
            }
        }

        // determine the output shape
        let output_dims = output_insn
            .iter()
            .map(|c| {
                symbol_dimensions.get(c).copied().ok_or_else(|| {
                    DeepLiftError::InvalidConfig(format!(
                        "einsum '{}' output index '{}' not bound by any input",
                        instruction, c
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        // get the indices to sum over, in first-seen order
        let summed_indices = input_insn
            .iter()
            .flatten()
            .filter(|c| !output_insn.contains(c))
            .unique()
            .map(|c| (*c, symbol_dimensions[c]))
            .collect_vec();

        Ok(EinsumParams {
            input_str: input_insn,
            output_str: output_insn,
            summed_indices,
            output_shape: Shape::new(output_dims),
        })
    }

    /// Slot of each operand axis in the combined `[output.., summed..]`
    /// index, paired with that axis's stride in the operand.
    fn operand_slots(&self, inputs: &[&Tensor<f32>]) -> Vec<Vec<(usize, usize)>> {
        let output_len = self.output_str.len();
        self.input_str
            .iter()
            .zip(inputs.iter())
            .map(|(inst, tensor)| {
                inst.iter()
                    .zip(tensor.shape().strides().iter())
                    .map(|(c, &stride)| {
                        let slot = match self.output_str.iter().position(|o| o == c) {
                            Some(pos) => pos,
                            None => {
                                output_len
                                    + self
                                        .summed_indices
                                        .iter()
                                        .position(|(s, _)| s == c)
                                        .unwrap_or_default()
                            }
                        };
                        (slot, stride)
                    })
                    .collect_vec()
            })
            .collect_vec()
    }

    pub(crate) fn compute(&self, inputs: &[&Tensor<f32>]) -> Tensor<f32> {
        let mut output_tensor = Tensor::zeros(self.output_shape.clone());
        let slots = self.operand_slots(inputs);
        let output_len = self.output_str.len();

        // every assignment of the summed indices, shared by all output cells
        let summed_combos: Vec<Vec<usize>> = self
            .summed_indices
            .iter()
            .map(|(_, dim)| 0..*dim)
            .multi_cartesian_product()
            .collect_vec();

        let mut combined = vec![0; output_len + self.summed_indices.len()];
        for (flat, output_index) in output_tensor.shape.index_iter().enumerate() {
            combined[..output_len].copy_from_slice(&output_index);

            let value = if self.summed_indices.is_empty() {
                product_at(inputs, &slots, &combined)
            } else {
                let mut acc = 0.0;
                for combo in &summed_combos {
                    combined[output_len..].copy_from_slice(combo);
                    acc += product_at(inputs, &slots, &combined);
                }
                acc
            };

            output_tensor.data[flat] = value;
        }

        output_tensor
    }
}

fn product_at(inputs: &[&Tensor<f32>], slots: &[Vec<(usize, usize)>], combined: &[usize]) -> f32 {
    inputs
        .iter()
        .zip(slots.iter())
        .map(|(tensor, axes)| {
            let offset: usize = axes.iter().map(|&(slot, stride)| combined[slot] * stride).sum();
            tensor.data[offset]
        })
        .product()
}

pub(crate) fn einsum(insn: &str, inputs: &[&Tensor<f32>]) -> Result<Tensor<f32>> {
    let shapes = inputs.iter().map(|t| t.shape()).collect_vec();
    let params = EinsumParams::new(insn, &shapes)?;
    Ok(params.compute(inputs))
}
