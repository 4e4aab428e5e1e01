//! Flat, row-major tensors used for activations, references and multipliers.

pub mod shape;
pub(crate) mod shape_indices;
#[allow(clippy::module_inception)]
pub mod tensor;

pub use shape::Shape;
pub use tensor::Tensor;
