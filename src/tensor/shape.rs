use crate::tensor::shape_indices::ShapeIndices;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
/// Represents the shape of a tensor
pub struct Shape {
    pub(crate) dims: Vec<usize>,
    strides: Vec<usize>,
}

impl Shape {
    /// Instantiates a new shape (computes stride values at this point)
    pub fn new(dims: Vec<usize>) -> Self {
        Self {
            strides: compute_strides(&dims),
            dims,
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Compute the number of elements in the tensor
    pub fn volume(&self) -> usize {
        self.dims.iter().product()
    }

    pub(crate) fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Converts a multi-dimensional index to a flat index
    pub(crate) fn flat_index(&self, index: &[usize]) -> usize {
        assert!(self.dims.len() == index.len());
        // dot product
        self.strides
            .iter()
            .zip(index.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    /// Iterates over every index allowed by the shape in row-major order
    pub(crate) fn index_iter(&self) -> ShapeIndices {
        ShapeIndices::new(self.clone())
    }

    /// Prepends a batch dimension
    pub(crate) fn with_batch(&self, batch_size: usize) -> Shape {
        let mut dims = Vec::with_capacity(self.dims.len() + 1);
        dims.push(batch_size);
        dims.extend_from_slice(&self.dims);
        Shape::new(dims)
    }

    /// Drops the leading (batch) dimension
    pub(crate) fn without_batch(&self) -> Shape {
        Shape::new(self.dims.iter().skip(1).copied().collect())
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

fn compute_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1];
    }
    strides
}

#[cfg(test)]
mod tests {
    use crate::tensor::shape::Shape;

    #[test]
    fn test_strides_computation() {
        assert_eq!(Shape::new(vec![2, 3, 2, 4]).strides, vec![24, 8, 4, 1]);
        assert_eq!(Shape::new(vec![]).strides, Vec::<usize>::new());
        assert_eq!(Shape::new(vec![]).volume(), 1);
    }

    #[test]
    fn test_batch_dimension_helpers() {
        let per_sample = Shape::new(vec![11, 4]);
        let batched = per_sample.with_batch(10);
        assert_eq!(batched.dims(), &[10, 11, 4]);
        assert_eq!(batched.without_batch(), per_sample);
    }
}
