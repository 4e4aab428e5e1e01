use crate::error::{DeepLiftError, Result};
use crate::tensor::shape::Shape;

#[derive(Debug, PartialEq, Clone, Default)]
/// Flat representation of an n-dimensional tensor
pub struct Tensor<T> {
    pub(crate) data: Vec<T>,
    pub(crate) shape: Shape,
}

impl<T: Default + Clone> Tensor<T> {
    /// Instantiates a new Tensor
    /// ensures the size of data matches the shape
    /// if no data, performs default T allocation of correct size
    pub fn new(data: Option<Vec<T>>, shape: Shape) -> Self {
        let data = if let Some(data) = data {
            assert!(data.len() == shape.volume());
            data
        } else {
            vec![T::default(); shape.volume()]
        };

        Self { data, shape }
    }

    /// Fallible constructor for caller supplied buffers
    pub fn from_vec(data: Vec<T>, dims: Vec<usize>) -> Result<Self> {
        let shape = Shape::new(dims);
        if data.len() != shape.volume() {
            return Err(DeepLiftError::shape_mismatch(
                "tensor buffer length",
                &[shape.volume()],
                &[data.len()],
            ));
        }
        Ok(Self { data, shape })
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        &self.shape.dims
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    /// Returns the value at the given multi-dimensional tensor location
    pub fn get(&self, index: &[usize]) -> &T {
        &self.data[self.shape.flat_index(index)]
    }

    /// Gives you mutable access to a certain location in a tensor
    pub(crate) fn get_mut(&mut self, index: &[usize]) -> &mut T {
        &mut self.data[self.shape.flat_index(index)]
    }

    /// Leading dimension, the batch axis for every batched tensor in the crate
    pub fn batch_size(&self) -> usize {
        self.shape.dims.first().copied().unwrap_or(0)
    }

    /// Same buffer, new dims. Volumes must agree.
    pub(crate) fn reshape(self, shape: Shape) -> Self {
        assert_eq!(self.shape.volume(), shape.volume());
        Self {
            data: self.data,
            shape,
        }
    }

    /// Copies `[start, end)` along `axis`
    pub(crate) fn slice_axis(&self, axis: usize, start: usize, end: usize) -> Self {
        assert!(start <= end && end <= self.shape.dims[axis]);

        // rows of the tensor before `axis` and contiguous run after it
        let outer: usize = self.shape.dims[..axis].iter().product();
        let inner = self.shape.strides()[axis];
        let axis_len = self.shape.dims[axis];

        let mut dims = self.shape.dims.clone();
        dims[axis] = end - start;

        let mut data = Vec::with_capacity(outer * (end - start) * inner);
        for o in 0..outer {
            let base = o * axis_len * inner;
            data.extend_from_slice(&self.data[base + start * inner..base + end * inner]);
        }

        Self::new(Some(data), Shape::new(dims))
    }

    /// Joins tensors along `axis`; every other dimension must agree
    pub(crate) fn concat(tensors: &[&Tensor<T>], axis: usize) -> Self {
        assert!(!tensors.is_empty());
        let first = &tensors[0].shape;
        let outer: usize = first.dims[..axis].iter().product();

        let mut dims = first.dims.clone();
        dims[axis] = tensors.iter().map(|t| t.shape.dims[axis]).sum();

        let mut data = Vec::with_capacity(dims.iter().product());
        for o in 0..outer {
            for tensor in tensors {
                let run = tensor.shape.dims[axis] * tensor.shape.strides()[axis];
                data.extend_from_slice(&tensor.data[o * run..(o + 1) * run]);
            }
        }

        Self::new(Some(data), Shape::new(dims))
    }
}

impl Tensor<f32> {
    pub fn zeros(shape: Shape) -> Self {
        Self::new(None, shape)
    }

    pub fn map(&self, f: impl Fn(f32) -> f32) -> Self {
        Self {
            data: self.data.iter().map(|&v| f(v)).collect(),
            shape: self.shape.clone(),
        }
    }

    /// Elementwise combination of two tensors of identical shape
    pub fn zip_map(&self, other: &Tensor<f32>, f: impl Fn(f32, f32) -> f32) -> Self {
        assert_eq!(self.shape, other.shape, "elementwise op on mismatched shapes");
        Self {
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| f(a, b))
                .collect(),
            shape: self.shape.clone(),
        }
    }

    pub fn sub(&self, other: &Tensor<f32>) -> Self {
        self.zip_map(other, |a, b| a - b)
    }

    pub fn mul(&self, other: &Tensor<f32>) -> Self {
        self.zip_map(other, |a, b| a * b)
    }

    pub(crate) fn add_assign(&mut self, other: &Tensor<f32>) {
        assert_eq!(self.shape, other.shape, "accumulating mismatched shapes");
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b;
        }
    }

    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    /// Largest absolute elementwise difference, handy for tolerance checks
    pub fn max_abs_diff(&self, other: &Tensor<f32>) -> f32 {
        self.zip_map(other, |a, b| (a - b).abs())
            .data
            .into_iter()
            .fold(0.0, f32::max)
    }
}

#[cfg(test)]
mod tests {
    use super::Tensor;
    use crate::tensor::shape::Shape;

    #[test]
    fn test_tensor_value_retrieval_and_manipulation() {
        let mut a = Tensor::new(Some(vec![1, 2, 3, 4, 5, 6]), Shape::new(vec![3, 2]));
        assert_eq!(a.get(&[0, 0]), &1);
        assert_eq!(a.get(&[2, 0]), &5);

        // update value of a at some index
        *a.get_mut(&[2, 0]) = 20;
        assert_eq!(a.get(&[2, 0]), &20);
    }

    #[test]
    fn test_from_vec_rejects_bad_length() {
        assert!(Tensor::from_vec(vec![1.0f32, 2.0, 3.0], vec![2, 2]).is_err());
        let t = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], vec![2, 2]).unwrap();
        assert_eq!(t.batch_size(), 2);
    }

    #[test]
    fn test_slice_and_concat_along_inner_axis() {
        // [2, 3, 2]
        let a = Tensor::new(Some((0..12).collect::<Vec<i32>>()), Shape::new(vec![2, 3, 2]));
        let left = a.slice_axis(1, 0, 1);
        let right = a.slice_axis(1, 1, 3);
        assert_eq!(left.data, vec![0, 1, 6, 7]);
        assert_eq!(right.data, vec![2, 3, 4, 5, 8, 9, 10, 11]);
        assert_eq!(Tensor::concat(&[&left, &right], 1), a);

        let last = a.slice_axis(2, 1, 2);
        assert_eq!(last.data, vec![1, 3, 5, 7, 9, 11]);
    }

    #[test]
    fn test_slice_and_concat_along_batch_axis() {
        let a = Tensor::new(Some((0..6).collect::<Vec<i32>>()), Shape::new(vec![3, 2]));
        let head = a.slice_axis(0, 0, 2);
        let tail = a.slice_axis(0, 2, 3);
        assert_eq!(tail.data, vec![4, 5]);
        assert_eq!(Tensor::concat(&[&head, &tail], 0), a);
    }

    #[test]
    fn test_elementwise_arithmetic() {
        let a = Tensor::from_vec(vec![1.0f32, -2.0, 3.0], vec![3]).unwrap();
        let b = Tensor::from_vec(vec![0.5f32, 0.5, -1.0], vec![3]).unwrap();
        assert_eq!(a.sub(&b).data, vec![0.5, -2.5, 4.0]);
        assert_eq!(a.mul(&b).data, vec![0.5, -1.0, -3.0]);

        let mut c = a.clone();
        c.add_assign(&b);
        assert_eq!(c.data, vec![1.5, -1.5, 2.0]);
        assert_eq!(a.max_abs_diff(&c), 1.0);
    }
}
