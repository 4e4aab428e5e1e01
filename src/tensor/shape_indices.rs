use crate::tensor::shape::Shape;

#[derive(Clone)]
/// Holds state for shape index iteration
pub(crate) struct ShapeIndices {
    pub(crate) shape: Shape,
    current: Option<Vec<usize>>,
    started: bool,
}

impl ShapeIndices {
    pub(crate) fn new(shape: Shape) -> Self {
        let current = if shape.volume() == 0 {
            None
        } else {
            Some(vec![0; shape.dims.len()])
        };

        Self {
            shape,
            current,
            started: false,
        }
    }
}

impl Iterator for ShapeIndices {
    type Item = Vec<usize>;

    /// Row-major successor of the current index, `None` once exhausted
    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current.as_ref()?;

        if !self.started {
            self.started = true;
            return Some(current.clone());
        }

        let mut next = current.clone();

        for i in (0..next.len()).rev() {
            if next[i] < self.shape.dims[i] - 1 {
                next[i] += 1;
                self.current = Some(next);
                return self.current.clone();
            }
            next[i] = 0
        }

        self.current = None;
        None
    }
}
