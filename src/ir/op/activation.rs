use crate::config::{NonlinearMxtsMode, PropagationConfig};
use crate::error::{DeepLiftError, Result};
use crate::tensor::{Shape, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationFn {
    Relu,
    Sigmoid,
    Tanh,
}

impl ActivationFn {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "relu" => Ok(ActivationFn::Relu),
            "sigmoid" => Ok(ActivationFn::Sigmoid),
            "tanh" => Ok(ActivationFn::Tanh),
            other => Err(DeepLiftError::UnsupportedNodeKind(format!(
                "activation '{}'",
                other
            ))),
        }
    }

    pub fn compute(&self, x: f32) -> f32 {
        match self {
            ActivationFn::Relu => x.max(0.0),
            ActivationFn::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            ActivationFn::Tanh => x.tanh(),
        }
    }

    pub fn derivative(&self, x: f32) -> f32 {
        match self {
            ActivationFn::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            ActivationFn::Sigmoid => {
                let s = self.compute(x);
                s * (1.0 - s)
            }
            ActivationFn::Tanh => 1.0 - x.tanh().powi(2),
        }
    }
}

/// Elementwise nonlinearity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationOp {
    pub(crate) function: ActivationFn,
}

impl ActivationOp {
    pub fn new(function: ActivationFn) -> Self {
        Self { function }
    }

    pub(crate) fn output_shape(&self, name: &str, parents: &[&Shape]) -> Result<Shape> {
        match parents {
            [parent] => Ok((*parent).clone()),
            _ => Err(DeepLiftError::Structural(format!(
                "activation '{}' needs exactly one parent",
                name
            ))),
        }
    }

    pub(crate) fn forward(&self, input: &Tensor<f32>) -> Tensor<f32> {
        input.map(|x| self.function.compute(x))
    }

    /// Rescale: `m_x = m_y · Δy/Δx`, falling back to the derivative at the
    /// reference point when `|Δx|` is below the configured threshold.
    /// Gradient: `m_x = m_y · f'(x)` at the actual point.
    pub(crate) fn multipliers(
        &self,
        multiplier: &Tensor<f32>,
        input_actual: &Tensor<f32>,
        input_reference: &Tensor<f32>,
        output_actual: &Tensor<f32>,
        output_reference: &Tensor<f32>,
        config: &PropagationConfig,
    ) -> Vec<Tensor<f32>> {
        let data = match config.nonlinear_mxts_mode {
            NonlinearMxtsMode::Rescale => (0..multiplier.data.len())
                .map(|i| {
                    let delta_in = input_actual.data[i] - input_reference.data[i];
                    let slope = if delta_in.abs() >= config.near_zero_threshold {
                        (output_actual.data[i] - output_reference.data[i]) / delta_in
                    } else {
                        self.function.derivative(input_reference.data[i])
                    };
                    multiplier.data[i] * slope
                })
                .collect(),
            NonlinearMxtsMode::Gradient => multiplier
                .data
                .iter()
                .zip(input_actual.data.iter())
                .map(|(m, &x)| m * self.function.derivative(x))
                .collect(),
        };
        vec![Tensor::new(Some(data), multiplier.shape.clone())]
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::{ActivationFn, ActivationOp};
    use crate::config::{NonlinearMxtsMode, PropagationConfig};
    use crate::tensor::Tensor;

    fn t(data: Vec<f32>) -> Tensor<f32> {
        let len = data.len();
        Tensor::from_vec(data, vec![1, len]).unwrap()
    }

    fn rule(
        op: ActivationOp,
        x: &Tensor<f32>,
        x_ref: &Tensor<f32>,
        config: PropagationConfig,
    ) -> Tensor<f32> {
        let m = Tensor::new(Some(vec![1.0; x.data().len()]), x.shape().clone());
        op.multipliers(&m, x, x_ref, &op.forward(x), &op.forward(x_ref), &config)
            .remove(0)
    }

    #[test]
    fn test_relu_compute() {
        let op = ActivationOp::new(ActivationFn::Relu);
        let y = op.forward(&t(vec![2., 0., -1., -5., 7., -2.]));
        assert_eq!(y.data(), &[2., 0., 0., 0., 7., 0.]);
    }

    #[test]
    fn test_unknown_activation_is_unsupported() {
        assert!(ActivationFn::from_name("softmax").is_err());
        assert_eq!(ActivationFn::from_name("tanh").unwrap(), ActivationFn::Tanh);
    }

    #[test]
    fn test_rescale_uses_difference_quotient() {
        let op = ActivationOp::new(ActivationFn::Relu);
        let x = t(vec![3., -1., 2.]);
        let x_ref = t(vec![-1., -2., 0.]);
        let m = rule(op, &x, &x_ref, PropagationConfig::default());
        // (3 - 0) / (3 + 1), (0 - 0) / 1, (2 - 0) / 2
        assert_eq!(m.data(), &[0.75, 0., 1.]);
    }

    #[test]
    fn test_rescale_near_zero_falls_back_to_reference_derivative() {
        let op = ActivationOp::new(ActivationFn::Sigmoid);
        let x = t(vec![0.5, 1e-9]);
        let x_ref = t(vec![0.5, 0.0]);
        let m = rule(op, &x, &x_ref, PropagationConfig::default());
        assert_abs_diff_eq!(m.data()[0], ActivationFn::Sigmoid.derivative(0.5), epsilon = 1e-7);
        assert_abs_diff_eq!(m.data()[1], 0.25, epsilon = 1e-7);
    }

    #[test]
    fn test_gradient_mode_uses_actual_derivative() {
        let op = ActivationOp::new(ActivationFn::Tanh);
        let x = t(vec![0.3, -2.0]);
        let x_ref = t(vec![0.0, 0.0]);
        let m = rule(
            op,
            &x,
            &x_ref,
            PropagationConfig::with_mode(NonlinearMxtsMode::Gradient),
        );
        assert_abs_diff_eq!(m.data()[0], 1.0 - 0.3f32.tanh().powi(2), epsilon = 1e-7);
        assert_abs_diff_eq!(m.data()[1], 1.0 - 2.0f32.tanh().powi(2), epsilon = 1e-7);
    }

    #[test]
    fn test_rescale_matches_gradient_for_relu_with_zero_reference() {
        let op = ActivationOp::new(ActivationFn::Relu);
        let x = t(vec![1.5, -0.5, 0.0, 4.0]);
        let zero = t(vec![0.0; 4]);
        let rescale = rule(op, &x, &zero, PropagationConfig::default());
        let gradient = rule(
            op,
            &x,
            &zero,
            PropagationConfig::with_mode(NonlinearMxtsMode::Gradient),
        );
        assert_eq!(rescale, gradient);
    }
}
