// Activation functions and dropout.
// Element-wise activations reuse their cached output in the backward pass where
// the derivative can be written in terms of it (sigmoid, tanh, softmax).
use crate::error::{GraphError, Result};
use crate::ops::{Operator, check_inputs, check_position};
use ndarray::{ArrayD, Axis, Zip};
use rand::Rng;
use serde::{Deserialize, Serialize};

fn same_shape(op: &'static str, inputs: &[&[usize]]) -> Result<Vec<usize>> {
    check_inputs(op, 1, inputs.len())?;
    Ok(inputs[0].to_vec())
}

/// Rectified linear unit, `max(0, x)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReLU;

impl Operator for ReLU {
    fn name(&self) -> &'static str {
        "ReLU"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn set_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>> {
        same_shape(self.name(), inputs)
    }

    fn perform(&mut self, inputs: &[&ArrayD<f64>]) -> Result<ArrayD<f64>> {
        Ok(inputs[0].mapv(|x| x.max(0.0)))
    }

    fn perform_gradient(
        &self,
        input: usize,
        grad: &ArrayD<f64>,
        inputs: &[&ArrayD<f64>],
        _output: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>> {
        check_position(self.name(), input, 1)?;
        Ok(Zip::from(grad)
            .and(inputs[0])
            .map_collect(|&g, &x| if x > 0.0 { g } else { 0.0 }))
    }
}

/// Logistic sigmoid, `1 / (1 + exp(-x))`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sigmoid;

impl Operator for Sigmoid {
    fn name(&self) -> &'static str {
        "Sigmoid"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn set_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>> {
        same_shape(self.name(), inputs)
    }

    fn perform(&mut self, inputs: &[&ArrayD<f64>]) -> Result<ArrayD<f64>> {
        Ok(inputs[0].mapv(|x| 1.0 / (1.0 + (-x).exp())))
    }

    fn perform_gradient(
        &self,
        input: usize,
        grad: &ArrayD<f64>,
        _inputs: &[&ArrayD<f64>],
        output: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>> {
        check_position(self.name(), input, 1)?;
        Ok(Zip::from(grad)
            .and(output)
            .map_collect(|&g, &s| g * s * (1.0 - s)))
    }
}

/// Hyperbolic tangent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tanh;

impl Operator for Tanh {
    fn name(&self) -> &'static str {
        "Tanh"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn set_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>> {
        same_shape(self.name(), inputs)
    }

    fn perform(&mut self, inputs: &[&ArrayD<f64>]) -> Result<ArrayD<f64>> {
        Ok(inputs[0].mapv(f64::tanh))
    }

    fn perform_gradient(
        &self,
        input: usize,
        grad: &ArrayD<f64>,
        _inputs: &[&ArrayD<f64>],
        output: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>> {
        check_position(self.name(), input, 1)?;
        Ok(Zip::from(grad)
            .and(output)
            .map_collect(|&g, &t| g * (1.0 - t * t)))
    }
}

/// Numerically stable softmax over the last axis.
pub(crate) fn softmax(x: &ArrayD<f64>) -> Result<ArrayD<f64>> {
    let mut out = log_softmax(x)?;
    out.mapv_inplace(f64::exp);
    Ok(out)
}

/// `x - logsumexp(x)` over the last axis.
pub(crate) fn log_softmax(x: &ArrayD<f64>) -> Result<ArrayD<f64>> {
    if x.ndim() == 0 {
        return Err(GraphError::shape("Softmax requires at least one axis"));
    }
    let axis = Axis(x.ndim() - 1);
    let mut out = x.to_owned();
    for mut lane in out.lanes_mut(axis) {
        let max = lane.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        let log_sum = lane.fold(0.0, |acc, &v| acc + (v - max).exp()).ln() + max;
        lane.mapv_inplace(|v| v - log_sum);
    }
    Ok(out)
}

/// Softmax over the last axis (one probability distribution per example row).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Softmax;

impl Operator for Softmax {
    fn name(&self) -> &'static str {
        "Softmax"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn set_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>> {
        check_inputs(self.name(), 1, inputs.len())?;
        if inputs[0].is_empty() {
            return Err(GraphError::shape("Softmax requires at least one axis"));
        }
        Ok(inputs[0].to_vec())
    }

    fn perform(&mut self, inputs: &[&ArrayD<f64>]) -> Result<ArrayD<f64>> {
        softmax(inputs[0])
    }

    fn perform_gradient(
        &self,
        input: usize,
        grad: &ArrayD<f64>,
        _inputs: &[&ArrayD<f64>],
        output: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>> {
        check_position(self.name(), input, 1)?;
        let axis = Axis(output.ndim() - 1);
        let mut result = ArrayD::<f64>::zeros(output.raw_dim());
        // Per row: dx = s * (g - <g, s>)
        Zip::from(result.lanes_mut(axis))
            .and(grad.lanes(axis))
            .and(output.lanes(axis))
            .for_each(|mut dx, g, s| {
                let dot = g.dot(&s);
                dx.assign(&(&s * &(&g - dot)));
            });
        Ok(result)
    }
}

fn default_training() -> bool {
    true
}

/// Inverted dropout: during training each element is kept with probability
/// `1 - rate` and scaled by `1 / (1 - rate)`; in evaluation mode it is the identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dropout {
    rate: f64,
    #[serde(default = "default_training")]
    training: bool,
    // Mask of the current forward pass, reused by the backward pass
    #[serde(skip)]
    mask: Option<ArrayD<f64>>,
}

impl Dropout {
    pub fn new(rate: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&rate) {
            return Err(GraphError::Config(format!(
                "Dropout rate must be in [0, 1), got {}",
                rate
            )));
        }
        Ok(Self {
            rate,
            training: true,
            mask: None,
        })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn mask(&self) -> Option<&ArrayD<f64>> {
        self.mask.as_ref()
    }
}

impl Operator for Dropout {
    fn name(&self) -> &'static str {
        "Dropout"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn set_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>> {
        same_shape(self.name(), inputs)
    }

    fn perform(&mut self, inputs: &[&ArrayD<f64>]) -> Result<ArrayD<f64>> {
        if !self.training || self.rate == 0.0 {
            self.mask = None;
            return Ok(inputs[0].clone());
        }

        let keep = 1.0 - self.rate;
        let scale = 1.0 / keep;
        let mut rng = rand::rng();
        let mask = ArrayD::from_shape_fn(inputs[0].raw_dim(), |_| {
            if rng.random::<f64>() < keep { scale } else { 0.0 }
        });
        let output = inputs[0] * &mask;
        self.mask = Some(mask);
        Ok(output)
    }

    fn perform_gradient(
        &self,
        input: usize,
        grad: &ArrayD<f64>,
        _inputs: &[&ArrayD<f64>],
        _output: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>> {
        check_position(self.name(), input, 1)?;
        match &self.mask {
            Some(mask) => Ok(grad * mask),
            None => Ok(grad.clone()),
        }
    }

    fn reset(&mut self) {
        self.mask = None;
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}
