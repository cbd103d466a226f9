use crate::error::{GraphError, Result};
use crate::ops::Operator;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

/// Leaf operation holding a value: either a trainable parameter (weights, biases)
/// or the data fed into the graph.
///
/// Variables have no inputs, so the backward pass stops here. Their accumulated
/// gradient is what the graph unrolls for the optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    value: ArrayD<f64>,
}

impl Variable {
    pub fn new(value: ArrayD<f64>) -> Self {
        Self { value }
    }

    pub fn value(&self) -> &ArrayD<f64> {
        &self.value
    }
}

impl Operator for Variable {
    fn name(&self) -> &'static str {
        "Variable"
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn set_shape(&self, _inputs: &[&[usize]]) -> Result<Vec<usize>> {
        Ok(self.value.shape().to_vec())
    }

    fn perform(&mut self, _inputs: &[&ArrayD<f64>]) -> Result<ArrayD<f64>> {
        Ok(self.value.clone())
    }

    fn perform_gradient(
        &self,
        _input: usize,
        _grad: &ArrayD<f64>,
        _inputs: &[&ArrayD<f64>],
        _output: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>> {
        Err(GraphError::Unsupported {
            op: self.name(),
            action: "gradient propagation to inputs",
        })
    }

    fn parameters(&self) -> Option<&ArrayD<f64>> {
        Some(&self.value)
    }

    // Parameters keep their shape; only the feeder may change shape through `assign_data`.
    fn set_parameters(&mut self, value: ArrayD<f64>) -> Result<()> {
        if value.shape() != self.value.shape() {
            return Err(GraphError::shape(format!(
                "Parameter of shape {:?} cannot be replaced by shape {:?}",
                self.value.shape(),
                value.shape()
            )));
        }
        self.value = value;
        Ok(())
    }

    fn assign_data(&mut self, data: ArrayD<f64>) -> Result<()> {
        self.value = data;
        Ok(())
    }
}
