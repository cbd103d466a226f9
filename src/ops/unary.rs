use crate::error::{GraphError, Result};
use crate::ops::{Operator, check_inputs, check_position};
use crate::shape::broadcast_to;
use ndarray::{ArrayD, Axis, IxDyn, arr0};
use serde::{Deserialize, Serialize};

/// Element-wise natural exponential.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Exp;

impl Operator for Exp {
    fn name(&self) -> &'static str {
        "Exp"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn set_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>> {
        check_inputs(self.name(), 1, inputs.len())?;
        Ok(inputs[0].to_vec())
    }

    fn perform(&mut self, inputs: &[&ArrayD<f64>]) -> Result<ArrayD<f64>> {
        Ok(inputs[0].mapv(f64::exp))
    }

    fn perform_gradient(
        &self,
        input: usize,
        grad: &ArrayD<f64>,
        _inputs: &[&ArrayD<f64>],
        output: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>> {
        check_position(self.name(), input, 1)?;
        // d(exp(x))/dx = exp(x), which is the cached output
        Ok(grad * output)
    }
}

/// Element-wise natural logarithm.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Log;

impl Operator for Log {
    fn name(&self) -> &'static str {
        "Log"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn set_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>> {
        check_inputs(self.name(), 1, inputs.len())?;
        Ok(inputs[0].to_vec())
    }

    fn perform(&mut self, inputs: &[&ArrayD<f64>]) -> Result<ArrayD<f64>> {
        Ok(inputs[0].mapv(f64::ln))
    }

    fn perform_gradient(
        &self,
        input: usize,
        grad: &ArrayD<f64>,
        inputs: &[&ArrayD<f64>],
        _output: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>> {
        check_position(self.name(), input, 1)?;
        Ok(grad / inputs[0])
    }
}

/// Sum of every element, producing a rank-0 result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SumAll;

impl Operator for SumAll {
    fn name(&self) -> &'static str {
        "SumAll"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn set_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>> {
        check_inputs(self.name(), 1, inputs.len())?;
        Ok(Vec::new())
    }

    fn perform(&mut self, inputs: &[&ArrayD<f64>]) -> Result<ArrayD<f64>> {
        Ok(arr0(inputs[0].sum()).into_dyn())
    }

    fn perform_gradient(
        &self,
        input: usize,
        grad: &ArrayD<f64>,
        inputs: &[&ArrayD<f64>],
        _output: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>> {
        check_position(self.name(), input, 1)?;
        Ok(ArrayD::from_elem(IxDyn(inputs[0].shape()), grad.sum()))
    }
}

/// Sum along one axis; the axis is removed from the output shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SumAxis {
    axis: usize,
}

impl SumAxis {
    pub fn new(axis: usize) -> Self {
        Self { axis }
    }
}

impl Operator for SumAxis {
    fn name(&self) -> &'static str {
        "SumAxis"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn set_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>> {
        check_inputs(self.name(), 1, inputs.len())?;
        let shape = inputs[0];
        if self.axis >= shape.len() {
            return Err(GraphError::shape(format!(
                "Cannot sum over axis {} of an input with shape {:?}",
                self.axis, shape
            )));
        }
        let mut output = shape.to_vec();
        output.remove(self.axis);
        Ok(output)
    }

    fn perform(&mut self, inputs: &[&ArrayD<f64>]) -> Result<ArrayD<f64>> {
        self.set_shape(&[inputs[0].shape()])?;
        Ok(inputs[0].sum_axis(Axis(self.axis)))
    }

    fn perform_gradient(
        &self,
        input: usize,
        grad: &ArrayD<f64>,
        inputs: &[&ArrayD<f64>],
        _output: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>> {
        check_position(self.name(), input, 1)?;
        // Re-insert the summed axis and repeat the gradient along it
        let expanded = grad.clone().insert_axis(Axis(self.axis));
        Ok(broadcast_to(&expanded, inputs[0].shape())?.to_owned())
    }
}
