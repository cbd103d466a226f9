use crate::error::{GraphError, Result};
use crate::ops::{Operator, check_inputs, check_position};
use crate::shape::{broadcast_pair, broadcast_shape, broadcast_to, reduce_shape};
use ndarray::{ArrayD, ArrayView2, Ix2};
use serde::{Deserialize, Serialize};

// Shape inference shared by the element-wise binary operations.
fn broadcast_inputs(op: &'static str, inputs: &[&[usize]]) -> Result<Vec<usize>> {
    check_inputs(op, 2, inputs.len())?;
    broadcast_shape(inputs[0], inputs[1])
}

/// Element-wise addition with broadcasting (bias addition uses this).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Add;

impl Operator for Add {
    fn name(&self) -> &'static str {
        "Add"
    }

    fn num_inputs(&self) -> usize {
        2
    }

    fn set_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>> {
        broadcast_inputs(self.name(), inputs)
    }

    fn perform(&mut self, inputs: &[&ArrayD<f64>]) -> Result<ArrayD<f64>> {
        check_inputs(self.name(), 2, inputs.len())?;
        let (a, b) = broadcast_pair(inputs[0], inputs[1])?;
        Ok(&a + &b)
    }

    fn perform_gradient(
        &self,
        input: usize,
        grad: &ArrayD<f64>,
        inputs: &[&ArrayD<f64>],
        _output: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>> {
        check_position(self.name(), input, 2)?;
        // Both inputs receive the incoming gradient, summed over broadcast axes
        reduce_shape(grad.clone(), inputs[input].shape())
    }
}

/// Element-wise subtraction `a - b` with broadcasting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subtract;

impl Operator for Subtract {
    fn name(&self) -> &'static str {
        "Subtract"
    }

    fn num_inputs(&self) -> usize {
        2
    }

    fn set_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>> {
        broadcast_inputs(self.name(), inputs)
    }

    fn perform(&mut self, inputs: &[&ArrayD<f64>]) -> Result<ArrayD<f64>> {
        check_inputs(self.name(), 2, inputs.len())?;
        let (a, b) = broadcast_pair(inputs[0], inputs[1])?;
        Ok(&a - &b)
    }

    fn perform_gradient(
        &self,
        input: usize,
        grad: &ArrayD<f64>,
        inputs: &[&ArrayD<f64>],
        _output: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>> {
        check_position(self.name(), input, 2)?;
        let local = if input == 0 { grad.clone() } else { -grad };
        reduce_shape(local, inputs[input].shape())
    }
}

/// Element-wise (Hadamard) product with broadcasting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Multiply;

impl Operator for Multiply {
    fn name(&self) -> &'static str {
        "Multiply"
    }

    fn num_inputs(&self) -> usize {
        2
    }

    fn set_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>> {
        broadcast_inputs(self.name(), inputs)
    }

    fn perform(&mut self, inputs: &[&ArrayD<f64>]) -> Result<ArrayD<f64>> {
        check_inputs(self.name(), 2, inputs.len())?;
        let (a, b) = broadcast_pair(inputs[0], inputs[1])?;
        Ok(&a * &b)
    }

    fn perform_gradient(
        &self,
        input: usize,
        grad: &ArrayD<f64>,
        inputs: &[&ArrayD<f64>],
        _output: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>> {
        check_position(self.name(), input, 2)?;
        // d(a*b)/da = b, d(a*b)/db = a
        let other = broadcast_to(inputs[1 - input], grad.shape())?;
        reduce_shape(grad * &other, inputs[input].shape())
    }
}

/// Element-wise division `a / b` with broadcasting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Divide;

impl Operator for Divide {
    fn name(&self) -> &'static str {
        "Divide"
    }

    fn num_inputs(&self) -> usize {
        2
    }

    fn set_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>> {
        broadcast_inputs(self.name(), inputs)
    }

    fn perform(&mut self, inputs: &[&ArrayD<f64>]) -> Result<ArrayD<f64>> {
        check_inputs(self.name(), 2, inputs.len())?;
        let (a, b) = broadcast_pair(inputs[0], inputs[1])?;
        Ok(&a / &b)
    }

    fn perform_gradient(
        &self,
        input: usize,
        grad: &ArrayD<f64>,
        inputs: &[&ArrayD<f64>],
        _output: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>> {
        check_position(self.name(), input, 2)?;
        let b = broadcast_to(inputs[1], grad.shape())?;
        // d(a/b)/da = 1/b, d(a/b)/db = -a/b^2
        let local = if input == 0 {
            grad / &b
        } else {
            let a = broadcast_to(inputs[0], grad.shape())?;
            -(grad * &a) / (&b * &b)
        };
        reduce_shape(local, inputs[input].shape())
    }
}

fn as_matrix<'a>(op: &'static str, array: &'a ArrayD<f64>) -> Result<ArrayView2<'a, f64>> {
    array.view().into_dimensionality::<Ix2>().map_err(|_| {
        GraphError::shape(format!(
            "{} requires rank-2 operands, got {:?}",
            op,
            array.shape()
        ))
    })
}

/// Matrix product of two rank-2 inputs: `(n, k) x (k, m) -> (n, m)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatMul;

impl Operator for MatMul {
    fn name(&self) -> &'static str {
        "MatMul"
    }

    fn num_inputs(&self) -> usize {
        2
    }

    fn set_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>> {
        check_inputs(self.name(), 2, inputs.len())?;
        match (inputs[0], inputs[1]) {
            ([n, k_a], [k_b, m]) if k_a == k_b => Ok(vec![*n, *m]),
            (a, b) => Err(GraphError::shape(format!(
                "Matrix multiplication shape mismatch: {:?} @ {:?}",
                a, b
            ))),
        }
    }

    fn perform(&mut self, inputs: &[&ArrayD<f64>]) -> Result<ArrayD<f64>> {
        self.set_shape(&[inputs[0].shape(), inputs[1].shape()])?;
        let a = as_matrix(self.name(), inputs[0])?;
        let b = as_matrix(self.name(), inputs[1])?;
        Ok(a.dot(&b).into_dyn())
    }

    fn perform_gradient(
        &self,
        input: usize,
        grad: &ArrayD<f64>,
        inputs: &[&ArrayD<f64>],
        _output: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>> {
        check_position(self.name(), input, 2)?;
        let g = as_matrix(self.name(), grad)?;
        // For C = A @ B: dA = G @ B^T, dB = A^T @ G
        let local = if input == 0 {
            let b = as_matrix(self.name(), inputs[1])?;
            g.dot(&b.t())
        } else {
            let a = as_matrix(self.name(), inputs[0])?;
            a.t().dot(&g)
        };
        Ok(local.into_dyn())
    }
}
