// Every node of the computation graph wraps one operation. Rust has no inheritance,
// so the shared contract lives in the `Operator` trait and the graph stores the
// closed `Operation` enum, which forwards every call to the concrete operation.
use crate::error::{GraphError, Result};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

pub mod activation;
pub mod arithmetic;
pub mod cost;
pub mod transformation;
pub mod unary;
pub mod variable;


pub use activation::{Dropout, ReLU, Sigmoid, Softmax, Tanh};
pub use arithmetic::{Add, Divide, MatMul, Multiply, Subtract};
pub use cost::{CrossEntropyCost, QuadraticCost, SoftmaxCrossEntropyCost};
pub use transformation::{FlattenFeatures, ReshapeFeatures, Slice, SliceItem, Transpose};
pub use unary::{Exp, Log, SumAll, SumAxis};
pub use variable::Variable;

/// Contract shared by all operations in the computational graph.
///
/// Operations never see the graph itself: the graph hands them the already
/// computed values of their inputs and, during the backward pass, the gradient
/// accumulated from every consumer of their output.
pub trait Operator: std::fmt::Debug {
    /// Kind tag used in logs and error messages.
    fn name(&self) -> &'static str;

    fn num_inputs(&self) -> usize;

    /// Output shape as a pure function of the input shapes.
    fn set_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>>;

    /// Forward computation from the input values.
    fn perform(&mut self, inputs: &[&ArrayD<f64>]) -> Result<ArrayD<f64>>;

    /// Gradient of the cost with respect to input number `input`, given the
    /// gradient accumulated on this operation's output. The returned array must
    /// have the shape of that input.
    fn perform_gradient(
        &self,
        input: usize,
        grad: &ArrayD<f64>,
        inputs: &[&ArrayD<f64>],
        output: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>>;

    /// Drops per-cycle state kept inside the operation.
    fn reset(&mut self) {}

    /// Trainable values owned by this operation, if any.
    fn parameters(&self) -> Option<&ArrayD<f64>> {
        None
    }

    fn set_parameters(&mut self, _value: ArrayD<f64>) -> Result<()> {
        Err(GraphError::Unsupported {
            op: self.name(),
            action: "parameter assignment",
        })
    }

    fn assign_data(&mut self, _data: ArrayD<f64>) -> Result<()> {
        Err(GraphError::Unsupported {
            op: self.name(),
            action: "data assignment",
        })
    }

    fn assign_labels(&mut self, _labels: ArrayD<f64>) -> Result<()> {
        Err(GraphError::Unsupported {
            op: self.name(),
            action: "label assignment",
        })
    }

    /// Switches between training and evaluation behaviour (dropout).
    fn set_training(&mut self, _training: bool) {}
}

pub(crate) fn check_inputs(op: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(GraphError::Arity {
            op,
            expected,
            actual,
        });
    }
    Ok(())
}

pub(crate) fn check_position(op: &'static str, input: usize, num_inputs: usize) -> Result<()> {
    if input >= num_inputs {
        return Err(GraphError::shape(format!(
            "{} has {} inputs, gradient requested for input {}",
            op, num_inputs, input
        )));
    }
    Ok(())
}

// Generates the closed `Operation` enum, the `From` conversions and the
// delegating `Operator` implementation from one list of operation types.
macro_rules! operations {
    ($($variant:ident),* $(,)?) => {
        /// Any operation that can live in a graph.
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub enum Operation {
            $($variant($variant),)*
        }

        $(
            impl From<$variant> for Operation {
                fn from(op: $variant) -> Self {
                    Operation::$variant(op)
                }
            }
        )*

        impl Operator for Operation {
            fn name(&self) -> &'static str {
                match self { $(Operation::$variant(op) => op.name(),)* }
            }

            fn num_inputs(&self) -> usize {
                match self { $(Operation::$variant(op) => op.num_inputs(),)* }
            }

            fn set_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>> {
                match self { $(Operation::$variant(op) => op.set_shape(inputs),)* }
            }

            fn perform(&mut self, inputs: &[&ArrayD<f64>]) -> Result<ArrayD<f64>> {
                match self { $(Operation::$variant(op) => op.perform(inputs),)* }
            }

            fn perform_gradient(
                &self,
                input: usize,
                grad: &ArrayD<f64>,
                inputs: &[&ArrayD<f64>],
                output: &ArrayD<f64>,
            ) -> Result<ArrayD<f64>> {
                match self {
                    $(Operation::$variant(op) => op.perform_gradient(input, grad, inputs, output),)*
                }
            }

            fn reset(&mut self) {
                match self { $(Operation::$variant(op) => op.reset(),)* }
            }

            fn parameters(&self) -> Option<&ArrayD<f64>> {
                match self { $(Operation::$variant(op) => op.parameters(),)* }
            }

            fn set_parameters(&mut self, value: ArrayD<f64>) -> Result<()> {
                match self { $(Operation::$variant(op) => op.set_parameters(value),)* }
            }

            fn assign_data(&mut self, data: ArrayD<f64>) -> Result<()> {
                match self { $(Operation::$variant(op) => op.assign_data(data),)* }
            }

            fn assign_labels(&mut self, labels: ArrayD<f64>) -> Result<()> {
                match self { $(Operation::$variant(op) => op.assign_labels(labels),)* }
            }

            fn set_training(&mut self, training: bool) {
                match self { $(Operation::$variant(op) => op.set_training(training),)* }
            }
        }
    };
}

operations! {
    Variable,
    FlattenFeatures,
    ReshapeFeatures,
    Slice,
    Transpose,
    Add,
    Subtract,
    Multiply,
    Divide,
    MatMul,
    Exp,
    Log,
    SumAll,
    SumAxis,
    ReLU,
    Sigmoid,
    Tanh,
    Softmax,
    Dropout,
    QuadraticCost,
    CrossEntropyCost,
    SoftmaxCrossEntropyCost,
}
