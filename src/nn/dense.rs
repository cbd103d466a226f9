// Fully connected layer builder.
// A layer is not a runtime object: building it registers its parameters and
// operations in the graph and hands back the node ids.
use crate::error::{GraphError, Result};
use crate::graph::{Graph, NodeFlags, NodeId};
use crate::nn::initializers::{seeded_rng, xavier_uniform, zeros};
use crate::ops::{Add, Dropout, MatMul, Operation, ReLU, Sigmoid, Softmax, Tanh};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    ReLU,
    Sigmoid,
    Tanh,
    /// Pair with [`CrossEntropyCost`](crate::ops::CrossEntropyCost). The fused
    /// softmax cost expects a layer without activation.
    Softmax,
}

impl From<Activation> for Operation {
    fn from(activation: Activation) -> Self {
        match activation {
            Activation::ReLU => ReLU.into(),
            Activation::Sigmoid => Sigmoid.into(),
            Activation::Tanh => Tanh.into(),
            Activation::Softmax => Softmax.into(),
        }
    }
}

/// Nodes registered by [`DenseLayer::build`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DenseNodes {
    pub weights: NodeId,
    pub bias: NodeId,
    /// `x @ W + b`, before the activation.
    pub linear: NodeId,
    /// Last node of the layer; feed this into the next layer or the cost.
    pub output: NodeId,
}

/// `output = dropout(activation(x @ W + b))` with `W` of shape `(n_in, n_out)` and
/// `b` of shape `(1, n_out)` broadcast over the examples.
///
/// Weights default to Xavier-uniform, bias to zeros.
///
/// ```
/// use ndarray::{ArrayD, IxDyn};
/// use opgraph::graph::Graph;
/// use opgraph::nn::{Activation, DenseLayer};
///
/// let mut graph = Graph::new();
/// let x = graph.add_feeder(ArrayD::zeros(IxDyn(&[8, 4]))).unwrap();
/// let hidden = DenseLayer::new(16)
///     .activation(Activation::ReLU)
///     .seed(7)
///     .build(&mut graph, x)
///     .unwrap();
/// assert_eq!(graph.shape(hidden.output).unwrap(), &[8, 16]);
/// assert_eq!(graph.num_parameters(), 4 * 16 + 16);
/// ```
#[derive(Debug, Clone)]
pub struct DenseLayer {
    n_outputs: usize,
    activation: Option<Activation>,
    dropout: Option<f64>,
    weights: Option<ArrayD<f64>>,
    bias: Option<ArrayD<f64>>,
    seed: Option<u64>,
}

impl DenseLayer {
    pub fn new(n_outputs: usize) -> Self {
        Self {
            n_outputs,
            activation: None,
            dropout: None,
            weights: None,
            bias: None,
            seed: None,
        }
    }

    pub fn activation(mut self, activation: Activation) -> Self {
        self.activation = Some(activation);
        self
    }

    /// Appends inverted dropout with the given drop rate.
    pub fn dropout(mut self, rate: f64) -> Self {
        self.dropout = Some(rate);
        self
    }

    pub fn weights(mut self, weights: ArrayD<f64>) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn bias(mut self, bias: ArrayD<f64>) -> Self {
        self.bias = Some(bias);
        self
    }

    /// Seed for the weight initializer.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self, graph: &mut Graph, input: NodeId) -> Result<DenseNodes> {
        let n_inputs = match graph.shape(input)? {
            [_, features] => *features,
            other => {
                return Err(GraphError::shape(format!(
                    "Dense layer input must be (examples, features), got {:?}",
                    other
                )));
            }
        };
        if self.n_outputs == 0 {
            return Err(GraphError::Config(
                "Dense layer needs at least one output".to_string(),
            ));
        }

        let weight_shape = [n_inputs, self.n_outputs];
        let weights = match self.weights {
            Some(weights) => expect_shape("weights", weights, &weight_shape)?,
            None => xavier_uniform(&weight_shape, 1.0, &mut seeded_rng(self.seed))?,
        };
        let bias_shape = [1, self.n_outputs];
        let bias = match self.bias {
            Some(bias) => expect_shape("bias", bias, &bias_shape)?,
            None => zeros(&bias_shape),
        };

        let weights = graph.add_parameter(weights)?;
        let bias = graph.add_parameter(bias)?;
        let product = graph.add_operation(MatMul, &[input, weights], NodeFlags::NONE)?;
        let linear = graph.add_operation(Add, &[product, bias], NodeFlags::NONE)?;

        let mut output = linear;
        if let Some(activation) = self.activation {
            output = graph.add_operation(activation, &[output], NodeFlags::NONE)?;
        }
        if let Some(rate) = self.dropout {
            output = graph.add_operation(Dropout::new(rate)?, &[output], NodeFlags::NONE)?;
        }

        tracing::debug!(
            inputs = n_inputs,
            outputs = self.n_outputs,
            activation = ?self.activation,
            dropout = ?self.dropout,
            "added dense layer"
        );

        Ok(DenseNodes {
            weights,
            bias,
            linear,
            output,
        })
    }
}

fn expect_shape(what: &str, value: ArrayD<f64>, shape: &[usize]) -> Result<ArrayD<f64>> {
    if value.shape() != shape {
        return Err(GraphError::shape(format!(
            "Dense layer {} must have shape {:?}, got {:?}",
            what,
            shape,
            value.shape()
        )));
    }
    Ok(value)
}
