use crate::graph::NodeId;
use thiserror::Error;

/// Errors raised while building or running a computation graph.
///
/// Every variant is fatal for the current forward/backward cycle. Nothing in the
/// crate retries internally; callers (usually the optimizer loop) decide whether
/// to abort the whole run.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Inputs of an operation have shapes this operation cannot combine.
    #[error("Shape error: {0}")]
    Shape(String),

    /// Forward evaluation reached a node before one of its inputs was computed.
    #[error("Node {node} evaluated before its input {input} was computed")]
    UnboundInput { node: NodeId, input: NodeId },

    /// A flat parameter vector does not match the parameter count of the graph.
    #[error("Parameter vector has {actual} elements, graph expects {expected}")]
    ParameterSizeMismatch { expected: usize, actual: usize },

    #[error("Operation {op} expects {expected} inputs, got {actual}")]
    Arity {
        op: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{0} is not part of this graph")]
    UnknownNode(NodeId),

    #[error("Graph already has a {role} operation ({existing})")]
    DuplicateRole { role: &'static str, existing: NodeId },

    #[error("Graph has no feeder operation")]
    MissingFeeder,

    #[error("Graph has no final operation")]
    MissingFinal,

    #[error("Cost operation {0} has no labels assigned")]
    MissingLabels(&'static str),

    #[error("Backward pass requested before node {0} was evaluated")]
    NotEvaluated(NodeId),

    #[error("Computation graph contains a cycle")]
    Cycle,

    #[error("Operation {op} does not support {action}")]
    Unsupported {
        op: &'static str,
        action: &'static str,
    },

    /// Training diverged: the cost of a mini-batch became NaN or infinite.
    #[error("Cost is not finite ({cost}) at update {update}")]
    NonFiniteCost { update: usize, cost: f64 },

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GraphError {
    pub fn shape(message: impl Into<String>) -> Self {
        GraphError::Shape(message.into())
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
