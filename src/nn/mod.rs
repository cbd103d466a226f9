// Building blocks for feed-forward networks on top of the computation graph.

pub mod dense;
pub mod initializers;

pub use dense::{Activation, DenseLayer, DenseNodes};
