//! # opgraph
//!
//! opgraph is a small, CPU-based reverse-mode automatic differentiation engine for
//! training feed-forward neural networks, built on `ndarray`.
//!
//! ## Features
//!
//! - Static computation graph with explicit topological ordering
//! - Reverse-mode differentiation with fan-out accumulation and broadcasting
//! - Flat parameter vectors for shape-agnostic optimizers
//! - Dense layers, activations, dropout and cost functions
//! - Adam and momentum SGD mini-batch training
//! - Finite-difference gradient checking
//! - Graph persistence through `serde` + `bincode`
//!
//! ```
//! use ndarray::{arr2, ArrayD, IxDyn};
//! use opgraph::graph::Graph;
//! use opgraph::nn::{Activation, DenseLayer};
//! use opgraph::ops::SoftmaxCrossEntropyCost;
//!
//! let mut graph = Graph::new();
//! let x = graph.add_feeder(ArrayD::zeros(IxDyn(&[4, 3]))).unwrap();
//! let hidden = DenseLayer::new(8)
//!     .activation(Activation::ReLU)
//!     .seed(1)
//!     .build(&mut graph, x)
//!     .unwrap();
//! let logits = DenseLayer::new(2).seed(2).build(&mut graph, hidden.output).unwrap();
//! graph.add_final(SoftmaxCrossEntropyCost::default(), &[logits.output]).unwrap();
//!
//! let params = graph.unroll_gradient_parameters();
//! let data = arr2(&[[0.1, 0.2, 0.3], [0.0, 1.0, 0.5], [1.0, 0.0, 0.0], [0.3, 0.3, 0.3]]);
//! let labels = arr2(&[[1.0, 0.0], [0.0, 1.0], [1.0, 0.0], [0.0, 1.0]]);
//! let (cost, gradient) = graph
//!     .cost_and_gradient(params.view(), data.into_dyn(), labels.into_dyn())
//!     .unwrap();
//! assert!(cost > 0.0);
//! assert_eq!(gradient.len(), params.len());
//! ```
pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluation;
pub mod graph;
pub mod nn;
pub mod ops;
pub mod optim;
pub mod shape;

// Re-export commonly used types for convenience
pub use config::{OptimizerKind, TrainingConfig};
pub use dataset::{DataSplits, LabeledSplit};
pub use error::{GraphError, Result};
pub use evaluation::calculate_accuracy;
pub use graph::{Graph, Node, NodeFlags, NodeId};
pub use ops::{Operation, Operator};
pub use optim::{Adam, AdaptiveSgd, Optimizer, Sgd};
