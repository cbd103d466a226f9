pub mod engine;
pub mod gradcheck;
pub mod node;

#[cfg(test)]
mod tests;

pub use engine::Graph;
pub use gradcheck::{max_gradient_error, numerical_gradient};
pub use node::{Node, NodeFlags, NodeId};
