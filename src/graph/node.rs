use crate::ops::{Operation, Operator};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

/// Position of a node inside its graph's node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Role flags of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFlags {
    /// Collect this node's gradient into the unrolled parameter gradient.
    pub do_gradient: bool,
    /// The cost node; the backward pass starts here.
    pub final_operation: bool,
    /// The node receiving data batches.
    pub feeder_operation: bool,
}

impl NodeFlags {
    pub const NONE: NodeFlags = NodeFlags {
        do_gradient: false,
        final_operation: false,
        feeder_operation: false,
    };

    pub fn gradient() -> Self {
        Self {
            do_gradient: true,
            ..Self::NONE
        }
    }

    pub fn final_operation() -> Self {
        Self {
            final_operation: true,
            ..Self::NONE
        }
    }

    pub fn feeder() -> Self {
        Self {
            feeder_operation: true,
            ..Self::NONE
        }
    }
}

/// One vertex of the computation graph.
///
/// The graph owns every node; `inputs` and `outputs` are indices into the same
/// arena, so fan-out back references never form ownership cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) op: Operation,
    pub(crate) inputs: Vec<NodeId>,
    pub(crate) outputs: Vec<NodeId>,
    pub(crate) shape: Vec<usize>,
    pub(crate) flags: NodeFlags,

    // Per-cycle caches, never persisted
    #[serde(skip)]
    pub(crate) result: Option<ArrayD<f64>>,
    /// dCost/dOutput summed over every consumer.
    #[serde(skip)]
    pub(crate) gradient: Option<ArrayD<f64>>,
    /// Gradient this node sends to each of its input positions.
    #[serde(skip)]
    pub(crate) input_gradients: Vec<Option<ArrayD<f64>>>,
}

impl Node {
    pub(crate) fn new(
        id: NodeId,
        op: Operation,
        inputs: Vec<NodeId>,
        shape: Vec<usize>,
        flags: NodeFlags,
    ) -> Self {
        let input_gradients = vec![None; inputs.len()];
        Self {
            id,
            op,
            inputs,
            outputs: Vec::new(),
            shape,
            flags,
            result: None,
            gradient: None,
            input_gradients,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.op.name()
    }

    pub fn operation(&self) -> &Operation {
        &self.op
    }

    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    pub fn result(&self) -> Option<&ArrayD<f64>> {
        self.result.as_ref()
    }

    pub fn gradient(&self) -> Option<&ArrayD<f64>> {
        self.gradient.as_ref()
    }

    /// Nodes without consumers are seeded with a gradient of ones.
    pub fn is_end_node(&self) -> bool {
        self.outputs.is_empty()
    }

    pub(crate) fn clear_gradients(&mut self) {
        self.gradient = None;
        self.input_gradients.clear();
        self.input_gradients.resize(self.inputs.len(), None);
    }

    pub(crate) fn clear_caches(&mut self) {
        self.result = None;
        self.clear_gradients();
        self.op.reset();
    }
}
