use crate::error::{GraphError, Result};
use crate::graph::node::{Node, NodeFlags, NodeId};
use crate::ops::{Operation, Operator, Variable};
use crate::shape::size;
use ndarray::{Array1, ArrayD, ArrayView1, IxDyn, s};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;

/// Static computation graph.
///
/// Nodes are registered once while the architecture is assembled. Every training
/// step then runs the same cycle:
/// `reset_all -> assign_data / assign_labels -> attach_parameters -> feed_forward
/// -> feed_backward -> unroll_gradients`, which [`Graph::cost_and_gradient`]
/// bundles into the function the optimizer calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    pub(crate) nodes: Vec<Node>,
    feeder: Option<NodeId>,
    final_op: Option<NodeId>,
    training: bool,

    // Topological order and "leads to a parameter" marks, computed on first use
    #[serde(skip)]
    order: Option<Vec<NodeId>>,
    #[serde(skip)]
    needs_gradient: Vec<bool>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            feeder: None,
            final_op: None,
            training: true,
            order: None,
            needs_gradient: Vec::new(),
        }
    }

    /// Registers an operation consuming `inputs` and infers its output shape.
    ///
    /// Inputs must already be part of the graph, which makes cycles impossible
    /// to build.
    pub fn add_operation(
        &mut self,
        op: impl Into<Operation>,
        inputs: &[NodeId],
        flags: NodeFlags,
    ) -> Result<NodeId> {
        let mut op = op.into();

        if inputs.len() != op.num_inputs() {
            return Err(GraphError::Arity {
                op: op.name(),
                expected: op.num_inputs(),
                actual: inputs.len(),
            });
        }
        for &input in inputs {
            self.node(input)?;
        }
        if flags.do_gradient && op.parameters().is_none() {
            return Err(GraphError::Unsupported {
                op: op.name(),
                action: "gradient collection",
            });
        }
        if flags.final_operation {
            if let Some(existing) = self.final_op {
                return Err(GraphError::DuplicateRole {
                    role: "final",
                    existing,
                });
            }
        }
        if flags.feeder_operation {
            if let Some(existing) = self.feeder {
                return Err(GraphError::DuplicateRole {
                    role: "feeder",
                    existing,
                });
            }
        }

        // The fused cost applies softmax itself and expects raw logits
        if matches!(op, Operation::SoftmaxCrossEntropyCost(_))
            && inputs
                .iter()
                .any(|id| matches!(self.nodes[id.0].op, Operation::Softmax(_)))
        {
            return Err(GraphError::Unsupported {
                op: op.name(),
                action: "softmax-activated input, pass the logits instead",
            });
        }

        let shape = {
            let input_shapes: Vec<&[usize]> = inputs
                .iter()
                .map(|id| self.nodes[id.0].shape.as_slice())
                .collect();
            op.set_shape(&input_shapes)?
        };
        op.set_training(self.training);

        let id = NodeId(self.nodes.len());
        for &input in inputs {
            self.nodes[input.0].outputs.push(id);
        }
        tracing::trace!(node = %id, op = op.name(), shape = ?shape, "added operation");
        self.nodes
            .push(Node::new(id, op, inputs.to_vec(), shape, flags));

        if flags.final_operation {
            self.final_op = Some(id);
        }
        if flags.feeder_operation {
            self.feeder = Some(id);
        }
        self.order = None;

        Ok(id)
    }

    /// Adds a constant leaf.
    pub fn add_variable(&mut self, value: ArrayD<f64>) -> Result<NodeId> {
        self.add_operation(Variable::new(value), &[], NodeFlags::NONE)
    }

    /// Adds a trainable leaf whose gradient is collected for the optimizer.
    pub fn add_parameter(&mut self, value: ArrayD<f64>) -> Result<NodeId> {
        self.add_operation(Variable::new(value), &[], NodeFlags::gradient())
    }

    /// Adds the leaf that receives data batches.
    pub fn add_feeder(&mut self, value: ArrayD<f64>) -> Result<NodeId> {
        self.add_operation(Variable::new(value), &[], NodeFlags::feeder())
    }

    /// Adds the cost operation that terminates the graph.
    pub fn add_final(&mut self, op: impl Into<Operation>, inputs: &[NodeId]) -> Result<NodeId> {
        self.add_operation(op, inputs, NodeFlags::final_operation())
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.0).ok_or(GraphError::UnknownNode(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn feeder(&self) -> Option<NodeId> {
        self.feeder
    }

    pub fn final_operation(&self) -> Option<NodeId> {
        self.final_op
    }

    pub fn shape(&self, id: NodeId) -> Result<&[usize]> {
        Ok(self.node(id)?.shape())
    }

    /// Cached forward result of a node, if the current cycle computed it.
    pub fn result(&self, id: NodeId) -> Option<&ArrayD<f64>> {
        self.nodes.get(id.0).and_then(Node::result)
    }

    /// Accumulated dCost/dOutput of a node, if the current backward pass computed it.
    pub fn gradient(&self, id: NodeId) -> Option<&ArrayD<f64>> {
        self.nodes.get(id.0).and_then(Node::gradient)
    }

    /// Gradient that `consumer` sent to its input number `position` during the
    /// current backward pass.
    pub fn gradient_contribution(&self, consumer: NodeId, position: usize) -> Option<&ArrayD<f64>> {
        self.nodes
            .get(consumer.0)?
            .input_gradients
            .get(position)?
            .as_ref()
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Switches every operation between training and evaluation behaviour.
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
        for node in &mut self.nodes {
            node.op.set_training(training);
        }
    }

    /// Topological order of all nodes, computed once and cached until the graph changes.
    pub fn topological_order(&mut self) -> Result<&[NodeId]> {
        self.ensure_order()?;
        Ok(self.order.as_deref().unwrap_or_default())
    }

    fn ensure_order(&mut self) -> Result<()> {
        if self.order.is_some() {
            return Ok(());
        }

        // Kahn's algorithm. Consumers appear in `outputs` once per use, matching
        // the in-degree counted from `inputs`.
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.inputs.len()).collect();
        let mut ready: VecDeque<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.inputs.is_empty())
            .map(|n| n.id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = ready.pop_front() {
            order.push(id);
            for consumer in &self.nodes[id.0].outputs {
                in_degree[consumer.0] -= 1;
                if in_degree[consumer.0] == 0 {
                    ready.push_back(*consumer);
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(GraphError::Cycle);
        }

        let mut needs_gradient = vec![false; self.nodes.len()];
        for id in &order {
            let node = &self.nodes[id.0];
            needs_gradient[id.0] =
                node.flags.do_gradient || node.inputs.iter().any(|input| needs_gradient[input.0]);
        }

        for node in &self.nodes {
            if node.is_end_node() && !node.flags.final_operation && needs_gradient[node.id.0] {
                tracing::warn!(
                    node = %node.id,
                    op = node.name(),
                    "dangling node will send a gradient of ones to its inputs"
                );
            }
        }

        tracing::debug!(
            nodes = self.nodes.len(),
            parameters = self.nodes.iter().filter(|n| n.flags.do_gradient).count(),
            "computed topological order"
        );

        self.order = Some(order);
        self.needs_gradient = needs_gradient;
        Ok(())
    }

    fn order(&mut self) -> Result<Vec<NodeId>> {
        Ok(self.topological_order()?.to_vec())
    }

    // Re-runs shape inference after the feeder changed shape (variable batch size).
    fn refresh_shapes(&mut self) -> Result<()> {
        for id in self.order()? {
            let input_shapes: Vec<Vec<usize>> = self.nodes[id.0]
                .inputs
                .iter()
                .map(|input| self.nodes[input.0].shape.clone())
                .collect();
            let input_shapes: Vec<&[usize]> = input_shapes.iter().map(Vec::as_slice).collect();
            let shape = self.nodes[id.0].op.set_shape(&input_shapes)?;
            self.nodes[id.0].shape = shape;
        }
        Ok(())
    }

    /// Binds a data batch to the feeder. The leading examples dimension may
    /// change between calls; all shapes are re-inferred.
    pub fn assign_data(&mut self, data: ArrayD<f64>) -> Result<()> {
        let feeder = self.feeder.ok_or(GraphError::MissingFeeder)?;
        let previous = self.nodes[feeder.0].shape.clone();
        self.nodes[feeder.0].op.assign_data(data)?;
        if self.nodes[feeder.0].op.set_shape(&[])? != previous {
            self.refresh_shapes()?;
        }
        Ok(())
    }

    /// Binds the labels of the current batch to the final (cost) operation.
    pub fn assign_labels(&mut self, labels: ArrayD<f64>) -> Result<()> {
        let final_op = self.final_op.ok_or(GraphError::MissingFinal)?;
        self.nodes[final_op.0].op.assign_labels(labels)
    }

    /// Clears every forward and backward cache. Idempotent.
    pub fn reset_all(&mut self) {
        for node in &mut self.nodes {
            node.clear_caches();
        }
    }

    /// Evaluates every node in topological order and returns the cost, the sum
    /// of the final node's result.
    pub fn feed_forward(&mut self) -> Result<f64> {
        self.feeder.ok_or(GraphError::MissingFeeder)?;
        let final_op = self.final_op.ok_or(GraphError::MissingFinal)?;
        let order = self.order()?;

        let _span = tracing::debug_span!("feed_forward", nodes = order.len()).entered();
        for id in order {
            self.perform_node(id)?;
        }

        let cost = self.nodes[final_op.0]
            .result
            .as_ref()
            .ok_or(GraphError::NotEvaluated(final_op))?
            .sum();
        tracing::debug!(cost, "forward pass complete");
        Ok(cost)
    }

    pub(crate) fn perform_node(&mut self, id: NodeId) -> Result<()> {
        // Inputs always precede their consumer in the arena
        let (before, rest) = self.nodes.split_at_mut(id.0);
        let node = &mut rest[0];

        let mut values = Vec::with_capacity(node.inputs.len());
        for &input in &node.inputs {
            let value = before
                .get(input.0)
                .and_then(|n| n.result.as_ref())
                .ok_or(GraphError::UnboundInput { node: id, input })?;
            values.push(value);
        }

        let output = node.op.perform(&values)?;
        if output.shape() != node.shape.as_slice() {
            return Err(GraphError::shape(format!(
                "{} ({}) produced shape {:?}, inferred {:?}",
                node.op.name(),
                id,
                output.shape(),
                node.shape
            )));
        }

        node.result = Some(output);
        // A new result invalidates gradients from any earlier cycle
        node.clear_gradients();
        Ok(())
    }

    /// Propagates gradients from the final node back to every parameter.
    ///
    /// The final node is seeded with ones. A dangling node (no consumers, not
    /// final) sends ones of the input's shape to each of its inputs without
    /// applying its own derivative. Every other node sums the contributions of
    /// all its consumers.
    pub fn feed_backward(&mut self) -> Result<()> {
        let final_op = self.final_op.ok_or(GraphError::MissingFinal)?;
        if self.nodes[final_op.0].result.is_none() {
            return Err(GraphError::NotEvaluated(final_op));
        }
        let order = self.order()?;

        let _span = tracing::debug_span!("feed_backward", nodes = order.len()).entered();
        for &id in order.iter().rev() {
            if self.needs_gradient[id.0] {
                self.accumulate_gradient(id)?;
            }
        }
        Ok(())
    }

    fn accumulate_gradient(&mut self, id: NodeId) -> Result<()> {
        if self.nodes[id.0].gradient.is_some() {
            return Ok(());
        }

        let node = &self.nodes[id.0];
        let dim = node
            .result
            .as_ref()
            .ok_or(GraphError::NotEvaluated(id))?
            .raw_dim();

        let gradient = if node.is_end_node() {
            ArrayD::ones(dim)
        } else {
            let mut consumers = node.outputs.clone();
            consumers.sort_unstable();
            consumers.dedup();

            let mut total = ArrayD::<f64>::zeros(dim);
            for consumer in consumers {
                let positions: Vec<usize> = self.nodes[consumer.0]
                    .inputs
                    .iter()
                    .enumerate()
                    .filter(|(_, input)| **input == id)
                    .map(|(position, _)| position)
                    .collect();
                for position in positions {
                    self.ensure_contribution(consumer, position)?;
                    if let Some(contribution) = self.gradient_contribution(consumer, position) {
                        total += contribution;
                    }
                }
            }
            total
        };

        self.nodes[id.0].gradient = Some(gradient);
        Ok(())
    }

    // Memoized per (consumer, input position) for the rest of the backward pass.
    fn ensure_contribution(&mut self, consumer: NodeId, position: usize) -> Result<()> {
        if self.gradient_contribution(consumer, position).is_some() {
            return Ok(());
        }
        self.accumulate_gradient(consumer)?;

        let (before, rest) = self.nodes.split_at_mut(consumer.0);
        let node = &mut rest[0];

        // Dangling nodes hand ones straight to their inputs
        if node.is_end_node() && !node.flags.final_operation {
            let input = node.inputs[position];
            let ones = ArrayD::<f64>::ones(IxDyn(&before[input.0].shape));
            if node.input_gradients.len() != node.inputs.len() {
                node.input_gradients.resize(node.inputs.len(), None);
            }
            node.input_gradients[position] = Some(ones);
            return Ok(());
        }

        let grad = node.gradient.as_ref().ok_or(GraphError::NotEvaluated(consumer))?;
        let output = node.result.as_ref().ok_or(GraphError::NotEvaluated(consumer))?;

        let mut values = Vec::with_capacity(node.inputs.len());
        for &input in &node.inputs {
            let value = before
                .get(input.0)
                .and_then(|n| n.result.as_ref())
                .ok_or(GraphError::NotEvaluated(input))?;
            values.push(value);
        }

        let contribution = node.op.perform_gradient(position, grad, &values, output)?;
        let input = node.inputs[position];
        if contribution.shape() != before[input.0].shape.as_slice() {
            return Err(GraphError::shape(format!(
                "{} sent a gradient of shape {:?} to {} of shape {:?}",
                node.op.name(),
                contribution.shape(),
                input,
                before[input.0].shape
            )));
        }

        if node.input_gradients.len() != node.inputs.len() {
            node.input_gradients.resize(node.inputs.len(), None);
        }
        node.input_gradients[position] = Some(contribution);
        Ok(())
    }

    fn parameter_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.flags.do_gradient)
    }

    /// Total number of trainable values.
    pub fn num_parameters(&self) -> usize {
        self.parameter_nodes()
            .filter_map(|n| n.op.parameters())
            .map(|p| p.len())
            .sum()
    }

    /// Concatenates every parameter, in registration order, into one flat vector.
    pub fn unroll_gradient_parameters(&self) -> Array1<f64> {
        let mut flat = Vec::with_capacity(self.num_parameters());
        for node in self.parameter_nodes() {
            if let Some(parameters) = node.op.parameters() {
                flat.extend(parameters.iter().copied());
            }
        }
        Array1::from(flat)
    }

    /// Concatenates the gradient of every parameter, in the same order as
    /// [`Graph::unroll_gradient_parameters`].
    pub fn unroll_gradients(&self) -> Result<Array1<f64>> {
        let mut flat = Vec::with_capacity(self.num_parameters());
        for node in self.parameter_nodes() {
            let gradient = node.gradient.as_ref().ok_or(GraphError::NotEvaluated(node.id))?;
            flat.extend(gradient.iter().copied());
        }
        Ok(Array1::from(flat))
    }

    /// Slices a flat vector back into every parameter. Inverse of
    /// [`Graph::unroll_gradient_parameters`].
    pub fn attach_parameters(&mut self, parameters: ArrayView1<'_, f64>) -> Result<()> {
        let expected = self.num_parameters();
        if parameters.len() != expected {
            return Err(GraphError::ParameterSizeMismatch {
                expected,
                actual: parameters.len(),
            });
        }

        let mut offset = 0;
        for node in self.nodes.iter_mut().filter(|n| n.flags.do_gradient) {
            let Some(shape) = node.op.parameters().map(|p| p.shape().to_vec()) else {
                continue;
            };
            let count = size(&shape);
            let values = parameters.slice(s![offset..offset + count]).to_vec();
            let value = ArrayD::from_shape_vec(IxDyn(&shape), values)
                .map_err(|e| GraphError::shape(e.to_string()))?;
            node.op.set_parameters(value)?;
            offset += count;
        }
        Ok(())
    }

    /// One full training step as seen by the optimizer:
    /// `(parameters, data, labels) -> (cost, flat gradient)`.
    pub fn cost_and_gradient(
        &mut self,
        parameters: ArrayView1<'_, f64>,
        data: ArrayD<f64>,
        labels: ArrayD<f64>,
    ) -> Result<(f64, Array1<f64>)> {
        self.assign_data(data)?;
        self.reset_all();
        self.assign_labels(labels)?;
        self.attach_parameters(parameters)?;
        let cost = self.feed_forward()?;
        self.feed_backward()?;
        let gradient = self.unroll_gradients()?;
        Ok((cost, gradient))
    }

    /// Serializes topology and parameters. Caches are not included.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| GraphError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (mut graph, _): (Graph, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| GraphError::Serialization(e.to_string()))?;
        graph.validate()?;
        graph.rebuild_outputs();
        graph.refresh_shapes()?;
        graph.reset_all();
        Ok(graph)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    // Checks the invariants `add_operation` maintains on a restored graph.
    // Back references and shapes are derived data and get rebuilt instead.
    fn validate(&self) -> Result<()> {
        for (index, node) in self.nodes.iter().enumerate() {
            if node.id.0 != index {
                return Err(GraphError::Serialization(format!(
                    "{} stored at position {}",
                    node.id, index
                )));
            }
            if let Some(input) = node.inputs.iter().find(|i| i.0 >= self.nodes.len()) {
                return Err(GraphError::UnknownNode(*input));
            }
            if node.inputs.iter().any(|input| input.0 >= index) {
                return Err(GraphError::Cycle);
            }
            if node.inputs.len() != node.op.num_inputs() {
                return Err(GraphError::Arity {
                    op: node.op.name(),
                    expected: node.op.num_inputs(),
                    actual: node.inputs.len(),
                });
            }
            if node.flags.do_gradient && node.op.parameters().is_none() {
                return Err(GraphError::Unsupported {
                    op: node.op.name(),
                    action: "gradient collection",
                });
            }
        }
        for role in [self.feeder, self.final_op].into_iter().flatten() {
            self.node(role)?;
        }
        Ok(())
    }

    fn rebuild_outputs(&mut self) {
        for node in &mut self.nodes {
            node.outputs.clear();
        }
        for index in 0..self.nodes.len() {
            let id = self.nodes[index].id;
            for input in self.nodes[index].inputs.clone() {
                self.nodes[input.0].outputs.push(id);
            }
        }
        self.order = None;
    }
}
