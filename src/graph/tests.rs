use crate::error::GraphError;
use crate::graph::{Graph, NodeFlags, NodeId, numerical_gradient};
use crate::ops::{
    Add, Dropout, Exp, MatMul, Multiply, QuadraticCost, Sigmoid, Slice, SliceItem, SumAll,
    Tanh, Variable,
};
use approx::assert_abs_diff_eq;
use ndarray::{Array1, ArrayD, IxDyn, arr1, arr2};

fn assert_all_close(actual: &ArrayD<f64>, expected: &ArrayD<f64>, epsilon: f64) {
    assert_eq!(actual.shape(), expected.shape());
    for (a, e) in actual.iter().zip(expected.iter()) {
        assert_abs_diff_eq!(*a, *e, epsilon = epsilon);
    }
}

/// `sum(x @ w)` with `x` fed as data and `w` trainable.
fn linear_graph() -> (Graph, NodeId, NodeId) {
    let mut graph = Graph::new();
    let x = graph
        .add_feeder(arr2(&[[1.0, 2.0], [3.0, 4.0]]).into_dyn())
        .unwrap();
    let w = graph
        .add_parameter(arr2(&[[1.0], [1.0]]).into_dyn())
        .unwrap();
    let product = graph.add_operation(MatMul, &[x, w], NodeFlags::NONE).unwrap();
    graph.add_final(SumAll, &[product]).unwrap();
    (graph, x, w)
}

/// Two-layer regression network ending in a quadratic cost.
fn regression_graph() -> Graph {
    let mut graph = Graph::new();
    let x = graph
        .add_feeder(arr2(&[[0.5, -1.0, 2.0], [1.5, 0.3, -0.7]]).into_dyn())
        .unwrap();
    let w1 = graph
        .add_parameter(arr2(&[[0.1, -0.2], [0.4, 0.3], [-0.5, 0.2]]).into_dyn())
        .unwrap();
    let b1 = graph.add_parameter(arr2(&[[0.05, -0.05]]).into_dyn()).unwrap();
    let w2 = graph
        .add_parameter(arr2(&[[0.7], [-0.3]]).into_dyn())
        .unwrap();

    let h = graph.add_operation(MatMul, &[x, w1], NodeFlags::NONE).unwrap();
    let h = graph.add_operation(Add, &[h, b1], NodeFlags::NONE).unwrap();
    let h = graph.add_operation(Tanh, &[h], NodeFlags::NONE).unwrap();
    let y = graph.add_operation(MatMul, &[h, w2], NodeFlags::NONE).unwrap();
    graph
        .add_final(QuadraticCost::new(Some(arr2(&[[1.0], [-1.0]]).into_dyn())), &[y])
        .unwrap();
    graph
}

#[test]
fn test_feed_forward_returns_cost() {
    let (mut graph, _, w) = linear_graph();
    let cost = graph.feed_forward().unwrap();
    assert_abs_diff_eq!(cost, 10.0, epsilon = 1e-12);

    graph.feed_backward().unwrap();
    // d sum(x @ w) / dw = column sums of x
    let expected = arr2(&[[4.0], [6.0]]).into_dyn();
    assert_all_close(graph.gradient(w).unwrap(), &expected, 1e-12);
}

#[test]
fn test_missing_roles() {
    let mut graph = Graph::new();
    let p = graph.add_parameter(ArrayD::ones(IxDyn(&[2]))).unwrap();
    graph.add_final(SumAll, &[p]).unwrap();
    assert!(matches!(graph.feed_forward(), Err(GraphError::MissingFeeder)));

    let mut graph = Graph::new();
    graph.add_feeder(ArrayD::ones(IxDyn(&[2]))).unwrap();
    assert!(matches!(graph.feed_forward(), Err(GraphError::MissingFinal)));
    assert!(matches!(
        graph.assign_labels(ArrayD::ones(IxDyn(&[2]))),
        Err(GraphError::MissingFinal)
    ));
}

#[test]
fn test_duplicate_roles_rejected() {
    let (mut graph, x, _) = linear_graph();
    let final_op = graph.final_operation().unwrap();
    match graph.add_final(SumAll, &[x]) {
        Err(GraphError::DuplicateRole { role, existing }) => {
            assert_eq!(role, "final");
            assert_eq!(existing, final_op);
        }
        other => panic!("expected DuplicateRole, got {:?}", other),
    }
    assert!(matches!(
        graph.add_feeder(ArrayD::zeros(IxDyn(&[1]))),
        Err(GraphError::DuplicateRole { role: "feeder", .. })
    ));
}

#[test]
fn test_add_operation_validation() {
    let (mut graph, x, _) = linear_graph();
    let before = graph.len();

    assert!(matches!(
        graph.add_operation(Add, &[x], NodeFlags::NONE),
        Err(GraphError::Arity { op: "Add", expected: 2, actual: 1 })
    ));
    assert!(matches!(
        graph.add_operation(Exp, &[NodeId(42)], NodeFlags::NONE),
        Err(GraphError::UnknownNode(NodeId(42)))
    ));
    assert!(matches!(
        graph.add_operation(Exp, &[x], NodeFlags::gradient()),
        Err(GraphError::Unsupported { op: "Exp", .. })
    ));
    // Incompatible shapes fail at construction, not at evaluation
    let row = graph.add_variable(ArrayD::ones(IxDyn(&[3]))).unwrap();
    assert!(matches!(
        graph.add_operation(Add, &[x, row], NodeFlags::NONE),
        Err(GraphError::Shape(_))
    ));

    // Only the variable made it in
    assert_eq!(graph.len(), before + 1);
}

#[test]
fn test_fan_out_gradients_are_summed() {
    let mut graph = Graph::new();
    graph.add_feeder(ArrayD::zeros(IxDyn(&[1]))).unwrap();
    let p = graph
        .add_parameter(arr1(&[0.3, -1.2, 2.0]).into_dyn())
        .unwrap();
    let e = graph.add_operation(Exp, &[p], NodeFlags::NONE).unwrap();
    let s = graph.add_operation(Sigmoid, &[p], NodeFlags::NONE).unwrap();
    let sum = graph.add_operation(Add, &[e, s], NodeFlags::NONE).unwrap();
    graph.add_final(SumAll, &[sum]).unwrap();

    graph.feed_forward().unwrap();
    graph.feed_backward().unwrap();

    let from_exp = graph.gradient_contribution(e, 0).unwrap();
    let from_sigmoid = graph.gradient_contribution(s, 0).unwrap();
    let expected = from_exp + from_sigmoid;
    assert_all_close(graph.gradient(p).unwrap(), &expected, 1e-12);
}

#[test]
fn test_same_input_twice() {
    let mut graph = Graph::new();
    graph.add_feeder(ArrayD::zeros(IxDyn(&[1]))).unwrap();
    let p = graph
        .add_parameter(arr1(&[1.0, -2.0, 3.0]).into_dyn())
        .unwrap();
    let square = graph.add_operation(Multiply, &[p, p], NodeFlags::NONE).unwrap();
    graph.add_final(SumAll, &[square]).unwrap();

    graph.feed_forward().unwrap();
    graph.feed_backward().unwrap();

    let expected = arr1(&[2.0, -4.0, 6.0]).into_dyn();
    assert_all_close(graph.gradient(p).unwrap(), &expected, 1e-12);
}

#[test]
fn test_unroll_attach_round_trip() {
    let mut graph = regression_graph();
    assert_eq!(graph.num_parameters(), 6 + 2 + 2);

    let params = graph.unroll_gradient_parameters();
    assert_eq!(params.len(), graph.num_parameters());
    assert_abs_diff_eq!(params[0], 0.1);
    assert_abs_diff_eq!(params[6], 0.05);

    let shifted = &params + 1.0;
    graph.attach_parameters(shifted.view()).unwrap();
    assert_eq!(graph.unroll_gradient_parameters(), shifted);

    graph.attach_parameters(params.view()).unwrap();
    assert_eq!(graph.unroll_gradient_parameters(), params);
}

#[test]
fn test_attach_rejects_wrong_size() {
    let mut graph = regression_graph();
    let params = Array1::<f64>::zeros(graph.num_parameters() + 1);
    assert!(matches!(
        graph.attach_parameters(params.view()),
        Err(GraphError::ParameterSizeMismatch { expected: 10, actual: 11 })
    ));
}

#[test]
fn test_reset_is_idempotent() {
    let mut graph = regression_graph();
    let cost = graph.feed_forward().unwrap();
    graph.feed_backward().unwrap();

    graph.reset_all();
    graph.reset_all();
    assert!(graph.nodes().all(|n| n.result().is_none() && n.gradient().is_none()));

    assert_abs_diff_eq!(graph.feed_forward().unwrap(), cost, epsilon = 1e-12);
}

#[test]
fn test_forward_recomputes_after_parameter_change() {
    let (mut graph, _, _) = linear_graph();
    assert_abs_diff_eq!(graph.feed_forward().unwrap(), 10.0, epsilon = 1e-12);
    graph.feed_backward().unwrap();

    graph.attach_parameters(arr1(&[2.0, 0.0]).view()).unwrap();
    graph.reset_all();
    assert_abs_diff_eq!(graph.feed_forward().unwrap(), 8.0, epsilon = 1e-12);
}

#[test]
fn test_forward_clears_stale_gradients() {
    let (mut graph, _, w) = linear_graph();
    graph.feed_forward().unwrap();
    graph.feed_backward().unwrap();
    assert!(graph.gradient(w).is_some());

    graph.feed_forward().unwrap();
    assert!(graph.gradient(w).is_none());
    assert!(matches!(graph.unroll_gradients(), Err(GraphError::NotEvaluated(id)) if id == w));
}

#[test]
fn test_backward_before_forward_fails() {
    let (mut graph, _, _) = linear_graph();
    let final_op = graph.final_operation().unwrap();
    assert!(matches!(
        graph.feed_backward(),
        Err(GraphError::NotEvaluated(id)) if id == final_op
    ));
}

#[test]
fn test_dangling_branch_sends_ones_to_its_input() {
    let mut graph = Graph::new();
    graph.add_feeder(ArrayD::zeros(IxDyn(&[1]))).unwrap();
    let p = graph
        .add_parameter(arr1(&[0.0, 1.0]).into_dyn())
        .unwrap();
    graph.add_final(SumAll, &[p]).unwrap();
    // Never reaches the final node
    let dangling = graph.add_operation(Exp, &[p], NodeFlags::NONE).unwrap();

    graph.feed_forward().unwrap();
    graph.feed_backward().unwrap();

    assert!(graph.node(dangling).unwrap().is_end_node());
    // The exp derivative is not applied on the dangling branch
    let ones = arr1(&[1.0, 1.0]).into_dyn();
    assert_all_close(graph.gradient_contribution(dangling, 0).unwrap(), &ones, 1e-12);
    let expected = arr1(&[2.0, 2.0]).into_dyn();
    assert_all_close(graph.gradient(p).unwrap(), &expected, 1e-12);
}

#[test]
fn test_dangling_slice_sends_ones_of_input_shape() {
    let mut graph = Graph::new();
    graph.add_feeder(ArrayD::zeros(IxDyn(&[1]))).unwrap();
    let p = graph.add_parameter(ArrayD::zeros(IxDyn(&[2, 2]))).unwrap();
    graph.add_final(SumAll, &[p]).unwrap();
    graph
        .add_operation(Slice::new(vec![SliceItem::Index(0)]), &[p], NodeFlags::NONE)
        .unwrap();

    graph.feed_forward().unwrap();
    graph.feed_backward().unwrap();

    let expected = ArrayD::from_elem(IxDyn(&[2, 2]), 2.0);
    assert_all_close(graph.gradient(p).unwrap(), &expected, 1e-12);
}

#[test]
fn test_unbound_input_is_reported() {
    let (mut graph, x, w) = linear_graph();
    let product = graph.node(x).unwrap().outputs()[0];
    graph.reset_all();

    assert!(matches!(
        graph.perform_node(product),
        Err(GraphError::UnboundInput { node, input }) if node == product && input == x
    ));
    graph.perform_node(x).unwrap();
    assert!(matches!(
        graph.perform_node(product),
        Err(GraphError::UnboundInput { input, .. }) if input == w
    ));
}

#[test]
fn test_variable_batch_size() {
    let (mut graph, x, _) = linear_graph();
    let product = graph.node(x).unwrap().outputs()[0];
    assert_eq!(graph.shape(product).unwrap(), &[2, 1]);

    graph
        .assign_data(ArrayD::ones(IxDyn(&[5, 2])))
        .unwrap();
    assert_eq!(graph.shape(x).unwrap(), &[5, 2]);
    assert_eq!(graph.shape(product).unwrap(), &[5, 1]);

    graph.reset_all();
    assert_abs_diff_eq!(graph.feed_forward().unwrap(), 10.0, epsilon = 1e-12);

    // Feature count still has to match the weights
    assert!(matches!(
        graph.assign_data(ArrayD::ones(IxDyn(&[5, 3]))),
        Err(GraphError::Shape(_))
    ));
}

#[test]
fn test_topological_order_respects_inputs() {
    let mut graph = regression_graph();
    let order = graph.topological_order().unwrap().to_vec();
    assert_eq!(order.len(), graph.len());

    let position = |id: NodeId| order.iter().position(|&o| o == id).unwrap();
    for node in graph.nodes() {
        for &input in node.inputs() {
            assert!(position(input) < position(node.id()));
        }
    }
}

#[test]
fn test_cost_and_gradient_matches_numerical() {
    let mut graph = regression_graph();
    let params = graph.unroll_gradient_parameters();
    let data = arr2(&[[0.2, 0.1, -0.4], [1.0, -1.0, 0.5], [0.0, 0.3, 0.3]]).into_dyn();
    let labels = arr2(&[[0.5], [-0.5], [1.0]]).into_dyn();

    let (cost, gradient) = graph
        .cost_and_gradient(params.view(), data, labels)
        .unwrap();
    assert!(cost > 0.0);
    assert_eq!(gradient.len(), params.len());

    let numerical = numerical_gradient(&mut graph, 1e-6).unwrap();
    for (a, n) in gradient.iter().zip(numerical.iter()) {
        assert_abs_diff_eq!(*a, *n, epsilon = 1e-6);
    }
    // Parameters are restored after the numerical estimate
    assert_eq!(graph.unroll_gradient_parameters(), params);
}

#[test]
fn test_evaluation_mode_makes_dropout_deterministic() {
    let mut graph = Graph::new();
    let x = graph
        .add_feeder(ArrayD::ones(IxDyn(&[4, 8])))
        .unwrap();
    let dropped = graph
        .add_operation(Dropout::new(0.5).unwrap(), &[x], NodeFlags::NONE)
        .unwrap();
    graph.add_final(SumAll, &[dropped]).unwrap();

    graph.set_training(false);
    assert!(!graph.is_training());
    assert_abs_diff_eq!(graph.feed_forward().unwrap(), 32.0, epsilon = 1e-12);

    // Operations added later inherit the current mode
    let late = graph
        .add_operation(Dropout::new(0.5).unwrap(), &[x], NodeFlags::NONE)
        .unwrap();
    graph.reset_all();
    graph.feed_forward().unwrap();
    assert_all_close(
        graph.result(late).unwrap(),
        &ArrayD::ones(IxDyn(&[4, 8])),
        0.0,
    );
}

#[test]
fn test_persistence_round_trip() {
    let mut graph = regression_graph();
    let cost = graph.feed_forward().unwrap();
    graph.feed_backward().unwrap();
    let gradient = graph.unroll_gradients().unwrap();

    let bytes = graph.to_bytes().unwrap();
    let mut restored = Graph::from_bytes(&bytes).unwrap();
    assert_eq!(restored.len(), graph.len());
    assert!(restored.nodes().all(|n| n.result().is_none()));

    assert_abs_diff_eq!(restored.feed_forward().unwrap(), cost, epsilon = 1e-12);
    restored.feed_backward().unwrap();
    assert_eq!(restored.unroll_gradients().unwrap(), gradient);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.bin");
    graph.save(&path).unwrap();
    let mut loaded = Graph::load(&path).unwrap();
    assert_abs_diff_eq!(loaded.feed_forward().unwrap(), cost, epsilon = 1e-12);
}

#[test]
fn test_from_bytes_rejects_garbage() {
    assert!(matches!(
        Graph::from_bytes(&[0xff, 0x00, 0x13]),
        Err(GraphError::Serialization(_))
    ));
}

#[test]
fn test_from_bytes_rebuilds_back_references_and_shapes() {
    let (mut graph, x, w) = linear_graph();
    let expected = graph.feed_forward().unwrap();
    let product = graph.nodes[x.0].outputs[0];
    graph.nodes[x.0].outputs.push(product);
    graph.nodes[w.0].shape = vec![7, 3];

    let mut restored = Graph::from_bytes(&graph.to_bytes().unwrap()).unwrap();
    assert_eq!(restored.node(x).unwrap().outputs(), &[product]);
    assert_eq!(restored.shape(w).unwrap(), &[2, 1]);

    let params = restored.unroll_gradient_parameters();
    restored.attach_parameters(params.view()).unwrap();
    assert_abs_diff_eq!(restored.feed_forward().unwrap(), expected, epsilon = 1e-12);
    restored.feed_backward().unwrap();
}

#[test]
fn test_from_bytes_rejects_inconsistent_graphs() {
    // An input stored after its consumer
    let (mut graph, x, _) = linear_graph();
    let product = graph.nodes[x.0].outputs[0];
    graph.nodes[x.0].inputs = vec![product];
    assert!(matches!(
        Graph::from_bytes(&graph.to_bytes().unwrap()),
        Err(GraphError::Cycle)
    ));

    let (mut graph, x, _) = linear_graph();
    let product = graph.nodes[x.0].outputs[0];
    graph.nodes[product.0].inputs = vec![x];
    assert!(matches!(
        Graph::from_bytes(&graph.to_bytes().unwrap()),
        Err(GraphError::Arity { .. })
    ));

    let (mut graph, x, _) = linear_graph();
    let product = graph.nodes[x.0].outputs[0];
    graph.nodes[product.0].inputs[1] = NodeId(99);
    assert!(matches!(
        Graph::from_bytes(&graph.to_bytes().unwrap()),
        Err(GraphError::UnknownNode(NodeId(99)))
    ));

    // Gradient collection on a node without parameters
    let (mut graph, x, _) = linear_graph();
    let product = graph.nodes[x.0].outputs[0];
    graph.nodes[product.0].flags.do_gradient = true;
    assert!(matches!(
        Graph::from_bytes(&graph.to_bytes().unwrap()),
        Err(GraphError::Unsupported { .. })
    ));
}

#[test]
fn test_node_accessors() {
    let (graph, x, w) = linear_graph();
    let product = graph.node(x).unwrap().outputs()[0];
    let node = graph.node(product).unwrap();
    assert_eq!(node.name(), "MatMul");
    assert_eq!(node.inputs(), &[x, w]);
    assert!(graph.node(w).unwrap().flags().do_gradient);
    assert!(graph.node(x).unwrap().flags().feeder_operation);
    assert_eq!(graph.feeder(), Some(x));
    assert!(matches!(
        graph.node(w).unwrap().operation(),
        crate::ops::Operation::Variable(Variable { .. })
    ));
}
