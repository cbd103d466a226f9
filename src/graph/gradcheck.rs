// Finite-difference gradient checking.
// Dropout draws a new mask on every forward pass, so graphs containing it must be
// switched to evaluation mode (`Graph::set_training(false)`) before checking.
use crate::error::Result;
use crate::graph::Graph;
use ndarray::Array1;

/// Central-difference estimate of dCost/dParameters for the data and labels
/// currently bound to the graph. Parameters are restored afterwards.
pub fn numerical_gradient(graph: &mut Graph, epsilon: f64) -> Result<Array1<f64>> {
    let original = graph.unroll_gradient_parameters();
    let mut perturbed = original.clone();
    let mut gradient = Array1::<f64>::zeros(original.len());

    for i in 0..original.len() {
        perturbed[i] = original[i] + epsilon;
        let plus = cost_at(graph, &perturbed)?;
        perturbed[i] = original[i] - epsilon;
        let minus = cost_at(graph, &perturbed)?;
        perturbed[i] = original[i];

        gradient[i] = (plus - minus) / (2.0 * epsilon);
    }

    graph.attach_parameters(original.view())?;
    graph.reset_all();
    Ok(gradient)
}

fn cost_at(graph: &mut Graph, parameters: &Array1<f64>) -> Result<f64> {
    graph.attach_parameters(parameters.view())?;
    graph.reset_all();
    graph.feed_forward()
}

/// Gradient from one forward and backward pass over the current parameters.
pub fn analytic_gradient(graph: &mut Graph) -> Result<Array1<f64>> {
    graph.reset_all();
    graph.feed_forward()?;
    graph.feed_backward()?;
    graph.unroll_gradients()
}

/// Largest relative difference between the analytic and numerical gradients.
///
/// Each component is compared as `|a - n| / max(1, |a| + |n|)`, so tiny
/// gradients are compared absolutely.
pub fn max_gradient_error(graph: &mut Graph, epsilon: f64) -> Result<f64> {
    let analytic = analytic_gradient(graph)?;
    let numerical = numerical_gradient(graph, epsilon)?;

    let error = analytic
        .iter()
        .zip(numerical.iter())
        .map(|(a, n)| (a - n).abs() / (a.abs() + n.abs()).max(1.0))
        .fold(0.0, f64::max);

    tracing::debug!(
        parameters = analytic.len(),
        error,
        "gradient check complete"
    );
    Ok(error)
}
