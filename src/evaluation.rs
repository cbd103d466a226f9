use crate::error::{GraphError, Result};
use crate::graph::{Graph, NodeId};
use ndarray::{ArrayD, Axis};

fn argmax<'a>(row: impl IntoIterator<Item = &'a f64>) -> usize {
    row.into_iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, max), (i, &v)| {
            if v > max { (i, v) } else { (best, max) }
        })
        .0
}

/// Fraction of rows whose largest prediction sits at the same column as the
/// largest label.
pub fn accuracy(predictions: &ArrayD<f64>, labels: &ArrayD<f64>) -> Result<f64> {
    if predictions.shape() != labels.shape() || predictions.ndim() != 2 {
        return Err(GraphError::shape(format!(
            "Accuracy needs matching (examples, classes) arrays, got {:?} and {:?}",
            predictions.shape(),
            labels.shape()
        )));
    }
    let examples = predictions.shape()[0];
    if examples == 0 {
        return Ok(0.0);
    }

    let correct = predictions
        .axis_iter(Axis(0))
        .zip(labels.axis_iter(Axis(0)))
        .filter(|(p, y)| argmax(p) == argmax(y))
        .count();
    Ok(correct as f64 / examples as f64)
}

/// Classification accuracy of `graph` on a labeled set.
///
/// Runs one forward pass in evaluation mode and reads the predictions from the
/// input of the final (cost) operation. The training flag is restored afterwards
/// and parameters are left untouched.
pub fn calculate_accuracy(graph: &mut Graph, data: ArrayD<f64>, labels: ArrayD<f64>) -> Result<f64> {
    let final_op = graph.final_operation().ok_or(GraphError::MissingFinal)?;
    let prediction_node = *graph
        .node(final_op)?
        .inputs()
        .first()
        .ok_or(GraphError::Arity {
            op: "calculate_accuracy",
            expected: 1,
            actual: 0,
        })?;

    let was_training = graph.is_training();
    graph.set_training(false);
    let result = predict(graph, data, labels.clone(), prediction_node);
    graph.set_training(was_training);

    let predictions = result?;
    let value = accuracy(&predictions, &labels)?;
    tracing::debug!(examples = labels.shape()[0], accuracy = value, "evaluated accuracy");
    Ok(value)
}

fn predict(
    graph: &mut Graph,
    data: ArrayD<f64>,
    labels: ArrayD<f64>,
    prediction_node: NodeId,
) -> Result<ArrayD<f64>> {
    graph.assign_data(data)?;
    graph.reset_all();
    graph.assign_labels(labels)?;
    graph.feed_forward()?;
    graph
        .result(prediction_node)
        .cloned()
        .ok_or(GraphError::NotEvaluated(prediction_node))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_accuracy_counts_matching_rows() {
        let predictions = arr2(&[[0.9, 0.1], [0.2, 0.8], [0.6, 0.4], [0.3, 0.7]]).into_dyn();
        let labels = arr2(&[[1.0, 0.0], [0.0, 1.0], [0.0, 1.0], [0.0, 1.0]]).into_dyn();
        assert_eq!(accuracy(&predictions, &labels).unwrap(), 0.75);
    }

    #[test]
    fn test_accuracy_shape_mismatch() {
        let predictions = arr2(&[[0.9, 0.1]]).into_dyn();
        let labels = arr2(&[[1.0, 0.0, 0.0]]).into_dyn();
        assert!(accuracy(&predictions, &labels).is_err());
    }
}
