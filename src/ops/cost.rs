// Cost operations terminate the graph. They own the labels of the current batch,
// reduce their input to a rank-0 cost averaged over the examples, and start the
// backward pass.
use crate::error::{GraphError, Result};
use crate::ops::activation::log_softmax;
use crate::ops::{Operator, check_inputs, check_position};
use crate::shape::num_examples;
use ndarray::{ArrayD, Zip, arr0};
use serde::{Deserialize, Serialize};

fn scalar_output(op: &'static str, inputs: &[&[usize]]) -> Result<Vec<usize>> {
    check_inputs(op, 1, inputs.len())?;
    Ok(Vec::new())
}

fn checked_labels<'a>(
    op: &'static str,
    labels: &'a Option<ArrayD<f64>>,
    input: &ArrayD<f64>,
) -> Result<&'a ArrayD<f64>> {
    let labels = labels.as_ref().ok_or(GraphError::MissingLabels(op))?;
    if labels.shape() != input.shape() {
        return Err(GraphError::shape(format!(
            "{} labels of shape {:?} do not match predictions of shape {:?}",
            op,
            labels.shape(),
            input.shape()
        )));
    }
    Ok(labels)
}

/// Half mean squared error: `sum((x - y)^2) / (2n)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuadraticCost {
    labels: Option<ArrayD<f64>>,
}

impl QuadraticCost {
    pub fn new(labels: Option<ArrayD<f64>>) -> Self {
        Self { labels }
    }
}

impl Operator for QuadraticCost {
    fn name(&self) -> &'static str {
        "QuadraticCost"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn set_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>> {
        scalar_output(self.name(), inputs)
    }

    fn perform(&mut self, inputs: &[&ArrayD<f64>]) -> Result<ArrayD<f64>> {
        let x = inputs[0];
        let y = checked_labels(self.name(), &self.labels, x)?;
        let n = num_examples(x.shape()) as f64;
        let cost = Zip::from(x)
            .and(y)
            .fold(0.0, |acc, &x, &y| acc + (x - y) * (x - y));
        Ok(arr0(cost / (2.0 * n)).into_dyn())
    }

    fn perform_gradient(
        &self,
        input: usize,
        grad: &ArrayD<f64>,
        inputs: &[&ArrayD<f64>],
        _output: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>> {
        check_position(self.name(), input, 1)?;
        let x = inputs[0];
        let y = checked_labels(self.name(), &self.labels, x)?;
        let scale = grad.sum() / num_examples(x.shape()) as f64;
        Ok(Zip::from(x).and(y).map_collect(|&x, &y| (x - y) * scale))
    }

    fn assign_labels(&mut self, labels: ArrayD<f64>) -> Result<()> {
        self.labels = Some(labels);
        Ok(())
    }
}

/// Cross entropy on probabilities: `-sum(y * ln(x)) / n`.
///
/// Use after a [`Softmax`](crate::ops::Softmax) or [`Sigmoid`](crate::ops::Sigmoid) layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossEntropyCost {
    labels: Option<ArrayD<f64>>,
}

impl CrossEntropyCost {
    pub fn new(labels: Option<ArrayD<f64>>) -> Self {
        Self { labels }
    }
}

impl Operator for CrossEntropyCost {
    fn name(&self) -> &'static str {
        "CrossEntropyCost"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn set_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>> {
        scalar_output(self.name(), inputs)
    }

    fn perform(&mut self, inputs: &[&ArrayD<f64>]) -> Result<ArrayD<f64>> {
        let x = inputs[0];
        let y = checked_labels(self.name(), &self.labels, x)?;
        let n = num_examples(x.shape()) as f64;
        let cost = Zip::from(x)
            .and(y)
            .fold(0.0, |acc, &x, &y| if y == 0.0 { acc } else { acc - y * x.ln() });
        Ok(arr0(cost / n).into_dyn())
    }

    fn perform_gradient(
        &self,
        input: usize,
        grad: &ArrayD<f64>,
        inputs: &[&ArrayD<f64>],
        _output: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>> {
        check_position(self.name(), input, 1)?;
        let x = inputs[0];
        let y = checked_labels(self.name(), &self.labels, x)?;
        let scale = grad.sum() / num_examples(x.shape()) as f64;
        Ok(Zip::from(x)
            .and(y)
            .map_collect(|&x, &y| if y == 0.0 { 0.0 } else { -y / x * scale }))
    }

    fn assign_labels(&mut self, labels: ArrayD<f64>) -> Result<()> {
        self.labels = Some(labels);
        Ok(())
    }
}

/// Softmax followed by cross entropy, computed from logits.
///
/// Fusing the two keeps the cost stable for large logits and gives the compact
/// gradient `(softmax(x) - y) / n`. The input must be raw logits: the graph
/// refuses to attach this cost to a [`Softmax`](crate::ops::Softmax) node. Use
/// [`CrossEntropyCost`] on probabilities instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SoftmaxCrossEntropyCost {
    labels: Option<ArrayD<f64>>,
}

impl SoftmaxCrossEntropyCost {
    pub fn new(labels: Option<ArrayD<f64>>) -> Self {
        Self { labels }
    }
}

impl Operator for SoftmaxCrossEntropyCost {
    fn name(&self) -> &'static str {
        "SoftmaxCrossEntropyCost"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn set_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>> {
        check_inputs(self.name(), 1, inputs.len())?;
        if inputs[0].is_empty() {
            return Err(GraphError::shape(
                "SoftmaxCrossEntropyCost requires at least one axis",
            ));
        }
        Ok(Vec::new())
    }

    fn perform(&mut self, inputs: &[&ArrayD<f64>]) -> Result<ArrayD<f64>> {
        let x = inputs[0];
        let y = checked_labels(self.name(), &self.labels, x)?;
        let n = num_examples(x.shape()) as f64;
        let log_p = log_softmax(x)?;
        let cost = Zip::from(&log_p)
            .and(y)
            .fold(0.0, |acc, &lp, &y| acc - y * lp);
        Ok(arr0(cost / n).into_dyn())
    }

    fn perform_gradient(
        &self,
        input: usize,
        grad: &ArrayD<f64>,
        inputs: &[&ArrayD<f64>],
        _output: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>> {
        check_position(self.name(), input, 1)?;
        let x = inputs[0];
        let y = checked_labels(self.name(), &self.labels, x)?;
        let scale = grad.sum() / num_examples(x.shape()) as f64;
        let log_p = log_softmax(x)?;
        Ok(Zip::from(&log_p)
            .and(y)
            .map_collect(|&lp, &y| (lp.exp() - y) * scale))
    }

    fn assign_labels(&mut self, labels: ArrayD<f64>) -> Result<()> {
        self.labels = Some(labels);
        Ok(())
    }
}
