// In-memory labeled datasets. Loading from files is left to the caller; the graph
// only ever sees `(data, labels)` batches cut from these splits.
use crate::error::{GraphError, Result};
use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};

/// Examples and their labels, aligned along the leading axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSplit {
    /// Input examples - shape: [num_examples, *feature_dims]
    data: ArrayD<f64>,
    /// Targets - shape: [num_examples, *label_dims]
    labels: ArrayD<f64>,
}

impl LabeledSplit {
    pub fn new(data: ArrayD<f64>, labels: ArrayD<f64>) -> Result<Self> {
        if data.ndim() == 0 || labels.ndim() == 0 {
            return Err(GraphError::Dataset(
                "Data and labels need a leading examples axis".to_string(),
            ));
        }
        if data.shape()[0] != labels.shape()[0] {
            return Err(GraphError::Dataset(format!(
                "Data has {} examples but labels have {}",
                data.shape()[0],
                labels.shape()[0]
            )));
        }
        Ok(Self { data, labels })
    }

    /// Number of examples.
    pub fn len(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn labels(&self) -> &ArrayD<f64> {
        &self.labels
    }

    /// Copies the examples at `indices`, in that order.
    pub fn batch(&self, indices: &[usize]) -> Result<(ArrayD<f64>, ArrayD<f64>)> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.len()) {
            return Err(GraphError::Dataset(format!(
                "Example {} out of range for a split of {} examples",
                bad,
                self.len()
            )));
        }
        Ok((
            self.data.select(Axis(0), indices),
            self.labels.select(Axis(0), indices),
        ))
    }
}

/// The usual train / validation / test partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSplits {
    pub train: LabeledSplit,
    pub validation: Option<LabeledSplit>,
    pub test: Option<LabeledSplit>,
}

impl DataSplits {
    pub fn new(train: LabeledSplit) -> Self {
        Self {
            train,
            validation: None,
            test: None,
        }
    }

    pub fn with_validation(mut self, validation: LabeledSplit) -> Self {
        self.validation = Some(validation);
        self
    }

    pub fn with_test(mut self, test: LabeledSplit) -> Self {
        self.test = Some(test);
        self
    }
}
