// Operations that only move data around: reshaping, slicing and transposition.
// Their gradients are pure re-indexing of the incoming gradient.
use crate::error::{GraphError, Result};
use crate::ops::{Operator, check_inputs, check_position};
use crate::shape::{reshape, size};
use ndarray::{ArrayD, IxDyn, SliceInfo, SliceInfoElem};
use serde::{Deserialize, Serialize};

/// Flattens every axis after the first: `(n, d1, d2, ...)` becomes `(n, d1 * d2 * ...)`.
/// A rank-1 input is treated as a single example.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlattenFeatures;

impl Operator for FlattenFeatures {
    fn name(&self) -> &'static str {
        "FlattenFeatures"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn set_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>> {
        check_inputs(self.name(), 1, inputs.len())?;
        let shape = inputs[0];
        match shape.len() {
            0 => Err(GraphError::shape("FlattenFeatures cannot flatten a scalar")),
            1 => Ok(vec![1, shape[0]]),
            _ => Ok(vec![shape[0], size(&shape[1..])]),
        }
    }

    fn perform(&mut self, inputs: &[&ArrayD<f64>]) -> Result<ArrayD<f64>> {
        let shape = self.set_shape(&[inputs[0].shape()])?;
        reshape(inputs[0], &shape)
    }

    fn perform_gradient(
        &self,
        input: usize,
        grad: &ArrayD<f64>,
        inputs: &[&ArrayD<f64>],
        _output: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>> {
        check_position(self.name(), input, 1)?;
        reshape(grad, inputs[0].shape())
    }
}

/// Inverse of [`FlattenFeatures`]: turns `(n, features)` into `(n, example_shape...)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReshapeFeatures {
    example_shape: Vec<usize>,
}

impl ReshapeFeatures {
    pub fn new(example_shape: Vec<usize>) -> Self {
        Self { example_shape }
    }

    pub fn example_shape(&self) -> &[usize] {
        &self.example_shape
    }
}

impl Operator for ReshapeFeatures {
    fn name(&self) -> &'static str {
        "ReshapeFeatures"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn set_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>> {
        check_inputs(self.name(), 1, inputs.len())?;
        let shape = inputs[0];
        let (examples, features) = match shape.len() {
            0 => return Err(GraphError::shape("ReshapeFeatures cannot reshape a scalar")),
            1 => (1, shape[0]),
            _ => (shape[0], size(&shape[1..])),
        };

        if self.example_shape.is_empty() || size(&self.example_shape) != features {
            return Err(GraphError::shape(format!(
                "Cannot reshape {} features per example into {:?}",
                features, self.example_shape
            )));
        }

        let mut output = Vec::with_capacity(self.example_shape.len() + 1);
        output.push(examples);
        output.extend_from_slice(&self.example_shape);
        Ok(output)
    }

    fn perform(&mut self, inputs: &[&ArrayD<f64>]) -> Result<ArrayD<f64>> {
        let shape = self.set_shape(&[inputs[0].shape()])?;
        reshape(inputs[0], &shape)
    }

    fn perform_gradient(
        &self,
        input: usize,
        grad: &ArrayD<f64>,
        inputs: &[&ArrayD<f64>],
        _output: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>> {
        check_position(self.name(), input, 1)?;
        reshape(grad, inputs[0].shape())
    }
}

/// One entry of a slicing index expression, in the spirit of NumPy's `index_exp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SliceItem {
    /// Selects a single position and removes the axis. Negative values count from the end.
    Index(isize),
    /// `start..end` with a positive step. Bounds are clamped to the axis length.
    Range {
        start: Option<isize>,
        end: Option<isize>,
        step: isize,
    },
    /// Keeps the whole axis (`:`).
    Full,
}

impl SliceItem {
    pub fn range(start: isize, end: isize) -> Self {
        SliceItem::Range {
            start: Some(start),
            end: Some(end),
            step: 1,
        }
    }
}

/// Selects a fixed region of its input.
///
/// Missing trailing items select whole axes. The backward pass scatters the
/// incoming gradient into zeros of the input shape at the selected positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slice {
    index: Vec<SliceItem>,
}

impl Slice {
    pub fn new(index: Vec<SliceItem>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &[SliceItem] {
        &self.index
    }

    // Validates the expression against `shape` and returns the ndarray slice
    // description together with the resulting shape.
    fn resolve(&self, shape: &[usize]) -> Result<(Vec<SliceInfoElem>, Vec<usize>)> {
        if self.index.len() > shape.len() {
            return Err(GraphError::shape(format!(
                "Index expression has {} items but input has rank {}",
                self.index.len(),
                shape.len()
            )));
        }

        let mut elems = Vec::with_capacity(shape.len());
        let mut output = Vec::with_capacity(shape.len());

        for (axis, &len) in shape.iter().enumerate() {
            let item = self.index.get(axis).copied().unwrap_or(SliceItem::Full);
            let len_i = len as isize;
            match item {
                SliceItem::Index(i) => {
                    let position = if i < 0 { i + len_i } else { i };
                    if position < 0 || position >= len_i {
                        return Err(GraphError::shape(format!(
                            "Index {} out of range for axis {} of length {}",
                            i, axis, len
                        )));
                    }
                    elems.push(SliceInfoElem::Index(position));
                }
                SliceItem::Full => {
                    elems.push(SliceInfoElem::Slice {
                        start: 0,
                        end: None,
                        step: 1,
                    });
                    output.push(len);
                }
                SliceItem::Range { start, end, step } => {
                    if step <= 0 {
                        return Err(GraphError::shape(format!(
                            "Slice step must be positive, got {} on axis {}",
                            step, axis
                        )));
                    }
                    let clamp = |v: isize| if v < 0 { (v + len_i).max(0) } else { v.min(len_i) };
                    let start = clamp(start.unwrap_or(0));
                    let end = clamp(end.unwrap_or(len_i));
                    let count = if end > start {
                        ((end - start - 1) / step + 1) as usize
                    } else {
                        0
                    };
                    if count == 0 {
                        return Err(GraphError::shape(format!(
                            "Slice selects nothing on axis {} of length {}",
                            axis, len
                        )));
                    }
                    elems.push(SliceInfoElem::Slice {
                        start,
                        end: Some(end),
                        step,
                    });
                    output.push(count);
                }
            }
        }

        Ok((elems, output))
    }

    fn slice_info(
        &self,
        shape: &[usize],
    ) -> Result<SliceInfo<Vec<SliceInfoElem>, IxDyn, IxDyn>> {
        let (elems, _) = self.resolve(shape)?;
        SliceInfo::try_from(elems).map_err(|e| GraphError::shape(format!("Invalid slice: {}", e)))
    }
}

impl Operator for Slice {
    fn name(&self) -> &'static str {
        "Slice"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn set_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>> {
        check_inputs(self.name(), 1, inputs.len())?;
        let (_, shape) = self.resolve(inputs[0])?;
        Ok(shape)
    }

    fn perform(&mut self, inputs: &[&ArrayD<f64>]) -> Result<ArrayD<f64>> {
        let info = self.slice_info(inputs[0].shape())?;
        Ok(inputs[0].slice(&info).to_owned())
    }

    fn perform_gradient(
        &self,
        input: usize,
        grad: &ArrayD<f64>,
        inputs: &[&ArrayD<f64>],
        _output: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>> {
        check_position(self.name(), input, 1)?;
        let info = self.slice_info(inputs[0].shape())?;
        let mut scattered = ArrayD::<f64>::zeros(inputs[0].raw_dim());
        let mut region = scattered.slice_mut(&info);
        if region.shape() != grad.shape() {
            return Err(GraphError::shape(format!(
                "Slice gradient of shape {:?} does not match selected region {:?}",
                grad.shape(),
                region.shape()
            )));
        }
        region.assign(grad);
        Ok(scattered)
    }
}

/// Matrix transpose of a rank-2 input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transpose;

impl Operator for Transpose {
    fn name(&self) -> &'static str {
        "Transpose"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn set_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>> {
        check_inputs(self.name(), 1, inputs.len())?;
        match inputs[0] {
            [rows, cols] => Ok(vec![*cols, *rows]),
            other => Err(GraphError::shape(format!(
                "Transpose requires a rank-2 input, got {:?}",
                other
            ))),
        }
    }

    fn perform(&mut self, inputs: &[&ArrayD<f64>]) -> Result<ArrayD<f64>> {
        self.set_shape(&[inputs[0].shape()])?;
        Ok(inputs[0].t().to_owned())
    }

    fn perform_gradient(
        &self,
        input: usize,
        grad: &ArrayD<f64>,
        _inputs: &[&ArrayD<f64>],
        _output: &ArrayD<f64>,
    ) -> Result<ArrayD<f64>> {
        check_position(self.name(), input, 1)?;
        Ok(grad.t().to_owned())
    }
}
