//! Broadcasting and reduction arithmetic shared by every operation.
//!
//! Forward operations broadcast mismatched inputs following NumPy rules; the
//! backward pass must undo that by summing the gradient over the broadcast axes
//! so that each input receives a gradient of exactly its own shape.

use crate::error::{GraphError, Result};
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};

/// Computes the NumPy-style broadcast of two shapes.
///
/// Dimensions are aligned from the right; each pair must be equal or contain a 1.
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let ndim = a.len().max(b.len());
    let mut shape = vec![0; ndim];

    for i in 0..ndim {
        // Missing leading dimensions behave like 1
        let da = if i < ndim - a.len() { 1 } else { a[i - (ndim - a.len())] };
        let db = if i < ndim - b.len() { 1 } else { b[i - (ndim - b.len())] };

        shape[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return Err(GraphError::shape(format!(
                    "Cannot broadcast shapes {:?} and {:?}",
                    a, b
                )));
            }
        };
    }

    Ok(shape)
}

/// Sums a broadcast gradient back down to `target`.
///
/// Leading axes that do not exist in `target` are summed away entirely. Axes where
/// `target` has size 1 but the gradient does not are summed while keeping the
/// dimension.
pub fn reduce_shape(gradient: ArrayD<f64>, target: &[usize]) -> Result<ArrayD<f64>> {
    if gradient.shape() == target {
        return Ok(gradient);
    }

    if gradient.ndim() < target.len() {
        return Err(GraphError::shape(format!(
            "Cannot reduce gradient of shape {:?} to the larger rank shape {:?}",
            gradient.shape(),
            target
        )));
    }

    let mut grad = gradient;
    while grad.ndim() > target.len() {
        grad = grad.sum_axis(Axis(0));
    }

    for (axis, &dim) in target.iter().enumerate() {
        if dim == 1 && grad.shape()[axis] != 1 {
            grad = grad.sum_axis(Axis(axis)).insert_axis(Axis(axis));
        }
    }

    if grad.shape() != target {
        return Err(GraphError::shape(format!(
            "Gradient of shape {:?} is not a broadcast of {:?}",
            grad.shape(),
            target
        )));
    }

    Ok(grad)
}

/// Broadcasts two arrays against each other and returns views of the common shape.
pub fn broadcast_pair<'a>(
    a: &'a ArrayD<f64>,
    b: &'a ArrayD<f64>,
) -> Result<(ArrayViewD<'a, f64>, ArrayViewD<'a, f64>)> {
    let shape = broadcast_shape(a.shape(), b.shape())?;
    Ok((broadcast_to(a, &shape)?, broadcast_to(b, &shape)?))
}

/// Broadcasts one array to an explicit target shape.
pub fn broadcast_to<'a>(array: &'a ArrayD<f64>, shape: &[usize]) -> Result<ArrayViewD<'a, f64>> {
    array.broadcast(IxDyn(shape)).ok_or_else(|| {
        GraphError::shape(format!("Cannot broadcast {:?} to {:?}", array.shape(), shape))
    })
}

/// Reshapes an array in row-major order, copying only when the layout requires it.
pub fn reshape(array: &ArrayD<f64>, shape: &[usize]) -> Result<ArrayD<f64>> {
    array
        .to_shape(shape)
        .map(|view| view.into_owned())
        .map_err(|e| {
            GraphError::shape(format!(
                "Cannot reshape {:?} into {:?}: {}",
                array.shape(),
                shape,
                e
            ))
        })
}

/// Number of elements described by a shape.
pub fn size(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Leading "examples" dimension of a batch. Rank 0 and rank 1 arrays count as a
/// single example.
pub fn num_examples(shape: &[usize]) -> usize {
    if shape.len() >= 2 { shape[0] } else { 1 }
}
