use crate::error::{GraphError, Result};
use crate::optim::Optimizer;
use ndarray::{Array1, Zip};

/// Stochastic gradient descent with classical momentum.
#[derive(Debug, Clone)]
pub struct Sgd {
    learning_rate: f64,
    momentum: f64,
    velocity: Option<Array1<f64>>,
}

impl Sgd {
    pub fn new(learning_rate: f64, momentum: f64) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: None,
        }
    }

    pub fn with_defaults(learning_rate: f64) -> Self {
        Self::new(learning_rate, 0.0)
    }
}

impl Optimizer for Sgd {
    fn name(&self) -> &'static str {
        "Sgd"
    }

    fn step(&mut self, parameters: &mut Array1<f64>, gradient: &Array1<f64>) -> Result<()> {
        let n = parameters.len();
        let velocity = self.velocity.get_or_insert_with(|| Array1::zeros(n));
        if gradient.len() != n || velocity.len() != n {
            return Err(GraphError::ParameterSizeMismatch {
                expected: velocity.len(),
                actual: gradient.len(),
            });
        }

        let (learning_rate, momentum) = (self.learning_rate, self.momentum);
        Zip::from(parameters)
            .and(velocity)
            .and(gradient)
            .for_each(|p, v, &g| {
                *v = momentum * *v - learning_rate * g;
                *p += *v;
            });
        Ok(())
    }

    fn reset_state(&mut self) {
        self.velocity = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    #[test]
    fn test_plain_step() {
        let mut sgd = Sgd::with_defaults(0.5);
        let mut params = arr1(&[1.0, 2.0]);
        sgd.step(&mut params, &arr1(&[1.0, -2.0])).unwrap();
        assert_abs_diff_eq!(params[0], 0.5);
        assert_abs_diff_eq!(params[1], 3.0);
    }

    #[test]
    fn test_momentum_accumulates() {
        let mut sgd = Sgd::new(0.1, 0.9);
        let mut params = arr1(&[0.0]);
        sgd.step(&mut params, &arr1(&[1.0])).unwrap();
        sgd.step(&mut params, &arr1(&[1.0])).unwrap();
        // v1 = -0.1, v2 = 0.9 * -0.1 - 0.1
        assert_abs_diff_eq!(params[0], -0.1 - 0.19, epsilon = 1e-12);

        sgd.reset_state();
        sgd.step(&mut params, &arr1(&[0.0])).unwrap();
        assert_abs_diff_eq!(params[0], -0.29, epsilon = 1e-12);
    }
}
