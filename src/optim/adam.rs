use crate::error::{GraphError, Result};
use crate::optim::Optimizer;
use ndarray::{Array1, Zip};

/// Adam with bias-corrected first and second moment estimates.
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    first_moment: Option<Array1<f64>>,
    second_moment: Option<Array1<f64>>,
    step_count: i32,
}

impl Adam {
    pub fn new(learning_rate: f64, beta1: f64, beta2: f64, epsilon: f64) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            first_moment: None,
            second_moment: None,
            step_count: 0,
        }
    }

    pub fn with_defaults(learning_rate: f64) -> Self {
        Self::new(learning_rate, 0.9, 0.999, 1e-8)
    }

    pub fn step_count(&self) -> i32 {
        self.step_count
    }
}

impl Optimizer for Adam {
    fn name(&self) -> &'static str {
        "Adam"
    }

    fn step(&mut self, parameters: &mut Array1<f64>, gradient: &Array1<f64>) -> Result<()> {
        if parameters.len() != gradient.len() {
            return Err(GraphError::ParameterSizeMismatch {
                expected: parameters.len(),
                actual: gradient.len(),
            });
        }

        let n = parameters.len();
        let m = self.first_moment.get_or_insert_with(|| Array1::zeros(n));
        let v = self.second_moment.get_or_insert_with(|| Array1::zeros(n));
        if m.len() != n || v.len() != n {
            return Err(GraphError::ParameterSizeMismatch {
                expected: m.len(),
                actual: n,
            });
        }

        self.step_count += 1;
        let (beta1, beta2) = (self.beta1, self.beta2);
        // Bias corrections for the zero-initialized moments
        let correction1 = 1.0 - beta1.powi(self.step_count);
        let correction2 = 1.0 - beta2.powi(self.step_count);
        let (learning_rate, epsilon) = (self.learning_rate, self.epsilon);

        Zip::from(parameters)
            .and(m)
            .and(v)
            .and(gradient)
            .for_each(|p, m, v, &g| {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                let m_hat = *m / correction1;
                let v_hat = *v / correction2;
                *p -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
            });
        Ok(())
    }

    fn reset_state(&mut self) {
        self.first_moment = None;
        self.second_moment = None;
        self.step_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        // With bias correction the first update is lr * sign(g)
        let mut adam = Adam::with_defaults(0.1);
        let mut params = arr1(&[1.0, -1.0, 0.0]);
        adam.step(&mut params, &arr1(&[0.5, -2.0, 0.0])).unwrap();

        assert_abs_diff_eq!(params[0], 0.9, epsilon = 1e-6);
        assert_abs_diff_eq!(params[1], -0.9, epsilon = 1e-6);
        assert_abs_diff_eq!(params[2], 0.0, epsilon = 1e-12);
        assert_eq!(adam.step_count(), 1);
    }

    #[test]
    fn test_minimizes_quadratic() {
        let mut adam = Adam::with_defaults(0.05);
        let mut params = arr1(&[3.0, -2.0]);
        for _ in 0..2000 {
            let gradient = params.mapv(|p| 2.0 * p);
            adam.step(&mut params, &gradient).unwrap();
        }
        assert!(params.iter().all(|p| p.abs() < 5e-2));
    }

    #[test]
    fn test_reset_state_and_size_checks() {
        let mut adam = Adam::with_defaults(0.1);
        let mut params = arr1(&[1.0, 2.0]);
        assert!(adam.step(&mut params, &arr1(&[1.0])).is_err());

        adam.step(&mut params, &arr1(&[1.0, 1.0])).unwrap();
        let mut other = arr1(&[1.0, 2.0, 3.0]);
        assert!(adam.step(&mut other, &arr1(&[1.0, 1.0, 1.0])).is_err());

        adam.reset_state();
        assert_eq!(adam.step_count(), 0);
        adam.step(&mut other, &arr1(&[1.0, 1.0, 1.0])).unwrap();
    }
}
