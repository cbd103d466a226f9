// Optimizers work on the flat parameter vector the graph unrolls and never see
// the graph itself. The mini-batch loop drives any function with the signature
// `(parameters, data, labels) -> (cost, gradient)`, usually a closure around
// `Graph::cost_and_gradient`.
use crate::config::{OptimizerKind, TrainingConfig};
use crate::dataset::LabeledSplit;
use crate::error::{GraphError, Result};
use crate::nn::initializers::seeded_rng;
use ndarray::{Array1, ArrayD, ArrayView1};
use rand::seq::SliceRandom;
use std::path::Path;

pub mod adam;
pub mod sgd;

pub use adam::Adam;
pub use sgd::Sgd;

/// Update rule applied to the flat parameter vector.
pub trait Optimizer {
    fn name(&self) -> &'static str;

    /// Moves `parameters` one step against `gradient`.
    fn step(&mut self, parameters: &mut Array1<f64>, gradient: &Array1<f64>) -> Result<()>;

    /// Forgets moment estimates so the optimizer can start a fresh run.
    fn reset_state(&mut self);
}

pub fn optimizer_from_config(config: &TrainingConfig) -> Box<dyn Optimizer> {
    match config.optimizer {
        OptimizerKind::Adam => Box::new(Adam::new(
            config.learning_rate,
            config.beta1,
            config.beta2,
            config.epsilon,
        )),
        OptimizerKind::Sgd => Box::new(Sgd::new(config.learning_rate, config.momentum)),
    }
}

/// Mini-batch training loop.
///
/// Every epoch shuffles the training examples, cuts them into mini-batches and
/// applies one optimizer update per batch. The loop stops with an error as soon
/// as a cost is not finite.
pub struct AdaptiveSgd<'a> {
    config: TrainingConfig,
    training: &'a LabeledSplit,
    validation: Option<&'a LabeledSplit>,
    optimizer: Box<dyn Optimizer>,
    cost_history: Vec<f64>,
    validation_history: Vec<(usize, f64)>,
}

impl<'a> AdaptiveSgd<'a> {
    pub fn new(config: TrainingConfig, training: &'a LabeledSplit) -> Result<Self> {
        config.validate()?;
        if training.is_empty() {
            return Err(GraphError::Dataset(
                "Training split has no examples".to_string(),
            ));
        }
        let optimizer = optimizer_from_config(&config);
        Ok(Self {
            config,
            training,
            validation: None,
            optimizer,
            cost_history: Vec::new(),
            validation_history: Vec::new(),
        })
    }

    /// Evaluates the cost of the whole validation split every `test_frequency` updates.
    pub fn with_validation(mut self, validation: &'a LabeledSplit) -> Self {
        self.validation = Some(validation);
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Mini-batch cost of every update so far.
    pub fn cost_history(&self) -> &[f64] {
        &self.cost_history
    }

    /// `(update, cost)` pairs of the validation checks.
    pub fn validation_history(&self) -> &[(usize, f64)] {
        &self.validation_history
    }

    /// Runs the configured number of epochs starting from `parameters` and
    /// returns the trained parameters.
    pub fn minimize<F>(&mut self, parameters: Array1<f64>, mut function: F) -> Result<Array1<f64>>
    where
        F: FnMut(ArrayView1<'_, f64>, ArrayD<f64>, ArrayD<f64>) -> Result<(f64, Array1<f64>)>,
    {
        let mut parameters = parameters;
        let mut rng = seeded_rng(self.config.seed);
        let mut indices: Vec<usize> = (0..self.training.len()).collect();
        let mut update = self.cost_history.len();

        tracing::info!(
            optimizer = self.optimizer.name(),
            parameters = parameters.len(),
            examples = indices.len(),
            epochs = self.config.epochs,
            mini_batch_size = self.config.mini_batch_size,
            "starting training"
        );

        for epoch in 0..self.config.epochs {
            indices.shuffle(&mut rng);

            for batch in indices.chunks(self.config.mini_batch_size) {
                let (data, labels) = self.training.batch(batch)?;
                let (cost, gradient) = function(parameters.view(), data, labels)?;
                if !cost.is_finite() {
                    return Err(GraphError::NonFiniteCost { update, cost });
                }

                let reporting = self
                    .config
                    .test_frequency
                    .is_some_and(|frequency| (update + 1) % frequency == 0);
                let previous = reporting.then(|| parameters.clone());

                self.optimizer.step(&mut parameters, &gradient)?;
                self.cost_history.push(cost);
                update += 1;

                if let Some(previous) = previous {
                    let rate = update_rate(&previous, &parameters);
                    self.report(epoch, update, cost, rate, &parameters, &mut function)?;
                }
            }
        }

        if let Some(path) = &self.config.dump_parameters {
            save_parameters(path, &parameters)?;
            tracing::info!(path = %path.display(), "saved parameters");
        }
        Ok(parameters)
    }

    fn report<F>(
        &mut self,
        epoch: usize,
        update: usize,
        cost: f64,
        update_rate: f64,
        parameters: &Array1<f64>,
        function: &mut F,
    ) -> Result<()>
    where
        F: FnMut(ArrayView1<'_, f64>, ArrayD<f64>, ArrayD<f64>) -> Result<(f64, Array1<f64>)>,
    {
        match self.validation {
            Some(validation) => {
                let (validation_cost, _) = function(
                    parameters.view(),
                    validation.data().clone(),
                    validation.labels().clone(),
                )?;
                self.validation_history.push((update, validation_cost));
                tracing::info!(
                    epoch,
                    update,
                    cost,
                    update_rate,
                    validation_cost,
                    "training progress"
                );
            }
            None => tracing::info!(epoch, update, cost, update_rate, "training progress"),
        }
        Ok(())
    }
}

/// Size of the last step relative to the parameters, `|after - before| / |before|`.
/// Zero parameters give the absolute step size.
pub fn update_rate(before: &Array1<f64>, after: &Array1<f64>) -> f64 {
    let step = (after - before).mapv(|d| d * d).sum().sqrt();
    let norm = before.dot(before).sqrt();
    if norm > 0.0 { step / norm } else { step }
}

/// Writes a flat parameter vector as a bincode blob.
pub fn save_parameters(path: impl AsRef<Path>, parameters: &Array1<f64>) -> Result<()> {
    let bytes = bincode::serde::encode_to_vec(parameters, bincode::config::standard())
        .map_err(|e| GraphError::Serialization(e.to_string()))?;
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn load_parameters(path: impl AsRef<Path>) -> Result<Array1<f64>> {
    let bytes = std::fs::read(path)?;
    let (parameters, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
        .map_err(|e| GraphError::Serialization(e.to_string()))?;
    Ok(parameters)
}
