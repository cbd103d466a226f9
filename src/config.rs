use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerKind {
    Adam,
    Sgd,
}

/// Training configuration for the mini-batch optimizers.
///
/// Missing JSON fields take the values of [`TrainingConfig::default_stable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    // Common training parameters
    pub epochs: usize,
    pub mini_batch_size: usize,
    pub learning_rate: f64,
    pub optimizer: OptimizerKind,

    // Adam parameters
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,

    // SGD parameters
    pub momentum: f64,

    /// Log progress (and the validation cost, if any) every this many updates.
    pub test_frequency: Option<usize>,
    /// Seed for mini-batch shuffling.
    pub seed: Option<u64>,
    /// Write the parameters to this file when training ends.
    pub dump_parameters: Option<PathBuf>,
}

impl TrainingConfig {
    /// Default configuration for stable training
    pub fn default_stable() -> Self {
        Self {
            epochs: 100,
            mini_batch_size: 20,
            learning_rate: 1e-3,
            optimizer: OptimizerKind::Adam,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            momentum: 0.9,
            test_frequency: Some(100),
            seed: None,
            dump_parameters: None,
        }
    }

    /// Fast training configuration for quick testing
    pub fn fast() -> Self {
        Self {
            epochs: 20,
            mini_batch_size: 50,
            learning_rate: 1e-2,
            test_frequency: Some(10),
            ..Self::default_stable()
        }
    }

    /// SGD-specific configuration
    pub fn sgd(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            optimizer: OptimizerKind::Sgd,
            ..Self::default_stable()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| GraphError::Config(format!("Invalid training config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| GraphError::Serialization(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(GraphError::Config("epochs must be positive".to_string()));
        }
        if self.mini_batch_size == 0 {
            return Err(GraphError::Config(
                "mini_batch_size must be positive".to_string(),
            ));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(GraphError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        for (name, value) in [
            ("beta1", self.beta1),
            ("beta2", self.beta2),
            ("momentum", self.momentum),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(GraphError::Config(format!(
                    "{} must be in [0, 1), got {}",
                    name, value
                )));
            }
        }
        if self.epsilon <= 0.0 {
            return Err(GraphError::Config(format!(
                "epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        if self.test_frequency == Some(0) {
            return Err(GraphError::Config(
                "test_frequency must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self::default_stable()
    }
}
