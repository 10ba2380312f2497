//! Model configuration for the Memcast forecaster.
//!
//! Centralizes the architecture and training hyperparameters so that a run
//! is fully described by one serializable value.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MemcastError, MemcastResult};

/// Configuration for the Memcast model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemcastConfig {
    /// Dimension of each input feature vector
    pub input_dim: usize,
    /// Hidden state dimension shared by the sequence cell and the window encoder
    pub hidden_size: usize,
    /// Length of each historical window sampled into memory
    pub window_size: usize,
    /// Number of (summary, label) slots in memory
    pub memory_size: usize,
    /// Target values strictly above this are extreme events
    pub threshold: f32,
    /// Polynomial index of the extreme value loss (gamma)
    pub extreme_value_index: f32,
    /// Weight of the extreme value term in the sequence loss
    pub extreme_loss_weight: f32,
    /// AdamW learning rate, shared by both optimizers
    pub learning_rate: f64,
    /// AdamW weight decay
    pub weight_decay: f64,
    /// Seed for the memory window sampler
    pub seed: u64,
}

impl Default for MemcastConfig {
    fn default() -> Self {
        Self {
            input_dim: 1,
            hidden_size: 32,
            window_size: 10,
            memory_size: 64,
            threshold: 1.0,
            extreme_value_index: 2.0,
            extreme_loss_weight: 1.0,
            learning_rate: 1e-3,
            weight_decay: 0.0,
            seed: 42,
        }
    }
}

impl MemcastConfig {
    /// Minimal configuration for unit tests
    pub fn test() -> Self {
        Self {
            input_dim: 1,
            hidden_size: 8,
            window_size: 3,
            memory_size: 4,
            threshold: 1.0,
            extreme_value_index: 2.0,
            extreme_loss_weight: 1.0,
            learning_rate: 1e-2,
            weight_decay: 0.0,
            seed: 42,
        }
    }

    /// Set the sampler seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the extreme event threshold
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the hidden state dimension
    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    /// Check that the configuration describes a usable model.
    pub fn validate(&self) -> MemcastResult<()> {
        if self.input_dim == 0 {
            return Err(MemcastError::invalid_config("input_dim must be > 0"));
        }
        if self.hidden_size == 0 {
            return Err(MemcastError::invalid_config("hidden_size must be > 0"));
        }
        if self.window_size == 0 {
            return Err(MemcastError::invalid_config("window_size must be > 0"));
        }
        if self.memory_size == 0 {
            return Err(MemcastError::invalid_config("memory_size must be > 0"));
        }
        if self.extreme_value_index <= 0.0 {
            return Err(MemcastError::invalid_config(
                "extreme_value_index must be > 0",
            ));
        }
        if self.extreme_loss_weight < 0.0 {
            return Err(MemcastError::invalid_config(
                "extreme_loss_weight must be >= 0",
            ));
        }
        if self.learning_rate <= 0.0 {
            return Err(MemcastError::invalid_config("learning_rate must be > 0"));
        }
        Ok(())
    }

    /// Write the configuration as JSON.
    pub fn save(&self, path: &Path) -> MemcastResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Read a configuration from a JSON file.
    pub fn load(path: &Path) -> MemcastResult<Self> {
        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}
