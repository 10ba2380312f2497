//! Memory-augmented GRU forecaster for time series with rare extreme events.
//!
//! This crate implements a sequence forecaster that keeps an episodic
//! memory of past extreme events next to a recurrent backbone:
//! - A GRU consumes the series one timestep at a time and produces a
//!   direct forecast.
//! - A separate window encoder summarizes randomly sampled historical
//!   windows into a fixed-size memory, each slot labeled by whether the
//!   event right after the window was extreme.
//! - Attention over the memory turns the current hidden state into an
//!   extreme event score that is blended into the forecast through a
//!   learned scalar weight.
//!
//! Training runs two non-interfering gradient phases per timestep: an
//! inner extreme-value-loss step that shapes the window encoder and
//! memory read-out, and an outer sequence-loss step over the recurrent
//! backbone, output projection, and blending weight.
//!
//! # Example
//!
//! ```no_run
//! use memcast_rs::{MemcastConfig, MemcastModel, MemcastTrainer, Series};
//! use candle_core::Device;
//!
//! let config = MemcastConfig::default();
//! let device = Device::Cpu;
//! let model = MemcastModel::new(&config, &device).unwrap();
//! let mut trainer = MemcastTrainer::new(model).unwrap();
//!
//! let features = vec![0.0f32; 200];
//! let targets = vec![0.0f32; 200];
//! let series = Series::from_slices(&features, &targets, 1, &device).unwrap();
//!
//! let report = trainer.train(&series, 25, None, None).unwrap();
//! println!("trained {} sequences", report.num_sequences());
//! ```

pub mod attention;
pub mod config;
pub mod error;
pub mod loss;
pub mod memory;
pub mod model;
pub mod series;
pub mod trainer;

pub use config::MemcastConfig;
pub use error::{MemcastError, MemcastResult};
pub use memory::Memory;
pub use model::MemcastModel;
pub use series::Series;
pub use trainer::{
    EventCounters, MemcastTrainer, SequenceLoss, SequenceSummary, TimestepOutput, TrainingReport,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::MemcastConfig;
    pub use crate::error::{MemcastError, MemcastResult};
    pub use crate::memory::Memory;
    pub use crate::model::MemcastModel;
    pub use crate::series::Series;
    pub use crate::trainer::{MemcastTrainer, SequenceLoss, TrainingReport};
}
