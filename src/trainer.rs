//! Training control flow for the Memcast model.
//!
//! Each timestep interleaves two fully separate gradient phases:
//!
//! 1. An inner, memory-local phase: rebuild the episodic memory at the
//!    current time, score the memory read-out against the slot labels with
//!    the extreme value loss, and step the memory parameter group. Nothing
//!    from this phase stays reachable afterwards - the memory keys are
//!    detached before the phase ends.
//! 2. The sequence phase: advance the main GRU, blend the direct forecast
//!    with the attention-weighted extreme event score, and accumulate the
//!    timestep into the sequence loss. One optimizer step per sequence is
//!    applied to the sequence parameter group only.
//!
//! The phases must not leak into each other: the sequence loss can only
//! reach detached memory, and the memory loss graph contains no sequence
//! operations. Each optimizer holds exactly one parameter group.

use std::path::Path;
use std::time::{Duration, Instant};

use candle_core::Tensor;
use candle_nn::optim::{AdamW, Optimizer, ParamsAdamW};
use candle_nn::rnn::GRUState;
use tracing::{debug, info};

use crate::error::{MemcastError, MemcastResult};
use crate::loss;
use crate::model::MemcastModel;
use crate::series::Series;

/// Keeps the attention-blended extreme score away from the log
/// singularities of the extreme value loss. The score is a convex
/// combination of binary labels, so it can land exactly on 0 or 1.
const EXTREME_PRED_EPS: f32 = 1e-6;

/// Running event counts for one training sequence, used for the
/// class-balance weighting of the extreme value loss.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventCounters {
    /// Timesteps at or below the threshold seen so far
    pub normal: u32,
    /// Timesteps above the threshold seen so far
    pub extreme: u32,
}

impl EventCounters {
    /// Record one event.
    pub fn record(&mut self, extreme: bool) {
        if extreme {
            self.extreme += 1;
        } else {
            self.normal += 1;
        }
    }

    /// Total events recorded.
    pub fn total(&self) -> u32 {
        self.normal + self.extreme
    }
}

/// Output of one trained timestep.
pub struct TimestepOutput {
    /// Blended forecast, shape `(1,)`
    pub y_pred: Tensor,
    /// Attention-weighted extreme event score, shape `(1,)`
    pub extreme_pred: Tensor,
    /// Recurrent state after consuming the timestep's input
    pub state: GRUState,
}

/// Loss components of one trained sequence.
#[derive(Debug, Clone, Copy)]
pub struct SequenceLoss {
    /// Square loss plus weighted extreme value loss
    pub total: f32,
    /// Square loss on the blended forecasts
    pub square: f32,
    /// Weighted extreme value loss on the extreme event scores
    pub extreme: f32,
}

/// Summary of one trained sequence.
#[derive(Debug, Clone)]
pub struct SequenceSummary {
    /// First trained timestep of the sequence
    pub start_time: usize,
    /// Last trained timestep of the sequence (inclusive)
    pub end_time: usize,
    /// Loss components of the sequence
    pub loss: SequenceLoss,
    /// Wall time spent on the sequence
    pub elapsed: Duration,
}

/// Per-sequence record of a full training run.
#[derive(Debug, Clone, Default)]
pub struct TrainingReport {
    /// One entry per trained sequence, in order
    pub sequences: Vec<SequenceSummary>,
}

impl TrainingReport {
    /// Number of sequences trained.
    pub fn num_sequences(&self) -> usize {
        self.sequences.len()
    }

    /// Total loss of the last trained sequence, if any.
    pub fn final_loss(&self) -> Option<f32> {
        self.sequences.last().map(|summary| summary.loss.total)
    }
}

/// Drives training of a [`MemcastModel`] with two independent AdamW
/// optimizers, one per parameter group.
pub struct MemcastTrainer {
    model: MemcastModel,
    /// Steps `seq.*` on the sequence loss
    seq_optimizer: AdamW,
    /// Steps `mem.*` on the memory loss
    mem_optimizer: AdamW,
}

impl MemcastTrainer {
    /// Create a trainer around a freshly built or loaded model.
    pub fn new(model: MemcastModel) -> MemcastResult<Self> {
        let params = ParamsAdamW {
            lr: model.config().learning_rate,
            weight_decay: model.config().weight_decay,
            ..Default::default()
        };
        let seq_optimizer = AdamW::new(model.seq_vars(), params.clone())?;
        let mem_optimizer = AdamW::new(model.mem_vars(), params)?;
        Ok(Self {
            model,
            seq_optimizer,
            mem_optimizer,
        })
    }

    /// The wrapped model.
    pub fn model(&self) -> &MemcastModel {
        &self.model
    }

    /// Consume the trainer, returning the model.
    pub fn into_model(self) -> MemcastModel {
        self.model
    }

    /// The inner, memory-local update at `current_time`.
    ///
    /// Rebuilds memory from history before `current_time`, scores the
    /// read-out probabilities against the slot labels with the extreme
    /// value loss, and applies one optimizer step to the memory parameter
    /// group alone. The sequence group is untouched. On return the memory
    /// keys are detached, so later computations cannot reach back into
    /// this update's graph.
    ///
    /// Returns the memory loss value.
    pub fn memory_update(
        &mut self,
        series: &Series,
        current_time: usize,
        counters: EventCounters,
    ) -> MemcastResult<f32> {
        self.model.build_memory(series, current_time)?;

        let probs = self.model.memory_readout_probs()?;
        let labels = self
            .model
            .memory()
            .ok_or(MemcastError::EmptyMemory)?
            .labels()
            .clone();
        let memory_loss = loss::memory_loss(
            &probs,
            &labels,
            counters.normal as f32,
            counters.extreme as f32,
            self.model.config().extreme_value_index,
        )?;
        self.mem_optimizer.backward_step(&memory_loss)?;

        // Graph boundary: everything the sequence loss sees from here on
        // treats the memory as constant.
        self.model.freeze_memory();

        Ok(memory_loss.to_scalar::<f32>()?)
    }

    /// Train one timestep: run the memory update, then advance the
    /// sequence cell and produce the blended prediction for `current_time`.
    ///
    /// `counters` must already include the event at `current_time`.
    pub fn train_one_timestep(
        &mut self,
        state: &GRUState,
        series: &Series,
        current_time: usize,
        counters: EventCounters,
    ) -> MemcastResult<TimestepOutput> {
        let memory_loss = self.memory_update(series, current_time, counters)?;
        debug!(current_time, memory_loss, "memory updated");

        let (next, direct) = self
            .model
            .forward_step(state, &series.feature_row(current_time)?)?;
        let extreme_pred = self.model.extreme_score(&next)?;
        let y_pred = self.model.blended_forecast(&direct, &extreme_pred)?;

        Ok(TimestepOutput {
            y_pred,
            extreme_pred,
            state: next,
        })
    }

    /// Train the model on the sequence `[seq_start, seq_end]` (inclusive).
    ///
    /// Timesteps are processed strictly in order, threading the recurrent
    /// state. The sequence loss is computed once over all collected
    /// timesteps and one optimizer step is applied to the sequence
    /// parameter group.
    pub fn train_one_seq(
        &mut self,
        series: &Series,
        seq_start: usize,
        seq_end: usize,
    ) -> MemcastResult<SequenceLoss> {
        let config = self.model.config().clone();
        let seq_len = seq_end - seq_start + 1;

        let mut counters = EventCounters::default();
        let mut state = self.model.zero_state()?;
        let mut y_preds = Vec::with_capacity(seq_len);
        let mut extreme_preds = Vec::with_capacity(seq_len);
        let mut extreme_targets = Vec::with_capacity(seq_len);

        for t in seq_start..=seq_end {
            let is_extreme = series.target(t) > config.threshold;
            counters.record(is_extreme);
            extreme_targets.push(if is_extreme { 1.0f32 } else { 0.0 });

            let output = self.train_one_timestep(&state, series, t, counters)?;
            y_preds.push(output.y_pred);
            extreme_preds.push(output.extreme_pred);
            state = output.state;
        }

        let y_pred_seq = Tensor::cat(&y_preds, 0)?;
        let extreme_pred_seq = Tensor::cat(&extreme_preds, 0)?
            .clamp(EXTREME_PRED_EPS, 1.0 - EXTREME_PRED_EPS)?;
        let extreme_target_seq =
            Tensor::from_vec(extreme_targets, seq_len, y_pred_seq.device())?;
        let y_true_seq = series.target_window(seq_start, seq_len)?;

        let total = loss::forecast_loss(
            &y_pred_seq,
            &y_true_seq,
            &extreme_pred_seq,
            &extreme_target_seq,
            config.extreme_loss_weight,
            counters.normal as f32,
            counters.extreme as f32,
            config.extreme_value_index,
        )?;
        self.seq_optimizer.backward_step(&total)?;

        let total = total.to_scalar::<f32>()?;
        let square = loss::square_loss(&y_pred_seq.detach(), &y_true_seq)?.to_scalar::<f32>()?;
        Ok(SequenceLoss {
            total,
            square,
            extreme: total - square,
        })
    }

    /// Train on the full series, one sequence of `seq_length` timesteps at
    /// a time.
    ///
    /// Training starts at `window_size + 1` (or `start_timestep`, whichever
    /// is later, for resuming) and fails fast when that leaves no data.
    /// After every sequence the parameters are checkpointed to
    /// `checkpoint_path` if one is given. Once all sequences are trained
    /// the memory is rebuilt one final time over the entire series, leaving
    /// the model ready for inference.
    pub fn train(
        &mut self,
        series: &Series,
        seq_length: usize,
        start_timestep: Option<usize>,
        checkpoint_path: Option<&Path>,
    ) -> MemcastResult<TrainingReport> {
        if seq_length == 0 {
            return Err(MemcastError::invalid_config("seq_length must be > 0"));
        }

        let n = series.len();
        let mut seq_start = self.model.config().window_size + 1;
        if let Some(t) = start_timestep {
            seq_start = seq_start.max(t);
        }
        if seq_start >= n {
            return Err(MemcastError::InsufficientData {
                start_time: seq_start,
                len: n,
            });
        }

        let mut report = TrainingReport::default();
        while seq_start < n {
            let seq_end = (n - 1).min(seq_start + seq_length - 1);

            let started = Instant::now();
            let loss = self.train_one_seq(series, seq_start, seq_end)?;
            let elapsed = started.elapsed();

            info!(
                seq_start,
                seq_end,
                elapsed_ms = elapsed.as_millis() as u64,
                total = loss.total,
                square = loss.square,
                extreme = loss.extreme,
                "trained sequence"
            );

            if let Some(path) = checkpoint_path {
                self.model.save(path)?;
            }

            report.sequences.push(SequenceSummary {
                start_time: seq_start,
                end_time: seq_end,
                loss,
                elapsed,
            });
            seq_start += seq_length;
        }

        // Final rebuild over the whole series so inference sees a memory
        // reflecting full history.
        self.model.build_memory(series, n)?;
        self.model.freeze_memory();

        Ok(report)
    }
}
