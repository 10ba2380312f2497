//! The Memcast model aggregate.
//!
//! Holds every trainable piece and the episodic memory:
//! - the main sequence GRU and output projection producing the direct
//!   forecast,
//! - a separate window-encoder GRU and memory read-out projection that
//!   summarize historical windows into memory,
//! - a scalar blending weight combining the direct forecast with the
//!   attention-weighted extreme event score.
//!
//! Parameters live in a single `VarMap` and partition into two disjoint
//! trainable groups by name prefix: `seq.*` (sequence GRU, output
//! projection, blending weight) and `mem.*` (window encoder, memory
//! read-out). The two groups are optimized by different losses and must
//! never receive gradients from the other's objective.

use std::path::Path;

use candle_core::{DType, Device, Tensor, Var, D};
use candle_nn::ops::sigmoid;
use candle_nn::rnn::{gru, GRUConfig, GRUState, GRU, RNN};
use candle_nn::{linear, Init, Linear, Module, VarBuilder, VarMap};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::attention;
use crate::config::MemcastConfig;
use crate::error::{MemcastError, MemcastResult};
use crate::memory::{self, Memory};
use crate::series::Series;

/// Memory-augmented GRU forecaster.
pub struct MemcastModel {
    /// Main sequence cell
    gru: GRU,
    /// Encoder run over sampled historical windows
    window_encoder: GRU,
    /// Hidden state to direct forecast
    out_proj: Linear,
    /// Memory key to extreme event probability (pre-sigmoid)
    mem_readout: Linear,
    /// Scalar blending weight, shape `(1,)`
    blend: Tensor,
    /// Current episodic memory, if built
    memory: Option<Memory>,
    var_map: VarMap,
    config: MemcastConfig,
    device: Device,
    /// Seedable sampler for memory window starts
    rng: ChaCha8Rng,
}

impl MemcastModel {
    /// Create a new model with random initialization.
    pub fn new(config: &MemcastConfig, device: &Device) -> MemcastResult<Self> {
        config.validate()?;

        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);

        let seq_vb = vb.pp("seq");
        let seq_cell = gru(
            config.input_dim,
            config.hidden_size,
            GRUConfig::default(),
            seq_vb.pp("gru"),
        )?;
        let out_proj = linear(config.hidden_size, 1, seq_vb.pp("out"))?;
        let blend = seq_vb.get_with_hints(1, "blend", Init::Const(0.1))?;

        let mem_vb = vb.pp("mem");
        let window_encoder = gru(
            config.input_dim,
            config.hidden_size,
            GRUConfig::default(),
            mem_vb.pp("encoder"),
        )?;
        let mem_readout = linear(config.hidden_size, 1, mem_vb.pp("readout"))?;

        Ok(Self {
            gru: seq_cell,
            window_encoder,
            out_proj,
            mem_readout,
            blend,
            memory: None,
            var_map,
            config: config.clone(),
            device: device.clone(),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
        })
    }

    /// The canonical initial recurrent state.
    pub fn zero_state(&self) -> MemcastResult<GRUState> {
        Ok(self.gru.zero_state(1)?)
    }

    /// Advance the sequence cell one step and project the direct forecast.
    ///
    /// `input` has shape `(1, input_dim)`. Returns the next state and the
    /// direct forecast as a `(1,)` tensor.
    pub fn forward_step(
        &self,
        state: &GRUState,
        input: &Tensor,
    ) -> MemcastResult<(GRUState, Tensor)> {
        let next = self.gru.step(input, state)?;
        let direct = self.out_proj.forward(next.h())?.squeeze(1)?;
        Ok((next, direct))
    }

    /// Run the window encoder from its initial state over
    /// `[window_start, window_start + window_size)` and return the final
    /// hidden state as a `(hidden_size,)` summary.
    fn run_encoder_on_window(&self, series: &Series, window_start: usize) -> MemcastResult<Tensor> {
        let mut state = self.window_encoder.zero_state(1)?;
        for t in window_start..window_start + self.config.window_size {
            state = self.window_encoder.step(&series.feature_row(t)?, &state)?;
        }
        Ok(state.h().squeeze(0)?)
    }

    /// Rebuild the episodic memory from history strictly before
    /// `current_time`, replacing any previous memory wholesale.
    ///
    /// Draws `memory_size` window starts uniformly with replacement from
    /// `[0, current_time - window_size - 1]`, summarizes each window with
    /// the encoder, and labels each slot by whether the target right after
    /// the window exceeds the threshold. Fails when `current_time <
    /// window_size + 1`.
    pub fn build_memory(&mut self, series: &Series, current_time: usize) -> MemcastResult<()> {
        if current_time > series.len() {
            return Err(MemcastError::invalid_config(format!(
                "current_time {} exceeds series length {}",
                current_time,
                series.len()
            )));
        }
        let starts = memory::sample_window_starts(
            &mut self.rng,
            self.config.memory_size,
            self.config.window_size,
            current_time,
        )?;

        let mut keys = Vec::with_capacity(starts.len());
        let mut labels = Vec::with_capacity(starts.len());
        for &start in &starts {
            keys.push(self.run_encoder_on_window(series, start)?);
            let extreme = series.target(start + self.config.window_size) > self.config.threshold;
            labels.push(if extreme { 1.0f32 } else { 0.0 });
        }

        let keys = Tensor::stack(&keys, 0)?;
        let labels = Tensor::from_vec(labels, starts.len(), &self.device)?;
        self.memory = Some(Memory::new(keys, labels, starts)?);
        Ok(())
    }

    /// Detach the memory keys from the graph that produced them. Must be
    /// called once the memory update is done, so that later computations
    /// treat the memory as constant.
    pub fn freeze_memory(&mut self) {
        if let Some(memory) = self.memory.take() {
            self.memory = Some(memory.detached());
        }
    }

    /// The current memory, if one has been built.
    pub fn memory(&self) -> Option<&Memory> {
        self.memory.as_ref()
    }

    /// Per-slot extreme event probabilities from the memory read-out,
    /// shape `(memory_size,)`, strictly inside (0, 1).
    pub fn memory_readout_probs(&self) -> MemcastResult<Tensor> {
        let memory = self.memory.as_ref().ok_or(MemcastError::EmptyMemory)?;
        let logits = self.mem_readout.forward(memory.keys())?.squeeze(1)?;
        Ok(sigmoid(&logits)?)
    }

    /// Attention-weighted extreme event score of a state against the
    /// memory: `sum(weights * labels)`, shape `(1,)`.
    pub fn extreme_score(&self, state: &GRUState) -> MemcastResult<Tensor> {
        let memory = self.memory.as_ref().ok_or(MemcastError::EmptyMemory)?;
        let weights = attention::attention_weights(state.h(), memory.keys())?;
        let labels = memory.labels().unsqueeze(0)?;
        Ok((weights * labels)?.sum(D::Minus1)?)
    }

    /// Blend the direct forecast with the extreme event correction:
    /// `direct + b * extreme_score`.
    pub fn blended_forecast(
        &self,
        direct: &Tensor,
        extreme_score: &Tensor,
    ) -> MemcastResult<Tensor> {
        let correction = (&self.blend * extreme_score)?;
        Ok((direct + &correction)?)
    }

    /// Forecast every timestep in `[start_time, n)` with the trained
    /// parameters and the current memory. No parameters are updated.
    pub fn predict(&self, series: &Series, start_time: usize) -> MemcastResult<Vec<f32>> {
        if start_time >= series.len() {
            return Err(MemcastError::InsufficientData {
                start_time,
                len: series.len(),
            });
        }

        let mut state = self.zero_state()?;
        let mut forecasts = Vec::with_capacity(series.len() - start_time);
        for t in start_time..series.len() {
            let (next, direct) = self.forward_step(&state, &series.feature_row(t)?)?;
            let extreme = self.extreme_score(&next)?;
            let forecast = self.blended_forecast(&direct, &extreme)?;
            forecasts.push(forecast.squeeze(0)?.to_scalar::<f32>()?);
            state = next;
        }
        Ok(forecasts)
    }

    /// Trainable variables of the sequence group: main GRU, output
    /// projection, and blending weight.
    pub fn seq_vars(&self) -> Vec<Var> {
        self.vars_with_prefix("seq.")
    }

    /// Trainable variables of the memory group: window encoder and memory
    /// read-out.
    pub fn mem_vars(&self) -> Vec<Var> {
        self.vars_with_prefix("mem.")
    }

    fn vars_with_prefix(&self, prefix: &str) -> Vec<Var> {
        let data = self.var_map.data().lock().unwrap();
        let mut named: Vec<(String, Var)> = data
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        named.sort_by(|a, b| a.0.cmp(&b.0));
        named.into_iter().map(|(_, var)| var).collect()
    }

    /// Total number of trainable scalars across both groups.
    pub fn parameter_count(&self) -> usize {
        let data = self.var_map.data().lock().unwrap();
        data.values().map(|var| var.as_tensor().elem_count()).sum()
    }

    /// Model configuration.
    pub fn config(&self) -> &MemcastConfig {
        &self.config
    }

    /// Device the model lives on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Save all parameter groups to a safetensors file.
    pub fn save(&self, path: &Path) -> MemcastResult<()> {
        self.var_map.save(path)?;
        Ok(())
    }

    /// Create a model and load all parameter groups from a safetensors
    /// file. The configuration must match the saved model.
    pub fn load(config: &MemcastConfig, path: &Path, device: &Device) -> MemcastResult<Self> {
        let mut model = Self::new(config, device)?;
        model.var_map.load(path)?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spiky_series(n: usize, device: &Device) -> Series {
        // Extreme event (y = 2.0 > threshold 1.0) every 7th timestep.
        let y: Vec<f32> = (0..n).map(|t| if t % 7 == 0 { 2.0 } else { 0.1 }).collect();
        let x: Vec<f32> = (0..n).map(|t| (t as f32 * 0.1).sin()).collect();
        Series::from_slices(&x, &y, 1, device).unwrap()
    }

    #[test]
    fn test_memory_has_fixed_size_and_valid_windows() {
        let config = MemcastConfig::test();
        let device = Device::Cpu;
        let mut model = MemcastModel::new(&config, &device).unwrap();
        let series = spiky_series(30, &device);

        model.build_memory(&series, 20).unwrap();
        let memory = model.memory().unwrap();

        assert_eq!(memory.len(), config.memory_size);
        assert_eq!(
            memory.keys().dims(),
            &[config.memory_size, config.hidden_size]
        );
        assert_eq!(memory.labels().dims(), &[config.memory_size]);
        for &start in memory.window_starts() {
            assert!(start + config.window_size < 20);
        }
    }

    #[test]
    fn test_memory_fails_without_enough_history() {
        let config = MemcastConfig::test();
        let device = Device::Cpu;
        let mut model = MemcastModel::new(&config, &device).unwrap();
        let series = spiky_series(30, &device);

        for current_time in 0..=config.window_size {
            let result = model.build_memory(&series, current_time);
            assert!(matches!(
                result,
                Err(MemcastError::InsufficientHistory { .. })
            ));
            assert!(model.memory().is_none());
        }
    }

    #[test]
    fn test_memory_labels_match_thresholded_targets() {
        let mut config = MemcastConfig::test();
        config.window_size = 5;
        config.memory_size = 10;
        let device = Device::Cpu;
        let mut model = MemcastModel::new(&config, &device).unwrap();
        let n = 50;
        let series = spiky_series(n, &device);

        model.build_memory(&series, n).unwrap();
        let memory = model.memory().unwrap();

        let labels = memory.labels().to_vec1::<f32>().unwrap();
        for (i, &start) in memory.window_starts().iter().enumerate() {
            let expected = series.target(start + config.window_size) > config.threshold;
            assert_eq!(labels[i] == 1.0, expected, "slot {} window {}", i, start);
        }
    }

    #[test]
    fn test_sampling_is_reproducible_across_models() {
        let config = MemcastConfig::test().with_seed(7);
        let device = Device::Cpu;
        let series = spiky_series(40, &device);

        let mut a = MemcastModel::new(&config, &device).unwrap();
        let mut b = MemcastModel::new(&config, &device).unwrap();
        a.build_memory(&series, 40).unwrap();
        b.build_memory(&series, 40).unwrap();

        assert_eq!(
            a.memory().unwrap().window_starts(),
            b.memory().unwrap().window_starts()
        );
    }

    #[test]
    fn test_readout_probs_strictly_inside_unit_interval() {
        let config = MemcastConfig::test();
        let device = Device::Cpu;
        let mut model = MemcastModel::new(&config, &device).unwrap();
        let series = spiky_series(30, &device);

        model.build_memory(&series, 25).unwrap();
        let probs = model
            .memory_readout_probs()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_eq!(probs.len(), config.memory_size);
        assert!(probs.iter().all(|&p| p > 0.0 && p < 1.0));
    }

    #[test]
    fn test_extreme_score_requires_memory() {
        let config = MemcastConfig::test();
        let device = Device::Cpu;
        let model = MemcastModel::new(&config, &device).unwrap();
        let state = model.zero_state().unwrap();

        let result = model.extreme_score(&state);
        assert!(matches!(result, Err(MemcastError::EmptyMemory)));
    }

    #[test]
    fn test_blended_forecast_shape() {
        let config = MemcastConfig::test();
        let device = Device::Cpu;
        let mut model = MemcastModel::new(&config, &device).unwrap();
        let series = spiky_series(30, &device);

        model.build_memory(&series, 20).unwrap();
        let state = model.zero_state().unwrap();
        let (next, direct) = model
            .forward_step(&state, &series.feature_row(20).unwrap())
            .unwrap();
        let extreme = model.extreme_score(&next).unwrap();
        let forecast = model.blended_forecast(&direct, &extreme).unwrap();

        assert_eq!(forecast.dims(), &[1]);
        assert!(forecast.squeeze(0).unwrap().to_scalar::<f32>().is_ok());
    }

    #[test]
    fn test_parameter_groups_are_disjoint_and_complete() {
        let config = MemcastConfig::test();
        let device = Device::Cpu;
        let model = MemcastModel::new(&config, &device).unwrap();

        let seq = model.seq_vars();
        let mem = model.mem_vars();
        assert!(!seq.is_empty());
        assert!(!mem.is_empty());

        let total: usize = seq
            .iter()
            .chain(mem.iter())
            .map(|v| v.as_tensor().elem_count())
            .sum();
        assert_eq!(total, model.parameter_count());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let config = MemcastConfig::test();
        let device = Device::Cpu;
        let model = MemcastModel::new(&config, &device).unwrap();

        let path = std::env::temp_dir().join("memcast_model_round_trip.safetensors");
        model.save(&path).unwrap();

        let loaded = MemcastModel::load(&config, &path, &device).unwrap();
        assert_eq!(loaded.parameter_count(), model.parameter_count());

        let blend_before = model.blend.to_vec1::<f32>().unwrap();
        let blend_after = loaded.blend.to_vec1::<f32>().unwrap();
        assert_eq!(blend_before, blend_after);

        std::fs::remove_file(&path).ok();
    }
}
