//! Episodic memory of past extreme events.
//!
//! Memory is a fixed-size collection of (summary, label) pairs sampled from
//! history. Each summary is the final hidden state of the window encoder run
//! over a randomly chosen historical window; each label marks whether the
//! target immediately following that window was extreme. Memory is rebuilt
//! wholesale - never patched in place - and only from timesteps strictly
//! before the current one.

use candle_core::Tensor;
use rand::Rng;

use crate::error::{MemcastError, MemcastResult};

/// A snapshot of sampled history: `memory_size` window summaries (`keys`)
/// and their aligned binary extreme-event labels (`labels`).
#[derive(Debug, Clone)]
pub struct Memory {
    /// Window summaries, shape `(memory_size, hidden_size)`
    keys: Tensor,
    /// Binary labels, shape `(memory_size,)`
    labels: Tensor,
    /// Start timestep of the window behind each slot
    window_starts: Vec<usize>,
}

impl Memory {
    /// Create a memory from aligned keys, labels, and window provenance.
    pub fn new(keys: Tensor, labels: Tensor, window_starts: Vec<usize>) -> MemcastResult<Self> {
        let (num_keys, _hidden) = keys.dims2()?;
        let num_labels = labels.dims1()?;
        if num_keys != num_labels || num_keys != window_starts.len() {
            return Err(MemcastError::SeriesMismatch {
                features: num_keys,
                targets: num_labels,
            });
        }
        Ok(Self {
            keys,
            labels,
            window_starts,
        })
    }

    /// Number of memory slots.
    pub fn len(&self) -> usize {
        self.window_starts.len()
    }

    /// Whether the memory holds no slots.
    pub fn is_empty(&self) -> bool {
        self.window_starts.is_empty()
    }

    /// Window summaries, shape `(memory_size, hidden_size)`.
    pub fn keys(&self) -> &Tensor {
        &self.keys
    }

    /// Binary extreme-event labels, shape `(memory_size,)`.
    pub fn labels(&self) -> &Tensor {
        &self.labels
    }

    /// Start timestep of the window behind each slot.
    pub fn window_starts(&self) -> &[usize] {
        &self.window_starts
    }

    /// A copy whose keys no longer carry gradient history. Labels are
    /// constants already. Used at the boundary between the memory update
    /// and the sequence-level computation.
    pub fn detached(&self) -> Self {
        Self {
            keys: self.keys.detach(),
            labels: self.labels.detach(),
            window_starts: self.window_starts.clone(),
        }
    }
}

/// Draw `memory_size` window start times uniformly (with replacement) from
/// `[0, current_time - window_size - 1]`.
///
/// A sampled window covers `[start, start + window_size)` and is labeled by
/// the target at `start + window_size`, so both the window and its label
/// must be observable before `current_time`. Fails when `current_time <
/// window_size + 1`, which leaves no valid start.
pub fn sample_window_starts<R: Rng>(
    rng: &mut R,
    memory_size: usize,
    window_size: usize,
    current_time: usize,
) -> MemcastResult<Vec<usize>> {
    if current_time < window_size + 1 {
        return Err(MemcastError::InsufficientHistory {
            current_time,
            window_size,
        });
    }
    let sample_high = current_time - window_size - 1;
    Ok((0..memory_size)
        .map(|_| rng.gen_range(0..=sample_high))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_sampled_windows_fit_before_current_time() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let window_size = 5;
        let current_time = 50;

        let starts = sample_window_starts(&mut rng, 100, window_size, current_time).unwrap();
        assert_eq!(starts.len(), 100);
        for start in starts {
            assert!(start + window_size < current_time);
        }
    }

    #[test]
    fn test_sampling_fails_without_history() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        for current_time in 0..=5 {
            let result = sample_window_starts(&mut rng, 10, 5, current_time);
            assert!(matches!(
                result,
                Err(MemcastError::InsufficientHistory { .. })
            ));
        }
        // window_size + 1 is the first legal current time
        assert!(sample_window_starts(&mut rng, 10, 5, 6).is_ok());
    }

    #[test]
    fn test_sampling_is_seed_deterministic() {
        let mut a = ChaCha8Rng::seed_from_u64(99);
        let mut b = ChaCha8Rng::seed_from_u64(99);

        let starts_a = sample_window_starts(&mut a, 32, 4, 40).unwrap();
        let starts_b = sample_window_starts(&mut b, 32, 4, 40).unwrap();
        assert_eq!(starts_a, starts_b);
    }

    #[test]
    fn test_memory_rejects_misaligned_slots() {
        let device = Device::Cpu;
        let keys = Tensor::zeros((4, 8), candle_core::DType::F32, &device).unwrap();
        let labels = Tensor::zeros(3, candle_core::DType::F32, &device).unwrap();

        let result = Memory::new(keys, labels, vec![0, 1, 2, 3]);
        assert!(result.is_err());
    }

    #[test]
    fn test_memory_accessors() {
        let device = Device::Cpu;
        let keys = Tensor::zeros((4, 8), candle_core::DType::F32, &device).unwrap();
        let labels = Tensor::zeros(4, candle_core::DType::F32, &device).unwrap();

        let memory = Memory::new(keys, labels, vec![0, 3, 1, 2]).unwrap();
        assert_eq!(memory.len(), 4);
        assert!(!memory.is_empty());
        assert_eq!(memory.keys().dims(), &[4, 8]);
        assert_eq!(memory.labels().dims(), &[4]);
        assert_eq!(memory.window_starts(), &[0, 3, 1, 2]);

        let detached = memory.detached();
        assert_eq!(detached.len(), 4);
    }
}
