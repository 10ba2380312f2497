//! Memcast training demo on a synthetic spiky series.
//!
//! Generates a noisy sinusoid with rare extreme bursts, trains the
//! forecaster on it, and prints per-sequence loss summaries plus a few
//! held-in forecasts.
//!
//! Usage:
//!   cargo run --bin train --release

use candle_core::Device;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use memcast_rs::{MemcastConfig, MemcastModel, MemcastTrainer, Series};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("=== Memcast Training ===\n");

    let device = Device::Cpu;
    let config = MemcastConfig {
        input_dim: 1,
        hidden_size: 16,
        window_size: 8,
        memory_size: 32,
        threshold: 1.5,
        ..MemcastConfig::default()
    };

    println!("Hidden size: {}", config.hidden_size);
    println!("Window size: {}", config.window_size);
    println!("Memory slots: {}", config.memory_size);
    println!("Threshold: {}", config.threshold);

    // Synthetic series: sinusoid plus occasional extreme bursts.
    let n = 400;
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut targets = Vec::with_capacity(n);
    let mut features = Vec::with_capacity(n);
    for t in 0..n {
        let base = (t as f32 * 0.15).sin() * 0.5;
        let burst = if rng.gen_range(0..20) == 0 { 2.0 } else { 0.0 };
        let y = base + burst + rng.gen_range(-0.05..0.05);
        features.push(base);
        targets.push(y);
    }

    let num_extreme = targets.iter().filter(|&&y| y > config.threshold).count();
    println!("Series length: {} ({} extreme events)\n", n, num_extreme);

    let series = Series::from_slices(&features, &targets, config.input_dim, &device)?;

    let model = MemcastModel::new(&config, &device)?;
    println!("Parameters: {}", model.parameter_count());

    let mut trainer = MemcastTrainer::new(model)?;

    println!("Starting training...");
    let report = trainer.train(&series, 50, None, None)?;

    println!("{:-<60}", "");
    println!(
        "{:>6} {:>6} {:>10} {:>10} {:>10}",
        "start", "end", "total", "square", "extreme"
    );
    println!("{:-<60}", "");
    for summary in &report.sequences {
        println!(
            "{:>6} {:>6} {:>10.4} {:>10.4} {:>10.4}",
            summary.start_time,
            summary.end_time,
            summary.loss.total,
            summary.loss.square,
            summary.loss.extreme
        );
    }
    println!("{:-<60}", "");

    let model = trainer.into_model();
    let start = n - 10;
    let forecasts = model.predict(&series, start)?;
    println!("\nLast {} forecasts vs targets:", forecasts.len());
    for (offset, forecast) in forecasts.iter().enumerate() {
        let t = start + offset;
        println!(
            "  t={:>3}  forecast {:>8.4}  target {:>8.4}",
            t,
            forecast,
            series.target(t)
        );
    }

    Ok(())
}
