//! Info Command
//!
//! Validates a model configuration and reports its shape.

use std::path::Path;

use burn::config::Config;
use burn::module::Module;

use groundgen::backend::{default_device, InferBackend};
use groundgen::utils::format_params;
use groundgen::{GroundGenError, GroundedGenerator, ModelConfig, Result, TrainingConfig};

pub fn load_model_config(path: &Path) -> Result<ModelConfig> {
    ModelConfig::load(path).map_err(|e| GroundGenError::config(format!("{}: {}", path.display(), e)))
}

pub fn execute(config: &Path, training: Option<&Path>) -> Result<()> {
    let cfg = load_model_config(config)?;
    let topology = cfg.validate()?;

    let train_cfg = match training {
        Some(path) => TrainingConfig::load(path)
            .map_err(|e| GroundGenError::config(format!("{}: {}", path.display(), e)))?,
        None => TrainingConfig::default(),
    };
    train_cfg.validate()?;

    let device = default_device();
    let model = GroundedGenerator::<InferBackend>::new(&cfg, &device)?;

    println!("═══════════════════════════════════════════════════════════");
    println!("  Model: {}", config.display());
    println!("═══════════════════════════════════════════════════════════");
    println!("  backend: {}", groundgen::backend_name());
    println!("  parameters: {}", format_params(model.num_params()));
    println!("  vocab_size: {}", cfg.vocab_size);
    println!("  topology: {:?}", topology);
    println!("  graph policy: {}", cfg.graph_policy.name());
    println!(
        "  embedding: {} (trainable={}, pretrained={}, contextual={})",
        cfg.embedding.output_dim(),
        cfg.embedding.trainable,
        cfg.embedding.pretrained,
        cfg.embedding.contextual
    );
    println!(
        "  gcn: layers={} hidden={} labels={}",
        cfg.encoder.gcn.num_layers,
        cfg.encoder.gcn.hidden_dim,
        cfg.encoder.gcn.label_slots()
    );
    println!(
        "  lstm: hidden={} bidirectional={}",
        cfg.encoder.lstm.hidden_dim, cfg.encoder.lstm.bidirectional
    );
    println!("  query encoder: {}", cfg.query.enabled);
    println!(
        "  decoder: hidden={} pointer_gen={} coverage={} beam={}",
        cfg.decoder.hidden_dim, cfg.decoder.pointer_gen, cfg.decoder.coverage, cfg.decoder.beam_size
    );
    println!(
        "  optimizer: {} lr={} clip={}",
        train_cfg.optimizer.name(),
        train_cfg.optimizer.learning_rate(),
        train_cfg.max_grad_norm
    );
    println!("═══════════════════════════════════════════════════════════");
    Ok(())
}
