//! Training Smoke Tests
//!
//! Quick validation that the train step, evaluation and weight files work.

mod common;

use burn::module::AutodiffModule;
use groundgen::model::OptimizerKind;
use groundgen::{Batch, Evaluator, GroundedGenerator, ModelConfig, TrainStats, Trainer, TrainingConfig};
use tempfile::tempdir;

use common::{TestAutodiffBackend, TestBackend};

fn setup() -> (groundgen::Vocab, ModelConfig, Vec<groundgen::EncodedExample>) {
    let vocab = common::test_vocab();
    let cfg = common::test_model_config(&vocab);
    let cfg = ModelConfig {
        decoder: cfg.decoder.clone().with_coverage(true),
        query: cfg.query.clone().with_enabled(true),
        ..cfg
    };
    let examples = common::encode(&common::test_examples(), &vocab, &cfg);
    (vocab, cfg, examples)
}

#[test]
fn test_training_steps_are_finite_and_counted() {
    let device = common::test_device();
    let (_, cfg, examples) = setup();
    let batch: Batch<TestAutodiffBackend> = common::make_batch(&examples, &cfg, &device);

    let train_config = TrainingConfig::default()
        .with_optimizer(OptimizerKind::Adam { lr: 1e-2 })
        .with_log_every(1);
    let mut trainer: Trainer<TestAutodiffBackend> =
        Trainer::new(&cfg, train_config, device.clone()).unwrap();

    let stats: Vec<TrainStats> = (0..20)
        .map(|_| trainer.train_step(&batch).expect("train step failed"))
        .collect();

    assert_eq!(trainer.step(), 20);
    assert_eq!(trainer.skipped_steps(), 0);
    for s in &stats {
        assert!(s.loss.is_finite());
        assert!(s.grad_norm.is_finite());
        assert!(s.coverage_loss.is_some());
    }
    let first = stats[0].loss;
    let last = stats[stats.len() - 1].loss;
    assert!(last < first, "loss did not decrease: {} -> {}", first, last);
}

#[test]
fn test_each_optimizer_takes_a_step() {
    let device = common::test_device();
    let (_, cfg, examples) = setup();
    let batch: Batch<TestAutodiffBackend> = common::make_batch(&examples[..2], &cfg, &device);

    for optimizer in [
        OptimizerKind::Adagrad { lr: 0.15 },
        OptimizerKind::Adam { lr: 1e-3 },
        OptimizerKind::Momentum { lr: 0.1, momentum: 0.9 },
    ] {
        let train_config = TrainingConfig::default().with_optimizer(optimizer);
        let mut trainer: Trainer<TestAutodiffBackend> =
            Trainer::new(&cfg, train_config, device.clone()).unwrap();
        let stats = trainer.train_step(&batch).unwrap();
        assert_eq!(stats.step, 1, "{}", optimizer.name());
    }
}

#[test]
fn test_gradient_norm_is_clipped() {
    let device = common::test_device();
    let (_, cfg, examples) = setup();
    let batch: Batch<TestAutodiffBackend> = common::make_batch(&examples, &cfg, &device);

    let train_config = TrainingConfig::default().with_max_grad_norm(1e-6);
    let mut trainer: Trainer<TestAutodiffBackend> =
        Trainer::new(&cfg, train_config, device.clone()).unwrap();
    let stats = trainer.train_step(&batch).unwrap();
    assert!(stats.clipped);
    assert!(stats.grad_norm > 1e-6);
}

#[test]
fn test_invalid_training_config_is_rejected() {
    let device = common::test_device();
    let (_, cfg, _) = setup();
    let train_config = TrainingConfig::default().with_max_grad_norm(0.0);
    let result: groundgen::Result<Trainer<TestAutodiffBackend>> =
        Trainer::new(&cfg, train_config, device);
    assert!(result.is_err());
}

#[test]
fn test_evaluator_after_training() {
    let device = common::test_device();
    let (_, cfg, examples) = setup();
    let batch: Batch<TestAutodiffBackend> = common::make_batch(&examples, &cfg, &device);

    let mut trainer: Trainer<TestAutodiffBackend> =
        Trainer::new(&cfg, TrainingConfig::default(), device.clone()).unwrap();
    trainer.train_step(&batch).unwrap();

    let model = trainer.model.valid();
    let eval_batches: Vec<Batch<TestBackend>> = vec![
        common::make_batch(&examples[..1], &cfg, &device),
        common::make_batch(&examples[1..], &cfg, &device),
    ];
    let metrics = Evaluator::evaluate(&model, &eval_batches).unwrap();
    assert_eq!(metrics.batches, 2);
    assert!(metrics.loss.is_finite());
    assert!((metrics.perplexity - metrics.nll.exp()).abs() / metrics.perplexity < 1e-3);
    assert!(metrics.coverage_loss.is_some());
    assert!(metrics.to_string().contains("PPL"));
}

#[test]
fn test_weights_roundtrip() {
    let device = common::test_device();
    let (_, cfg, examples) = setup();
    let dir = tempdir().unwrap();
    let path = dir.path().join("model");

    let model = GroundedGenerator::<TestBackend>::new(&cfg, &device).unwrap();
    model.save_weights(&path).unwrap();
    let loaded = GroundedGenerator::<TestBackend>::load_weights(&cfg, &path, &device).unwrap();

    let batch: Batch<TestBackend> = common::make_batch(&examples, &cfg, &device);
    let a = common::to_vec(model.forward_loss(&batch).unwrap().total);
    let b = common::to_vec(loaded.forward_loss(&batch).unwrap().total);
    // the compact recorder stores half precision
    common::assert_close(&a, &b, 1e-2);
}

#[test]
fn test_overflowing_loss_skips_the_update() {
    let device = common::test_device();
    let (_, cfg, examples) = setup();
    // the weighted L2 term alone overflows f32
    let cfg = cfg.with_beta_l2(3.0e38);
    let batch: Batch<TestAutodiffBackend> = common::make_batch(&examples, &cfg, &device);
    let eval_batch: Batch<TestBackend> = common::make_batch(&examples, &cfg, &device);

    let mut trainer: Trainer<TestAutodiffBackend> =
        Trainer::new(&cfg, TrainingConfig::default(), device.clone()).unwrap();
    let before = common::to_vec(trainer.model.valid().forward_loss(&eval_batch).unwrap().nll);

    let err = trainer.train_step(&batch).unwrap_err();
    assert!(err.is_skipped_update(), "unexpected error: {}", err);
    assert!(matches!(err, groundgen::GroundGenError::NonFiniteLoss { step: 0, .. }));
    assert_eq!(trainer.step(), 0);
    assert_eq!(trainer.skipped_steps(), 1);

    let after = common::to_vec(trainer.model.valid().forward_loss(&eval_batch).unwrap().nll);
    assert_eq!(before, after, "parameters moved on a skipped update");
}
