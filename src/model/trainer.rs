//! One optimizer update per batch: loss, backward, global-norm clip.
//!
//! Non-finite losses and gradient norms skip the update and are counted.

use burn::{
    module::AutodiffModule,
    optim::{
        momentum::MomentumConfig, AdaGradConfig, AdamConfig, GradientsParams, Optimizer,
        SgdConfig,
    },
    tensor::{backend::AutodiffBackend, ElementConversion},
};

use super::config::{ModelConfig, OptimizerKind, TrainingConfig};
use super::generator::GroundedGenerator;
use super::regularize::clip_global_norm;
use crate::data::Batch;
use crate::error::{GroundGenError, Result};
use crate::utils::format_params;

/// Object-safe view of a burn optimizer bound to one module type.
trait StepOptimizer<M, B: AutodiffBackend> {
    fn step_module(&mut self, lr: f64, module: M, grads: GradientsParams) -> M;
}

impl<M, B, O> StepOptimizer<M, B> for O
where
    M: AutodiffModule<B>,
    B: AutodiffBackend,
    O: Optimizer<M, B>,
{
    fn step_module(&mut self, lr: f64, module: M, grads: GradientsParams) -> M {
        self.step(lr, module, grads)
    }
}

type BoxedOptimizer<B> = Box<dyn StepOptimizer<GroundedGenerator<B>, B>>;

fn build_optimizer<B: AutodiffBackend>(kind: OptimizerKind) -> BoxedOptimizer<B> {
    match kind {
        OptimizerKind::Adagrad { .. } => {
            Box::new(AdaGradConfig::new().init::<B, GroundedGenerator<B>>())
        }
        OptimizerKind::Adam { .. } => Box::new(AdamConfig::new().init::<B, GroundedGenerator<B>>()),
        OptimizerKind::Momentum { momentum, .. } => Box::new(
            SgdConfig::new()
                .with_momentum(Some(MomentumConfig::new().with_momentum(momentum)))
                .init::<B, GroundedGenerator<B>>(),
        ),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainStats {
    pub step: usize,
    pub loss: f32,
    pub nll: f32,
    pub coverage_loss: Option<f32>,
    /// Before clipping.
    pub grad_norm: f64,
    pub clipped: bool,
}

pub struct Trainer<B: AutodiffBackend> {
    pub model: GroundedGenerator<B>,
    optimizer: BoxedOptimizer<B>,
    config: TrainingConfig,

    step: usize,
    skipped_steps: usize,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(
        model_config: &ModelConfig,
        train_config: TrainingConfig,
        device: B::Device,
    ) -> Result<Self> {
        let model = GroundedGenerator::new(model_config, &device)?;
        Self::from_model(model, train_config)
    }

    pub fn from_model(model: GroundedGenerator<B>, train_config: TrainingConfig) -> Result<Self> {
        train_config.validate()?;
        let optimizer = build_optimizer::<B>(train_config.optimizer);

        tracing::info!(
            params = %format_params(burn::module::Module::num_params(&model)),
            optimizer = train_config.optimizer.name(),
            lr = train_config.optimizer.learning_rate(),
            max_grad_norm = train_config.max_grad_norm,
            "trainer ready"
        );

        Ok(Self {
            model,
            optimizer,
            config: train_config,
            step: 0,
            skipped_steps: 0,
        })
    }

    /// Loss, backward, non-finite check, global-norm clip, then the update.
    /// A non-finite loss or gradient norm skips the update and is returned
    /// as an error; the step counter does not advance.
    pub fn train_step(&mut self, batch: &Batch<B>) -> Result<TrainStats> {
        let output = self.model.forward_loss(batch)?;
        let loss: f32 = output.total.clone().into_scalar().elem();
        if !loss.is_finite() {
            return Err(self.skip(GroundGenError::NonFiniteLoss {
                step: self.step,
                value: loss,
            }));
        }
        let nll: f32 = output.nll.clone().into_scalar().elem();
        let coverage_loss = output
            .coverage
            .as_ref()
            .map(|c| c.clone().into_scalar().elem::<f32>());

        let grads = output.total.backward();
        let mut grads = GradientsParams::from_grads(grads, &self.model);
        let max_norm = self.config.max_grad_norm;
        let grad_norm = clip_global_norm::<B, _>(&self.model, &mut grads, max_norm);
        if !grad_norm.is_finite() {
            return Err(self.skip(GroundGenError::NonFiniteGradient {
                step: self.step,
                norm: grad_norm as f32,
            }));
        }

        let lr = self.config.optimizer.learning_rate();
        self.model = self.optimizer.step_module(lr, self.model.clone(), grads);
        self.step += 1;

        let stats = TrainStats {
            step: self.step,
            loss,
            nll,
            coverage_loss,
            grad_norm,
            clipped: grad_norm > max_norm,
        };
        if self.config.log_every > 0 && self.step % self.config.log_every == 0 {
            tracing::info!(
                step = stats.step,
                loss = stats.loss,
                nll = stats.nll,
                grad_norm = stats.grad_norm,
                "train"
            );
        }
        Ok(stats)
    }

    fn skip(&mut self, err: GroundGenError) -> GroundGenError {
        self.skipped_steps += 1;
        tracing::warn!(skipped = self.skipped_steps, "update skipped: {}", err);
        err
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn skipped_steps(&self) -> usize {
        self.skipped_steps
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }
}
