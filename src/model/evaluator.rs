//! Held-out loss over pre-built batches.

use burn::tensor::{backend::Backend, ElementConversion};

use super::generator::GroundedGenerator;
use crate::data::Batch;
use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalMetrics {
    pub loss: f32,
    pub nll: f32,
    pub perplexity: f32,
    pub coverage_loss: Option<f32>,
    pub batches: usize,
    /// Batches left out because their loss was not finite.
    pub skipped: usize,
}

impl std::fmt::Display for EvalMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Loss: {:.4} | NLL: {:.4} | PPL: {:.2} | Batches: {}",
            self.loss, self.nll, self.perplexity, self.batches
        )?;
        if let Some(c) = self.coverage_loss {
            write!(f, " | Cov: {:.4}", c)?;
        }
        Ok(())
    }
}

pub struct Evaluator;

impl Evaluator {
    /// Unweighted mean over batches. Run it on the inner (non-autodiff)
    /// backend so dropout is off and no graph is recorded.
    pub fn evaluate<B: Backend>(model: &GroundedGenerator<B>, batches: &[Batch<B>]) -> Result<EvalMetrics> {
        let mut loss = 0.0f64;
        let mut nll = 0.0f64;
        let mut coverage: Option<f64> = None;
        let mut counted = 0usize;
        let mut skipped = 0usize;

        for batch in batches {
            let out = model.forward_loss(batch)?;
            let total: f32 = out.total.into_scalar().elem();
            if !total.is_finite() {
                skipped += 1;
                continue;
            }
            loss += total as f64;
            nll += out.nll.into_scalar().elem::<f32>() as f64;
            if let Some(c) = out.coverage {
                *coverage.get_or_insert(0.0) += c.into_scalar().elem::<f32>() as f64;
            }
            counted += 1;
        }

        if skipped > 0 {
            tracing::warn!(skipped, "non-finite evaluation batches ignored");
        }
        let n = counted.max(1) as f64;
        let nll = nll / n;
        Ok(EvalMetrics {
            loss: (loss / n) as f32,
            nll: nll as f32,
            perplexity: nll.exp() as f32,
            coverage_loss: coverage.map(|c| (c / n) as f32),
            batches: counted,
            skipped,
        })
    }
}
