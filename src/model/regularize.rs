//! Parameter and gradient norms via module visitors.

use burn::{
    module::{Module, ModuleVisitor, ParamId},
    optim::GradientsParams,
    tensor::{backend::AutodiffBackend, backend::Backend, ElementConversion, Tensor},
};

struct SquaredNorm<B: Backend> {
    total: Option<Tensor<B, 1>>,
}

impl<B: Backend> ModuleVisitor<B> for SquaredNorm<B> {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        if !tensor.is_require_grad() {
            return;
        }
        let sq = tensor.clone().powf_scalar(2.0).sum();
        self.total = Some(match self.total.take() {
            Some(total) => total + sq,
            None => sq,
        });
    }
}

/// `Σ‖θ‖²` over trainable parameters. `None` when nothing tracks gradients.
pub fn l2_penalty<B: Backend, M: Module<B>>(module: &M) -> Option<Tensor<B, 1>> {
    let mut visitor = SquaredNorm { total: None };
    module.visit(&mut visitor);
    visitor.total
}

struct GradNorm<'a> {
    grads: &'a GradientsParams,
    sum: f64,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradNorm<'_> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            let sq: f32 = grad.powf_scalar(2.0).sum().into_scalar().elem();
            self.sum += sq as f64;
        }
    }
}

/// Global L2 norm over every gradient of `module`.
pub fn global_grad_norm<B: AutodiffBackend, M: Module<B>>(
    module: &M,
    grads: &GradientsParams,
) -> f64 {
    let mut visitor = GradNorm { grads, sum: 0.0 };
    module.visit(&mut visitor);
    visitor.sum.sqrt()
}

struct GradScale<'a> {
    grads: &'a mut GradientsParams,
    scale: f64,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradScale<'_> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) {
            self.grads
                .register::<B::InnerBackend, D>(id, grad.mul_scalar(self.scale));
        }
    }
}

/// Rescales all gradients so their global norm is at most `max_norm`.
/// Returns the norm before clipping.
pub fn clip_global_norm<B: AutodiffBackend, M: Module<B>>(
    module: &M,
    grads: &mut GradientsParams,
    max_norm: f64,
) -> f64 {
    let norm = global_grad_norm::<B, M>(module, grads);
    if norm.is_finite() && norm > max_norm {
        let mut visitor = GradScale {
            grads,
            scale: max_norm / norm,
        };
        module.visit(&mut visitor);
    }
    norm
}
