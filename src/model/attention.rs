//! Additive attention with optional coverage features.

use burn::{
    module::Module,
    nn::{Initializer, Linear, LinearConfig},
    tensor::{activation, backend::Backend, Tensor},
};

#[derive(Module, Debug)]
pub struct Attention<B: Backend> {
    w_h: Linear<B>,
    w_s: Linear<B>,
    w_c: Option<Linear<B>>,
    v: Linear<B>,
}

impl<B: Backend> Attention<B> {
    pub fn new(
        memory_dim: usize,
        state_dim: usize,
        attn_dim: usize,
        coverage: bool,
        init_std: f64,
        device: &B::Device,
    ) -> Self {
        let init = Initializer::Normal {
            mean: 0.0,
            std: init_std,
        };
        let lin = |d_in: usize, d_out: usize, bias: bool| {
            LinearConfig::new(d_in, d_out)
                .with_bias(bias)
                .with_initializer(init.clone())
                .init(device)
        };
        Self {
            w_h: lin(memory_dim, attn_dim, false),
            w_s: lin(state_dim, attn_dim, true),
            w_c: coverage.then(|| lin(1, attn_dim, false)),
            v: lin(attn_dim, 1, false),
        }
    }

    /// `W_h h_i` for every position, computed once per encoded batch.
    pub fn keys(&self, memory: Tensor<B, 3>) -> Tensor<B, 3> {
        self.w_h.forward(memory)
    }

    /// Returns `(context [batch, memory_dim], attention [batch, len])`.
    /// Attention is exactly zero on padded positions and sums to one over
    /// the rest.
    pub fn forward(
        &self,
        keys: Tensor<B, 3>,
        memory: Tensor<B, 3>,
        mask: Tensor<B, 2>,
        state: Tensor<B, 2>,
        coverage: Option<Tensor<B, 2>>,
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let mut features = keys + self.w_s.forward(state).unsqueeze_dim::<3>(1);
        if let (Some(w_c), Some(cov)) = (&self.w_c, coverage) {
            features = features + w_c.forward(cov.unsqueeze_dim(2));
        }
        let scores = self.v.forward(features.tanh()).squeeze::<2>(2);

        let attn = masked_softmax(scores, mask);
        let context = attn
            .clone()
            .unsqueeze_dim::<3>(1)
            .matmul(memory)
            .squeeze::<2>(1);
        (context, attn)
    }
}

pub fn masked_softmax<B: Backend>(scores: Tensor<B, 2>, mask: Tensor<B, 2>) -> Tensor<B, 2> {
    let padding = mask.clone().equal_elem(0.0);
    let probs = activation::softmax(scores.mask_fill(padding, -1e9), 1) * mask;
    let total = probs.clone().sum_dim(1).clamp_min(1e-10);
    probs / total
}
