//! Graph convolution over document graphs.
//!
//! Per layer: per-label in/out-arc transforms plus a self-loop transform,
//! aggregation (sum or mean), an optional node gate, an optional skip, ReLU
//! and dropout. Padded nodes are zeroed after every layer.

use burn::{
    module::Module,
    nn::{Dropout, DropoutConfig, Initializer, Linear, LinearConfig},
    tensor::{activation, backend::Backend, Distribution, Tensor},
};

use super::config::{GcnAggregation, GcnConfig};
use crate::graph::GraphTensors;

#[derive(Module, Debug)]
pub struct GcnLayer<B: Backend> {
    w_in: Vec<Linear<B>>,
    w_out: Vec<Linear<B>>,
    w_loop: Linear<B>,
    gate: Option<Linear<B>>,
    /// Projects the previous representation when widths differ.
    adjust: Option<Linear<B>>,
    dropout: Dropout,
    edge_dropout: f64,
    mean: bool,
    skip: bool,
}

impl<B: Backend> GcnLayer<B> {
    pub fn new(cfg: &GcnConfig, input_dim: usize, init_std: f64, device: &B::Device) -> Self {
        let out = cfg.hidden_dim;
        let init = Initializer::Normal {
            mean: 0.0,
            std: init_std,
        };
        let linear = |bias: bool, d_out: usize| {
            LinearConfig::new(input_dim, d_out)
                .with_bias(bias)
                .with_initializer(init.clone())
                .init(device)
        };

        let slots = cfg.label_slots();
        Self {
            w_in: (0..slots).map(|_| linear(true, out)).collect(),
            w_out: (0..slots).map(|_| linear(true, out)).collect(),
            w_loop: linear(false, out),
            gate: cfg.gating.then(|| linear(true, 1)),
            adjust: (input_dim != out).then(|| linear(false, out)),
            dropout: DropoutConfig::new(cfg.dropout).init(),
            edge_dropout: cfg.edge_dropout,
            mean: cfg.aggregation == GcnAggregation::Mean,
            skip: cfg.skip,
        }
    }

    /// `x`: `[batch, nodes, in]`, `mask`: `[batch, nodes]`.
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        graph: &GraphTensors<B>,
        mask: Tensor<B, 2>,
    ) -> Tensor<B, 3> {
        let [batch, nodes, _] = x.dims();
        let labels = graph.num_labels().min(self.w_in.len());

        let mut adjacency = graph.adjacency.clone();
        if self.edge_dropout > 0.0 && B::ad_enabled() {
            let keep = Tensor::random(
                adjacency.dims(),
                Distribution::Bernoulli(1.0 - self.edge_dropout),
                &adjacency.device(),
            );
            adjacency = adjacency * keep;
        }

        let self_term =
            self.w_loop.forward(x.clone()) * graph.self_loops.clone().unsqueeze_dim::<3>(2);
        let mut aggregate = self_term;
        for l in 0..labels {
            let a = adjacency
                .clone()
                .slice([0..batch, l..l + 1, 0..nodes, 0..nodes])
                .squeeze::<3>(1);
            let incoming = a.clone().matmul(self.w_in[l].forward(x.clone()));
            let outgoing = a.swap_dims(1, 2).matmul(self.w_out[l].forward(x.clone()));
            aggregate = aggregate + incoming + outgoing;
        }
        if self.mean {
            aggregate = aggregate / graph.neighbour_count.clone().unsqueeze_dim::<3>(2);
        }

        let previous = match &self.adjust {
            Some(adjust) => adjust.forward(x.clone()),
            None => x.clone(),
        };

        let mut h = match &self.gate {
            Some(gate) => {
                let g = activation::sigmoid(gate.forward(x));
                let keep = g.clone().neg().add_scalar(1.0);
                aggregate * g + previous.clone() * keep
            }
            None => aggregate,
        };
        if self.skip {
            h = h + previous;
        }

        let h = self.dropout.forward(activation::relu(h));
        h * mask.unsqueeze_dim(2)
    }
}

#[derive(Module, Debug)]
pub struct GcnEncoder<B: Backend> {
    layers: Vec<GcnLayer<B>>,
    hidden_dim: usize,
}

impl<B: Backend> GcnEncoder<B> {
    pub fn new(cfg: &GcnConfig, input_dim: usize, init_std: f64, device: &B::Device) -> Self {
        let layers = (0..cfg.num_layers)
            .map(|i| {
                let d_in = if i == 0 { input_dim } else { cfg.hidden_dim };
                GcnLayer::new(cfg, d_in, init_std, device)
            })
            .collect();
        Self {
            layers,
            hidden_dim: cfg.hidden_dim,
        }
    }

    pub fn output_dim(&self) -> usize {
        self.hidden_dim
    }

    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        graph: &GraphTensors<B>,
        mask: Tensor<B, 2>,
    ) -> Tensor<B, 3> {
        self.layers
            .iter()
            .fold(x, |h, layer| layer.forward(h, graph, mask.clone()))
    }
}
