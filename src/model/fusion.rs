//! Merging branch outputs and shaping the decoder's initial state.

use burn::{
    module::{Module, Param},
    nn::{Initializer, Linear, LinearConfig},
    tensor::{activation, backend::Backend, Tensor},
};

use super::config::{FusionMode, StateCombine};
use super::lstm::LstmState;

fn linear<B: Backend>(d_in: usize, d_out: usize, std: f64, device: &B::Device) -> Linear<B> {
    LinearConfig::new(d_in, d_out)
        .with_initializer(Initializer::Normal { mean: 0.0, std })
        .init(device)
}

/// Mean over real positions: `[batch, len, dim]` to `[batch, dim]`.
pub fn masked_mean<B: Backend>(x: Tensor<B, 3>, mask: Tensor<B, 2>) -> Tensor<B, 2> {
    let total = (x * mask.clone().unsqueeze_dim(2)).sum_dim(1).squeeze::<2>(1);
    let count = mask.sum_dim(1).clamp_min(1.0);
    total / count
}

/// Merges the sequential and structural memory banks.
#[derive(Module, Debug)]
pub struct FusionLayer<B: Backend> {
    /// `Concat`: `ReLU(W [seq; gcn] + b)`; `Gated`: the gate.
    proj: Option<Linear<B>>,
    adjust: Option<Linear<B>>,
    gated: bool,
    /// `SimpleConcat`: the joint tensor is the output.
    concat: bool,
    output_dim: usize,
}

impl<B: Backend> FusionLayer<B> {
    pub fn new(
        mode: FusionMode,
        seq_dim: usize,
        gcn_dim: usize,
        init_std: f64,
        device: &B::Device,
    ) -> Self {
        match mode {
            FusionMode::None => Self {
                proj: None,
                adjust: None,
                gated: false,
                concat: false,
                output_dim: gcn_dim,
            },
            FusionMode::Concat => Self {
                proj: Some(linear(seq_dim + gcn_dim, seq_dim, init_std, device)),
                adjust: None,
                gated: false,
                concat: false,
                output_dim: seq_dim,
            },
            FusionMode::SimpleConcat => Self {
                proj: None,
                adjust: None,
                gated: false,
                concat: true,
                output_dim: seq_dim + gcn_dim,
            },
            FusionMode::Gated => Self {
                proj: Some(linear(seq_dim + gcn_dim, seq_dim, init_std, device)),
                adjust: (seq_dim != gcn_dim).then(|| linear(gcn_dim, seq_dim, init_std, device)),
                gated: true,
                concat: false,
                output_dim: seq_dim,
            },
        }
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    pub fn forward(&self, seq: Tensor<B, 3>, gcn: Tensor<B, 3>) -> Tensor<B, 3> {
        if self.concat {
            return Tensor::cat(vec![seq, gcn], 2);
        }
        let proj = match &self.proj {
            None => return gcn,
            Some(proj) => proj,
        };
        let joint = Tensor::cat(vec![seq.clone(), gcn.clone()], 2);
        if self.gated {
            let g = activation::sigmoid(proj.forward(joint));
            let gcn = match &self.adjust {
                Some(adjust) => adjust.forward(gcn),
                None => gcn,
            };
            seq * g.clone() + gcn * g.neg().add_scalar(1.0)
        } else {
            activation::relu(proj.forward(joint))
        }
    }
}

/// Word embeddings reintroduced around the GCN.
#[derive(Module, Debug)]
pub struct WordHighway<B: Backend> {
    /// Embeddings to the mixed width, when the widths differ.
    adjust: Option<Linear<B>>,
    /// Scalar weight of the embeddings, starts at 0.
    mix: Option<Param<Tensor<B, 1>>>,
    /// `ReLU(W [emb; x] + b)` back to the width of `x`.
    proj: Option<Linear<B>>,
}

impl<B: Backend> WordHighway<B> {
    /// `β · emb + (1 − β) · x` with `x` of width `dim`.
    pub fn mixing(emb_dim: usize, dim: usize, init_std: f64, device: &B::Device) -> Self {
        Self {
            adjust: (emb_dim != dim).then(|| linear(emb_dim, dim, init_std, device)),
            mix: Some(Param::from_tensor(Tensor::zeros([1], device))),
            proj: None,
        }
    }

    pub fn projecting(emb_dim: usize, dim: usize, init_std: f64, device: &B::Device) -> Self {
        Self {
            adjust: None,
            mix: None,
            proj: Some(linear(emb_dim + dim, dim, init_std, device)),
        }
    }

    pub fn forward(&self, embedded: Tensor<B, 3>, x: Tensor<B, 3>) -> Tensor<B, 3> {
        if let Some(proj) = &self.proj {
            return activation::relu(proj.forward(Tensor::cat(vec![embedded, x], 2)));
        }
        let embedded = match &self.adjust {
            Some(adjust) => adjust.forward(embedded),
            None => embedded,
        };
        match &self.mix {
            Some(beta) => {
                let beta = beta.val().reshape([1, 1, 1]);
                embedded * beta.clone() + x * beta.neg().add_scalar(1.0)
            }
            None => x,
        }
    }
}

/// `ReLU(W x + b)` for hidden and cell, down to the decoder width.
#[derive(Module, Debug)]
pub struct StateReducer<B: Backend> {
    hidden: Linear<B>,
    cell: Linear<B>,
}

impl<B: Backend> StateReducer<B> {
    pub fn new(input_dim: usize, output_dim: usize, init_std: f64, device: &B::Device) -> Self {
        Self {
            hidden: linear(input_dim, output_dim, init_std, device),
            cell: linear(input_dim, output_dim, init_std, device),
        }
    }

    pub fn forward(&self, hidden: Tensor<B, 2>, cell: Tensor<B, 2>) -> LstmState<B> {
        LstmState {
            hidden: activation::relu(self.hidden.forward(hidden)),
            cell: activation::relu(self.cell.forward(cell)),
        }
    }

    /// A single pooled vector stands in for both hidden and cell.
    pub fn from_pooled(&self, pooled: Tensor<B, 2>) -> LstmState<B> {
        self.forward(pooled.clone(), pooled)
    }
}

/// Joins the main and query final states (both at decoder width).
#[derive(Module, Debug)]
pub struct StateCombiner<B: Backend> {
    hidden: Linear<B>,
    cell: Linear<B>,
    gated: bool,
}

impl<B: Backend> StateCombiner<B> {
    pub fn new(mode: StateCombine, dim: usize, init_std: f64, device: &B::Device) -> Self {
        Self {
            hidden: linear(2 * dim, dim, init_std, device),
            cell: linear(2 * dim, dim, init_std, device),
            gated: mode == StateCombine::Gated,
        }
    }

    pub fn forward(&self, main: LstmState<B>, query: LstmState<B>) -> LstmState<B> {
        let join = |proj: &Linear<B>, a: Tensor<B, 2>, b: Tensor<B, 2>| {
            let joint = proj.forward(Tensor::cat(vec![a.clone(), b.clone()], 1));
            if self.gated {
                let g = activation::sigmoid(joint);
                a * g.clone() + b * g.neg().add_scalar(1.0)
            } else {
                activation::relu(joint)
            }
        };
        LstmState {
            hidden: join(&self.hidden, main.hidden, query.hidden),
            cell: join(&self.cell, main.cell, query.cell),
        }
    }
}
