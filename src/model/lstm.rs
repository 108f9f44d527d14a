//! Mask-aware LSTM: cell, (bi)directional layer and stacked encoder.
//!
//! Padded steps leave the state untouched and emit zeros, so a sequence
//! reads the same with or without trailing padding.

use burn::{
    module::Module,
    nn::{Dropout, DropoutConfig, Initializer, LayerNorm, LayerNormConfig, Linear, LinearConfig},
    tensor::{activation, backend::Backend, Tensor},
};

use super::config::{CellVariant, SequenceEncoderConfig};

#[derive(Clone, Debug)]
pub struct LstmState<B: Backend> {
    pub hidden: Tensor<B, 2>,
    pub cell: Tensor<B, 2>,
}

impl<B: Backend> LstmState<B> {
    pub fn zeros(batch: usize, hidden_dim: usize, device: &B::Device) -> Self {
        Self {
            hidden: Tensor::zeros([batch, hidden_dim], device),
            cell: Tensor::zeros([batch, hidden_dim], device),
        }
    }

    /// `mask` is `[batch, 1]`; rows with 0 keep `self`.
    fn blend(self, next: Self, mask: Tensor<B, 2>) -> Self {
        let keep = mask.clone().neg().add_scalar(1.0);
        Self {
            hidden: next.hidden * mask.clone() + self.hidden * keep.clone(),
            cell: next.cell * mask + self.cell * keep,
        }
    }
}

// ============================================================
// CELL
// ============================================================

#[derive(Module, Debug)]
pub struct LstmCell<B: Backend> {
    input: Linear<B>,
    recurrent: Linear<B>,
    /// One per gate for the normalized variant, empty otherwise.
    gate_norms: Vec<LayerNorm<B>>,
    cell_norm: Option<LayerNorm<B>>,
    hidden_dim: usize,
}

impl<B: Backend> LstmCell<B> {
    pub fn new(
        input_dim: usize,
        hidden_dim: usize,
        variant: CellVariant,
        init_mag: f64,
        device: &B::Device,
    ) -> Self {
        let init = Initializer::Uniform {
            min: -init_mag,
            max: init_mag,
        };
        let input = LinearConfig::new(input_dim, 4 * hidden_dim)
            .with_initializer(init.clone())
            .init(device);
        let recurrent = LinearConfig::new(hidden_dim, 4 * hidden_dim)
            .with_bias(false)
            .with_initializer(init)
            .init(device);

        let (gate_norms, cell_norm) = match variant {
            CellVariant::Basic => (Vec::new(), None),
            CellVariant::Normalized => (
                (0..4)
                    .map(|_| LayerNormConfig::new(hidden_dim).init(device))
                    .collect(),
                Some(LayerNormConfig::new(hidden_dim).init(device)),
            ),
        };

        Self {
            input,
            recurrent,
            gate_norms,
            cell_norm,
            hidden_dim,
        }
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    pub fn step(&self, x: Tensor<B, 2>, state: &LstmState<B>) -> LstmState<B> {
        let gates = self.input.forward(x) + self.recurrent.forward(state.hidden.clone());
        let [batch, _] = gates.dims();
        let h = self.hidden_dim;
        let gate = |k: usize| {
            let g = gates.clone().slice([0..batch, k * h..(k + 1) * h]);
            match self.gate_norms.get(k) {
                Some(norm) => norm.forward(g),
                None => g,
            }
        };
        let (i, f, g, o) = (gate(0), gate(1), gate(2), gate(3));

        let i = activation::sigmoid(i);
        // forget bias of 1
        let f = activation::sigmoid(f.add_scalar(1.0));
        let g = g.tanh();
        let o = activation::sigmoid(o);

        let mut cell = f * state.cell.clone() + i * g;
        if let Some(norm) = &self.cell_norm {
            cell = norm.forward(cell);
        }
        let hidden = o * cell.clone().tanh();
        LstmState { hidden, cell }
    }
}

// ============================================================
// LAYER
// ============================================================

#[derive(Module, Debug)]
pub struct LstmLayer<B: Backend> {
    forward: LstmCell<B>,
    backward: Option<LstmCell<B>>,
}

impl<B: Backend> LstmLayer<B> {
    pub fn output_dim(&self) -> usize {
        let h = self.forward.hidden_dim();
        if self.backward.is_some() {
            2 * h
        } else {
            h
        }
    }

    /// Returns outputs `[batch, len, output_dim]` and the final state of each
    /// direction, forward first.
    pub fn run(&self, x: Tensor<B, 3>, mask: Tensor<B, 2>) -> (Tensor<B, 3>, Vec<LstmState<B>>) {
        let (fw_out, fw_state) = run_direction(&self.forward, x.clone(), mask.clone(), false);
        match &self.backward {
            None => (fw_out, vec![fw_state]),
            Some(cell) => {
                let (bw_out, bw_state) = run_direction(cell, x, mask, true);
                (Tensor::cat(vec![fw_out, bw_out], 2), vec![fw_state, bw_state])
            }
        }
    }
}

fn run_direction<B: Backend>(
    cell: &LstmCell<B>,
    x: Tensor<B, 3>,
    mask: Tensor<B, 2>,
    reverse: bool,
) -> (Tensor<B, 3>, LstmState<B>) {
    let [batch, len, dim] = x.dims();
    let device = x.device();
    let mut state = LstmState::zeros(batch, cell.hidden_dim(), &device);
    let mut outputs = Vec::with_capacity(len);

    let steps: Vec<usize> = if reverse {
        (0..len).rev().collect()
    } else {
        (0..len).collect()
    };
    for t in steps {
        let x_t = x.clone().slice([0..batch, t..t + 1, 0..dim]).squeeze::<2>(1);
        let m_t = mask.clone().slice([0..batch, t..t + 1]);
        let next = cell.step(x_t, &state);
        state = state.blend(next, m_t.clone());
        outputs.push(state.hidden.clone() * m_t);
    }
    if reverse {
        outputs.reverse();
    }
    (Tensor::stack(outputs, 1), state)
}

// ============================================================
// STACKED ENCODER
// ============================================================

#[derive(Clone, Debug)]
pub struct SequenceOutput<B: Backend> {
    pub outputs: Tensor<B, 3>,
    /// Final states of the top layer, directions concatenated.
    pub hidden: Tensor<B, 2>,
    pub cell: Tensor<B, 2>,
}

#[derive(Module, Debug)]
pub struct SequenceEncoder<B: Backend> {
    layers: Vec<LstmLayer<B>>,
    dropout: Dropout,
}

impl<B: Backend> SequenceEncoder<B> {
    pub fn new(
        cfg: &SequenceEncoderConfig,
        input_dim: usize,
        init_mag: f64,
        device: &B::Device,
    ) -> Self {
        let mut layers = Vec::with_capacity(cfg.num_layers);
        let mut dim = input_dim;
        for _ in 0..cfg.num_layers {
            let forward = LstmCell::new(dim, cfg.hidden_dim, cfg.cell, init_mag, device);
            let backward = cfg
                .bidirectional
                .then(|| LstmCell::new(dim, cfg.hidden_dim, cfg.cell, init_mag, device));
            layers.push(LstmLayer { forward, backward });
            dim = cfg.output_dim();
        }
        let p = if cfg.num_layers > 1 { cfg.dropout } else { 0.0 };
        Self {
            layers,
            dropout: DropoutConfig::new(p).init(),
        }
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map(|l| l.output_dim()).unwrap_or(0)
    }

    pub fn forward(&self, x: Tensor<B, 3>, mask: Tensor<B, 2>) -> SequenceOutput<B> {
        let [batch, _, _] = x.dims();
        let device = x.device();
        let mut h = x;
        let mut finals = Vec::new();
        let depth = self.layers.len();

        for (i, layer) in self.layers.iter().enumerate() {
            let (out, states) = layer.run(h, mask.clone());
            h = if i + 1 < depth {
                self.dropout.forward(out) * mask.clone().unsqueeze_dim(2)
            } else {
                out
            };
            finals = states;
        }

        if finals.is_empty() {
            let zeros = Tensor::zeros([batch, 0], &device);
            return SequenceOutput {
                outputs: h,
                hidden: zeros.clone(),
                cell: zeros,
            };
        }
        let hidden = Tensor::cat(finals.iter().map(|s| s.hidden.clone()).collect(), 1);
        let cell = Tensor::cat(finals.into_iter().map(|s| s.cell).collect(), 1);
        SequenceOutput {
            outputs: h,
            hidden,
            cell,
        }
    }
}
