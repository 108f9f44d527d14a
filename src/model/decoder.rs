//! Pointer-generator decoder: one attention-LSTM step at a time.

use burn::{
    module::Module,
    nn::{Initializer, Linear, LinearConfig},
    tensor::{activation, backend::Backend, Int, Tensor},
};

use super::attention::Attention;
use super::config::ModelConfig;
use super::lstm::{LstmCell, LstmState};

// ============================================================
// STATE & MEMORY
// ============================================================

/// Everything one hypothesis carries between steps. Rows are independent.
#[derive(Clone, Debug)]
pub struct DecoderState<B: Backend> {
    pub lstm: LstmState<B>,
    pub context: Tensor<B, 2>,
    pub query_context: Option<Tensor<B, 2>>,
    /// Sum of past attention distributions; never decreases.
    pub coverage: Tensor<B, 2>,
}

impl<B: Backend> DecoderState<B> {
    pub fn batch_size(&self) -> usize {
        self.context.dims()[0]
    }

    /// Row `index` as a batch of one.
    pub fn row(&self, index: usize) -> Self {
        let take = |t: &Tensor<B, 2>| {
            let [_, d] = t.dims();
            t.clone().slice([index..index + 1, 0..d])
        };
        Self {
            lstm: LstmState {
                hidden: take(&self.lstm.hidden),
                cell: take(&self.lstm.cell),
            },
            context: take(&self.context),
            query_context: self.query_context.as_ref().map(take),
            coverage: take(&self.coverage),
        }
    }

    /// Drops coverage columns past `len` (source padding).
    pub fn truncate_coverage(mut self, len: usize) -> Self {
        let [b, _] = self.coverage.dims();
        self.coverage = self.coverage.slice([0..b, 0..len]);
        self
    }

    /// Stacks batch-one states row-wise.
    pub fn cat(states: Vec<Self>) -> Self {
        let mut hidden = Vec::with_capacity(states.len());
        let mut cell = Vec::with_capacity(states.len());
        let mut context = Vec::with_capacity(states.len());
        let mut query = Vec::with_capacity(states.len());
        let mut coverage = Vec::with_capacity(states.len());
        for s in states {
            hidden.push(s.lstm.hidden);
            cell.push(s.lstm.cell);
            context.push(s.context);
            if let Some(q) = s.query_context {
                query.push(q);
            }
            coverage.push(s.coverage);
        }
        let query_context = (!query.is_empty()).then(|| Tensor::cat(query, 0));
        Self {
            lstm: LstmState {
                hidden: Tensor::cat(hidden, 0),
                cell: Tensor::cat(cell, 0),
            },
            context: Tensor::cat(context, 0),
            query_context,
            coverage: Tensor::cat(coverage, 0),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AttendedMemory<B: Backend> {
    pub memory: Tensor<B, 3>,
    pub keys: Tensor<B, 3>,
    pub mask: Tensor<B, 2>,
}

impl<B: Backend> AttendedMemory<B> {
    fn row(&self, index: usize, len: usize) -> Self {
        let [_, _, d] = self.memory.dims();
        let [_, _, a] = self.keys.dims();
        Self {
            memory: self.memory.clone().slice([index..index + 1, 0..len, 0..d]),
            keys: self.keys.clone().slice([index..index + 1, 0..len, 0..a]),
            mask: self.mask.clone().slice([index..index + 1, 0..len]),
        }
    }

    fn expand(&self, n: usize) -> Self {
        let [_, t, d] = self.memory.dims();
        let [_, _, a] = self.keys.dims();
        Self {
            memory: self.memory.clone().expand([n, t, d]),
            keys: self.keys.clone().expand([n, t, a]),
            mask: self.mask.clone().expand([n, t]),
        }
    }
}

/// Encoder side of decoding, fixed for the whole output sequence.
#[derive(Clone, Debug)]
pub struct DecoderMemory<B: Backend> {
    pub source: AttendedMemory<B>,
    pub ext_ids: Tensor<B, 2, Int>,
    pub max_oovs: usize,
    pub query: Option<AttendedMemory<B>>,
}

impl<B: Backend> DecoderMemory<B> {
    /// Row `index` without its source padding. The query memory keeps its
    /// padded width; its mask covers it.
    pub fn row(&self, index: usize, len: usize) -> Self {
        let query = self.query.as_ref().map(|q| {
            let [_, t] = q.mask.dims();
            q.row(index, t)
        });
        Self {
            source: self.source.row(index, len),
            ext_ids: self.ext_ids.clone().slice([index..index + 1, 0..len]),
            max_oovs: self.max_oovs,
            query,
        }
    }

    /// Repeats a batch-one memory `n` times, one row per hypothesis.
    pub fn expand(&self, n: usize) -> Self {
        let [_, t] = self.ext_ids.dims();
        Self {
            source: self.source.expand(n),
            ext_ids: self.ext_ids.clone().expand([n, t]),
            max_oovs: self.max_oovs,
            query: self.query.as_ref().map(|q| q.expand(n)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StepOutput<B: Backend> {
    /// `[batch, vocab + max_oovs]`, or `[batch, vocab]` without copying.
    pub final_dist: Tensor<B, 2>,
    pub vocab_dist: Tensor<B, 2>,
    pub attention: Tensor<B, 2>,
    pub p_gen: Tensor<B, 2>,
    /// `Σ_i min(a_i, coverage_i)` with the coverage before this step.
    pub coverage_loss: Tensor<B, 1>,
    pub state: DecoderState<B>,
}

/// `p_gen · P_vocab` padded with zeros over the OOV ids, plus
/// `(1 − p_gen) · attention` summed into each position's extended id.
///
/// The copy mass goes through a `[batch, src, vocab + oovs]` one-hot
/// matmul so repeated ids accumulate and the op stays differentiable.
pub fn final_distribution<B: Backend>(
    vocab_dist: Tensor<B, 2>,
    attention: Tensor<B, 2>,
    p_gen: Tensor<B, 2>,
    ext_ids: Tensor<B, 2, Int>,
    max_oovs: usize,
) -> Tensor<B, 2> {
    let [batch, vocab] = vocab_dist.dims();
    let [_, src_len] = ext_ids.dims();
    let device = vocab_dist.device();
    let width = vocab + max_oovs;

    let generated = vocab_dist * p_gen.clone();
    let extended = if max_oovs > 0 {
        Tensor::cat(vec![generated, Tensor::zeros([batch, max_oovs], &device)], 1)
    } else {
        generated
    };

    let slots = Tensor::<B, 1, Int>::arange(0..width as i64, &device)
        .reshape([1, 1, width])
        .expand([batch, src_len, width]);
    let one_hot = ext_ids
        .reshape([batch, src_len, 1])
        .expand([batch, src_len, width])
        .equal(slots)
        .float();

    let copied = attention * p_gen.neg().add_scalar(1.0);
    let scattered: Tensor<B, 2> = copied.unsqueeze_dim::<3>(1).matmul(one_hot).squeeze(1);
    extended + scattered
}

// ============================================================
// DECODER
// ============================================================

#[derive(Module, Debug)]
pub struct PointerDecoder<B: Backend> {
    input_proj: Linear<B>,
    cell: LstmCell<B>,
    attention: Attention<B>,
    query_attention: Option<Attention<B>>,
    p_gen: Option<Linear<B>>,
    out_hidden: Linear<B>,
    out_vocab: Linear<B>,
    memory_dim: usize,
    query_dim: usize,
    hidden_dim: usize,
}

impl<B: Backend> PointerDecoder<B> {
    /// `query_dim` is 0 when the decoder does not attend over a query.
    pub fn new(
        cfg: &ModelConfig,
        emb_dim: usize,
        memory_dim: usize,
        query_dim: usize,
        device: &B::Device,
    ) -> Self {
        let dec = &cfg.decoder;
        let h = dec.hidden_dim;
        let std = cfg.trunc_norm_init_std;
        let lin = |d_in: usize, d_out: usize| {
            LinearConfig::new(d_in, d_out)
                .with_initializer(Initializer::Normal { mean: 0.0, std })
                .init(device)
        };

        Self {
            input_proj: lin(emb_dim + memory_dim + query_dim, emb_dim),
            cell: LstmCell::new(
                emb_dim,
                h,
                super::config::CellVariant::Basic,
                cfg.rand_unif_init_mag,
                device,
            ),
            attention: Attention::new(memory_dim, 2 * h, h, dec.coverage, std, device),
            query_attention: (query_dim > 0)
                .then(|| Attention::new(query_dim, 2 * h, h, false, std, device)),
            p_gen: dec
                .pointer_gen
                .then(|| lin(memory_dim + query_dim + 2 * h + emb_dim, 1)),
            out_hidden: lin(h + memory_dim + query_dim, h),
            out_vocab: lin(h, cfg.vocab_size),
            memory_dim,
            query_dim,
            hidden_dim: h,
        }
    }

    pub fn pointer_gen(&self) -> bool {
        self.p_gen.is_some()
    }

    /// Keys are precomputed here so each step only projects the state.
    pub fn prepare(
        &self,
        memory: Tensor<B, 3>,
        mask: Tensor<B, 2>,
        ext_ids: Tensor<B, 2, Int>,
        max_oovs: usize,
        query: Option<(Tensor<B, 3>, Tensor<B, 2>)>,
    ) -> DecoderMemory<B> {
        let source = AttendedMemory {
            keys: self.attention.keys(memory.clone()),
            memory,
            mask,
        };
        let query = match (&self.query_attention, query) {
            (Some(attn), Some((memory, mask))) => Some(AttendedMemory {
                keys: attn.keys(memory.clone()),
                memory,
                mask,
            }),
            _ => None,
        };
        DecoderMemory {
            source,
            ext_ids,
            max_oovs,
            query,
        }
    }

    pub fn initial_state(&self, lstm: LstmState<B>, memory: &DecoderMemory<B>) -> DecoderState<B> {
        let [batch, len] = memory.source.mask.dims();
        let device = memory.source.mask.device();
        DecoderState {
            lstm,
            context: Tensor::zeros([batch, self.memory_dim], &device),
            query_context: (self.query_dim > 0 && memory.query.is_some())
                .then(|| Tensor::zeros([batch, self.query_dim], &device)),
            coverage: Tensor::zeros([batch, len], &device),
        }
    }

    /// `emb`: `[batch, emb_dim]` embedding of the previous output token.
    pub fn step(
        &self,
        emb: Tensor<B, 2>,
        state: &DecoderState<B>,
        memory: &DecoderMemory<B>,
    ) -> StepOutput<B> {
        let mut input = vec![emb, state.context.clone()];
        if let Some(q) = &state.query_context {
            input.push(q.clone());
        }
        let x = self.input_proj.forward(Tensor::cat(input, 1));

        let lstm = self.cell.step(x.clone(), &state.lstm);
        let query_state = Tensor::cat(vec![lstm.cell.clone(), lstm.hidden.clone()], 1);

        let src = &memory.source;
        let (context, attention) = self.attention.forward(
            src.keys.clone(),
            src.memory.clone(),
            src.mask.clone(),
            query_state.clone(),
            Some(state.coverage.clone()),
        );
        let query_context = match (&self.query_attention, &memory.query) {
            (Some(attn), Some(q)) => Some(
                attn.forward(
                    q.keys.clone(),
                    q.memory.clone(),
                    q.mask.clone(),
                    query_state,
                    None,
                )
                .0,
            ),
            _ => None,
        };

        let coverage_loss = attention
            .clone()
            .min_pair(state.coverage.clone())
            .sum_dim(1)
            .squeeze::<1>(1);
        let coverage = state.coverage.clone() + attention.clone();

        let mut contexts = vec![context.clone()];
        if let Some(q) = &query_context {
            contexts.push(q.clone());
        }

        let [batch, _] = x.dims();
        let p_gen = match &self.p_gen {
            Some(proj) => {
                let mut feats = contexts.clone();
                feats.extend([lstm.cell.clone(), lstm.hidden.clone(), x]);
                activation::sigmoid(proj.forward(Tensor::cat(feats, 1)))
            }
            None => Tensor::ones([batch, 1], &context.device()),
        };

        let mut out = vec![lstm.hidden.clone()];
        out.extend(contexts);
        let logits = self.out_vocab.forward(self.out_hidden.forward(Tensor::cat(out, 1)));
        let vocab_dist = activation::softmax(logits, 1);

        let final_dist = if self.p_gen.is_some() {
            final_distribution(
                vocab_dist.clone(),
                attention.clone(),
                p_gen.clone(),
                memory.ext_ids.clone(),
                memory.max_oovs,
            )
        } else {
            vocab_dist.clone()
        };

        StepOutput {
            final_dist,
            vocab_dist,
            attention,
            p_gen,
            coverage_loss,
            state: DecoderState {
                lstm,
                context,
                query_context,
                coverage,
            },
        }
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }
}
