//! Embedding provider: trainable lookup, static pretrained vectors and an
//! optional contextual encoder, combined per [`EmbedderConfig`].

use burn::{
    module::{Module, Param},
    nn::{Embedding, EmbeddingConfig, Initializer},
    tensor::{backend::Backend, module::embedding, Int, Tensor, TensorData},
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::Once;

use super::config::{EmbedderConfig, EmbeddingCombine, ModelConfig, PretrainedFallback};
use crate::data::{Vocab, PAD_ID, UNK_ID};
use crate::error::{GroundGenError, Result};

// ============================================================
// CONTEXTUAL PROVIDER
// ============================================================

/// External contextual encoder, called once per batch with the (truncated)
/// source tokens. Must return `[batch, max_len, dim]` or `None` when it has
/// nothing to offer.
pub trait ContextualProvider<B: Backend> {
    fn dim(&self) -> usize;

    fn embed(&self, sources: &[&[String]], max_len: usize, device: &B::Device)
        -> Option<Tensor<B, 3>>;
}

/// No contextual encoder. The embedder fills the contextual block with zeros.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContextual;

impl<B: Backend> ContextualProvider<B> for NoContextual {
    fn dim(&self) -> usize {
        0
    }

    fn embed(&self, _: &[&[String]], _: usize, _: &B::Device) -> Option<Tensor<B, 3>> {
        None
    }
}

static MISSING_CONTEXTUAL: Once = Once::new();

// ============================================================
// PRETRAINED TABLES
// ============================================================

/// Surface-keyed vectors as handed over by whatever loaded the embedding file.
#[derive(Debug, Clone, Default)]
pub struct PretrainedVectors {
    dim: usize,
    vectors: HashMap<String, Vec<f32>>,
}

impl PretrainedVectors {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            vectors: HashMap::new(),
        }
    }

    pub fn insert(&mut self, token: impl Into<String>, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dim {
            return Err(GroundGenError::ShapeMismatch {
                expected: format!("[{}]", self.dim),
                got: format!("[{}]", vector.len()),
            });
        }
        self.vectors.insert(token.into(), vector);
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn get(&self, token: &str) -> Option<&[f32]> {
        self.vectors.get(token).map(|v| v.as_slice())
    }
}

/// Vocabulary-aligned static table, row `i` for token id `i`.
#[derive(Debug, Clone)]
pub struct PretrainedTable {
    dim: usize,
    rows: usize,
    data: Vec<f32>,
    misses: usize,
}

impl PretrainedTable {
    pub fn from_vectors(
        vocab: &Vocab,
        vectors: &PretrainedVectors,
        fallback: PretrainedFallback,
    ) -> Self {
        let dim = vectors.dim();
        let mut rng = match fallback {
            PretrainedFallback::Random { seed, .. } => Some(ChaCha8Rng::seed_from_u64(seed)),
            PretrainedFallback::Zero => None,
        };
        let mut data = Vec::with_capacity(vocab.len() * dim);
        let mut misses = 0;

        for (id, token) in vocab.tokens().iter().enumerate() {
            if id == PAD_ID {
                data.extend(std::iter::repeat(0.0).take(dim));
                continue;
            }
            match vectors.get(token) {
                Some(v) => data.extend_from_slice(v),
                None => {
                    misses += 1;
                    match (&mut rng, fallback) {
                        (Some(rng), PretrainedFallback::Random { scale, .. }) => {
                            data.extend((0..dim).map(|_| rng.gen_range(-scale..=scale)));
                        }
                        _ => data.extend(std::iter::repeat(0.0).take(dim)),
                    }
                }
            }
        }

        tracing::info!(
            rows = vocab.len(),
            dim,
            misses,
            "pretrained table aligned to vocabulary"
        );

        Self {
            dim,
            rows: vocab.len(),
            data,
            misses,
        }
    }

    /// All-fallback table, for when no embedding file is supplied.
    pub fn fallback(vocab_size: usize, dim: usize, fallback: PretrainedFallback) -> Self {
        let mut data = vec![0.0f32; vocab_size * dim];
        if let PretrainedFallback::Random { scale, seed } = fallback {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            for v in data.iter_mut().skip(dim) {
                *v = rng.gen_range(-scale..=scale);
            }
        }
        Self {
            dim,
            rows: vocab_size,
            data,
            misses: vocab_size,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn misses(&self) -> usize {
        self.misses
    }

    fn into_tensor<B: Backend>(self, device: &B::Device) -> Tensor<B, 2> {
        Tensor::from_data(TensorData::new(self.data, [self.rows, self.dim]), device)
    }
}

// ============================================================
// EMBEDDER
// ============================================================

#[derive(Module, Debug)]
pub struct Embedder<B: Backend> {
    trainable: Option<Embedding<B>>,
    pretrained: Option<Param<Tensor<B, 2>>>,
    /// Decoder lookup when there is no static source to share.
    decoder_table: Option<Embedding<B>>,
    sum_combine: bool,
    contextual_dim: usize,
    vocab_size: usize,
}

impl<B: Backend> Embedder<B> {
    pub fn new(
        cfg: &ModelConfig,
        pretrained: Option<PretrainedTable>,
        device: &B::Device,
    ) -> Result<Self> {
        let emb: &EmbedderConfig = &cfg.embedding;
        let init = Initializer::Normal {
            mean: 0.0,
            std: cfg.trunc_norm_init_std,
        };

        let trainable = emb.trainable.then(|| {
            EmbeddingConfig::new(cfg.vocab_size, emb.trainable_dim)
                .with_initializer(init.clone())
                .init(device)
        });

        let pretrained = if emb.pretrained {
            let table = pretrained.unwrap_or_else(|| {
                tracing::warn!("pretrained embeddings enabled without a table, using fallback rows");
                PretrainedTable::fallback(cfg.vocab_size, emb.pretrained_dim, emb.fallback)
            });
            if table.rows() != cfg.vocab_size || table.dim() != emb.pretrained_dim {
                return Err(GroundGenError::ShapeMismatch {
                    expected: format!("[{}, {}]", cfg.vocab_size, emb.pretrained_dim),
                    got: format!("[{}, {}]", table.rows(), table.dim()),
                });
            }
            let weights = table.into_tensor::<B>(device);
            Some(Param::from_tensor(weights).set_require_grad(emb.fine_tune_pretrained))
        } else {
            None
        };

        let decoder_table = (!emb.has_static()).then(|| {
            EmbeddingConfig::new(cfg.vocab_size, emb.trainable_dim)
                .with_initializer(init)
                .init(device)
        });

        Ok(Self {
            trainable,
            pretrained,
            decoder_table,
            sum_combine: emb.combine == EmbeddingCombine::Sum,
            contextual_dim: if emb.contextual { emb.contextual_dim } else { 0 },
            vocab_size: cfg.vocab_size,
        })
    }

    fn static_parts(&self, ids: Tensor<B, 2, Int>) -> Vec<Tensor<B, 3>> {
        let mut parts = Vec::with_capacity(2);
        if let Some(table) = &self.trainable {
            parts.push(table.forward(ids.clone()));
        }
        if let Some(weights) = &self.pretrained {
            parts.push(embedding(weights.val(), ids));
        }
        parts
    }

    fn combine(&self, parts: Vec<Tensor<B, 3>>) -> Tensor<B, 3> {
        if self.sum_combine {
            Tensor::stack::<4>(parts, 0).sum_dim(0).squeeze(0)
        } else {
            Tensor::cat(parts, 2)
        }
    }

    /// `[batch, len]` source ids to `[batch, len, output_dim]`.
    pub fn embed_source(
        &self,
        ids: Tensor<B, 2, Int>,
        contextual: Option<Tensor<B, 3>>,
    ) -> Tensor<B, 3> {
        let [batch, len] = ids.dims();
        let device = ids.device();
        let mut parts = self.static_parts(ids);

        if self.contextual_dim > 0 {
            let block = contextual.unwrap_or_else(|| {
                MISSING_CONTEXTUAL.call_once(|| {
                    tracing::warn!(
                        dim = self.contextual_dim,
                        "no contextual provider output, substituting zeros"
                    );
                });
                Tensor::zeros([batch, len, self.contextual_dim], &device)
            });
            parts.push(block);
        }

        self.combine(parts)
    }

    /// Query tokens get no contextual encoding; the block stays zero.
    pub fn embed_query(&self, ids: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let [batch, len] = ids.dims();
        let device = ids.device();
        let mut parts = self.static_parts(ids);
        if self.contextual_dim > 0 {
            parts.push(Tensor::zeros([batch, len, self.contextual_dim], &device));
        }
        self.combine(parts)
    }

    /// Decoder-side lookup. Copy ids beyond the base vocabulary read the
    /// `[UNK]` row.
    pub fn embed_decoder(&self, ids: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let oov = ids.clone().greater_equal_elem(self.vocab_size as i64);
        let ids = ids.mask_fill(oov, UNK_ID as i64);

        match &self.decoder_table {
            Some(table) => table.forward(ids),
            None => {
                let parts = self.static_parts(ids);
                self.combine(parts)
            }
        }
    }
}
