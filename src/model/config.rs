// src/model/config.rs
//! Model and training configuration.
//!
//! Every component constructor takes the validated [`ModelConfig`] by
//! reference. Nothing reads hyperparameters from anywhere else.

use burn::config::Config;
use serde::{Deserialize, Serialize};

use crate::error::{self, GroundGenError};
use crate::graph::GraphPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellVariant {
    Basic,
    /// Layer-normalized gates and cell.
    Normalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GcnAggregation {
    Sum,
    /// Divide by the neighbour count (in + out + self).
    Mean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingCombine {
    Concat,
    /// Element-wise sum; every enabled source must share one width.
    Sum,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PretrainedFallback {
    Zero,
    /// Uniform in `[-scale, scale]`, seeded.
    Random { scale: f32, seed: u64 },
}

/// How the structural and sequential outputs merge into one memory bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FusionMode {
    /// No merge: the last stage's output is the memory bank.
    None,
    /// `ReLU(W [seq; gcn] + b)` back to the sequential width.
    Concat,
    /// `[seq; gcn]` as is, no projection.
    SimpleConcat,
    Gated,
}

/// How the query final state joins the main encoder final state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateCombine {
    Concat,
    Gated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderTopology {
    SequentialOnly,
    StructuralOnly,
    /// GCN over the LSTM outputs.
    SequentialThenStructural,
    /// LSTM over the GCN outputs.
    StructuralThenSequential,
    /// Both over the embeddings, merged by [`FusionMode`].
    Parallel,
}

impl EncoderTopology {
    pub fn has_structural(&self) -> bool {
        !matches!(self, EncoderTopology::SequentialOnly)
    }

    pub fn has_sequential(&self) -> bool {
        !matches!(self, EncoderTopology::StructuralOnly)
    }

    /// True when both branches produce a memory bank that can be merged.
    pub fn fuses(&self) -> bool {
        matches!(
            self,
            EncoderTopology::SequentialThenStructural
                | EncoderTopology::StructuralThenSequential
                | EncoderTopology::Parallel
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OptimizerKind {
    Adagrad { lr: f64 },
    Adam { lr: f64 },
    Momentum { lr: f64, momentum: f64 },
}

impl OptimizerKind {
    pub fn learning_rate(&self) -> f64 {
        match self {
            OptimizerKind::Adagrad { lr }
            | OptimizerKind::Adam { lr }
            | OptimizerKind::Momentum { lr, .. } => *lr,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OptimizerKind::Adagrad { .. } => "adagrad",
            OptimizerKind::Adam { .. } => "adam",
            OptimizerKind::Momentum { .. } => "momentum",
        }
    }
}

/// Embedding sources. Each one is an independent capability; the enabled
/// ones are combined by `combine`.
#[derive(Config, Debug)]
pub struct EmbedderConfig {
    #[config(default = "true")]
    pub trainable: bool,

    #[config(default = "128")]
    pub trainable_dim: usize,

    #[config(default = "false")]
    pub pretrained: bool,

    #[config(default = "100")]
    pub pretrained_dim: usize,

    #[config(default = "false")]
    pub fine_tune_pretrained: bool,

    #[config(default = "PretrainedFallback::Zero")]
    pub fallback: PretrainedFallback,

    #[config(default = "false")]
    pub contextual: bool,

    #[config(default = "256")]
    pub contextual_dim: usize,

    #[config(default = "EmbeddingCombine::Concat")]
    pub combine: EmbeddingCombine,
}

impl EmbedderConfig {
    fn enabled_dims(&self) -> Vec<usize> {
        let mut dims = Vec::new();
        if self.trainable {
            dims.push(self.trainable_dim);
        }
        if self.pretrained {
            dims.push(self.pretrained_dim);
        }
        if self.contextual {
            dims.push(self.contextual_dim);
        }
        dims
    }

    /// Width of the encoder input.
    pub fn output_dim(&self) -> usize {
        let dims = self.enabled_dims();
        match self.combine {
            EmbeddingCombine::Concat => dims.iter().sum(),
            EmbeddingCombine::Sum => dims.first().copied().unwrap_or(0),
        }
    }

    pub fn has_static(&self) -> bool {
        self.trainable || self.pretrained
    }

    /// Width of the decoder input embedding. Decoder tokens go through the
    /// static tables only; without any, the decoder owns a table of
    /// `trainable_dim`.
    pub fn decoder_dim(&self) -> usize {
        let mut dims = Vec::new();
        if self.trainable {
            dims.push(self.trainable_dim);
        }
        if self.pretrained {
            dims.push(self.pretrained_dim);
        }
        match (self.combine, dims.is_empty()) {
            (_, true) => self.trainable_dim,
            (EmbeddingCombine::Concat, false) => dims.iter().sum(),
            (EmbeddingCombine::Sum, false) => dims[0],
        }
    }

    pub fn validate(&self) -> error::Result<()> {
        let dims = self.enabled_dims();
        if dims.is_empty() {
            return Err(GroundGenError::config("no embedding source enabled"));
        }
        if dims.contains(&0) {
            return Err(GroundGenError::config("enabled embedding source has width 0"));
        }
        if self.combine == EmbeddingCombine::Sum && dims.iter().any(|d| *d != dims[0]) {
            return Err(GroundGenError::config(format!(
                "sum-combined embeddings need equal widths, got {:?}",
                dims
            )));
        }
        if !self.has_static() && self.trainable_dim == 0 {
            return Err(GroundGenError::config("decoder embedding width is 0"));
        }
        Ok(())
    }
}

#[derive(Config, Debug)]
pub struct GcnConfig {
    #[config(default = "1")]
    pub num_layers: usize,

    #[config(default = "128")]
    pub hidden_dim: usize,

    #[config(default = "0.1")]
    pub dropout: f64,

    /// Probability of dropping each arc during training.
    #[config(default = "0.0")]
    pub edge_dropout: f64,

    #[config(default = "true")]
    pub gating: bool,

    #[config(default = "true")]
    pub skip: bool,

    #[config(default = "false")]
    pub label_conditioned: bool,

    /// Size of the edge label vocabulary, reserved label included.
    #[config(default = "1")]
    pub num_labels: usize,

    #[config(default = "GcnAggregation::Mean")]
    pub aggregation: GcnAggregation,
}

impl GcnConfig {
    /// Number of weight sets per direction.
    pub fn label_slots(&self) -> usize {
        if self.label_conditioned {
            self.num_labels
        } else {
            1
        }
    }
}

#[derive(Config, Debug)]
pub struct SequenceEncoderConfig {
    #[config(default = "256")]
    pub hidden_dim: usize,

    #[config(default = "1")]
    pub num_layers: usize,

    #[config(default = "true")]
    pub bidirectional: bool,

    #[config(default = "CellVariant::Basic")]
    pub cell: CellVariant,

    /// Between stacked layers only.
    #[config(default = "0.0")]
    pub dropout: f64,
}

impl SequenceEncoderConfig {
    pub fn output_dim(&self) -> usize {
        if self.bidirectional {
            2 * self.hidden_dim
        } else {
            self.hidden_dim
        }
    }
}

#[derive(Config, Debug)]
pub struct EncoderConfig {
    #[config(default = "false")]
    pub skip_structural: bool,

    #[config(default = "false")]
    pub skip_sequential: bool,

    /// Feed the GCN output into the LSTM.
    #[config(default = "false")]
    pub structural_first: bool,

    /// Run GCN and LSTM side by side over the embeddings.
    #[config(default = "false")]
    pub parallel: bool,

    #[config(default = "FusionMode::Concat")]
    pub fusion: FusionMode,

    /// Bring the word embeddings back in around the GCN. Over LSTM outputs
    /// this is a learned scalar mix at the GCN input; when the GCN reads
    /// the embeddings it is `ReLU(W [emb; gcn] + b)` at the GCN output.
    #[config(default = "false")]
    pub concat_word_embedding: bool,

    #[config(default = "GcnConfig::new()")]
    pub gcn: GcnConfig,

    #[config(default = "SequenceEncoderConfig::new()")]
    pub lstm: SequenceEncoderConfig,
}

impl EncoderConfig {
    pub fn topology(&self) -> error::Result<EncoderTopology> {
        match (self.skip_structural, self.skip_sequential) {
            (true, true) => Err(GroundGenError::config(
                "both structural and sequential encoders are skipped",
            )),
            (true, false) => Ok(EncoderTopology::SequentialOnly),
            (false, true) => Ok(EncoderTopology::StructuralOnly),
            (false, false) => match (self.structural_first, self.parallel) {
                (true, true) => Err(GroundGenError::config(
                    "structural_first and parallel are mutually exclusive",
                )),
                (true, false) => Ok(EncoderTopology::StructuralThenSequential),
                (false, true) => Ok(EncoderTopology::Parallel),
                (false, false) => Ok(EncoderTopology::SequentialThenStructural),
            },
        }
    }
}

#[derive(Config, Debug)]
pub struct QueryEncoderConfig {
    #[config(default = "false")]
    pub enabled: bool,

    /// Without the LSTM the raw query embeddings form the query memory.
    #[config(default = "true")]
    pub use_lstm: bool,

    /// Run a GCN over the query graph under the same policy.
    #[config(default = "false")]
    pub graph: bool,

    /// Hyperparameters of the query GCN, independent of the source one.
    #[config(default = "GcnConfig::new()")]
    pub gcn: GcnConfig,

    #[config(default = "StateCombine::Concat")]
    pub combine: StateCombine,

    /// Let the decoder attend over the query memory at every step.
    #[config(default = "true")]
    pub attend: bool,

    #[config(default = "SequenceEncoderConfig::new().with_hidden_dim(128)")]
    pub lstm: SequenceEncoderConfig,
}

impl QueryEncoderConfig {
    /// The query GCN settings when one is built.
    pub fn structural(&self) -> Option<&GcnConfig> {
        (self.enabled && self.graph).then_some(&self.gcn)
    }
}

#[derive(Config, Debug)]
pub struct DecoderConfig {
    #[config(default = "256")]
    pub hidden_dim: usize,

    #[config(default = "true")]
    pub pointer_gen: bool,

    #[config(default = "false")]
    pub coverage: bool,

    #[config(default = "1.0")]
    pub cov_loss_wt: f64,

    #[config(default = "4")]
    pub beam_size: usize,

    #[config(default = "100")]
    pub max_dec_steps: usize,

    #[config(default = "35")]
    pub min_dec_steps: usize,

    /// Exponent of the `((5 + len) / 6)` length normaliser.
    #[config(default = "0.0")]
    pub length_penalty: f64,

    #[config(default = "0.0")]
    pub coverage_penalty: f64,
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    pub vocab_size: usize,

    #[config(default = "400")]
    pub max_enc_steps: usize,

    #[config(default = "50")]
    pub max_query_steps: usize,

    #[config(default = "GraphPolicy::Dependency")]
    pub graph_policy: GraphPolicy,

    #[config(default = "EmbedderConfig::new()")]
    pub embedding: EmbedderConfig,

    #[config(default = "EncoderConfig::new()")]
    pub encoder: EncoderConfig,

    #[config(default = "QueryEncoderConfig::new()")]
    pub query: QueryEncoderConfig,

    #[config(default = "DecoderConfig::new()")]
    pub decoder: DecoderConfig,

    /// Uniform init range for recurrent weights.
    #[config(default = "0.02")]
    pub rand_unif_init_mag: f64,

    /// Std of the truncated-normal-like init for projections.
    #[config(default = "1e-4")]
    pub trunc_norm_init_std: f64,

    /// L2 weight on all trainable parameters. 0 disables the term.
    #[config(default = "0.0")]
    pub beta_l2: f64,
}

impl ModelConfig {
    /// Small everything, for tests and the demo.
    pub fn tiny(vocab_size: usize) -> Self {
        Self::new(vocab_size)
            .with_max_enc_steps(16)
            .with_max_query_steps(8)
            .with_embedding(EmbedderConfig::new().with_trainable_dim(8))
            .with_encoder(
                EncoderConfig::new()
                    .with_gcn(GcnConfig::new().with_hidden_dim(8).with_dropout(0.0))
                    .with_lstm(SequenceEncoderConfig::new().with_hidden_dim(8)),
            )
            .with_query(
                QueryEncoderConfig::new()
                    .with_gcn(GcnConfig::new().with_hidden_dim(6).with_dropout(0.0))
                    .with_lstm(SequenceEncoderConfig::new().with_hidden_dim(6)),
            )
            .with_decoder(
                DecoderConfig::new()
                    .with_hidden_dim(8)
                    .with_beam_size(2)
                    .with_max_dec_steps(6)
                    .with_min_dec_steps(0),
            )
            .with_rand_unif_init_mag(0.1)
            .with_trunc_norm_init_std(0.1)
    }

    /// Sizes of the published pointer-generator setup, with the GCN on top.
    pub fn base(vocab_size: usize) -> Self {
        Self::new(vocab_size)
            .with_embedding(EmbedderConfig::new().with_trainable_dim(128))
            .with_encoder(
                EncoderConfig::new()
                    .with_gcn(GcnConfig::new().with_num_layers(2).with_hidden_dim(256))
                    .with_lstm(SequenceEncoderConfig::new().with_hidden_dim(256)),
            )
            .with_decoder(DecoderConfig::new().with_hidden_dim(256))
    }

    pub fn topology(&self) -> error::Result<EncoderTopology> {
        self.encoder.topology()
    }

    /// Rejects every inconsistent combination before any parameter exists.
    pub fn validate(&self) -> error::Result<EncoderTopology> {
        self.graph_policy.validate()?;
        self.embedding.validate()?;
        let topology = self.topology()?;

        if self.vocab_size <= crate::data::NUM_RESERVED {
            return Err(GroundGenError::config(format!(
                "vocab_size {} leaves no room beyond the reserved tokens",
                self.vocab_size
            )));
        }
        if self.max_enc_steps == 0 {
            return Err(GroundGenError::config("max_enc_steps must be >= 1"));
        }

        if topology.has_structural() {
            check_gcn("encoder.gcn", &self.encoder.gcn)?;
        }
        if self.encoder.concat_word_embedding
            && matches!(topology, EncoderTopology::SequentialOnly | EncoderTopology::Parallel)
        {
            return Err(GroundGenError::config(format!(
                "concat_word_embedding has no effect with the {:?} topology",
                topology
            )));
        }

        if topology.has_sequential() {
            check_recurrent("encoder.lstm", &self.encoder.lstm)?;
        }

        if self.query.graph && !self.query.enabled {
            return Err(GroundGenError::config(
                "query graph requested with the query encoder disabled",
            ));
        }
        if self.query.enabled {
            if self.max_query_steps == 0 {
                return Err(GroundGenError::config("max_query_steps must be >= 1"));
            }
            if self.query.use_lstm {
                check_recurrent("query.lstm", &self.query.lstm)?;
            }
            if self.query.graph {
                check_gcn("query.gcn", &self.query.gcn)?;
            }
        }

        let dec = &self.decoder;
        if dec.hidden_dim == 0 {
            return Err(GroundGenError::config("decoder hidden_dim must be >= 1"));
        }
        if dec.beam_size < 1 {
            return Err(GroundGenError::config("beam_size must be >= 1"));
        }
        if dec.max_dec_steps == 0 {
            return Err(GroundGenError::config("max_dec_steps must be >= 1"));
        }
        if dec.min_dec_steps > dec.max_dec_steps {
            return Err(GroundGenError::config(format!(
                "min_dec_steps {} exceeds max_dec_steps {}",
                dec.min_dec_steps, dec.max_dec_steps
            )));
        }
        if self.beta_l2 < 0.0 || dec.cov_loss_wt < 0.0 {
            return Err(GroundGenError::config("loss weights must be non-negative"));
        }

        Ok(topology)
    }
}

fn check_probability(name: &str, p: f64) -> error::Result<()> {
    if !(0.0..1.0).contains(&p) {
        return Err(GroundGenError::config(format!(
            "{} must be in [0, 1), got {}",
            name, p
        )));
    }
    Ok(())
}

fn check_gcn(name: &str, gcn: &GcnConfig) -> error::Result<()> {
    if gcn.num_layers == 0 {
        return Err(GroundGenError::config(format!("{} enabled with 0 layers", name)));
    }
    if gcn.hidden_dim == 0 {
        return Err(GroundGenError::config(format!("{}.hidden_dim must be >= 1", name)));
    }
    if gcn.label_conditioned && gcn.num_labels == 0 {
        return Err(GroundGenError::config(format!(
            "{}: label-conditioned convolution needs a non-empty label vocabulary",
            name
        )));
    }
    check_probability(&format!("{}.dropout", name), gcn.dropout)?;
    check_probability(&format!("{}.edge_dropout", name), gcn.edge_dropout)
}

fn check_recurrent(name: &str, cfg: &SequenceEncoderConfig) -> error::Result<()> {
    if cfg.hidden_dim == 0 || cfg.num_layers == 0 {
        return Err(GroundGenError::config(format!(
            "{} needs hidden_dim >= 1 and num_layers >= 1",
            name
        )));
    }
    check_probability(&format!("{}.dropout", name), cfg.dropout)
}

#[derive(Config, Debug)]
pub struct TrainingConfig {
    #[config(default = "OptimizerKind::Adagrad { lr: 0.15 }")]
    pub optimizer: OptimizerKind,

    /// Global-norm cap applied before every update.
    #[config(default = "2.0")]
    pub max_grad_norm: f64,

    #[config(default = "16")]
    pub batch_size: usize,

    #[config(default = "42")]
    pub seed: u64,

    #[config(default = "10")]
    pub log_every: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerKind::Adagrad { lr: 0.15 },
            max_grad_norm: 2.0,
            batch_size: 16,
            seed: 42,
            log_every: 10,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> error::Result<()> {
        if self.optimizer.learning_rate() <= 0.0 {
            return Err(GroundGenError::config("learning rate must be positive"));
        }
        if let OptimizerKind::Momentum { momentum, .. } = self.optimizer {
            check_probability("momentum", momentum)?;
        }
        if self.max_grad_norm <= 0.0 {
            return Err(GroundGenError::config("max_grad_norm must be positive"));
        }
        if self.batch_size == 0 {
            return Err(GroundGenError::config("batch_size must be >= 1"));
        }
        Ok(())
    }
}
