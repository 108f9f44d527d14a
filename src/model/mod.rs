pub mod attention;
pub mod beam;
pub mod config;
pub mod decoder;
pub mod embedding;
pub mod encoder;
mod evaluator;
pub mod fusion;
pub mod gcn;
pub mod generator;
pub mod lstm;
pub mod query;
pub mod regularize;
mod trainer;

pub use beam::{BeamResult, BeamSettings};
pub use config::{
    CellVariant, DecoderConfig, EmbedderConfig, EmbeddingCombine, EncoderConfig, EncoderTopology,
    FusionMode, GcnAggregation, GcnConfig, ModelConfig, OptimizerKind, PretrainedFallback,
    QueryEncoderConfig, SequenceEncoderConfig, StateCombine, TrainingConfig,
};
pub use decoder::{final_distribution, DecoderMemory, DecoderState, StepOutput};
pub use embedding::{ContextualProvider, NoContextual, PretrainedTable, PretrainedVectors};
pub use evaluator::{EvalMetrics, Evaluator};
pub use generator::{Encoded, GroundedGenerator, LossOutput};
pub use trainer::{TrainStats, Trainer};
