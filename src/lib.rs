//! groundgen: document-grounded generation with a graph-convolutional and
//! recurrent encoder, a query encoder and a pointer-generator decoder.

pub mod backend;
pub mod data;
pub mod error;
pub mod graph;
pub mod model;
pub mod utils;

pub use backend::backend_name;
pub use data::{Batch, EncodedExample, ExtendedVocab, RawExample, Vocab};
pub use error::{GroundGenError, Result};
pub use graph::{Annotations, DocumentGraph, GraphBuilder, GraphPolicy};
pub use model::{
    BeamResult, EvalMetrics, Evaluator, GroundedGenerator, ModelConfig, TrainStats, Trainer,
    TrainingConfig,
};
