//! Data layer: vocabulary, examples, batching.

pub mod batch;
pub mod example;
pub mod oov;
pub mod vocab;

pub use batch::{batch_indices, Batch, QueryInput};
pub use example::{encode_all, load_jsonl, EncodedExample, RawExample};
pub use oov::ExtendedVocab;
pub use vocab::{
    Vocab, NUM_RESERVED, PAD_ID, PAD_TOKEN, START_ID, START_TOKEN, STOP_ID, STOP_TOKEN, UNK_ID,
    UNK_TOKEN,
};
