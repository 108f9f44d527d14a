//! Common test utilities and helpers
//!
//! Shared helpers for integration tests.

#![allow(dead_code)]

use burn::backend::ndarray::{NdArray, NdArrayDevice};
use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

use groundgen::graph::DependencyArc;
use groundgen::model::NoContextual;
use groundgen::{Annotations, Batch, EncodedExample, GraphBuilder, ModelConfig, RawExample, Vocab};

pub type TestBackend = NdArray;
pub type TestAutodiffBackend = Autodiff<NdArray>;

pub fn test_device() -> NdArrayDevice {
    NdArrayDevice::Cpu
}

/// Base vocabulary for the fixtures. "zorblat" is deliberately absent.
pub fn test_vocab() -> Vocab {
    Vocab::from_words([
        "the", "cat", "sat", "on", "mat", "dog", "ran", "in", "park", "where", "did", "sit",
    ])
}

/// Tiny dimensions, no dropout, deterministic init.
pub fn test_model_config(vocab: &Vocab) -> ModelConfig {
    ModelConfig::tiny(vocab.len())
}

pub fn chain_annotations(len: usize) -> Annotations {
    Annotations {
        dependencies: (1..len)
            .map(|i| DependencyArc {
                head: i - 1,
                dependent: i,
                label: None,
                confidence: None,
            })
            .collect(),
        ..Default::default()
    }
}

pub fn test_examples() -> Vec<RawExample> {
    let mut examples = vec![
        RawExample::from_tokens(
            &["the", "cat", "sat", "on", "the", "mat"],
            &["where", "did", "the", "cat", "sit"],
            &["the", "cat", "sat"],
        ),
        RawExample::from_tokens(
            &["zorblat", "ran", "in", "the", "park"],
            &["where", "did", "zorblat", "sit"],
            &["zorblat", "ran"],
        ),
        RawExample::from_tokens(&["the", "dog", "sat"], &["where"], &["dog"]),
    ];
    for ex in examples.iter_mut() {
        ex.annotations = chain_annotations(ex.source.len());
    }
    examples
}

pub fn encode(raws: &[RawExample], vocab: &Vocab, cfg: &ModelConfig) -> Vec<EncodedExample> {
    let builder = GraphBuilder::new(cfg.graph_policy);
    groundgen::data::encode_all(raws, vocab, &builder, cfg).expect("encoding failed")
}

pub fn make_batch<B: Backend>(
    examples: &[EncodedExample],
    cfg: &ModelConfig,
    device: &B::Device,
) -> Batch<B> {
    Batch::from_examples(examples, cfg, &NoContextual, device).expect("batching failed")
}

pub fn to_vec<B: Backend, const D: usize>(t: burn::tensor::Tensor<B, D>) -> Vec<f32> {
    t.into_data().iter::<f32>().collect()
}

pub fn assert_close(a: &[f32], b: &[f32], tol: f32) {
    assert_eq!(a.len(), b.len(), "length mismatch");
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        assert!((x - y).abs() <= tol, "index {}: {} vs {}", i, x, y);
    }
}
