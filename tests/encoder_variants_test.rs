//! Encoder Variant Tests
//!
//! Every topology and fusion mode, the word highway, the query encoder
//! options, extra embedding sources and label-conditioned convolution.

mod common;

use burn::tensor::{backend::Backend, ElementConversion, Int, Tensor, TensorData};
use groundgen::data::{encode_all, START_ID, UNK_ID};
use groundgen::graph::{GraphPolicy, LabelVocab};
use groundgen::model::{
    ContextualProvider, FusionMode, NoContextual, PretrainedFallback, PretrainedTable,
    PretrainedVectors,
};
use groundgen::{
    Batch, EncodedExample, GraphBuilder, GroundGenError, GroundedGenerator, ModelConfig, RawExample,
    Trainer, TrainingConfig, Vocab,
};

use common::{TestAutodiffBackend, TestBackend, assert_close, to_vec};

fn with_encoder(
    cfg: &ModelConfig,
    edit: impl FnOnce(groundgen::model::EncoderConfig) -> groundgen::model::EncoderConfig,
) -> ModelConfig {
    ModelConfig {
        encoder: edit(cfg.encoder.clone()),
        ..cfg.clone()
    }
}

/// Encodes the fixtures, checks the loss and a beam decode, and returns the
/// memory width.
fn run(cfg: &ModelConfig) -> usize {
    let device = common::test_device();
    let vocab = common::test_vocab();
    cfg.validate().expect("config should be valid");

    let model = GroundedGenerator::<TestBackend>::new(cfg, &device).unwrap();
    let examples = common::encode(&common::test_examples(), &vocab, cfg);
    let batch = common::make_batch::<TestBackend>(&examples, cfg, &device);

    let encoded = model.encode(&batch).unwrap();
    let [b, t, dim] = encoded.memory.source.memory.dims();
    assert_eq!((b, t), (3, 6));

    let nll: f32 = model.forward_loss(&batch).unwrap().nll.into_scalar().elem();
    assert!(nll.is_finite() && nll > 0.0, "nll {}", nll);

    let rows = model.beam_search(&batch).unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| !r.is_empty()));
    dim
}

#[test]
fn test_structural_only_memory_is_gcn_width() {
    let vocab = common::test_vocab();
    let cfg = with_encoder(&common::test_model_config(&vocab), |e| e.with_skip_sequential(true));
    assert_eq!(run(&cfg), 8);
}

#[test]
fn test_sequential_then_structural_fusion_widths() {
    let vocab = common::test_vocab();
    let base = common::test_model_config(&vocab);

    assert_eq!(run(&base), 16);
    assert_eq!(run(&with_encoder(&base, |e| e.with_fusion(FusionMode::Gated))), 16);
    assert_eq!(run(&with_encoder(&base, |e| e.with_fusion(FusionMode::SimpleConcat))), 24);
    assert_eq!(run(&with_encoder(&base, |e| e.with_fusion(FusionMode::None))), 8);
}

#[test]
fn test_parallel_gated_fusion() {
    let vocab = common::test_vocab();
    let cfg = with_encoder(&common::test_model_config(&vocab), |e| {
        e.with_parallel(true).with_fusion(FusionMode::Gated)
    });
    assert_eq!(run(&cfg), 16);
}

#[test]
fn test_structural_then_sequential_fuses_both_branches() {
    let vocab = common::test_vocab();
    let base = with_encoder(&common::test_model_config(&vocab), |e| e.with_structural_first(true));
    let device = common::test_device();

    let plain = with_encoder(&base, |e| e.with_fusion(FusionMode::None));
    assert_eq!(run(&plain), 16);
    assert_eq!(run(&base), 16);
    assert_eq!(run(&with_encoder(&base, |e| e.with_fusion(FusionMode::SimpleConcat))), 24);

    // the concat projection adds parameters on top of the plain stack
    let params = |cfg: &ModelConfig| {
        burn::module::Module::num_params(&GroundedGenerator::<TestBackend>::new(cfg, &device).unwrap())
    };
    assert_eq!(params(&base) - params(&plain), (16 + 8) * 16 + 16);
}

#[test]
fn test_word_highway_in_every_structural_topology() {
    let vocab = common::test_vocab();
    let base = with_encoder(&common::test_model_config(&vocab), |e| e.with_concat_word_embedding(true));

    assert_eq!(run(&base), 16);
    assert_eq!(run(&with_encoder(&base, |e| e.with_structural_first(true))), 16);
    assert_eq!(run(&with_encoder(&base, |e| e.with_skip_sequential(true))), 8);

    let parallel = with_encoder(&base, |e| e.with_parallel(true));
    assert!(matches!(parallel.validate(), Err(GroundGenError::InvalidConfig(_))));
}

#[test]
fn test_query_encoder_variants() {
    let device = common::test_device();
    let vocab = common::test_vocab();
    let base = common::test_model_config(&vocab);

    for (use_lstm, graph, width) in [(true, false, 12), (true, true, 12), (false, true, 6), (false, false, 8)] {
        let cfg = ModelConfig {
            query: base
                .query
                .clone()
                .with_enabled(true)
                .with_use_lstm(use_lstm)
                .with_graph(graph),
            ..base.clone()
        };
        assert_eq!(run(&cfg), 16);

        let model = GroundedGenerator::<TestBackend>::new(&cfg, &device).unwrap();
        let examples = common::encode(&common::test_examples(), &vocab, &cfg);
        assert_eq!(examples[0].query_graph.is_some(), graph);
        let batch = common::make_batch::<TestBackend>(&examples, &cfg, &device);
        let query = model.encode(&batch).unwrap().memory.query.expect("query memory");
        assert_eq!(query.memory.dims(), [3, 5, width], "lstm {} graph {}", use_lstm, graph);
    }
}

#[test]
fn test_query_graph_missing_from_batch_is_an_error() {
    let device = common::test_device();
    let vocab = common::test_vocab();
    let base = common::test_model_config(&vocab);
    let cfg = ModelConfig {
        query: base.query.clone().with_enabled(true).with_graph(true),
        ..base
    };
    let model = GroundedGenerator::<TestBackend>::new(&cfg, &device).unwrap();
    let examples = common::encode(&common::test_examples(), &vocab, &cfg);

    let mut batch = common::make_batch::<TestBackend>(&examples, &cfg, &device);
    if let Some(query) = batch.query.as_mut() {
        query.graph = None;
    }
    assert!(matches!(model.encode(&batch), Err(GroundGenError::InvalidConfig(_))));

    batch.query = None;
    assert!(matches!(model.forward_loss(&batch), Err(GroundGenError::InvalidConfig(_))));
}

#[test]
fn test_query_gcn_has_its_own_width() {
    let vocab = common::test_vocab();
    let base = common::test_model_config(&vocab);
    let cfg = ModelConfig {
        query: base
            .query
            .clone()
            .with_enabled(true)
            .with_use_lstm(false)
            .with_graph(true)
            .with_gcn(groundgen::model::GcnConfig::new().with_hidden_dim(5).with_dropout(0.0)),
        ..base
    };
    assert_ne!(cfg.query.gcn.hidden_dim, cfg.encoder.gcn.hidden_dim);

    let device = common::test_device();
    let model = GroundedGenerator::<TestBackend>::new(&cfg, &device).unwrap();
    let examples = common::encode(&common::test_examples(), &vocab, &cfg);
    let batch = common::make_batch::<TestBackend>(&examples, &cfg, &device);
    let query = model.encode(&batch).unwrap().memory.query.expect("query memory");
    assert_eq!(query.memory.dims()[2], 5);
}

fn labeled_examples() -> Vec<RawExample> {
    let mut raws = common::test_examples();
    for raw in raws.iter_mut() {
        for arc in raw.annotations.dependencies.iter_mut() {
            arc.label = Some(if arc.head == 0 { "root".into() } else { "next".into() });
        }
    }
    raws
}

fn label_conditioned(vocab: &Vocab, edge_dropout: f64) -> (ModelConfig, GraphBuilder) {
    let builder = GraphBuilder::new(GraphPolicy::Dependency)
        .with_labels(LabelVocab::from_labels(["root", "next"]));
    let cfg = with_encoder(&common::test_model_config(vocab), |e| {
        let gcn = e
            .gcn
            .clone()
            .with_label_conditioned(true)
            .with_num_labels(builder.num_labels())
            .with_edge_dropout(edge_dropout);
        e.with_gcn(gcn)
    });
    (cfg, builder)
}

#[test]
fn test_label_conditioned_gcn_trains_with_edge_dropout() {
    let device = common::test_device();
    let vocab = common::test_vocab();
    let (cfg, builder) = label_conditioned(&vocab, 0.5);
    let examples = encode_all(&labeled_examples(), &vocab, &builder, &cfg).unwrap();
    assert!(examples[0].graph.arcs().any(|e| e.label == 2));

    let batch: Batch<TestAutodiffBackend> = common::make_batch(&examples, &cfg, &device);
    assert_eq!(batch.graph.as_ref().map(|g| g.num_labels()), Some(3));

    let mut trainer: Trainer<TestAutodiffBackend> =
        Trainer::new(&cfg, TrainingConfig::default(), device.clone()).unwrap();
    for _ in 0..3 {
        let stats = trainer.train_step(&batch).unwrap();
        assert!(stats.loss.is_finite());
        assert!(stats.grad_norm > 0.0);
    }
    assert_eq!(trainer.step(), 3);
}

#[test]
fn test_edge_dropout_is_off_at_inference() {
    let device = common::test_device();
    let vocab = common::test_vocab();
    let (cfg, builder) = label_conditioned(&vocab, 0.5);
    let examples = encode_all(&labeled_examples(), &vocab, &builder, &cfg).unwrap();
    let batch = common::make_batch::<TestBackend>(&examples, &cfg, &device);

    let model = GroundedGenerator::<TestBackend>::new(&cfg, &device).unwrap();
    let a = to_vec(model.encode(&batch).unwrap().memory.source.memory);
    let b = to_vec(model.encode(&batch).unwrap().memory.source.memory);
    assert_eq!(a, b);
}

#[test]
fn test_pretrained_table_joins_the_embeddings() {
    let device = common::test_device();
    let vocab = common::test_vocab();
    let base = common::test_model_config(&vocab);
    let cfg = ModelConfig {
        embedding: base.embedding.clone().with_pretrained(true).with_pretrained_dim(4),
        ..base
    };

    let mut vectors = PretrainedVectors::new(4);
    vectors.insert("cat", vec![0.5, -0.5, 0.25, 0.0]).unwrap();
    let table = PretrainedTable::from_vectors(&vocab, &vectors, PretrainedFallback::Zero);
    let model = GroundedGenerator::<TestBackend>::with_pretrained(&cfg, table, &device).unwrap();

    let examples = common::encode(&common::test_examples(), &vocab, &cfg);
    let batch = common::make_batch::<TestBackend>(&examples, &cfg, &device);
    let nll: f32 = model.forward_loss(&batch).unwrap().nll.into_scalar().elem();
    assert!(nll.is_finite());

    let short = PretrainedTable::fallback(vocab.len() - 1, 4, PretrainedFallback::Zero);
    let err = GroundedGenerator::<TestBackend>::with_pretrained(&cfg, short, &device).unwrap_err();
    assert!(matches!(err, GroundGenError::ShapeMismatch { .. }));
}

/// Returns a constant block for every real position.
struct ConstantContext {
    dim: usize,
    value: f32,
}

impl<B: Backend> ContextualProvider<B> for ConstantContext {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, sources: &[&[String]], max_len: usize, device: &B::Device) -> Option<Tensor<B, 3>> {
        let data: Vec<f32> = sources
            .iter()
            .flat_map(|s| (0..max_len * self.dim).map(move |i| if i / self.dim < s.len() { self.value } else { 0.0 }))
            .collect();
        Some(Tensor::from_data(
            TensorData::new(data, [sources.len(), max_len, self.dim]),
            device,
        ))
    }
}

#[test]
fn test_contextual_provider_feeds_the_encoder() {
    let device = common::test_device();
    let vocab = common::test_vocab();
    let base = common::test_model_config(&vocab);
    let cfg = ModelConfig {
        embedding: base.embedding.clone().with_contextual(true).with_contextual_dim(3),
        ..base
    };
    let model = GroundedGenerator::<TestBackend>::new(&cfg, &device).unwrap();
    let examples = common::encode(&common::test_examples(), &vocab, &cfg);

    let provider = ConstantContext { dim: 3, value: 1.0 };
    let batch = Batch::<TestBackend>::from_examples(&examples, &cfg, &provider, &device).unwrap();
    assert_eq!(batch.contextual.as_ref().map(|c| c.dims()), Some([3, 6, 3]));
    let zeros = Batch::<TestBackend>::from_examples(&examples, &cfg, &NoContextual, &device).unwrap();
    assert!(zeros.contextual.is_none());

    let with = to_vec(model.encode(&batch).unwrap().memory.source.memory);
    let without = to_vec(model.encode(&zeros).unwrap().memory.source.memory);
    assert!(with.iter().zip(&without).any(|(a, b)| (a - b).abs() > 1e-6));

    let wrong = ConstantContext { dim: 2, value: 1.0 };
    let err = Batch::<TestBackend>::from_examples(&examples, &cfg, &wrong, &device).unwrap_err();
    assert!(matches!(err, GroundGenError::ShapeMismatch { .. }));
}

#[test]
fn test_batch_loss_is_mean_of_example_losses() {
    let device = common::test_device();
    let vocab = common::test_vocab();
    let cfg = common::test_model_config(&vocab);
    let cfg = ModelConfig {
        decoder: cfg.decoder.clone().with_coverage(true),
        ..cfg
    };
    let model = GroundedGenerator::<TestBackend>::new(&cfg, &device).unwrap();

    let raws = common::test_examples();
    let pair = common::encode(&[raws[2].clone(), raws[0].clone()], &vocab, &cfg);
    assert!(pair[0].source_len() < pair[1].source_len());
    assert!(pair[0].dec_len() < pair[1].dec_len());

    let loss = |examples: &[EncodedExample]| {
        let out = model
            .forward_loss(&common::make_batch::<TestBackend>(examples, &cfg, &device))
            .unwrap();
        let cov = out.coverage.map(|c| c.into_scalar().elem::<f32>()).unwrap_or(0.0);
        (out.nll.into_scalar().elem::<f32>(), cov)
    };
    let (short_nll, short_cov) = loss(&pair[..1]);
    let (long_nll, long_cov) = loss(&pair[1..]);
    let (both_nll, both_cov) = loss(&pair);

    assert_close(&[both_nll], &[(short_nll + long_nll) / 2.0], 1e-5);
    assert_close(&[both_cov], &[(short_cov + long_cov) / 2.0], 1e-5);
}

#[test]
fn test_source_oov_target_is_copied() {
    let device = common::test_device();
    let vocab = common::test_vocab();
    let cfg = common::test_model_config(&vocab);
    let model = GroundedGenerator::<TestBackend>::new(&cfg, &device).unwrap();

    // source "zorblat ran in the park", target "zorblat ran"
    let examples = common::encode(&common::test_examples()[1..2], &vocab, &cfg);
    let copy_id = vocab.len();
    assert_eq!(examples[0].source_ext_ids[0], copy_id);
    assert_eq!(examples[0].dec_target[0], copy_id);
    assert_eq!(examples[0].source_ids[0], UNK_ID);

    let batch = common::make_batch::<TestBackend>(&examples, &cfg, &device);
    let encoded = model.encode(&batch).unwrap();
    let prev = Tensor::<TestBackend, 1, Int>::from_data(TensorData::new(vec![START_ID as i64], [1]), &device);
    let out = model.decode_step(prev, &encoded.state, &encoded.memory);

    let dist = to_vec(out.final_dist.clone());
    let attention = to_vec(out.attention.clone());
    let vocab_dist = to_vec(out.vocab_dist.clone());
    let p_gen = to_vec(out.p_gen.clone())[0];

    assert_eq!(dist.len(), vocab.len() + 1);
    assert!(dist[copy_id] > dist[UNK_ID], "copy {} vs unk {}", dist[copy_id], dist[UNK_ID]);
    assert_close(&[dist[copy_id]], &[(1.0 - p_gen) * attention[0]], 1e-6);
    // [UNK] only gets generation mass; the OOV copy went to its own slot
    assert_close(&[dist[UNK_ID]], &[p_gen * vocab_dist[UNK_ID]], 1e-6);
    assert_close(&[dist.iter().sum::<f32>()], &[1.0], 1e-5);

    let gold = model.forward_loss(&batch).unwrap();
    assert!(gold.nll.into_scalar().elem::<f32>().is_finite());
}
