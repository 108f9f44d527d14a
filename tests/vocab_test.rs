//! Vocabulary and Example Loading Tests

mod common;

use std::io::Write;

use groundgen::data::{load_jsonl, ExtendedVocab, UNK_ID};
use groundgen::{GroundGenError, RawExample, Vocab};

#[test]
fn test_extended_vocab_roundtrip() {
    let vocab = common::test_vocab();
    let source: Vec<String> = ["zorblat", "sat", "on", "quux", "zorblat"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let (ext, ids) = ExtendedVocab::from_source(&vocab, &source);

    assert_eq!(ext.num_oovs(), 2);
    assert_eq!(ids[0], ids[4], "repeated OOV shares its id");
    assert_eq!(ids[0], vocab.len());
    assert_eq!(ids[3], vocab.len() + 1);
    assert_eq!(ext.resolve_all(&vocab, &ids), source);

    assert_eq!(ext.target_id(&vocab, "quux", true), vocab.len() + 1);
    assert_eq!(ext.target_id(&vocab, "quux", false), UNK_ID);
    assert_eq!(ext.target_id(&vocab, "never-seen", true), UNK_ID);
    assert_eq!(ext.resolve(&vocab, vocab.len() + 2), None);
}

#[test]
fn test_vocab_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vocab.json");

    let vocab = common::test_vocab();
    vocab.save(&path).unwrap();
    let loaded = Vocab::from_file(&path).unwrap();

    assert_eq!(loaded.tokens(), vocab.tokens());
    assert_eq!(loaded.id("cat"), vocab.id("cat"));
    assert_eq!(loaded.id("zorblat"), UNK_ID);
}

#[test]
fn test_missing_vocab_file_reports_path() {
    let err = Vocab::from_file("/definitely/not/here.json").unwrap_err();
    assert!(matches!(err, GroundGenError::FileRead { .. }));
}

#[test]
fn test_load_jsonl_skips_blank_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("train.jsonl");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, r#"{{"source": ["the", "cat"], "target": ["cat"]}}"#).unwrap();
    writeln!(file).unwrap();
    writeln!(
        file,
        r#"{{"source": ["a", "dog"], "query": ["who"], "annotations": {{"dependencies": [{{"head": 1, "dependent": 0}}]}}}}"#
    )
    .unwrap();
    drop(file);

    let examples = load_jsonl(&path).unwrap();
    assert_eq!(examples.len(), 2);
    assert_eq!(examples[0], RawExample::from_tokens(&["the", "cat"], &[], &["cat"]));
    assert_eq!(examples[1].annotations.dependencies.len(), 1);
    assert!(examples[1].target.is_empty());
}

#[test]
fn test_empty_source_is_rejected() {
    let vocab = common::test_vocab();
    let cfg = common::test_model_config(&vocab);
    let builder = groundgen::GraphBuilder::new(cfg.graph_policy);
    let raw = RawExample::from_tokens(&[], &["q"], &["t"]);
    let err = groundgen::EncodedExample::encode(&raw, &vocab, &builder, &cfg).unwrap_err();
    assert!(matches!(err, GroundGenError::EmptySequence { what: "source" }));
}

#[test]
fn test_vocab_size_must_match_model() {
    let vocab = common::test_vocab();
    let mut cfg = common::test_model_config(&vocab);
    cfg.vocab_size = vocab.len() + 3;
    let builder = groundgen::GraphBuilder::new(cfg.graph_policy);
    let raw = &common::test_examples()[0];

    let err = groundgen::EncodedExample::encode(raw, &vocab, &builder, &cfg).unwrap_err();
    assert!(matches!(
        err,
        GroundGenError::VocabSizeMismatch { expected, got } if expected == vocab.len() + 3 && got == vocab.len()
    ));
}

#[test]
fn test_batch_rejects_examples_from_another_vocab() {
    let device = common::test_device();
    let vocab = common::test_vocab();
    let cfg = common::test_model_config(&vocab);
    let examples = common::encode(&common::test_examples(), &vocab, &cfg);
    assert_eq!(examples[0].ext_vocab.base_size(), vocab.len());

    let mut wider = cfg.clone();
    wider.vocab_size = vocab.len() + 1;
    let err = groundgen::Batch::<common::TestBackend>::from_examples(
        &examples,
        &wider,
        &groundgen::model::NoContextual,
        &device,
    )
    .unwrap_err();
    assert!(matches!(err, GroundGenError::VocabSizeMismatch { .. }));
}
