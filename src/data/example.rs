//! Raw and encoded examples.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::oov::ExtendedVocab;
use super::vocab::{Vocab, START_ID, STOP_ID};
use crate::error::{GroundGenError, Result};
use crate::graph::{Annotations, DocumentGraph, GraphBuilder};
use crate::model::config::ModelConfig;

/// One JSONL line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawExample {
    pub source: Vec<String>,
    #[serde(default)]
    pub query: Vec<String>,
    #[serde(default)]
    pub target: Vec<String>,
    #[serde(default)]
    pub annotations: Annotations,
    #[serde(default)]
    pub query_annotations: Option<Annotations>,
}

impl RawExample {
    pub fn from_tokens(source: &[&str], query: &[&str], target: &[&str]) -> Self {
        let own = |s: &[&str]| s.iter().map(|t| t.to_string()).collect();
        Self {
            source: own(source),
            query: own(query),
            target: own(target),
            ..Default::default()
        }
    }
}

pub fn load_jsonl(path: impl AsRef<Path>) -> Result<Vec<RawExample>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| GroundGenError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let mut examples = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        examples.push(serde_json::from_str(&line)?);
    }
    tracing::info!(path = %path.display(), count = examples.len(), "examples loaded");
    Ok(examples)
}

/// An example after truncation, id mapping and graph construction. Built
/// the same way for training and inference.
#[derive(Debug, Clone)]
pub struct EncodedExample {
    pub source_tokens: Vec<String>,
    /// Base ids, OOV as [`UNK_ID`].
    pub source_ids: Vec<usize>,
    /// Extended ids, OOV as their copy id.
    pub source_ext_ids: Vec<usize>,
    pub query_ids: Vec<usize>,
    /// `[START] + target`, base ids.
    pub dec_input: Vec<usize>,
    /// `target + [STOP]`, extended ids when copying is on.
    pub dec_target: Vec<usize>,
    pub target_tokens: Vec<String>,
    pub ext_vocab: ExtendedVocab,
    pub graph: DocumentGraph,
    pub query_graph: Option<DocumentGraph>,
}

impl EncodedExample {
    pub fn encode(
        raw: &RawExample,
        vocab: &Vocab,
        builder: &GraphBuilder,
        cfg: &ModelConfig,
    ) -> Result<Self> {
        if vocab.len() != cfg.vocab_size {
            return Err(GroundGenError::VocabSizeMismatch {
                expected: cfg.vocab_size,
                got: vocab.len(),
            });
        }
        for gcn in [Some(&cfg.encoder.gcn), cfg.query.structural()].into_iter().flatten() {
            if gcn.label_conditioned && builder.num_labels() > gcn.num_labels {
                return Err(GroundGenError::LabelOutOfRange {
                    label: builder.num_labels() - 1,
                    num_labels: gcn.num_labels,
                });
            }
        }
        if raw.source.is_empty() {
            return Err(GroundGenError::EmptySequence { what: "source" });
        }

        let source_len = raw.source.len().min(cfg.max_enc_steps);
        let source_tokens = raw.source[..source_len].to_vec();
        let source_ids: Vec<usize> = source_tokens.iter().map(|t| vocab.id(t)).collect();
        let (ext_vocab, source_ext_ids) = ExtendedVocab::from_source(vocab, &source_tokens);

        let query_len = raw.query.len().min(cfg.max_query_steps);
        let query_ids = raw.query[..query_len].iter().map(|t| vocab.id(t)).collect();

        let pointer_gen = cfg.decoder.pointer_gen;
        let target_in: Vec<usize> = raw.target.iter().map(|t| vocab.id(t)).collect();
        let target_out: Vec<usize> = raw
            .target
            .iter()
            .map(|t| ext_vocab.target_id(vocab, t, pointer_gen))
            .collect();
        let (dec_input, dec_target) =
            decoder_sequences(&target_in, &target_out, cfg.decoder.max_dec_steps);

        let graph = builder.build(source_len, &raw.annotations);
        let query_graph = if cfg.query.enabled && cfg.query.graph {
            let empty = Annotations::default();
            let annotations = raw.query_annotations.as_ref().unwrap_or(&empty);
            Some(builder.build(query_len, annotations))
        } else {
            None
        };

        if raw.source.len() > source_len || raw.target.len() >= cfg.decoder.max_dec_steps {
            tracing::trace!(
                source = raw.source.len(),
                target = raw.target.len(),
                "example truncated"
            );
        }

        Ok(Self {
            source_tokens,
            source_ids,
            source_ext_ids,
            query_ids,
            dec_input,
            dec_target,
            target_tokens: raw.target.clone(),
            ext_vocab,
            graph,
            query_graph,
        })
    }

    pub fn source_len(&self) -> usize {
        self.source_ids.len()
    }

    pub fn dec_len(&self) -> usize {
        self.dec_input.len()
    }
}

/// Input is `[START] + target`, output `target + [STOP]`. When the input
/// overflows `max_len` both are cut and no `[STOP]` is emitted.
fn decoder_sequences(
    target_in: &[usize],
    target_out: &[usize],
    max_len: usize,
) -> (Vec<usize>, Vec<usize>) {
    let mut input = Vec::with_capacity(target_in.len() + 1);
    input.push(START_ID);
    input.extend_from_slice(target_in);

    let mut output = target_out.to_vec();
    if input.len() > max_len {
        input.truncate(max_len);
        output.truncate(max_len);
    } else {
        output.push(STOP_ID);
    }
    (input, output)
}

/// Encodes every example in parallel. Examples share nothing.
pub fn encode_all(
    raws: &[RawExample],
    vocab: &Vocab,
    builder: &GraphBuilder,
    cfg: &ModelConfig,
) -> Result<Vec<EncodedExample>> {
    raws.par_iter()
        .map(|raw| EncodedExample::encode(raw, vocab, builder, cfg))
        .collect()
}
