//! Collation of encoded examples into padded tensors.

use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::example::EncodedExample;
use super::vocab::PAD_ID;
use crate::error::{GroundGenError, Result};
use crate::graph::{DocumentGraph, GraphTensors};
use crate::model::config::{GcnConfig, ModelConfig};
use crate::model::embedding::ContextualProvider;

#[derive(Debug, Clone)]
pub struct QueryInput<B: Backend> {
    pub ids: Tensor<B, 2, Int>,
    pub mask: Tensor<B, 2>,
    pub graph: Option<GraphTensors<B>>,
}

/// Padded tensors for one batch. Sequence widths are the longest member,
/// not the configured maximum.
#[derive(Debug, Clone)]
pub struct Batch<B: Backend> {
    pub enc_ids: Tensor<B, 2, Int>,
    pub enc_ext_ids: Tensor<B, 2, Int>,
    /// 1.0 at real positions.
    pub enc_mask: Tensor<B, 2>,
    pub enc_lens: Vec<usize>,
    pub graph: Option<GraphTensors<B>>,
    pub query: Option<QueryInput<B>>,
    pub contextual: Option<Tensor<B, 3>>,
    pub dec_input: Tensor<B, 2, Int>,
    pub dec_target: Tensor<B, 2, Int>,
    pub dec_mask: Tensor<B, 2>,
    /// Largest OOV count in the batch.
    pub max_oovs: usize,
}

impl<B: Backend> Batch<B> {
    pub fn from_examples(
        examples: &[EncodedExample],
        cfg: &ModelConfig,
        contextual: &dyn ContextualProvider<B>,
        device: &B::Device,
    ) -> Result<Self> {
        if examples.is_empty() {
            return Err(GroundGenError::EmptyBatch);
        }
        let topology = cfg.topology()?;
        if let Some(e) = examples.iter().find(|e| e.ext_vocab.base_size() != cfg.vocab_size) {
            return Err(GroundGenError::VocabSizeMismatch {
                expected: cfg.vocab_size,
                got: e.ext_vocab.base_size(),
            });
        }

        let enc_len = examples.iter().map(|e| e.source_len()).max().unwrap_or(1);
        let dec_len = examples.iter().map(|e| e.dec_len()).max().unwrap_or(1).max(1);

        let enc_ids = id_tensor(examples.iter().map(|e| &e.source_ids), enc_len, device);
        let enc_ext_ids = id_tensor(examples.iter().map(|e| &e.source_ext_ids), enc_len, device);
        let enc_lens: Vec<usize> = examples.iter().map(|e| e.source_len()).collect();
        let enc_mask = mask_tensor(&enc_lens, enc_len, device);

        let dec_input = id_tensor(examples.iter().map(|e| &e.dec_input), dec_len, device);
        let dec_target = id_tensor(examples.iter().map(|e| &e.dec_target), dec_len, device);
        let dec_lens: Vec<usize> = examples.iter().map(|e| e.dec_len()).collect();
        let dec_mask = mask_tensor(&dec_lens, dec_len, device);

        let graph = if topology.has_structural() {
            let graphs: Vec<&DocumentGraph> = examples.iter().map(|e| &e.graph).collect();
            let num_labels = label_slots(&graphs, &cfg.encoder.gcn)?;
            Some(GraphTensors::from_graphs(&graphs, enc_len, num_labels, device))
        } else {
            None
        };

        let query = if cfg.query.enabled {
            let query_len = examples
                .iter()
                .map(|e| e.query_ids.len())
                .max()
                .unwrap_or(1)
                .max(1);
            let lens: Vec<usize> = examples.iter().map(|e| e.query_ids.len()).collect();
            let graph = if cfg.query.graph {
                let graphs: Vec<&DocumentGraph> = examples
                    .iter()
                    .filter_map(|e| e.query_graph.as_ref())
                    .collect();
                if graphs.len() != examples.len() {
                    return Err(GroundGenError::config(
                        "query graph enabled but an example was encoded without one",
                    ));
                }
                let num_labels = label_slots(&graphs, &cfg.query.gcn)?;
                Some(GraphTensors::from_graphs(&graphs, query_len, num_labels, device))
            } else {
                None
            };
            Some(QueryInput {
                ids: id_tensor(examples.iter().map(|e| &e.query_ids), query_len, device),
                mask: mask_tensor(&lens, query_len, device),
                graph,
            })
        } else {
            None
        };

        let contextual = if cfg.embedding.contextual {
            let sources: Vec<&[String]> =
                examples.iter().map(|e| e.source_tokens.as_slice()).collect();
            let out = contextual.embed(&sources, enc_len, device);
            if let Some(t) = &out {
                let expected = [examples.len(), enc_len, cfg.embedding.contextual_dim];
                if t.dims() != expected {
                    return Err(GroundGenError::ShapeMismatch {
                        expected: format!("{:?}", expected),
                        got: format!("{:?}", t.dims()),
                    });
                }
            }
            out
        } else {
            None
        };

        let max_oovs = examples
            .iter()
            .map(|e| e.ext_vocab.num_oovs())
            .max()
            .unwrap_or(0);

        Ok(Self {
            enc_ids,
            enc_ext_ids,
            enc_mask,
            enc_lens,
            graph,
            query,
            contextual,
            dec_input,
            dec_target,
            dec_mask,
            max_oovs,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.enc_lens.len()
    }

    pub fn enc_len(&self) -> usize {
        self.enc_ids.dims()[1]
    }

    pub fn dec_len(&self) -> usize {
        self.dec_input.dims()[1]
    }
}

fn id_tensor<'a, B: Backend>(
    rows: impl Iterator<Item = &'a Vec<usize>>,
    width: usize,
    device: &B::Device,
) -> Tensor<B, 2, Int> {
    let mut data = Vec::new();
    let mut n = 0;
    for row in rows {
        data.extend(row.iter().take(width).map(|&id| id as i64));
        data.extend(std::iter::repeat(PAD_ID as i64).take(width.saturating_sub(row.len())));
        n += 1;
    }
    Tensor::from_data(TensorData::new(data, [n, width]), device)
}

pub(crate) fn mask_tensor<B: Backend>(
    lens: &[usize],
    width: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let data: Vec<f32> = lens
        .iter()
        .flat_map(|&len| (0..width).map(move |i| if i < len { 1.0 } else { 0.0 }))
        .collect();
    Tensor::from_data(TensorData::new(data, [lens.len(), width]), device)
}

/// Weight sets the graphs need under `gcn`. A label-conditioned GCN has no
/// slot for labels past its vocabulary, so those are rejected.
fn label_slots(graphs: &[&DocumentGraph], gcn: &GcnConfig) -> Result<usize> {
    let slots = gcn.label_slots();
    if gcn.label_conditioned {
        if let Some(label) = graphs
            .iter()
            .flat_map(|g| g.arcs())
            .map(|e| e.label)
            .find(|&l| l >= slots)
        {
            return Err(GroundGenError::LabelOutOfRange {
                label,
                num_labels: slots,
            });
        }
    }
    Ok(slots)
}

/// Splits `0..len` into chunks of `batch_size`, shuffled first when a seed
/// is given. The last chunk may be short.
pub fn batch_indices(len: usize, batch_size: usize, seed: Option<u64>) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..len).collect();
    if let Some(seed) = seed {
        order.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
    }
    order
        .chunks(batch_size.max(1))
        .map(|c| c.to_vec())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_batch_indices_cover_everything_once() {
        let chunks = batch_indices(7, 3, Some(11));
        assert_eq!(chunks.iter().map(|c| c.len()).collect::<Vec<_>>(), vec![3, 3, 1]);
        let mut all: Vec<usize> = chunks.into_iter().flatten().collect();
        all.sort_unstable();
        assert_eq!(all, (0..7).collect::<Vec<_>>());

        assert_eq!(batch_indices(7, 3, Some(11)), batch_indices(7, 3, Some(11)));
        assert_eq!(batch_indices(4, 2, None), vec![vec![0, 1], vec![2, 3]]);
    }

    #[test]
    fn test_mask_tensor_marks_real_positions() {
        let device = Default::default();
        let mask = mask_tensor::<NdArray>(&[2, 3], 3, &device);
        let values: Vec<f32> = mask.into_data().iter::<f32>().collect();
        assert_eq!(values, vec![1.0, 1.0, 0.0, 1.0, 1.0, 1.0]);
    }
}
