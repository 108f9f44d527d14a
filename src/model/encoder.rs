//! Source encoder: GCN and LSTM in the configured topology, then fusion.

use burn::{module::Module, tensor::backend::Backend, tensor::Tensor};

use super::config::{EncoderTopology, FusionMode, ModelConfig};
use super::fusion::{masked_mean, FusionLayer, StateReducer, WordHighway};
use super::gcn::GcnEncoder;
use super::lstm::{LstmState, SequenceEncoder};
use crate::error::{GroundGenError, Result};
use crate::graph::GraphTensors;

#[derive(Clone, Debug)]
pub struct EncoderOutput<B: Backend> {
    /// `[batch, len, memory_dim]`, zero at padding.
    pub memory: Tensor<B, 3>,
    /// At decoder width.
    pub state: LstmState<B>,
}

#[derive(Module, Debug)]
pub struct HybridEncoder<B: Backend> {
    gcn: Option<GcnEncoder<B>>,
    lstm: Option<SequenceEncoder<B>>,
    fusion: Option<FusionLayer<B>>,
    highway: Option<WordHighway<B>>,
    reducer: StateReducer<B>,
    structural_first: bool,
    parallel: bool,
    memory_dim: usize,
}

impl<B: Backend> HybridEncoder<B> {
    pub fn new(
        cfg: &ModelConfig,
        topology: EncoderTopology,
        input_dim: usize,
        device: &B::Device,
    ) -> Self {
        let enc = &cfg.encoder;
        let std = cfg.trunc_norm_init_std;
        let mag = cfg.rand_unif_init_mag;
        let dec_dim = cfg.decoder.hidden_dim;

        let highway = enc.concat_word_embedding;
        let (gcn, lstm, fusion, highway, memory_dim) = match topology {
            EncoderTopology::SequentialOnly => {
                let lstm = SequenceEncoder::new(&enc.lstm, input_dim, mag, device);
                let dim = lstm.output_dim();
                (None, Some(lstm), None, None, dim)
            }
            EncoderTopology::StructuralOnly => {
                let gcn = GcnEncoder::new(&enc.gcn, input_dim, std, device);
                let dim = gcn.output_dim();
                let highway = highway.then(|| WordHighway::projecting(input_dim, dim, std, device));
                (Some(gcn), None, None, highway, dim)
            }
            EncoderTopology::SequentialThenStructural => {
                let lstm = SequenceEncoder::new(&enc.lstm, input_dim, mag, device);
                let seq_dim = lstm.output_dim();
                let gcn = GcnEncoder::new(&enc.gcn, seq_dim, std, device);
                let fusion = FusionLayer::new(enc.fusion, seq_dim, gcn.output_dim(), std, device);
                let dim = fusion.output_dim();
                let highway = highway.then(|| WordHighway::mixing(input_dim, seq_dim, std, device));
                (Some(gcn), Some(lstm), Some(fusion), highway, dim)
            }
            EncoderTopology::StructuralThenSequential => {
                let gcn = GcnEncoder::new(&enc.gcn, input_dim, std, device);
                let gcn_dim = gcn.output_dim();
                let lstm = SequenceEncoder::new(&enc.lstm, gcn_dim, mag, device);
                let fusion = (enc.fusion != FusionMode::None)
                    .then(|| FusionLayer::new(enc.fusion, lstm.output_dim(), gcn_dim, std, device));
                let dim = fusion
                    .as_ref()
                    .map(|f| f.output_dim())
                    .unwrap_or(lstm.output_dim());
                let highway =
                    highway.then(|| WordHighway::projecting(input_dim, gcn_dim, std, device));
                (Some(gcn), Some(lstm), fusion, highway, dim)
            }
            EncoderTopology::Parallel => {
                let lstm = SequenceEncoder::new(&enc.lstm, input_dim, mag, device);
                let gcn = GcnEncoder::new(&enc.gcn, input_dim, std, device);
                let fusion =
                    FusionLayer::new(enc.fusion, lstm.output_dim(), gcn.output_dim(), std, device);
                let dim = fusion.output_dim();
                (Some(gcn), Some(lstm), Some(fusion), None, dim)
            }
        };

        // LSTM final states when there is an LSTM, pooled memory otherwise.
        let state_dim = lstm.as_ref().map(|l| l.output_dim()).unwrap_or(memory_dim);
        let reducer = StateReducer::new(state_dim, dec_dim, std, device);

        tracing::debug!(?topology, memory_dim, "encoder built");
        Self {
            gcn,
            lstm,
            fusion,
            highway,
            reducer,
            structural_first: topology == EncoderTopology::StructuralThenSequential,
            parallel: topology == EncoderTopology::Parallel,
            memory_dim,
        }
    }

    pub fn memory_dim(&self) -> usize {
        self.memory_dim
    }

    pub fn forward(
        &self,
        embedded: Tensor<B, 3>,
        mask: Tensor<B, 2>,
        graph: Option<&GraphTensors<B>>,
    ) -> Result<EncoderOutput<B>> {
        let gcn = match (&self.gcn, graph) {
            (Some(gcn), Some(graph)) => Some((gcn, graph)),
            (Some(_), None) => {
                return Err(GroundGenError::config(
                    "structural encoder enabled but the batch carries no graph",
                ))
            }
            (None, _) => None,
        };

        let (memory, seq) = match (gcn, &self.lstm) {
            (None, Some(lstm)) => {
                let seq = lstm.forward(embedded, mask.clone());
                (seq.outputs.clone(), Some(seq))
            }
            (Some((gcn, graph)), None) => {
                let structural = gcn.forward(embedded.clone(), graph, mask.clone());
                (self.around_gcn(embedded, structural, &mask), None)
            }
            (Some((gcn, graph)), Some(lstm)) if self.structural_first => {
                let structural = gcn.forward(embedded.clone(), graph, mask.clone());
                let structural = self.around_gcn(embedded, structural, &mask);
                let seq = lstm.forward(structural.clone(), mask.clone());
                let memory = match &self.fusion {
                    Some(fusion) => {
                        fusion.forward(seq.outputs.clone(), structural) * mask.clone().unsqueeze_dim(2)
                    }
                    None => seq.outputs.clone(),
                };
                (memory, Some(seq))
            }
            (Some((gcn, graph)), Some(lstm)) => {
                let seq = lstm.forward(embedded.clone(), mask.clone());
                let gcn_input = if self.parallel {
                    embedded
                } else {
                    self.around_gcn(embedded, seq.outputs.clone(), &mask)
                };
                let structural = gcn.forward(gcn_input, graph, mask.clone());
                let memory = match &self.fusion {
                    Some(fusion) => fusion.forward(seq.outputs.clone(), structural),
                    None => structural,
                };
                (memory * mask.clone().unsqueeze_dim(2), Some(seq))
            }
            (None, None) => {
                return Err(GroundGenError::config(
                    "both structural and sequential encoders are skipped",
                ))
            }
        };

        let state = match seq {
            Some(seq) => self.reducer.forward(seq.hidden, seq.cell),
            None => self.reducer.from_pooled(masked_mean(memory.clone(), mask)),
        };
        Ok(EncoderOutput { memory, state })
    }

    fn around_gcn(
        &self,
        embedded: Tensor<B, 3>,
        x: Tensor<B, 3>,
        mask: &Tensor<B, 2>,
    ) -> Tensor<B, 3> {
        match &self.highway {
            Some(highway) => highway.forward(embedded, x) * mask.clone().unsqueeze_dim(2),
            None => x,
        }
    }
}
