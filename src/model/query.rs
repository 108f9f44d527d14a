//! Query encoder over the auxiliary query sequence.

use burn::{module::Module, tensor::backend::Backend, tensor::Tensor};

use super::config::ModelConfig;
use super::fusion::{masked_mean, StateReducer};
use super::gcn::GcnEncoder;
use super::lstm::{LstmState, SequenceEncoder};
use crate::error::{GroundGenError, Result};
use crate::graph::GraphTensors;

#[derive(Clone, Debug)]
pub struct QueryOutput<B: Backend> {
    pub memory: Tensor<B, 3>,
    pub state: LstmState<B>,
}

#[derive(Module, Debug)]
pub struct QueryEncoder<B: Backend> {
    gcn: Option<GcnEncoder<B>>,
    lstm: Option<SequenceEncoder<B>>,
    reducer: StateReducer<B>,
    memory_dim: usize,
}

impl<B: Backend> QueryEncoder<B> {
    pub fn new(cfg: &ModelConfig, input_dim: usize, device: &B::Device) -> Self {
        let q = &cfg.query;
        let std = cfg.trunc_norm_init_std;

        let gcn = q
            .graph
            .then(|| GcnEncoder::new(&q.gcn, input_dim, std, device));
        let gcn_dim = gcn.as_ref().map(|g| g.output_dim()).unwrap_or(input_dim);

        let lstm = q
            .use_lstm
            .then(|| SequenceEncoder::new(&q.lstm, gcn_dim, cfg.rand_unif_init_mag, device));
        let memory_dim = lstm.as_ref().map(|l| l.output_dim()).unwrap_or(gcn_dim);

        Self {
            gcn,
            lstm,
            reducer: StateReducer::new(memory_dim, cfg.decoder.hidden_dim, std, device),
            memory_dim,
        }
    }

    pub fn memory_dim(&self) -> usize {
        self.memory_dim
    }

    /// The graph is read only when this encoder owns a GCN, and then it
    /// must be present.
    pub fn forward(
        &self,
        embedded: Tensor<B, 3>,
        mask: Tensor<B, 2>,
        graph: Option<&GraphTensors<B>>,
    ) -> Result<QueryOutput<B>> {
        let x = match (&self.gcn, graph) {
            (Some(gcn), Some(graph)) => gcn.forward(embedded, graph, mask.clone()),
            (Some(_), None) => {
                return Err(GroundGenError::config(
                    "query graph enabled but the batch carries no query graph",
                ))
            }
            (None, _) => embedded * mask.clone().unsqueeze_dim(2),
        };

        match &self.lstm {
            Some(lstm) => {
                let seq = lstm.forward(x, mask);
                Ok(QueryOutput {
                    memory: seq.outputs,
                    state: self.reducer.forward(seq.hidden, seq.cell),
                })
            }
            None => {
                let pooled = masked_mean(x.clone(), mask);
                Ok(QueryOutput {
                    memory: x,
                    state: self.reducer.from_pooled(pooled),
                })
            }
        }
    }
}
