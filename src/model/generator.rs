//! The full encoder-decoder.

use burn::{
    module::Module,
    record::CompactRecorder,
    tensor::{backend::Backend, Int, Tensor},
};
use std::path::Path;

use super::beam::{self, BeamResult, BeamSettings};
use super::config::ModelConfig;
use super::decoder::{DecoderMemory, DecoderState, PointerDecoder, StepOutput};
use super::embedding::{Embedder, PretrainedTable};
use super::encoder::HybridEncoder;
use super::fusion::StateCombiner;
use super::query::QueryEncoder;
use super::regularize::l2_penalty;
use crate::data::Batch;
use crate::error::{GroundGenError, Result};

/// Lower bound on gold-token probability inside the log.
pub const PROB_FLOOR: f32 = 1e-10;

/// Encoder output in decoder form.
#[derive(Clone, Debug)]
pub struct Encoded<B: Backend> {
    pub memory: DecoderMemory<B>,
    pub state: DecoderState<B>,
    /// Real source lengths per row.
    pub lens: Vec<usize>,
}

#[derive(Clone, Debug)]
pub struct LossOutput<B: Backend> {
    pub total: Tensor<B, 1>,
    pub nll: Tensor<B, 1>,
    pub coverage: Option<Tensor<B, 1>>,
    pub l2: Option<Tensor<B, 1>>,
}

#[derive(Module, Debug)]
pub struct GroundedGenerator<B: Backend> {
    embedder: Embedder<B>,
    encoder: HybridEncoder<B>,
    query_encoder: Option<QueryEncoder<B>>,
    combiner: Option<StateCombiner<B>>,
    decoder: PointerDecoder<B>,
    attend_query: bool,
    coverage: bool,
    cov_loss_wt: f64,
    beta_l2: f64,
    vocab_size: usize,
    beam_size: usize,
    max_dec_steps: usize,
    min_dec_steps: usize,
    length_penalty: f64,
    coverage_penalty: f64,
}

impl<B: Backend> GroundedGenerator<B> {
    pub fn new(cfg: &ModelConfig, device: &B::Device) -> Result<Self> {
        Self::build(cfg, None, device)
    }

    pub fn with_pretrained(
        cfg: &ModelConfig,
        table: PretrainedTable,
        device: &B::Device,
    ) -> Result<Self> {
        Self::build(cfg, Some(table), device)
    }

    fn build(
        cfg: &ModelConfig,
        table: Option<PretrainedTable>,
        device: &B::Device,
    ) -> Result<Self> {
        let topology = cfg.validate()?;
        let embedder = Embedder::new(cfg, table, device)?;
        let enc_in = cfg.embedding.output_dim();
        let encoder = HybridEncoder::new(cfg, topology, enc_in, device);

        let std = cfg.trunc_norm_init_std;
        let dec_dim = cfg.decoder.hidden_dim;
        let query_encoder = cfg
            .query
            .enabled
            .then(|| QueryEncoder::new(cfg, enc_in, device));
        let combiner = cfg
            .query
            .enabled
            .then(|| StateCombiner::new(cfg.query.combine, dec_dim, std, device));
        let attend_query = cfg.query.enabled && cfg.query.attend;
        let query_dim = match (&query_encoder, attend_query) {
            (Some(q), true) => q.memory_dim(),
            _ => 0,
        };

        let decoder = PointerDecoder::new(
            cfg,
            cfg.embedding.decoder_dim(),
            encoder.memory_dim(),
            query_dim,
            device,
        );

        let dec = &cfg.decoder;
        let model = Self {
            embedder,
            encoder,
            query_encoder,
            combiner,
            decoder,
            attend_query,
            coverage: dec.coverage,
            cov_loss_wt: dec.cov_loss_wt,
            beta_l2: cfg.beta_l2,
            vocab_size: cfg.vocab_size,
            beam_size: dec.beam_size,
            max_dec_steps: dec.max_dec_steps,
            min_dec_steps: dec.min_dec_steps,
            length_penalty: dec.length_penalty,
            coverage_penalty: dec.coverage_penalty,
        };
        tracing::info!(
            params = model.num_params(),
            ?topology,
            pointer_gen = dec.pointer_gen,
            coverage = dec.coverage,
            "model initialised"
        );
        Ok(model)
    }

    /// Writes the weights with burn's compact recorder. The config is saved
    /// separately; loading needs the same one.
    pub fn save_weights(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.clone()
            .save_file(path, &CompactRecorder::new())
            .map_err(|e| GroundGenError::CheckpointSave(format!("{}: {}", path.display(), e)))?;
        tracing::info!(path = %path.display(), "weights saved");
        Ok(())
    }

    pub fn load_weights(
        cfg: &ModelConfig,
        path: impl AsRef<Path>,
        device: &B::Device,
    ) -> Result<Self> {
        let path = path.as_ref();
        let model = Self::new(cfg, device)?
            .load_file(path, &CompactRecorder::new(), device)
            .map_err(|e| GroundGenError::CheckpointLoad(format!("{}: {}", path.display(), e)))?;
        tracing::info!(path = %path.display(), "weights loaded");
        Ok(model)
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn pointer_gen(&self) -> bool {
        self.decoder.pointer_gen()
    }

    pub fn beam_settings(&self) -> BeamSettings {
        BeamSettings {
            beam_size: self.beam_size,
            max_dec_steps: self.max_dec_steps,
            min_dec_steps: self.min_dec_steps,
            length_penalty: self.length_penalty,
            coverage_penalty: self.coverage_penalty,
        }
    }

    pub fn encode(&self, batch: &Batch<B>) -> Result<Encoded<B>> {
        let embedded = self
            .embedder
            .embed_source(batch.enc_ids.clone(), batch.contextual.clone());
        let out = self
            .encoder
            .forward(embedded, batch.enc_mask.clone(), batch.graph.as_ref())?;

        let mut state = out.state;
        let mut query_memory = None;
        if let Some(query_encoder) = &self.query_encoder {
            let query = batch.query.as_ref().ok_or_else(|| {
                GroundGenError::config("query encoder enabled but the batch carries no query")
            })?;
            let q_embedded = self.embedder.embed_query(query.ids.clone());
            let q_out = query_encoder.forward(q_embedded, query.mask.clone(), query.graph.as_ref())?;
            if let Some(combiner) = &self.combiner {
                state = combiner.forward(state, q_out.state);
            }
            if self.attend_query {
                query_memory = Some((q_out.memory, query.mask.clone()));
            }
        }

        let memory = self.decoder.prepare(
            out.memory,
            batch.enc_mask.clone(),
            batch.enc_ext_ids.clone(),
            batch.max_oovs,
            query_memory,
        );
        let state = self.decoder.initial_state(state, &memory);
        Ok(Encoded {
            memory,
            state,
            lens: batch.enc_lens.clone(),
        })
    }

    /// One decoder step. `prev` holds the previous output id per row
    /// (extended ids allowed).
    pub fn decode_step(
        &self,
        prev: Tensor<B, 1, Int>,
        state: &DecoderState<B>,
        memory: &DecoderMemory<B>,
    ) -> StepOutput<B> {
        let emb = self
            .embedder
            .embed_decoder(prev.unsqueeze_dim(1))
            .squeeze::<2>(1);
        self.decoder.step(emb, state, memory)
    }

    /// Teacher-forced loss over the whole batch.
    pub fn forward_loss(&self, batch: &Batch<B>) -> Result<LossOutput<B>> {
        let encoded = self.encode(batch)?;
        let [b, steps] = batch.dec_input.dims();

        let embedded = self.embedder.embed_decoder(batch.dec_input.clone());
        let [_, _, e] = embedded.dims();

        let mut state = encoded.state;
        let mut nll = Vec::with_capacity(steps);
        let mut cov = Vec::with_capacity(steps);
        for t in 0..steps {
            let emb = embedded.clone().slice([0..b, t..t + 1, 0..e]).squeeze::<2>(1);
            let out = self.decoder.step(emb, &state, &encoded.memory);

            let gold = batch.dec_target.clone().slice([0..b, t..t + 1]);
            let p = out.final_dist.gather(1, gold).squeeze::<1>(1);
            nll.push(p.clamp_min(PROB_FLOOR).log().neg());
            cov.push(out.coverage_loss);
            state = out.state;
        }

        let nll = masked_average(Tensor::stack(nll, 1), batch.dec_mask.clone());
        let mut total = nll.clone();

        let coverage = if self.coverage {
            let c = masked_average(Tensor::stack(cov, 1), batch.dec_mask.clone());
            total = total + c.clone().mul_scalar(self.cov_loss_wt);
            Some(c)
        } else {
            None
        };

        let l2 = if self.beta_l2 > 0.0 { l2_penalty(self) } else { None };
        if let Some(l2) = &l2 {
            total = total + l2.clone().mul_scalar(self.beta_l2);
        }

        Ok(LossOutput {
            total,
            nll,
            coverage,
            l2,
        })
    }

    /// Ranked hypotheses per batch row, each row decoded on its own.
    pub fn beam_search(&self, batch: &Batch<B>) -> Result<Vec<Vec<BeamResult>>> {
        self.decode_rows(batch, |memory, state| {
            beam::beam_search(self, memory, state, &self.beam_settings())
        })
    }

    pub fn greedy_decode(&self, batch: &Batch<B>) -> Result<Vec<BeamResult>> {
        self.decode_rows(batch, |memory, state| {
            beam::greedy_decode(self, memory, state, &self.beam_settings())
        })
    }

    fn decode_rows<T>(
        &self,
        batch: &Batch<B>,
        decode: impl Fn(&DecoderMemory<B>, DecoderState<B>) -> T,
    ) -> Result<Vec<T>> {
        let encoded = self.encode(batch)?;
        Ok(encoded
            .lens
            .iter()
            .enumerate()
            .map(|(i, &len)| {
                let memory = encoded.memory.row(i, len);
                let state = encoded.state.row(i).truncate_coverage(len);
                decode(&memory, state)
            })
            .collect())
    }
}

/// Per-example mean over real steps, then the batch mean.
fn masked_average<B: Backend>(values: Tensor<B, 2>, mask: Tensor<B, 2>) -> Tensor<B, 1> {
    let lens = mask.clone().sum_dim(1).clamp_min(1.0);
    let per_example = (values * mask).sum_dim(1) / lens;
    per_example.mean()
}
