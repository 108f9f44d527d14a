//! Beam search and greedy decoding over one example.
//!
//! Each step maps the current generation of hypotheses to the next one;
//! earlier generations are dropped.

use burn::tensor::{backend::Backend, Int, Tensor, TensorData};

use super::decoder::{DecoderMemory, DecoderState};
use super::generator::{GroundedGenerator, PROB_FLOOR};
use crate::data::{ExtendedVocab, Vocab, START_ID, STOP_ID};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeamSettings {
    pub beam_size: usize,
    pub max_dec_steps: usize,
    pub min_dec_steps: usize,
    pub length_penalty: f64,
    pub coverage_penalty: f64,
}

#[derive(Clone, Debug)]
struct Hypothesis<B: Backend> {
    /// Starts with `[START]`.
    tokens: Vec<usize>,
    log_prob: f64,
    state: DecoderState<B>,
}

impl<B: Backend> Hypothesis<B> {
    fn latest(&self) -> usize {
        self.tokens.last().copied().unwrap_or(START_ID)
    }

    fn extend(&self, token: usize, log_prob: f32, state: DecoderState<B>) -> Self {
        let mut tokens = self.tokens.clone();
        tokens.push(token);
        Self {
            tokens,
            log_prob: self.log_prob + log_prob as f64,
            state,
        }
    }
}

/// A decoded sequence in extended ids, without `[START]` and `[STOP]`.
#[derive(Debug, Clone, PartialEq)]
pub struct BeamResult {
    pub tokens: Vec<usize>,
    pub log_prob: f64,
    pub score: f64,
    /// Emitted `[STOP]`.
    pub finished: bool,
    /// Decode step at which the hypothesis left the beam.
    pub completed_at: usize,
}

impl BeamResult {
    pub fn words(&self, vocab: &Vocab, ext_vocab: &ExtendedVocab) -> Vec<String> {
        ext_vocab.resolve_all(vocab, &self.tokens)
    }
}

fn finish<B: Backend>(
    hyp: Hypothesis<B>,
    finished: bool,
    completed_at: usize,
    settings: &BeamSettings,
) -> BeamResult {
    // generated length, [STOP] included
    let generated = hyp.tokens.len().saturating_sub(1).max(1);
    let mut score = hyp.log_prob / ((5.0 + generated as f64) / 6.0).powf(settings.length_penalty);
    if settings.coverage_penalty != 0.0 {
        let coverage: f64 = hyp
            .state
            .coverage
            .clone()
            .clamp(PROB_FLOOR, 1.0)
            .log()
            .sum()
            .into_data()
            .iter::<f32>()
            .map(|v| v as f64)
            .sum();
        score += settings.coverage_penalty * coverage;
    }

    let mut tokens: Vec<usize> = hyp.tokens.into_iter().skip(1).collect();
    if finished {
        tokens.pop();
    }
    BeamResult {
        tokens,
        log_prob: hyp.log_prob,
        score,
        finished,
        completed_at,
    }
}

/// Best `k` entries of a log-probability row, highest first, lower id on ties.
fn top_k(row: &[f32], k: usize) -> Vec<(usize, f32)> {
    let order = |a: &(usize, f32), b: &(usize, f32)| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0));
    let mut entries: Vec<(usize, f32)> = row.iter().copied().enumerate().collect();
    let k = k.min(entries.len());
    if k == 0 {
        return Vec::new();
    }
    if k < entries.len() {
        entries.select_nth_unstable_by(k - 1, order);
        entries.truncate(k);
    }
    entries.sort_by(order);
    entries
}

fn rank_results(results: &mut [BeamResult]) {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(b.log_prob.total_cmp(&a.log_prob))
            .then(a.completed_at.cmp(&b.completed_at))
    });
}

/// Runs one decoder step for every hypothesis at once and returns the
/// per-row log-probabilities and the batched next state.
fn expand<B: Backend>(
    model: &GroundedGenerator<B>,
    memory: &DecoderMemory<B>,
    hyps: &[Hypothesis<B>],
) -> (Vec<Vec<f32>>, DecoderState<B>) {
    let device = memory.ext_ids.device();
    let latest: Vec<i64> = hyps.iter().map(|h| h.latest() as i64).collect();
    let prev = Tensor::<B, 1, Int>::from_data(TensorData::new(latest, [hyps.len()]), &device);
    let states = DecoderState::cat(hyps.iter().map(|h| h.state.clone()).collect());
    let memory = memory.expand(hyps.len());

    let out = model.decode_step(prev, &states, &memory);
    let [rows, width] = out.final_dist.dims();
    let flat: Vec<f32> = out
        .final_dist
        .clamp_min(PROB_FLOOR)
        .log()
        .into_data()
        .iter::<f32>()
        .collect();
    let log_probs = (0..rows)
        .map(|r| flat[r * width..(r + 1) * width].to_vec())
        .collect();
    (log_probs, out.state)
}

/// `memory` and `init` describe a single example (batch of one).
pub fn beam_search<B: Backend>(
    model: &GroundedGenerator<B>,
    memory: &DecoderMemory<B>,
    init: DecoderState<B>,
    settings: &BeamSettings,
) -> Vec<BeamResult> {
    let beam = settings.beam_size.max(1);
    let mut hyps = vec![Hypothesis {
        tokens: vec![START_ID],
        log_prob: 0.0,
        state: init,
    }];
    let mut results = Vec::new();
    let mut steps = 0;

    while steps < settings.max_dec_steps && results.len() < beam && !hyps.is_empty() {
        let (log_probs, next_state) = expand(model, memory, &hyps);

        let mut candidates = Vec::with_capacity(hyps.len() * 2 * beam);
        for (i, hyp) in hyps.iter().enumerate() {
            let state = next_state.row(i);
            for (token, lp) in top_k(&log_probs[i], 2 * beam) {
                candidates.push(hyp.extend(token, lp, state.clone()));
            }
        }
        candidates.sort_by(|a, b| b.log_prob.total_cmp(&a.log_prob));

        let mut live = Vec::with_capacity(beam);
        for cand in candidates {
            if cand.latest() == STOP_ID {
                if steps >= settings.min_dec_steps {
                    results.push(finish(cand, true, steps, settings));
                }
            } else {
                live.push(cand);
            }
            if live.len() == beam || results.len() == beam {
                break;
            }
        }
        hyps = live;
        steps += 1;
    }

    if results.is_empty() {
        results = hyps
            .into_iter()
            .map(|h| finish(h, false, steps, settings))
            .collect();
    }
    rank_results(&mut results);
    results.truncate(beam);
    tracing::trace!(steps, kept = results.len(), "beam search done");
    results
}

/// Arg-max decoding under the same stop rules; matches a beam of one.
pub fn greedy_decode<B: Backend>(
    model: &GroundedGenerator<B>,
    memory: &DecoderMemory<B>,
    init: DecoderState<B>,
    settings: &BeamSettings,
) -> BeamResult {
    let mut hyp = Hypothesis {
        tokens: vec![START_ID],
        log_prob: 0.0,
        state: init,
    };

    for step in 0..settings.max_dec_steps {
        let (log_probs, state) = expand(model, memory, std::slice::from_ref(&hyp));
        let pick = top_k(&log_probs[0], 2)
            .into_iter()
            .find(|(token, _)| *token != STOP_ID || step >= settings.min_dec_steps);
        let Some((token, lp)) = pick else {
            break;
        };
        hyp = hyp.extend(token, lp, state);
        if token == STOP_ID {
            return finish(hyp, true, step, settings);
        }
    }
    finish(hyp, false, settings.max_dec_steps, settings)
}
