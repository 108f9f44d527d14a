//! Demo Command
//!
//! Trains a tiny model for a few epochs on a built-in (or supplied) corpus
//! and beam-decodes every example.

use std::path::Path;
use std::time::Instant;

use burn::module::AutodiffModule;

use groundgen::backend::{default_device, InferBackend, TrainBackend};
use groundgen::data::{batch_indices, encode_all, load_jsonl};
use groundgen::graph::DependencyArc;
use groundgen::model::{NoContextual, OptimizerKind};
use groundgen::utils::format_summary;
use groundgen::{
    Annotations, Batch, EncodedExample, GraphBuilder, ModelConfig, RawExample, Result, Trainer,
    TrainingConfig, Vocab,
};

pub struct DemoArgs<'a> {
    pub data: Option<&'a Path>,
    pub epochs: usize,
    pub beam_size: usize,
    pub batch_size: usize,
    pub seed: u64,
}

fn arcs(pairs: &[(usize, usize)]) -> Annotations {
    Annotations {
        dependencies: pairs
            .iter()
            .map(|&(head, dependent)| DependencyArc {
                head,
                dependent,
                label: None,
                confidence: None,
            })
            .collect(),
        ..Default::default()
    }
}

fn builtin_corpus() -> Vec<RawExample> {
    let mut examples = vec![
        RawExample::from_tokens(
            &["the", "cat", "sat", "on", "the", "mat"],
            &["where", "did", "the", "cat", "sit"],
            &["the", "cat", "sat", "on", "the", "mat"],
        ),
        RawExample::from_tokens(
            &["a", "dog", "ran", "in", "the", "park"],
            &["what", "did", "the", "dog", "do"],
            &["the", "dog", "ran"],
        ),
        RawExample::from_tokens(
            &["zorblat", "visited", "the", "old", "harbour"],
            &["who", "visited", "the", "harbour"],
            &["zorblat", "visited", "the", "harbour"],
        ),
    ];
    examples[0].annotations = arcs(&[(2, 1), (1, 0), (2, 5), (5, 3), (5, 4)]);
    examples[1].annotations = arcs(&[(2, 1), (1, 0), (2, 5), (5, 3), (5, 4)]);
    examples[2].annotations = arcs(&[(1, 0), (1, 4), (4, 2), (4, 3)]);
    examples
}

pub fn execute(args: DemoArgs<'_>) -> Result<()> {
    let raws = match args.data {
        Some(path) => load_jsonl(path)?,
        None => builtin_corpus(),
    };

    // "zorblat" stays out of the vocabulary so it can only be copied.
    let corpus: Vec<&Vec<String>> = raws
        .iter()
        .flat_map(|r| [&r.source, &r.query, &r.target])
        .collect();
    let mut vocab = Vocab::build(corpus.iter().copied(), 64);
    if args.data.is_none() {
        let kept: Vec<String> = vocab.tokens()[groundgen::data::NUM_RESERVED..]
            .iter()
            .filter(|t| t.as_str() != "zorblat")
            .cloned()
            .collect();
        vocab = Vocab::from_words(kept);
    }

    let mut cfg = ModelConfig::tiny(vocab.len());
    cfg.query = cfg.query.clone().with_enabled(true);
    cfg.decoder = cfg
        .decoder
        .clone()
        .with_beam_size(args.beam_size)
        .with_coverage(true);
    cfg.validate()?;

    let builder = GraphBuilder::new(cfg.graph_policy);
    let examples = encode_all(&raws, &vocab, &builder, &cfg)?;

    let train_cfg = TrainingConfig::default()
        .with_optimizer(OptimizerKind::Adam { lr: 1e-2 })
        .with_batch_size(args.batch_size)
        .with_seed(args.seed)
        .with_log_every(5);
    let device = default_device();
    let mut trainer = Trainer::<TrainBackend>::new(&cfg, train_cfg, device.clone())?;

    let start = Instant::now();
    for epoch in 0..args.epochs {
        for chunk in batch_indices(examples.len(), args.batch_size, Some(args.seed + epoch as u64)) {
            let picked: Vec<EncodedExample> = chunk.iter().map(|&i| examples[i].clone()).collect();
            let batch = Batch::<TrainBackend>::from_examples(&picked, &cfg, &NoContextual, &device)?;
            match trainer.train_step(&batch) {
                Ok(_) => {}
                Err(e) if e.is_skipped_update() => continue,
                Err(e) => return Err(e),
            }
        }
    }
    tracing::info!(
        steps = trainer.step(),
        skipped = trainer.skipped_steps(),
        secs = start.elapsed().as_secs_f32(),
        "demo training done"
    );

    let model = trainer.model.valid();
    for (raw, example) in raws.iter().zip(&examples) {
        let batch = Batch::<InferBackend>::from_examples(
            std::slice::from_ref(example),
            &cfg,
            &NoContextual,
            &device,
        )?;
        let results = model.beam_search(&batch)?;
        let Some(best) = results.first().and_then(|r| r.first()) else {
            continue;
        };
        let words = best.words(&vocab, &example.ext_vocab);
        let copied: Vec<bool> = best.tokens.iter().map(|&id| id >= vocab.len()).collect();

        println!("source : {}", raw.source.join(" "));
        println!("query  : {}", raw.query.join(" "));
        println!("target : {}", raw.target.join(" "));
        println!(
            "decoded: {}  (score {:.3}, finished {})",
            format_summary(&words, &copied),
            best.score,
            best.finished
        );
        println!();
    }
    Ok(())
}
