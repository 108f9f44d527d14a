//! Graph Construction Tests

mod common;

use groundgen::graph::{
    Annotations, DependencyArc, EntitySpan, GraphBuilder, GraphPolicy, GraphTensors, LabelVocab,
    Span,
};

use common::{TestBackend, to_vec};

#[test]
fn test_lexical_window_edges() {
    let builder = GraphBuilder::new(GraphPolicy::Lexical { window: 2 });
    let graph = builder.build(5, &Annotations::default());

    for i in 0..5 {
        assert!(graph.has_edge(i, i), "self loop at {}", i);
        for j in 0..5 {
            if i == j {
                continue;
            }
            let expected = j > i && j - i <= 2;
            assert_eq!(graph.has_edge(i, j), expected, "edge {} -> {}", i, j);
        }
    }
    assert_eq!(graph.arcs().count(), 4 + 3);
}

#[test]
fn test_dependency_graph_skips_out_of_range_arcs() {
    let annotations = Annotations {
        dependencies: vec![
            DependencyArc { head: 1, dependent: 0, label: Some("nsubj".into()), confidence: None },
            DependencyArc { head: 1, dependent: 7, label: None, confidence: None },
            DependencyArc { head: 1, dependent: 2, label: None, confidence: Some(0.25) },
        ],
        ..Default::default()
    };
    let graph = GraphBuilder::new(GraphPolicy::Dependency).build(3, &annotations);
    assert!(graph.has_edge(1, 0));
    assert!(graph.has_edge(1, 2));
    assert!(!graph.has_edge(0, 1));
    assert_eq!(graph.arcs().count(), 2);

    let weight = graph.arcs().find(|e| e.dst == 2).map(|e| e.weight);
    assert_eq!(weight, Some(0.25));
}

#[test]
fn test_coreference_and_entity_policies_ignore_other_annotations() {
    let annotations = Annotations {
        dependencies: vec![DependencyArc { head: 0, dependent: 1, label: None, confidence: None }],
        coreference: vec![vec![Span { start: 0, end: 1 }, Span { start: 3, end: 4 }]],
        entities: vec![EntitySpan { start: 1, end: 3, entity: "ORG".into() }],
    };

    let coref = GraphBuilder::new(GraphPolicy::Coreference).build(4, &annotations);
    assert!(coref.has_edge(0, 3));
    assert!(!coref.has_edge(0, 1));

    let entity = GraphBuilder::new(GraphPolicy::Entity).build(4, &annotations);
    assert!(entity.has_edge(1, 2));
    assert!(!entity.has_edge(0, 3));
}

#[test]
fn test_graph_tensors_layout() {
    let device = common::test_device();
    let labels = LabelVocab::from_labels(["nsubj"]);
    let annotations = Annotations {
        dependencies: vec![
            DependencyArc { head: 1, dependent: 0, label: Some("nsubj".into()), confidence: None },
            DependencyArc { head: 1, dependent: 2, label: Some("obj".into()), confidence: None },
        ],
        ..Default::default()
    };
    let builder = GraphBuilder::new(GraphPolicy::Dependency).with_labels(labels);
    assert_eq!(builder.num_labels(), 2);
    let graph = builder.build(3, &annotations);

    let tensors = GraphTensors::<TestBackend>::from_graphs(&[&graph], 4, 2, &device);
    assert_eq!(tensors.adjacency.dims(), [1, 2, 4, 4]);
    assert_eq!(tensors.num_labels(), 2);

    // adjacency[b, label, dst, src]
    let adj = to_vec(tensors.adjacency.clone());
    let at = |l: usize, dst: usize, src: usize| adj[l * 16 + dst * 4 + src];
    assert_eq!(at(1, 0, 1), 1.0, "nsubj arc");
    assert_eq!(at(0, 2, 1), 1.0, "unknown label falls back to slot 0");
    assert_eq!(at(0, 3, 3), 0.0);

    let loops = to_vec(tensors.self_loops.clone());
    assert_eq!(loops, vec![1.0, 1.0, 1.0, 0.0]);

    // in + out + self; padding keeps 1 to avoid dividing by zero
    let counts = to_vec(tensors.neighbour_count.clone());
    assert_eq!(counts, vec![2.0, 3.0, 2.0, 1.0]);
}

fn labeled_example() -> groundgen::RawExample {
    let mut raw = groundgen::RawExample::from_tokens(&["the", "cat", "sat"], &[], &["cat"]);
    raw.annotations = Annotations {
        dependencies: vec![
            DependencyArc { head: 1, dependent: 0, label: Some("det".into()), confidence: None },
            DependencyArc { head: 2, dependent: 1, label: Some("nsubj".into()), confidence: None },
        ],
        ..Default::default()
    };
    raw
}

fn label_conditioned(cfg: &groundgen::ModelConfig, num_labels: usize) -> groundgen::ModelConfig {
    let gcn = cfg
        .encoder
        .gcn
        .clone()
        .with_label_conditioned(true)
        .with_num_labels(num_labels);
    groundgen::ModelConfig {
        encoder: cfg.encoder.clone().with_gcn(gcn),
        ..cfg.clone()
    }
}

#[test]
fn test_label_vocab_larger_than_gcn_slots_is_rejected() {
    let vocab = common::test_vocab();
    let cfg = label_conditioned(&common::test_model_config(&vocab), 2);
    let builder = GraphBuilder::new(GraphPolicy::Dependency)
        .with_labels(LabelVocab::from_labels(["det", "nsubj"]));
    assert_eq!(builder.num_labels(), 3);

    let err = groundgen::EncodedExample::encode(&labeled_example(), &vocab, &builder, &cfg).unwrap_err();
    assert!(matches!(
        err,
        groundgen::GroundGenError::LabelOutOfRange { label: 2, num_labels: 2 }
    ));

    // enough slots: encodes and batches
    let cfg = label_conditioned(&cfg, 3);
    let ex = groundgen::EncodedExample::encode(&labeled_example(), &vocab, &builder, &cfg).unwrap();
    let batch = common::make_batch::<TestBackend>(&[ex], &cfg, &common::test_device());
    assert_eq!(batch.graph.map(|g| g.num_labels()), Some(3));
}

#[test]
fn test_batch_rejects_edge_labels_past_gcn_slots() {
    let device = common::test_device();
    let vocab = common::test_vocab();
    let builder = GraphBuilder::new(GraphPolicy::Dependency)
        .with_labels(LabelVocab::from_labels(["det", "nsubj"]));
    let wide = label_conditioned(&common::test_model_config(&vocab), 3);
    let ex = groundgen::EncodedExample::encode(&labeled_example(), &vocab, &builder, &wide).unwrap();

    let narrow = label_conditioned(&wide, 2);
    let err = groundgen::Batch::<TestBackend>::from_examples(
        &[ex.clone()],
        &narrow,
        &groundgen::model::NoContextual,
        &device,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        groundgen::GroundGenError::LabelOutOfRange { label: 2, num_labels: 2 }
    ));

    // without label conditioning every arc shares one slot
    let batch = common::make_batch::<TestBackend>(&[ex], &common::test_model_config(&vocab), &device);
    assert_eq!(batch.graph.map(|g| g.num_labels()), Some(1));
}
