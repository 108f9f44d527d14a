//! Per-example graph construction from linguistic annotations.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::policy::GraphPolicy;
use crate::error::{GroundGenError, Result};

/// Dependency arc `head -> dependent`, token positions in the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyArc {
    pub head: usize,
    pub dependent: usize,
    #[serde(default)]
    pub label: Option<String>,
    /// Parser confidence. Absent means a binary (1.0) edge.
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// Half-open token span `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySpan {
    pub start: usize,
    pub end: usize,
    pub entity: String,
}

/// Precomputed annotations for one token sequence. Only the part used by
/// the active policy needs to be filled in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotations {
    #[serde(default)]
    pub dependencies: Vec<DependencyArc>,
    /// Each chain is the ordered list of its mentions.
    #[serde(default)]
    pub coreference: Vec<Vec<Span>>,
    #[serde(default)]
    pub entities: Vec<EntitySpan>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub src: usize,
    pub dst: usize,
    pub label: usize,
    pub weight: f32,
}

impl Edge {
    pub fn is_self_loop(&self) -> bool {
        self.src == self.dst
    }
}

/// Nodes are the source positions `0..num_nodes`.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentGraph {
    num_nodes: usize,
    edges: Vec<Edge>,
}

impl DocumentGraph {
    /// Builds a graph from a prepared edge list; self-loops are added for
    /// every node that does not already carry one.
    pub fn from_edges(num_nodes: usize, edges: Vec<Edge>) -> Result<Self> {
        for e in &edges {
            if e.src >= num_nodes || e.dst >= num_nodes {
                return Err(GroundGenError::EdgeOutOfRange {
                    src: e.src,
                    dst: e.dst,
                    num_nodes,
                });
            }
        }
        let mut graph = Self { num_nodes, edges };
        graph.add_self_loops();
        Ok(graph)
    }

    fn add_self_loops(&mut self) {
        let looped: HashSet<usize> = self
            .edges
            .iter()
            .filter(|e| e.is_self_loop())
            .map(|e| e.src)
            .collect();
        for node in 0..self.num_nodes {
            if !looped.contains(&node) {
                self.edges.push(Edge {
                    src: node,
                    dst: node,
                    label: 0,
                    weight: 1.0,
                });
            }
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn arcs(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(|e| !e.is_self_loop())
    }

    pub fn has_edge(&self, src: usize, dst: usize) -> bool {
        self.edges.iter().any(|e| e.src == src && e.dst == dst)
    }
}

/// Finite label set for label-conditioned convolution. Id 0 is reserved for
/// labels outside the set (and for self-loops).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelVocab {
    labels: Vec<String>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl LabelVocab {
    pub const OTHER: &'static str = "<other>";

    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut vocab = Self {
            labels: vec![Self::OTHER.to_string()],
            index: HashMap::new(),
        };
        vocab.index.insert(Self::OTHER.to_string(), 0);
        for label in labels {
            let label = label.into();
            if !vocab.index.contains_key(&label) {
                vocab.index.insert(label.clone(), vocab.labels.len());
                vocab.labels.push(label);
            }
        }
        vocab
    }

    pub fn id(&self, label: &str) -> usize {
        if self.index.is_empty() {
            return self.labels.iter().position(|l| l == label).unwrap_or(0);
        }
        self.index.get(label).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Turns annotations into a [`DocumentGraph`] under one policy.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    policy: GraphPolicy,
    labels: Option<LabelVocab>,
}

impl GraphBuilder {
    pub fn new(policy: GraphPolicy) -> Self {
        Self {
            policy,
            labels: None,
        }
    }

    /// Enables labeled edges.
    pub fn with_labels(mut self, labels: LabelVocab) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn policy(&self) -> GraphPolicy {
        self.policy
    }

    pub fn num_labels(&self) -> usize {
        self.labels.as_ref().map(|l| l.len()).unwrap_or(1)
    }

    fn label_id(&self, label: Option<&str>) -> usize {
        match (&self.labels, label) {
            (Some(vocab), Some(label)) => vocab.id(label),
            _ => 0,
        }
    }

    /// `num_nodes` is the (already truncated) source length; anything
    /// pointing past it is dropped.
    pub fn build(&self, num_nodes: usize, annotations: &Annotations) -> DocumentGraph {
        let mut edges = EdgeSet::new(num_nodes);

        match self.policy {
            GraphPolicy::Dependency => {
                for arc in &annotations.dependencies {
                    let weight = arc.confidence.unwrap_or(1.0);
                    let label = self.label_id(arc.label.as_deref());
                    edges.push(arc.head, arc.dependent, label, weight);
                }
            }
            GraphPolicy::Coreference => {
                let label = self.label_id(Some("coref"));
                for chain in &annotations.coreference {
                    for mention in chain {
                        link_span_to_head(&mut edges, mention.start, mention.end, label);
                    }
                    for pair in chain.windows(2) {
                        edges.push(pair[0].start, pair[1].start, label, 1.0);
                    }
                }
            }
            GraphPolicy::Entity => {
                let label = self.label_id(Some("entity"));
                let mut heads: HashMap<&str, Vec<usize>> = HashMap::new();
                for span in &annotations.entities {
                    link_span_to_head(&mut edges, span.start, span.end, label);
                    heads.entry(span.entity.as_str()).or_default().push(span.start);
                }
                let mut grouped: Vec<_> = heads.into_iter().collect();
                grouped.sort_by(|a, b| a.0.cmp(b.0));
                for (_, starts) in grouped {
                    for pair in starts.windows(2) {
                        edges.push(pair[0], pair[1], label, 1.0);
                    }
                }
            }
            GraphPolicy::Lexical { window } => {
                let label = self.label_id(Some("lexical"));
                for i in 0..num_nodes {
                    for j in (i + 1)..num_nodes.min(i + window + 1) {
                        edges.push(i, j, label, 1.0);
                    }
                }
            }
        }

        let dropped = edges.dropped;
        if dropped > 0 {
            tracing::debug!(
                policy = self.policy.name(),
                dropped,
                "edges beyond truncated length dropped"
            );
        }

        let mut graph = DocumentGraph {
            num_nodes,
            edges: edges.edges,
        };
        graph.add_self_loops();
        graph
    }
}

fn link_span_to_head(edges: &mut EdgeSet, start: usize, end: usize, label: usize) {
    for token in (start + 1)..end {
        edges.push(start, token, label, 1.0);
    }
}

struct EdgeSet {
    num_nodes: usize,
    seen: HashSet<(usize, usize, usize)>,
    edges: Vec<Edge>,
    dropped: usize,
}

impl EdgeSet {
    fn new(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            seen: HashSet::new(),
            edges: Vec::new(),
            dropped: 0,
        }
    }

    fn push(&mut self, src: usize, dst: usize, label: usize, weight: f32) {
        if src >= self.num_nodes || dst >= self.num_nodes {
            self.dropped += 1;
            return;
        }
        if self.seen.insert((src, dst, label)) {
            self.edges.push(Edge {
                src,
                dst,
                label,
                weight,
            });
        }
    }
}
