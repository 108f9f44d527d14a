//! Document graphs: policy selection, construction and batching.

pub mod builder;
pub mod policy;
pub mod tensors;

pub use builder::{
    Annotations, DependencyArc, DocumentGraph, Edge, EntitySpan, GraphBuilder, LabelVocab, Span,
};
pub use policy::{GraphPolicy, GraphPolicyFlags};
pub use tensors::GraphTensors;
