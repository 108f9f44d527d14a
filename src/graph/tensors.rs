//! Dense per-batch graph tensors consumed by the GCN.

use burn::tensor::{backend::Backend, Tensor, TensorData};

use super::builder::DocumentGraph;

/// `adjacency[b, l, i, j]` is the weight of the arc `j -> i` with label `l`
/// (row `i` gathers its in-arcs). Self-loops live in `self_loops`, not in the
/// adjacency.
#[derive(Debug, Clone)]
pub struct GraphTensors<B: Backend> {
    pub adjacency: Tensor<B, 4>,
    pub self_loops: Tensor<B, 2>,
    /// in-degree + out-degree + self-loop; 1 at padding so division is safe.
    pub neighbour_count: Tensor<B, 2>,
}

impl<B: Backend> GraphTensors<B> {
    /// Labels at or above `num_labels` collapse onto label 0; batching
    /// rejects them up front for label-conditioned convolution.
    pub fn from_graphs(
        graphs: &[&DocumentGraph],
        max_nodes: usize,
        num_labels: usize,
        device: &B::Device,
    ) -> Self {
        let batch = graphs.len();
        let num_labels = num_labels.max(1);
        let t = max_nodes;

        let mut adjacency = vec![0.0f32; batch * num_labels * t * t];
        let mut self_loops = vec![0.0f32; batch * t];
        let mut counts = vec![0.0f32; batch * t];

        for (b, graph) in graphs.iter().enumerate() {
            for edge in graph.edges() {
                if edge.src >= t || edge.dst >= t {
                    continue;
                }
                if edge.is_self_loop() {
                    self_loops[b * t + edge.src] = edge.weight;
                    counts[b * t + edge.src] += 1.0;
                    continue;
                }
                let label = if edge.label < num_labels { edge.label } else { 0 };
                let idx = ((b * num_labels + label) * t + edge.dst) * t + edge.src;
                adjacency[idx] += edge.weight;
                counts[b * t + edge.src] += 1.0;
                counts[b * t + edge.dst] += 1.0;
            }
            for c in counts[b * t..(b + 1) * t].iter_mut() {
                if *c == 0.0 {
                    *c = 1.0;
                }
            }
        }

        Self {
            adjacency: Tensor::from_data(
                TensorData::new(adjacency, [batch, num_labels, t, t]),
                device,
            ),
            self_loops: Tensor::from_data(TensorData::new(self_loops, [batch, t]), device),
            neighbour_count: Tensor::from_data(TensorData::new(counts, [batch, t]), device),
        }
    }

    pub fn num_labels(&self) -> usize {
        self.adjacency.dims()[1]
    }
}
