//! The region adjacency graph.
//!
//! Nodes are the current regions of the segmentation, edges the adjacencies
//! between them, each carrying the boundary voxels that separate the pair.
//! Construction sweeps the label volume once; afterwards every mutation is a
//! merge that combines caches, rewires adjacencies, and invalidates queue
//! entries by bumping edge generations.

mod agglomerate;
mod build;
mod graph;
mod merge;
mod queue;

use std::sync::Arc;

use ndarray::{ArrayD, IxDyn};

use crate::error::RagError;
use crate::features::{self, FeatureManager};
use crate::priority::MergePriority;
use crate::volume::{Connectivity, LabelVolume, ProbabilityMap};

pub(crate) use self::graph::{EdgeSlot, NodeSlot};
pub(crate) use self::queue::MergeQueue;

pub use self::agglomerate::{LoopControl, MergeRecord};
pub use self::build::RagBuilder;
pub use self::graph::{EdgeId, NodeId};
pub use self::merge::MergeOutcome;

/// A region adjacency graph over an initial over-segmentation.
///
/// # Examples
/// ```
/// use granita_core::RagBuilder;
/// use ndarray::{ArrayD, IxDyn};
///
/// let labels = ArrayD::from_shape_vec(IxDyn(&[1, 3]), vec![1_u32, 2, 3])?;
/// let probabilities = ArrayD::from_shape_vec(IxDyn(&[1, 3]), vec![0.5_f32, 0.1, 0.5])?;
/// let mut rag = RagBuilder::new().build(&labels, &probabilities)?;
/// assert_eq!(rag.num_nodes(), 3);
/// assert_eq!(rag.num_edges(), 2);
///
/// rag.agglomerate(0.2)?;
/// assert_eq!(rag.num_nodes(), 2);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct Rag {
    labels: LabelVolume,
    probabilities: ProbabilityMap,
    connectivity: Connectivity,
    nozeros: bool,
    feature_manager: Arc<dyn FeatureManager>,
    priority: Arc<dyn MergePriority>,
    nodes: Vec<Option<NodeSlot>>,
    edges: Vec<Option<EdgeSlot>>,
    /// `forward[id]` points at the survivor that absorbed `id`, or at `id`
    /// itself while the node is alive.
    forward: Vec<NodeId>,
    queue: MergeQueue,
    /// Per-voxel merge level; `+inf` until the incident contour disappears.
    ucm: Vec<f64>,
    node_count: usize,
    edge_count: usize,
    labelled_voxels: usize,
}

impl Rag {
    /// Returns the spatial shape of the underlying volumes.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.labels.shape()
    }

    /// Returns the connectivity the graph was built with.
    #[must_use]
    pub fn connectivity(&self) -> Connectivity {
        self.connectivity
    }

    /// Returns whether label `0` is treated as the boundary class.
    #[must_use]
    pub fn nozeros(&self) -> bool {
        self.nozeros
    }

    /// Returns the number of voxels assigned to any region.
    #[must_use]
    pub fn labelled_voxels(&self) -> usize {
        self.labelled_voxels
    }

    /// Returns the feature manager driving the caches.
    #[must_use]
    pub fn feature_manager(&self) -> Arc<dyn FeatureManager> {
        Arc::clone(&self.feature_manager)
    }

    /// Resolves an original label to the region that currently owns it.
    /// Labels absent from the initial volume resolve to themselves.
    #[must_use]
    pub fn current_label(&self, label: NodeId) -> NodeId {
        let mut current = label;
        loop {
            let Some(&next) = self.forward.get(current as usize) else {
                return current;
            };
            if next == current {
                return current;
            }
            current = next;
        }
    }

    /// Returns the boundary-channel probability of every boundary voxel of
    /// an edge.
    ///
    /// # Errors
    /// Returns [`RagError::MissingEdge`] when the edge is not alive.
    pub fn boundary_values(&self, edge: EdgeId) -> Result<Vec<f64>, RagError> {
        let slot = self.edge_slot(edge)?;
        Ok(slot
            .boundary
            .iter()
            .map(|&voxel| f64::from(self.probabilities.scalar(voxel)))
            .collect())
    }

    /// Assembles the classifier feature vector for an edge: left node, right
    /// node, edge, and absolute node difference blocks, in that fixed order.
    ///
    /// # Errors
    /// Returns [`RagError::MissingEdge`] when the edge is not alive and
    /// [`RagError::FeatureContract`] when the feature manager produces
    /// non-finite values.
    pub fn edge_feature_vector(&self, edge: EdgeId) -> Result<Vec<f64>, RagError> {
        features::classifier_features(self.feature_manager.as_ref(), self, edge)
    }

    /// Renders the current segmentation: every voxel's original label mapped
    /// through the merges performed so far. Label `0` passes through when
    /// the graph was built in nozeros mode.
    #[must_use]
    pub fn get_segmentation(&self) -> ArrayD<u32> {
        let data: Vec<u32> = self
            .labels
            .data()
            .iter()
            .map(|&label| {
                if label == 0 && self.nozeros {
                    0
                } else {
                    self.current_label(label)
                }
            })
            .collect();
        ArrayD::from_shape_vec(IxDyn(self.labels.shape()), data)
            .expect("segmentation preserves the label volume shape")
    }

    /// Returns the ultrametric contour map: each boundary voxel carries the
    /// priority at which its incident regions first merged, `+inf` where the
    /// contour never disappeared.
    #[must_use]
    pub fn get_ucm(&self) -> ArrayD<f64> {
        ArrayD::from_shape_vec(IxDyn(self.labels.shape()), self.ucm.clone())
            .expect("contour map preserves the label volume shape")
    }

    /// Recomputes an edge's priority with the configured priority function,
    /// stores it, and enqueues a fresh entry when the edge is mergeable.
    pub(crate) fn refresh_priority(&mut self, edge: EdgeId) -> Result<(), RagError> {
        let priority_fn = Arc::clone(&self.priority);
        let priority = priority_fn.priority(self, edge)?;
        if priority.is_nan() {
            return Err(RagError::FeatureContract {
                context: "merge priority",
            });
        }
        let slot = self.edge_slot_mut(edge)?;
        slot.priority = priority;
        let generation = slot.generation;
        let frozen = slot.frozen;
        if priority.is_finite() && !frozen {
            self.queue.push(priority, edge, generation);
        }
        Ok(())
    }

    /// Discards every queue entry and re-enqueues all live, unfrozen edges
    /// at freshly computed priorities.
    pub(crate) fn rebuild_queue(&mut self) -> Result<(), RagError> {
        self.queue.clear();
        for edge in self.edge_ids() {
            self.refresh_priority(edge)?;
        }
        Ok(())
    }
}
