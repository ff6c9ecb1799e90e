//! Graph construction: the single sweep over the label volume.
//!
//! Each voxel accumulates into its region's cache. Adjacent voxel pairs with
//! distinct labels contribute one boundary voxel to the pair's edge: the
//! scan-later member of the pair. In nozeros mode a zero-labelled voxel
//! belongs to no region and is instead the boundary voxel of every distinct
//! pair of nonzero labels around it, so junction voxels contribute to every
//! incident edge.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ndarray::ArrayD;
use tracing::debug;

use crate::error::RagError;
use crate::features::{FeatureManager, MomentsHistogram};
use crate::priority::{BoundaryMedian, MergePriority};
use crate::volume::{Connectivity, LabelVolume, ProbabilityMap, VolumeError};

use super::{EdgeId, EdgeSlot, MergeQueue, NodeId, NodeSlot, Rag};

/// Configures and constructs [`Rag`] instances.
///
/// # Examples
/// ```
/// use granita_core::{Connectivity, RagBuilder};
/// use ndarray::{ArrayD, IxDyn};
///
/// let labels = ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![1_u32, 2, 3, 4])?;
/// let probabilities = ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![0.1_f32, 0.9, 0.8, 0.2])?;
/// let rag = RagBuilder::new()
///     .with_connectivity(Connectivity::Faces)
///     .build(&labels, &probabilities)?;
/// assert_eq!(rag.num_nodes(), 4);
/// assert_eq!(rag.num_edges(), 4);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone)]
pub struct RagBuilder {
    connectivity: Connectivity,
    nozeros: bool,
    feature_manager: Option<Arc<dyn FeatureManager>>,
    priority: Option<Arc<dyn MergePriority>>,
    exclusions: Option<ArrayD<u32>>,
}

impl Default for RagBuilder {
    fn default() -> Self {
        Self {
            connectivity: Connectivity::Faces,
            nozeros: true,
            feature_manager: None,
            priority: None,
            exclusions: None,
        }
    }
}

impl RagBuilder {
    /// Creates a builder with face connectivity, nozeros mode on, the
    /// moments-histogram feature manager, and boundary-median priority.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the neighbourhood used during the construction sweep.
    #[must_use]
    pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Toggles nozeros mode: when on (the default) label `0` is the
    /// boundary class and belongs to no region.
    #[must_use]
    pub fn with_nozeros(mut self, nozeros: bool) -> Self {
        self.nozeros = nozeros;
        self
    }

    /// Overrides the feature manager maintaining node and edge caches.
    #[must_use]
    pub fn with_feature_manager(mut self, manager: Arc<dyn FeatureManager>) -> Self {
        self.feature_manager = Some(manager);
        self
    }

    /// Overrides the merge priority function.
    #[must_use]
    pub fn with_priority(mut self, priority: Arc<dyn MergePriority>) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Supplies an exclusion-tag volume. After the sweep every node is
    /// marked with the most common nonzero tag under its voxels, and edges
    /// between same-tag nodes are deleted.
    #[must_use]
    pub fn with_exclusions(mut self, exclusions: ArrayD<u32>) -> Self {
        self.exclusions = Some(exclusions);
        self
    }

    /// Builds the graph from a label volume and a probability map.
    ///
    /// # Errors
    /// Returns [`RagError::Volume`] for empty or shape-mismatched inputs and
    /// [`RagError::FeatureContract`] when the priority function yields NaN
    /// for an initial edge.
    pub fn build(
        &self,
        labels: &ArrayD<u32>,
        probabilities: &ArrayD<f32>,
    ) -> Result<Rag, RagError> {
        let labels = LabelVolume::from_array(labels)?;
        let probabilities = ProbabilityMap::from_array(probabilities, labels.shape())?;
        let exclusions = match &self.exclusions {
            Some(volume) if volume.shape() != labels.shape() => {
                return Err(RagError::Volume(VolumeError::ShapeMismatch {
                    expected: labels.shape().to_vec(),
                    got: volume.shape().to_vec(),
                }));
            }
            Some(volume) => Some(volume.iter().copied().collect::<Vec<u32>>()),
            None => None,
        };

        let feature_manager = self
            .feature_manager
            .clone()
            .unwrap_or_else(|| Arc::new(MomentsHistogram::new(probabilities.channels())));
        let priority = self
            .priority
            .clone()
            .unwrap_or_else(|| Arc::new(BoundaryMedian));

        let max_label = labels.max_label() as usize;
        let voxels = labels.len();
        let mut rag = Rag {
            nodes: vec![None; max_label + 1],
            edges: Vec::new(),
            forward: (0..=max_label as NodeId).collect(),
            queue: MergeQueue::default(),
            ucm: vec![f64::INFINITY; voxels],
            node_count: 0,
            edge_count: 0,
            labelled_voxels: 0,
            connectivity: self.connectivity,
            nozeros: self.nozeros,
            feature_manager,
            priority,
            labels,
            probabilities,
        };

        let mut sweep = Sweep::new(&mut rag, exclusions);
        sweep.run();
        let votes = sweep.exclusion_votes;
        apply_exclusions(&mut rag, votes);

        rag.rebuild_queue()?;
        debug!(
            nodes = rag.num_nodes(),
            edges = rag.num_edges(),
            voxels = rag.labelled_voxels(),
            "graph constructed"
        );
        Ok(rag)
    }
}

struct Sweep<'a> {
    rag: &'a mut Rag,
    exclusions: Option<Vec<u32>>,
    exclusion_votes: HashMap<NodeId, BTreeMap<u32, usize>>,
    backward_offsets: Vec<Vec<isize>>,
    all_offsets: Vec<Vec<isize>>,
}

impl<'a> Sweep<'a> {
    fn new(rag: &'a mut Rag, exclusions: Option<Vec<u32>>) -> Self {
        let ndim = rag.labels.grid().ndim();
        let backward_offsets: Vec<Vec<isize>> = rag
            .connectivity
            .forward_offsets(ndim)
            .into_iter()
            .map(|offset| offset.into_iter().map(|component| -component).collect())
            .collect();
        let all_offsets = rag.connectivity.all_offsets(ndim);
        Self {
            rag,
            exclusions,
            exclusion_votes: HashMap::new(),
            backward_offsets,
            all_offsets,
        }
    }

    fn run(&mut self) {
        let len = self.rag.labels.len();
        let ndim = self.rag.labels.grid().ndim();
        let mut coords = vec![0_usize; ndim];
        let mut scratch = Vec::new();
        for voxel in 0..len {
            let label = self.rag.labels.label(voxel);
            self.rag.labels.grid().decode_into(voxel, &mut coords);
            if label == 0 && self.rag.nozeros {
                self.junction_voxel(voxel, &coords, &mut scratch);
            } else {
                self.region_voxel(voxel, label, &coords, &mut scratch);
            }
        }
    }

    /// A zero-labelled voxel: boundary of every distinct pair of nonzero
    /// labels around it.
    fn junction_voxel(&mut self, voxel: usize, coords: &[usize], incident: &mut Vec<NodeId>) {
        incident.clear();
        for offset in &self.all_offsets {
            let Some(neighbour) = self.rag.labels.grid().offset_index(coords, offset) else {
                continue;
            };
            let other = self.rag.labels.label(neighbour);
            if other != 0 {
                incident.push(other);
            }
        }
        incident.sort_unstable();
        incident.dedup();
        for left in 0..incident.len() {
            for right in left + 1..incident.len() {
                self.add_boundary(incident[left], incident[right], voxel);
            }
        }
    }

    /// A region voxel: accumulate into the node cache and, looking only at
    /// scan-earlier neighbours, record this voxel as the boundary of every
    /// adjacent pair it completes.
    fn region_voxel(
        &mut self,
        voxel: usize,
        label: NodeId,
        coords: &[usize],
        earlier: &mut Vec<NodeId>,
    ) {
        self.ensure_node(label);
        let value = self.rag.probabilities.value(voxel).to_vec();
        let manager = Arc::clone(&self.rag.feature_manager);
        let slot = self.rag.nodes[label as usize]
            .as_mut()
            .expect("node was just ensured");
        slot.size += 1;
        manager.update_node(&mut slot.cache, &value);
        self.rag.labelled_voxels += 1;

        if let Some(exclusions) = &self.exclusions {
            let tag = exclusions[voxel];
            if tag != 0 {
                *self
                    .exclusion_votes
                    .entry(label)
                    .or_default()
                    .entry(tag)
                    .or_insert(0) += 1;
            }
        }

        earlier.clear();
        for offset in &self.backward_offsets {
            let Some(neighbour) = self.rag.labels.grid().offset_index(coords, offset) else {
                continue;
            };
            let other = self.rag.labels.label(neighbour);
            if other == label || (other == 0 && self.rag.nozeros) {
                continue;
            }
            earlier.push(other);
        }
        earlier.sort_unstable();
        earlier.dedup();
        for index in 0..earlier.len() {
            self.add_boundary(earlier[index], label, voxel);
        }
    }

    fn ensure_node(&mut self, label: NodeId) {
        let slot = &mut self.rag.nodes[label as usize];
        if slot.is_none() {
            *slot = Some(NodeSlot::new(self.rag.feature_manager.create_node_cache()));
            self.rag.node_count += 1;
        }
    }

    fn add_boundary(&mut self, left: NodeId, right: NodeId, voxel: usize) {
        self.ensure_node(left);
        self.ensure_node(right);
        let (lo, hi) = if left < right {
            (left, right)
        } else {
            (right, left)
        };
        let edge = self.ensure_edge(lo, hi);
        let value = self.rag.probabilities.value(voxel).to_vec();
        let manager = Arc::clone(&self.rag.feature_manager);
        let slot = self.rag.edges[edge]
            .as_mut()
            .expect("edge was just ensured");
        manager.update_edge(&mut slot.cache, &value);
        slot.boundary.push(voxel);
    }

    fn ensure_edge(&mut self, lo: NodeId, hi: NodeId) -> EdgeId {
        if let Some(&edge) = self.rag.nodes[lo as usize]
            .as_ref()
            .expect("endpoint exists")
            .neighbours
            .get(&hi)
        {
            return edge;
        }
        let edge = self.rag.edges.len();
        self.rag.edges.push(Some(EdgeSlot::new(
            lo,
            hi,
            self.rag.feature_manager.create_edge_cache(),
        )));
        self.rag.edge_count += 1;
        self.rag.nodes[lo as usize]
            .as_mut()
            .expect("endpoint exists")
            .neighbours
            .insert(hi, edge);
        self.rag.nodes[hi as usize]
            .as_mut()
            .expect("endpoint exists")
            .neighbours
            .insert(lo, edge);
        edge
    }
}

/// Assigns each node its most common nonzero exclusion tag and deletes the
/// edges whose endpoints share one.
fn apply_exclusions(rag: &mut Rag, votes: HashMap<NodeId, BTreeMap<u32, usize>>) {
    for (node, counts) in votes {
        // Ties go to the smaller tag.
        let winner = counts
            .into_iter()
            .max_by(|left, right| left.1.cmp(&right.1).then(right.0.cmp(&left.0)))
            .map(|(tag, _)| tag)
            .unwrap_or(0);
        if let Some(slot) = rag.nodes[node as usize].as_mut() {
            slot.exclusion = winner;
        }
    }

    let conflicting: Vec<EdgeId> = rag
        .edge_ids()
        .into_iter()
        .filter(|&edge| {
            let Ok((a, b)) = rag.edge_endpoints(edge) else {
                return false;
            };
            let tag_a = rag.node_slot(a).map(|slot| slot.exclusion).unwrap_or(0);
            let tag_b = rag.node_slot(b).map(|slot| slot.exclusion).unwrap_or(0);
            tag_a != 0 && tag_a == tag_b
        })
        .collect();
    for edge in conflicting {
        rag.delete_edge(edge);
    }
}

impl Rag {
    pub(crate) fn delete_edge(&mut self, edge: EdgeId) {
        let Some(slot) = self.edges.get_mut(edge).and_then(Option::take) else {
            return;
        };
        if let Some(node) = self.nodes[slot.a as usize].as_mut() {
            node.neighbours.remove(&slot.b);
        }
        if let Some(node) = self.nodes[slot.b as usize].as_mut() {
            node.neighbours.remove(&slot.a);
        }
        self.edge_count -= 1;
    }
}
