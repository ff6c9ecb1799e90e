//! Slot storage for regions and adjacencies.
//!
//! Nodes are addressed directly by their label id and edges by a dense index
//! assigned during construction; both live in `Vec<Option<_>>` slots so a
//! merge retires a slot without disturbing the ids of everything else. No
//! slot is ever re-allocated after construction: merges only combine,
//! rename, or retire what the sweep created.

use std::collections::BTreeMap;

use crate::error::RagError;
use crate::features::FeatureCache;

/// Identifier of a region; survivors keep their id across merges.
pub type NodeId = u32;

/// Dense identifier of an adjacency, assigned in construction order.
pub type EdgeId = usize;

#[derive(Clone, Debug)]
pub(crate) struct NodeSlot {
    pub(crate) size: usize,
    pub(crate) cache: FeatureCache,
    pub(crate) exclusion: u32,
    pub(crate) neighbours: BTreeMap<NodeId, EdgeId>,
}

impl NodeSlot {
    pub(crate) fn new(cache: FeatureCache) -> Self {
        Self {
            size: 0,
            cache,
            exclusion: 0,
            neighbours: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct EdgeSlot {
    pub(crate) a: NodeId,
    pub(crate) b: NodeId,
    pub(crate) boundary: Vec<usize>,
    pub(crate) cache: FeatureCache,
    pub(crate) priority: f64,
    pub(crate) generation: u64,
    pub(crate) frozen: bool,
}

impl EdgeSlot {
    pub(crate) fn new(a: NodeId, b: NodeId, cache: FeatureCache) -> Self {
        debug_assert!(a < b);
        Self {
            a,
            b,
            boundary: Vec::new(),
            cache,
            priority: f64::INFINITY,
            generation: 0,
            frozen: false,
        }
    }
}

impl super::Rag {
    pub(crate) fn node_slot(&self, id: NodeId) -> Result<&NodeSlot, RagError> {
        self.nodes
            .get(id as usize)
            .and_then(Option::as_ref)
            .ok_or(RagError::MissingNode { id })
    }

    pub(crate) fn node_slot_mut(&mut self, id: NodeId) -> Result<&mut NodeSlot, RagError> {
        self.nodes
            .get_mut(id as usize)
            .and_then(Option::as_mut)
            .ok_or(RagError::MissingNode { id })
    }

    pub(crate) fn edge_slot(&self, edge: EdgeId) -> Result<&EdgeSlot, RagError> {
        self.edges
            .get(edge)
            .and_then(Option::as_ref)
            .ok_or(RagError::MissingEdge { edge })
    }

    pub(crate) fn edge_slot_mut(&mut self, edge: EdgeId) -> Result<&mut EdgeSlot, RagError> {
        self.edges
            .get_mut(edge)
            .and_then(Option::as_mut)
            .ok_or(RagError::MissingEdge { edge })
    }

    /// Returns whether a node is alive.
    #[must_use]
    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes
            .get(id as usize)
            .is_some_and(Option::is_some)
    }

    /// Returns the live node ids in ascending order.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|_| id as NodeId))
            .collect()
    }

    /// Returns the live edge ids in ascending order.
    #[must_use]
    pub fn edge_ids(&self) -> Vec<EdgeId> {
        self.edges
            .iter()
            .enumerate()
            .filter_map(|(edge, slot)| slot.as_ref().map(|_| edge))
            .collect()
    }

    /// Returns the number of live regions.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.node_count
    }

    /// Returns the number of live adjacencies.
    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.edge_count
    }

    /// Returns the voxel count of a region.
    ///
    /// # Errors
    /// Returns [`RagError::MissingNode`] when the node is not alive.
    pub fn node_size(&self, id: NodeId) -> Result<usize, RagError> {
        Ok(self.node_slot(id)?.size)
    }

    /// Returns the exclusion tag of a region (`0` when unconstrained).
    ///
    /// # Errors
    /// Returns [`RagError::MissingNode`] when the node is not alive.
    pub fn exclusion_tag(&self, id: NodeId) -> Result<u32, RagError> {
        Ok(self.node_slot(id)?.exclusion)
    }

    /// Returns the neighbours of a region in ascending id order.
    ///
    /// # Errors
    /// Returns [`RagError::MissingNode`] when the node is not alive.
    pub fn neighbours(&self, id: NodeId) -> Result<Vec<NodeId>, RagError> {
        Ok(self.node_slot(id)?.neighbours.keys().copied().collect())
    }

    /// Returns the edge between two regions, if they are adjacent.
    #[must_use]
    pub fn edge_between(&self, u: NodeId, v: NodeId) -> Option<EdgeId> {
        self.nodes
            .get(u as usize)
            .and_then(Option::as_ref)
            .and_then(|slot| slot.neighbours.get(&v).copied())
    }

    /// Returns whether two regions are adjacent.
    #[must_use]
    pub fn contains_edge(&self, u: NodeId, v: NodeId) -> bool {
        self.edge_between(u, v).is_some()
    }

    /// Returns the canonical `(lower, higher)` endpoints of an edge.
    ///
    /// # Errors
    /// Returns [`RagError::MissingEdge`] when the edge is not alive.
    pub fn edge_endpoints(&self, edge: EdgeId) -> Result<(NodeId, NodeId), RagError> {
        let slot = self.edge_slot(edge)?;
        Ok((slot.a, slot.b))
    }

    /// Returns the boundary voxels of an edge as linear indices.
    ///
    /// # Errors
    /// Returns [`RagError::MissingEdge`] when the edge is not alive.
    pub fn edge_boundary(&self, edge: EdgeId) -> Result<&[usize], RagError> {
        Ok(&self.edge_slot(edge)?.boundary)
    }

    /// Returns an edge's last computed priority.
    ///
    /// # Errors
    /// Returns [`RagError::MissingEdge`] when the edge is not alive.
    pub fn edge_priority(&self, edge: EdgeId) -> Result<f64, RagError> {
        Ok(self.edge_slot(edge)?.priority)
    }

    /// Returns the feature cache of a region.
    ///
    /// # Errors
    /// Returns [`RagError::MissingNode`] when the node is not alive.
    pub fn node_cache(&self, id: NodeId) -> Result<&FeatureCache, RagError> {
        Ok(&self.node_slot(id)?.cache)
    }

    /// Returns the feature cache of an edge.
    ///
    /// # Errors
    /// Returns [`RagError::MissingEdge`] when the edge is not alive.
    pub fn edge_cache(&self, edge: EdgeId) -> Result<&FeatureCache, RagError> {
        Ok(&self.edge_slot(edge)?.cache)
    }

    pub(crate) fn is_frozen(&self, edge: EdgeId) -> bool {
        self.edges
            .get(edge)
            .and_then(Option::as_ref)
            .is_some_and(|slot| slot.frozen)
    }

    /// Marks an edge as frozen: it will never be proposed again until a
    /// merge rewires it.
    ///
    /// # Errors
    /// Returns [`RagError::MissingEdge`] when the edge is not alive.
    pub fn freeze_edge(&mut self, edge: EdgeId) -> Result<(), RagError> {
        self.edge_slot_mut(edge)?.frozen = true;
        Ok(())
    }
}
