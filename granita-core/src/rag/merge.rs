//! Merging two regions.
//!
//! The lower id survives. The absorbed node's cache folds into the
//! survivor's, its adjacencies are rewired onto the survivor (combining with
//! an existing survivor edge where one exists, renaming otherwise), and the
//! edge between the pair is retired with its merge level stamped into the
//! contour map. Every rewired edge gets a new generation, a fresh priority,
//! and a new queue entry; entries referring to the old generation die lazily.

use std::sync::Arc;

use crate::error::RagError;
use crate::features::FeatureManager;

use super::{EdgeId, NodeId, Rag};

/// The result of a merge attempt. A forbidden merge is an ordinary outcome,
/// not an error: callers freeze the offending edge and continue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The regions were merged; `survivor` now owns both voxel sets.
    Merged {
        /// The surviving (lower) node id.
        survivor: NodeId,
    },
    /// Both regions carry the same nonzero exclusion tag and must stay
    /// separate.
    Forbidden {
        /// The shared exclusion tag.
        tag: u32,
    },
}

impl Rag {
    /// Merges two regions, stamping the contour map with the connecting
    /// edge's current priority (or nothing when the pair is not adjacent).
    ///
    /// # Errors
    /// Returns [`RagError::MissingNode`] when either region is not alive and
    /// [`RagError::FeatureContract`] when a rewired edge's priority comes
    /// back NaN.
    pub fn merge(&mut self, u: NodeId, v: NodeId) -> Result<MergeOutcome, RagError> {
        let level = self
            .edge_between(u, v)
            .and_then(|edge| self.edges.get(edge).and_then(Option::as_ref))
            .map_or(f64::INFINITY, |slot| slot.priority);
        self.merge_at(u, v, level)
    }

    /// Merges two regions, stamping `level` onto the retired edge's
    /// boundary voxels in the contour map.
    pub(crate) fn merge_at(
        &mut self,
        u: NodeId,
        v: NodeId,
        level: f64,
    ) -> Result<MergeOutcome, RagError> {
        let tag_u = self.node_slot(u)?.exclusion;
        let tag_v = self.node_slot(v)?.exclusion;
        if u == v {
            return Ok(MergeOutcome::Merged { survivor: u });
        }
        if tag_u != 0 && tag_u == tag_v {
            return Ok(MergeOutcome::Forbidden { tag: tag_u });
        }

        let (survivor, absorbed) = if u < v { (u, v) } else { (v, u) };
        let absorbed_slot = self.nodes[absorbed as usize]
            .take()
            .ok_or(RagError::MissingNode { id: absorbed })?;

        let manager = Arc::clone(&self.feature_manager);
        {
            let slot = self.node_slot_mut(survivor)?;
            manager.combine_nodes(&mut slot.cache, &absorbed_slot.cache);
            slot.size += absorbed_slot.size;
            if slot.exclusion == 0 {
                slot.exclusion = absorbed_slot.exclusion;
            }
        }
        self.forward[absorbed as usize] = survivor;
        self.node_count -= 1;

        for (&w, &old_edge) in &absorbed_slot.neighbours {
            if w == survivor {
                self.retire_merged_edge(old_edge, survivor, absorbed, level);
                continue;
            }
            let existing = self.nodes[survivor as usize]
                .as_ref()
                .and_then(|slot| slot.neighbours.get(&w).copied());
            match existing {
                Some(kept_edge) => {
                    self.combine_parallel_edges(kept_edge, old_edge, absorbed, w, &*manager)?;
                }
                None => {
                    self.rename_edge(old_edge, survivor, absorbed, w)?;
                }
            }
        }

        // Every remaining edge of the survivor changed meaning: its endpoint
        // grew. Invalidate all outstanding queue entries and requeue at
        // freshly computed priorities.
        let survivor_edges: Vec<EdgeId> = self
            .node_slot(survivor)?
            .neighbours
            .values()
            .copied()
            .collect();
        for edge in survivor_edges {
            self.edge_slot_mut(edge)?.generation += 1;
            self.refresh_priority(edge)?;
        }
        Ok(MergeOutcome::Merged { survivor })
    }

    /// Retires the edge between the merging pair and records the level at
    /// which its contour disappeared.
    fn retire_merged_edge(&mut self, edge: EdgeId, survivor: NodeId, absorbed: NodeId, level: f64) {
        if let Some(slot) = self.edges.get_mut(edge).and_then(Option::take) {
            for &voxel in &slot.boundary {
                if level < self.ucm[voxel] {
                    self.ucm[voxel] = level;
                }
            }
            self.edge_count -= 1;
        }
        if let Some(node) = self.nodes[survivor as usize].as_mut() {
            node.neighbours.remove(&absorbed);
        }
    }

    /// Folds `(absorbed, w)` into the already-existing `(survivor, w)` edge.
    fn combine_parallel_edges(
        &mut self,
        kept_edge: EdgeId,
        old_edge: EdgeId,
        absorbed: NodeId,
        w: NodeId,
        manager: &dyn FeatureManager,
    ) -> Result<(), RagError> {
        let old_slot = self.edges[old_edge]
            .take()
            .ok_or(RagError::MissingEdge { edge: old_edge })?;
        self.edge_count -= 1;

        let slot = self.edge_slot_mut(kept_edge)?;
        manager.combine_edges(&mut slot.cache, &old_slot.cache);
        slot.boundary.extend_from_slice(&old_slot.boundary);
        // A junction voxel can sit on both pre-merge boundaries; keep the
        // set representation so the contour map is stamped once per voxel.
        slot.boundary.sort_unstable();
        slot.boundary.dedup();
        slot.frozen = false;

        if let Some(node) = self.nodes[w as usize].as_mut() {
            node.neighbours.remove(&absorbed);
        }
        Ok(())
    }

    /// Rewires `(absorbed, w)` into `(survivor, w)`.
    fn rename_edge(
        &mut self,
        edge: EdgeId,
        survivor: NodeId,
        absorbed: NodeId,
        w: NodeId,
    ) -> Result<(), RagError> {
        let (lo, hi) = if survivor < w {
            (survivor, w)
        } else {
            (w, survivor)
        };
        let slot = self.edge_slot_mut(edge)?;
        slot.a = lo;
        slot.b = hi;
        slot.frozen = false;

        if let Some(node) = self.nodes[survivor as usize].as_mut() {
            node.neighbours.insert(w, edge);
        }
        if let Some(node) = self.nodes[w as usize].as_mut() {
            node.neighbours.remove(&absorbed);
            node.neighbours.insert(survivor, edge);
        }
        Ok(())
    }
}
