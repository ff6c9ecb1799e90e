//! The agglomeration loops.
//!
//! All of them drain the merge queue in priority order, skipping entries
//! whose generation no longer matches the edge (either endpoint merged since
//! the entry was pushed) and entries for frozen edges. A forbidden merge
//! freezes the edge and the loop continues; the edge is only reconsidered if
//! a later merge rewires it.

use tracing::debug;

use crate::error::RagError;

use super::{EdgeId, MergeOutcome, NodeId, Rag};

/// Signal returned by a progress callback after each merge.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoopControl {
    /// Keep merging.
    Continue,
    /// Stop after the current merge.
    Stop,
}

/// One performed merge, as reported to progress callbacks.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MergeRecord {
    /// The edge that was merged.
    pub edge: EdgeId,
    /// The surviving region.
    pub survivor: NodeId,
    /// The absorbed region.
    pub absorbed: NodeId,
    /// The priority at which the merge happened.
    pub priority: f64,
}

impl Rag {
    /// Merges regions in priority order until the cheapest remaining edge
    /// exceeds `threshold` or the queue runs dry. Returns the number of
    /// merges performed.
    ///
    /// Running the same threshold twice performs no further merges, and a
    /// later call with a higher threshold continues where this one stopped.
    ///
    /// # Errors
    /// Returns [`RagError::FeatureContract`] when a priority recomputation
    /// yields NaN.
    pub fn agglomerate(&mut self, threshold: f64) -> Result<usize, RagError> {
        self.agglomerate_with(threshold, |_| LoopControl::Continue)
    }

    /// [`Rag::agglomerate`] with a progress callback invoked after every
    /// merge; returning [`LoopControl::Stop`] ends the loop early.
    ///
    /// # Errors
    /// Returns [`RagError::FeatureContract`] when a priority recomputation
    /// yields NaN.
    pub fn agglomerate_with(
        &mut self,
        threshold: f64,
        mut progress: impl FnMut(&MergeRecord) -> LoopControl,
    ) -> Result<usize, RagError> {
        let mut merges = 0_usize;
        while let Some(entry) = self.queue.pop() {
            let Some(slot) = self.edges.get(entry.edge).and_then(Option::as_ref) else {
                continue;
            };
            if slot.generation != entry.generation || slot.frozen {
                continue;
            }
            if entry.priority > threshold {
                // The heap is a min-heap: nothing cheaper remains. Put the
                // entry back so a later, higher threshold can resume.
                self.queue.push(entry.priority, entry.edge, entry.generation);
                break;
            }
            let (a, b) = (slot.a, slot.b);
            match self.merge_at(a, b, entry.priority)? {
                MergeOutcome::Merged { survivor } => {
                    merges += 1;
                    let record = MergeRecord {
                        edge: entry.edge,
                        survivor,
                        absorbed: if survivor == a { b } else { a },
                        priority: entry.priority,
                    };
                    if progress(&record) == LoopControl::Stop {
                        break;
                    }
                }
                MergeOutcome::Forbidden { .. } => {
                    self.freeze_edge(entry.edge)?;
                }
            }
        }
        debug!(merges, threshold, "agglomeration finished");
        Ok(merges)
    }

    /// Small-region cleanup: drains the queue in priority order but only
    /// merges pairs where at least one endpoint has fewer than `min_size`
    /// voxels; every other entry is discarded. The queue is rebuilt with
    /// fresh priorities afterwards. Returns the number of merges performed.
    ///
    /// # Errors
    /// Returns [`RagError::FeatureContract`] when a priority recomputation
    /// yields NaN.
    pub fn agglomerate_ladder(&mut self, min_size: usize) -> Result<usize, RagError> {
        let mut merges = 0_usize;
        while let Some(entry) = self.queue.pop() {
            let Some(slot) = self.edges.get(entry.edge).and_then(Option::as_ref) else {
                continue;
            };
            if slot.generation != entry.generation || slot.frozen {
                continue;
            }
            let (a, b) = (slot.a, slot.b);
            let smallest = self.node_size(a)?.min(self.node_size(b)?);
            if smallest >= min_size {
                continue;
            }
            match self.merge_at(a, b, entry.priority)? {
                MergeOutcome::Merged { .. } => merges += 1,
                MergeOutcome::Forbidden { .. } => self.freeze_edge(entry.edge)?,
            }
        }
        self.rebuild_queue()?;
        debug!(merges, min_size, "ladder pass finished");
        Ok(merges)
    }

    /// Merges every region that is entirely enclosed by a single neighbour
    /// into that neighbour, irrespective of priority, iterating until no
    /// inclusions remain. Exclusion constraints still apply: a forbidden
    /// inclusion is left alone. Returns the number of regions removed.
    ///
    /// # Errors
    /// Returns [`RagError::FeatureContract`] when a priority recomputation
    /// yields NaN.
    pub fn remove_inclusions(&mut self) -> Result<usize, RagError> {
        let mut removed = 0_usize;
        loop {
            let candidates: Vec<NodeId> = self
                .node_ids()
                .into_iter()
                .filter(|&id| {
                    self.node_slot(id)
                        .is_ok_and(|slot| slot.neighbours.len() == 1)
                })
                .collect();
            let mut progressed = false;
            for node in candidates {
                // Earlier merges in this pass may have changed the picture;
                // re-check before touching anything.
                let Ok(slot) = self.node_slot(node) else {
                    continue;
                };
                if slot.neighbours.len() != 1 {
                    continue;
                }
                let Some(host) = slot.neighbours.keys().next().copied() else {
                    continue;
                };
                match self.merge_at(node, host, f64::NEG_INFINITY)? {
                    MergeOutcome::Merged { .. } => {
                        progressed = true;
                        removed += 1;
                    }
                    MergeOutcome::Forbidden { .. } => {}
                }
            }
            if !progressed {
                break;
            }
        }
        debug!(removed, "inclusion removal finished");
        Ok(removed)
    }

    /// Pops queue entries until a live, current, unfrozen edge surfaces.
    /// Used by the learning engine to intercept proposals.
    pub(crate) fn next_queue_edge(&mut self) -> Option<(EdgeId, f64)> {
        while let Some(entry) = self.queue.pop() {
            let Some(slot) = self.edges.get(entry.edge).and_then(Option::as_ref) else {
                continue;
            };
            if slot.generation != entry.generation || slot.frozen {
                continue;
            }
            return Some((entry.edge, entry.priority));
        }
        None
    }
}
