//! Merge-additive feature caches and the feature-manager seam.
//!
//! A feature manager owns the layout of the opaque per-region and per-edge
//! caches the graph carries. Caches must combine associatively: merging two
//! caches has to equal re-accumulating over the union of their inputs, which
//! is what lets the graph update statistics in O(1) per merge instead of
//! re-sweeping voxels.

mod histogram;
mod manager;
mod moments;

use std::sync::Arc;

use crate::error::RagError;
use crate::rag::{EdgeId, Rag};

pub use self::manager::MomentsHistogram;

/// An opaque accumulator vector owned by the graph, interpreted only by the
/// feature manager that created it.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureCache(Vec<f64>);

impl FeatureCache {
    pub(crate) fn zeroed(len: usize) -> Self {
        Self(vec![0.0; len])
    }

    /// Returns the raw accumulator slots.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.0
    }

    /// Returns the number of accumulator slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the cache has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Maintains merge-additive statistics for regions and adjacencies.
///
/// `combine_*` must be associative and commutative, and equal to
/// re-accumulating from scratch over the union of the inputs (the additive
/// law). `update_*` receives the per-voxel channel values from the
/// probability map.
pub trait FeatureManager: Send + Sync + std::fmt::Debug {
    /// Registry name of this manager.
    fn name(&self) -> &'static str;

    /// Creates an empty per-region cache.
    fn create_node_cache(&self) -> FeatureCache;

    /// Creates an empty per-adjacency cache.
    fn create_edge_cache(&self) -> FeatureCache;

    /// Accumulates one region voxel's channel values.
    fn update_node(&self, cache: &mut FeatureCache, value: &[f32]);

    /// Accumulates one boundary voxel's channel values.
    fn update_edge(&self, cache: &mut FeatureCache, value: &[f32]);

    /// Folds `src` into `dst` for region caches.
    fn combine_nodes(&self, dst: &mut FeatureCache, src: &FeatureCache);

    /// Folds `src` into `dst` for adjacency caches.
    fn combine_edges(&self, dst: &mut FeatureCache, src: &FeatureCache);

    /// Extracts the feature vector of a region cache.
    fn node_features(&self, cache: &FeatureCache) -> Vec<f64>;

    /// Extracts the feature vector of an adjacency. Implementations may read
    /// the endpoint caches through `rag` for contextual features.
    ///
    /// # Errors
    /// Returns [`RagError::MissingEdge`] when the edge no longer exists.
    fn edge_features(&self, rag: &Rag, edge: EdgeId) -> Result<Vec<f64>, RagError>;
}

/// Assembles the classifier input for an edge.
///
/// The order is fixed and must match between training and inference:
/// left-node features, right-node features, edge features, then the
/// absolute difference of the node feature vectors.
///
/// # Errors
/// Returns [`RagError::MissingEdge`] when the edge no longer exists and
/// [`RagError::FeatureContract`] when any produced value is non-finite.
pub fn classifier_features(
    manager: &dyn FeatureManager,
    rag: &Rag,
    edge: EdgeId,
) -> Result<Vec<f64>, RagError> {
    let (left, right) = rag.edge_endpoints(edge)?;
    let left_features = manager.node_features(rag.node_cache(left)?);
    let right_features = manager.node_features(rag.node_cache(right)?);
    let edge_features = manager.edge_features(rag, edge)?;

    let mut assembled =
        Vec::with_capacity(left_features.len() * 3 + edge_features.len());
    assembled.extend_from_slice(&left_features);
    assembled.extend_from_slice(&right_features);
    assembled.extend_from_slice(&edge_features);
    for (a, b) in left_features.iter().zip(&right_features) {
        assembled.push((a - b).abs());
    }

    if assembled.iter().any(|value| !value.is_finite()) {
        return Err(RagError::FeatureContract {
            context: "classifier feature assembly",
        });
    }
    Ok(assembled)
}

/// Resolves a feature manager from a registry name with optional
/// `key=value` options, e.g. `"moments-histogram:bins=32"`.
///
/// `channels` is the probability map's channel count the caches must cover.
///
/// # Errors
/// Returns [`RagError::UnknownPlugin`] for unregistered names and
/// [`RagError::InvalidPluginOption`] for malformed options.
pub fn feature_manager_by_name(
    expression: &str,
    channels: usize,
) -> Result<Arc<dyn FeatureManager>, RagError> {
    let (name, options) = match expression.split_once(':') {
        Some((name, options)) => (name.trim(), options),
        None => (expression.trim(), ""),
    };
    match name {
        "moments-histogram" => {
            let mut manager = MomentsHistogram::new(channels);
            for option in options.split(',').filter(|option| !option.is_empty()) {
                let (key, value) =
                    option
                        .split_once('=')
                        .ok_or_else(|| RagError::InvalidPluginOption {
                            option: option.to_owned(),
                            reason: "expected key=value".to_owned(),
                        })?;
                match key.trim() {
                    "bins" => {
                        let bins: usize = value.trim().parse().map_err(|_| {
                            RagError::InvalidPluginOption {
                                option: option.to_owned(),
                                reason: "bins must be a positive integer".to_owned(),
                            }
                        })?;
                        if bins == 0 {
                            return Err(RagError::InvalidPluginOption {
                                option: option.to_owned(),
                                reason: "bins must be a positive integer".to_owned(),
                            });
                        }
                        manager = manager.with_bins(bins);
                    }
                    other => {
                        return Err(RagError::InvalidPluginOption {
                            option: option.to_owned(),
                            reason: format!("unknown key `{other}`"),
                        });
                    }
                }
            }
            Ok(Arc::new(manager))
        }
        other => Err(RagError::UnknownPlugin {
            name: other.to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests;
