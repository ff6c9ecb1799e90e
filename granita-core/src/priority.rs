//! Merge priority functions.
//!
//! A priority function maps an edge to a real cost; the agglomeration loop
//! always merges the cheapest edge first, so low priority means "should
//! merge" for every function here. `f64::INFINITY` means "never merge".

use std::sync::Arc;

use crate::classify::EdgeClassifier;
use crate::error::RagError;
use crate::metrics::xlog2x;
use crate::rag::{EdgeId, Rag};

/// Computes the cost of merging an edge's endpoints.
pub trait MergePriority: Send + Sync + std::fmt::Debug {
    /// Registry name of this function.
    fn name(&self) -> &'static str;

    /// Returns the merge cost for `edge`, `f64::INFINITY` to forbid the
    /// merge outright.
    ///
    /// # Errors
    /// Returns [`RagError::MissingEdge`] when the edge is not alive and
    /// [`RagError::FeatureContract`] when the cost would be NaN.
    fn priority(&self, rag: &Rag, edge: EdgeId) -> Result<f64, RagError>;
}

/// The median boundary probability: cheap, needs no training.
#[derive(Clone, Copy, Debug, Default)]
pub struct BoundaryMedian;

impl MergePriority for BoundaryMedian {
    fn name(&self) -> &'static str {
        "boundary-median"
    }

    fn priority(&self, rag: &Rag, edge: EdgeId) -> Result<f64, RagError> {
        let mut values = rag.boundary_values(edge)?;
        Ok(median_of(&mut values))
    }
}

/// The classifier's probability that the merge is wrong.
#[derive(Clone, Debug)]
pub struct ClassifierWrong {
    classifier: Arc<dyn EdgeClassifier>,
}

impl ClassifierWrong {
    /// Wraps a trained classifier as a priority function.
    #[must_use]
    pub fn new(classifier: Arc<dyn EdgeClassifier>) -> Self {
        Self { classifier }
    }
}

impl MergePriority for ClassifierWrong {
    fn name(&self) -> &'static str {
        "classifier"
    }

    fn priority(&self, rag: &Rag, edge: EdgeId) -> Result<f64, RagError> {
        let features = rag.edge_feature_vector(edge)?;
        let wrong = self.classifier.predict(&features);
        if !wrong.is_finite() {
            return Err(RagError::FeatureContract {
                context: "classifier prediction",
            });
        }
        Ok(wrong.clamp(0.0, 1.0))
    }
}

/// The expected change in variation of information caused by the merge.
///
/// With endpoint voxel counts `n1` and `n2`, `n` the labelled voxel total,
/// and `h(x) = x·log2(x)`, the entropy released by the merge is
/// `H = (h(n1 + n2) - h(n1) - h(n2)) / n`. Weighting false merges by
/// `beta`, the cost is `beta·(1 - p)·H - p·H` where `p` is the probability
/// the merge is correct. Lower is better.
#[derive(Clone, Debug)]
pub struct ExpectedViChange {
    classifier: Arc<dyn EdgeClassifier>,
    beta: f64,
}

impl ExpectedViChange {
    /// Wraps a trained classifier, weighting false merges by `beta`.
    #[must_use]
    pub fn new(classifier: Arc<dyn EdgeClassifier>, beta: f64) -> Self {
        Self { classifier, beta }
    }

    /// Returns the false-merge weight.
    #[must_use]
    pub fn beta(&self) -> f64 {
        self.beta
    }
}

impl MergePriority for ExpectedViChange {
    fn name(&self) -> &'static str {
        "expected-vi-change"
    }

    fn priority(&self, rag: &Rag, edge: EdgeId) -> Result<f64, RagError> {
        let features = rag.edge_feature_vector(edge)?;
        let wrong = self.classifier.predict(&features);
        if !wrong.is_finite() {
            return Err(RagError::FeatureContract {
                context: "classifier prediction",
            });
        }
        let correct = 1.0 - wrong.clamp(0.0, 1.0);
        let (a, b) = rag.edge_endpoints(edge)?;
        let n1 = rag.node_size(a)? as f64;
        let n2 = rag.node_size(b)? as f64;
        let total = rag.labelled_voxels() as f64;
        let entropy_released = (xlog2x(n1 + n2) - xlog2x(n1) - xlog2x(n2)) / total;
        Ok(self.beta * (1.0 - correct) * entropy_released - correct * entropy_released)
    }
}

/// The median of `values`; `+inf` for an empty slice, the mean of the two
/// middle elements for even counts.
pub(crate) fn median_of(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::INFINITY;
    }
    values.sort_unstable_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        0.5 * (values[mid - 1] + values[mid])
    }
}

/// Resolves a priority function from a registry name.
///
/// `classifier` is required by the `classifier` and `expected-vi-change`
/// functions; `beta` only affects the latter.
///
/// # Errors
/// Returns [`RagError::UnknownPlugin`] for unregistered names and
/// [`RagError::InvalidPluginOption`] when a classifier-driven function is
/// requested without a classifier.
pub fn priority_by_name(
    name: &str,
    classifier: Option<Arc<dyn EdgeClassifier>>,
    beta: f64,
) -> Result<Arc<dyn MergePriority>, RagError> {
    match name.trim() {
        "boundary-median" => Ok(Arc::new(BoundaryMedian)),
        "classifier" => {
            let classifier = classifier.ok_or_else(|| RagError::InvalidPluginOption {
                option: name.to_owned(),
                reason: "requires a classifier".to_owned(),
            })?;
            Ok(Arc::new(ClassifierWrong::new(classifier)))
        }
        "expected-vi-change" => {
            let classifier = classifier.ok_or_else(|| RagError::InvalidPluginOption {
                option: name.to_owned(),
                reason: "requires a classifier".to_owned(),
            })?;
            Ok(Arc::new(ExpectedViChange::new(classifier, beta)))
        }
        other => Err(RagError::UnknownPlugin {
            name: other.to_owned(),
        }),
    }
}
