//! The labelled training dataset collected during learning.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Row-major `(features, labels, weights)` triples plus a text info header.
///
/// Labels hold one column per labelling mode; column 0 is the mode the
/// learning run was configured with and is the authoritative target.
/// `+1` means "merge", `-1` means "do not merge".
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingSet {
    dim: usize,
    label_modes: usize,
    features: Vec<f64>,
    labels: Vec<i8>,
    weights: Vec<f64>,
    info: String,
}

impl TrainingSet {
    pub(crate) fn new(label_modes: usize) -> Self {
        Self {
            dim: 0,
            label_modes,
            features: Vec::new(),
            labels: Vec::new(),
            weights: Vec::new(),
            info: String::new(),
        }
    }

    /// Returns the number of examples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// Returns whether the dataset holds no examples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Returns the feature dimension (`0` until the first example lands).
    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Returns the number of label columns.
    #[must_use]
    pub fn label_modes(&self) -> usize {
        self.label_modes
    }

    /// Returns the row-major feature matrix.
    #[must_use]
    pub fn features(&self) -> &[f64] {
        &self.features
    }

    /// Returns the row-major label matrix.
    #[must_use]
    pub fn labels(&self) -> &[i8] {
        &self.labels
    }

    /// Returns the example weights.
    #[must_use]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Returns the authoritative label column.
    #[must_use]
    pub fn authoritative_labels(&self) -> Vec<i8> {
        (0..self.len())
            .map(|row| self.labels[row * self.label_modes])
            .collect()
    }

    /// Returns one feature row.
    #[must_use]
    pub fn feature_row(&self, row: usize) -> &[f64] {
        &self.features[row * self.dim..(row + 1) * self.dim]
    }

    /// Returns one label row.
    #[must_use]
    pub fn label_row(&self, row: usize) -> &[i8] {
        &self.labels[row * self.label_modes..(row + 1) * self.label_modes]
    }

    /// Returns the provenance header.
    #[must_use]
    pub fn info(&self) -> &str {
        &self.info
    }

    pub(crate) fn set_info(&mut self, info: String) {
        self.info = info;
    }

    pub(crate) fn push(&mut self, features: &[f64], labels: &[i8], weight: f64) {
        if self.dim == 0 {
            self.dim = features.len();
        }
        debug_assert_eq!(features.len(), self.dim);
        debug_assert_eq!(labels.len(), self.label_modes);
        self.features.extend_from_slice(features);
        self.labels.extend_from_slice(labels);
        self.weights.push(weight);
    }

    /// Returns a copy capped to `cap` examples, chosen by seeded sampling
    /// without replacement with the original order preserved.
    pub(crate) fn subsample(&self, cap: usize, seed: u64) -> Self {
        if self.len() <= cap {
            return self.clone();
        }
        let mut indices: Vec<usize> = (0..self.len()).collect();
        let mut rng = SmallRng::seed_from_u64(seed);
        for slot in 0..cap {
            let pick = rng.gen_range(slot..indices.len());
            indices.swap(slot, pick);
        }
        let mut kept = indices[..cap].to_vec();
        kept.sort_unstable();

        let mut sampled = Self::new(self.label_modes);
        sampled.info = self.info.clone();
        for row in kept {
            sampled.push(self.feature_row(row), self.label_row(row), self.weights[row]);
        }
        sampled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_set() -> TrainingSet {
        let mut set = TrainingSet::new(3);
        for row in 0..6 {
            let value = row as f64;
            set.push(&[value, value + 0.5], &[1, -1, 1], 1.0);
        }
        set
    }

    #[test]
    fn push_fixes_dimension_from_first_row() {
        let set = toy_set();
        assert_eq!(set.dim(), 2);
        assert_eq!(set.len(), 6);
        assert_eq!(set.feature_row(2), &[2.0, 2.5]);
        assert_eq!(set.label_row(0), &[1, -1, 1]);
        assert_eq!(set.authoritative_labels(), vec![1; 6]);
    }

    #[test]
    fn subsample_preserves_order_and_is_seeded() {
        let set = toy_set();
        let first = set.subsample(3, 42);
        let second = set.subsample(3, 42);
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        let picked: Vec<f64> = (0..first.len())
            .map(|row| first.feature_row(row)[0])
            .collect();
        let mut sorted = picked.clone();
        sorted.sort_by(f64::total_cmp);
        assert_eq!(picked, sorted, "sampling must preserve original order");
    }

    #[test]
    fn subsample_below_cap_is_identity() {
        let set = toy_set();
        assert_eq!(set.subsample(100, 7), set);
    }
}
