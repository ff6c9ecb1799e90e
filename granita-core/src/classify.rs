//! The classifier seam and the built-in logistic model.
//!
//! Classifiers consume the fixed-order edge feature vector and return the
//! probability that the proposed merge is wrong, so low scores mean "should
//! merge" everywhere. Heavyweight models (random forests and friends) stay
//! behind the trait; the logistic model here is what the learning engine
//! retrains on the fly between epochs, so its fit is a deterministic
//! full-batch gradient descent with no hidden randomness.

use serde::{Deserialize, Serialize};

use crate::error::LearnError;

/// Predicts the probability that merging an edge's endpoints is wrong.
pub trait EdgeClassifier: Send + Sync + std::fmt::Debug {
    /// Returns a score in `[0, 1]`; `0` means the merge looks correct.
    fn predict(&self, features: &[f64]) -> f64;
}

/// Hyperparameters for [`LogisticModel::fit`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FitConfig {
    /// Number of full-batch gradient steps.
    pub iterations: usize,
    /// Step size.
    pub learning_rate: f64,
    /// L2 penalty on the weights.
    pub ridge: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            iterations: 200,
            learning_rate: 0.5,
            ridge: 1e-3,
        }
    }
}

/// A standardised logistic regression over edge feature vectors.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct LogisticModel {
    weights: Vec<f64>,
    bias: f64,
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl LogisticModel {
    /// Fits the model on row-major `features` of width `dim`, with labels
    /// `+1` for a correct merge and `-1` for a wrong one, and per-example
    /// `weights`.
    ///
    /// # Errors
    /// Returns [`LearnError::MalformedDataset`] when the dimensions are
    /// inconsistent or the dataset is empty.
    pub fn fit(
        features: &[f64],
        dim: usize,
        labels: &[i8],
        weights: &[f64],
        config: &FitConfig,
    ) -> Result<Self, LearnError> {
        let rows = labels.len();
        if dim == 0 || rows == 0 {
            return Err(LearnError::MalformedDataset {
                reason: "fit requires at least one example and one feature".to_owned(),
            });
        }
        if features.len() != rows * dim || weights.len() != rows {
            return Err(LearnError::MalformedDataset {
                reason: format!(
                    "expected {rows}x{dim} features and {rows} weights, got {} and {}",
                    features.len(),
                    weights.len(),
                ),
            });
        }

        let (mean, scale) = column_statistics(features, rows, dim);
        let total_weight: f64 = weights.iter().sum();
        if total_weight <= 0.0 {
            return Err(LearnError::MalformedDataset {
                reason: "example weights must sum to a positive value".to_owned(),
            });
        }

        let mut model = Self {
            weights: vec![0.0; dim],
            bias: 0.0,
            mean,
            scale,
        };
        let mut gradient = vec![0.0; dim];
        let mut standardised = vec![0.0; dim];
        for _ in 0..config.iterations {
            gradient.iter_mut().for_each(|slot| *slot = 0.0);
            let mut bias_gradient = 0.0;
            for row in 0..rows {
                model.standardise(&features[row * dim..(row + 1) * dim], &mut standardised);
                let predicted = sigmoid(model.linear(&standardised));
                // The classifier targets "merge is wrong".
                let target = if labels[row] < 0 { 1.0 } else { 0.0 };
                let residual = weights[row] * (predicted - target) / total_weight;
                for (slot, &value) in gradient.iter_mut().zip(&standardised) {
                    *slot += residual * value;
                }
                bias_gradient += residual;
            }
            for (weight, &slope) in model.weights.iter_mut().zip(&gradient) {
                *weight -= config.learning_rate * (slope + config.ridge * *weight);
            }
            model.bias -= config.learning_rate * bias_gradient;
        }
        Ok(model)
    }

    /// Returns the feature dimension the model was fitted on.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.weights.len()
    }

    fn standardise(&self, features: &[f64], out: &mut [f64]) {
        for (slot, ((&value, &mean), &scale)) in out
            .iter_mut()
            .zip(features.iter().zip(&self.mean).zip(&self.scale))
        {
            *slot = (value - mean) / scale;
        }
    }

    fn linear(&self, standardised: &[f64]) -> f64 {
        self.bias
            + self
                .weights
                .iter()
                .zip(standardised)
                .map(|(weight, value)| weight * value)
                .sum::<f64>()
    }
}

impl EdgeClassifier for LogisticModel {
    fn predict(&self, features: &[f64]) -> f64 {
        let width = self.weights.len().min(features.len());
        let mut standardised = vec![0.0; self.weights.len()];
        self.standardise(&features[..width], &mut standardised[..width]);
        sigmoid(self.linear(&standardised))
    }
}

fn column_statistics(features: &[f64], rows: usize, dim: usize) -> (Vec<f64>, Vec<f64>) {
    let mut mean = vec![0.0; dim];
    for row in 0..rows {
        for (slot, &value) in mean.iter_mut().zip(&features[row * dim..(row + 1) * dim]) {
            *slot += value;
        }
    }
    for slot in &mut mean {
        *slot /= rows as f64;
    }
    let mut variance = vec![0.0; dim];
    for row in 0..rows {
        for (column, &value) in features[row * dim..(row + 1) * dim].iter().enumerate() {
            let centred = value - mean[column];
            variance[column] += centred * centred;
        }
    }
    let scale = variance
        .into_iter()
        .map(|sum| {
            let deviation = (sum / rows as f64).sqrt();
            if deviation > f64::EPSILON { deviation } else { 1.0 }
        })
        .collect();
    (mean, scale)
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z.clamp(-40.0, 40.0)).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable_dataset() -> (Vec<f64>, Vec<i8>, Vec<f64>) {
        // One feature: low boundary probability means the merge is correct.
        let features = vec![0.1, 0.2, 0.15, 0.9, 0.8, 0.85];
        let labels = vec![1, 1, 1, -1, -1, -1];
        let weights = vec![1.0; 6];
        (features, labels, weights)
    }

    #[test]
    fn fit_separates_a_trivial_dataset() {
        let (features, labels, weights) = separable_dataset();
        let model = LogisticModel::fit(&features, 1, &labels, &weights, &FitConfig::default())
            .expect("dataset is well formed");
        assert!(model.predict(&[0.1]) < 0.5, "correct merges score low");
        assert!(model.predict(&[0.9]) > 0.5, "wrong merges score high");
    }

    #[test]
    fn fit_is_deterministic() {
        let (features, labels, weights) = separable_dataset();
        let config = FitConfig::default();
        let first = LogisticModel::fit(&features, 1, &labels, &weights, &config)
            .expect("dataset is well formed");
        let second = LogisticModel::fit(&features, 1, &labels, &weights, &config)
            .expect("dataset is well formed");
        assert_eq!(first, second);
    }

    #[test]
    fn fit_rejects_inconsistent_shapes() {
        let err = LogisticModel::fit(&[0.1, 0.2], 2, &[1, -1], &[1.0, 1.0], &FitConfig::default())
            .expect_err("two rows of width two need four values");
        assert!(matches!(err, LearnError::MalformedDataset { .. }));
    }

    #[test]
    fn fit_rejects_empty_datasets() {
        let err = LogisticModel::fit(&[], 3, &[], &[], &FitConfig::default())
            .expect_err("empty datasets cannot be fitted");
        assert!(matches!(err, LearnError::MalformedDataset { .. }));
    }

    #[test]
    fn model_round_trips_through_serde() {
        let (features, labels, weights) = separable_dataset();
        let model = LogisticModel::fit(&features, 1, &labels, &weights, &FitConfig::default())
            .expect("dataset is well formed");
        let encoded = serde_json::to_string(&model).expect("model serialises");
        let decoded: LogisticModel = serde_json::from_str(&encoded).expect("model deserialises");
        assert_eq!(model, decoded);
    }
}
