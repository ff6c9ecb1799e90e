//! Unit tests for feature caches, the default manager, and the registry.

use ndarray::{ArrayD, IxDyn};

use crate::error::RagError;
use crate::rag::{EdgeId, Rag, RagBuilder};

use super::{
    FeatureCache, FeatureManager, MomentsHistogram, classifier_features, feature_manager_by_name,
};

fn two_region_rag() -> Rag {
    let labels = ArrayD::from_shape_vec(IxDyn(&[1, 2]), vec![1_u32, 2]).expect("shape matches");
    let probabilities =
        ArrayD::from_shape_vec(IxDyn(&[1, 2]), vec![0.2_f32, 0.8]).expect("shape matches");
    RagBuilder::new()
        .build(&labels, &probabilities)
        .expect("volume is valid")
}

#[test]
fn manager_combination_equals_union_accumulation() {
    let manager = MomentsHistogram::new(1);
    let mut left = manager.create_node_cache();
    let mut right = manager.create_node_cache();
    let mut whole = manager.create_node_cache();
    for value in [0.1_f32, 0.4, 0.9] {
        manager.update_node(&mut left, &[value]);
        manager.update_node(&mut whole, &[value]);
    }
    for value in [0.3_f32, 0.7] {
        manager.update_node(&mut right, &[value]);
        manager.update_node(&mut whole, &[value]);
    }
    manager.combine_nodes(&mut left, &right);

    let combined = manager.node_features(&left);
    let direct = manager.node_features(&whole);
    assert_eq!(combined.len(), direct.len());
    for (a, b) in combined.iter().zip(&direct) {
        assert!((a - b).abs() < 1e-12, "additive law broke: {a} vs {b}");
    }
}

#[test]
fn multi_channel_caches_cover_every_channel() {
    let manager = MomentsHistogram::new(2);
    let mut cache = manager.create_node_cache();
    manager.update_node(&mut cache, &[0.25, 0.75]);
    let features = manager.node_features(&cache);
    // Eight features per channel: count, mean, variance, skewness,
    // kurtosis, and three percentiles.
    assert_eq!(features.len(), 16);
    assert_eq!(features[1], 0.25, "first channel mean");
    assert_eq!(features[9], 0.75, "second channel mean");
}

#[test]
fn single_channel_values_backfill_missing_channels() {
    let manager = MomentsHistogram::new(2);
    let mut cache = manager.create_node_cache();
    manager.update_node(&mut cache, &[0.4]);
    let features = manager.node_features(&cache);
    assert_eq!(features[1], 0.4);
    assert_eq!(features[9], 0.4, "missing channel falls back to channel 0");
}

#[test]
fn classifier_features_concatenate_in_fixed_order() {
    let rag = two_region_rag();
    let edge = rag.edge_between(1, 2).expect("regions are adjacent");
    let features = rag.edge_feature_vector(edge).expect("features are finite");

    // Four blocks of node-feature width: left, right, edge, |left - right|.
    let width = rag
        .feature_manager()
        .node_features(rag.node_cache(1).expect("node 1 is alive"))
        .len();
    assert_eq!(features.len(), width * 4);

    let left_mean = features[1];
    let right_mean = features[width + 1];
    let difference_mean = features[3 * width + 1];
    assert!((left_mean - 0.2).abs() < 1e-6);
    assert!((right_mean - 0.8).abs() < 1e-6);
    assert!((difference_mean - (left_mean - right_mean).abs()).abs() < 1e-12);
}

#[derive(Debug)]
struct NonFiniteManager;

impl FeatureManager for NonFiniteManager {
    fn name(&self) -> &'static str {
        "non-finite"
    }
    fn create_node_cache(&self) -> FeatureCache {
        FeatureCache::zeroed(1)
    }
    fn create_edge_cache(&self) -> FeatureCache {
        FeatureCache::zeroed(1)
    }
    fn update_node(&self, _cache: &mut FeatureCache, _value: &[f32]) {}
    fn update_edge(&self, _cache: &mut FeatureCache, _value: &[f32]) {}
    fn combine_nodes(&self, _dst: &mut FeatureCache, _src: &FeatureCache) {}
    fn combine_edges(&self, _dst: &mut FeatureCache, _src: &FeatureCache) {}
    fn node_features(&self, _cache: &FeatureCache) -> Vec<f64> {
        vec![f64::NAN]
    }
    fn edge_features(&self, _rag: &Rag, _edge: EdgeId) -> Result<Vec<f64>, RagError> {
        Ok(vec![0.0])
    }
}

#[test]
fn non_finite_features_violate_the_contract() {
    let rag = two_region_rag();
    let edge = rag.edge_between(1, 2).expect("regions are adjacent");
    let err = classifier_features(&NonFiniteManager, &rag, edge)
        .expect_err("NaN features must be rejected");
    assert!(matches!(err, RagError::FeatureContract { .. }));
}

#[test]
fn registry_resolves_the_default_manager() {
    let manager = feature_manager_by_name("moments-histogram", 3).expect("name is registered");
    assert_eq!(manager.name(), "moments-histogram");
}

#[test]
fn registry_parses_bin_overrides() {
    let manager =
        feature_manager_by_name("moments-histogram:bins=32", 1).expect("options are valid");
    // 5 moment slots plus 32 bins.
    assert_eq!(manager.create_edge_cache().len(), 37);
}

#[test]
fn registry_rejects_unknown_names_and_malformed_options() {
    let err = feature_manager_by_name("fourier", 1).expect_err("name is unregistered");
    assert!(matches!(err, RagError::UnknownPlugin { .. }));

    let err = feature_manager_by_name("moments-histogram:bins", 1).expect_err("missing value");
    assert!(matches!(err, RagError::InvalidPluginOption { .. }));

    let err =
        feature_manager_by_name("moments-histogram:bins=zero", 1).expect_err("non-numeric value");
    assert!(matches!(err, RagError::InvalidPluginOption { .. }));

    let err =
        feature_manager_by_name("moments-histogram:shape=7", 1).expect_err("unknown key");
    assert!(matches!(err, RagError::InvalidPluginOption { .. }));
}
