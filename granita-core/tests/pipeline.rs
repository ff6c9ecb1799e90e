//! End-to-end pipeline tests through the public API.

use std::sync::Arc;

use ndarray::{ArrayD, IxDyn};

use granita_core::{
    BoundaryMedian, Connectivity, EdgeClassifier, ExpectedViChange, LearningConfig, RagBuilder,
    learn_agglomerate, priority_by_name, variation_of_information,
};

fn checkerboard_volume() -> (ArrayD<u32>, ArrayD<f32>) {
    // A 4x4x2 volume of eight 2x2x1 supervoxels; the probability map is low
    // inside the four intended objects and high on the seam between them.
    let mut labels = ArrayD::zeros(IxDyn(&[4, 4, 2]));
    let mut probabilities = ArrayD::zeros(IxDyn(&[4, 4, 2]));
    for row in 0..4 {
        for column in 0..4 {
            for layer in 0..2 {
                let supervoxel = 1 + (row / 2) * 4 + (column / 2) * 2 + layer;
                labels[IxDyn(&[row, column, layer])] = supervoxel as u32;
                // The vertical seam between the left and right halves is a
                // strong boundary; everything else is weak.
                let seam = column == 2 || column == 1;
                probabilities[IxDyn(&[row, column, layer])] =
                    if seam { 0.9_f32 } else { 0.1 };
            }
        }
    }
    (labels, probabilities)
}

#[test]
fn three_dimensional_agglomeration_respects_strong_boundaries() {
    let (labels, probabilities) = checkerboard_volume();
    let mut rag = RagBuilder::new()
        .with_connectivity(Connectivity::Faces)
        .build(&labels, &probabilities)
        .expect("volume is valid");
    assert_eq!(rag.num_nodes(), 8);

    rag.agglomerate(0.5).expect("agglomeration succeeds");
    let segmentation = rag.get_segmentation();
    let left = segmentation[IxDyn(&[0, 0, 0])];
    let right = segmentation[IxDyn(&[0, 3, 0])];
    assert_ne!(left, right, "the seam must survive a 0.5 threshold");

    // Within each half the weak boundaries dissolve.
    assert_eq!(left, segmentation[IxDyn(&[3, 0, 1])]);
    assert_eq!(right, segmentation[IxDyn(&[3, 3, 1])]);
}

#[test]
fn contour_map_thresholds_reproduce_segmentations() {
    let (labels, probabilities) = checkerboard_volume();
    let mut full = RagBuilder::new()
        .build(&labels, &probabilities)
        .expect("volume is valid");
    full.agglomerate(f64::INFINITY).expect("full agglomeration");
    let ucm = full.get_ucm();

    let mut partial = RagBuilder::new()
        .build(&labels, &probabilities)
        .expect("volume is valid");
    partial.agglomerate(0.5).expect("partial agglomeration");
    let segmentation = partial.get_segmentation();

    // A contour voxel below the threshold separates nothing any more; one
    // above it still separates its original regions somewhere.
    let finite_below: Vec<f64> = ucm
        .iter()
        .copied()
        .filter(|level| level.is_finite() && *level <= 0.5)
        .collect();
    assert!(!finite_below.is_empty(), "some contours dissolve by 0.5");
    let distinct: std::collections::HashSet<u32> =
        segmentation.iter().copied().collect();
    assert_eq!(distinct.len(), 2, "two objects remain at 0.5");
}

#[test]
fn learned_classifier_drives_agglomeration() {
    let (labels, probabilities) = checkerboard_volume();
    // Ground truth: left and right halves.
    let mut truth = ArrayD::zeros(IxDyn(&[4, 4, 2]));
    for row in 0..4 {
        for column in 0..4 {
            for layer in 0..2 {
                truth[IxDyn(&[row, column, layer])] = if column < 2 { 1_u32 } else { 2 };
            }
        }
    }

    let config = LearningConfig {
        min_epochs: 2,
        max_epochs: 8,
        ..LearningConfig::default()
    };
    let output = learn_agglomerate(
        &RagBuilder::new(),
        &labels,
        &probabilities,
        &truth,
        &config,
    )
    .expect("learning succeeds");
    assert!(output.dataset.len() >= 4);

    let model = granita_core::LogisticModel::fit(
        output.dataset.features(),
        output.dataset.dim(),
        &output.dataset.authoritative_labels(),
        output.dataset.weights(),
        &granita_core::FitConfig::default(),
    )
    .expect("dataset is well formed");

    // Drive a fresh agglomeration with the learned model: boundaries the
    // model calls wrong keep high priority.
    let classifier: Arc<dyn EdgeClassifier> = Arc::new(model);
    let priority = ExpectedViChange::new(classifier, 1.0);
    let mut rag = RagBuilder::new()
        .with_priority(Arc::new(priority))
        .build(&labels, &probabilities)
        .expect("volume is valid");
    rag.agglomerate(0.0).expect("agglomeration succeeds");

    // Compare against the truth: the learned segmentation should be closer
    // to it than the unmerged over-segmentation.
    let learned: Vec<u32> = rag.get_segmentation().iter().copied().collect();
    let flat: Vec<u32> = labels.iter().copied().collect();
    let truth_flat: Vec<u32> = truth.iter().copied().collect();
    let learned_vi =
        variation_of_information(&learned, &truth_flat).expect("lengths match");
    let flat_vi = variation_of_information(&flat, &truth_flat).expect("lengths match");
    assert!(
        learned_vi <= flat_vi,
        "learning must not move away from the truth: {learned_vi} vs {flat_vi}"
    );
}

#[test]
fn priority_registry_round_trips_through_the_public_api() {
    let (labels, probabilities) = checkerboard_volume();
    let priority = priority_by_name("boundary-median", None, 1.0).expect("name is registered");
    let mut rag = RagBuilder::new()
        .with_priority(priority)
        .build(&labels, &probabilities)
        .expect("volume is valid");
    rag.agglomerate(0.5).expect("agglomeration succeeds");
    assert!(rag.num_nodes() < 8);

    let fallback = RagBuilder::new()
        .with_priority(Arc::new(BoundaryMedian))
        .build(&labels, &probabilities)
        .expect("volume is valid");
    // The eight blocks form a 2x2x2 grid: four face adjacencies per axis.
    assert_eq!(fallback.num_edges(), 12);
}
