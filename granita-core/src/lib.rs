//! Granita core library.
//!
//! An agglomerative segmentation engine for N-dimensional label volumes:
//! build a region adjacency graph over an initial over-segmentation, merge
//! regions in priority order, and collect labelled merge examples against a
//! gold standard for training merge classifiers.

mod classify;
mod error;
mod features;
mod learn;
mod metrics;
mod priority;
mod rag;
mod volume;

pub use crate::{
    classify::{EdgeClassifier, FitConfig, LogisticModel},
    error::{LearnError, LearnErrorCode, RagError, RagErrorCode, Result, VolumeError},
    features::{
        FeatureCache, FeatureManager, MomentsHistogram, classifier_features,
        feature_manager_by_name,
    },
    learn::{
        LabelingMode, LearningConfig, LearningMode, LearningOutput, PriorityMode, TrainingSet,
        learn_agglomerate,
    },
    metrics::{
        MetricsError, merge_rand_delta, merge_vi_delta, rand_index, variation_of_information,
    },
    priority::{
        BoundaryMedian, ClassifierWrong, ExpectedViChange, MergePriority, priority_by_name,
    },
    rag::{EdgeId, LoopControl, MergeOutcome, MergeRecord, NodeId, Rag, RagBuilder},
    volume::{Connectivity, LabelVolume, ProbabilityMap},
};
