//! The active-learning engine.
//!
//! Each epoch rebuilds a fresh graph from the initial over-segmentation and
//! replays a full agglomeration, recording a labelled example for every
//! proposed merge: the edge's feature vector, and merge/don't-merge labels
//! inferred from the ground truth under every labelling mode. The learning
//! mode decides whether a proposal is actually executed; the priority mode
//! decides which edge is proposed next, optionally driven by a provisional
//! classifier retrained between epochs.

mod dataset;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use ndarray::{ArrayD, Zip};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::classify::{EdgeClassifier, FitConfig, LogisticModel};
use crate::error::LearnError;
use crate::metrics::{merge_rand_delta, merge_vi_delta};
use crate::priority::{BoundaryMedian, ClassifierWrong, ExpectedViChange, MergePriority};
use crate::rag::{EdgeId, MergeOutcome, NodeId, Rag, RagBuilder};

pub use self::dataset::TrainingSet;

/// Whether a proposed merge is executed or only recorded.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LearningMode {
    /// Execute only merges the ground truth approves; refused edges freeze
    /// for the rest of the epoch.
    #[default]
    Strict,
    /// Execute every proposal. Faster convergence, noisier labels.
    Loose,
}

/// How the ground truth turns a proposal into a merge/don't-merge label.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LabelingMode {
    /// Merge when both endpoints map to the same best-overlap truth region.
    #[default]
    Assignment,
    /// Merge when the merge would lower variation of information.
    ViSign,
    /// Merge when the merge would raise the Rand index.
    RandSign,
}

/// Which edge is proposed next.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PriorityMode {
    /// Uniformly random over the live edges.
    Random,
    /// Cheapest boundary median first.
    #[default]
    BoundaryMedian,
    /// Driven by the provisional classifier trained so far.
    Active,
}

/// Configuration for [`learn_agglomerate`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LearningConfig {
    /// Whether proposals are executed or only recorded.
    pub learning_mode: LearningMode,
    /// The authoritative labelling mode (always recorded first).
    pub labeling_mode: LabelingMode,
    /// How the next edge is chosen.
    pub priority_mode: PriorityMode,
    /// Minimum number of epochs before convergence can end the run.
    pub min_epochs: usize,
    /// Hard cap on epochs; reaching it without stabilising is reported as a
    /// convergence warning, not an error.
    pub max_epochs: usize,
    /// Keep running (up to `max_epochs`) until at least this many examples
    /// were collected.
    pub min_examples: usize,
    /// Cap the aggregated dataset by seeded subsampling.
    pub sample_cap: Option<usize>,
    /// Keep per-epoch datasets alongside the aggregate.
    pub memory: bool,
    /// Drop examples whose feature vectors were already recorded.
    pub unique: bool,
    /// Warm-start the provisional classifier from flat-graph examples.
    pub learn_flat: bool,
    /// Use the expected-VI priority instead of the raw classifier score in
    /// active mode.
    pub active_vi: bool,
    /// False-merge weight for the expected-VI priority.
    pub beta: f64,
    /// Seed for every stochastic choice the engine makes.
    pub seed: u64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            learning_mode: LearningMode::default(),
            labeling_mode: LabelingMode::default(),
            priority_mode: PriorityMode::default(),
            min_epochs: 5,
            max_epochs: 20,
            min_examples: 0,
            sample_cap: None,
            memory: true,
            unique: true,
            learn_flat: true,
            active_vi: false,
            beta: 1.0,
            seed: 0,
        }
    }
}

/// The outcome of a learning run.
#[derive(Clone, Debug, PartialEq)]
pub struct LearningOutput {
    /// The aggregated dataset across all epochs.
    pub dataset: TrainingSet,
    /// Per-epoch datasets, populated when `memory` is set.
    pub epochs: Vec<TrainingSet>,
    /// Number of epochs that ran.
    pub epoch_count: usize,
    /// Whether the run stabilised before `max_epochs`.
    pub converged: bool,
}

const LABEL_MODE_COUNT: usize = 3;

/// Collects labelled merge examples by repeatedly agglomerating against a
/// ground truth.
///
/// # Errors
/// Returns [`LearnError::InvalidGroundTruth`] when the ground truth shape
/// does not match the labels, [`LearnError::Rag`] when graph construction or
/// a merge fails, and [`LearnError::NoExamples`] when the run records
/// nothing at all.
pub fn learn_agglomerate(
    builder: &RagBuilder,
    labels: &ArrayD<u32>,
    probabilities: &ArrayD<f32>,
    ground_truth: &ArrayD<u32>,
    config: &LearningConfig,
) -> Result<LearningOutput, LearnError> {
    if ground_truth.shape() != labels.shape() {
        return Err(LearnError::InvalidGroundTruth {
            reason: format!(
                "shape {:?} does not match labels {:?}",
                ground_truth.shape(),
                labels.shape(),
            ),
        });
    }

    let mut engine = Engine {
        builder: builder.clone(),
        labels,
        probabilities,
        ground_truth,
        config: *config,
        aggregate: TrainingSet::new(LABEL_MODE_COUNT),
        epochs: Vec::new(),
        seen: HashSet::new(),
        model: None,
        rng: SmallRng::seed_from_u64(config.seed),
    };
    engine.run()
}

struct Engine<'a> {
    builder: RagBuilder,
    labels: &'a ArrayD<u32>,
    probabilities: &'a ArrayD<f32>,
    ground_truth: &'a ArrayD<u32>,
    config: LearningConfig,
    aggregate: TrainingSet,
    epochs: Vec<TrainingSet>,
    seen: HashSet<Vec<u64>>,
    model: Option<LogisticModel>,
    rng: SmallRng,
}

impl Engine<'_> {
    fn run(&mut self) -> Result<LearningOutput, LearnError> {
        if self.config.learn_flat && self.config.priority_mode == PriorityMode::Active {
            self.flat_warm_start()?;
        }

        let mut epoch_count = 0;
        let mut converged = false;
        while epoch_count < self.config.max_epochs {
            epoch_count += 1;
            let added = self.run_epoch()?;
            debug!(epoch = epoch_count, added, total = self.aggregate.len(), "epoch finished");
            let settled = added == 0
                && epoch_count >= self.config.min_epochs
                && self.aggregate.len() >= self.config.min_examples;
            if settled {
                converged = true;
                break;
            }
            if self.config.priority_mode == PriorityMode::Active && !self.aggregate.is_empty() {
                self.model = Some(self.fit_provisional()?);
            }
        }
        if !converged {
            warn!(
                epochs = epoch_count,
                examples = self.aggregate.len(),
                "learning reached the epoch cap without stabilising"
            );
        }

        if self.aggregate.is_empty() {
            return Err(LearnError::NoExamples);
        }
        let mut dataset = match self.config.sample_cap {
            Some(cap) => self.aggregate.subsample(cap, self.config.seed),
            None => self.aggregate.clone(),
        };
        dataset.set_info(self.info_header(epoch_count, converged, dataset.len()));
        Ok(LearningOutput {
            dataset,
            epochs: std::mem::take(&mut self.epochs),
            epoch_count,
            converged,
        })
    }

    /// Labels every initial edge without merging anything, seeding the
    /// provisional classifier before the first active epoch.
    fn flat_warm_start(&mut self) -> Result<(), LearnError> {
        let rag = self.builder.build(self.labels, self.probabilities)?;
        let overlaps = Overlaps::new(&rag, self.labels, self.ground_truth);
        for edge in rag.edge_ids() {
            let features = rag.edge_feature_vector(edge)?;
            let (a, b) = rag.edge_endpoints(edge)?;
            let labels = self.labels_for(&overlaps, a, b);
            self.record(&features, &labels, None);
        }
        if !self.aggregate.is_empty() {
            self.model = Some(self.fit_provisional()?);
        }
        Ok(())
    }

    fn run_epoch(&mut self) -> Result<usize, LearnError> {
        let builder = match self.epoch_priority() {
            Some(priority) => self.builder.clone().with_priority(priority),
            None => self.builder.clone(),
        };
        let mut rag = builder.build(self.labels, self.probabilities)?;
        let mut overlaps = Overlaps::new(&rag, self.labels, self.ground_truth);
        let mut epoch_set = TrainingSet::new(LABEL_MODE_COUNT);
        let mut added = 0;

        while let Some(edge) = self.next_proposal(&mut rag) {
            let features = rag.edge_feature_vector(edge)?;
            let (a, b) = rag.edge_endpoints(edge)?;
            let labels = self.labels_for(&overlaps, a, b);
            if self.record(&features, &labels, Some(&mut epoch_set)) {
                added += 1;
            }

            let execute = match self.config.learning_mode {
                LearningMode::Strict => labels[0] > 0,
                LearningMode::Loose => true,
            };
            if execute {
                match rag.merge(a, b)? {
                    MergeOutcome::Merged { survivor } => {
                        let absorbed = if survivor == a { b } else { a };
                        overlaps.merge(survivor, absorbed);
                    }
                    MergeOutcome::Forbidden { .. } => rag.freeze_edge(edge)?,
                }
            } else {
                rag.freeze_edge(edge)?;
            }
        }

        if self.config.memory {
            self.epochs.push(epoch_set);
        }
        Ok(added)
    }

    /// The priority override for the next epoch, `None` to keep the
    /// builder's own function.
    fn epoch_priority(&self) -> Option<Arc<dyn MergePriority>> {
        match self.config.priority_mode {
            PriorityMode::Random => None,
            PriorityMode::BoundaryMedian => Some(Arc::new(BoundaryMedian)),
            PriorityMode::Active => match &self.model {
                Some(model) => {
                    let classifier: Arc<dyn EdgeClassifier> = Arc::new(model.clone());
                    if self.config.active_vi {
                        Some(Arc::new(ExpectedViChange::new(classifier, self.config.beta)))
                    } else {
                        Some(Arc::new(ClassifierWrong::new(classifier)))
                    }
                }
                // No examples yet: fall back to the untrained default.
                None => Some(Arc::new(BoundaryMedian)),
            },
        }
    }

    fn next_proposal(&mut self, rag: &mut Rag) -> Option<EdgeId> {
        match self.config.priority_mode {
            PriorityMode::Random => {
                let live: Vec<EdgeId> = rag
                    .edge_ids()
                    .into_iter()
                    .filter(|&edge| !rag.is_frozen(edge))
                    .collect();
                if live.is_empty() {
                    return None;
                }
                Some(live[self.rng.gen_range(0..live.len())])
            }
            PriorityMode::BoundaryMedian | PriorityMode::Active => {
                rag.next_queue_edge().map(|(edge, _)| edge)
            }
        }
    }

    /// All three labels for a proposal, authoritative mode first.
    fn labels_for(&self, overlaps: &Overlaps, a: NodeId, b: NodeId) -> [i8; LABEL_MODE_COUNT] {
        let assignment = {
            let left = overlaps.assignment(a);
            let right = overlaps.assignment(b);
            sign(left != 0 && left == right)
        };
        let vi = sign(overlaps.vi_delta(a, b) < 0.0);
        let rand = sign(overlaps.rand_delta(a, b) > 0.0);
        match self.config.labeling_mode {
            LabelingMode::Assignment => [assignment, vi, rand],
            LabelingMode::ViSign => [vi, assignment, rand],
            LabelingMode::RandSign => [rand, assignment, vi],
        }
    }

    /// Records an example into the aggregate (subject to deduplication) and
    /// into the epoch set. Returns whether the feature vector was novel;
    /// novelty feeds the convergence test even when duplicates are kept.
    fn record(
        &mut self,
        features: &[f64],
        labels: &[i8; LABEL_MODE_COUNT],
        epoch_set: Option<&mut TrainingSet>,
    ) -> bool {
        if let Some(epoch_set) = epoch_set {
            epoch_set.push(features, labels, 1.0);
        }
        let key: Vec<u64> = features.iter().map(|value| value.to_bits()).collect();
        let novel = self.seen.insert(key);
        if novel || !self.config.unique {
            self.aggregate.push(features, labels, 1.0);
        }
        novel
    }

    fn fit_provisional(&self) -> Result<LogisticModel, LearnError> {
        LogisticModel::fit(
            self.aggregate.features(),
            self.aggregate.dim(),
            &self.aggregate.authoritative_labels(),
            self.aggregate.weights(),
            &FitConfig::default(),
        )
    }

    fn info_header(&self, epochs: usize, converged: bool, examples: usize) -> String {
        format!(
            "granita training data; learning={:?} labeling={:?} priority={:?}; \
             epochs={epochs} converged={converged} examples={examples} dim={} \
             unique={} seed={}",
            self.config.learning_mode,
            self.config.labeling_mode,
            self.config.priority_mode,
            self.aggregate.dim(),
            self.config.unique,
            self.config.seed,
        )
    }
}

fn sign(merge: bool) -> i8 {
    if merge { 1 } else { -1 }
}

/// Per-region ground-truth overlap counts, kept current across merges.
struct Overlaps {
    per_node: HashMap<NodeId, BTreeMap<u32, usize>>,
    total: usize,
}

impl Overlaps {
    fn new(rag: &Rag, labels: &ArrayD<u32>, ground_truth: &ArrayD<u32>) -> Self {
        let nozeros = rag.nozeros();
        let mut per_node: HashMap<NodeId, BTreeMap<u32, usize>> = HashMap::new();
        let mut total = 0;
        Zip::from(labels).and(ground_truth).for_each(|&label, &truth| {
            if (label == 0 && nozeros) || truth == 0 {
                return;
            }
            *per_node.entry(label).or_default().entry(truth).or_insert(0) += 1;
            total += 1;
        });
        Self { per_node, total }
    }

    /// The truth region with the largest overlap, ties to the smaller
    /// label, `0` for regions with no labelled overlap at all.
    fn assignment(&self, node: NodeId) -> u32 {
        self.per_node
            .get(&node)
            .and_then(|counts| {
                counts
                    .iter()
                    .max_by(|left, right| left.1.cmp(right.1).then(right.0.cmp(left.0)))
                    .map(|(&truth, _)| truth)
            })
            .unwrap_or(0)
    }

    fn vi_delta(&self, a: NodeId, b: NodeId) -> f64 {
        let empty = BTreeMap::new();
        let left = self.per_node.get(&a).unwrap_or(&empty);
        let right = self.per_node.get(&b).unwrap_or(&empty);
        merge_vi_delta(self.total, left, right)
    }

    fn rand_delta(&self, a: NodeId, b: NodeId) -> f64 {
        let empty = BTreeMap::new();
        let left = self.per_node.get(&a).unwrap_or(&empty);
        let right = self.per_node.get(&b).unwrap_or(&empty);
        merge_rand_delta(self.total, left, right)
    }

    fn merge(&mut self, survivor: NodeId, absorbed: NodeId) {
        let Some(absorbed_counts) = self.per_node.remove(&absorbed) else {
            return;
        };
        let survivor_counts = self.per_node.entry(survivor).or_default();
        for (truth, count) in absorbed_counts {
            *survivor_counts.entry(truth).or_insert(0) += count;
        }
    }
}

#[cfg(test)]
mod tests;
