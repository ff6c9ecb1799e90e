//! Partition comparison metrics.
//!
//! Variation of information and the Rand index between two labelings, built
//! on a shared contingency table, plus the local forms of both: the signed
//! change either metric undergoes when two regions merge, computed from the
//! regions' ground-truth overlap counts alone. The local forms drive the
//! merge labels during learning and the expected-VI priority.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

/// Errors raised while comparing labelings.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum MetricsError {
    /// The two labelings had different lengths.
    #[error("label length mismatch: left={left}, right={right}")]
    LabelLengthMismatch {
        /// Number of labels on the left.
        left: usize,
        /// Number of labels on the right.
        right: usize,
    },
}

/// `x · log2(x)`, with the continuous extension `0` at `x = 0`.
#[must_use]
pub fn xlog2x(x: f64) -> f64 {
    if x <= 0.0 { 0.0 } else { x * x.log2() }
}

fn comb2(value: f64) -> f64 {
    value * (value - 1.0) / 2.0
}

struct Contingency {
    total: f64,
    left_counts: HashMap<u32, usize>,
    right_counts: HashMap<u32, usize>,
    joint: HashMap<(u32, u32), usize>,
}

fn build_contingency(left: &[u32], right: &[u32]) -> Result<Contingency, MetricsError> {
    if left.len() != right.len() {
        return Err(MetricsError::LabelLengthMismatch {
            left: left.len(),
            right: right.len(),
        });
    }
    let mut left_counts = HashMap::new();
    let mut right_counts = HashMap::new();
    let mut joint = HashMap::new();
    for (&a, &b) in left.iter().zip(right) {
        *left_counts.entry(a).or_insert(0) += 1;
        *right_counts.entry(b).or_insert(0) += 1;
        *joint.entry((a, b)).or_insert(0) += 1;
    }
    Ok(Contingency {
        total: left.len() as f64,
        left_counts,
        right_counts,
        joint,
    })
}

fn entropy(counts: &HashMap<u32, usize>, total: f64) -> f64 {
    counts
        .values()
        .map(|&count| {
            let p = count as f64 / total;
            -p * p.log2()
        })
        .sum()
}

/// Variation of information between two labelings, in bits. Zero means the
/// partitions are identical.
///
/// # Errors
/// Returns [`MetricsError::LabelLengthMismatch`] when the slices differ in
/// length.
pub fn variation_of_information(left: &[u32], right: &[u32]) -> Result<f64, MetricsError> {
    let table = build_contingency(left, right)?;
    if table.total == 0.0 {
        return Ok(0.0);
    }
    let left_entropy = entropy(&table.left_counts, table.total);
    let right_entropy = entropy(&table.right_counts, table.total);
    let mut mutual = 0.0;
    for (&(a, b), &count) in &table.joint {
        let joint_p = count as f64 / table.total;
        let left_p = table.left_counts[&a] as f64 / table.total;
        let right_p = table.right_counts[&b] as f64 / table.total;
        mutual += joint_p * (joint_p / (left_p * right_p)).log2();
    }
    Ok((left_entropy + right_entropy - 2.0 * mutual).max(0.0))
}

/// Rand index between two labelings, in `[0, 1]`. One means the partitions
/// agree on every pair.
///
/// # Errors
/// Returns [`MetricsError::LabelLengthMismatch`] when the slices differ in
/// length.
pub fn rand_index(left: &[u32], right: &[u32]) -> Result<f64, MetricsError> {
    let table = build_contingency(left, right)?;
    let total_pairs = comb2(table.total);
    if total_pairs <= 0.0 {
        return Ok(1.0);
    }
    let joint_pairs: f64 = table
        .joint
        .values()
        .map(|&count| comb2(count as f64))
        .sum();
    let left_pairs: f64 = table
        .left_counts
        .values()
        .map(|&count| comb2(count as f64))
        .sum();
    let right_pairs: f64 = table
        .right_counts
        .values()
        .map(|&count| comb2(count as f64))
        .sum();
    let agreements = total_pairs + 2.0 * joint_pairs - left_pairs - right_pairs;
    Ok(agreements / total_pairs)
}

/// The signed change in variation of information caused by merging two
/// regions, from their ground-truth overlap counts. `total` is the number
/// of labelled voxels in the whole volume. Negative means the merge brings
/// the segmentation closer to the ground truth.
#[must_use]
pub fn merge_vi_delta(
    total: usize,
    left: &BTreeMap<u32, usize>,
    right: &BTreeMap<u32, usize>,
) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let n1: usize = left.values().sum();
    let n2: usize = right.values().sum();
    let sizes = pair_entropy(n1 as f64, n2 as f64);
    let mut cross = 0.0;
    for (&truth, &count_left) in left {
        let count_right = right.get(&truth).copied().unwrap_or(0);
        cross += pair_entropy(count_left as f64, count_right as f64);
    }
    for (&truth, &count_right) in right {
        if !left.contains_key(&truth) {
            cross += pair_entropy(0.0, count_right as f64);
        }
    }
    (sizes - 2.0 * cross) / total as f64
}

/// The signed change in the Rand index caused by merging two regions, from
/// their ground-truth overlap counts. Positive means the merge brings the
/// segmentation closer to the ground truth.
#[must_use]
pub fn merge_rand_delta(
    total: usize,
    left: &BTreeMap<u32, usize>,
    right: &BTreeMap<u32, usize>,
) -> f64 {
    let total_pairs = comb2(total as f64);
    if total_pairs <= 0.0 {
        return 0.0;
    }
    let n1: usize = left.values().sum();
    let n2: usize = right.values().sum();
    let mut agreeing = 0.0;
    for (&truth, &count_left) in left {
        let count_right = right.get(&truth).copied().unwrap_or(0);
        agreeing += count_left as f64 * count_right as f64;
    }
    (2.0 * agreeing - n1 as f64 * n2 as f64) / total_pairs
}

/// `h(a + b) - h(a) - h(b)` with `h(x) = x · log2(x)`: the entropy released
/// by pooling two counts.
fn pair_entropy(a: f64, b: f64) -> f64 {
    xlog2x(a + b) - xlog2x(a) - xlog2x(b)
}
