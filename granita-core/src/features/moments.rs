//! Merge-additive moment accumulators.
//!
//! Each accumulator stores the element count and the first four power sums,
//! from which mean, variance, skewness, and kurtosis are recovered. Sums are
//! associative and commutative, so combining two accumulators equals
//! accumulating over the union of their inputs.

/// Slots per channel: count plus power sums 1 through 4.
pub(crate) const MOMENT_SLOTS: usize = 5;

/// Features extracted per channel: count, mean, variance, skewness, kurtosis.
pub(crate) const MOMENT_FEATURES: usize = 5;

pub(crate) fn update(slots: &mut [f64], value: f64) {
    slots[0] += 1.0;
    slots[1] += value;
    slots[2] += value * value;
    slots[3] += value * value * value;
    slots[4] += value * value * value * value;
}

pub(crate) fn combine(dst: &mut [f64], src: &[f64]) {
    for (accumulated, increment) in dst.iter_mut().zip(src) {
        *accumulated += increment;
    }
}

pub(crate) fn features(slots: &[f64], out: &mut Vec<f64>) {
    let count = slots[0];
    if count <= 0.0 {
        out.extend_from_slice(&[0.0; MOMENT_FEATURES]);
        return;
    }
    let mean = slots[1] / count;
    let variance = (slots[2] / count - mean * mean).max(0.0);
    let third = slots[3] / count - 3.0 * mean * slots[2] / count + 2.0 * mean * mean * mean;
    let fourth = slots[4] / count - 4.0 * mean * slots[3] / count
        + 6.0 * mean * mean * slots[2] / count
        - 3.0 * mean * mean * mean * mean;
    let deviation = variance.sqrt();
    let skewness = if deviation > f64::EPSILON {
        third / (variance * deviation)
    } else {
        0.0
    };
    let kurtosis = if variance > f64::EPSILON {
        fourth / (variance * variance) - 3.0
    } else {
        0.0
    };
    out.extend_from_slice(&[count, mean, variance, skewness, kurtosis]);
}
