//! Fixed-bin histograms over the unit interval.
//!
//! Probabilities live in `[0, 1]`, so a fixed binning keeps the cache
//! merge-additive: combining two histograms bin-wise equals histogramming
//! the union. Percentiles are read off the cumulative counts, reporting the
//! centre of the bin in which the requested quantile falls.

pub(crate) fn update(bins: &mut [f64], value: f64) {
    let clamped = value.clamp(0.0, 1.0);
    let index = ((clamped * bins.len() as f64) as usize).min(bins.len() - 1);
    bins[index] += 1.0;
}

pub(crate) fn combine(dst: &mut [f64], src: &[f64]) {
    for (accumulated, increment) in dst.iter_mut().zip(src) {
        *accumulated += increment;
    }
}

/// Returns the approximate `quantile` value, or `0.5` for an empty histogram.
pub(crate) fn percentile(bins: &[f64], quantile: f64) -> f64 {
    let total: f64 = bins.iter().sum();
    if total <= 0.0 {
        return 0.5;
    }
    let target = quantile * total;
    let mut cumulative = 0.0;
    for (index, &count) in bins.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return (index as f64 + 0.5) / bins.len() as f64;
        }
    }
    (bins.len() as f64 - 0.5) / bins.len() as f64
}

pub(crate) fn features(bins: &[f64], quantiles: &[f64], out: &mut Vec<f64>) {
    for &quantile in quantiles {
        out.push(percentile(bins, quantile));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    fn histogram(values: &[f64], bins: usize) -> Vec<f64> {
        let mut out = vec![0.0; bins];
        for &value in values {
            update(&mut out, value);
        }
        out
    }

    #[rstest]
    #[case(0.0, 0)]
    #[case(0.999, 15)]
    #[case(1.0, 15)]
    #[case(-0.3, 0)]
    #[case(1.7, 15)]
    fn update_clamps_into_bins(#[case] value: f64, #[case] expected_bin: usize) {
        let bins = histogram(&[value], 16);
        assert_eq!(bins[expected_bin], 1.0);
        assert_eq!(bins.iter().sum::<f64>(), 1.0);
    }

    #[test]
    fn combine_equals_union_histogram() {
        let mut left = histogram(&[0.1, 0.2, 0.9], 8);
        let right = histogram(&[0.5, 0.6], 8);
        combine(&mut left, &right);
        assert_eq!(left, histogram(&[0.1, 0.2, 0.9, 0.5, 0.6], 8));
    }

    #[test]
    fn percentile_tracks_mass() {
        let bins = histogram(&[0.1, 0.1, 0.1, 0.9], 16);
        let median = percentile(&bins, 0.5);
        assert!((median - 0.09375).abs() < 1e-12, "median bin centre, got {median}");
        let upper = percentile(&bins, 0.9);
        assert!(upper > 0.8, "upper decile must land in the heavy tail");
    }

    #[test]
    fn percentile_of_empty_histogram_is_neutral() {
        let bins = vec![0.0; 16];
        assert_eq!(percentile(&bins, 0.5), 0.5);
    }
}
