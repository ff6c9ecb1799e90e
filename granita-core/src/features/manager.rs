//! The default moments-plus-histogram feature manager.

use super::{FeatureCache, FeatureManager, histogram, moments};
use crate::error::RagError;
use crate::rag::{EdgeId, Rag};

/// Quantiles reported from the histogram slots, in feature order.
const QUANTILES: [f64; 3] = [0.1, 0.5, 0.9];

const DEFAULT_BINS: usize = 16;

/// Per-channel moment accumulators (count plus power sums to order four) and
/// a fixed-bin histogram over `[0, 1]`, yielding count, mean, variance,
/// skewness, kurtosis, and three percentile features per channel.
#[derive(Clone, Debug)]
pub struct MomentsHistogram {
    channels: usize,
    bins: usize,
}

impl MomentsHistogram {
    /// Creates a manager for probability maps with `channels` channels.
    #[must_use]
    pub fn new(channels: usize) -> Self {
        Self {
            channels: channels.max(1),
            bins: DEFAULT_BINS,
        }
    }

    /// Overrides the histogram bin count.
    #[must_use]
    pub fn with_bins(mut self, bins: usize) -> Self {
        self.bins = bins.max(1);
        self
    }

    /// Returns the number of channels the caches cover.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Returns the histogram bin count.
    #[must_use]
    pub fn bins(&self) -> usize {
        self.bins
    }

    fn slots_per_channel(&self) -> usize {
        moments::MOMENT_SLOTS + self.bins
    }

    fn update(&self, cache: &mut FeatureCache, value: &[f32]) {
        let width = self.slots_per_channel();
        let slots = cache.as_mut_slice();
        for channel in 0..self.channels {
            // Missing channels fall back to the boundary channel so a
            // single-channel map still fills every accumulator.
            let sample = f64::from(value.get(channel).copied().unwrap_or_else(|| value[0]));
            let base = channel * width;
            moments::update(&mut slots[base..base + moments::MOMENT_SLOTS], sample);
            histogram::update(
                &mut slots[base + moments::MOMENT_SLOTS..base + width],
                sample,
            );
        }
    }

    fn combine(&self, dst: &mut FeatureCache, src: &FeatureCache) {
        let width = self.slots_per_channel();
        let dst_slots = dst.as_mut_slice();
        let src_slots = src.as_slice();
        for channel in 0..self.channels {
            let base = channel * width;
            moments::combine(
                &mut dst_slots[base..base + moments::MOMENT_SLOTS],
                &src_slots[base..base + moments::MOMENT_SLOTS],
            );
            histogram::combine(
                &mut dst_slots[base + moments::MOMENT_SLOTS..base + width],
                &src_slots[base + moments::MOMENT_SLOTS..base + width],
            );
        }
    }

    fn extract(&self, cache: &FeatureCache) -> Vec<f64> {
        let width = self.slots_per_channel();
        let slots = cache.as_slice();
        let mut out =
            Vec::with_capacity(self.channels * (moments::MOMENT_FEATURES + QUANTILES.len()));
        for channel in 0..self.channels {
            let base = channel * width;
            moments::features(&slots[base..base + moments::MOMENT_SLOTS], &mut out);
            histogram::features(
                &slots[base + moments::MOMENT_SLOTS..base + width],
                &QUANTILES,
                &mut out,
            );
        }
        out
    }
}

impl FeatureManager for MomentsHistogram {
    fn name(&self) -> &'static str {
        "moments-histogram"
    }

    fn create_node_cache(&self) -> FeatureCache {
        FeatureCache::zeroed(self.channels * self.slots_per_channel())
    }

    fn create_edge_cache(&self) -> FeatureCache {
        FeatureCache::zeroed(self.channels * self.slots_per_channel())
    }

    fn update_node(&self, cache: &mut FeatureCache, value: &[f32]) {
        self.update(cache, value);
    }

    fn update_edge(&self, cache: &mut FeatureCache, value: &[f32]) {
        self.update(cache, value);
    }

    fn combine_nodes(&self, dst: &mut FeatureCache, src: &FeatureCache) {
        self.combine(dst, src);
    }

    fn combine_edges(&self, dst: &mut FeatureCache, src: &FeatureCache) {
        self.combine(dst, src);
    }

    fn node_features(&self, cache: &FeatureCache) -> Vec<f64> {
        self.extract(cache)
    }

    fn edge_features(&self, rag: &Rag, edge: EdgeId) -> Result<Vec<f64>, RagError> {
        Ok(self.extract(rag.edge_cache(edge)?))
    }
}
