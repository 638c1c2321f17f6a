//! Build configuration (spec §12).
//!
//! Grounded on `feldspar-map::config::MapConfig`'s shape (a plain `Deserialize`/
//! `Serialize` struct with a `Default` impl) and on entwine's concrete defaults
//! (`examples/original_source/entwine/builder/config.hpp`, `heuristics.hpp`).

use serde::{Deserialize, Serialize};

/// Tunables governing the shape and pacing of a build. See the field-level docs for the
/// entwine default each one is grounded on.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BuildConfig {
    /// `log2` of the grid side `S` inside every chunk (`entwine::ticks`).
    pub body_depth: u8,
    /// Depth below which a chunk never allocates overflow buffers; points that miss
    /// the grid descend directly (`entwine::overflowDepth`).
    pub shared_depth_threshold: u8,
    /// Minimum overflow-bucket size that can be promoted into its own child.
    pub min_node_size: usize,
    /// Total resident size (grid + overflow) that triggers a split attempt.
    pub max_node_size: usize,
    /// Resolves the open question in spec §9: the source's two conflicting readings of
    /// the split-promotion threshold (`min_node_size` vs `min_node_size / 4.0`) are
    /// exposed as this ratio, multiplied against `min_node_size` before the comparison.
    /// `1.0` keeps the stricter, unscaled reading.
    pub split_promotion_ratio: f64,
    /// Points a Clipper processes between clip passes (`heuristics::sleepCount`).
    pub sleep_count: u64,
    /// Chunks a Clipper may hold above `min_clip_depth` before it starts releasing
    /// stale ones (`heuristics::clipCacheSize`).
    pub clip_cache_size: usize,
    /// Depth above which the Clipper never clips (root-adjacent chunks stay resident).
    pub min_clip_depth: u8,
    /// When `false` (the default), a point with the exact coordinates of a resident
    /// voxel is dropped rather than stacked (spec §8 boundary behavior).
    pub retain_duplicates: bool,
    /// Hard ceiling on descent depth; exceeding it is `BuildError::MaxDepthExceeded`
    /// (spec §9: "source uses 64").
    pub max_depth: u8,
    /// Bounded exponential-backoff retry budget for endpoint I/O.
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl BuildConfig {
    /// The effective minimum bucket size a split candidate must clear, after applying
    /// `split_promotion_ratio`.
    pub fn split_promotion_floor(&self) -> usize {
        ((self.min_node_size as f64) * self.split_promotion_ratio).round() as usize
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            body_depth: 8,
            shared_depth_threshold: 4,
            min_node_size: 32_768,
            max_node_size: 65_536,
            split_promotion_ratio: 1.0,
            sleep_count: 65_536 * 32,
            clip_cache_size: 64,
            min_clip_depth: 4,
            retain_duplicates: false,
            max_depth: 64,
            retry_attempts: 8,
            retry_base_delay_ms: 50,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_matches_documented_values() {
        let cfg = BuildConfig::default();
        assert_eq!(cfg.body_depth, 8);
        assert_eq!(cfg.max_node_size, 65_536);
        assert_eq!(cfg.split_promotion_floor(), cfg.min_node_size);
    }

    #[test]
    fn split_promotion_ratio_scales_the_floor() {
        let mut cfg = BuildConfig::default();
        cfg.split_promotion_ratio = 0.25;
        assert_eq!(cfg.split_promotion_floor(), cfg.min_node_size / 4);
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = BuildConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: BuildConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
