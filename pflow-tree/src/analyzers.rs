//! Derived analyzers (spec §4.7 "Derived analyzers"), exposed as
//! first-class API since summarizing the tree this way is the core
//! system's main value-add, grounded on the percentage/ratio computations
//! in `fxprof_processed_profile::profile`.

use serde::Serialize;

use crate::arena::{TreeArena, ROOT};
use crate::traversal::pre_order;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Balance {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub stddev: f64,
    pub imbalance: f64,
}

/// Computes load-balance statistics across processes from the root's
/// `sampling_counts` (spec: `imbalance = (max - min) / mean`).
pub fn balance(arena: &TreeArena) -> Option<Balance> {
    let counts = &arena.node(ROOT).counters.sampling_counts;
    if counts.is_empty() {
        return None;
    }
    let min = *counts.iter().min().unwrap();
    let max = *counts.iter().max().unwrap();
    let sum: u64 = counts.iter().sum();
    let n = counts.len() as f64;
    let mean = sum as f64 / n;
    let variance = counts
        .iter()
        .map(|&c| {
            let d = c as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let stddev = variance.sqrt();
    let imbalance = if mean == 0.0 {
        0.0
    } else {
        (max as f64 - min as f64) / mean
    };

    Some(Balance { min, max, mean, stddev, imbalance })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotspotEntry {
    pub node_id: u32,
    pub function: String,
    pub library: String,
    pub samples: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotspotMetric {
    TotalSamples,
    SelfSamples,
}

/// Returns the top `n` nodes ranked by `metric`, each annotated with its
/// percentage of the tree's total samples (root's `total_samples`).
pub fn hotspots(arena: &TreeArena, metric: HotspotMetric, n: usize) -> Vec<HotspotEntry> {
    let tree_total = arena.node(ROOT).total_samples;
    let mut entries = Vec::new();
    pre_order(arena, None, &mut |id, node, _depth| {
        if id != ROOT {
            let samples = match metric {
                HotspotMetric::TotalSamples => node.total_samples,
                HotspotMetric::SelfSamples => node.self_samples,
            };
            let percentage = if tree_total == 0 {
                0.0
            } else {
                100.0 * samples as f64 / tree_total as f64
            };
            entries.push(HotspotEntry {
                node_id: id,
                function: node.frame.display_name(),
                library: node.frame.library.clone(),
                samples,
                percentage,
            });
        }
        true
    });
    entries.sort_by(|a, b| b.samples.cmp(&a.samples));
    entries.truncate(n);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::{BuildMode, ResolvedFrame, SampleCountMode};

    fn frame(name: &str) -> ResolvedFrame {
        ResolvedFrame {
            raw_address: 0,
            library: "app".to_string(),
            offset: 0,
            function: Some(name.to_string()),
            file: None,
            line: None,
        }
    }

    #[test]
    fn balance_reports_zero_imbalance_for_even_load() {
        let mut arena = TreeArena::new(BuildMode::ContextFree, SampleCountMode::Inclusive);
        arena.insert(&[frame("main")], 0, 10, 1.0);
        arena.insert(&[frame("main")], 1, 10, 1.0);
        let b = balance(&arena).unwrap();
        assert_eq!(b.min, 10);
        assert_eq!(b.max, 10);
        assert_eq!(b.imbalance, 0.0);
    }

    #[test]
    fn balance_reports_positive_imbalance_for_skewed_load() {
        let mut arena = TreeArena::new(BuildMode::ContextFree, SampleCountMode::Inclusive);
        arena.insert(&[frame("main")], 0, 100, 1.0);
        arena.insert(&[frame("main")], 1, 10, 1.0);
        let b = balance(&arena).unwrap();
        assert!(b.imbalance > 0.0);
    }

    #[test]
    fn balance_is_none_when_no_processes_observed() {
        let arena = TreeArena::new(BuildMode::ContextFree, SampleCountMode::Inclusive);
        assert!(balance(&arena).is_none());
    }

    #[test]
    fn hotspots_ranks_by_total_samples_descending() {
        let mut arena = TreeArena::new(BuildMode::ContextFree, SampleCountMode::Inclusive);
        arena.insert(&[frame("main"), frame("hot")], 0, 100, 1.0);
        arena.insert(&[frame("main"), frame("cold")], 0, 1, 1.0);

        let top = hotspots(&arena, HotspotMetric::TotalSamples, 1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].function, "hot");
        assert!((top[0].percentage - 100.0 * 100.0 / 101.0).abs() < 1e-6);
    }

    #[test]
    fn hotspots_excludes_the_root() {
        let mut arena = TreeArena::new(BuildMode::ContextFree, SampleCountMode::Inclusive);
        arena.insert(&[frame("main")], 0, 5, 1.0);
        let top = hotspots(&arena, HotspotMetric::TotalSamples, 10);
        assert!(top.iter().all(|e| e.node_id != ROOT));
    }
}
