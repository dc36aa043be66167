// src/optimizer/feasibility.rs

use log::debug;

use crate::error::InfeasibilityReason;
use crate::graph::AdjacencyGraph;

/// Hard constraints of one solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min_regions: usize,
    pub max_regions: usize,
    pub min_size: usize,
    pub max_size: usize,
}

impl Bounds {
    pub fn size_ok(&self, size: usize) -> bool {
        size >= self.min_size && size <= self.max_size
    }
}

/// Connected components with the range of region counts each can host.
#[derive(Debug, Clone)]
pub struct FeasibilityPlan {
    pub components: Vec<Vec<usize>>,
    /// Inclusive `(min, max)` region count per component.
    pub ranges: Vec<(usize, usize)>,
    /// Region totals that pass every necessary condition.
    pub min_total: usize,
    pub max_total: usize,
}

impl FeasibilityPlan {
    /// Region counts worth trying, ascending.
    pub fn region_counts(&self) -> std::ops::RangeInclusive<usize> {
        self.min_total..=self.max_total
    }

    /// Splits `k` regions across components: every component gets its minimum,
    /// the remainder goes one at a time to the component with the most pixels
    /// per region (ties to the lower component).
    pub fn allocate(&self, k: usize) -> Option<Vec<usize>> {
        let base: usize = self.ranges.iter().map(|r| r.0).sum();
        let cap: usize = self.ranges.iter().map(|r| r.1).sum();
        if k < base || k > cap {
            return None;
        }
        let mut counts: Vec<usize> = self.ranges.iter().map(|r| r.0).collect();
        for _ in base..k {
            let mut best: Option<usize> = None;
            let mut best_load = f64::NEG_INFINITY;
            for (c, &(_, max)) in self.ranges.iter().enumerate() {
                if counts[c] >= max {
                    continue;
                }
                let load = self.components[c].len() as f64 / counts[c] as f64;
                if load > best_load {
                    best_load = load;
                    best = Some(c);
                }
            }
            counts[best?] += 1;
        }
        Some(counts)
    }
}

/// Rejects constraint combinations no contiguous partition can satisfy.
///
/// The conditions are necessary, not sufficient: a plan that passes may still
/// fail to split inside a component whose shape resists the size bounds.
pub fn check(graph: &AdjacencyGraph, bounds: &Bounds) -> Result<FeasibilityPlan, InfeasibilityReason> {
    let n = graph.len();
    let required = bounds.min_regions.saturating_mul(bounds.min_size);
    if required > n {
        return Err(InfeasibilityReason::TooFewPixels { required, available: n });
    }
    let capacity = bounds.max_regions.saturating_mul(bounds.max_size);
    if capacity < n {
        return Err(InfeasibilityReason::TooManyPixels { capacity, available: n });
    }

    let components = graph.connected_components();
    if components.len() > bounds.max_regions {
        return Err(InfeasibilityReason::TooManyComponents {
            components: components.len(),
            max_regions: bounds.max_regions,
        });
    }

    // Each component must hold a whole number of regions within the size bounds
    let mut ranges = Vec::with_capacity(components.len());
    for component in &components {
        let s = component.len();
        let lo = s.div_ceil(bounds.max_size).max(1);
        let hi = s / bounds.min_size;
        if lo > hi {
            return Err(InfeasibilityReason::ComponentSizes {
                component_sizes: components.iter().map(|c| c.len()).collect(),
            });
        }
        ranges.push((lo, hi));
    }

    let base: usize = ranges.iter().map(|r| r.0).sum();
    let cap: usize = ranges.iter().map(|r| r.1).sum();
    let min_total = base.max(bounds.min_regions);
    let max_total = cap.min(bounds.max_regions);
    if min_total > max_total {
        return Err(InfeasibilityReason::ComponentSizes {
            component_sizes: components.iter().map(|c| c.len()).collect(),
        });
    }

    debug!(
        "Feasibility: {} components, region totals {}..={}",
        components.len(), min_total, max_total
    );
    Ok(FeasibilityPlan { components, ranges, min_total, max_total })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelId;

    fn path(n: usize) -> AdjacencyGraph {
        let ids = (0..n as u64).map(PixelId).collect();
        AdjacencyGraph::from_edges(ids, (1..n).map(|i| (i - 1, i, 1.0)))
    }

    fn bounds(k: usize, min_size: usize, max_size: usize) -> Bounds {
        Bounds { min_regions: k, max_regions: k, min_size, max_size }
    }

    #[test]
    fn too_few_pixels() {
        let err = check(&path(9), &bounds(3, 5, 9)).unwrap_err();
        assert_eq!(err, InfeasibilityReason::TooFewPixels { required: 15, available: 9 });
    }

    #[test]
    fn too_many_pixels() {
        let err = check(&path(9), &bounds(2, 1, 4)).unwrap_err();
        assert_eq!(err, InfeasibilityReason::TooManyPixels { capacity: 8, available: 9 });
    }

    #[test]
    fn too_many_components() {
        let ids = (0..4).map(PixelId).collect();
        let g = AdjacencyGraph::from_edges(ids, vec![(0, 1, 1.0)]);
        let err = check(&g, &bounds(2, 1, 4)).unwrap_err();
        assert_eq!(err, InfeasibilityReason::TooManyComponents { components: 3, max_regions: 2 });
    }

    #[test]
    fn component_that_cannot_be_split() {
        // Components of 2 and 4 pixels with regions of exactly 3
        let ids = (0..6).map(PixelId).collect();
        let g = AdjacencyGraph::from_edges(ids, vec![(0, 1, 1.0), (2, 3, 1.0), (3, 4, 1.0), (4, 5, 1.0)]);
        let err = check(&g, &bounds(2, 3, 3)).unwrap_err();
        assert!(matches!(err, InfeasibilityReason::ComponentSizes { .. }));
    }

    #[test]
    fn allocation_prefers_heavier_components() {
        let ids = (0..10).map(PixelId).collect();
        // Components of 8 and 2 pixels
        let edges: Vec<_> = (1..8).map(|i| (i - 1, i, 1.0)).chain([(8, 9, 1.0)]).collect();
        let g = AdjacencyGraph::from_edges(ids, edges);
        let plan = check(&g, &Bounds { min_regions: 1, max_regions: 10, min_size: 1, max_size: 10 }).unwrap();
        assert_eq!(plan.region_counts(), 2..=10);
        assert_eq!(plan.allocate(4), Some(vec![3, 1]));
        assert_eq!(plan.allocate(1), None);
    }
}
