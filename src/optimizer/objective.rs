// src/optimizer/objective.rs

use crate::config::subsystems::optimizer::ObjectiveKind;
use crate::types::FeatureMatrix;

/// Running moments of a region's feature vectors: enough to evaluate any
/// objective built from count, sum and sum of squares, and to update it in
/// constant time per attribute when a pixel moves.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionSummary {
    pub count: usize,
    pub sum: Vec<f64>,
    pub sum_sq: f64,
}

impl RegionSummary {
    pub fn empty(dimension: usize) -> Self {
        Self { count: 0, sum: vec![0.0; dimension], sum_sq: 0.0 }
    }

    pub fn from_members(members: &[usize], features: &FeatureMatrix) -> Self {
        let mut summary = Self::empty(features.cols());
        for &m in members {
            summary.add(features.row(m));
        }
        summary
    }

    pub fn add(&mut self, row: &[f64]) {
        self.count += 1;
        for (s, v) in self.sum.iter_mut().zip(row) {
            *s += v;
            self.sum_sq += v * v;
        }
    }

    pub fn remove(&mut self, row: &[f64]) {
        debug_assert!(self.count > 0);
        self.count -= 1;
        for (s, v) in self.sum.iter_mut().zip(row) {
            *s -= v;
            self.sum_sq -= v * v;
        }
        if self.count == 0 {
            // Drop accumulated rounding error
            self.sum.iter_mut().for_each(|s| *s = 0.0);
            self.sum_sq = 0.0;
        }
    }

    pub fn merge(&mut self, other: &RegionSummary) {
        self.count += other.count;
        for (s, o) in self.sum.iter_mut().zip(&other.sum) {
            *s += o;
        }
        self.sum_sq += other.sum_sq;
    }

    pub fn with_added(&self, row: &[f64]) -> Self {
        let mut next = self.clone();
        next.add(row);
        next
    }

    pub fn with_removed(&self, row: &[f64]) -> Self {
        let mut next = self.clone();
        next.remove(row);
        next
    }

    /// Sum of squared deviations from the centroid.
    pub fn squared_deviation(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let norm_sq: f64 = self.sum.iter().map(|s| s * s).sum();
        (self.sum_sq - norm_sq / self.count as f64).max(0.0)
    }
}

/// Within-region dissimilarity to be minimized.
///
/// Implementations must be non-negative and monotone: adding a member to a
/// region never lowers its cost. The exact solver prunes on that property.
pub trait HomogeneityObjective: Send + Sync {
    fn name(&self) -> &'static str;

    fn region_cost(&self, summary: &RegionSummary) -> f64;

    fn total(&self, summaries: &[RegionSummary]) -> f64 {
        summaries.iter().map(|s| self.region_cost(s)).sum()
    }

    /// Cost change when `row` joins the region.
    fn add_delta(&self, summary: &RegionSummary, row: &[f64]) -> f64 {
        self.region_cost(&summary.with_added(row)) - self.region_cost(summary)
    }

    /// Cost change when `row` leaves the region.
    fn remove_delta(&self, summary: &RegionSummary, row: &[f64]) -> f64 {
        self.region_cost(&summary.with_removed(row)) - self.region_cost(summary)
    }
}

/// Sum over regions of squared deviations from the region centroid.
#[derive(Debug, Clone, Copy, Default)]
pub struct SumSquaredDeviation;

impl HomogeneityObjective for SumSquaredDeviation {
    fn name(&self) -> &'static str {
        "sum_squared_deviation"
    }

    fn region_cost(&self, summary: &RegionSummary) -> f64 {
        summary.squared_deviation()
    }
}

/// Sum over regions of squared distances between every pair of members.
/// Equals `count * squared_deviation`, so large regions weigh more.
#[derive(Debug, Clone, Copy, Default)]
pub struct PairwiseDissimilarity;

impl HomogeneityObjective for PairwiseDissimilarity {
    fn name(&self) -> &'static str {
        "pairwise_dissimilarity"
    }

    fn region_cost(&self, summary: &RegionSummary) -> f64 {
        summary.count as f64 * summary.squared_deviation()
    }
}

pub fn objective_for(kind: ObjectiveKind) -> Box<dyn HomogeneityObjective> {
    match kind {
        ObjectiveKind::SumSquaredDeviation => Box::new(SumSquaredDeviation),
        ObjectiveKind::PairwiseDissimilarity => Box::new(PairwiseDissimilarity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn features() -> FeatureMatrix {
        FeatureMatrix::from_rows(&[vec![0.0], vec![2.0], vec![4.0], vec![10.0]])
    }

    #[test]
    fn squared_deviation_matches_direct() {
        let f = features();
        let s = RegionSummary::from_members(&[0, 1, 2], &f);
        // mean 2: 4 + 0 + 4
        assert_abs_diff_eq!(SumSquaredDeviation.region_cost(&s), 8.0, epsilon = 1e-12);
        // pairs: 4 + 16 + 4
        assert_abs_diff_eq!(PairwiseDissimilarity.region_cost(&s), 24.0, epsilon = 1e-12);
    }

    #[test]
    fn deltas_match_recomputation() {
        let f = features();
        let s = RegionSummary::from_members(&[0, 1], &f);
        let add = SumSquaredDeviation.add_delta(&s, f.row(3));
        let after = RegionSummary::from_members(&[0, 1, 3], &f);
        assert_abs_diff_eq!(
            add,
            SumSquaredDeviation.region_cost(&after) - SumSquaredDeviation.region_cost(&s),
            epsilon = 1e-9
        );
        let remove = SumSquaredDeviation.remove_delta(&after, f.row(3));
        assert_abs_diff_eq!(remove, -add, epsilon = 1e-9);
    }

    #[test]
    fn adding_members_never_decreases_cost() {
        let f = features();
        for objective in [objective_for(ObjectiveKind::SumSquaredDeviation), objective_for(ObjectiveKind::PairwiseDissimilarity)] {
            let mut s = RegionSummary::empty(1);
            let mut last = 0.0;
            for i in 0..f.rows() {
                s.add(f.row(i));
                let cost = objective.region_cost(&s);
                assert!(cost + 1e-12 >= last, "{} decreased", objective.name());
                last = cost;
            }
        }
    }

    #[test]
    fn singleton_and_empty_cost_nothing() {
        let f = features();
        assert_eq!(SumSquaredDeviation.region_cost(&RegionSummary::empty(1)), 0.0);
        let single = RegionSummary::from_members(&[3], &f);
        assert_abs_diff_eq!(SumSquaredDeviation.region_cost(&single), 0.0, epsilon = 1e-12);
    }
}
