// src/graph/builder.rs

use ahash::AHashSet;
use geo::Coord;
use log::{info, debug};
use rayon::prelude::*;
use rstar::RTree;
use std::time::Instant;

use crate::config::subsystems::adjacency::{AdjacencyConfig, ContiguityPredicate};
use crate::error::{Error, Result};
use crate::types::Pixel;
use super::AdjacencyGraph;
use super::spatial::{
    build_center_rtree, build_footprint_rtree, find_nearest_candidates,
    find_touching_candidates, footprint_bounds, CenterPoint, FootprintRect,
};

/// Candidate lookup, chosen once per build.
enum CandidateIndex {
    AllPairs,
    Footprints(RTree<FootprintRect>),
    Centers(RTree<CenterPoint>),
}

/// Builds the contiguity graph that constrains every downstream stage.
#[derive(Debug, Clone, Default)]
pub struct AdjacencyGraphBuilder {
    config: AdjacencyConfig,
}

impl AdjacencyGraphBuilder {
    pub fn new(config: AdjacencyConfig) -> Self {
        Self { config }
    }

    pub fn build(&self, pixels: &[Pixel]) -> Result<AdjacencyGraph> {
        if pixels.is_empty() {
            return Err(Error::empty("no pixels to build an adjacency graph from"));
        }
        let mut seen = AHashSet::with_capacity(pixels.len());
        for p in pixels {
            if !seen.insert(p.id) {
                return Err(Error::DuplicatePixel(p.id));
            }
        }

        let start = Instant::now();
        let index = if pixels.len() <= self.config.all_pairs_threshold {
            CandidateIndex::AllPairs
        } else {
            match self.config.predicate {
                ContiguityPredicate::BoundarySharing => CandidateIndex::Footprints(build_footprint_rtree(pixels)),
                ContiguityPredicate::KnnDistance { .. } => CandidateIndex::Centers(build_center_rtree(pixels)),
            }
        };
        debug!(
            "Building adjacency for {} pixels with predicate {} ({})",
            pixels.len(),
            self.config.predicate.as_str(),
            if matches!(index, CandidateIndex::AllPairs) { "all pairs" } else { "r-tree" }
        );

        let per_pixel = |i: usize| -> Vec<(usize, f64)> {
            match self.config.predicate {
                ContiguityPredicate::BoundarySharing => self.boundary_neighbors(pixels, i, &index),
                ContiguityPredicate::KnnDistance { k, threshold } => {
                    self.nearest_neighbors(pixels, i, k, threshold, &index)
                }
            }
        };

        // Each pixel's list is computed independently and collected in input order,
        // so parallel and sequential builds produce identical edge sets
        let lists: Vec<Vec<(usize, f64)>> = if self.config.parallel {
            (0..pixels.len()).into_par_iter().map(per_pixel).collect()
        } else {
            (0..pixels.len()).map(per_pixel).collect()
        };

        let edges = lists
            .into_iter()
            .enumerate()
            .flat_map(|(i, list)| list.into_iter().map(move |(j, w)| (i, j, w)));
        let graph = AdjacencyGraph::from_edges(pixels.iter().map(|p| p.id).collect(), edges);

        let stats = graph.stats();
        info!(
            "Adjacency graph: {} nodes, {} edges, {} isolated, {} components in {:?}",
            stats.nodes, stats.edges, stats.isolated, stats.components, start.elapsed()
        );
        Ok(graph)
    }

    // Neighbors j > i whose footprints share a boundary segment with pixel i
    fn boundary_neighbors(&self, pixels: &[Pixel], i: usize, index: &CandidateIndex) -> Vec<(usize, f64)> {
        let tol = self.config.boundary_tolerance;
        let candidates: Vec<usize> = match index {
            CandidateIndex::Footprints(tree) => find_touching_candidates(tree, &pixels[i], tol),
            _ => {
                let (min_a, max_a) = footprint_bounds(&pixels[i]);
                (i + 1..pixels.len())
                    .filter(|&j| {
                        let (min_b, max_b) = footprint_bounds(&pixels[j]);
                        boxes_touch(min_a, max_a, min_b, max_b, tol)
                    })
                    .collect()
            }
        };

        candidates
            .into_iter()
            .filter(|&j| j > i)
            .filter_map(|j| {
                let shared = shared_boundary_length(&pixels[i], &pixels[j], tol);
                (shared > tol).then_some((j, shared))
            })
            .collect()
    }

    fn nearest_neighbors(
        &self,
        pixels: &[Pixel],
        i: usize,
        k: usize,
        threshold: f64,
        index: &CandidateIndex,
    ) -> Vec<(usize, f64)> {
        let origin = [pixels[i].location.x, pixels[i].location.y];
        let found = match index {
            CandidateIndex::Centers(tree) => find_nearest_candidates(tree, origin, i, k, threshold),
            _ => {
                let limit_2 = threshold * threshold;
                let mut all: Vec<(usize, f64)> = (0..pixels.len())
                    .filter(|&j| j != i)
                    .map(|j| (j, pixels[i].location.distance_squared(&pixels[j].location)))
                    .filter(|&(_, d2)| d2 <= limit_2)
                    .collect();
                all.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
                all.truncate(k);
                all
            }
        };
        // Weight by inverse distance; coincident centers get weight 1
        found
            .into_iter()
            .map(|(j, d2)| {
                let d = d2.sqrt();
                (j, if d > 0.0 { 1.0 / d } else { 1.0 })
            })
            .collect()
    }
}

fn boxes_touch(min_a: [f64; 2], max_a: [f64; 2], min_b: [f64; 2], max_b: [f64; 2], tol: f64) -> bool {
    min_a[0] <= max_b[0] + tol
        && min_b[0] <= max_a[0] + tol
        && min_a[1] <= max_b[1] + tol
        && min_b[1] <= max_a[1] + tol
}

/// Total length of boundary segments the two footprints have in common.
/// Touching at a single corner yields zero.
pub fn shared_boundary_length(a: &Pixel, b: &Pixel, tol: f64) -> f64 {
    let segments_a: Vec<(Coord<f64>, Coord<f64>)> = a.geometry.exterior().lines().map(|l| (l.start, l.end)).collect();
    let segments_b: Vec<(Coord<f64>, Coord<f64>)> = b.geometry.exterior().lines().map(|l| (l.start, l.end)).collect();

    let mut total = 0.0;
    for &(p1, p2) in &segments_a {
        for &(q1, q2) in &segments_b {
            total += collinear_overlap(p1, p2, q1, q2, tol);
        }
    }
    total
}

fn collinear_overlap(p1: Coord<f64>, p2: Coord<f64>, q1: Coord<f64>, q2: Coord<f64>, tol: f64) -> f64 {
    let d = p2 - p1;
    let len = (d.x * d.x + d.y * d.y).sqrt();
    if len <= tol {
        return 0.0;
    }
    let u = Coord { x: d.x / len, y: d.y / len };

    // Perpendicular distance of q1 and q2 from the line through p1, p2
    let off = |q: Coord<f64>| {
        let r = q - p1;
        (r.x * u.y - r.y * u.x).abs()
    };
    if off(q1) > tol || off(q2) > tol {
        return 0.0;
    }

    let along = |q: Coord<f64>| {
        let r = q - p1;
        r.x * u.x + r.y * u.y
    };
    let (t1, t2) = (along(q1), along(q2));
    let lo = t1.min(t2).max(0.0);
    let hi = t1.max(t2).min(len);
    (hi - lo).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::types::{rectangle, Location, PixelId};

    fn grid(cols: i64, rows: i64) -> Vec<Pixel> {
        let mut pixels = Vec::new();
        for r in 0..rows {
            for c in 0..cols {
                pixels.push(Pixel::cell((r * cols + c) as u64, c, r, 1.0, vec![0.0]));
            }
        }
        pixels
    }

    fn builder(predicate: ContiguityPredicate, all_pairs_threshold: usize, parallel: bool) -> AdjacencyGraphBuilder {
        AdjacencyGraphBuilder::new(AdjacencyConfig {
            predicate,
            all_pairs_threshold,
            parallel,
            ..AdjacencyConfig::default()
        })
    }

    #[test]
    fn grid_boundary_sharing_is_four_neighbor() {
        let g = AdjacencyGraphBuilder::default().build(&grid(3, 3)).unwrap();
        assert_eq!(g.edge_count(), 12);
        // Center touches the four edge-adjacent cells but not the diagonals
        assert_eq!(g.neighbors(4), &[1, 3, 5, 7]);
        assert!(!g.has_edge(0, 4));
        for (_, _, w) in g.edges() {
            assert_relative_eq!(w, 1.0);
        }
    }

    #[test]
    fn indexed_and_all_pairs_agree() {
        let pixels = grid(12, 9);
        let brute = builder(ContiguityPredicate::BoundarySharing, usize::MAX, false).build(&pixels).unwrap();
        let indexed = builder(ContiguityPredicate::BoundarySharing, 0, true).build(&pixels).unwrap();
        assert_eq!(brute.edges(), indexed.edges());

        let knn = ContiguityPredicate::KnnDistance { k: 4, threshold: 1.01 };
        let brute = builder(knn, usize::MAX, false).build(&pixels).unwrap();
        let indexed = builder(knn, 0, true).build(&pixels).unwrap();
        assert_eq!(brute.edges(), indexed.edges());
    }

    #[test]
    fn repeated_builds_are_identical() {
        let pixels = grid(7, 5);
        let b = builder(ContiguityPredicate::KnnDistance { k: 3, threshold: 5.0 }, 0, true);
        let first = b.build(&pixels).unwrap();
        for _ in 0..3 {
            assert_eq!(b.build(&pixels).unwrap().edges(), first.edges());
        }
    }

    #[test]
    fn isolated_pixels_remain_nodes() {
        let mut pixels = grid(2, 1);
        pixels.push(Pixel::new(
            99,
            Location::new(50.5, 50.5),
            vec![0.0],
            rectangle(50.0, 50.0, 51.0, 51.0),
        ));
        let g = AdjacencyGraphBuilder::default().build(&pixels).unwrap();
        assert_eq!(g.len(), 3);
        assert_eq!(g.degree(2), 0);
        assert_eq!(g.index_of(PixelId(99)), Some(2));
    }

    #[test]
    fn rejects_empty_and_duplicate_input() {
        assert!(matches!(AdjacencyGraphBuilder::default().build(&[]), Err(Error::EmptyInput(_))));
        let mut pixels = grid(2, 1);
        pixels[1].id = pixels[0].id;
        assert!(matches!(
            AdjacencyGraphBuilder::default().build(&pixels),
            Err(Error::DuplicatePixel(_))
        ));
    }

    #[test]
    fn partial_overlap_weight() {
        let a = Pixel::new(0, Location::new(0.5, 0.5), vec![], rectangle(0.0, 0.0, 1.0, 1.0));
        let b = Pixel::new(1, Location::new(1.5, 1.0), vec![], rectangle(1.0, 0.5, 2.0, 1.5));
        assert_relative_eq!(shared_boundary_length(&a, &b, 1e-9), 0.5);
        let corner = Pixel::new(2, Location::new(1.5, 1.5), vec![], rectangle(1.0, 1.0, 2.0, 2.0));
        assert_relative_eq!(shared_boundary_length(&a, &corner, 1e-9), 0.0);
    }
}
