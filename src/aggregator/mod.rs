// src/aggregator/mod.rs

use ahash::AHashMap;
use geo::{BooleanOps, MultiPolygon, Polygon};
use log::{info, debug};
use rayon::prelude::*;
use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use crate::config::subsystems::aggregator::{AggregatorConfig, Reducer};
use crate::error::{Error, Result};
use crate::optimizer::Assignment;
use crate::types::{Location, Pixel, PixelId, RegionId};

/// One output region with its reduced attributes and footprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRegion {
    pub region_id: RegionId,
    /// Member pixels, ascending.
    pub pixel_ids: Vec<PixelId>,
    pub pixel_count: usize,
    /// Raw (not normalized) attributes reduced per attribute.
    pub attributes: Vec<f64>,
    /// Mean of member locations.
    pub centroid: Location,
    pub geometry: MultiPolygon<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationSummary {
    /// Regions ordered by id.
    pub regions: Vec<AggregatedRegion>,
}

impl AggregationSummary {
    pub fn total_pixels(&self) -> usize {
        self.regions.iter().map(|r| r.pixel_count).sum()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn get(&self, region: RegionId) -> Option<&AggregatedRegion> {
        self.regions.iter().find(|r| r.region_id == region)
    }
}

pub struct RegionAggregator {
    config: AggregatorConfig,
}

impl RegionAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    /// Reduces every region of `assignment` over the original pixels.
    ///
    /// Both directions of the pixel/assignment correspondence are checked:
    /// a pixel without a region is `IncompleteAssignment`, a label for an
    /// unknown pixel is `UnknownPixelReference`.
    pub fn aggregate(&self, assignment: &Assignment, pixels: &[Pixel]) -> Result<AggregationSummary> {
        if pixels.is_empty() {
            return Err(Error::empty("no pixels to aggregate"));
        }
        let start = Instant::now();
        let dimension = pixels[0].dimension();

        let mut index: AHashMap<PixelId, usize> = AHashMap::with_capacity(pixels.len());
        let mut members: BTreeMap<RegionId, Vec<usize>> = BTreeMap::new();
        for (i, pixel) in pixels.iter().enumerate() {
            if pixel.dimension() != dimension {
                return Err(Error::DimensionMismatch {
                    pixel_id: pixel.id,
                    expected: dimension,
                    actual: pixel.dimension(),
                });
            }
            if index.insert(pixel.id, i).is_some() {
                return Err(Error::DuplicatePixel(pixel.id));
            }
            let region = assignment.region_of(pixel.id)
                .ok_or(Error::IncompleteAssignment { pixel_id: pixel.id })?;
            members.entry(region).or_default().push(i);
        }

        // Lowest offending id, so the report does not depend on map order
        if let Some(unknown) = assignment.labels.keys().filter(|id| !index.contains_key(*id)).min() {
            return Err(Error::UnknownPixelReference { pixel_id: *unknown });
        }

        let groups: Vec<(RegionId, Vec<usize>)> = members.into_iter().collect();
        let regions = groups
            .par_iter()
            .map(|(region, members)| self.build_region(*region, members, pixels, dimension))
            .collect::<Result<Vec<_>>>()?;

        let summary = AggregationSummary { regions };
        info!(
            "Aggregated {} pixels into {} regions in {:?}",
            summary.total_pixels(), summary.len(), start.elapsed()
        );
        Ok(summary)
    }

    fn build_region(
        &self,
        region_id: RegionId,
        members: &[usize],
        pixels: &[Pixel],
        dimension: usize,
    ) -> Result<AggregatedRegion> {
        let attributes = (0..dimension)
            .map(|j| reduce(self.config.reducer_for(j), members.iter().map(|&i| pixels[i].attributes[j])))
            .collect();

        let count = members.len() as f64;
        let (sx, sy) = members.iter().fold((0.0, 0.0), |(x, y), &i| {
            (x + pixels[i].location.x, y + pixels[i].location.y)
        });

        let footprints: Vec<Polygon<f64>> = members.iter().map(|&i| pixels[i].geometry.clone()).collect();
        let geometry = if self.config.dissolve_geometry {
            dissolve(footprints).map_err(|msg| {
                Error::geometry(format!("dissolving region {}: {}", region_id, msg))
            })?
        } else {
            MultiPolygon::new(footprints)
        };
        debug!("Region {}: {} pixels, {} polygons", region_id, members.len(), geometry.0.len());

        let mut pixel_ids: Vec<PixelId> = members.iter().map(|&i| pixels[i].id).collect();
        pixel_ids.sort_unstable();
        Ok(AggregatedRegion {
            region_id,
            pixel_count: members.len(),
            pixel_ids,
            attributes,
            centroid: Location::new(sx / count, sy / count),
            geometry,
        })
    }
}

pub fn reduce(reducer: Reducer, values: impl Iterator<Item = f64>) -> f64 {
    match reducer {
        Reducer::Sum => values.sum(),
        Reducer::Mean => {
            let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
            if count == 0 { 0.0 } else { sum / count as f64 }
        }
        Reducer::Min => values.fold(f64::INFINITY, f64::min),
        Reducer::Max => values.fold(f64::NEG_INFINITY, f64::max),
    }
}

/// Union of footprints, merged pairwise in a balanced tree.
///
/// The boolean-ops backend panics on some degenerate rings; that panic is
/// caught and returned as an error message.
pub fn dissolve(footprints: Vec<Polygon<f64>>) -> std::result::Result<MultiPolygon<f64>, String> {
    catch_unwind(AssertUnwindSafe(|| {
        let mut layer: Vec<MultiPolygon<f64>> = footprints
            .into_iter()
            .map(|p| MultiPolygon::new(vec![p]))
            .collect();
        if layer.is_empty() {
            return MultiPolygon::new(vec![]);
        }
        while layer.len() > 1 {
            let mut next = Vec::with_capacity(layer.len() / 2 + 1);
            let mut it = layer.into_iter();
            while let Some(a) = it.next() {
                match it.next() {
                    Some(b) => next.push(a.union(&b)),
                    None => next.push(a),
                }
            }
            layer = next;
        }
        layer.pop().unwrap_or_else(|| MultiPolygon::new(vec![]))
    }))
    .map_err(|panic| {
        panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "polygon union failed".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::Area;

    fn strip() -> Vec<Pixel> {
        // Two rows of three unit cells; attributes [column, 1]
        let mut pixels = Vec::new();
        for r in 0..2 {
            for c in 0..3 {
                pixels.push(Pixel::cell((r * 3 + c) as u64, c, r, 1.0, vec![c as f64, 1.0]));
            }
        }
        pixels
    }

    fn by_column(pixels: &[Pixel]) -> Assignment {
        let labels = pixels.iter()
            .map(|p| (p.id, RegionId((p.id.0 % 3) as usize)))
            .collect();
        Assignment::from_labels(labels)
    }

    #[test]
    fn reduces_and_dissolves_columns() {
        let pixels = strip();
        let config = AggregatorConfig {
            reducers: vec![Reducer::Mean, Reducer::Sum],
            ..AggregatorConfig::default()
        };
        let summary = RegionAggregator::new(config).aggregate(&by_column(&pixels), &pixels).unwrap();
        assert_eq!(summary.len(), 3);
        assert_eq!(summary.total_pixels(), 6);

        for (c, region) in summary.regions.iter().enumerate() {
            assert_eq!(region.region_id, RegionId(c));
            assert_eq!(region.pixel_ids, vec![PixelId(c as u64), PixelId(c as u64 + 3)]);
            assert_relative_eq!(region.attributes[0], c as f64);
            assert_relative_eq!(region.attributes[1], 2.0);
            assert_relative_eq!(region.centroid.x, c as f64 + 0.5);
            assert_relative_eq!(region.centroid.y, 1.0);
            // Two stacked cells merge into one 1x2 polygon
            assert_eq!(region.geometry.0.len(), 1);
            assert_relative_eq!(region.geometry.unsigned_area(), 2.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn undissolved_keeps_each_footprint() {
        let pixels = strip();
        let config = AggregatorConfig { dissolve_geometry: false, ..AggregatorConfig::default() };
        let summary = RegionAggregator::new(config).aggregate(&by_column(&pixels), &pixels).unwrap();
        assert!(summary.regions.iter().all(|r| r.geometry.0.len() == 2));
    }

    #[test]
    fn missing_pixel_is_incomplete() {
        let pixels = strip();
        let mut assignment = by_column(&pixels);
        assignment.labels.remove(&PixelId(4));
        let err = RegionAggregator::new(AggregatorConfig::default()).aggregate(&assignment, &pixels).unwrap_err();
        assert!(matches!(err, Error::IncompleteAssignment { pixel_id: PixelId(4) }));
        assert!(err.is_contract_violation());
    }

    #[test]
    fn stray_label_is_unknown_reference() {
        let pixels = strip();
        let mut assignment = by_column(&pixels);
        assignment.labels.insert(PixelId(77), RegionId(0));
        let err = RegionAggregator::new(AggregatorConfig::default()).aggregate(&assignment, &pixels).unwrap_err();
        assert!(matches!(err, Error::UnknownPixelReference { pixel_id: PixelId(77) }));
    }

    #[test]
    fn reducers() {
        let values = [3.0, -1.0, 4.0];
        assert_relative_eq!(reduce(Reducer::Sum, values.iter().copied()), 6.0);
        assert_relative_eq!(reduce(Reducer::Mean, values.iter().copied()), 2.0);
        assert_relative_eq!(reduce(Reducer::Min, values.iter().copied()), -1.0);
        assert_relative_eq!(reduce(Reducer::Max, values.iter().copied()), 4.0);
    }
}
