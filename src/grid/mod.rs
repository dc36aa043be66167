// src/grid/mod.rs
//
// Turns geolocated point records into a lattice of square-ish cells of a
// fixed ground size, one pixel per occupied cell.

use geo::{GeodesicDestination, Point};
use log::{info, debug};
use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;

use crate::config::subsystems::grid::GridConfig;
use crate::error::{Error, Result};
use crate::types::{rectangle, Location, Pixel, PixelId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub lon: f64,
    pub lat: f64,
    pub values: Vec<f64>,
}

impl PointRecord {
    pub fn new(lon: f64, lat: f64, values: Vec<f64>) -> Self {
        Self { lon, lat, values }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridOutput {
    /// One pixel per occupied cell, ordered by cell id (row-major).
    pub pixels: Vec<Pixel>,
    /// Cell of each input point, in input order.
    pub point_cells: Vec<PixelId>,
    pub rows: usize,
    pub cols: usize,
    pub delta_lat: f64,
    pub delta_lon: f64,
    pub occupied_cells: usize,
    pub empty_cells: usize,
}

pub struct GridCreator {
    cell_size_km: f64,
}

impl GridCreator {
    pub fn new(cell_size_km: f64) -> Self {
        Self { cell_size_km }
    }

    pub fn from_config(config: &GridConfig) -> Self {
        Self::new(config.cell_size_km)
    }

    /// Degrees of latitude and longitude spanned by one cell side at `lat`.
    pub fn cell_deltas(&self, lat: f64) -> (f64, f64) {
        let meters = self.cell_size_km * 1000.0;
        let origin = Point::new(0.0, lat);
        let north = origin.geodesic_destination(0.0, meters);
        let east = origin.geodesic_destination(90.0, meters);
        (north.y() - lat, east.x())
    }

    /// Lays the lattice over the bounding box of `points`, sized from the
    /// southernmost latitude, and bins every point into its cell.
    ///
    /// Pixel attributes are `[point_count, value sums...]`.
    pub fn build(&self, points: &[PointRecord]) -> Result<GridOutput> {
        if !(self.cell_size_km > 0.0 && self.cell_size_km.is_finite()) {
            return Err(Error::Config(format!("cell size must be positive, got {} km", self.cell_size_km)));
        }
        let Some(first) = points.first() else {
            return Err(Error::empty("no points to grid"));
        };
        let dimension = first.values.len();

        let mut min_lat = f64::INFINITY;
        let mut max_lat = f64::NEG_INFINITY;
        let mut min_lon = f64::INFINITY;
        let mut max_lon = f64::NEG_INFINITY;
        for (i, p) in points.iter().enumerate() {
            if p.values.len() != dimension {
                return Err(Error::DimensionMismatch {
                    pixel_id: PixelId(i as u64),
                    expected: dimension,
                    actual: p.values.len(),
                });
            }
            if !(-90.0..=90.0).contains(&p.lat) || !(-180.0..=180.0).contains(&p.lon) {
                return Err(Error::geometry(format!("point {} has invalid coordinates ({}, {})", i, p.lon, p.lat)));
            }
            min_lat = min_lat.min(p.lat);
            max_lat = max_lat.max(p.lat);
            min_lon = min_lon.min(p.lon);
            max_lon = max_lon.max(p.lon);
        }

        let (delta_lat, delta_lon) = self.cell_deltas(min_lat);
        let rows = (((max_lat - min_lat) / delta_lat).ceil() as usize).max(1);
        let cols = (((max_lon - min_lon) / delta_lon).ceil() as usize).max(1);
        debug!(
            "Grid of {}x{} cells, {:.6} x {:.6} degrees each",
            rows, cols, delta_lat, delta_lon
        );

        // Points on the far edge of the box fall into the last row or column
        let cell_of = |p: &PointRecord| -> (usize, usize) {
            let row = (((p.lat - min_lat) / delta_lat).floor() as usize).min(rows - 1);
            let col = (((p.lon - min_lon) / delta_lon).floor() as usize).min(cols - 1);
            (row, col)
        };

        let mut cells: BTreeMap<(usize, usize), (usize, Vec<f64>)> = BTreeMap::new();
        let mut point_cells = Vec::with_capacity(points.len());
        for p in points {
            let (row, col) = cell_of(p);
            point_cells.push(PixelId((row * cols + col) as u64));
            let (count, sums) = cells.entry((row, col)).or_insert_with(|| (0, vec![0.0; dimension]));
            *count += 1;
            for (s, v) in sums.iter_mut().zip(&p.values) {
                *s += v;
            }
        }

        let pixels: Vec<Pixel> = cells
            .into_iter()
            .map(|((row, col), (count, sums))| {
                let lat0 = min_lat + row as f64 * delta_lat;
                let lon0 = min_lon + col as f64 * delta_lon;
                let mut attributes = Vec::with_capacity(dimension + 1);
                attributes.push(count as f64);
                attributes.extend(sums);
                Pixel::new(
                    (row * cols + col) as u64,
                    Location::new(lon0 + delta_lon / 2.0, lat0 + delta_lat / 2.0),
                    attributes,
                    rectangle(lon0, lat0, lon0 + delta_lon, lat0 + delta_lat),
                )
            })
            .collect();

        let occupied_cells = pixels.len();
        let empty_cells = rows * cols - occupied_cells;
        info!(
            "Grid: {} points into {} occupied cells ({} empty) of {} km",
            points.len(), occupied_cells, empty_cells, self.cell_size_km
        );

        Ok(GridOutput {
            pixels,
            point_cells,
            rows,
            cols,
            delta_lat,
            delta_lon,
            occupied_cells,
            empty_cells,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn one_km_at_the_equator() {
        let (dlat, dlon) = GridCreator::new(1.0).cell_deltas(0.0);
        // Roughly 110.57 km per degree of latitude, 111.32 km per degree of longitude
        assert_relative_eq!(dlat, 1.0 / 110.574, epsilon = 1e-5);
        assert_relative_eq!(dlon, 1.0 / 111.320, epsilon = 1e-5);
    }

    #[test]
    fn bins_points_into_cells() {
        let points = vec![
            PointRecord::new(0.0, 0.0, vec![2.0]),
            PointRecord::new(0.0, 0.005, vec![3.0]),
            PointRecord::new(0.02, 0.0, vec![7.0]),
        ];
        let out = GridCreator::new(1.0).build(&points).unwrap();
        assert_eq!((out.rows, out.cols), (1, 3));
        assert_eq!(out.occupied_cells, 2);
        assert_eq!(out.empty_cells, 1);
        assert_eq!(out.point_cells, vec![PixelId(0), PixelId(0), PixelId(2)]);

        assert_eq!(out.pixels[0].id, PixelId(0));
        assert_eq!(out.pixels[0].attributes, vec![2.0, 5.0]);
        assert_eq!(out.pixels[1].id, PixelId(2));
        assert_eq!(out.pixels[1].attributes, vec![1.0, 7.0]);
    }

    #[test]
    fn single_location_gives_one_cell() {
        let points = vec![PointRecord::new(-46.6, -23.5, vec![]); 4];
        let out = GridCreator::new(0.5).build(&points).unwrap();
        assert_eq!((out.rows, out.cols), (1, 1));
        assert_eq!(out.pixels.len(), 1);
        assert_eq!(out.pixels[0].attributes, vec![4.0]);
    }

    #[test]
    fn rejects_bad_input() {
        let creator = GridCreator::new(1.0);
        assert!(matches!(creator.build(&[]), Err(Error::EmptyInput(_))));
        let ragged = vec![PointRecord::new(0.0, 0.0, vec![1.0]), PointRecord::new(0.0, 0.0, vec![])];
        assert!(matches!(creator.build(&ragged), Err(Error::DimensionMismatch { .. })));
        assert!(matches!(GridCreator::new(0.0).build(&ragged), Err(Error::Config(_))));
    }
}
