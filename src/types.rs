// src/types.rs
use serde::{Serialize, Deserialize};
use geo::{Coord, LineString, Polygon};
use std::fmt;

/// Identifier of a pixel, unique within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PixelId(pub u64);

impl fmt::Display for PixelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an output region. Ids are dense, starting from zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegionId(pub usize);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
}

impl Location {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_squared(&self, other: &Location) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

/// A geolocated raster cell with its measured attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pixel {
    pub id: PixelId,
    pub location: Location,
    pub attributes: Vec<f64>,
    pub geometry: Polygon<f64>,
}

impl Pixel {
    pub fn new(id: u64, location: Location, attributes: Vec<f64>, geometry: Polygon<f64>) -> Self {
        Self { id: PixelId(id), location, attributes, geometry }
    }

    /// Axis-aligned square cell at (`col`, `row`) of a lattice with the given cell size.
    /// The location is the cell center.
    pub fn cell(id: u64, col: i64, row: i64, size: f64, attributes: Vec<f64>) -> Self {
        let x0 = col as f64 * size;
        let y0 = row as f64 * size;
        let geometry = rectangle(x0, y0, x0 + size, y0 + size);
        Self::new(id, Location::new(x0 + size / 2.0, y0 + size / 2.0), attributes, geometry)
    }

    pub fn dimension(&self) -> usize {
        self.attributes.len()
    }
}

/// Closed counter-clockwise rectangle polygon.
pub fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Polygon<f64> {
    Polygon::new(
        LineString::from(vec![
            Coord { x: min_x, y: min_y },
            Coord { x: max_x, y: min_y },
            Coord { x: max_x, y: max_y },
            Coord { x: min_x, y: max_y },
            Coord { x: min_x, y: min_y },
        ]),
        vec![],
    )
}

/// Row-major matrix of per-pixel feature vectors, rows in pixel input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    data: Vec<f64>,
    rows: usize,
    cols: usize,
}

impl FeatureMatrix {
    pub fn new(data: Vec<f64>, rows: usize, cols: usize) -> Self {
        debug_assert_eq!(data.len(), rows * cols);
        Self { data, rows, cols }
    }

    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let data = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Self::new(data, rows.len(), cols)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f64]> {
        (0..self.rows).map(move |i| self.row(i))
    }

    pub fn column(&self, j: usize) -> impl Iterator<Item = f64> + '_ {
        (0..self.rows).map(move |i| self.data[i * self.cols + j])
    }

    /// Squared euclidean distance between two rows.
    pub fn distance_squared(&self, a: usize, b: usize) -> f64 {
        squared_distance(self.row(a), self.row(b))
    }

    /// Mean vector over the given rows.
    pub fn centroid(&self, members: &[usize]) -> Vec<f64> {
        let mut centroid = vec![0.0; self.cols];
        if members.is_empty() {
            return centroid;
        }
        for &m in members {
            for (c, v) in centroid.iter_mut().zip(self.row(m)) {
                *c += v;
            }
        }
        let n = members.len() as f64;
        centroid.iter_mut().for_each(|c| *c /= n);
        centroid
    }
}

pub fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cell_footprint_and_center() {
        let pixel = Pixel::cell(7, 2, 1, 10.0, vec![1.0]);
        assert_eq!(pixel.id, PixelId(7));
        assert_relative_eq!(pixel.location.x, 25.0);
        assert_relative_eq!(pixel.location.y, 15.0);
        assert_eq!(pixel.geometry.exterior().0.len(), 5);
    }

    #[test]
    fn matrix_centroid() {
        let m = FeatureMatrix::from_rows(&[vec![0.0, 2.0], vec![2.0, 4.0], vec![4.0, 0.0]]);
        assert_eq!(m.rows(), 3);
        assert_eq!(m.cols(), 2);
        let c = m.centroid(&[0, 1]);
        assert_relative_eq!(c[0], 1.0);
        assert_relative_eq!(c[1], 3.0);
        assert_relative_eq!(m.distance_squared(0, 2), 20.0);
    }
}
