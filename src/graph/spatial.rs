use rstar::{RTree, RTreeObject, AABB, PointDistance};
use crate::types::Pixel;

/// Wrapper around a pixel footprint to make it compatible with R-Tree spatial indexing
pub struct FootprintRect {
    /// Pixel index in the input order
    pub pixel_index: usize,
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl RTreeObject for FootprintRect {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.min, self.max)
    }
}

/// Pixel center tagged with its index, for nearest-neighbor queries
pub struct CenterPoint {
    pub pixel_index: usize,
    pub position: [f64; 2],
}

impl RTreeObject for CenterPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

impl PointDistance for CenterPoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.position[0] - point[0];
        let dy = self.position[1] - point[1];
        dx * dx + dy * dy
    }
}

/// Bounding box of a pixel's exterior ring.
pub fn footprint_bounds(pixel: &Pixel) -> ([f64; 2], [f64; 2]) {
    let mut min = [f64::INFINITY, f64::INFINITY];
    let mut max = [f64::NEG_INFINITY, f64::NEG_INFINITY];
    for c in pixel.geometry.exterior().coords() {
        min[0] = min[0].min(c.x);
        min[1] = min[1].min(c.y);
        max[0] = max[0].max(c.x);
        max[1] = max[1].max(c.y);
    }
    if min[0] > max[0] {
        // No footprint: fall back to the location
        let p = [pixel.location.x, pixel.location.y];
        return (p, p);
    }
    (min, max)
}

/// Builds an R-tree over pixel footprints.
///
/// This uses bulk loading for optimal performance and tree balance.
pub fn build_footprint_rtree(pixels: &[Pixel]) -> RTree<FootprintRect> {
    let rects: Vec<FootprintRect> = pixels.iter().enumerate()
        .map(|(i, p)| {
            let (min, max) = footprint_bounds(p);
            FootprintRect { pixel_index: i, min, max }
        })
        .collect();

    RTree::bulk_load(rects)
}

pub fn build_center_rtree(pixels: &[Pixel]) -> RTree<CenterPoint> {
    let points: Vec<CenterPoint> = pixels.iter().enumerate()
        .map(|(i, p)| CenterPoint { pixel_index: i, position: [p.location.x, p.location.y] })
        .collect();

    RTree::bulk_load(points)
}

/// Finds all footprints whose bounding boxes touch the given pixel's box,
/// expanded by `tolerance`. Results are sorted by index.
pub fn find_touching_candidates(
    rtree: &RTree<FootprintRect>,
    pixel: &Pixel,
    tolerance: f64,
) -> Vec<usize> {
    let (min, max) = footprint_bounds(pixel);
    let search_area = AABB::from_corners(
        [min[0] - tolerance, min[1] - tolerance],
        [max[0] + tolerance, max[1] + tolerance],
    );

    let mut found: Vec<usize> = rtree.locate_in_envelope_intersecting(&search_area)
        .map(|rect| rect.pixel_index)
        .collect();
    found.sort_unstable();
    found
}

/// The `k` nearest centers within `threshold` of `origin`, excluding `origin_index`.
/// Equal distances resolve to the lower index.
pub fn find_nearest_candidates(
    rtree: &RTree<CenterPoint>,
    origin: [f64; 2],
    origin_index: usize,
    k: usize,
    threshold: f64,
) -> Vec<(usize, f64)> {
    if k == 0 {
        return Vec::new();
    }
    let limit_2 = threshold * threshold;
    let mut found: Vec<(usize, f64)> = Vec::with_capacity(k + 1);
    for point in rtree.nearest_neighbor_iter(&origin) {
        if point.pixel_index == origin_index {
            continue;
        }
        let d2 = point.distance_2(&origin);
        if d2 > limit_2 {
            break;
        }
        // Keep collecting past k while distances tie with the k-th
        if found.len() >= k && d2 > found[k - 1].1 {
            break;
        }
        found.push((point.pixel_index, d2));
    }
    found.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    found.truncate(k);
    found
}
