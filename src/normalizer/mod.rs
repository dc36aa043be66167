// src/normalizer/mod.rs

use serde::{Serialize, Deserialize};
use log::{info, debug, warn};
use rayon::prelude::*;

use crate::config::subsystems::normalizer::{NormalizerConfig, NormalizationMode, DegeneratePolicy};
use crate::error::{Error, Result};
use crate::types::{FeatureMatrix, Pixel};

/// Per-attribute statistics observed before scaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeStats {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationReport {
    pub mode: NormalizationMode,
    pub stats: Vec<AttributeStats>,
    /// Attributes passed through without scaling because their spread was zero.
    pub degenerate_attributes: Vec<usize>,
    pub warnings: Vec<String>,
}

/// Standardizes attribute vectors so no measurement unit dominates the objective.
#[derive(Debug, Clone, Default)]
pub struct FeatureNormalizer {
    config: NormalizerConfig,
}

impl FeatureNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// Normalizes the pixels' attribute vectors. Input pixels are left untouched.
    pub fn normalize(&self, pixels: &[Pixel]) -> Result<(FeatureMatrix, NormalizationReport)> {
        let dimension = pixels.first().map(|p| p.dimension()).unwrap_or(0);
        for pixel in pixels {
            if pixel.dimension() != dimension {
                return Err(Error::DimensionMismatch {
                    pixel_id: pixel.id,
                    expected: dimension,
                    actual: pixel.dimension(),
                });
            }
        }

        let data = pixels.iter().flat_map(|p| p.attributes.iter().copied()).collect();
        let raw = FeatureMatrix::new(data, pixels.len(), dimension);
        self.normalize_matrix(&raw)
    }

    pub fn normalize_matrix(&self, raw: &FeatureMatrix) -> Result<(FeatureMatrix, NormalizationReport)> {
        let (rows, cols) = (raw.rows(), raw.cols());
        debug!("Normalizing {} rows x {} attributes with mode {}", rows, cols, self.config.mode.as_str());

        let stats: Vec<AttributeStats> = (0..cols)
            .into_par_iter()
            .map(|j| column_stats(raw.column(j)))
            .collect();

        let mut report = NormalizationReport {
            mode: self.config.mode,
            stats,
            degenerate_attributes: Vec::new(),
            warnings: Vec::new(),
        };

        if self.config.mode == NormalizationMode::None || rows == 0 {
            return Ok((raw.clone(), report));
        }

        // Resolve an (offset, scale) per attribute; scale None marks a degenerate column
        let mut transforms = Vec::with_capacity(cols);
        for (j, s) in report.stats.iter().enumerate() {
            let (offset, spread) = match self.config.mode {
                NormalizationMode::ZScore => (s.mean, s.std_dev),
                NormalizationMode::MinMax => (s.min, s.max - s.min),
                NormalizationMode::None => unreachable!(),
            };
            if spread > f64::EPSILON * s.max.abs().max(s.min.abs()).max(1.0) {
                transforms.push((offset, Some(spread)));
                continue;
            }

            if self.config.degenerate_policy == DegeneratePolicy::Error {
                return Err(Error::DegenerateAttribute { attribute: j });
            }
            let message = format!(
                "attribute {} has zero spread under {} normalization; left unscaled",
                j, self.config.mode.as_str()
            );
            warn!("{}", message);
            report.warnings.push(message);
            report.degenerate_attributes.push(j);
            transforms.push((offset, None));
        }

        let mut data = Vec::with_capacity(rows * cols);
        for row in raw.iter_rows() {
            for (v, &(offset, scale)) in row.iter().zip(&transforms) {
                data.push(match scale {
                    Some(scale) => (v - offset) / scale,
                    None => v - offset,
                });
            }
        }

        info!(
            "Normalized {} pixels ({} attributes, {} degenerate)",
            rows, cols, report.degenerate_attributes.len()
        );
        Ok((FeatureMatrix::new(data, rows, cols), report))
    }
}

fn column_stats(values: impl Iterator<Item = f64>) -> AttributeStats {
    let mut n = 0usize;
    let mut mean = 0.0;
    let mut m2 = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    // Welford
    for v in values {
        n += 1;
        let delta = v - mean;
        mean += delta / n as f64;
        m2 += delta * (v - mean);
        min = min.min(v);
        max = max.max(v);
    }
    if n == 0 {
        return AttributeStats { mean: 0.0, std_dev: 0.0, min: 0.0, max: 0.0 };
    }
    AttributeStats {
        mean,
        std_dev: (m2 / n as f64).sqrt(),
        min,
        max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn pixels(rows: &[Vec<f64>]) -> Vec<Pixel> {
        rows.iter()
            .enumerate()
            .map(|(i, attrs)| Pixel::cell(i as u64, i as i64, 0, 1.0, attrs.clone()))
            .collect()
    }

    fn normalizer(mode: NormalizationMode, policy: DegeneratePolicy) -> FeatureNormalizer {
        FeatureNormalizer::new(NormalizerConfig { mode, degenerate_policy: policy })
    }

    #[test]
    fn zscore_centers_and_scales() {
        let input = pixels(&[vec![1.0, 100.0], vec![2.0, 300.0], vec![3.0, 200.0], vec![6.0, 400.0]]);
        let (m, report) = normalizer(NormalizationMode::ZScore, DegeneratePolicy::Skip)
            .normalize(&input)
            .unwrap();
        assert!(report.degenerate_attributes.is_empty());
        for j in 0..m.cols() {
            let col: Vec<f64> = m.column(j).collect();
            let mean = col.iter().sum::<f64>() / col.len() as f64;
            let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / col.len() as f64;
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(var.sqrt(), 1.0, epsilon = 1e-12);
        }
        // Input is untouched
        assert_eq!(input[1].attributes, vec![2.0, 300.0]);
    }

    #[test]
    fn minmax_is_idempotent() {
        let input = pixels(&[vec![-3.0, 10.0], vec![5.0, 12.0], vec![1.0, 11.0]]);
        let n = normalizer(NormalizationMode::MinMax, DegeneratePolicy::Skip);
        let (once, _) = n.normalize(&input).unwrap();
        let (twice, _) = n.normalize_matrix(&once).unwrap();
        for i in 0..once.rows() {
            for (a, b) in once.row(i).iter().zip(twice.row(i)) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-12);
            }
        }
        assert_abs_diff_eq!(once.row(0)[0], 0.0);
        assert_abs_diff_eq!(once.row(1)[0], 1.0);
    }

    #[test]
    fn degenerate_attribute_skipped_with_warning() {
        let input = pixels(&[vec![1.0, 5.0], vec![2.0, 5.0], vec![3.0, 5.0]]);
        let (m, report) = normalizer(NormalizationMode::ZScore, DegeneratePolicy::Skip)
            .normalize(&input)
            .unwrap();
        assert_eq!(report.degenerate_attributes, vec![1]);
        assert_eq!(report.warnings.len(), 1);
        assert!(m.column(1).all(|v| v == 0.0));
        assert!(m.column(1).all(|v| v.is_finite()));
    }

    #[test]
    fn degenerate_attribute_errors_when_configured() {
        let input = pixels(&[vec![5.0], vec![5.0]]);
        let result = normalizer(NormalizationMode::ZScore, DegeneratePolicy::Error).normalize(&input);
        assert!(matches!(result, Err(Error::DegenerateAttribute { attribute: 0 })));
    }

    #[test]
    fn mismatched_dimensions_rejected() {
        let mut input = pixels(&[vec![1.0, 2.0], vec![3.0, 4.0]]);
        input[1].attributes.pop();
        let result = normalizer(NormalizationMode::None, DegeneratePolicy::Skip).normalize(&input);
        assert!(matches!(
            result,
            Err(Error::DimensionMismatch { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn none_mode_passes_through() {
        let input = pixels(&[vec![1.0], vec![9.0]]);
        let (m, _) = normalizer(NormalizationMode::None, DegeneratePolicy::Skip)
            .normalize(&input)
            .unwrap();
        assert_eq!(m.row(1), &[9.0]);
    }
}
