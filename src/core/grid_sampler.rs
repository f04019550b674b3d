use crate::io::composite::GeoDataset;
use crate::types::{BoundingRegion, SampleSize, SamplerError, SamplerResult, Units};
use serde::{Deserialize, Serialize};

/// Grid tiling parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub patch_size: SampleSize,
    /// Distance between patch origins, in `units`
    pub stride: f64,
    pub units: Units,
    pub roi: Option<BoundingRegion>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            patch_size: SampleSize::Square(256.0),
            stride: 128.0,
            units: Units::Pixels,
            roi: None,
        }
    }
}

/// Deterministic patch grid over every ROI-clipped index cell, for
/// validation and test passes
#[derive(Debug, Clone)]
pub struct GridSampler {
    regions: Vec<BoundingRegion>,
}

impl GridSampler {
    pub fn new<D: GeoDataset + ?Sized>(dataset: &D, config: &GridConfig) -> SamplerResult<Self> {
        let resolution = dataset.resolution();
        let (width, height) = config.patch_size.ground_dims(config.units, resolution);
        let stride = match config.units {
            Units::Pixels => config.stride * resolution,
            Units::GroundDistance => config.stride,
        };
        if !(width > 0.0 && height > 0.0) {
            return Err(SamplerError::Configuration(format!(
                "patch_size must be positive, got {:?}",
                config.patch_size
            )));
        }
        if !(stride > 0.0) || !stride.is_finite() {
            return Err(SamplerError::Configuration(format!(
                "stride must be positive, got {}",
                config.stride
            )));
        }

        let bounds = dataset.bounds();
        let roi = match config.roi {
            Some(roi) => roi.intersection(&bounds).ok_or_else(|| {
                SamplerError::Configuration(format!(
                    "region of interest {} lies outside the dataset bounds {}",
                    roi, bounds
                ))
            })?,
            None => bounds,
        };

        let mut regions = Vec::new();
        for cell in dataset.cells_intersecting(&roi) {
            let Some(clipped) = cell.bounds.overlap_area(&roi) else {
                continue;
            };
            let ys = offsets(clipped.min_y(), clipped.height(), height, stride);
            let xs = offsets(clipped.min_x(), clipped.width(), width, stride);
            for &y in &ys {
                for &x in &xs {
                    regions.push(BoundingRegion::new(
                        x,
                        x + width,
                        y,
                        y + height,
                        clipped.min_t(),
                        clipped.max_t(),
                    )?);
                }
            }
        }

        log::info!("Grid sampler: {} patches over {}", regions.len(), roi);
        Ok(Self { regions })
    }

    pub fn regions(&self) -> &[BoundingRegion] {
        &self.regions
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BoundingRegion> {
        self.regions.iter()
    }
}

impl<'a> IntoIterator for &'a GridSampler {
    type Item = &'a BoundingRegion;
    type IntoIter = std::slice::Iter<'a, BoundingRegion>;

    fn into_iter(self) -> Self::IntoIter {
        self.regions.iter()
    }
}

/// Patch origins along one axis; the last one is pulled back to the edge
fn offsets(min: f64, extent: f64, size: f64, stride: f64) -> Vec<f64> {
    if extent <= size {
        return vec![min + (extent - size) / 2.0];
    }
    let last = min + extent - size;
    let steps = ((extent - size) / stride).ceil() as usize;
    let mut out: Vec<f64> = (0..=steps)
        .map(|i| (min + i as f64 * stride).min(last))
        .collect();
    out.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{CompositeDataset, InMemoryRaster, RasterSource};
    use ndarray::Array2;

    fn dataset(side: usize, tiles: usize) -> CompositeDataset {
        let mask = InMemoryRaster::mask("burn", 0.0, side as f64, 1.0, Array2::zeros((side, side)))
            .unwrap()
            .with_tiles(tiles, tiles)
            .unwrap();
        let sources: Vec<Box<dyn RasterSource>> = vec![Box::new(mask)];
        CompositeDataset::new(sources).unwrap()
    }

    #[test]
    fn test_offsets_clamp_last_patch() {
        assert_eq!(offsets(0.0, 10.0, 4.0, 4.0), vec![0.0, 4.0, 6.0]);
        assert_eq!(offsets(0.0, 12.0, 4.0, 4.0), vec![0.0, 4.0, 8.0]);
        assert_eq!(offsets(0.0, 2.0, 4.0, 4.0), vec![-1.0]);
    }

    #[test]
    fn test_grid_covers_each_cell() {
        let config = GridConfig {
            patch_size: SampleSize::Square(10.0),
            stride: 10.0,
            ..GridConfig::default()
        };
        let grid = GridSampler::new(&dataset(40, 2), &config).unwrap();
        // two 20x20 cells per axis, 2x2 patches each
        assert_eq!(grid.len(), 16);
        assert!(grid.iter().all(|r| r.width() == 10.0 && r.height() == 10.0));
    }

    #[test]
    fn test_grid_respects_roi() {
        let config = GridConfig {
            patch_size: SampleSize::Square(5.0),
            stride: 5.0,
            units: Units::GroundDistance,
            roi: Some(BoundingRegion::spatial(0.0, 10.0, 0.0, 10.0).unwrap()),
        };
        let grid = GridSampler::new(&dataset(40, 1), &config).unwrap();
        assert_eq!(grid.len(), 4);
        let roi = config.roi.unwrap();
        assert!(grid.iter().all(|r| r.max_x() <= roi.max_x() && r.max_y() <= roi.max_y()));
    }

    #[test]
    fn test_zero_stride_rejected() {
        let config = GridConfig {
            stride: 0.0,
            ..GridConfig::default()
        };
        assert!(GridSampler::new(&dataset(40, 1), &config).is_err());
    }
}
