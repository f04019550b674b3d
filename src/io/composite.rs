use crate::io::raster::RasterSource;
use crate::types::{
    BoundingRegion, IndexCell, LabelGrid, Sample, SamplerError, SamplerResult, SourceRole,
};
use ndarray::{concatenate, Array3, Axis};
use std::sync::Arc;

/// What the samplers need from a dataset: an index, its bounds, and region reads.
pub trait GeoDataset: Send + Sync {
    fn bounds(&self) -> BoundingRegion;

    /// Ground units per output pixel
    fn resolution(&self) -> f64;

    /// Index cells (unclipped) that intersect `roi`
    fn cells_intersecting(&self, roi: &BoundingRegion) -> Vec<IndexCell>;

    /// Label layer of `region`
    fn read_label(&self, region: &BoundingRegion) -> SamplerResult<LabelGrid>;

    /// Image bands and label layer of `region`
    fn read(&self, region: &BoundingRegion) -> SamplerResult<Sample>;
}

impl<D: GeoDataset + ?Sized> GeoDataset for Arc<D> {
    fn bounds(&self) -> BoundingRegion {
        (**self).bounds()
    }

    fn resolution(&self) -> f64 {
        (**self).resolution()
    }

    fn cells_intersecting(&self, roi: &BoundingRegion) -> Vec<IndexCell> {
        (**self).cells_intersecting(roi)
    }

    fn read_label(&self, region: &BoundingRegion) -> SamplerResult<LabelGrid> {
        (**self).read_label(region)
    }

    fn read(&self, region: &BoundingRegion) -> SamplerResult<Sample> {
        (**self).read(region)
    }
}

/// Co-registered sources viewed as one dataset over their spatial/temporal overlap
pub struct CompositeDataset {
    sources: Vec<Box<dyn RasterSource>>,
    mask_index: usize,
    cells: Vec<IndexCell>,
    bounds: BoundingRegion,
    resolution: f64,
}

impl CompositeDataset {
    /// Intersect `sources`; exactly one of them must be the mask
    pub fn new(sources: Vec<Box<dyn RasterSource>>) -> SamplerResult<Self> {
        if sources.is_empty() {
            return Err(SamplerError::Configuration(
                "composite dataset needs at least one source".to_string(),
            ));
        }

        let masks: Vec<usize> = sources
            .iter()
            .enumerate()
            .filter(|(_, s)| s.role() == SourceRole::Mask)
            .map(|(i, _)| i)
            .collect();
        let mask_index = match masks.as_slice() {
            [single] => *single,
            [] => {
                return Err(SamplerError::Configuration(
                    "composite dataset has no mask source".to_string(),
                ))
            }
            _ => {
                let names: Vec<&str> = masks.iter().map(|&i| sources[i].name()).collect();
                return Err(SamplerError::Configuration(format!(
                    "composite dataset has several mask sources: {:?}",
                    names
                )));
            }
        };

        let mut bounds: Option<BoundingRegion> = None;
        for (i, source) in sources.iter().enumerate() {
            let source_bounds = source.bounds().ok_or_else(|| {
                SamplerError::Configuration(format!(
                    "source '{}' has an empty index",
                    source.name()
                ))
            })?;
            bounds = match (i, bounds) {
                (0, _) => Some(source_bounds),
                (_, Some(acc)) => acc.intersection(&source_bounds),
                (_, None) => None,
            };
        }
        let bounds = bounds.ok_or_else(|| {
            SamplerError::Configuration("sources do not overlap in space and time".to_string())
        })?;

        let mut cells: Vec<IndexCell> = sources[0].cells().to_vec();
        for source in &sources[1..] {
            let mut next = Vec::new();
            for a in &cells {
                for b in source.cells() {
                    if let Some(overlap) = a.bounds.overlap_area(&b.bounds) {
                        next.push(IndexCell {
                            id: next.len(),
                            bounds: overlap,
                        });
                    }
                }
            }
            log::debug!(
                "Intersecting with '{}': {} cells remain",
                source.name(),
                next.len()
            );
            cells = next;
        }
        if cells.is_empty() {
            return Err(SamplerError::Configuration(
                "sources share no overlapping index cells".to_string(),
            ));
        }

        let resolution = sources[0].resolution();
        log::info!(
            "Composite of {} sources: {} cells, bounds {}, resolution {}",
            sources.len(),
            cells.len(),
            bounds,
            resolution
        );

        Ok(Self {
            sources,
            mask_index,
            cells,
            bounds,
            resolution,
        })
    }

    /// Override the sampling resolution (defaults to the first source's)
    pub fn with_resolution(mut self, resolution: f64) -> SamplerResult<Self> {
        if !(resolution > 0.0) {
            return Err(SamplerError::Configuration(format!(
                "resolution must be positive, got {}",
                resolution
            )));
        }
        self.resolution = resolution;
        Ok(self)
    }

    pub fn cells(&self) -> &[IndexCell] {
        &self.cells
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }
}

impl GeoDataset for CompositeDataset {
    fn bounds(&self) -> BoundingRegion {
        self.bounds
    }

    fn resolution(&self) -> f64 {
        self.resolution
    }

    fn cells_intersecting(&self, roi: &BoundingRegion) -> Vec<IndexCell> {
        self.cells
            .iter()
            .filter(|cell| cell.bounds.intersects(roi))
            .cloned()
            .collect()
    }

    fn read_label(&self, region: &BoundingRegion) -> SamplerResult<LabelGrid> {
        let stack = self.sources[self.mask_index].read(region, self.resolution)?;
        Ok(stack.index_axis_move(Axis(0), 0))
    }

    fn read(&self, region: &BoundingRegion) -> SamplerResult<Sample> {
        let mut mask = None;
        let mut image_parts = Vec::new();
        for (i, source) in self.sources.iter().enumerate() {
            let stack = source.read(region, self.resolution)?;
            if i == self.mask_index {
                mask = Some(stack.index_axis_move(Axis(0), 0));
            } else {
                image_parts.push(stack);
            }
        }

        let mask = mask.ok_or_else(|| {
            SamplerError::Processing("mask source produced no data".to_string())
        })?;
        let image = if image_parts.is_empty() {
            Array3::zeros((0, mask.nrows(), mask.ncols()))
        } else {
            let views: Vec<_> = image_parts.iter().map(|a| a.view()).collect();
            concatenate(Axis(0), &views)
                .map_err(|e| SamplerError::ShapeMismatch(format!("stacking image bands: {}", e)))?
        };

        Ok(Sample {
            region: *region,
            image,
            mask,
        })
    }
}
