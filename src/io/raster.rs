use crate::types::{
    BandStack, BoundingRegion, GeoTransform, IndexCell, SamplerError, SamplerResult, SourceRole,
};
use ndarray::{Array3, ArrayView2, ArrayViewMut2, Axis};

/// A spatially indexed raster collection that can be read by region
pub trait RasterSource: Send + Sync {
    fn name(&self) -> &str;

    fn role(&self) -> SourceRole;

    /// Native ground resolution (units per pixel)
    fn resolution(&self) -> f64;

    fn cells(&self) -> &[IndexCell];

    fn band_count(&self) -> usize;

    /// Union of all index cells
    fn bounds(&self) -> Option<BoundingRegion> {
        let mut cells = self.cells().iter();
        let first = cells.next()?.bounds;
        Some(cells.fold(first, |acc, cell| acc.union(&cell.bounds)))
    }

    /// Read `region` resampled to `resolution`, shaped (bands, rows, cols).
    ///
    /// Pixels not covered by any file are 0. A region that touches no data
    /// at all is an `EmptyRegion` error.
    fn read(&self, region: &BoundingRegion, resolution: f64) -> SamplerResult<BandStack>;
}

/// Output grid size of `region` at `resolution`
pub fn output_shape(region: &BoundingRegion, resolution: f64) -> SamplerResult<(usize, usize)> {
    if !(resolution > 0.0) {
        return Err(SamplerError::Configuration(format!(
            "resolution must be positive, got {}",
            resolution
        )));
    }
    let rows = (region.height() / resolution).round() as usize;
    let cols = (region.width() / resolution).round() as usize;
    if rows == 0 || cols == 0 {
        return Err(SamplerError::EmptyRegion(*region));
    }
    Ok((rows, cols))
}

/// Nearest-neighbour copy of `src` into the pixels of `out` that are not yet
/// covered. Returns the number of pixels written.
pub(crate) fn resample_nearest(
    src: ArrayView2<f32>,
    src_transform: &GeoTransform,
    region: &BoundingRegion,
    resolution: f64,
    out: &mut ArrayViewMut2<f32>,
    coverage: &mut ArrayViewMut2<bool>,
) -> usize {
    let (src_rows, src_cols) = src.dim();
    let (rows, cols) = out.dim();
    let mut written = 0;

    for r in 0..rows {
        let y = region.max_y() - (r as f64 + 0.5) * resolution;
        let sr = ((y - src_transform.top_left_y) / src_transform.pixel_height).floor();
        if sr < 0.0 || sr >= src_rows as f64 {
            continue;
        }
        for c in 0..cols {
            if coverage[[r, c]] {
                continue;
            }
            let x = region.min_x() + (c as f64 + 0.5) * resolution;
            let sc = ((x - src_transform.top_left_x) / src_transform.pixel_width).floor();
            if sc < 0.0 || sc >= src_cols as f64 {
                continue;
            }
            out[[r, c]] = src[[sr as usize, sc as usize]];
            coverage[[r, c]] = true;
            written += 1;
        }
    }

    written
}

/// Raster held entirely in memory, north-up, one time interval.
///
/// Mostly used for synthetic fixtures; the extent can be split into several
/// index cells to mimic a tiled product.
#[derive(Debug, Clone)]
pub struct InMemoryRaster {
    name: String,
    role: SourceRole,
    transform: GeoTransform,
    data: BandStack,
    time: (f64, f64),
    cells: Vec<IndexCell>,
}

impl InMemoryRaster {
    /// `data` is (bands, rows, cols); `(min_x, max_y)` is the top-left corner.
    pub fn new(
        name: impl Into<String>,
        role: SourceRole,
        min_x: f64,
        max_y: f64,
        resolution: f64,
        data: BandStack,
        time: (f64, f64),
    ) -> SamplerResult<Self> {
        if !(resolution > 0.0) {
            return Err(SamplerError::Configuration(format!(
                "resolution must be positive, got {}",
                resolution
            )));
        }
        let (bands, rows, cols) = data.dim();
        if bands == 0 || rows == 0 || cols == 0 {
            return Err(SamplerError::ShapeMismatch(format!(
                "in-memory raster must be non-empty, got {}x{}x{}",
                bands, rows, cols
            )));
        }

        let transform = GeoTransform {
            top_left_x: min_x,
            pixel_width: resolution,
            rotation_x: 0.0,
            top_left_y: max_y,
            rotation_y: 0.0,
            pixel_height: -resolution,
        };
        let (x0, x1, y0, y1) = transform.extent(cols, rows);
        let bounds = BoundingRegion::new(x0, x1, y0, y1, time.0, time.1)?;

        Ok(Self {
            name: name.into(),
            role,
            transform,
            data,
            time,
            cells: vec![IndexCell { id: 0, bounds }],
        })
    }

    /// Single-band label raster spanning all time
    pub fn mask(
        name: impl Into<String>,
        min_x: f64,
        max_y: f64,
        resolution: f64,
        labels: ndarray::Array2<f32>,
    ) -> SamplerResult<Self> {
        let data = labels.insert_axis(Axis(0));
        Self::new(name, SourceRole::Mask, min_x, max_y, resolution, data, (0.0, f64::MAX))
    }

    /// Split the extent into `tiles_x` x `tiles_y` index cells
    pub fn with_tiles(mut self, tiles_x: usize, tiles_y: usize) -> SamplerResult<Self> {
        if tiles_x == 0 || tiles_y == 0 {
            return Err(SamplerError::Configuration(
                "tile counts must be positive".to_string(),
            ));
        }
        let (_, rows, cols) = self.data.dim();
        let (x0, x1, y0, y1) = self.transform.extent(cols, rows);
        let tile_w = (x1 - x0) / tiles_x as f64;
        let tile_h = (y1 - y0) / tiles_y as f64;

        let mut cells = Vec::with_capacity(tiles_x * tiles_y);
        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                let bounds = BoundingRegion::new(
                    x0 + tx as f64 * tile_w,
                    x0 + (tx + 1) as f64 * tile_w,
                    y0 + ty as f64 * tile_h,
                    y0 + (ty + 1) as f64 * tile_h,
                    self.time.0,
                    self.time.1,
                )?;
                cells.push(IndexCell {
                    id: cells.len(),
                    bounds,
                });
            }
        }
        log::debug!("{}: split into {} index cells", self.name, cells.len());
        self.cells = cells;
        Ok(self)
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }
}

impl RasterSource for InMemoryRaster {
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> SourceRole {
        self.role
    }

    fn resolution(&self) -> f64 {
        self.transform.pixel_width
    }

    fn cells(&self) -> &[IndexCell] {
        &self.cells
    }

    fn band_count(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    fn read(&self, region: &BoundingRegion, resolution: f64) -> SamplerResult<BandStack> {
        let (rows, cols) = output_shape(region, resolution)?;
        let touches_data = self
            .cells
            .iter()
            .any(|cell| cell.bounds.overlap_area(region).is_some());
        if !touches_data {
            return Err(SamplerError::EmptyRegion(*region));
        }

        let bands = self.band_count();
        let mut out = Array3::<f32>::zeros((bands, rows, cols));
        let mut coverage = Array3::<bool>::from_elem((bands, rows, cols), false);
        for b in 0..bands {
            resample_nearest(
                self.data.index_axis(Axis(0), b),
                &self.transform,
                region,
                resolution,
                &mut out.index_axis_mut(Axis(0), b),
                &mut coverage.index_axis_mut(Axis(0), b),
            );
        }
        Ok(out)
    }
}
