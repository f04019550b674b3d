use crate::io::descriptors::SourceDescriptor;
use crate::io::raster::{output_shape, resample_nearest, RasterSource};
use crate::types::{
    BandStack, BoundingRegion, GeoTransform, IndexCell, SamplerError, SamplerResult, SourceRole,
};
use gdal::Dataset;
use ndarray::{Array2, Array3, Axis};
use std::path::{Path, PathBuf};

/// One indexed file (or set of per-band sibling files)
#[derive(Debug, Clone)]
struct RasterFile {
    /// One path per band, or a single multi-band path
    paths: Vec<PathBuf>,
    transform: GeoTransform,
    size: (usize, usize),
    bounds: BoundingRegion,
}

/// GeoTIFF collection on disk, indexed by file extent and filename date
#[derive(Debug, Clone)]
pub struct GdalRasterSource {
    descriptor: &'static SourceDescriptor,
    role: SourceRole,
    resolution: f64,
    band_count: usize,
    files: Vec<RasterFile>,
    cells: Vec<IndexCell>,
}

impl GdalRasterSource {
    /// Index every file under `root` matching the descriptor
    pub fn open<P: AsRef<Path>>(
        root: P,
        descriptor: &'static SourceDescriptor,
    ) -> SamplerResult<Self> {
        let root = root.as_ref();
        log::info!("Indexing {} rasters under {}", descriptor.name, root.display());

        let regex = descriptor.compile_regex()?;
        let pattern = root.join("**").join(descriptor.filename_glob);
        let pattern = pattern.to_string_lossy();
        let entries = glob::glob(&pattern).map_err(|e| {
            SamplerError::Configuration(format!("bad glob pattern '{}': {}", pattern, e))
        })?;

        let mut files = Vec::new();
        let mut resolution = None;
        let mut band_count = 0;

        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    log::warn!("Skipping unreadable path: {}", e);
                    continue;
                }
            };
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(parsed) = descriptor.parse_filename(&regex, file_name)? else {
                log::debug!("{} does not match {}", file_name, descriptor.filename_regex);
                continue;
            };

            let paths = match (&parsed.band, descriptor.separate_band_files) {
                (Some((range, _)), true) => descriptor
                    .bands
                    .iter()
                    .map(|band| {
                        let mut sibling = file_name.to_string();
                        sibling.replace_range(range.clone(), band);
                        path.with_file_name(sibling)
                    })
                    .collect(),
                _ => vec![path.clone()],
            };
            if let Some(missing) = paths.iter().find(|p| !p.exists()) {
                return Err(SamplerError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!(
                        "{} is missing band file {}",
                        path.display(),
                        missing.display()
                    ),
                )));
            }

            let dataset = Dataset::open(&path)?;
            let gt = GeoTransform::from_gdal(dataset.geo_transform()?);
            if gt.rotation_x != 0.0 || gt.rotation_y != 0.0 {
                log::warn!("Skipping rotated raster {}", path.display());
                continue;
            }
            let size = dataset.raster_size();
            let (x0, x1, y0, y1) = gt.extent(size.0, size.1);
            let bounds = BoundingRegion::new(x0, x1, y0, y1, parsed.time.0, parsed.time.1)?;

            if files.is_empty() {
                resolution = Some(gt.pixel_width.abs());
                band_count = if descriptor.separate_band_files {
                    descriptor.bands.len()
                } else {
                    dataset.raster_count() as usize
                };
            }

            log::debug!("Indexed {} with bounds {}", path.display(), bounds);
            files.push(RasterFile {
                paths,
                transform: gt,
                size,
                bounds,
            });
        }

        let Some(resolution) = resolution else {
            return Err(SamplerError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no {} files found under {}", descriptor.name, root.display()),
            )));
        };

        let cells = files
            .iter()
            .enumerate()
            .map(|(id, f)| IndexCell {
                id,
                bounds: f.bounds,
            })
            .collect();

        log::info!(
            "Indexed {} {} files, resolution {}, {} bands",
            files.len(),
            descriptor.name,
            resolution,
            band_count
        );

        Ok(Self {
            descriptor,
            role: descriptor.role,
            resolution,
            band_count,
            files,
            cells,
        })
    }

    pub fn descriptor(&self) -> &'static SourceDescriptor {
        self.descriptor
    }

    fn read_file_band(
        file: &RasterFile,
        band: usize,
        overlap: &BoundingRegion,
    ) -> SamplerResult<(Array2<f32>, GeoTransform)> {
        let (path, band_index) = if file.paths.len() > 1 {
            (&file.paths[band], 1)
        } else {
            (&file.paths[0], band + 1)
        };

        let t = &file.transform;
        let (cols, rows) = file.size;
        let px_w = t.pixel_width.abs();
        let px_h = t.pixel_height.abs();

        let col0 = (((overlap.min_x() - t.top_left_x) / px_w).floor().max(0.0) as usize).min(cols);
        let col1 = (((overlap.max_x() - t.top_left_x) / px_w).ceil().max(0.0) as usize).min(cols);
        let row0 = (((t.top_left_y - overlap.max_y()) / px_h).floor().max(0.0) as usize).min(rows);
        let row1 = (((t.top_left_y - overlap.min_y()) / px_h).ceil().max(0.0) as usize).min(rows);
        let window = (col1.saturating_sub(col0), row1.saturating_sub(row0));
        if window.0 == 0 || window.1 == 0 {
            return Err(SamplerError::EmptyRegion(*overlap));
        }

        let dataset = Dataset::open(path)?;
        let rasterband = dataset.rasterband(band_index as isize)?;
        let buffer = rasterband.read_as::<f32>(
            (col0 as isize, row0 as isize),
            window,
            window,
            None,
        )?;
        let data = Array2::from_shape_vec((window.1, window.0), buffer.data).map_err(|e| {
            SamplerError::ShapeMismatch(format!("{}: {}", path.display(), e))
        })?;

        let window_transform = GeoTransform {
            top_left_x: t.top_left_x + col0 as f64 * t.pixel_width,
            top_left_y: t.top_left_y + row0 as f64 * t.pixel_height,
            ..*t
        };
        Ok((data, window_transform))
    }
}

impl RasterSource for GdalRasterSource {
    fn name(&self) -> &str {
        self.descriptor.name
    }

    fn role(&self) -> SourceRole {
        self.role
    }

    fn resolution(&self) -> f64 {
        self.resolution
    }

    fn cells(&self) -> &[IndexCell] {
        &self.cells
    }

    fn band_count(&self) -> usize {
        self.band_count
    }

    fn read(&self, region: &BoundingRegion, resolution: f64) -> SamplerResult<BandStack> {
        let (rows, cols) = output_shape(region, resolution)?;
        let mut out = Array3::<f32>::zeros((self.band_count, rows, cols));
        let mut coverage = Array3::<bool>::from_elem((self.band_count, rows, cols), false);
        let mut hits = 0;

        // first file wins where files overlap
        for file in &self.files {
            let Some(overlap) = file.bounds.overlap_area(region) else {
                continue;
            };
            hits += 1;
            for band in 0..self.band_count {
                let (data, window_transform) = Self::read_file_band(file, band, &overlap)?;
                resample_nearest(
                    data.view(),
                    &window_transform,
                    region,
                    resolution,
                    &mut out.index_axis_mut(Axis(0), band),
                    &mut coverage.index_axis_mut(Axis(0), band),
                );
            }
        }

        if hits == 0 {
            return Err(SamplerError::EmptyRegion(*region));
        }
        log::trace!("{}: read {} from {} files", self.name(), region, hits);
        Ok(out)
    }
}
