//! geoburn: constrained patch sampling over co-registered rasters
//!
//! Builds a composite view of burned-area labels and their predictor rasters
//! (land cover, reanalysis layers, optical composites) and draws patch
//! batches whose burned / not-burned mix matches a fixed quota, for training
//! burn-mask segmentation models.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    Batch, BoundingRegion, Bucket, BurnPolicy, IndexCell, Sample, SampleSize, SamplerError,
    SamplerResult, SourceRole, Units,
};

pub use io::{CompositeDataset, GeoDataset, InMemoryRaster, RasterSource};
#[cfg(feature = "gdal")]
pub use io::GdalRasterSource;
pub use crate::core::{
    CancellationToken, ConstrainedBatchSampler, GridConfig, GridSampler, Quota, SamplerConfig,
};

#[cfg(feature = "python")]
mod python {
    use super::*;
    use numpy::{IntoPyArray, PyArray2, PyArray3, PyReadonlyArray2};
    use pyo3::exceptions::{PyRuntimeError, PyValueError};
    use pyo3::prelude::*;
    use std::sync::Arc;

    type RegionTuple = (f64, f64, f64, f64, f64, f64);

    fn to_py_err(e: SamplerError) -> PyErr {
        match e {
            SamplerError::Configuration(_) => PyValueError::new_err(format!("{}", e)),
            _ => PyRuntimeError::new_err(format!("{}", e)),
        }
    }

    fn region_from_tuple(t: RegionTuple) -> PyResult<BoundingRegion> {
        BoundingRegion::new(t.0, t.1, t.2, t.3, t.4, t.5).map_err(to_py_err)
    }

    fn extract_size(obj: &PyAny) -> PyResult<SampleSize> {
        if let Ok(side) = obj.extract::<f64>() {
            return Ok(SampleSize::Square(side));
        }
        let (width, height): (f64, f64) = obj.extract()?;
        Ok(SampleSize::Rect { width, height })
    }

    fn parse_units(units: &str) -> PyResult<Units> {
        match units.to_lowercase().as_str() {
            "pixels" => Ok(Units::Pixels),
            "ground_distance" | "crs" => Ok(Units::GroundDistance),
            _ => Err(PyValueError::new_err(format!("Invalid units: {}", units))),
        }
    }

    #[cfg(feature = "gdal")]
    fn open_sources(sources: &[(String, String)]) -> SamplerResult<Vec<Box<dyn RasterSource>>> {
        sources
            .iter()
            .map(|(name, root)| {
                let source = GdalRasterSource::open(root, io::descriptor(name)?)?;
                Ok(Box::new(source) as Box<dyn RasterSource>)
            })
            .collect()
    }

    #[cfg(not(feature = "gdal"))]
    fn open_sources(_sources: &[(String, String)]) -> SamplerResult<Vec<Box<dyn RasterSource>>> {
        Err(SamplerError::Configuration(
            "built without the gdal feature; on-disk sources are unavailable".to_string(),
        ))
    }

    /// Python wrapper for CompositeDataset
    #[pyclass(name = "CompositeDataset")]
    struct PyCompositeDataset {
        inner: Arc<CompositeDataset>,
    }

    #[pymethods]
    impl PyCompositeDataset {
        /// `sources` is a list of (descriptor name, root directory)
        #[new]
        #[pyo3(signature = (sources, resolution = None))]
        fn new(sources: Vec<(String, String)>, resolution: Option<f64>) -> PyResult<Self> {
            let opened = open_sources(&sources).map_err(to_py_err)?;
            let mut dataset = CompositeDataset::new(opened).map_err(to_py_err)?;
            if let Some(res) = resolution {
                dataset = dataset.with_resolution(res).map_err(to_py_err)?;
            }
            Ok(PyCompositeDataset {
                inner: Arc::new(dataset),
            })
        }

        #[getter]
        fn bounds(&self) -> RegionTuple {
            self.inner.bounds().to_tuple()
        }

        #[getter]
        fn resolution(&self) -> f64 {
            self.inner.resolution()
        }

        fn __len__(&self) -> usize {
            self.inner.cells().len()
        }

        /// Returns (image, mask) arrays for the region
        fn read<'py>(
            &self,
            py: Python<'py>,
            region: RegionTuple,
        ) -> PyResult<(&'py PyArray3<f32>, &'py PyArray2<f32>)> {
            let region = region_from_tuple(region)?;
            let inner = self.inner.clone();
            let sample = py.allow_threads(move || inner.read(&region)).map_err(to_py_err)?;
            Ok((sample.image.into_pyarray(py), sample.mask.into_pyarray(py)))
        }

        fn __repr__(&self) -> String {
            format!(
                "CompositeDataset(sources={:?}, cells={}, resolution={})",
                self.inner.source_names(),
                self.inner.cells().len(),
                self.inner.resolution()
            )
        }
    }

    /// Python wrapper for ConstrainedBatchSampler
    #[pyclass(name = "ConstrainedBatchSampler")]
    struct PyConstrainedBatchSampler {
        inner: ConstrainedBatchSampler<CompositeDataset>,
    }

    #[pymethods]
    impl PyConstrainedBatchSampler {
        /// `burn_th=None` or `0` classifies any burned pixel as burned; a
        /// positive number classifies by proportion >= burn_th.
        #[new]
        #[pyo3(signature = (
            dataset,
            patch_size,
            batch_size,
            length,
            not_burned_proportion = 0.5,
            burn_th = None,
            roi = None,
            units = "pixels",
            tile_switch_attempts = 100,
            max_attempts_per_batch = 10_000,
            seed = None,
            candidate_wave = 1
        ))]
        #[allow(clippy::too_many_arguments)]
        fn new(
            dataset: PyRef<'_, PyCompositeDataset>,
            patch_size: &PyAny,
            batch_size: usize,
            length: usize,
            not_burned_proportion: f64,
            burn_th: Option<f64>,
            roi: Option<RegionTuple>,
            units: &str,
            tile_switch_attempts: usize,
            max_attempts_per_batch: usize,
            seed: Option<u64>,
            candidate_wave: usize,
        ) -> PyResult<Self> {
            let config = SamplerConfig {
                patch_size: extract_size(patch_size)?,
                units: parse_units(units)?,
                batch_size,
                length,
                not_burned_proportion,
                policy: BurnPolicy::from_burn_th(burn_th),
                roi: roi.map(region_from_tuple).transpose()?,
                tile_switch_attempts,
                max_attempts_per_batch,
                seed,
                candidate_wave,
            };
            let inner =
                ConstrainedBatchSampler::new(dataset.inner.clone(), config).map_err(to_py_err)?;
            Ok(PyConstrainedBatchSampler { inner })
        }

        /// One full pass: a list of batches, each a list of region tuples
        fn batches(&self, py: Python<'_>) -> PyResult<Vec<Vec<RegionTuple>>> {
            let batches = py
                .allow_threads(|| self.inner.batches().collect::<SamplerResult<Vec<Batch>>>())
                .map_err(to_py_err)?;
            Ok(batches
                .iter()
                .map(|batch| batch.iter().map(BoundingRegion::to_tuple).collect())
                .collect())
        }

        /// Abort a pass running on another thread
        fn cancel(&self) {
            self.inner.cancellation_token().cancel();
        }

        #[getter]
        fn quota(&self) -> (usize, usize) {
            let quota = self.inner.quota();
            (quota.not_burned, quota.burned)
        }

        fn __len__(&self) -> usize {
            self.inner.num_batches()
        }
    }

    /// Python wrapper for GridSampler
    #[pyclass(name = "GridSampler")]
    struct PyGridSampler {
        inner: GridSampler,
    }

    #[pymethods]
    impl PyGridSampler {
        #[new]
        #[pyo3(signature = (dataset, patch_size, stride, roi = None, units = "pixels"))]
        fn new(
            dataset: PyRef<'_, PyCompositeDataset>,
            patch_size: &PyAny,
            stride: f64,
            roi: Option<RegionTuple>,
            units: &str,
        ) -> PyResult<Self> {
            let config = GridConfig {
                patch_size: extract_size(patch_size)?,
                stride,
                units: parse_units(units)?,
                roi: roi.map(region_from_tuple).transpose()?,
            };
            let inner = GridSampler::new(&*dataset.inner, &config).map_err(to_py_err)?;
            Ok(PyGridSampler { inner })
        }

        fn regions(&self) -> Vec<RegionTuple> {
            self.inner.iter().map(BoundingRegion::to_tuple).collect()
        }

        fn __len__(&self) -> usize {
            self.inner.len()
        }
    }

    #[pyfunction]
    #[pyo3(name = "burn_proportion")]
    fn py_burn_proportion(mask: PyReadonlyArray2<'_, f32>) -> Option<f64> {
        crate::core::burn_proportion(mask.as_array())
    }

    #[pyfunction]
    #[pyo3(name = "binarize")]
    fn py_binarize<'py>(py: Python<'py>, mask: PyReadonlyArray2<'_, f32>) -> &'py PyArray2<f32> {
        crate::core::binarize(mask.as_array()).into_pyarray(py)
    }

    #[pyfunction]
    #[pyo3(name = "one_hot_encode")]
    fn py_one_hot_encode<'py>(
        py: Python<'py>,
        classes: PyReadonlyArray2<'_, i32>,
        class_values: Vec<i32>,
    ) -> PyResult<&'py PyArray3<u8>> {
        let encoded = crate::core::one_hot_encode(classes.as_array(), &class_values)
            .map_err(to_py_err)?;
        Ok(encoded.into_pyarray(py))
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_class::<PyCompositeDataset>()?;
        m.add_class::<PyConstrainedBatchSampler>()?;
        m.add_class::<PyGridSampler>()?;
        m.add_function(wrap_pyfunction!(py_burn_proportion, m)?)?;
        m.add_function(wrap_pyfunction!(py_binarize, m)?)?;
        m.add_function(wrap_pyfunction!(py_one_hot_encode, m)?)?;
        Ok(())
    }
}
