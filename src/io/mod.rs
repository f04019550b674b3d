//! I/O modules for indexing and reading co-registered rasters

pub mod raster;
pub mod descriptors;
pub mod composite;
#[cfg(feature = "gdal")]
pub mod gdal_source;

pub use raster::{InMemoryRaster, RasterSource};
pub use descriptors::{descriptor, SourceDescriptor, REGISTRY};
pub use composite::{CompositeDataset, GeoDataset};
#[cfg(feature = "gdal")]
pub use gdal_source::GdalRasterSource;
