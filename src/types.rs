use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Label raster for a single region (rows x cols)
pub type LabelGrid = Array2<f32>;

/// Multi-band raster for a single region (bands x rows x cols)
pub type BandStack = Array3<f32>;

/// A batch of regions, yielded only once its quota is met exactly
pub type Batch = Vec<BoundingRegion>;

/// Closed axis-aligned box in projected x/y and time (seconds since epoch).
///
/// Construction checks `min <= max` on every axis; there are no setters, so
/// a region stays valid for its whole life.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 6]", into = "[f64; 6]")]
pub struct BoundingRegion {
    min_x: f64,
    max_x: f64,
    min_y: f64,
    max_y: f64,
    min_t: f64,
    max_t: f64,
}

impl BoundingRegion {
    pub fn new(
        min_x: f64,
        max_x: f64,
        min_y: f64,
        max_y: f64,
        min_t: f64,
        max_t: f64,
    ) -> SamplerResult<Self> {
        let values = [min_x, max_x, min_y, max_y, min_t, max_t];
        if values.iter().any(|v| v.is_nan()) {
            return Err(SamplerError::Configuration(format!(
                "bounding region has NaN coordinates: {:?}",
                values
            )));
        }
        if min_x > max_x || min_y > max_y || min_t > max_t {
            return Err(SamplerError::Configuration(format!(
                "bounding region is inverted: x {}..{}, y {}..{}, t {}..{}",
                min_x, max_x, min_y, max_y, min_t, max_t
            )));
        }
        Ok(Self {
            min_x,
            max_x,
            min_y,
            max_y,
            min_t,
            max_t,
        })
    }

    /// Spatial box spanning all time
    pub fn spatial(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> SamplerResult<Self> {
        Self::new(min_x, max_x, min_y, max_y, 0.0, f64::MAX)
    }

    pub fn min_x(&self) -> f64 {
        self.min_x
    }

    pub fn max_x(&self) -> f64 {
        self.max_x
    }

    pub fn min_y(&self) -> f64 {
        self.min_y
    }

    pub fn max_y(&self) -> f64 {
        self.max_y
    }

    pub fn min_t(&self) -> f64 {
        self.min_t
    }

    pub fn max_t(&self) -> f64 {
        self.max_t
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// True when the two boxes share at least one point on every axis
    pub fn intersects(&self, other: &BoundingRegion) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
            && self.min_t <= other.max_t
            && other.min_t <= self.max_t
    }

    /// Overlap of two boxes, or `None` when they are disjoint
    pub fn intersection(&self, other: &BoundingRegion) -> Option<BoundingRegion> {
        if !self.intersects(other) {
            return None;
        }
        Some(BoundingRegion {
            min_x: self.min_x.max(other.min_x),
            max_x: self.max_x.min(other.max_x),
            min_y: self.min_y.max(other.min_y),
            max_y: self.max_y.min(other.max_y),
            min_t: self.min_t.max(other.min_t),
            max_t: self.max_t.min(other.max_t),
        })
    }

    /// Overlap with strictly positive x and y extent
    pub fn overlap_area(&self, other: &BoundingRegion) -> Option<BoundingRegion> {
        self.intersection(other)
            .filter(|overlap| overlap.width() > 0.0 && overlap.height() > 0.0)
    }

    /// Smallest box covering both
    pub fn union(&self, other: &BoundingRegion) -> BoundingRegion {
        BoundingRegion {
            min_x: self.min_x.min(other.min_x),
            max_x: self.max_x.max(other.max_x),
            min_y: self.min_y.min(other.min_y),
            max_y: self.max_y.max(other.max_y),
            min_t: self.min_t.min(other.min_t),
            max_t: self.max_t.max(other.max_t),
        }
    }

    pub fn contains(&self, other: &BoundingRegion) -> bool {
        self.min_x <= other.min_x
            && other.max_x <= self.max_x
            && self.min_y <= other.min_y
            && other.max_y <= self.max_y
            && self.min_t <= other.min_t
            && other.max_t <= self.max_t
    }

    /// (minx, maxx, miny, maxy, mint, maxt)
    pub fn to_tuple(&self) -> (f64, f64, f64, f64, f64, f64) {
        (self.min_x, self.max_x, self.min_y, self.max_y, self.min_t, self.max_t)
    }
}

impl TryFrom<[f64; 6]> for BoundingRegion {
    type Error = SamplerError;

    fn try_from(v: [f64; 6]) -> Result<Self, Self::Error> {
        BoundingRegion::new(v[0], v[1], v[2], v[3], v[4], v[5])
    }
}

impl From<BoundingRegion> for [f64; 6] {
    fn from(r: BoundingRegion) -> Self {
        [r.min_x, r.max_x, r.min_y, r.max_y, r.min_t, r.max_t]
    }
}

impl fmt::Display for BoundingRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[x {:.4}..{:.4}, y {:.4}..{:.4}, ",
            self.min_x, self.max_x, self.min_y, self.max_y
        )?;
        if self.max_t < f64::MAX {
            write!(f, "t {}..{}]", self.min_t, self.max_t)
        } else if self.min_t > 0.0 {
            write!(f, "t {}..]", self.min_t)
        } else {
            write!(f, "all time]")
        }
    }
}

/// One indexed extent of the data (a file, or the overlap of files across sources)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexCell {
    pub id: usize,
    pub bounds: BoundingRegion,
}

/// Patch size; a bare number is a square patch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleSize {
    Square(f64),
    Rect { width: f64, height: f64 },
}

impl SampleSize {
    /// (width, height) in whatever units the size was given
    pub fn dims(&self) -> (f64, f64) {
        match *self {
            SampleSize::Square(side) => (side, side),
            SampleSize::Rect { width, height } => (width, height),
        }
    }

    /// (width, height) in ground-distance units
    pub fn ground_dims(&self, units: Units, resolution: f64) -> (f64, f64) {
        let (w, h) = self.dims();
        match units {
            Units::GroundDistance => (w, h),
            Units::Pixels => (w * resolution, h * resolution),
        }
    }
}

impl Default for SampleSize {
    fn default() -> Self {
        SampleSize::Square(256.0)
    }
}

/// How patch sizes and strides are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Units {
    #[default]
    Pixels,
    GroundDistance,
}

/// Classification bucket of a candidate region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bucket {
    NotBurned,
    Burned,
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bucket::NotBurned => write!(f, "not burned"),
            Bucket::Burned => write!(f, "burned"),
        }
    }
}

/// Rule turning a burn proportion into a bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BurnPolicy {
    /// Burned iff proportion >= `burn_th`; `burn_th == 0` acts as `AnyBurn`
    Threshold { burn_th: f64 },
    /// Burned iff any pixel is burned
    AnyBurn,
}

impl Default for BurnPolicy {
    fn default() -> Self {
        BurnPolicy::AnyBurn
    }
}

/// Whether a source contributes image bands or the label mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRole {
    Image,
    Mask,
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    /// Extent of a north-up raster of `cols` x `rows` pixels
    pub fn extent(&self, cols: usize, rows: usize) -> (f64, f64, f64, f64) {
        let x0 = self.top_left_x;
        let x1 = self.top_left_x + cols as f64 * self.pixel_width;
        let y0 = self.top_left_y;
        let y1 = self.top_left_y + rows as f64 * self.pixel_height;
        (x0.min(x1), x0.max(x1), y0.min(y1), y0.max(y1))
    }
}

/// Data read for one region through the composite dataset
#[derive(Debug, Clone)]
pub struct Sample {
    pub region: BoundingRegion,
    pub image: BandStack,
    pub mask: LabelGrid,
}

/// Error types for sampling and raster access
#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsatisfiable quota: {bucket} bucket unmet after {attempts} attempts in {roi}")]
    UnsatisfiableQuota {
        bucket: Bucket,
        roi: BoundingRegion,
        attempts: usize,
    },

    #[error("Region {0} contains no readable pixels")]
    EmptyRegion(BoundingRegion),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Sampling cancelled while filling batch {batch}")]
    Cancelled { batch: usize },

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for sampling operations
pub type SamplerResult<T> = Result<T, SamplerError>;
