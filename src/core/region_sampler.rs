use crate::types::{BoundingRegion, SampleSize, SamplerError, SamplerResult, Units};
use rand::Rng;

/// Draw a random box of `size` (ground units, width x height) inside `cell`.
///
/// With a resolution the anchor is snapped to the cell's pixel grid. In a
/// dimension where the cell is smaller than the patch, the patch is centred on
/// the cell instead. The result keeps the cell's full time interval.
pub fn random_region<R: Rng + ?Sized>(
    cell: &BoundingRegion,
    size: (f64, f64),
    resolution: Option<f64>,
    rng: &mut R,
) -> SamplerResult<BoundingRegion> {
    let (width, height) = size;
    if !(width > 0.0 && height > 0.0) || !width.is_finite() || !height.is_finite() {
        return Err(SamplerError::Configuration(format!(
            "patch size must be positive and finite, got {}x{}",
            width, height
        )));
    }
    if let Some(res) = resolution {
        if !(res > 0.0) {
            return Err(SamplerError::Configuration(format!(
                "resolution must be positive, got {}",
                res
            )));
        }
    }

    let min_x = anchor(cell.min_x(), cell.width(), width, resolution, rng);
    let min_y = anchor(cell.min_y(), cell.height(), height, resolution, rng);

    BoundingRegion::new(
        min_x,
        min_x + width,
        min_y,
        min_y + height,
        cell.min_t(),
        cell.max_t(),
    )
}

fn anchor<R: Rng + ?Sized>(
    min: f64,
    extent: f64,
    size: f64,
    resolution: Option<f64>,
    rng: &mut R,
) -> f64 {
    let slack = extent - size;
    if slack < 0.0 {
        return min + slack / 2.0;
    }
    match resolution {
        Some(res) => {
            let steps = (slack / res).floor() as u64;
            min + rng.gen_range(0..=steps) as f64 * res
        }
        None => min + rng.gen::<f64>() * slack,
    }
}

/// Fixed-size patch generator bound to a dataset resolution
#[derive(Debug, Clone, Copy)]
pub struct RegionSampler {
    width: f64,
    height: f64,
    resolution: f64,
}

impl RegionSampler {
    pub fn new(size: SampleSize, units: Units, resolution: f64) -> SamplerResult<Self> {
        if !(resolution > 0.0) {
            return Err(SamplerError::Configuration(format!(
                "resolution must be positive, got {}",
                resolution
            )));
        }
        let (width, height) = size.ground_dims(units, resolution);
        if !(width > 0.0 && height > 0.0) {
            return Err(SamplerError::Configuration(format!(
                "patch size must be positive, got {:?}",
                size
            )));
        }
        Ok(Self {
            width,
            height,
            resolution,
        })
    }

    /// (width, height) in ground units
    pub fn ground_size(&self) -> (f64, f64) {
        (self.width, self.height)
    }

    /// True when a whole patch fits inside `cell`
    pub fn fits(&self, cell: &BoundingRegion) -> bool {
        cell.width() >= self.width && cell.height() >= self.height
    }

    pub fn draw<R: Rng + ?Sized>(
        &self,
        cell: &BoundingRegion,
        rng: &mut R,
    ) -> SamplerResult<BoundingRegion> {
        random_region(cell, (self.width, self.height), Some(self.resolution), rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_draw_stays_inside_cell() {
        let cell = BoundingRegion::new(0.0, 100.0, 0.0, 50.0, 10.0, 20.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..500 {
            let region = random_region(&cell, (10.0, 10.0), Some(1.0), &mut rng).unwrap();
            assert!(cell.contains(&region), "{} escaped {}", region, cell);
            assert_eq!(region.width(), 10.0);
            assert_eq!(region.min_x().fract(), 0.0);
            assert_eq!((region.min_t(), region.max_t()), (10.0, 20.0));
        }
    }

    #[test]
    fn test_undersized_cell_is_centred() {
        let cell = BoundingRegion::new(0.0, 4.0, 0.0, 100.0, 0.0, 1.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let region = random_region(&cell, (10.0, 10.0), Some(1.0), &mut rng).unwrap();
        assert_eq!(region.min_x(), -3.0);
        assert_eq!(region.max_x(), 7.0);
        assert!(region.min_y() >= 0.0 && region.max_y() <= 100.0);
    }

    #[test]
    fn test_exact_fit_anchors_at_origin() {
        let cell = BoundingRegion::new(5.0, 15.0, 5.0, 15.0, 0.0, 1.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let region = random_region(&cell, (10.0, 10.0), Some(1.0), &mut rng).unwrap();
        assert_eq!(region.to_tuple(), (5.0, 15.0, 5.0, 15.0, 0.0, 1.0));
    }

    #[test]
    fn test_non_positive_size_fails_fast() {
        let cell = BoundingRegion::new(0.0, 10.0, 0.0, 10.0, 0.0, 1.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!(random_region(&cell, (0.0, 5.0), None, &mut rng).is_err());
        assert!(random_region(&cell, (-1.0, 5.0), None, &mut rng).is_err());
    }

    #[test]
    fn test_pixel_units_scale_with_resolution() {
        let sampler = RegionSampler::new(SampleSize::Square(16.0), Units::Pixels, 30.0).unwrap();
        assert_eq!(sampler.ground_size(), (480.0, 480.0));
        let small = BoundingRegion::new(0.0, 400.0, 0.0, 1000.0, 0.0, 1.0).unwrap();
        assert!(!sampler.fits(&small));
    }
}
