use crate::types::{SamplerError, SamplerResult};
use ndarray::{Array2, Array3, ArrayView2};
use num_traits::{One, ToPrimitive, Zero};

/// Map values > 0 to one and everything else (negatives, NaN) to zero
pub fn binarize<T>(mask: ArrayView2<T>) -> Array2<T>
where
    T: Copy + PartialOrd + Zero + One,
{
    mask.mapv(|v| if v > T::zero() { T::one() } else { T::zero() })
}

/// Expand a class raster into one band per class.
///
/// Values are shifted by the smallest class value, so `class_values` need not
/// start at zero. A pixel outside the class range is an error.
pub fn one_hot_encode<T>(classes: ArrayView2<T>, class_values: &[i32]) -> SamplerResult<Array3<u8>>
where
    T: Copy + ToPrimitive,
{
    let min = *class_values.iter().min().ok_or_else(|| {
        SamplerError::Configuration("one-hot encoding needs at least one class".to_string())
    })? as i64;
    let num_classes = class_values.len();
    let (rows, cols) = classes.dim();
    let mut encoded = Array3::<u8>::zeros((num_classes, rows, cols));

    for ((r, c), value) in classes.indexed_iter() {
        let band = value
            .to_i64()
            .map(|v| v - min)
            .filter(|&b| b >= 0 && (b as usize) < num_classes)
            .ok_or_else(|| {
                SamplerError::InvalidFormat(format!(
                    "pixel ({}, {}) holds {:?}, outside {} classes starting at {}",
                    r,
                    c,
                    value.to_f64(),
                    num_classes,
                    min
                ))
            })?;
        encoded[[band as usize, r, c]] = 1;
    }

    Ok(encoded)
}
