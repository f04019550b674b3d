use crate::io::composite::GeoDataset;
use crate::types::{BoundingRegion, Bucket, BurnPolicy, SamplerError, SamplerResult};
use ndarray::ArrayView2;

/// Fraction of finite label pixels that are burned (> 0).
///
/// `None` when the grid has no finite pixels at all.
pub fn burn_proportion(mask: ArrayView2<f32>) -> Option<f64> {
    let mut valid = 0usize;
    let mut burned = 0usize;
    for &v in mask.iter() {
        if v.is_finite() {
            valid += 1;
            if v > 0.0 {
                burned += 1;
            }
        }
    }
    if valid == 0 {
        None
    } else {
        Some(burned as f64 / valid as f64)
    }
}

impl BurnPolicy {
    /// `None` and a zero threshold both mean any burned pixel counts
    pub fn from_burn_th(burn_th: Option<f64>) -> Self {
        match burn_th {
            Some(burn_th) if burn_th > 0.0 => BurnPolicy::Threshold { burn_th },
            _ => BurnPolicy::AnyBurn,
        }
    }

    /// A threshold of zero behaves like `AnyBurn`: an unburned patch
    /// (proportion 0) is never "burned".
    pub fn classify(&self, proportion: f64) -> Bucket {
        let burned = match *self {
            BurnPolicy::Threshold { burn_th } if burn_th > 0.0 => proportion >= burn_th,
            BurnPolicy::Threshold { .. } | BurnPolicy::AnyBurn => proportion > 0.0,
        };
        if burned {
            Bucket::Burned
        } else {
            Bucket::NotBurned
        }
    }
}

/// Reads a candidate's label layer and decides its bucket
#[derive(Debug, Clone, Copy)]
pub struct BalanceOracle {
    policy: BurnPolicy,
}

impl BalanceOracle {
    pub fn new(policy: BurnPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> BurnPolicy {
        self.policy
    }

    /// Burn proportion of `region`; `EmptyRegion` when nothing readable is there
    pub fn proportion<D: GeoDataset + ?Sized>(
        &self,
        dataset: &D,
        region: &BoundingRegion,
    ) -> SamplerResult<f64> {
        let labels = dataset.read_label(region)?;
        burn_proportion(labels.view()).ok_or(SamplerError::EmptyRegion(*region))
    }

    pub fn evaluate<D: GeoDataset + ?Sized>(
        &self,
        dataset: &D,
        region: &BoundingRegion,
    ) -> SamplerResult<(f64, Bucket)> {
        let proportion = self.proportion(dataset, region)?;
        Ok((proportion, self.policy.classify(proportion)))
    }
}
