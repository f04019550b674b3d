use crate::core::balance::BalanceOracle;
use crate::core::region_sampler::RegionSampler;
use crate::io::composite::GeoDataset;
use crate::types::{
    Batch, BoundingRegion, Bucket, BurnPolicy, IndexCell, SampleSize, SamplerError, SamplerResult,
    Units,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Every option the constrained batch sampler understands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplerConfig {
    pub patch_size: SampleSize,
    pub units: Units,
    /// Regions per batch
    pub batch_size: usize,
    /// Regions per pass; must be a multiple of `batch_size`
    pub length: usize,
    /// Share of each batch that must be "not burned" (floor), the rest "burned"
    pub not_burned_proportion: f64,
    pub policy: BurnPolicy,
    /// Defaults to the dataset bounds
    pub roi: Option<BoundingRegion>,
    /// Consecutive draws on one cell without an acceptance before switching
    /// cells. Any acceptance resets the count, not only a burned one, so a
    /// cell that is entirely burned is left as readily as one with no burn.
    pub tile_switch_attempts: usize,
    /// Hard ceiling on draws per batch
    pub max_attempts_per_batch: usize,
    pub seed: Option<u64>,
    /// Candidates drawn and classified together
    pub candidate_wave: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            patch_size: SampleSize::Square(256.0),
            units: Units::Pixels,
            batch_size: 64,
            length: 6400,
            not_burned_proportion: 0.5,
            policy: BurnPolicy::AnyBurn,
            roi: None,
            tile_switch_attempts: 100,
            max_attempts_per_batch: 10_000,
            seed: None,
            candidate_wave: 1,
        }
    }
}

impl SamplerConfig {
    pub fn from_json_str(json: &str) -> SamplerResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> SamplerResult<Self> {
        log::info!("Loading sampler config from {}", path.as_ref().display());
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> SamplerResult<()> {
        let fail = |msg: String| Err(SamplerError::Configuration(msg));

        let (w, h) = self.patch_size.dims();
        if !(w > 0.0 && h > 0.0) || !w.is_finite() || !h.is_finite() {
            return fail(format!("patch_size must be positive, got {:?}", self.patch_size));
        }
        if self.batch_size == 0 {
            return fail("batch_size must be positive".to_string());
        }
        if self.length == 0 {
            return fail("length must be positive".to_string());
        }
        if self.length % self.batch_size != 0 {
            return fail(format!(
                "batch_size {} does not evenly divide length {}",
                self.batch_size, self.length
            ));
        }
        if !(0.0..=1.0).contains(&self.not_burned_proportion) {
            return fail(format!(
                "not_burned_proportion must be in [0, 1], got {}",
                self.not_burned_proportion
            ));
        }
        if let BurnPolicy::Threshold { burn_th } = self.policy {
            if !(0.0..=1.0).contains(&burn_th) {
                return fail(format!("burn_th must be in [0, 1], got {}", burn_th));
            }
        }
        if self.tile_switch_attempts == 0 {
            return fail("tile_switch_attempts must be positive".to_string());
        }
        if self.max_attempts_per_batch < self.batch_size {
            return fail(format!(
                "max_attempts_per_batch {} cannot fill a batch of {}",
                self.max_attempts_per_batch, self.batch_size
            ));
        }
        if self.candidate_wave == 0 {
            return fail("candidate_wave must be positive".to_string());
        }
        Ok(())
    }

    pub fn num_batches(&self) -> usize {
        self.length / self.batch_size
    }
}

/// Per-batch bucket targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub not_burned: usize,
    pub burned: usize,
}

impl Quota {
    /// Floor for "not burned", remainder to "burned"
    pub fn from_proportion(not_burned_proportion: f64, batch_size: usize) -> Self {
        let not_burned =
            ((not_burned_proportion * batch_size as f64).floor() as usize).min(batch_size);
        Self {
            not_burned,
            burned: batch_size - not_burned,
        }
    }

    pub fn get(&self, bucket: Bucket) -> usize {
        match bucket {
            Bucket::NotBurned => self.not_burned,
            Bucket::Burned => self.burned,
        }
    }

    /// Count one acceptance against `bucket`; false when it is already full
    fn take(&mut self, bucket: Bucket) -> bool {
        let slot = match bucket {
            Bucket::NotBurned => &mut self.not_burned,
            Bucket::Burned => &mut self.burned,
        };
        if *slot == 0 {
            return false;
        }
        *slot -= 1;
        true
    }

    pub fn is_met(&self) -> bool {
        self.not_burned == 0 && self.burned == 0
    }

    /// Rarer bucket first
    pub fn first_unmet(&self) -> Option<Bucket> {
        if self.burned > 0 {
            Some(Bucket::Burned)
        } else if self.not_burned > 0 {
            Some(Bucket::NotBurned)
        } else {
            None
        }
    }
}

/// Shared flag that aborts an in-flight batch
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State of one batch while it is being filled
#[derive(Debug)]
struct BatchContext {
    index: usize,
    remaining: Quota,
    accepted: Batch,
    attempts: usize,
    anchor: usize,
    attempts_on_anchor: usize,
    tile_switches: usize,
}

impl BatchContext {
    fn new(index: usize, quota: Quota, batch_size: usize, anchor: usize) -> Self {
        Self {
            index,
            remaining: quota,
            accepted: Vec::with_capacity(batch_size),
            attempts: 0,
            anchor,
            attempts_on_anchor: 0,
            tile_switches: 0,
        }
    }
}

/// Rejection sampler producing batches whose bucket counts match the quota exactly.
///
/// Each call to [`batches`](Self::batches) starts a fresh pass with its own
/// RNG and counters, so a sampler can be iterated any number of times. With a
/// fixed seed every pass is identical.
pub struct ConstrainedBatchSampler<D: GeoDataset + ?Sized> {
    dataset: Arc<D>,
    config: SamplerConfig,
    roi: BoundingRegion,
    cells: Vec<IndexCell>,
    region_sampler: RegionSampler,
    oracle: BalanceOracle,
    quota: Quota,
    cancel: CancellationToken,
}

impl<D: GeoDataset + ?Sized> ConstrainedBatchSampler<D> {
    pub fn new(dataset: Arc<D>, config: SamplerConfig) -> SamplerResult<Self> {
        config.validate()?;

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

        let region_sampler =
            RegionSampler::new(config.patch_size, config.units, dataset.resolution())?;
        let cells: Vec<IndexCell> = dataset
            .cells_intersecting(&roi)
            .into_iter()
            .filter_map(|cell| {
                let clipped = cell.bounds.overlap_area(&roi)?;
                region_sampler
                    .fits(&clipped)
                    .then_some(IndexCell {
                        id: cell.id,
                        bounds: clipped,
                    })
            })
            .collect();
        if cells.is_empty() {
            let (w, h) = region_sampler.ground_size();
            return Err(SamplerError::Configuration(format!(
                "no index cell inside {} can hold a {}x{} patch",
                roi, w, h
            )));
        }

        let quota = Quota::from_proportion(config.not_burned_proportion, config.batch_size);
        log::info!(
            "Constrained sampler: {} batches of {} ({} not burned, {} burned) over {} cells in {}",
            config.num_batches(),
            config.batch_size,
            quota.not_burned,
            quota.burned,
            cells.len(),
            roi
        );

        Ok(Self {
            oracle: BalanceOracle::new(config.policy),
            dataset,
            config,
            roi,
            cells,
            region_sampler,
            quota,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Handle for stopping a pass from another thread.
    ///
    /// Cancellation is sticky: every later pass of this sampler also fails
    /// with `Cancelled` until a fresh token is installed with
    /// [`with_cancellation`](Self::with_cancellation).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn quota(&self) -> Quota {
        self.quota
    }

    /// Effective ROI (configured ROI clipped to the dataset)
    pub fn roi(&self) -> &BoundingRegion {
        &self.roi
    }

    /// Candidate cells, already clipped to the ROI
    pub fn cells(&self) -> &[IndexCell] {
        &self.cells
    }

    pub fn num_batches(&self) -> usize {
        self.config.num_batches()
    }

    pub fn dataset(&self) -> &Arc<D> {
        &self.dataset
    }

    /// Start a new pass over `num_batches` batches
    pub fn batches(&self) -> BatchIter<'_, D> {
        let rng = match self.config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        BatchIter {
            sampler: self,
            rng,
            next_batch: 0,
            failed: false,
        }
    }

    /// The same pass flattened into single regions
    pub fn regions(&self) -> impl Iterator<Item = SamplerResult<BoundingRegion>> + '_ {
        self.batches().flat_map(|batch| match batch {
            Ok(regions) => regions.into_iter().map(Ok).collect::<Vec<_>>(),
            Err(e) => vec![Err(e)],
        })
    }

    #[cfg(feature = "parallel")]
    fn classify_all(&self, candidates: &[BoundingRegion]) -> Vec<SamplerResult<(f64, Bucket)>> {
        use rayon::prelude::*;

        if candidates.len() == 1 {
            return vec![self.oracle.evaluate(&*self.dataset, &candidates[0])];
        }
        candidates
            .par_iter()
            .map(|region| self.oracle.evaluate(&*self.dataset, region))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn classify_all(&self, candidates: &[BoundingRegion]) -> Vec<SamplerResult<(f64, Bucket)>> {
        candidates
            .iter()
            .map(|region| self.oracle.evaluate(&*self.dataset, region))
            .collect()
    }

    fn fill_batch(&self, mut ctx: BatchContext, rng: &mut ChaCha8Rng) -> SamplerResult<Batch> {
        let max_attempts = self.config.max_attempts_per_batch;

        loop {
            if ctx.remaining.is_met() {
                log::info!(
                    "Batch {} complete after {} attempts ({} tile switches)",
                    ctx.index,
                    ctx.attempts,
                    ctx.tile_switches
                );
                return Ok(ctx.accepted);
            }
            if self.cancel.is_cancelled() {
                log::warn!("Batch {} cancelled after {} attempts", ctx.index, ctx.attempts);
                return Err(SamplerError::Cancelled { batch: ctx.index });
            }
            if ctx.attempts >= max_attempts {
                let bucket = ctx.remaining.first_unmet().unwrap_or(Bucket::Burned);
                log::warn!(
                    "Batch {} gave up: {} of {} {} regions still missing after {} attempts",
                    ctx.index,
                    ctx.remaining.get(bucket),
                    self.quota.get(bucket),
                    bucket,
                    ctx.attempts
                );
                return Err(SamplerError::UnsatisfiableQuota {
                    bucket,
                    roi: self.roi,
                    attempts: ctx.attempts,
                });
            }

            let wave = self.config.candidate_wave.min(max_attempts - ctx.attempts);
            let cell = &self.cells[ctx.anchor].bounds;
            let candidates = (0..wave)
                .map(|_| self.region_sampler.draw(cell, &mut *rng))
                .collect::<SamplerResult<Vec<_>>>()?;
            let verdicts = self.classify_all(&candidates);

            for (region, verdict) in candidates.into_iter().zip(verdicts) {
                ctx.attempts += 1;
                ctx.attempts_on_anchor += 1;

                match verdict {
                    Ok((proportion, bucket)) => {
                        if ctx.remaining.take(bucket) {
                            log::trace!("Accepted {} as {} ({:.4})", region, bucket, proportion);
                            ctx.accepted.push(region);
                            ctx.attempts_on_anchor = 0;
                        } else {
                            log::trace!(
                                "Rejected {} as {} ({:.4}): bucket full",
                                region,
                                bucket,
                                proportion
                            );
                        }
                    }
                    Err(SamplerError::EmptyRegion(empty)) => {
                        log::warn!("Candidate {} read no pixels, redrawing", empty);
                    }
                    Err(e) => return Err(e),
                }

                if ctx.remaining.is_met() {
                    break;
                }
                if ctx.attempts_on_anchor >= self.config.tile_switch_attempts {
                    ctx.anchor = rng.gen_range(0..self.cells.len());
                    ctx.attempts_on_anchor = 0;
                    ctx.tile_switches += 1;
                    log::debug!(
                        "Batch {}: switching to cell {} after {} attempts",
                        ctx.index,
                        self.cells[ctx.anchor].id,
                        ctx.attempts
                    );
                    // rest of the wave was drawn from the old cell
                    break;
                }
            }
        }
    }
}

/// One pass of batches; stops after the first error
pub struct BatchIter<'a, D: GeoDataset + ?Sized> {
    sampler: &'a ConstrainedBatchSampler<D>,
    rng: ChaCha8Rng,
    next_batch: usize,
    failed: bool,
}

impl<'a, D: GeoDataset + ?Sized> Iterator for BatchIter<'a, D> {
    type Item = SamplerResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next_batch >= self.sampler.num_batches() {
            return None;
        }

        let anchor = self.rng.gen_range(0..self.sampler.cells.len());
        let ctx = BatchContext::new(
            self.next_batch,
            self.sampler.quota,
            self.sampler.config.batch_size,
            anchor,
        );

        match self.sampler.fill_batch(ctx, &mut self.rng) {
            Ok(batch) => {
                self.next_batch += 1;
                Some(Ok(batch))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.failed {
            0
        } else {
            self.sampler.num_batches() - self.next_batch
        };
        (0, Some(remaining))
    }
}

impl<'a, D: GeoDataset + ?Sized> IntoIterator for &'a ConstrainedBatchSampler<D> {
    type Item = SamplerResult<Batch>;
    type IntoIter = BatchIter<'a, D>;

    fn into_iter(self) -> Self::IntoIter {
        self.batches()
    }
}
