use geoburn::core::BalanceOracle;
use geoburn::{
    Batch, BoundingRegion, Bucket, BurnPolicy, CancellationToken, CompositeDataset,
    ConstrainedBatchSampler,
    GeoDataset, IndexCell, InMemoryRaster, RasterSource, Sample, SampleSize, SamplerConfig,
    SamplerError, SamplerResult,
};
use ndarray::{s, Array2};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 100x100 units at 1 unit/pixel, burned square over x 40..60, y 40..60
fn burn_square(tiles: usize) -> CompositeDataset {
    let mut labels = Array2::<f32>::zeros((100, 100));
    labels.slice_mut(s![40..60, 40..60]).fill(1.0);
    let mask = InMemoryRaster::mask("modis_jd", 0.0, 100.0, 1.0, labels)
        .unwrap()
        .with_tiles(tiles, tiles)
        .unwrap();
    let sources: Vec<Box<dyn RasterSource>> = vec![Box::new(mask)];
    CompositeDataset::new(sources).unwrap()
}

fn all_zero() -> CompositeDataset {
    let labels = Array2::zeros((100, 100));
    let mask = InMemoryRaster::mask("modis_jd", 0.0, 100.0, 1.0, labels).unwrap();
    let sources: Vec<Box<dyn RasterSource>> = vec![Box::new(mask)];
    CompositeDataset::new(sources).unwrap()
}

fn square() -> BoundingRegion {
    BoundingRegion::spatial(40.0, 60.0, 40.0, 60.0).unwrap()
}

fn base_config() -> SamplerConfig {
    SamplerConfig {
        patch_size: SampleSize::Square(10.0),
        batch_size: 4,
        length: 12,
        not_burned_proportion: 0.5,
        policy: BurnPolicy::AnyBurn,
        seed: Some(2024),
        ..SamplerConfig::default()
    }
}

fn count_burned<D: GeoDataset + ?Sized>(dataset: &D, policy: BurnPolicy, batch: &Batch) -> usize {
    let oracle = BalanceOracle::new(policy);
    batch
        .iter()
        .filter(|region| oracle.evaluate(dataset, region).unwrap().1 == Bucket::Burned)
        .count()
}

/// Counts label reads so tests can bound the work done
struct CountingDataset {
    inner: CompositeDataset,
    reads: AtomicUsize,
}

impl GeoDataset for CountingDataset {
    fn bounds(&self) -> BoundingRegion {
        self.inner.bounds()
    }

    fn resolution(&self) -> f64 {
        self.inner.resolution()
    }

    fn cells_intersecting(&self, roi: &BoundingRegion) -> Vec<IndexCell> {
        self.inner.cells_intersecting(roi)
    }

    fn read_label(&self, region: &BoundingRegion) -> SamplerResult<Array2<f32>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_label(region)
    }

    fn read(&self, region: &BoundingRegion) -> SamplerResult<Sample> {
        self.inner.read(region)
    }
}

#[test]
fn test_example_scenario_single_batch() {
    init_logging();
    let dataset = Arc::new(burn_square(1));
    let config = SamplerConfig {
        length: 4,
        ..base_config()
    };
    let sampler = ConstrainedBatchSampler::new(dataset.clone(), config).unwrap();
    assert_eq!(sampler.num_batches(), 1);

    let batches: Vec<Batch> = sampler.batches().collect::<SamplerResult<_>>().unwrap();
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.len(), 4);

    let touching = batch.iter().filter(|r| r.overlap_area(&square()).is_some()).count();
    assert_eq!(touching, 2, "exactly two regions should overlap the burned square");
    assert_eq!(count_burned(&*dataset, BurnPolicy::AnyBurn, batch), 2);
}

#[test]
fn test_example_scenario_with_zero_threshold() {
    let dataset = Arc::new(burn_square(1));
    let config = SamplerConfig {
        length: 4,
        policy: BurnPolicy::Threshold { burn_th: 0.0 },
        max_attempts_per_batch: 500,
        ..base_config()
    };
    let sampler = ConstrainedBatchSampler::new(dataset.clone(), config).unwrap();

    let batches: Vec<Batch> = sampler.batches().collect::<SamplerResult<_>>().unwrap();
    assert_eq!(batches.len(), 1);
    let touching = batches[0]
        .iter()
        .filter(|r| r.overlap_area(&square()).is_some())
        .count();
    assert_eq!(touching, 2);
    assert_eq!(count_burned(&*dataset, BurnPolicy::AnyBurn, &batches[0]), 2);
}

#[test]
fn test_size_and_quota_invariants() {
    let dataset = Arc::new(burn_square(1));
    for (proportion, expected_burned) in [(0.5, 2), (0.25, 3), (1.0, 0), (0.0, 4)] {
        let config = SamplerConfig {
            not_burned_proportion: proportion,
            ..base_config()
        };
        let sampler = ConstrainedBatchSampler::new(dataset.clone(), config).unwrap();
        assert_eq!(sampler.quota().burned, expected_burned);

        let batches: Vec<Batch> = sampler.batches().collect::<SamplerResult<_>>().unwrap();
        assert_eq!(batches.len(), 3);
        for batch in &batches {
            assert_eq!(batch.len(), 4);
            assert_eq!(count_burned(&*dataset, BurnPolicy::AnyBurn, batch), expected_burned);
        }
    }
}

#[test]
fn test_threshold_policy_quota() {
    let dataset = Arc::new(burn_square(1));
    let policy = BurnPolicy::Threshold { burn_th: 0.5 };
    let config = SamplerConfig {
        policy,
        ..base_config()
    };
    let sampler = ConstrainedBatchSampler::new(dataset.clone(), config).unwrap();

    for batch in sampler.batches() {
        let batch = batch.unwrap();
        assert_eq!(count_burned(&*dataset, policy, &batch), 2);
        // partially burned patches below the threshold count as not burned
        assert_eq!(count_burned(&*dataset, BurnPolicy::Threshold { burn_th: 1.1 }, &batch), 0);
    }
}

#[test]
fn test_regions_contained_in_roi_cells() {
    let dataset = Arc::new(burn_square(2));
    let roi = BoundingRegion::spatial(20.0, 70.0, 30.0, 100.0).unwrap();
    let config = SamplerConfig {
        roi: Some(roi),
        ..base_config()
    };
    let sampler = ConstrainedBatchSampler::new(dataset.clone(), config).unwrap();

    let cells: Vec<BoundingRegion> = dataset
        .cells_intersecting(&roi)
        .iter()
        .filter_map(|cell| cell.bounds.intersection(&roi))
        .collect();
    assert!(!cells.is_empty());

    for region in sampler.regions() {
        let region = region.unwrap();
        assert!(
            cells.iter().any(|cell| cell.contains(&region)),
            "{} is not inside any ROI cell",
            region
        );
    }
}

#[test]
fn test_same_seed_same_batches() {
    let first = ConstrainedBatchSampler::new(Arc::new(burn_square(2)), base_config()).unwrap();
    let second = ConstrainedBatchSampler::new(Arc::new(burn_square(2)), base_config()).unwrap();

    let a: Vec<Batch> = first.batches().collect::<SamplerResult<_>>().unwrap();
    let b: Vec<Batch> = second.batches().collect::<SamplerResult<_>>().unwrap();
    assert_eq!(a, b);

    let other_seed = SamplerConfig {
        seed: Some(7),
        ..base_config()
    };
    let third = ConstrainedBatchSampler::new(Arc::new(burn_square(2)), other_seed).unwrap();
    let c: Vec<Batch> = third.batches().collect::<SamplerResult<_>>().unwrap();
    assert_ne!(a, c);
}

#[test]
fn test_two_passes_over_one_sampler() {
    let dataset = Arc::new(burn_square(1));
    let sampler = ConstrainedBatchSampler::new(dataset.clone(), base_config()).unwrap();

    let mut passes = Vec::new();
    for _ in 0..2 {
        let batches: Vec<Batch> = (&sampler).into_iter().collect::<SamplerResult<_>>().unwrap();
        assert_eq!(batches.len(), sampler.num_batches());
        for batch in &batches {
            assert_eq!(batch.len(), 4);
            assert_eq!(count_burned(&*dataset, BurnPolicy::AnyBurn, batch), 2);
        }
        passes.push(batches);
    }
    assert_eq!(passes[0], passes[1]);

    let unseeded = SamplerConfig {
        seed: None,
        ..base_config()
    };
    let sampler = ConstrainedBatchSampler::new(dataset, unseeded).unwrap();
    assert_eq!(sampler.batches().count(), 3);
    assert_eq!(sampler.batches().count(), 3);
}

#[test]
fn test_unsatisfiable_quota_terminates() {
    init_logging();
    let dataset = Arc::new(CountingDataset {
        inner: all_zero(),
        reads: AtomicUsize::new(0),
    });
    let config = SamplerConfig {
        tile_switch_attempts: 10,
        max_attempts_per_batch: 200,
        ..base_config()
    };
    let sampler = ConstrainedBatchSampler::new(dataset.clone(), config).unwrap();

    let mut batches = sampler.batches();
    match batches.next() {
        Some(Err(SamplerError::UnsatisfiableQuota {
            bucket,
            attempts,
            roi,
        })) => {
            assert_eq!(bucket, Bucket::Burned);
            assert_eq!(attempts, 200);
            assert_eq!(roi, dataset.bounds());
        }
        other => panic!("expected an unsatisfiable quota, got {:?}", other),
    }
    assert!(batches.next().is_none());
    assert_eq!(dataset.reads.load(Ordering::SeqCst), 200);
}

#[test]
fn test_tile_switch_finds_rare_burn() {
    // burn only in the lower-left 50x50 tile
    let mut labels = Array2::<f32>::zeros((100, 100));
    labels.slice_mut(s![70..90, 10..30]).fill(1.0);
    let mask = InMemoryRaster::mask("modis_jd", 0.0, 100.0, 1.0, labels)
        .unwrap()
        .with_tiles(2, 2)
        .unwrap();
    let sources: Vec<Box<dyn RasterSource>> = vec![Box::new(mask)];
    let dataset = Arc::new(CompositeDataset::new(sources).unwrap());
    let burned_tile = BoundingRegion::spatial(0.0, 50.0, 0.0, 50.0).unwrap();

    let config = SamplerConfig {
        not_burned_proportion: 0.0,
        tile_switch_attempts: 20,
        ..base_config()
    };
    let sampler = ConstrainedBatchSampler::new(dataset.clone(), config).unwrap();
    assert_eq!(sampler.cells().len(), 4);

    for batch in sampler.batches() {
        let batch = batch.unwrap();
        assert_eq!(count_burned(&*dataset, BurnPolicy::AnyBurn, &batch), 4);
        assert!(batch.iter().all(|r| burned_tile.contains(r)));
    }
}

#[test]
fn test_empty_reads_are_rejected_not_classified() {
    // a strip of the index with no readable pixels, e.g. a nodata gap
    let hole = BoundingRegion::spatial(0.0, 30.0, 0.0, 100.0).unwrap();
    let dataset = Arc::new(HoleyDataset {
        inner: burn_square(1),
        hole,
    });
    let sampler = ConstrainedBatchSampler::new(dataset, base_config()).unwrap();

    for region in sampler.regions() {
        assert!(region.unwrap().overlap_area(&hole).is_none());
    }
}

struct HoleyDataset {
    inner: CompositeDataset,
    hole: BoundingRegion,
}

impl GeoDataset for HoleyDataset {
    fn bounds(&self) -> BoundingRegion {
        self.inner.bounds()
    }

    fn resolution(&self) -> f64 {
        self.inner.resolution()
    }

    fn cells_intersecting(&self, roi: &BoundingRegion) -> Vec<IndexCell> {
        self.inner.cells_intersecting(roi)
    }

    fn read_label(&self, region: &BoundingRegion) -> SamplerResult<Array2<f32>> {
        if region.overlap_area(&self.hole).is_some() {
            return Err(SamplerError::EmptyRegion(*region));
        }
        self.inner.read_label(region)
    }

    fn read(&self, region: &BoundingRegion) -> SamplerResult<Sample> {
        self.inner.read(region)
    }
}

#[cfg(feature = "parallel")]
#[test]
fn test_candidate_waves_are_deterministic() {
    let config = SamplerConfig {
        candidate_wave: 8,
        ..base_config()
    };
    let dataset = Arc::new(burn_square(2));
    let first = ConstrainedBatchSampler::new(dataset.clone(), config.clone()).unwrap();
    let second = ConstrainedBatchSampler::new(dataset.clone(), config).unwrap();

    let a: Vec<Batch> = first.batches().collect::<SamplerResult<_>>().unwrap();
    let b: Vec<Batch> = second.batches().collect::<SamplerResult<_>>().unwrap();
    assert_eq!(a, b);
    for batch in &a {
        assert_eq!(batch.len(), 4);
        assert_eq!(count_burned(&*dataset, BurnPolicy::AnyBurn, batch), 2);
    }
}

#[test]
fn test_cancel_from_another_thread_mid_pass() {
    let dataset = Arc::new(CountingDataset {
        inner: all_zero(),
        reads: AtomicUsize::new(0),
    });
    let config = SamplerConfig {
        max_attempts_per_batch: 10_000_000,
        ..base_config()
    };
    let token = CancellationToken::new();
    let sampler = ConstrainedBatchSampler::new(dataset.clone(), config)
        .unwrap()
        .with_cancellation(token.clone());

    let result = thread::scope(|scope| {
        let worker = scope.spawn(|| sampler.batches().next());
        while dataset.reads.load(Ordering::SeqCst) < 50 {
            thread::sleep(Duration::from_millis(1));
        }
        token.cancel();
        worker.join().unwrap()
    });

    assert!(matches!(result, Some(Err(SamplerError::Cancelled { batch: 0 }))));
    let reads = dataset.reads.load(Ordering::SeqCst);
    assert!(reads >= 50 && reads < 10_000_000);

    // the token stays cancelled for later passes until it is replaced
    assert!(matches!(sampler.batches().next(), Some(Err(SamplerError::Cancelled { .. }))));
    let sampler = sampler.with_cancellation(CancellationToken::new());
    assert!(!sampler.cancellation_token().is_cancelled());
}
