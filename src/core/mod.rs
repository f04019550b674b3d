//! Core sampling modules

pub mod region_sampler;
pub mod balance;
pub mod constrained_sampler;
pub mod grid_sampler;
pub mod transforms;

// Re-export main types
pub use region_sampler::{random_region, RegionSampler};
pub use balance::{burn_proportion, BalanceOracle};
pub use constrained_sampler::{
    BatchIter, CancellationToken, ConstrainedBatchSampler, Quota, SamplerConfig,
};
pub use grid_sampler::{GridConfig, GridSampler};
pub use transforms::{binarize, one_hot_encode};
