#![warn(missing_docs)]
//! Backend-independent building blocks of an on-policy PPO trainer.
//!
//! This crate holds the pieces of the update core that do not touch tensors:
//!
//! * [`calculate_batch_sizes`] plans vectorized environment batches.
//! * [`should_run_on_interval`] gates periodic work such as evaluation and
//!   checkpointing, and [`prioritized_beta`] anneals the importance-weight exponent
//!   of prioritized minibatch sampling.
//! * [`stats::RolloutStats`] aggregates the nested info dictionaries returned by
//!   environments.
//! * [`DistContext`] abstracts collective reductions over a group of training
//!   processes.
//! * [`PpoConfig`] and [`BatchConfig`] hold hyperparameters.
//! * [`cleanup_old_policies`] prunes saved checkpoints.
//!
//! Metrics are reported as [`record::Record`]s.
pub mod checkpoint;
pub mod config;
pub mod dist;
pub mod error;
pub mod planner;
pub mod record;
pub mod schedule;
pub mod stats;

pub use checkpoint::cleanup_old_policies;
pub use config::{BatchConfig, PpoConfig, PrioritizedConfig, VTraceConfig};
pub use dist::{DistContext, DistInfo, SingleProcess, ThreadGroup, ThreadGroupMember};
pub use error::PpoError;
pub use planner::{calculate_batch_sizes, BatchSizes};
pub use schedule::{prioritized_beta, should_run_on_interval};
