//! Batch size planning for vectorized rollouts.
use crate::error::PpoError;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Sizes derived by [`calculate_batch_sizes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct BatchSizes {
    /// Requested number of environments per receive.
    pub target_batch_size: usize,

    /// Number of environments per receive, a multiple of the worker count.
    pub batch_size: usize,

    /// Total number of environments to run.
    pub num_envs: usize,
}

impl From<BatchSizes> for (usize, usize, usize) {
    fn from(s: BatchSizes) -> Self {
        (s.target_batch_size, s.batch_size, s.num_envs)
    }
}

/// Derives environment counts from a target forward-pass size.
///
/// `target` is the number of agent steps a single policy forward pass should see,
/// `num_agents` the number of agents in one environment, `num_workers` the number
/// of environment workers and `async_factor` how many batches are kept in flight.
///
/// The target batch size is `target / num_agents`. Downstream batching needs at least
/// two environments per receive and at least one per worker, so a target below
/// `max(2, num_workers)` is raised to `num_workers`. The actual batch size is the
/// target rounded down to a multiple of `num_workers`.
///
/// ```rust
/// use ppo_core::calculate_batch_sizes;
///
/// let sizes = calculate_batch_sizes(512, 4, 8, 2).unwrap();
/// assert_eq!(<(usize, usize, usize)>::from(sizes), (128, 128, 256));
/// ```
pub fn calculate_batch_sizes(
    forward_pass_minibatch_target_size: usize,
    num_agents: usize,
    num_workers: usize,
    async_factor: usize,
) -> Result<BatchSizes> {
    if num_agents == 0 {
        return Err(PpoError::InvalidConfig("num_agents must be positive".to_string()).into());
    }
    if num_workers == 0 {
        return Err(PpoError::InvalidConfig("num_workers must be positive".to_string()).into());
    }

    let mut target_batch_size = forward_pass_minibatch_target_size / num_agents;
    if target_batch_size < num_workers.max(2) {
        target_batch_size = num_workers;
    }

    let batch_size = (target_batch_size / num_workers) * num_workers;
    let num_envs = batch_size * async_factor;

    Ok(BatchSizes {
        target_batch_size,
        batch_size,
        num_envs,
    })
}
