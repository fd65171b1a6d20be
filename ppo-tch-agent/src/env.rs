//! Interface of vectorized environments.
use anyhow::Result;
use ppo_core::stats::InfoValue;
use tch::Tensor;

/// Data returned by one receive from a [`VecEnv`].
///
/// All tensors share the leading dimension, the number of environment slots in
/// the receive.
#[derive(Debug)]
pub struct EnvBatch {
    /// Observations.
    pub obs: Tensor,

    /// Rewards of the last step.
    pub rewards: Tensor,

    /// Episode termination flags.
    pub dones: Tensor,

    /// Episode truncation flags.
    pub truncations: Tensor,

    /// Reports of episodes that ended in this step.
    pub infos: Vec<InfoValue>,

    /// Environment slots of the batch, a contiguous ascending range.
    pub env_ids: Vec<usize>,

    /// `1` for slots holding a live agent, `0` otherwise.
    pub mask: Tensor,
}

/// A vectorized environment stepping many environment slots at once.
pub trait VecEnv {
    /// Blocks until the next batch of observations is available.
    fn recv(&mut self) -> Result<EnvBatch>;

    /// Sends actions for the batch returned by the last [`VecEnv::recv`].
    fn send(&mut self, actions: &Tensor) -> Result<()>;

    /// Shape of the observation of a single agent.
    fn single_observation_shape(&self) -> Vec<i64>;
}
