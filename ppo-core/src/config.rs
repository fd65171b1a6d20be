//! Configuration of the PPO update and of environment batching.
use crate::planner::{calculate_batch_sizes, BatchSizes};
use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Clipping of importance ratios in the V-trace advantage.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct VTraceConfig {
    /// Upper clip of the ratio scaling the temporal difference.
    pub rho_clip: f64,

    /// Upper clip of the ratio scaling the recursive trace.
    pub c_clip: f64,
}

impl Default for VTraceConfig {
    fn default() -> Self {
        Self {
            rho_clip: 1.0,
            c_clip: 1.0,
        }
    }
}

/// Prioritized sampling of experience segments.
///
/// `alpha = 0` samples uniformly. `beta0` is the initial importance-weight exponent,
/// annealed towards 1 by [`prioritized_beta`](crate::prioritized_beta).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PrioritizedConfig {
    /// Prioritization exponent.
    pub alpha: f64,

    /// Initial importance-weight exponent.
    pub beta0: f64,
}

impl Default for PrioritizedConfig {
    fn default() -> Self {
        Self {
            alpha: 0.0,
            beta0: 0.6,
        }
    }
}

/// Hyperparameters of the PPO update.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PpoConfig {
    /// Discount factor.
    pub gamma: f64,

    /// Trace decay of the advantage estimate.
    pub gae_lambda: f64,

    /// Clip range of the probability ratio in the policy loss.
    pub clip_coef: f64,

    /// Clip range of the value prediction around the stored value.
    pub vf_clip_coef: f64,

    /// If `true`, the value loss is the elementwise max of clipped and unclipped errors.
    pub clip_vloss: bool,

    /// Weight of the entropy bonus.
    pub ent_coef: f64,

    /// Weight of the value loss.
    pub vf_coef: f64,

    /// Weight of the distance-to-initialization penalty, disabled when not positive.
    pub l2_init_loss_coef: f64,

    /// Normalize advantages per minibatch.
    pub norm_adv: bool,

    /// Stop the update phase early once the mean approximate KL exceeds this value.
    pub target_kl: Option<f64>,

    /// Passes over the experience per training phase.
    pub update_epochs: usize,

    /// Number of agent steps per minibatch.
    pub minibatch_size: usize,

    /// Length of an experience segment in time steps.
    pub bptt_horizon: usize,

    /// Global gradient norm limit; non-positive values disable clipping.
    pub max_grad_norm: f64,

    /// Ratio clipping of the V-trace advantage.
    pub vtrace: VTraceConfig,

    /// Prioritized segment sampling.
    pub prioritized: PrioritizedConfig,
}

impl Default for PpoConfig {
    fn default() -> Self {
        Self {
            gamma: 0.99,
            gae_lambda: 0.95,
            clip_coef: 0.1,
            vf_clip_coef: 0.1,
            clip_vloss: true,
            ent_coef: 0.01,
            vf_coef: 0.5,
            l2_init_loss_coef: 0.0,
            norm_adv: true,
            target_kl: None,
            update_epochs: 1,
            minibatch_size: 512,
            bptt_horizon: 16,
            max_grad_norm: 0.5,
            vtrace: VTraceConfig::default(),
            prioritized: PrioritizedConfig::default(),
        }
    }
}

impl PpoConfig {
    /// Sets the discount factor.
    pub fn gamma(mut self, v: f64) -> Self {
        self.gamma = v;
        self
    }

    /// Sets the trace decay.
    pub fn gae_lambda(mut self, v: f64) -> Self {
        self.gae_lambda = v;
        self
    }

    /// Sets the clip range of the probability ratio.
    pub fn clip_coef(mut self, v: f64) -> Self {
        self.clip_coef = v;
        self
    }

    /// Sets the clip range of the value prediction.
    pub fn vf_clip_coef(mut self, v: f64) -> Self {
        self.vf_clip_coef = v;
        self
    }

    /// Enables or disables value clipping.
    pub fn clip_vloss(mut self, v: bool) -> Self {
        self.clip_vloss = v;
        self
    }

    /// Sets the weight of the entropy bonus.
    pub fn ent_coef(mut self, v: f64) -> Self {
        self.ent_coef = v;
        self
    }

    /// Sets the weight of the value loss.
    pub fn vf_coef(mut self, v: f64) -> Self {
        self.vf_coef = v;
        self
    }

    /// Sets the weight of the distance-to-initialization penalty.
    pub fn l2_init_loss_coef(mut self, v: f64) -> Self {
        self.l2_init_loss_coef = v;
        self
    }

    /// Enables or disables advantage normalization.
    pub fn norm_adv(mut self, v: bool) -> Self {
        self.norm_adv = v;
        self
    }

    /// Sets the KL threshold of early stopping.
    pub fn target_kl(mut self, v: Option<f64>) -> Self {
        self.target_kl = v;
        self
    }

    /// Sets the number of passes over the experience.
    pub fn update_epochs(mut self, v: usize) -> Self {
        self.update_epochs = v;
        self
    }

    /// Sets the minibatch size in agent steps.
    pub fn minibatch_size(mut self, v: usize) -> Self {
        self.minibatch_size = v;
        self
    }

    /// Sets the segment length.
    pub fn bptt_horizon(mut self, v: usize) -> Self {
        self.bptt_horizon = v;
        self
    }

    /// Sets the gradient norm limit.
    pub fn max_grad_norm(mut self, v: f64) -> Self {
        self.max_grad_norm = v;
        self
    }

    /// Sets the V-trace clipping.
    pub fn vtrace(mut self, v: VTraceConfig) -> Self {
        self.vtrace = v;
        self
    }

    /// Sets the prioritized sampling parameters.
    pub fn prioritized(mut self, v: PrioritizedConfig) -> Self {
        self.prioritized = v;
        self
    }

    /// Number of segments in a minibatch.
    pub fn minibatch_segments(&self) -> usize {
        (self.minibatch_size / self.bptt_horizon.max(1)).max(1)
    }

    /// Constructs [`PpoConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ = path.as_ref().to_owned();
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        info!("Load config of PPO from {}", path_.to_str().unwrap_or("?"));
        Ok(b)
    }

    /// Saves [`PpoConfig`] as YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path_ = path.as_ref().to_owned();
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        info!("Save config of PPO into {}", path_.to_str().unwrap_or("?"));
        Ok(())
    }
}

/// Sizing of vectorized environment batches.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct BatchConfig {
    /// Agent steps a policy forward pass should see.
    pub forward_pass_minibatch_target_size: usize,

    /// Agents per environment.
    pub num_agents: usize,

    /// Environment workers.
    pub num_workers: usize,

    /// Batches kept in flight.
    pub async_factor: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            forward_pass_minibatch_target_size: 4096,
            num_agents: 1,
            num_workers: 1,
            async_factor: 2,
        }
    }
}

impl BatchConfig {
    /// Sets the forward pass target size.
    pub fn forward_pass_minibatch_target_size(mut self, v: usize) -> Self {
        self.forward_pass_minibatch_target_size = v;
        self
    }

    /// Sets the number of agents per environment.
    pub fn num_agents(mut self, v: usize) -> Self {
        self.num_agents = v;
        self
    }

    /// Sets the number of workers.
    pub fn num_workers(mut self, v: usize) -> Self {
        self.num_workers = v;
        self
    }

    /// Sets the number of batches in flight.
    pub fn async_factor(mut self, v: usize) -> Self {
        self.async_factor = v;
        self
    }

    /// Derives environment counts with [`calculate_batch_sizes`].
    pub fn batch_sizes(&self) -> Result<BatchSizes> {
        calculate_batch_sizes(
            self.forward_pass_minibatch_target_size,
            self.num_agents,
            self.num_workers,
            self.async_factor,
        )
    }

    /// Constructs [`BatchConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`BatchConfig`] as YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
