//! Distillation from a teacher policy.
use crate::policy::{PolicyState, PpoPolicy};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};
use tch::{Kind, Tensor};

/// Source of the distillation terms of the PPO loss.
pub trait Distiller {
    /// Returns the action and value distillation losses.
    ///
    /// `full_log_probs` and `value` are the outputs of the trained policy on `obs`.
    /// `teacher_state` is the recurrent state of the teacher and is updated in place.
    fn loss(
        &self,
        agent_step: usize,
        full_log_probs: &Tensor,
        value: &Tensor,
        obs: &Tensor,
        teacher_state: &mut PolicyState,
    ) -> Result<(Tensor, Tensor)>;
}

fn zero_like(t: &Tensor) -> Tensor {
    Tensor::from(0f32).to_device(t.device())
}

/// Distiller of a run without teacher.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDistillation;

impl Distiller for NoDistillation {
    fn loss(
        &self,
        _agent_step: usize,
        full_log_probs: &Tensor,
        _value: &Tensor,
        _obs: &Tensor,
        _teacher_state: &mut PolicyState,
    ) -> Result<(Tensor, Tensor)> {
        Ok((zero_like(full_log_probs), zero_like(full_log_probs)))
    }
}

/// Configuration of [`Kickstarter`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct KickstartConfig {
    /// Weight of the action distillation loss.
    pub action_loss_coef: f64,

    /// Weight of the value distillation loss.
    pub value_loss_coef: f64,

    /// Agent steps after which distillation stops.
    pub kickstart_steps: usize,

    /// Fraction of `kickstart_steps`, at the end, over which the weights decay
    /// linearly to zero.
    pub anneal_ratio: f64,
}

impl Default for KickstartConfig {
    fn default() -> Self {
        Self {
            action_loss_coef: 1.0,
            value_loss_coef: 1.0,
            kickstart_steps: 1_000_000_000,
            anneal_ratio: 0.65,
        }
    }
}

impl KickstartConfig {
    /// Sets the weight of the action loss.
    pub fn action_loss_coef(mut self, v: f64) -> Self {
        self.action_loss_coef = v;
        self
    }

    /// Sets the weight of the value loss.
    pub fn value_loss_coef(mut self, v: f64) -> Self {
        self.value_loss_coef = v;
        self
    }

    /// Sets the duration of distillation.
    pub fn kickstart_steps(mut self, v: usize) -> Self {
        self.kickstart_steps = v;
        self
    }

    /// Sets the annealed fraction.
    pub fn anneal_ratio(mut self, v: f64) -> Self {
        self.anneal_ratio = v;
        self
    }

    /// Multiplier of both losses at `agent_step`.
    pub fn anneal_factor(&self, agent_step: usize) -> f64 {
        if agent_step > self.kickstart_steps {
            return 0.0;
        }

        let duration = self.kickstart_steps as f64 * self.anneal_ratio;
        let start = self.kickstart_steps as f64 - duration;
        let step = agent_step as f64;
        if duration > 0.0 && step > start {
            1.0 - (step - start) / duration
        } else {
            1.0
        }
    }

    /// Constructs [`KickstartConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`KickstartConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// Distills a fixed teacher policy into the trained one.
///
/// The action loss is the cross entropy `-mean(Σ_a π_T(a) log π(a))` and the value loss
/// the mean squared difference of the value estimates, both weighted by their
/// coefficient and the [anneal factor](KickstartConfig::anneal_factor).
pub struct Kickstarter<P> {
    teacher: P,
    config: KickstartConfig,
}

impl<P: PpoPolicy> Kickstarter<P> {
    /// Wraps `teacher`.
    pub fn new(teacher: P, config: KickstartConfig) -> Self {
        Self { teacher, config }
    }

    /// Configuration.
    pub fn config(&self) -> &KickstartConfig {
        &self.config
    }
}

impl<P: PpoPolicy> Distiller for Kickstarter<P> {
    fn loss(
        &self,
        agent_step: usize,
        full_log_probs: &Tensor,
        value: &Tensor,
        obs: &Tensor,
        teacher_state: &mut PolicyState,
    ) -> Result<(Tensor, Tensor)> {
        let factor = self.config.anneal_factor(agent_step);
        if factor == 0.0 {
            return Ok((zero_like(full_log_probs), zero_like(full_log_probs)));
        }

        let teacher = tch::no_grad(|| self.teacher.forward(obs, teacher_state, None));

        let action_loss = -(teacher.full_log_probs.exp() * full_log_probs)
            .sum_dim_intlist(-1, false, Kind::Float)
            .mean(Kind::Float)
            * (self.config.action_loss_coef * factor);

        let value_loss = (teacher.value.flatten(0, -1) - value.flatten(0, -1))
            .square()
            .mean(Kind::Float)
            * (self.config.value_loss_coef * factor);

        Ok((action_loss, value_loss))
    }
}
