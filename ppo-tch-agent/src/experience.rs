//! Storage of on-policy experience.
//!
//! Experience is organized in segments: fixed-length rows of `bptt_horizon`
//! consecutive steps of a single environment slot. [`Experience`] writes each
//! incoming batch into the current row of every slot of the batch and, once a row is
//! full, moves the slot on to the next free row. Training starts when every row has
//! been filled once.
use crate::{policy::RecurrentState, util::reshape_like};
use anyhow::Result;
use log::trace;
use ppo_core::{error::PpoError, PpoConfig};
use std::{collections::HashMap, ops::Range};
use tch::{Device, Kind, Tensor};

/// Everything one rollout step produces for a contiguous range of environment slots.
///
/// All tensors share the leading dimension `env_id.len()`.
#[derive(Debug)]
pub struct Transition {
    /// Observations.
    pub obs: Tensor,

    /// Actions chosen by the policy.
    pub actions: Tensor,

    /// Log-probabilities of the actions.
    pub logprobs: Tensor,

    /// Rewards.
    pub rewards: Tensor,

    /// Termination flags.
    pub dones: Tensor,

    /// Truncation flags.
    pub truncations: Tensor,

    /// Value estimates.
    pub values: Tensor,

    /// Environment slots of the transition.
    pub env_id: Range<usize>,

    /// Validity mask of the slots.
    pub mask: Tensor,

    /// Recurrent state after the step, already detached.
    pub lstm_state: Option<RecurrentState>,
}

/// Operations the rollout and update steps perform on stored experience.
pub trait ExperienceStore {
    /// Writes one transition.
    fn store(&mut self, transition: Transition) -> Result<()>;

    /// Latest recurrent state stored for the range starting at `slot`.
    fn get_lstm_state(&self, slot: usize) -> Option<RecurrentState>;

    /// Overwrites the importance ratios of the segments at `indices`.
    fn update_ratio(&mut self, indices: &Tensor, ratio: &Tensor) -> Result<()>;

    /// Overwrites the value estimates of the segments at `indices`.
    fn update_values(&mut self, indices: &Tensor, values: &Tensor) -> Result<()>;
}

/// A sample of segments drawn by [`Experience::sample_minibatch`].
///
/// Every tensor except `indices` and `prio_weights` has the leading dimensions
/// `[segments, horizon]`.
#[derive(Debug)]
pub struct Minibatch {
    /// Observations.
    pub obs: Tensor,

    /// Stored actions.
    pub actions: Tensor,

    /// Log-probabilities of the actions under the behavior policy.
    pub logprobs: Tensor,

    /// Stored value estimates.
    pub values: Tensor,

    /// Rewards.
    pub rewards: Tensor,

    /// Termination flags.
    pub dones: Tensor,

    /// Advantage estimate of the segments.
    pub advantages: Tensor,

    /// Value targets, `advantages + values`.
    pub returns: Tensor,

    /// Rows of the segments in the store, `[segments]`.
    pub indices: Tensor,

    /// Importance weights of prioritized sampling, `[segments, 1]`.
    pub prio_weights: Tensor,
}

fn check_leading(name: &str, t: &Tensor, leading: &[i64]) -> Result<(), PpoError> {
    let size = t.size();
    if size.len() < leading.len() || &size[..leading.len()] != leading {
        let mut expected = leading.to_vec();
        expected.extend(std::iter::repeat(-1).take(size.len().saturating_sub(leading.len())));
        return Err(PpoError::ShapeMismatch {
            name: name.to_string(),
            expected,
            actual: size,
        });
    }
    Ok(())
}

impl Minibatch {
    /// Checks that all tensors are aligned.
    pub fn validate(&self) -> Result<()> {
        let leading = self.values.size();
        if leading.len() != 2 {
            return Err(PpoError::ShapeMismatch {
                name: "values".to_string(),
                expected: vec![-1, -1],
                actual: leading,
            }
            .into());
        }

        for (name, t) in [
            ("obs", &self.obs),
            ("actions", &self.actions),
            ("logprobs", &self.logprobs),
            ("rewards", &self.rewards),
            ("dones", &self.dones),
            ("advantages", &self.advantages),
            ("returns", &self.returns),
        ] {
            check_leading(name, t, &leading)?;
        }
        check_leading("indices", &self.indices, &leading[..1])?;
        check_leading("prio_weights", &self.prio_weights, &leading[..1])?;

        Ok(())
    }

    /// Number of agent steps in the minibatch.
    pub fn num_steps(&self) -> i64 {
        self.values.size().iter().product()
    }
}

/// Fixed-capacity segment store.
pub struct Experience {
    segments: i64,
    horizon: i64,
    minibatch_segments: i64,
    total_agents: usize,
    device: Device,

    obs: Option<Tensor>,
    actions: Option<Tensor>,
    logprobs: Tensor,
    rewards: Tensor,
    dones: Tensor,
    truncations: Tensor,
    values: Tensor,
    ratio: Tensor,

    // Row and column each environment slot currently writes to
    ep_indices: Vec<i64>,
    ep_lengths: Vec<i64>,
    free_idx: i64,
    full_rows: i64,

    lstm: HashMap<usize, RecurrentState>,
}

impl Experience {
    /// Creates a store of `batch_size` steps cut into segments of `bptt_horizon`.
    ///
    /// Every environment slot owns a row at any time, so the number of segments must
    /// not be smaller than `total_agents`.
    pub fn new(
        total_agents: usize,
        batch_size: usize,
        bptt_horizon: usize,
        minibatch_size: usize,
        device: Device,
    ) -> Result<Self> {
        if bptt_horizon == 0 {
            return Err(PpoError::InvalidConfig("bptt_horizon must be positive".into()).into());
        }
        let segments = batch_size / bptt_horizon;
        if segments < total_agents.max(1) {
            return Err(PpoError::InvalidConfig(format!(
                "batch_size {} holds {} segments of {} steps, fewer than {} agents",
                batch_size, segments, bptt_horizon, total_agents
            ))
            .into());
        }
        let minibatch_segments = minibatch_size / bptt_horizon;
        if minibatch_segments == 0 || minibatch_segments > segments {
            return Err(PpoError::InvalidConfig(format!(
                "minibatch_size {} must hold between 1 and {} segments",
                minibatch_size, segments
            ))
            .into());
        }

        let (segments, horizon) = (segments as i64, bptt_horizon as i64);
        let zeros = || Tensor::zeros([segments, horizon], (Kind::Float, device));

        Ok(Self {
            segments,
            horizon,
            minibatch_segments: minibatch_segments as i64,
            total_agents,
            device,
            obs: None,
            actions: None,
            logprobs: zeros(),
            rewards: zeros(),
            dones: zeros(),
            truncations: zeros(),
            values: zeros(),
            ratio: Tensor::ones([segments, horizon], (Kind::Float, device)),
            ep_indices: (0..total_agents as i64).map(|i| i % segments).collect(),
            ep_lengths: vec![0; total_agents],
            free_idx: total_agents as i64 % segments,
            full_rows: 0,
            lstm: HashMap::new(),
        })
    }

    /// Creates a store with the segment length and minibatch size of `config`.
    pub fn from_config(
        total_agents: usize,
        batch_size: usize,
        config: &PpoConfig,
        device: Device,
    ) -> Result<Self> {
        Self::new(
            total_agents,
            batch_size,
            config.bptt_horizon,
            config.minibatch_size,
            device,
        )
    }

    /// Number of segments.
    pub fn segments(&self) -> i64 {
        self.segments
    }

    /// Steps per segment.
    pub fn horizon(&self) -> i64 {
        self.horizon
    }

    /// Segments per minibatch.
    pub fn minibatch_segments(&self) -> i64 {
        self.minibatch_segments
    }

    /// Number of minibatches covering the store once.
    pub fn num_minibatches(&self) -> usize {
        (self.segments / self.minibatch_segments) as usize
    }

    /// Device of the buffers.
    pub fn device(&self) -> Device {
        self.device
    }

    /// Stored value estimates, `[segments, horizon]`.
    pub fn values(&self) -> &Tensor {
        &self.values
    }

    /// Stored rewards.
    pub fn rewards(&self) -> &Tensor {
        &self.rewards
    }

    /// Stored termination flags.
    pub fn dones(&self) -> &Tensor {
        &self.dones
    }

    /// Stored truncation flags.
    pub fn truncations(&self) -> &Tensor {
        &self.truncations
    }

    /// Latest importance ratios.
    pub fn ratio(&self) -> &Tensor {
        &self.ratio
    }

    /// Number of rows filled since the last reset.
    pub fn full_rows(&self) -> i64 {
        self.full_rows
    }

    /// Returns `true` once every row has been filled.
    pub fn ready_for_training(&self) -> bool {
        self.full_rows >= self.segments
    }

    /// Prepares the store for the next rollout phase.
    ///
    /// Stored data and recurrent states are kept; only the row bookkeeping restarts.
    pub fn reset_for_rollout(&mut self) {
        self.full_rows = 0;
        self.free_idx = self.total_agents as i64 % self.segments;
        for (i, (row, len)) in self
            .ep_indices
            .iter_mut()
            .zip(self.ep_lengths.iter_mut())
            .enumerate()
        {
            *row = i as i64 % self.segments;
            *len = 0;
        }
    }

    /// Resets the importance ratios to one.
    pub fn reset_importance_sampling_ratios(&mut self) {
        let _ = self.ratio.fill_(1.0);
    }

    fn lazy_buffer(buf: &mut Option<Tensor>, segments: i64, horizon: i64, data: &Tensor) -> Tensor {
        match buf {
            Some(buf) => buf.shallow_clone(),
            None => {
                let mut shape = vec![segments, horizon];
                shape.extend_from_slice(&data.size()[1..]);
                let t = Tensor::zeros(shape.as_slice(), (data.kind(), data.device()));
                *buf = Some(t.shallow_clone());
                t
            }
        }
    }

    /// Fails when `data` does not match the per-step shape of an allocated buffer.
    fn check_trailing(name: &str, buf: &Option<Tensor>, data: &Tensor) -> Result<(), PpoError> {
        if let Some(buf) = buf {
            let expected = &buf.size()[2..];
            let actual = data.size();
            if &actual[1..] != expected {
                let mut expected = expected.to_vec();
                expected.insert(0, actual[0]);
                return Err(PpoError::ShapeMismatch {
                    name: name.to_string(),
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    fn write(name: &str, buf: &Tensor, col: i64, rows: &Tensor, data: &Tensor) -> Result<()> {
        let mut view = buf.select(1, col);
        let mut shape = view.size();
        shape[0] = rows.size()[0];
        let data = reshape_like(name, &data.to_kind(buf.kind()), &shape)?;
        let _ = view.f_index_copy_(0, rows, &data)?;
        Ok(())
    }

    fn overwrite(
        name: &str,
        buf: &mut Tensor,
        horizon: i64,
        indices: &Tensor,
        data: &Tensor,
    ) -> Result<()> {
        let shape = [indices.size()[0], horizon];
        let data = reshape_like(name, &data.detach().to_kind(buf.kind()), &shape)?;
        let _ = buf.f_index_copy_(0, indices, &data)?;
        Ok(())
    }

    fn move_to_free_rows(&mut self, env_id: &Range<usize>) {
        let n = env_id.len() as i64;
        for (k, slot) in env_id.clone().enumerate() {
            self.ep_indices[slot] = (self.free_idx + k as i64) % self.segments;
            self.ep_lengths[slot] = 0;
        }
        self.free_idx = (self.free_idx + n) % self.segments;
        self.full_rows += n;
        trace!(
            "Slots {:?} completed a segment, full_rows = {}",
            env_id,
            self.full_rows
        );
    }

    /// Draws `minibatch_segments` distinct segments with probability increasing in the
    /// magnitude of their advantages.
    ///
    /// With priority `w_i = (Σ_t |A_it|)^alpha`, segment `i` is drawn with probability
    /// `p_i = (w_i + 1e-6) / (Σ w + 1e-6)` and weighted by `(segments · p_i)^-beta`.
    pub fn sample_minibatch(&self, advantages: &Tensor, alpha: f64, beta: f64) -> Result<Minibatch> {
        check_leading("advantages", advantages, &[self.segments, self.horizon])?;
        let obs = self
            .obs
            .as_ref()
            .ok_or_else(|| PpoError::InvalidConfig("sampling from an empty store".into()))?;
        let actions = self
            .actions
            .as_ref()
            .ok_or_else(|| PpoError::InvalidConfig("sampling from an empty store".into()))?;

        let (idx, prio_weights) = tch::no_grad(|| {
            let w = advantages
                .abs()
                .sum_dim_intlist(1, false, Kind::Float)
                .pow_tensor_scalar(alpha)
                .nan_to_num(0.0, 0.0, 0.0);
            let probs = (&w + 1e-6) / (w.sum(Kind::Float) + 1e-6);
            let idx = probs.multinomial(self.minibatch_segments, false);
            let prio_weights = (probs.index_select(0, &idx).unsqueeze(-1) * self.segments as f64)
                .pow_tensor_scalar(-beta);
            (idx, prio_weights)
        });

        let mb_advantages = advantages.index_select(0, &idx);
        let mb_values = self.values.index_select(0, &idx);

        Ok(Minibatch {
            obs: obs.index_select(0, &idx),
            actions: actions.index_select(0, &idx),
            logprobs: self.logprobs.index_select(0, &idx),
            rewards: self.rewards.index_select(0, &idx),
            dones: self.dones.index_select(0, &idx),
            returns: &mb_advantages + &mb_values,
            advantages: mb_advantages,
            values: mb_values,
            indices: idx,
            prio_weights,
        })
    }
}

impl ExperienceStore for Experience {
    fn store(&mut self, transition: Transition) -> Result<()> {
        let env_id = transition.env_id.clone();
        if env_id.is_empty() || env_id.end > self.total_agents {
            return Err(PpoError::InvalidConfig(format!(
                "slot range {:?} outside of {} agents",
                env_id, self.total_agents
            ))
            .into());
        }
        let n = env_id.len() as i64;
        check_leading("obs", &transition.obs, &[n])?;
        check_leading("actions", &transition.actions, &[n])?;
        Self::check_trailing("obs", &self.obs, &transition.obs)?;
        Self::check_trailing("actions", &self.actions, &transition.actions)?;
        for (name, t) in [
            ("logprobs", &transition.logprobs),
            ("rewards", &transition.rewards),
            ("dones", &transition.dones),
            ("truncations", &transition.truncations),
            ("values", &transition.values),
        ] {
            if t.numel() as i64 != n {
                return Err(PpoError::ShapeMismatch {
                    name: name.to_string(),
                    expected: vec![n],
                    actual: t.size(),
                }
                .into());
            }
        }

        let episode_length = self.ep_lengths[env_id.start];
        let rows = Tensor::from_slice(&self.ep_indices[env_id.clone()]).to_device(self.device);

        let obs = Self::lazy_buffer(&mut self.obs, self.segments, self.horizon, &transition.obs);
        let actions = Self::lazy_buffer(
            &mut self.actions,
            self.segments,
            self.horizon,
            &transition.actions,
        );

        tch::no_grad(|| -> Result<()> {
            let col = episode_length;
            Self::write("obs", &obs, col, &rows, &transition.obs)?;
            Self::write("actions", &actions, col, &rows, &transition.actions)?;
            Self::write("logprobs", &self.logprobs, col, &rows, &transition.logprobs)?;
            Self::write("rewards", &self.rewards, col, &rows, &transition.rewards)?;
            Self::write("dones", &self.dones, col, &rows, &transition.dones)?;
            Self::write("truncations", &self.truncations, col, &rows, &transition.truncations)?;
            Self::write("values", &self.values, col, &rows, &transition.values)?;
            Ok(())
        })?;
        trace!(
            "Stored slots {:?} at column {}, {} valid",
            env_id,
            episode_length,
            transition.mask.sum(Kind::Int64).int64_value(&[])
        );

        for len in self.ep_lengths[env_id.clone()].iter_mut() {
            *len += 1;
        }
        if episode_length + 1 >= self.horizon {
            self.move_to_free_rows(&env_id);
        }

        if let Some(state) = transition.lstm_state {
            self.lstm.insert(env_id.start, state.detach());
        }

        Ok(())
    }

    fn get_lstm_state(&self, slot: usize) -> Option<RecurrentState> {
        self.lstm.get(&slot).map(|s| s.shallow_clone())
    }

    fn update_ratio(&mut self, indices: &Tensor, ratio: &Tensor) -> Result<()> {
        Self::overwrite("ratio", &mut self.ratio, self.horizon, indices, ratio)
    }

    fn update_values(&mut self, indices: &Tensor, values: &Tensor) -> Result<()> {
        Self::overwrite("values", &mut self.values, self.horizon, indices, values)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn transition(env_id: Range<usize>, step: f64) -> Transition {
        let n = env_id.len() as i64;
        let base = Tensor::arange(n, (Kind::Float, Device::Cpu));
        Transition {
            obs: (&base + step).unsqueeze(-1).repeat([1, 3]),
            actions: Tensor::zeros([n, 2], (Kind::Int64, Device::Cpu)),
            logprobs: Tensor::full([n], -0.5, (Kind::Float, Device::Cpu)),
            rewards: Tensor::full([n], step, (Kind::Float, Device::Cpu)),
            dones: Tensor::zeros([n], (Kind::Float, Device::Cpu)),
            truncations: Tensor::zeros([n], (Kind::Float, Device::Cpu)),
            values: &base * 0.1,
            env_id,
            mask: Tensor::ones([n], (Kind::Float, Device::Cpu)),
            lstm_state: None,
        }
    }

    #[test]
    fn test_rejects_too_few_segments() {
        assert!(Experience::new(8, 16, 4, 4, Device::Cpu).is_err());
        assert!(Experience::new(2, 16, 4, 32, Device::Cpu).is_err());
        assert!(Experience::new(4, 16, 4, 8, Device::Cpu).is_ok());
    }

    #[test]
    fn test_from_config() -> Result<()> {
        let config = PpoConfig::default().bptt_horizon(4).minibatch_size(8);
        let exp = Experience::from_config(2, 16, &config, Device::Cpu)?;
        assert_eq!(exp.horizon(), 4);
        assert_eq!(exp.minibatch_segments(), config.minibatch_segments() as i64);
        assert_eq!(exp.num_minibatches(), 2);
        Ok(())
    }

    #[test]
    fn test_store_fills_rows() -> Result<()> {
        // 2 agents, 4 segments of 2 steps
        let mut exp = Experience::new(2, 8, 2, 4, Device::Cpu)?;
        assert_eq!(exp.segments(), 4);

        exp.store(transition(0..2, 1.0))?;
        assert!(!exp.ready_for_training());
        exp.store(transition(0..2, 2.0))?;
        assert_eq!(exp.full_rows(), 2);

        // Rows 0 and 1 hold the first segment of each slot
        let rewards = Vec::<f32>::try_from(&exp.rewards().flatten(0, -1))?;
        assert_eq!(rewards, vec![1.0, 2.0, 1.0, 2.0, 0.0, 0.0, 0.0, 0.0]);

        // The slots moved on to rows 2 and 3
        exp.store(transition(0..2, 3.0))?;
        exp.store(transition(0..2, 4.0))?;
        assert!(exp.ready_for_training());
        let rewards = Vec::<f32>::try_from(&exp.rewards().flatten(0, -1))?;
        assert_eq!(rewards, vec![1.0, 2.0, 1.0, 2.0, 3.0, 4.0, 3.0, 4.0]);

        // Observation buffer was allocated from the first batch
        assert_eq!(exp.obs.as_ref().unwrap().size(), vec![4, 2, 3]);
        assert_eq!(exp.actions.as_ref().unwrap().kind(), Kind::Int64);

        exp.reset_for_rollout();
        assert_eq!(exp.full_rows(), 0);
        assert_eq!(exp.ep_indices, vec![0, 1]);
        assert_eq!(exp.free_idx, 2);
        Ok(())
    }

    #[test]
    fn test_lstm_state_round_trip() -> Result<()> {
        let mut exp = Experience::new(2, 8, 2, 4, Device::Cpu)?;
        assert!(exp.get_lstm_state(0).is_none());

        let w = Tensor::ones([1, 2, 4], (Kind::Float, Device::Cpu)).set_requires_grad(true);
        let mut t = transition(0..2, 1.0);
        t.lstm_state = Some(RecurrentState {
            h: &w * 2.0,
            c: &w * 3.0,
        });
        exp.store(t)?;

        let state = exp.get_lstm_state(0).unwrap();
        assert!(!state.h.requires_grad());
        assert!(!state.c.requires_grad());
        assert!(state.h.equal(&(Tensor::ones([1, 2, 4], tch::kind::FLOAT_CPU) * 2.0)));
        assert!(state.c.equal(&(Tensor::ones([1, 2, 4], tch::kind::FLOAT_CPU) * 3.0)));
        assert!(exp.get_lstm_state(1).is_none());
        Ok(())
    }

    #[test]
    fn test_store_rejects_bad_values() -> Result<()> {
        let mut exp = Experience::new(2, 8, 2, 4, Device::Cpu)?;
        let mut t = transition(0..2, 1.0);
        t.values = Tensor::zeros([3], tch::kind::FLOAT_CPU);
        let err = exp.store(t).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PpoError>(),
            Some(PpoError::ShapeMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_store_rejects_changed_obs_shape() -> Result<()> {
        let mut exp = Experience::new(2, 8, 2, 4, Device::Cpu)?;
        exp.store(transition(0..2, 1.0))?;

        let mut t = transition(0..2, 2.0);
        t.obs = Tensor::zeros([2, 4], tch::kind::FLOAT_CPU);
        let err = exp.store(t).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PpoError>(),
            Some(&PpoError::ShapeMismatch {
                name: "obs".to_string(),
                expected: vec![2, 3],
                actual: vec![2, 4],
            })
        );

        // Nothing was written and the slots did not advance
        assert_eq!(exp.ep_lengths, vec![1, 1]);
        let rewards = Vec::<f32>::try_from(&exp.rewards().flatten(0, -1))?;
        assert_eq!(rewards, vec![1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        Ok(())
    }

    #[test]
    fn test_update_rejects_bad_sizes() -> Result<()> {
        let mut exp = Experience::new(2, 8, 2, 4, Device::Cpu)?;
        let indices = Tensor::from_slice(&[0i64, 1]);

        let err = exp
            .update_ratio(&indices, &Tensor::ones([3], tch::kind::FLOAT_CPU))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PpoError>(),
            Some(PpoError::ShapeMismatch { name, .. }) if name == "ratio"
        ));

        let err = exp
            .update_values(&indices, &Tensor::ones([2, 3], tch::kind::FLOAT_CPU))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PpoError>(),
            Some(PpoError::ShapeMismatch { name, .. }) if name == "values"
        ));

        // Rows outside of the store are reported, not panicking
        let out_of_range = Tensor::from_slice(&[0i64, 9]);
        assert!(exp
            .update_values(&out_of_range, &Tensor::ones([2, 2], tch::kind::FLOAT_CPU))
            .is_err());

        let ratio = Vec::<f32>::try_from(&exp.ratio().flatten(0, -1))?;
        assert!(ratio.iter().all(|r| *r == 1.0));
        Ok(())
    }

    #[test]
    fn test_sample_minibatch() -> Result<()> {
        let mut exp = Experience::new(2, 8, 2, 4, Device::Cpu)?;
        for step in 0..4 {
            exp.store(transition(0..2, step as f64))?;
        }

        let advantages = Tensor::ones([4, 2], tch::kind::FLOAT_CPU);
        let mb = exp.sample_minibatch(&advantages, 0.0, 0.5)?;
        mb.validate()?;
        assert_eq!(mb.num_steps(), 4);
        assert_eq!(mb.obs.size(), vec![2, 2, 3]);
        assert_eq!(mb.prio_weights.size(), vec![2, 1]);

        // Uniform priorities weigh every segment by (4 * 1/4)^-0.5 = 1
        let w = Vec::<f32>::try_from(&mb.prio_weights.flatten(0, -1))?;
        for w in w {
            assert!((w - 1.0).abs() < 1e-5);
        }

        // Segments are drawn without replacement
        let idx = Vec::<i64>::try_from(&mb.indices)?;
        assert_ne!(idx[0], idx[1]);

        let expected = mb.advantages.shallow_clone() + mb.values.shallow_clone();
        assert!(mb.returns.allclose(&expected, 1e-6, 1e-6, false));
        Ok(())
    }

    #[test]
    fn test_sample_prefers_large_advantages() -> Result<()> {
        let mut exp = Experience::new(2, 8, 2, 4, Device::Cpu)?;
        for step in 0..4 {
            exp.store(transition(0..2, step as f64))?;
        }

        // Only rows 1 and 3 have a non-zero advantage
        let advantages = Tensor::from_slice(&[0f32, 0., 5., 5., 0., 0., 1., 1.]).reshape([4, 2]);
        let mb = exp.sample_minibatch(&advantages, 1.0, 1.0)?;
        let mut idx = Vec::<i64>::try_from(&mb.indices)?;
        idx.sort();
        assert_eq!(idx, vec![1, 3]);
        Ok(())
    }

    #[test]
    fn test_update_ratio_and_values() -> Result<()> {
        let mut exp = Experience::new(2, 8, 2, 4, Device::Cpu)?;
        let indices = Tensor::from_slice(&[2i64, 0]);
        let ratio = Tensor::from_slice(&[1.5f32, 1.5, 0.5, 0.5]).set_requires_grad(true);
        exp.update_ratio(&indices, &(&ratio * 1.0))?;
        exp.update_values(&indices, &Tensor::from_slice(&[7f32, 7., 9., 9.]))?;

        let ratio = Vec::<f32>::try_from(&exp.ratio().flatten(0, -1))?;
        assert_eq!(ratio, vec![0.5, 0.5, 1.0, 1.0, 1.5, 1.5, 1.0, 1.0]);
        let values = Vec::<f32>::try_from(&exp.values().flatten(0, -1))?;
        assert_eq!(values, vec![9.0, 9.0, 0.0, 0.0, 7.0, 7.0, 0.0, 0.0]);
        Ok(())
    }
}
