//! Small policy and environment shared by the unit tests.
use crate::{
    env::{EnvBatch, VecEnv},
    policy::{PolicyOutput, PolicyState, PpoPolicy, RecurrentState},
    util::NamedTensors,
};
use anyhow::Result;
use ppo_core::stats::InfoValue;
use tch::{
    nn::{self, Module, VarStore},
    Device, Kind, Tensor,
};

/// Categorical policy with a one-layer recurrent body.
pub struct ToyPolicy {
    vs: VarStore,
    body: nn::Linear,
    logits: nn::Linear,
    value: nn::Linear,
    obs_dim: i64,
    hidden: i64,
    init: NamedTensors,
    pub declared_action_dims: i64,
    pub l2_interval: usize,
    pub l2_updates: usize,
}

impl ToyPolicy {
    pub fn new(obs_dim: i64, n_actions: i64, hidden: i64) -> Self {
        tch::manual_seed(0);
        let vs = VarStore::new(Device::Cpu);
        let p = &vs.root();
        let body = nn::linear(p / "body", obs_dim, hidden, Default::default());
        let logits = nn::linear(p / "logits", hidden, n_actions, Default::default());
        let value = nn::linear(p / "value", hidden, 1, Default::default());
        let init = NamedTensors::copy_from(&vs);

        Self {
            vs,
            body,
            logits,
            value,
            obs_dim,
            hidden,
            init,
            declared_action_dims: 1,
            l2_interval: 0,
            l2_updates: 0,
        }
    }
}

impl PpoPolicy for ToyPolicy {
    fn forward(&self, obs: &Tensor, state: &mut PolicyState, action: Option<&Tensor>) -> PolicyOutput {
        let x = obs.to_kind(Kind::Float).reshape([-1, self.obs_dim]);
        let mut h = self.body.forward(&x);
        if let Some(lstm) = &state.lstm {
            if lstm.h.size()[1] == h.size()[0] {
                h = h + lstm.h.get(0);
            }
        }
        let h = h.tanh();
        state.lstm = Some(RecurrentState {
            h: h.unsqueeze(0),
            c: h.unsqueeze(0),
        });

        let full_log_probs = self.logits.forward(&h).log_softmax(-1, Kind::Float);
        let actions = match action {
            Some(a) => a.reshape([-1, 1]).to_kind(Kind::Int64),
            None => full_log_probs.exp().multinomial(1, true),
        };
        let log_probs = full_log_probs.gather(1, &actions, false).squeeze_dim(1);
        let entropy = -(full_log_probs.exp() * &full_log_probs).sum_dim_intlist(-1, false, Kind::Float);
        let value = self.value.forward(&h);

        PolicyOutput {
            actions,
            log_probs,
            entropy,
            value,
            full_log_probs,
        }
    }

    fn var_store(&self) -> &VarStore {
        &self.vs
    }

    fn var_store_mut(&mut self) -> &mut VarStore {
        &mut self.vs
    }

    fn l2_init_loss(&self) -> Tensor {
        self.init.sq_distance(&self.vs)
    }

    fn update_l2_init_weight_copy(&mut self) {
        self.init = NamedTensors::copy_from(&self.vs);
        self.l2_updates += 1;
    }

    fn l2_init_weight_update_interval(&self) -> usize {
        self.l2_interval
    }

    fn hidden_size(&self) -> i64 {
        self.hidden
    }

    fn num_lstm_layers(&self) -> i64 {
        1
    }

    fn obs_shape(&self) -> Option<Vec<i64>> {
        Some(vec![self.obs_dim])
    }

    fn action_dims(&self) -> i64 {
        self.declared_action_dims
    }
}

/// Environment rewarding action `0`, ending every episode after five steps.
pub struct ToyEnv {
    num_agents: i64,
    obs_dim: i64,
    step: usize,
    last_actions: Tensor,
    pub mask_last_slot: bool,
    pub env_ids: Option<Vec<usize>>,
    pub sent: Vec<Tensor>,
}

impl ToyEnv {
    pub fn new(num_agents: i64, obs_dim: i64) -> Self {
        Self {
            num_agents,
            obs_dim,
            step: 0,
            last_actions: Tensor::ones([num_agents], (Kind::Int64, Device::Cpu)),
            mask_last_slot: false,
            env_ids: None,
            sent: vec![],
        }
    }
}

impl VecEnv for ToyEnv {
    fn recv(&mut self) -> Result<EnvBatch> {
        let n = self.num_agents;
        let opts = (Kind::Float, Device::Cpu);
        let done = (self.step % 5 == 4) as i64 as f64;
        let mask = Tensor::ones([n], opts);
        if self.mask_last_slot {
            let _ = mask.get(n - 1).fill_(0.0);
        }
        self.step += 1;

        Ok(EnvBatch {
            obs: Tensor::randn([n, self.obs_dim], opts),
            rewards: self.last_actions.eq(0).to_kind(Kind::Float),
            dones: Tensor::full([n], done, opts),
            truncations: Tensor::zeros([n], opts),
            infos: vec![InfoValue::map([(
                "episode",
                InfoValue::map([("length", InfoValue::Number(self.step as f64))]),
            )])],
            env_ids: self
                .env_ids
                .clone()
                .unwrap_or_else(|| (0..n as usize).collect()),
            mask,
        })
    }

    fn send(&mut self, actions: &Tensor) -> Result<()> {
        self.last_actions = actions.flatten(0, -1);
        self.sent.push(actions.shallow_clone());
        Ok(())
    }

    fn single_observation_shape(&self) -> Vec<i64> {
        vec![self.obs_dim]
    }
}
