//! Interface of policies trained by the PPO update.
use tch::{nn::VarStore, Kind, Tensor};

/// Hidden and cell state of a recurrent core.
#[derive(Debug)]
pub struct RecurrentState {
    /// Hidden state.
    pub h: Tensor,

    /// Cell state.
    pub c: Tensor,
}

impl RecurrentState {
    /// Returns a copy cut from the gradient graph.
    pub fn detach(&self) -> Self {
        Self {
            h: self.h.detach(),
            c: self.c.detach(),
        }
    }

    /// Returns a handle sharing storage with `self`.
    pub fn shallow_clone(&self) -> Self {
        Self {
            h: self.h.shallow_clone(),
            c: self.c.shallow_clone(),
        }
    }
}

/// Mutable state handed to [`PpoPolicy::forward`].
///
/// A policy with a recurrent core reads the incoming state from `lstm`, treating `None`
/// as a zero-initialized state, and writes its new state back.
#[derive(Debug, Default)]
pub struct PolicyState {
    /// Recurrent state, if any.
    pub lstm: Option<RecurrentState>,
}

impl PolicyState {
    /// State of a fresh sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// State continuing from `lstm`.
    pub fn with_lstm(lstm: RecurrentState) -> Self {
        Self { lstm: Some(lstm) }
    }
}

/// Output of [`PpoPolicy::forward`].
#[derive(Debug)]
pub struct PolicyOutput {
    /// Sampled actions, or the given actions when scoring, `[batch, action_dims]`.
    pub actions: Tensor,

    /// Log-probabilities of `actions`, `[batch]`.
    pub log_probs: Tensor,

    /// Entropy of the action distribution, `[batch]`.
    pub entropy: Tensor,

    /// Value estimate, `[batch]` or `[batch, 1]`.
    pub value: Tensor,

    /// Log-probabilities over the whole action space, `[batch, n_actions]`.
    pub full_log_probs: Tensor,
}

/// A recurrent actor-critic trained with PPO.
///
/// Besides the forward pass, the trait exposes what the update core needs to know
/// about the network without looking into it: parameters, the distance-to-initialization
/// regularizer, and the shapes of its recurrent core and expected observations.
pub trait PpoPolicy {
    /// Runs the policy on a batch of observations.
    ///
    /// When `action` is given, the policy scores these actions instead of sampling.
    /// The new recurrent state, if any, is written to `state`.
    fn forward(&self, obs: &Tensor, state: &mut PolicyState, action: Option<&Tensor>)
        -> PolicyOutput;

    /// Parameters of the policy.
    fn var_store(&self) -> &VarStore;

    /// Parameters of the policy as mutable reference.
    fn var_store_mut(&mut self) -> &mut VarStore;

    /// Squared distance of the parameters to their initial values.
    fn l2_init_loss(&self) -> Tensor {
        Tensor::from(0f32)
            .to_kind(Kind::Float)
            .to_device(self.var_store().device())
    }

    /// Resets the reference weights of [`PpoPolicy::l2_init_loss`] to the current ones.
    fn update_l2_init_weight_copy(&mut self) {}

    /// Epochs between updates of the reference weights, `0` to never update.
    fn l2_init_weight_update_interval(&self) -> usize {
        0
    }

    /// Size of the hidden state of the recurrent core.
    fn hidden_size(&self) -> i64;

    /// Number of layers of the recurrent core.
    fn num_lstm_layers(&self) -> i64;

    /// Shape of a single observation, if the policy declares one.
    fn obs_shape(&self) -> Option<Vec<i64>> {
        None
    }

    /// Number of components of an action.
    fn action_dims(&self) -> i64;
}
