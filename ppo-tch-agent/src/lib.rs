//! PPO rollout and minibatch update implemented with [tch](https://crates.io/crates/tch).
//!
//! A training epoch alternates two phases. During the rollout phase,
//! [`perform_rollout_step`] moves one batch of transitions from a [`VecEnv`] into the
//! [`Experience`] store until every segment is filled. The training phase,
//! [`PpoLearner::train_phase`], then draws prioritized minibatches of segments and,
//! for each of them, recomputes the V-trace advantage with fresh importance ratios,
//! normalizes it across processes and backpropagates the composed PPO loss.
pub mod advantage;
pub mod diagnostics;
pub mod env;
pub mod experience;
pub mod kickstarter;
pub mod learner;
pub mod loss;
pub mod normalize;
pub mod opt;
pub mod policy;
pub mod rollout;
pub mod util;

#[cfg(test)]
mod test_util;

pub use advantage::{compute_advantage, AdvantageParams};
pub use diagnostics::{
    calculate_explained_variance, compute_gradient_stats, get_lstm_config,
    maybe_update_l2_weights, validate_policy_environment_match,
};
pub use env::{EnvBatch, VecEnv};
pub use experience::{Experience, ExperienceStore, Minibatch, Transition};
pub use kickstarter::{Distiller, KickstartConfig, Kickstarter, NoDistillation};
pub use learner::PpoLearner;
pub use loss::{compute_ppo_losses, process_minibatch_update, Losses, PpoLossTerms};
pub use normalize::normalize_advantage_distributed;
pub use opt::{Optimizer, OptimizerConfig};
pub use policy::{PolicyOutput, PolicyState, PpoPolicy, RecurrentState};
pub use rollout::perform_rollout_step;
