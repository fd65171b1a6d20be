//! Checks and statistics computed around a training phase.
use crate::{env::VecEnv, policy::PpoPolicy};
use anyhow::Result;
use log::{debug, info};
use ppo_core::{
    error::PpoError,
    record::{Record, RecordValue},
    should_run_on_interval,
};
use tch::{nn::VarStore, Kind, Tensor};

/// Fraction of the variance of the returns explained by the value estimates.
///
/// Returns are reconstructed as `advantages + values`. The result is NaN when the
/// returns have zero variance.
pub fn calculate_explained_variance(values: &Tensor, advantages: &Tensor) -> f64 {
    let y_pred = values.detach().flatten(0, -1).to_kind(Kind::Float);
    let y_true = advantages.detach().flatten(0, -1).to_kind(Kind::Float) + &y_pred;
    let var_y = y_true.var(true).double_value(&[]);
    if var_y == 0.0 {
        return f64::NAN;
    }
    1.0 - (&y_true - &y_pred).var(true).double_value(&[]) / var_y
}

/// Mean, variance and L2 norm of all gradients held by the trainable variables.
///
/// The record is empty when no variable has a gradient yet.
pub fn compute_gradient_stats(vs: &VarStore) -> Record {
    let grads: Vec<Tensor> = vs
        .trainable_variables()
        .iter()
        .map(|v| v.grad())
        .filter(|g| g.defined())
        .map(|g| g.detach().flatten(0, -1).to_kind(Kind::Float))
        .collect();

    if grads.is_empty() {
        debug!("No gradients to summarize");
        return Record::empty();
    }

    let all = Tensor::cat(&grads, 0);
    Record::from_slice(&[
        (
            "grad/mean",
            RecordValue::Scalar(all.mean(Kind::Float).double_value(&[]) as f32),
        ),
        (
            "grad/variance",
            RecordValue::Scalar(all.var(true).double_value(&[]) as f32),
        ),
        (
            "grad/norm",
            RecordValue::Scalar(all.norm().double_value(&[]) as f32),
        ),
    ])
}

/// Fails when the observation shape of `policy` differs from that of `env`.
pub fn validate_policy_environment_match<P, V>(policy: &P, env: &V) -> Result<()>
where
    P: PpoPolicy + ?Sized,
    V: VecEnv + ?Sized,
{
    let policy_shape = match policy.obs_shape() {
        Some(shape) => shape,
        None => {
            return Err(PpoError::UnsupportedPolicy(
                "policy does not declare an observation shape".to_string(),
            )
            .into())
        }
    };
    let env_shape = env.single_observation_shape();

    if policy_shape != env_shape {
        return Err(PpoError::ObsShapeMismatch {
            policy: policy_shape,
            env: env_shape,
        }
        .into());
    }
    Ok(())
}

/// Returns `(hidden_size, num_lstm_layers)` of `policy`.
pub fn get_lstm_config<P: PpoPolicy + ?Sized>(policy: &P) -> (i64, i64) {
    (policy.hidden_size(), policy.num_lstm_layers())
}

/// Refreshes the L2-init reference weights of `policy` when `epoch` falls on `interval`.
///
/// Policies reporting a zero weight-update interval are left untouched. Returns
/// `true` when the copy was refreshed.
pub fn maybe_update_l2_weights<P: PpoPolicy + ?Sized>(
    policy: &mut P,
    epoch: usize,
    interval: usize,
    is_master: bool,
    force: bool,
) -> bool {
    if !should_run_on_interval(epoch, interval, is_master, force) {
        return false;
    }
    if policy.l2_init_weight_update_interval() == 0 {
        return false;
    }

    policy.update_l2_init_weight_copy();
    info!("Updated L2-init weights at epoch {}", epoch);
    true
}
