//! Gating of periodic actions and annealing of the prioritized-sampling exponent.

/// Returns `true` when a periodic task (evaluation, checkpointing, weight copies)
/// should run at `epoch`.
///
/// Only the primary process runs periodic tasks, and an interval of zero disables
/// the task entirely, even when `force` is set.
pub fn should_run_on_interval(epoch: usize, interval: usize, is_master: bool, force: bool) -> bool {
    if !is_master || interval == 0 {
        return false;
    }

    if force {
        return true;
    }

    epoch % interval == 0
}

/// Annealed importance-weight exponent for prioritized minibatch sampling.
///
/// Beta moves from `beta0` towards 1 as training progresses, scaled by the
/// prioritization exponent `alpha`. The number of epochs is estimated as
/// `total_timesteps / batch_size`, floored at one.
pub fn prioritized_beta(
    epoch: usize,
    total_timesteps: usize,
    batch_size: usize,
    alpha: f64,
    beta0: f64,
) -> f64 {
    let total_epochs = (total_timesteps / batch_size.max(1)).max(1);
    beta0 + (1.0 - beta0) * alpha * epoch as f64 / total_epochs as f64
}
