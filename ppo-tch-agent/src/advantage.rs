//! V-trace corrected advantage estimation.
use anyhow::Result;
use ppo_core::{error::PpoError, PpoConfig};
use tch::{Kind, Tensor};

/// Scalar parameters of [`compute_advantage`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdvantageParams {
    /// Discount factor.
    pub gamma: f64,

    /// Trace decay.
    pub gae_lambda: f64,

    /// Upper clip of the ratio weighting the temporal-difference residual.
    pub rho_clip: f64,

    /// Upper clip of the ratio propagating the trace backward.
    pub c_clip: f64,
}

impl From<&PpoConfig> for AdvantageParams {
    fn from(config: &PpoConfig) -> Self {
        Self {
            gamma: config.gamma,
            gae_lambda: config.gae_lambda,
            rho_clip: config.vtrace.rho_clip,
            c_clip: config.vtrace.c_clip,
        }
    }
}

/// Computes the V-trace corrected GAE of segments of shape `[rows, horizon]`.
///
/// For each row, backward in time from `t = horizon - 2`:
///
/// ```text
/// nnt   = 1 - done[t+1]
/// rho   = min(ratio[t], rho_clip)
/// c     = min(ratio[t], c_clip)
/// delta = rho * (r[t+1] + gamma * v[t+1] * nnt - v[t])
/// A     = delta + gamma * lambda * c * A * nnt
/// ```
///
/// Ratios are only clipped from above. The last column has no successor and keeps
/// the value of `advantages`, which otherwise only fixes the shape of the result.
/// Inputs are left untouched; the estimate is returned in a new tensor.
pub fn compute_advantage(
    values: &Tensor,
    rewards: &Tensor,
    dones: &Tensor,
    ratio: &Tensor,
    advantages: &Tensor,
    params: &AdvantageParams,
) -> Result<Tensor> {
    let shape = values.size();
    if shape.len() != 2 {
        return Err(PpoError::ShapeMismatch {
            name: "values".to_string(),
            expected: vec![-1, -1],
            actual: shape,
        }
        .into());
    }
    for (name, t) in [
        ("rewards", rewards),
        ("dones", dones),
        ("ratio", ratio),
        ("advantages", advantages),
    ] {
        if t.size() != shape {
            return Err(PpoError::ShapeMismatch {
                name: name.to_string(),
                expected: shape,
                actual: t.size(),
            }
            .into());
        }
    }

    let horizon = shape[1];
    let out = tch::no_grad(|| {
        let values = values.to_kind(Kind::Float);
        let rewards = rewards.to_kind(Kind::Float);
        let dones = dones.to_kind(Kind::Float);
        let ratio = ratio.to_kind(Kind::Float);
        let out = advantages.to_kind(Kind::Float).copy();

        let mut last = Tensor::zeros([shape[0]], (Kind::Float, values.device()));
        for t in (0..horizon - 1).rev() {
            let nnt = 1.0 - dones.select(1, t + 1);
            let ratio_t = ratio.select(1, t);
            let rho = ratio_t.clamp_max(params.rho_clip);
            let c = ratio_t.clamp_max(params.c_clip);
            let delta = rho
                * (rewards.select(1, t + 1) + params.gamma * values.select(1, t + 1) * &nnt
                    - values.select(1, t));
            last = delta + params.gamma * params.gae_lambda * c * last * nnt;
            out.select(1, t).copy_(&last);
        }
        out
    });

    Ok(out)
}
