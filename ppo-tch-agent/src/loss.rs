//! PPO loss and the minibatch update.
use crate::{
    advantage::{compute_advantage, AdvantageParams},
    experience::{ExperienceStore, Minibatch},
    kickstarter::Distiller,
    normalize::normalize_advantage_distributed,
    policy::{PolicyState, PpoPolicy},
    util::reshape_like,
};
use anyhow::Result;
use log::trace;
use ppo_core::{
    record::{Record, RecordValue},
    DistContext, PpoConfig,
};
use tch::{Kind, Tensor};

/// Terms of the PPO objective computed by [`compute_ppo_losses`].
#[derive(Debug)]
pub struct PpoLossTerms {
    /// Clipped surrogate loss.
    pub policy_loss: Tensor,

    /// Value loss, already scaled by one half.
    pub value_loss: Tensor,

    /// Mean entropy of the action distribution.
    pub entropy: Tensor,

    /// Approximate KL divergence between behavior and current policy.
    pub approx_kl: Tensor,

    /// Fraction of ratios outside of the clip range.
    pub clipfrac: Tensor,
}

/// Computes the PPO loss terms of a minibatch.
///
/// `ratio` is `exp(new_logprobs - minibatch.logprobs)` and `adv` the advantage after
/// normalization and prioritized reweighting, both shaped like `minibatch.logprobs`.
///
/// * policy: `mean(max(-adv * ratio, -adv * clamp(ratio, 1 - clip, 1 + clip)))`
/// * value: `0.5 * mean((v - R)^2)`, or with `clip_vloss` the elementwise max with the
///   error of `v` clamped to `vf_clip_coef` around the stored value
/// * approx_kl: `mean((ratio - 1) - log(ratio))`, not differentiated
/// * clipfrac: `mean(|ratio - 1| > clip)`, not differentiated
pub fn compute_ppo_losses(
    minibatch: &Minibatch,
    new_logprobs: &Tensor,
    entropy: &Tensor,
    new_value: &Tensor,
    ratio: &Tensor,
    adv: &Tensor,
    config: &PpoConfig,
) -> Result<PpoLossTerms> {
    let clip = config.clip_coef;
    let neg_adv = adv.neg();
    let pg_loss1 = &neg_adv * ratio;
    let pg_loss2 = &neg_adv * ratio.clamp(1.0 - clip, 1.0 + clip);
    let policy_loss = pg_loss1.maximum(&pg_loss2).mean(Kind::Float);

    let returns = &minibatch.returns;
    let new_value = reshape_like("value", new_value, &returns.size())?;
    let value_loss = if config.clip_vloss {
        let v_loss_unclipped = (&new_value - returns).square();
        let v_clipped = &minibatch.values
            + (&new_value - &minibatch.values).clamp(-config.vf_clip_coef, config.vf_clip_coef);
        let v_loss_clipped = (v_clipped - returns).square();
        0.5 * v_loss_unclipped.maximum(&v_loss_clipped).mean(Kind::Float)
    } else {
        0.5 * (&new_value - returns).square().mean(Kind::Float)
    };

    let entropy = entropy.mean(Kind::Float);

    let (approx_kl, clipfrac) = tch::no_grad(|| {
        let logratio = new_logprobs - &minibatch.logprobs;
        let approx_kl = ((ratio - 1.0) - logratio).mean(Kind::Float);
        let clipfrac = (ratio - 1.0)
            .abs()
            .gt(clip)
            .to_kind(Kind::Float)
            .mean(Kind::Float);
        (approx_kl, clipfrac)
    });

    Ok(PpoLossTerms {
        policy_loss,
        value_loss,
        entropy,
        approx_kl,
        clipfrac,
    })
}

/// Running sums of the loss terms over the minibatches of an epoch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Losses {
    /// Clipped surrogate loss.
    pub policy_loss_sum: f64,

    /// Value loss.
    pub value_loss_sum: f64,

    /// Mean entropy.
    pub entropy_sum: f64,

    /// Approximate KL divergence.
    pub approx_kl_sum: f64,

    /// Fraction of clipped ratios.
    pub clipfrac_sum: f64,

    /// Weighted distance to the initial weights, zero when disabled.
    pub l2_init_loss_sum: f64,

    /// Action distillation loss.
    pub ks_action_loss_sum: f64,

    /// Value distillation loss.
    pub ks_value_loss_sum: f64,

    /// Mean importance ratio.
    pub importance_sum: f64,

    /// Mean log-probability of the stored actions under the current policy.
    pub current_logprobs_sum: f64,

    /// Number of minibatches accumulated since the last [`Losses::zero`].
    pub minibatches_processed: usize,

    /// Explained variance of the phase, set once by the learner.
    pub explained_variance: f64,
}

impl Losses {
    /// Creates an accumulator with all sums at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets every sum and the minibatch count.
    pub fn zero(&mut self) {
        *self = Self::default();
    }

    /// Mean approximate KL over the processed minibatches.
    pub fn mean_approx_kl(&self) -> f64 {
        self.approx_kl_sum / self.minibatches_processed.max(1) as f64
    }

    /// Averages of the loss terms.
    ///
    /// Explained variance is reported as is, the other entries are divided by the
    /// number of processed minibatches (at least one).
    pub fn stats(&self) -> Record {
        let n = self.minibatches_processed.max(1) as f64;
        let mean = |sum: f64| RecordValue::Scalar((sum / n) as f32);

        Record::from_slice(&[
            ("policy_loss", mean(self.policy_loss_sum)),
            ("value_loss", mean(self.value_loss_sum)),
            ("entropy", mean(self.entropy_sum)),
            ("approx_kl", mean(self.approx_kl_sum)),
            ("clipfrac", mean(self.clipfrac_sum)),
            ("l2_init_loss", mean(self.l2_init_loss_sum)),
            ("ks_action_loss", mean(self.ks_action_loss_sum)),
            ("ks_value_loss", mean(self.ks_value_loss_sum)),
            ("importance", mean(self.importance_sum)),
            ("current_logprobs", mean(self.current_logprobs_sum)),
            (
                "explained_variance",
                RecordValue::Scalar(self.explained_variance as f32),
            ),
        ])
    }
}

/// Runs the forward pass and builds the total loss of one minibatch.
///
/// In order:
/// 1. scores the stored actions with `policy`, starting from a fresh recurrent state
/// 2. writes the new importance ratios into `experience`
/// 3. recomputes the V-trace advantage of the minibatch with these ratios
/// 4. normalizes it over all processes of `ctx`, then applies the prioritized weights
/// 5. adds the distillation terms and, with a positive coefficient, the
///    distance-to-initialization term
/// 6. writes the new value estimates into `experience` and accumulates every term
///    into `losses`
///
/// Returns `policy - ent_coef * entropy + vf_coef * value + l2_init + ks_action + ks_value`
/// for the caller to backpropagate.
#[allow(clippy::too_many_arguments)]
pub fn process_minibatch_update<P, E, D>(
    policy: &P,
    experience: &mut E,
    minibatch: &Minibatch,
    config: &PpoConfig,
    kickstarter: &D,
    agent_step: usize,
    losses: &mut Losses,
    ctx: &dyn DistContext,
) -> Result<Tensor>
where
    P: PpoPolicy + ?Sized,
    E: ExperienceStore + ?Sized,
    D: Distiller + ?Sized,
{
    let obs = &minibatch.obs;
    let mut state = PolicyState::new();
    let out = policy.forward(obs, &mut state, Some(&minibatch.actions));

    let new_logprobs = reshape_like("log_probs", &out.log_probs, &minibatch.logprobs.size())?;
    let logratio = &new_logprobs - &minibatch.logprobs;
    let ratio = logratio.exp();
    experience.update_ratio(&minibatch.indices, &ratio)?;

    let adv = compute_advantage(
        &minibatch.values,
        &minibatch.rewards,
        &minibatch.dones,
        &ratio,
        &minibatch.advantages,
        &AdvantageParams::from(config),
    )?;
    let adv = normalize_advantage_distributed(&adv, config.norm_adv, ctx)?;
    let adv = &minibatch.prio_weights * adv;

    let terms = compute_ppo_losses(
        minibatch,
        &new_logprobs,
        &out.entropy,
        &out.value,
        &ratio,
        &adv,
        config,
    )?;

    let mut teacher_state = PolicyState::new();
    let (ks_action_loss, ks_value_loss) = kickstarter.loss(
        agent_step,
        &out.full_log_probs,
        &out.value,
        obs,
        &mut teacher_state,
    )?;

    let l2_init_loss = match config.l2_init_loss_coef > 0.0 {
        true => Some(config.l2_init_loss_coef * policy.l2_init_loss().to_device(adv.device())),
        false => None,
    };

    let mut loss = &terms.policy_loss - config.ent_coef * &terms.entropy
        + config.vf_coef * &terms.value_loss
        + &ks_action_loss
        + &ks_value_loss;
    if let Some(l2_init_loss) = &l2_init_loss {
        loss = loss + l2_init_loss;
    }

    let new_value = reshape_like("value", &out.value, &minibatch.values.size())?;
    experience.update_values(&minibatch.indices, &new_value)?;

    let scalar = |t: &Tensor| t.double_value(&[]);
    losses.policy_loss_sum += scalar(&terms.policy_loss);
    losses.value_loss_sum += scalar(&terms.value_loss);
    losses.entropy_sum += scalar(&terms.entropy);
    losses.approx_kl_sum += scalar(&terms.approx_kl);
    losses.clipfrac_sum += scalar(&terms.clipfrac);
    losses.l2_init_loss_sum += l2_init_loss.as_ref().map_or(0.0, scalar);
    losses.ks_action_loss_sum += scalar(&ks_action_loss);
    losses.ks_value_loss_sum += scalar(&ks_value_loss);
    losses.importance_sum += scalar(&ratio.mean(Kind::Float));
    losses.current_logprobs_sum += scalar(&new_logprobs.mean(Kind::Float));
    losses.minibatches_processed += 1;

    trace!(
        "Minibatch {}: policy_loss = {:.5}, value_loss = {:.5}",
        losses.minibatches_processed,
        scalar(&terms.policy_loss),
        scalar(&terms.value_loss)
    );

    Ok(loss)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        experience::{Experience, Transition},
        kickstarter::NoDistillation,
        test_util::ToyPolicy,
    };
    use ppo_core::{SingleProcess, ThreadGroup};
    use tch::Device;

    fn minibatch(logprobs: &[f32], values: &[f32], returns: &[f32]) -> Minibatch {
        let n = logprobs.len() as i64;
        let row = |v: &[f32]| Tensor::from_slice(v).reshape([1, n]);
        let values = row(values);
        let returns = row(returns);
        Minibatch {
            obs: Tensor::zeros([1, n, 3], tch::kind::FLOAT_CPU),
            actions: Tensor::zeros([1, n, 1], (Kind::Int64, Device::Cpu)),
            logprobs: row(logprobs),
            rewards: Tensor::zeros([1, n], tch::kind::FLOAT_CPU),
            dones: Tensor::zeros([1, n], tch::kind::FLOAT_CPU),
            advantages: &returns - &values,
            returns,
            values,
            indices: Tensor::from_slice(&[0i64]),
            prio_weights: Tensor::ones([1, 1], tch::kind::FLOAT_CPU),
        }
    }

    fn to_vec(t: &Tensor) -> Vec<f64> {
        Vec::<f64>::try_from(&t.flatten(0, -1)).unwrap()
    }

    #[test]
    fn test_policy_loss_is_pessimistic_bound() -> Result<()> {
        let mb = minibatch(&[0.0; 4], &[0.0; 4], &[0.0; 4]);
        let ratio = Tensor::from_slice(&[0.5f32, 0.95, 1.05, 1.5]).reshape([1, 4]);
        let adv = Tensor::from_slice(&[1f32, -1.0, 2.0, -2.0]).reshape([1, 4]);
        let config = PpoConfig::default().clip_coef(0.2);

        let terms = compute_ppo_losses(&mb, &ratio.log(), &adv, &mb.values, &ratio, &adv, &config)?;

        let expected: f64 = [(0.5, 1.0), (0.95, -1.0), (1.05, 2.0), (1.5, -2.0)]
            .iter()
            .map(|&(r, a): &(f64, f64)| (-a * r).max(-a * r.clamp(0.8, 1.2)))
            .sum::<f64>()
            / 4.0;
        assert!((terms.policy_loss.double_value(&[]) - expected).abs() < 1e-6);

        // 0.5 and 1.5 are outside of [0.8, 1.2]
        assert!((terms.clipfrac.double_value(&[]) - 0.5).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_value_loss_clipping() -> Result<()> {
        let mb = minibatch(&[0.0; 2], &[1.0, 1.0], &[2.0, 0.0]);
        let new_value = Tensor::from_slice(&[3f32, 1.05]);
        let ratio = Tensor::ones([1, 2], tch::kind::FLOAT_CPU);
        let adv = Tensor::zeros([1, 2], tch::kind::FLOAT_CPU);
        let entropy = Tensor::from_slice(&[0.5f32, 1.5]);

        // Unclipped errors: (3-2)^2 = 1, 1.05^2 = 1.1025
        // Clipped values 1.1 and 1.05: (1.1-2)^2 = 0.81, 1.1025
        let config = PpoConfig::default().vf_clip_coef(0.1).clip_vloss(true);
        let terms = compute_ppo_losses(&mb, &ratio.log(), &entropy, &new_value, &ratio, &adv, &config)?;
        assert!((terms.value_loss.double_value(&[]) - 0.5 * (1.0 + 1.1025) / 2.0).abs() < 1e-5);
        assert!((terms.entropy.double_value(&[]) - 1.0).abs() < 1e-6);

        let config = config.clip_vloss(false);
        let terms = compute_ppo_losses(&mb, &ratio.log(), &entropy, &new_value, &ratio, &adv, &config)?;
        assert!((terms.value_loss.double_value(&[]) - 0.5 * (1.0 + 1.1025) / 2.0).abs() < 1e-5);

        // No ratio moved, no KL
        assert!(terms.approx_kl.double_value(&[]).abs() < 1e-6);

        // Estimate hits the target, but only 0.1 of the move from 0 is allowed
        let mb = minibatch(&[0.0], &[0.0], &[1.0]);
        let new_value = Tensor::from_slice(&[1f32]);
        let ratio = Tensor::ones([1, 1], tch::kind::FLOAT_CPU);
        let adv = Tensor::zeros([1, 1], tch::kind::FLOAT_CPU);
        let config = PpoConfig::default().vf_clip_coef(0.1).clip_vloss(true);
        let clipped = compute_ppo_losses(&mb, &ratio.log(), &adv, &new_value, &ratio, &adv, &config)?
            .value_loss
            .double_value(&[]);
        let config = config.clip_vloss(false);
        let unclipped = compute_ppo_losses(&mb, &ratio.log(), &adv, &new_value, &ratio, &adv, &config)?
            .value_loss
            .double_value(&[]);
        assert!((clipped - 0.5 * 0.81).abs() < 1e-5);
        assert!(unclipped.abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_value_shape_mismatch() {
        let mb = minibatch(&[0.0; 2], &[1.0, 1.0], &[2.0, 0.0]);
        let ratio = Tensor::ones([1, 2], tch::kind::FLOAT_CPU);
        let new_value = Tensor::zeros([3], tch::kind::FLOAT_CPU);
        let res = compute_ppo_losses(&mb, &ratio, &ratio, &new_value, &ratio, &ratio, &PpoConfig::default());
        assert!(res.is_err());
    }

    fn filled_experience(policy: &ToyPolicy) -> Result<Experience> {
        let mut exp = Experience::new(2, 8, 4, 8, Device::Cpu)?;
        tch::manual_seed(1);
        for step in 0..8 {
            let obs = Tensor::randn([2, 3], tch::kind::FLOAT_CPU);
            let mut state = PolicyState::new();
            let out = tch::no_grad(|| policy.forward(&obs, &mut state, None));
            exp.store(Transition {
                obs,
                actions: out.actions,
                logprobs: out.log_probs,
                rewards: Tensor::full([2], (step % 3) as f64, tch::kind::FLOAT_CPU),
                dones: Tensor::zeros([2], tch::kind::FLOAT_CPU),
                truncations: Tensor::zeros([2], tch::kind::FLOAT_CPU),
                values: out.value.flatten(0, -1),
                env_id: 0..2,
                mask: Tensor::ones([2], tch::kind::FLOAT_CPU),
                lstm_state: None,
            })?;
        }
        Ok(exp)
    }

    #[test]
    fn test_minibatch_update() -> Result<()> {
        let policy = ToyPolicy::new(3, 4, 8);
        let mut exp = filled_experience(&policy)?;
        assert!(exp.ready_for_training());

        let config = PpoConfig::default().bptt_horizon(4).minibatch_size(8);
        let advantages = Tensor::zeros([2, 4], tch::kind::FLOAT_CPU);
        let mb = exp.sample_minibatch(&advantages, 0.0, 0.6)?;
        mb.validate()?;

        let mut losses = Losses::new();
        let loss = process_minibatch_update(
            &policy,
            &mut exp,
            &mb,
            &config,
            &NoDistillation,
            0,
            &mut losses,
            &SingleProcess,
        )?;

        assert_eq!(loss.size(), Vec::<i64>::new());
        assert!(loss.requires_grad());
        assert_eq!(losses.minibatches_processed, 1);

        // Policy unchanged since collection, so every ratio is one
        assert!((losses.importance_sum - 1.0).abs() < 1e-5);
        assert!(losses.approx_kl_sum.abs() < 1e-5);
        let ratio = to_vec(exp.ratio());
        assert!(ratio.iter().all(|r| (r - 1.0).abs() < 1e-5));

        // Distance to the initial weights is not computed with a zero coefficient
        assert_eq!(losses.l2_init_loss_sum, 0.0);

        let stats = losses.stats();
        assert_eq!(stats.get_scalar("policy_loss")?, losses.policy_loss_sum as f32);
        Ok(())
    }

    #[test]
    fn test_minibatch_update_writes_values() -> Result<()> {
        let policy = ToyPolicy::new(3, 4, 8);
        let mut exp = filled_experience(&policy)?;
        let before = to_vec(exp.values());

        // Zero the stored estimates, the update must restore the policy's values
        let indices = Tensor::from_slice(&[0i64, 1]);
        exp.update_values(&indices, &Tensor::zeros([2, 4], tch::kind::FLOAT_CPU))?;

        let config = PpoConfig::default().l2_init_loss_coef(0.5);
        let advantages = Tensor::zeros([2, 4], tch::kind::FLOAT_CPU);
        let mb = exp.sample_minibatch(&advantages, 0.0, 0.6)?;
        let mut losses = Losses::new();
        let _ = process_minibatch_update(
            &policy,
            &mut exp,
            &mb,
            &config,
            &NoDistillation,
            0,
            &mut losses,
            &SingleProcess,
        )?;

        for (a, b) in to_vec(exp.values()).iter().zip(before.iter()) {
            assert!((a - b).abs() < 1e-5);
        }

        // Weights have not moved yet
        assert_eq!(losses.l2_init_loss_sum, 0.0);
        Ok(())
    }

    /// Returns fixed distillation losses.
    struct FixedDistiller(f64, f64);

    impl Distiller for FixedDistiller {
        fn loss(
            &self,
            _agent_step: usize,
            _full_log_probs: &Tensor,
            _value: &Tensor,
            _obs: &Tensor,
            _teacher_state: &mut PolicyState,
        ) -> Result<(Tensor, Tensor)> {
            Ok((Tensor::from(self.0 as f32), Tensor::from(self.1 as f32)))
        }
    }

    #[test]
    fn test_minibatch_update_total_loss() -> Result<()> {
        let policy = ToyPolicy::new(3, 4, 8);
        let mut exp = filled_experience(&policy)?;

        // Move the weights away from their initial values and from the behavior policy
        tch::no_grad(|| {
            for mut v in policy.var_store().trainable_variables() {
                let moved = &v + 0.1;
                v.copy_(&moved);
            }
        });

        let config = PpoConfig::default()
            .ent_coef(0.05)
            .vf_coef(0.7)
            .l2_init_loss_coef(0.3);
        tch::manual_seed(5);
        let advantages = Tensor::randn([2, 4], tch::kind::FLOAT_CPU);
        let mb = exp.sample_minibatch(&advantages, 0.0, 0.6)?;
        let mb = Minibatch {
            prio_weights: Tensor::from_slice(&[0.5f32, 2.0]).reshape([2, 1]),
            ..mb
        };

        let mut losses = Losses::new();
        let loss = process_minibatch_update(
            &policy,
            &mut exp,
            &mb,
            &config,
            &FixedDistiller(0.25, 0.75),
            0,
            &mut losses,
            &SingleProcess,
        )?;

        // Same pipeline by hand: advantage, normalize, then reweight
        let out = policy.forward(&mb.obs, &mut PolicyState::new(), Some(&mb.actions));
        let new_logprobs = reshape_like("log_probs", &out.log_probs, &mb.logprobs.size())?;
        let ratio = (&new_logprobs - &mb.logprobs).exp();
        let adv = compute_advantage(
            &mb.values,
            &mb.rewards,
            &mb.dones,
            &ratio,
            &mb.advantages,
            &AdvantageParams::from(&config),
        )?;
        let normalized = normalize_advantage_distributed(&adv, true, &SingleProcess)?;
        let total = |adv: &Tensor| -> Result<f64> {
            let terms =
                compute_ppo_losses(&mb, &new_logprobs, &out.entropy, &out.value, &ratio, adv, &config)?;
            Ok(terms.policy_loss.double_value(&[])
                - 0.05 * terms.entropy.double_value(&[])
                + 0.7 * terms.value_loss.double_value(&[])
                + 0.3 * policy.l2_init_loss().double_value(&[])
                + 0.25
                + 0.75)
        };
        let expected = total(&(&mb.prio_weights * &normalized))?;
        assert!((loss.double_value(&[]) - expected).abs() < 1e-4);

        // Reweighting before normalizing gives another objective
        let reweighted_first =
            normalize_advantage_distributed(&(&mb.prio_weights * &adv), true, &SingleProcess)?;
        assert!((total(&reweighted_first)? - expected).abs() > 1e-4);

        // Every auxiliary term was accumulated
        assert!(losses.l2_init_loss_sum > 0.0);
        assert!((losses.ks_action_loss_sum - 0.25).abs() < 1e-6);
        assert!((losses.ks_value_loss_sum - 0.75).abs() < 1e-6);
        assert!(losses.approx_kl_sum > 0.0);
        Ok(())
    }

    #[test]
    fn test_minibatch_update_in_group() -> Result<()> {
        let policy = ToyPolicy::new(3, 4, 8);
        let mut exp = filled_experience(&policy)?;
        let config = PpoConfig::default();
        let advantages = Tensor::randn([2, 4], tch::kind::FLOAT_CPU);
        let mb = exp.sample_minibatch(&advantages, 0.0, 0.6)?;

        let mut members = ThreadGroup::new(1);
        let member = members.remove(0);
        let mut losses = Losses::new();
        let loss = process_minibatch_update(
            &policy,
            &mut exp,
            &mb,
            &config,
            &NoDistillation,
            0,
            &mut losses,
            &member,
        )?;
        assert!(loss.double_value(&[]).is_finite());
        Ok(())
    }

    #[test]
    fn test_losses_zero() {
        let mut losses = Losses::new();
        losses.policy_loss_sum = 4.0;
        losses.minibatches_processed = 2;
        assert_eq!(losses.stats().get_scalar("policy_loss").unwrap(), 2.0);

        losses.zero();
        assert_eq!(losses, Losses::new());
        assert_eq!(losses.stats().get_scalar("policy_loss").unwrap(), 0.0);
    }
}
