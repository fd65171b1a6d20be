//! Training phase over a filled experience store.
use crate::{
    advantage::{compute_advantage, AdvantageParams},
    diagnostics::{calculate_explained_variance, compute_gradient_stats},
    experience::Experience,
    kickstarter::Distiller,
    loss::{process_minibatch_update, Losses},
    opt::{Optimizer, OptimizerConfig},
    policy::PpoPolicy,
};
use anyhow::Result;
use log::{debug, info};
use ppo_core::{
    dist::DistContext,
    error::PpoError,
    prioritized_beta,
    record::{Record, RecordValue},
    PpoConfig,
};
use tch::{nn::VarStore, Kind, Tensor};

/// Runs the PPO update epochs and owns the optimizer and the loss accumulator.
pub struct PpoLearner {
    config: PpoConfig,
    opt: Optimizer,
    losses: Losses,
}

impl PpoLearner {
    /// Builds a learner whose optimizer updates the trainable variables of `vs`.
    pub fn build(config: PpoConfig, opt_config: &OptimizerConfig, vs: &VarStore) -> Result<Self> {
        let opt = opt_config.build(vs)?;
        Ok(Self {
            config,
            opt,
            losses: Losses::new(),
        })
    }

    /// Configuration.
    pub fn config(&self) -> &PpoConfig {
        &self.config
    }

    /// Loss sums of the last training phase.
    pub fn losses(&self) -> &Losses {
        &self.losses
    }

    /// Sets the learning rate of the optimizer.
    pub fn set_lr(&mut self, lr: f64) {
        self.opt.set_lr(lr);
    }

    /// Mean approximate KL of the current phase over all processes of `ctx`.
    ///
    /// Every process must call this at the same point, as it performs a reduction
    /// when `ctx` is active.
    fn global_mean_approx_kl(&self, ctx: &dyn DistContext) -> Result<f64> {
        let mut buf = [
            self.losses.approx_kl_sum,
            self.losses.minibatches_processed as f64,
        ];
        if ctx.is_active() {
            ctx.all_reduce_sum(&mut buf)?;
        }
        Ok(buf[0] / buf[1].max(1.0))
    }

    fn check_experience(&self, experience: &Experience) -> Result<()> {
        let horizon = self.config.bptt_horizon as i64;
        let minibatch_segments = self.config.minibatch_segments() as i64;
        if experience.horizon() != horizon
            || experience.minibatch_segments() != minibatch_segments
        {
            return Err(PpoError::InvalidConfig(format!(
                "experience has segments of {} steps and minibatches of {} segments, \
                 configuration expects {} and {}",
                experience.horizon(),
                experience.minibatch_segments(),
                horizon,
                minibatch_segments
            ))
            .into());
        }
        Ok(())
    }

    /// Trains `policy` on the content of `experience`.
    ///
    /// The advantage of the whole store is first estimated with unit importance
    /// ratios. Each of the `update_epochs` epochs then draws
    /// `segments / minibatch_segments` prioritized minibatches and applies one
    /// optimizer step per minibatch, clipping the global gradient norm when
    /// `max_grad_norm` is positive. Training stops after the first epoch whose mean
    /// approximate KL exceeds `target_kl`. With an active `ctx` the KL is averaged over
    /// all processes, so that every process stops at the same epoch.
    ///
    /// # Errors
    ///
    /// Fails when `experience` was not built with the segment length and minibatch
    /// size of the configuration.
    ///
    /// Returns the averaged loss terms together with the gradient statistics of the
    /// last step.
    #[allow(clippy::too_many_arguments)]
    pub fn train_phase<P, D>(
        &mut self,
        policy: &P,
        experience: &mut Experience,
        kickstarter: &D,
        agent_step: usize,
        epoch: usize,
        total_timesteps: usize,
        batch_size: usize,
        ctx: &dyn DistContext,
    ) -> Result<Record>
    where
        P: PpoPolicy + ?Sized,
        D: Distiller + ?Sized,
    {
        self.check_experience(experience)?;
        self.losses.zero();
        experience.reset_importance_sampling_ratios();

        let shape = [experience.segments(), experience.horizon()];
        let device = experience.device();
        let advantages = compute_advantage(
            experience.values(),
            experience.rewards(),
            experience.dones(),
            &Tensor::ones(shape, (Kind::Float, device)),
            &Tensor::zeros(shape, (Kind::Float, device)),
            &AdvantageParams::from(&self.config),
        )?;

        let prio = &self.config.prioritized;
        let beta = prioritized_beta(epoch, total_timesteps, batch_size, prio.alpha, prio.beta0);
        let num_minibatches = experience.num_minibatches();
        let mut epochs_trained = 0;

        for update_epoch in 0..self.config.update_epochs {
            for _ in 0..num_minibatches {
                let minibatch = experience.sample_minibatch(&advantages, prio.alpha, beta)?;
                let loss = process_minibatch_update(
                    policy,
                    experience,
                    &minibatch,
                    &self.config,
                    kickstarter,
                    agent_step,
                    &mut self.losses,
                    ctx,
                )?;

                if self.config.max_grad_norm > 0.0 {
                    self.opt
                        .backward_step_clip_norm(&loss, self.config.max_grad_norm);
                } else {
                    self.opt.backward_step(&loss);
                }
            }
            epochs_trained += 1;

            if let Some(target_kl) = self.config.target_kl {
                let kl = self.global_mean_approx_kl(ctx)?;
                if kl > target_kl {
                    debug!(
                        "Early stop at update epoch {}: approx_kl {:.5} > {:.5}",
                        update_epoch, kl, target_kl
                    );
                    break;
                }
            }
        }

        let grad_stats = compute_gradient_stats(policy.var_store());
        self.losses.explained_variance =
            calculate_explained_variance(experience.values(), &advantages);

        info!(
            "Epoch {}: {} minibatches over {} update epochs, approx_kl = {:.5}",
            epoch,
            self.losses.minibatches_processed,
            epochs_trained,
            self.losses.mean_approx_kl()
        );

        let mut record = self.losses.stats().merge(grad_stats);
        record.insert("prioritized_beta", RecordValue::Scalar(beta as f32));
        record.insert("update_epochs", RecordValue::Scalar(epochs_trained as f32));
        record.insert(
            "minibatches",
            RecordValue::Scalar(self.losses.minibatches_processed as f32),
        );
        Ok(record)
    }
}
