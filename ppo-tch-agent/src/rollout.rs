//! Collection of experience from a vectorized environment.
use crate::{
    env::VecEnv,
    experience::{ExperienceStore, Transition},
    policy::{PolicyState, PpoPolicy},
    util::check_shape,
};
use anyhow::Result;
use log::trace;
use ppo_core::{error::PpoError, stats::InfoValue};
use std::ops::Range;
use tch::{Device, Kind};

/// Converts the slot ids of a receive into a range.
fn slot_range(env_ids: &[usize]) -> Result<Range<usize>> {
    let start = match env_ids.first() {
        Some(start) => *start,
        None => return Err(PpoError::NonContiguousEnvIds(vec![]).into()),
    };
    let contiguous = env_ids.iter().enumerate().all(|(k, id)| *id == start + k);
    if !contiguous {
        return Err(PpoError::NonContiguousEnvIds(env_ids.to_vec()).into());
    }
    Ok(start..start + env_ids.len())
}

/// Performs one rollout step.
///
/// Receives a batch from `env`, samples actions with `policy` without tracking
/// gradients, writes one [`Transition`] into `experience` and sends the actions back.
/// The recurrent state stored for the first slot of the batch, if any, seeds the
/// policy, and the new state is stored detached.
///
/// Returns the number of valid agent steps, the sum of the mask, together with the
/// reports of the environments.
///
/// # Errors
///
/// Non-contiguous environment slots and policy outputs whose shapes differ from
/// `log_probs: [batch]` and `actions: [batch, action_dims]` abort the step.
pub fn perform_rollout_step<P, V, E>(
    policy: &P,
    env: &mut V,
    experience: &mut E,
    device: Device,
) -> Result<(usize, Vec<InfoValue>)>
where
    P: PpoPolicy + ?Sized,
    V: VecEnv + ?Sized,
    E: ExperienceStore + ?Sized,
{
    let batch = env.recv()?;
    let env_id = slot_range(&batch.env_ids)?;
    let num_steps = batch.mask.sum(Kind::Int64).int64_value(&[]) as usize;

    let obs = batch.obs.to_device(device);
    let rewards = batch.rewards.to_device(device);
    let dones = batch.dones.to_device(device);
    let truncations = batch.truncations.to_device(device);

    let n = env_id.len() as i64;
    let (out, lstm_state) = tch::no_grad(|| -> Result<_> {
        let mut state = match experience.get_lstm_state(env_id.start) {
            Some(lstm) => PolicyState::with_lstm(lstm),
            None => PolicyState::new(),
        };

        let out = policy.forward(&obs, &mut state, None);
        check_shape("log_probs", &out.log_probs, &[n])?;
        check_shape("actions", &out.actions, &[n, policy.action_dims()])?;

        let lstm_state = state.lstm.map(|s| s.detach());
        if let Device::Cuda(i) = device {
            tch::Cuda::synchronize(i as i64);
        }
        Ok((out, lstm_state))
    })?;

    trace!("Rollout step on slots {:?}, {} valid", env_id, num_steps);

    experience.store(Transition {
        obs,
        actions: out.actions.shallow_clone(),
        logprobs: out.log_probs,
        rewards,
        dones,
        truncations,
        values: out.value.flatten(0, -1),
        env_id,
        mask: batch.mask,
        lstm_state,
    })?;

    env.send(&out.actions.to_device(Device::Cpu))?;

    Ok((num_steps, batch.infos))
}
