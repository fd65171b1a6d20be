//! Advantage normalization across training processes.
use anyhow::Result;
use log::warn;
use ppo_core::DistContext;
use tch::{Kind, Tensor};

const EPS: f64 = 1e-8;

fn local_moments(adv: &Tensor) -> [f64; 3] {
    let adv = adv.detach().to_kind(Kind::Double);
    [
        adv.sum(Kind::Double).double_value(&[]),
        (&adv * &adv).sum(Kind::Double).double_value(&[]),
        adv.numel() as f64,
    ]
}

/// Rescales `adv` to zero mean and unit variance over all processes of `ctx`.
///
/// The sum, the sum of squares and the element count are reduced in a single
/// collective call, so every process of an active context must call this function
/// the same number of times. Then
///
/// ```text
/// mean = Σx / n
/// std  = sqrt(max(Σx² / n - mean², 1e-8))
/// out  = (x - mean) / (std + 1e-8)
/// ```
///
/// An inactive context uses the same formula on the local moments, so a group of one
/// produces exactly the local result. With `norm_adv` unset, `adv` is returned as is.
pub fn normalize_advantage_distributed(
    adv: &Tensor,
    norm_adv: bool,
    ctx: &dyn DistContext,
) -> Result<Tensor> {
    if !norm_adv {
        return Ok(adv.shallow_clone());
    }

    let mut moments = local_moments(adv);
    if ctx.is_active() {
        ctx.all_reduce_sum(&mut moments)?;
    }

    let [sum, sq_sum, count] = moments;
    if count == 0.0 {
        warn!("Skipped normalization of an empty advantage tensor");
        return Ok(adv.shallow_clone());
    }

    let mean = sum / count;
    let var = (sq_sum / count - mean * mean).max(EPS);
    let std = var.sqrt();

    Ok((adv - mean) / (std + EPS))
}
