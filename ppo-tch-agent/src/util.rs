//! Utilities.
use anyhow::Result;
use ppo_core::{error::PpoError, stats::InfoValue};
use tch::{Device, Kind, Tensor};
mod named_tensors;
pub use named_tensors::NamedTensors;

/// Fails unless `t` has exactly the shape `expected`.
pub fn check_shape(name: &str, t: &Tensor, expected: &[i64]) -> Result<()> {
    let actual = t.size();
    if actual.as_slice() != expected {
        return Err(PpoError::ShapeMismatch {
            name: name.to_string(),
            expected: expected.to_vec(),
            actual,
        }
        .into());
    }
    Ok(())
}

/// Reshapes `t` to `shape`, failing when the number of elements differs.
pub fn reshape_like(name: &str, t: &Tensor, shape: &[i64]) -> Result<Tensor> {
    let numel: i64 = shape.iter().product();
    if t.numel() as i64 != numel {
        return Err(PpoError::ShapeMismatch {
            name: name.to_string(),
            expected: shape.to_vec(),
            actual: t.size(),
        }
        .into());
    }
    Ok(t.reshape(shape))
}

/// Converts a tensor into an [`InfoValue::Array`], detached and copied to the host.
pub fn info_value_from_tensor(t: &Tensor) -> Result<InfoValue> {
    let t = t
        .detach()
        .to_device(Device::Cpu)
        .to_kind(Kind::Double)
        .flatten(0, -1);
    Ok(InfoValue::Array(Vec::<f64>::try_from(&t)?))
}
