use anyhow::Result;
use ppo_core::error::PpoError;
use std::{collections::HashMap, iter::FromIterator};
use tch::{nn::VarStore, Kind, Tensor};

/// Detached snapshot of the parameters of a [`VarStore`], keyed by name.
///
/// Policies keep one as the reference point of the distance-to-initialization
/// regularizer.
pub struct NamedTensors {
    /// Parameter values.
    pub named_tensors: HashMap<String, Tensor>,
}

impl NamedTensors {
    /// Copies the parameters of `vs`, on the device of `vs`.
    pub fn copy_from(vs: &VarStore) -> Self {
        let src = vs.variables();

        tch::no_grad(|| NamedTensors {
            named_tensors: HashMap::from_iter(
                src.iter().map(|(k, v)| (k.clone(), v.detach().copy())),
            ),
        })
    }

    /// Writes the snapshot back into `vs`.
    pub fn copy_to(&self, vs: &mut VarStore) -> Result<()> {
        let mut dest = vs.variables();

        tch::no_grad(|| -> Result<()> {
            for (name, src) in self.named_tensors.iter() {
                let dest = dest
                    .get_mut(name)
                    .ok_or_else(|| PpoError::UnsupportedPolicy(format!("no parameter {}", name)))?;
                dest.copy_(src);
            }
            Ok(())
        })
    }

    /// Sum over trainable parameters of the squared distance to the snapshot.
    ///
    /// Parameters missing from the snapshot do not contribute.
    pub fn sq_distance(&self, vs: &VarStore) -> Tensor {
        let device = vs.device();
        vs.variables()
            .iter()
            .filter(|(_, v)| v.requires_grad())
            .filter_map(|(k, v)| {
                self.named_tensors
                    .get(k)
                    .map(|v0| (v - v0).square().sum(Kind::Float))
            })
            .fold(Tensor::from(0f32).to_device(device), |acc, d| acc + d)
    }
}

impl Clone for NamedTensors {
    fn clone(&self) -> Self {
        tch::no_grad(|| NamedTensors {
            named_tensors: HashMap::from_iter(
                self.named_tensors
                    .iter()
                    .map(|(k, v)| (k.clone(), v.detach().copy())),
            ),
        })
    }
}
