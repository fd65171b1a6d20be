//! Distributed training context.
//!
//! The update core never queries global state to find out whether it runs inside a
//! multi-process job. Callers thread a [`DistContext`] through instead. Two
//! implementations are provided:
//!
//! * [`SingleProcess`], the inactive context of a plain single-process run.
//! * [`ThreadGroup`], an in-process group whose members live on separate threads and
//!   reduce through shared memory. It behaves like a collective backend, including the
//!   requirement that every member performs the same reductions in the same order.
use crate::error::PpoError;
use anyhow::Result;
use std::sync::{Arc, Barrier, Mutex};

/// Collective operations and topology of a training job.
pub trait DistContext {
    /// Returns `true` when collective reductions span more than the local process.
    fn is_active(&self) -> bool;

    /// Rank of this process.
    fn rank(&self) -> usize;

    /// Number of participating processes.
    fn world_size(&self) -> usize;

    /// Replaces `buf` with the elementwise sum of `buf` over all processes.
    ///
    /// This is a blocking collective: all processes must call it with buffers of the
    /// same length, the same number of times, in the same order.
    fn all_reduce_sum(&self, buf: &mut [f64]) -> Result<()>;

    /// Returns `true` for the designated primary process.
    fn is_master(&self) -> bool {
        self.rank() == 0
    }
}

/// Topology summary of a [`DistContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistInfo {
    /// Whether this process is the primary one.
    pub is_master: bool,

    /// Number of processes.
    pub world_size: usize,

    /// Rank of this process.
    pub rank: usize,
}

impl DistInfo {
    /// Reads the topology from a context; an inactive context is a world of one.
    pub fn from_context(ctx: &dyn DistContext) -> Self {
        match ctx.is_active() {
            true => Self {
                is_master: ctx.is_master(),
                world_size: ctx.world_size(),
                rank: ctx.rank(),
            },
            false => Self {
                is_master: true,
                world_size: 1,
                rank: 0,
            },
        }
    }
}

/// Context of a run without any other process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl DistContext for SingleProcess {
    fn is_active(&self) -> bool {
        false
    }

    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn all_reduce_sum(&self, _buf: &mut [f64]) -> Result<()> {
        Ok(())
    }
}

struct Shared {
    barrier: Barrier,
    slots: Mutex<Vec<Vec<f64>>>,
}

/// Builder of an in-process group of [`ThreadGroupMember`]s.
pub struct ThreadGroup;

impl ThreadGroup {
    /// Creates `world_size` members, one per rank.
    ///
    /// Each member is meant to be moved to its own thread.
    pub fn new(world_size: usize) -> Vec<ThreadGroupMember> {
        let shared = Arc::new(Shared {
            barrier: Barrier::new(world_size),
            slots: Mutex::new(vec![vec![]; world_size]),
        });
        (0..world_size)
            .map(|rank| ThreadGroupMember {
                rank,
                world_size,
                shared: shared.clone(),
            })
            .collect()
    }
}

/// One rank of a [`ThreadGroup`].
pub struct ThreadGroupMember {
    rank: usize,
    world_size: usize,
    shared: Arc<Shared>,
}

impl DistContext for ThreadGroupMember {
    fn is_active(&self) -> bool {
        true
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    /// Sums in rank order, so every member gets bit-identical results.
    fn all_reduce_sum(&self, buf: &mut [f64]) -> Result<()> {
        // Every member reaches both barriers, errors are only raised afterwards
        let written = match self.shared.slots.lock() {
            Ok(mut slots) => {
                slots[self.rank] = buf.to_vec();
                Ok(())
            }
            Err(e) => Err(PpoError::Reduction(e.to_string())),
        };
        self.shared.barrier.wait();

        let result = match self.shared.slots.lock() {
            Ok(slots) => sum_slots(&slots, self.rank, buf.len()),
            Err(e) => Err(PpoError::Reduction(e.to_string())),
        };

        // Slots must stay untouched until every member has read them
        self.shared.barrier.wait();
        written?;
        buf.copy_from_slice(&result?);
        Ok(())
    }
}

fn sum_slots(slots: &[Vec<f64>], rank: usize, len: usize) -> Result<Vec<f64>, PpoError> {
    let mut acc = vec![0f64; len];
    for (r, slot) in slots.iter().enumerate() {
        if slot.len() != len {
            return Err(PpoError::Reduction(format!(
                "rank {} contributed {} values, rank {} expected {}",
                r,
                slot.len(),
                rank,
                len
            )));
        }
        for (a, v) in acc.iter_mut().zip(slot.iter()) {
            *a += *v;
        }
    }
    Ok(acc)
}
