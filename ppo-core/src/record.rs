//! Types for reporting training metrics.
//!
//! Every metric leaving the update core (averaged losses, gradient statistics,
//! explained variance, accumulated rollout statistics) is handed to the caller as a
//! [`Record`], a key-value container whose values are [`RecordValue`]s.
//! Writing records to an experiment tracker is the caller's business.
//!
//! ```rust
//! use ppo_core::record::{Record, RecordValue};
//!
//! let mut record = Record::from_scalar("losses/policy_loss", 0.25);
//! record.insert("losses/entropy", RecordValue::Scalar(1.3));
//! record.insert("env/episode_returns", RecordValue::Array1(vec![1.0, 2.0]));
//!
//! assert_eq!(record.get_scalar("losses/policy_loss").unwrap(), 0.25);
//! ```
mod base;

pub use base::{Record, RecordValue};
