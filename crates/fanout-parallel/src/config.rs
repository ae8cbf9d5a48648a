//! Parallel map configuration.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

/// Configuration for a [`ParallelMap`](crate::ParallelMap).
///
/// The default launches one concurrent task per input element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParallelConfig {
  /// Upper bound on transforms running at once. `None` means unbounded.
  ///
  /// Tasks waiting for a slot stay `Pending` and can still be cancelled.
  #[serde(default)]
  pub max_concurrency: Option<NonZeroUsize>,
}

impl ParallelConfig {
  /// One concurrent task per element.
  pub fn unbounded() -> Self {
    Self::default()
  }

  /// At most `limit` transforms in flight.
  pub fn bounded(limit: NonZeroUsize) -> Self {
    Self {
      max_concurrency: Some(limit),
    }
  }
}
