//! Parallel map errors.

/// Why a parallel map failed as a whole.
///
/// Only the first failure observed (in completion order) is reported. When
/// several tasks fail close together the rest are logged at `debug` and
/// dropped; which one wins in that case is not deterministic.
#[derive(Debug, thiserror::Error)]
pub enum ParallelMapError<E> {
  /// The transform returned an error for the element at `index`.
  #[error("task {index} failed: {source}")]
  Task {
    index: usize,
    #[source]
    source: E,
  },

  /// The transform panicked for the element at `index`.
  #[error("task {index} panicked: {message}")]
  Panicked { index: usize, message: String },

  /// The caller's cancellation token fired before every task finished.
  #[error("parallel map cancelled")]
  Cancelled,

  /// A task could not be joined.
  #[error("task join error: {message}")]
  Join { message: String },
}

impl<E> ParallelMapError<E> {
  /// Input index of the failing task, when the failure came from one.
  pub fn index(&self) -> Option<usize> {
    match self {
      ParallelMapError::Task { index, .. } | ParallelMapError::Panicked { index, .. } => {
        Some(*index)
      }
      ParallelMapError::Cancelled | ParallelMapError::Join { .. } => None,
    }
  }

  /// The transform's own error, if that is what failed the map.
  pub fn into_source(self) -> Option<E> {
    match self {
      ParallelMapError::Task { source, .. } => Some(source),
      _ => None,
    }
  }
}

/// How a single task ended, short of success.
#[derive(Debug)]
pub(crate) enum TaskFailure<E> {
  Transform(E),
  Panicked(String),
  Cancelled,
}

impl<E> TaskFailure<E> {
  pub(crate) fn into_map_error(self, index: usize) -> ParallelMapError<E> {
    match self {
      TaskFailure::Transform(source) => ParallelMapError::Task { index, source },
      TaskFailure::Panicked(message) => ParallelMapError::Panicked { index, message },
      TaskFailure::Cancelled => ParallelMapError::Cancelled,
    }
  }
}
