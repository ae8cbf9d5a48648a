//! Fold error types.

/// Diagnostic carried by every [`AbsentError`].
pub const ABSENT_MESSAGE: &str = "fold source was absent";

/// A value that was expected to exist did not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, thiserror::Error)]
#[error("{}", ABSENT_MESSAGE)]
pub struct AbsentError;

impl AbsentError {
  /// The fixed diagnostic message.
  pub fn message(&self) -> &'static str {
    ABSENT_MESSAGE
  }
}

/// Why a fold ended up on its failure branch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Cause<E> {
  /// The source value was absent.
  #[error(transparent)]
  Absent(#[from] AbsentError),

  /// The source value carried an error.
  #[error("{0}")]
  Raised(E),
}

impl<E> Cause<E> {
  /// Returns `true` if the cause is an absent value.
  pub fn is_absent(&self) -> bool {
    matches!(self, Cause::Absent(_))
  }

  /// The raised error, if this cause is not an absence.
  pub fn raised(self) -> Option<E> {
    match self {
      Cause::Absent(_) => None,
      Cause::Raised(e) => Some(e),
    }
  }
}
