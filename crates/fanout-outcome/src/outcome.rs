//! The tagged result of a fold.

use serde::{Deserialize, Serialize};

use crate::error::{AbsentError, Cause};

/// Success-with-value or failure-with-cause.
///
/// Unlike [`Result`], an `Outcome` is meant to be produced once and then
/// folded; it carries no `?` integration of its own. Convert with
/// [`Outcome::into_result`] when propagating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome<T, E> {
  Success(T),
  Failure(E),
}

impl<T, E> Outcome<T, E> {
  /// Route to exactly one of the two continuations.
  pub fn fold<R>(self, on_failure: impl FnOnce(E) -> R, on_success: impl FnOnce(T) -> R) -> R {
    match self {
      Outcome::Success(value) => on_success(value),
      Outcome::Failure(cause) => on_failure(cause),
    }
  }

  pub fn is_success(&self) -> bool {
    matches!(self, Outcome::Success(_))
  }

  pub fn is_failure(&self) -> bool {
    matches!(self, Outcome::Failure(_))
  }

  pub fn into_result(self) -> Result<T, E> {
    match self {
      Outcome::Success(value) => Ok(value),
      Outcome::Failure(cause) => Err(cause),
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U, E> {
    match self {
      Outcome::Success(value) => Outcome::Success(f(value)),
      Outcome::Failure(cause) => Outcome::Failure(cause),
    }
  }

  pub fn map_failure<F>(self, f: impl FnOnce(E) -> F) -> Outcome<T, F> {
    match self {
      Outcome::Success(value) => Outcome::Success(value),
      Outcome::Failure(cause) => Outcome::Failure(f(cause)),
    }
  }

  /// Borrow the success value, if any.
  pub fn success(&self) -> Option<&T> {
    match self {
      Outcome::Success(value) => Some(value),
      Outcome::Failure(_) => None,
    }
  }
}

impl<T, E> Outcome<T, Cause<E>> {
  /// Normalize an optional value; absence becomes [`Cause::Absent`].
  pub fn from_option(value: Option<T>) -> Self {
    match value {
      Some(value) => Outcome::Success(value),
      None => Outcome::Failure(Cause::Absent(AbsentError)),
    }
  }

  /// Normalize a fallible value; the error becomes [`Cause::Raised`].
  pub fn from_result(value: Result<T, E>) -> Self {
    match value {
      Ok(value) => Outcome::Success(value),
      Err(e) => Outcome::Failure(Cause::Raised(e)),
    }
  }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
  fn from(value: Result<T, E>) -> Self {
    match value {
      Ok(value) => Outcome::Success(value),
      Err(e) => Outcome::Failure(e),
    }
  }
}

impl<T, E> From<Outcome<T, E>> for Result<T, E> {
  fn from(outcome: Outcome<T, E>) -> Self {
    outcome.into_result()
  }
}
