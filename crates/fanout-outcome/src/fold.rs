//! Presence and predicate folds.
//!
//! Each fold inspects its value once and hands it to exactly one
//! continuation. The folds never fail on their own; a continuation that
//! returns an error or panics does so to the fold's caller unchanged.

use crate::error::AbsentError;

/// Route an optional value to `on_present`, or to `on_absent` with a
/// synthesized [`AbsentError`].
///
/// ```
/// use fanout_outcome::fold_presence;
///
/// let shout = fold_presence(Some("hello"), |_| String::new(), |s| s.to_uppercase());
/// assert_eq!(shout, "HELLO");
/// ```
pub fn fold_presence<T, R>(
  value: Option<T>,
  on_absent: impl FnOnce(AbsentError) -> R,
  on_present: impl FnOnce(T) -> R,
) -> R {
  match value {
    Some(value) => on_present(value),
    None => on_absent(AbsentError),
  }
}

/// Return the present value unchanged, or whatever `on_absent` produces.
pub fn unwrap_or_else<T>(value: Option<T>, on_absent: impl FnOnce(AbsentError) -> T) -> T {
  fold_presence(value, on_absent, |value| value)
}

/// Return the present value, or propagate the absence as an [`AbsentError`].
///
/// This is [`unwrap_or_else`] with its default continuation: the absence is
/// re-raised to the caller rather than replaced by a fallback.
pub fn require<T>(value: Option<T>) -> Result<T, AbsentError> {
  fold_presence(value, Err, Ok)
}

/// Run `block` only when the value is present.
pub fn exists<T, R>(value: Option<T>, block: impl FnOnce(T) -> R) -> Option<R> {
  fold_presence(value, |_| None, |value| Some(block(value)))
}

/// Evaluate `predicate` once and route to `on_true` or `on_false`.
pub fn fold_predicate<T, R>(
  value: T,
  predicate: impl FnOnce(&T) -> bool,
  on_false: impl FnOnce(T) -> R,
  on_true: impl FnOnce(T) -> R,
) -> R {
  if predicate(&value) {
    on_true(value)
  } else {
    on_false(value)
  }
}

/// [`fold_predicate`] whose false branch returns the value unchanged.
pub fn map_if<T>(value: T, predicate: impl FnOnce(&T) -> bool, on_true: impl FnOnce(T) -> T) -> T {
  fold_predicate(value, predicate, |value| value, on_true)
}

/// [`fold_predicate`] whose true branch returns the value unchanged.
pub fn map_unless<T>(
  value: T,
  predicate: impl FnOnce(&T) -> bool,
  on_false: impl FnOnce(T) -> T,
) -> T {
  fold_predicate(value, predicate, on_false, |value| value)
}

#[cfg(test)]
mod tests {
  use std::cell::Cell;

  use super::*;
  use crate::error::ABSENT_MESSAGE;

  #[test]
  fn test_fold_presence_present_runs_only_present_branch() {
    let absent_calls = Cell::new(0);
    let present_calls = Cell::new(0);

    let result = fold_presence(
      Some("hello"),
      |_| {
        absent_calls.set(absent_calls.get() + 1);
        "none".to_string()
      },
      |s| {
        present_calls.set(present_calls.get() + 1);
        s.to_uppercase()
      },
    );

    assert_eq!(result, "HELLO");
    assert_eq!(present_calls.get(), 1);
    assert_eq!(absent_calls.get(), 0);
  }

  #[test]
  fn test_fold_presence_absent_passes_absent_error() {
    let present_calls = Cell::new(0);
    let mut seen = String::new();

    let result = fold_presence(
      None::<&str>,
      |e| {
        seen = e.to_string();
        "handled".to_string()
      },
      |s| {
        present_calls.set(present_calls.get() + 1);
        s.to_string()
      },
    );

    assert_eq!(result, "handled");
    assert_eq!(seen, ABSENT_MESSAGE);
    assert_eq!(present_calls.get(), 0);
  }

  #[test]
  fn test_fold_presence_is_repeatable() {
    let first = fold_presence(Some(21), |_| 0, |v| v * 2);
    let second = fold_presence(Some(21), |_| 0, |v| v * 2);
    assert_eq!(first, second);
  }

  #[test]
  fn test_unwrap_or_else() {
    assert_eq!(unwrap_or_else(Some(3), |_| 0), 3);
    assert_eq!(unwrap_or_else(None, |_| 0), 0);
  }

  #[test]
  fn test_require_propagates_absence() {
    assert_eq!(require(Some("orElse")), Ok("orElse"));

    let err = require(None::<u8>).unwrap_err();
    assert_eq!(err, AbsentError);
    assert_eq!(err.to_string(), "fold source was absent");
  }

  #[test]
  fn test_exists() {
    assert_eq!(
      exists(Some("world"), |s| s.chars().rev().collect::<String>()).as_deref(),
      Some("dlrow")
    );
    assert_eq!(exists(None::<&str>, |s| s.len()), None);
  }

  #[test]
  fn test_fold_predicate_picks_branch() {
    assert_eq!(fold_predicate(42, |v| *v > 0, |_| -1, |_| 100), 100);
    assert_eq!(fold_predicate(42, |v| *v < 0, |_| -1, |_| 100), -1);
  }

  #[test]
  fn test_map_if_defaults_to_identity() {
    assert_eq!(map_if(7, |v| v % 2 == 1, |v| v * 2), 14);
    assert_eq!(map_if(99, |_| false, |v| v * 2), 99);
  }

  #[test]
  fn test_map_unless_defaults_to_identity() {
    assert_eq!(map_unless(8, |v| v % 2 == 1, |v| v / 2), 4);
    assert_eq!(map_unless(7, |v| v % 2 == 1, |v| v / 2), 7);
  }
}
