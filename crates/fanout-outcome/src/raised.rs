//! Folding over values that may themselves carry an error.

use std::any::Any;

use crate::outcome::Outcome;

/// A value whose channel can also carry a raised error.
pub trait Raised {
  type Ok;
  type Err;

  /// Split into the ok or error side. Called exactly once per fold.
  fn into_raised(self) -> Result<Self::Ok, Self::Err>;
}

impl<T, E> Raised for Result<T, E> {
  type Ok = T;
  type Err = E;

  fn into_raised(self) -> Result<T, E> {
    self
  }
}

impl<T, E> Raised for Outcome<T, E> {
  type Ok = T;
  type Err = E;

  fn into_raised(self) -> Result<T, E> {
    self.into_result()
  }
}

/// A panic payload, as returned by `catch_unwind` or a panicked join.
///
/// Always raised; the error side is the readable panic message.
impl Raised for Box<dyn Any + Send> {
  type Ok = std::convert::Infallible;
  type Err = String;

  fn into_raised(self) -> Result<Self::Ok, String> {
    Err(panic_message(self.as_ref()))
  }
}

/// Route to `on_error` if the value carries an error, `on_ok` otherwise.
pub fn fold_raised<V: Raised, R>(
  value: V,
  on_error: impl FnOnce(V::Err) -> R,
  on_ok: impl FnOnce(V::Ok) -> R,
) -> R {
  match value.into_raised() {
    Ok(value) => on_ok(value),
    Err(e) => on_error(e),
  }
}

/// Extract the message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&'static str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "panic payload is not a string".to_string()
  }
}
