//! Fanout Outcome
//!
//! Folds that turn a value of uncertain shape into exactly one of two
//! continuations:
//!
//! - [`fold_presence`] / [`unwrap_or_else`] / [`require`] / [`exists`]: the
//!   value may be absent
//! - [`fold_predicate`] / [`map_if`] / [`map_unless`]: a predicate decides
//! - [`fold_raised`]: the value may carry an error (see [`Raised`])
//!
//! [`Outcome`] is the tagged result used to normalize "did this produce a
//! value or fail" into one type, with [`Cause`] separating absence from a
//! raised error.

mod error;
mod fold;
mod outcome;
mod raised;

pub use error::{ABSENT_MESSAGE, AbsentError, Cause};
pub use fold::{exists, fold_predicate, fold_presence, map_if, map_unless, require, unwrap_or_else};
pub use outcome::Outcome;
pub use raised::{Raised, fold_raised, panic_message};
