//! Fanout Parallel
//!
//! A structured parallel map: run a transform over every element of a
//! finite input concurrently, get the results back in input order, or fail
//! as a whole with the first task failure.
//!
//! # Architecture
//!
//! ```text
//! ParallelMap
//! ├── run(input, transform)              - transform: In -> Future<Result<Out, E>>
//! └── run_with_context(input, transform) - transform also gets a TaskContext
//!         │
//!         ▼  one tokio task per element, held in a JoinSet
//!     run_task
//!     ├── Pending -> Running -> Completed | Failed | Cancelled
//!     └── TaskEvent -> TaskNotifier
//!         │
//!         ▼  first failure: cancel token + abort_all, then drain
//!     Result<Vec<Out>, ParallelMapError<E>>
//! ```
//!
//! # Usage
//!
//! ```
//! use fanout_parallel::parallel_map;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let doubled = parallel_map(vec![1, 2, 3, 4], |x| async move {
//!   Ok::<_, std::convert::Infallible>(x * 2)
//! })
//! .await
//! .unwrap();
//!
//! assert_eq!(doubled, vec![2, 4, 6, 8]);
//! # }
//! ```

mod config;
mod error;
mod events;
mod map;
mod task;

pub use config::ParallelConfig;
pub use error::ParallelMapError;
pub use events::{ChannelNotifier, NoopNotifier, TaskEvent, TaskNotifier};
pub use map::{ParallelMap, parallel_map};
pub use task::{TaskContext, TaskState};
