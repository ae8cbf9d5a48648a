//! Structured parallel map.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use fanout_outcome::Outcome;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ParallelConfig;
use crate::error::{ParallelMapError, TaskFailure};
use crate::events::{NoopNotifier, TaskEvent, TaskNotifier};
use crate::task::{InvocationGuard, TaskContext, TaskShared, TaskTable, run_task};

/// Apply `transform` to every element concurrently and collect the results
/// in input order.
///
/// Fails with the first task failure, after every other task has been
/// cancelled and has stopped. See [`ParallelMap`] for the full contract.
pub async fn parallel_map<I, In, Out, E, F, Fut>(
  input: I,
  transform: F,
) -> Result<Vec<Out>, ParallelMapError<E>>
where
  I: IntoIterator<Item = In>,
  In: Send + 'static,
  Out: Send + 'static,
  E: Display + Send + 'static,
  F: Fn(In) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Out, E>> + Send + 'static,
{
  ParallelMap::new().run(input, transform).await
}

/// Fan-out / ordered fan-in over a finite input.
///
/// One tokio task is spawned per element (or fewer at a time, if
/// [`ParallelConfig::max_concurrency`] is set) and the call returns only
/// once all of them are terminal:
///
/// - On success the results are index-aligned with the input, whatever order
///   the tasks finished in.
/// - The first task to fail, in completion order, fails the whole map. All
///   other tasks are cancelled and awaited before the error is returned;
///   their own failures, if any, are dropped.
/// - An empty input returns an empty `Vec` without spawning anything.
///
/// Cancellation is cooperative. A task stops at its next `.await`; a
/// transform that blocks the thread without yielding cannot be interrupted,
/// and the map waits for it. If the caller drops the call instead, the map
/// cannot wait: remaining tasks are reported cancelled, their token is
/// tripped so [`TaskContext::is_cancelled`] turns true, and work that never
/// checks it runs on detached until it returns.
pub struct ParallelMap<N: TaskNotifier = NoopNotifier> {
  config: ParallelConfig,
  notifier: Arc<N>,
  parent: Option<CancellationToken>,
}

impl ParallelMap<NoopNotifier> {
  /// Create a parallel map with the default configuration and no event
  /// observation.
  pub fn new() -> Self {
    Self::with_config(ParallelConfig::default())
  }

  pub fn with_config(config: ParallelConfig) -> Self {
    Self {
      config,
      notifier: Arc::new(NoopNotifier),
      parent: None,
    }
  }
}

impl Default for ParallelMap<NoopNotifier> {
  fn default() -> Self {
    Self::new()
  }
}

impl<N: TaskNotifier> ParallelMap<N> {
  /// Replace the notifier that receives [`TaskEvent`]s.
  pub fn with_notifier<M: TaskNotifier>(self, notifier: M) -> ParallelMap<M> {
    ParallelMap {
      config: self.config,
      notifier: Arc::new(notifier),
      parent: self.parent,
    }
  }

  /// Cancel the map when `token` is cancelled.
  ///
  /// Each invocation works on a child token, so sibling-failure cancellation
  /// never propagates back to `token`.
  pub fn cancel_on(mut self, token: CancellationToken) -> Self {
    self.parent = Some(token);
    self
  }

  /// Run `transform` over `input`.
  pub async fn run<I, In, Out, E, F, Fut>(
    &self,
    input: I,
    transform: F,
  ) -> Result<Vec<Out>, ParallelMapError<E>>
  where
    I: IntoIterator<Item = In>,
    In: Send + 'static,
    Out: Send + 'static,
    E: Display + Send + 'static,
    F: Fn(In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Out, E>> + Send + 'static,
  {
    self
      .run_with_context(input, move |item, _ctx: TaskContext| transform(item))
      .await
  }

  /// Run `transform` over `input`, handing each call a [`TaskContext`].
  pub async fn run_with_context<I, In, Out, E, F, Fut>(
    &self,
    input: I,
    transform: F,
  ) -> Result<Vec<Out>, ParallelMapError<E>>
  where
    I: IntoIterator<Item = In>,
    In: Send + 'static,
    Out: Send + 'static,
    E: Display + Send + 'static,
    F: Fn(In, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Out, E>> + Send + 'static,
  {
    let items: Vec<In> = input.into_iter().collect();
    if items.is_empty() {
      debug!("parallel map over empty input");
      return Ok(Vec::new());
    }

    let execution_id = uuid::Uuid::new_v4().to_string();
    self.execute(execution_id, items, Arc::new(transform)).await
  }

  #[instrument(
    name = "parallel_map",
    skip_all,
    fields(
      execution_id = %execution_id,
      tasks = items.len(),
    )
  )]
  async fn execute<In, Out, E, F, Fut>(
    &self,
    execution_id: String,
    items: Vec<In>,
    transform: Arc<F>,
  ) -> Result<Vec<Out>, ParallelMapError<E>>
  where
    In: Send + 'static,
    Out: Send + 'static,
    E: Display + Send + 'static,
    F: Fn(In, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Out, E>> + Send + 'static,
  {
    let len = items.len();
    let cancel = match &self.parent {
      Some(parent) => parent.child_token(),
      None => CancellationToken::new(),
    };
    let shared = Arc::new(TaskShared {
      execution_id: execution_id.clone(),
      cancel: cancel.clone(),
      table: TaskTable::new(len),
      semaphore: self
        .config
        .max_concurrency
        .map(|limit| Arc::new(Semaphore::new(limit.get()))),
      notifier: self.notifier.clone(),
    });
    let _invocation = InvocationGuard {
      shared: shared.clone(),
    };

    info!(
      execution_id = %execution_id,
      tasks = len,
      max_concurrency = ?self.config.max_concurrency,
      "map_started"
    );
    self.notifier.notify(TaskEvent::MapStarted {
      execution_id: execution_id.clone(),
      tasks: len,
    });

    let mut set = JoinSet::new();
    for (index, item) in items.into_iter().enumerate() {
      set.spawn(run_task(index, item, transform.clone(), shared.clone()));
    }

    let mut results: Vec<Option<Out>> = (0..len).map(|_| None).collect();
    let mut failure: Option<ParallelMapError<E>> = None;

    while let Some(joined) = set.join_next().await {
      let (index, outcome) = match joined {
        Ok(done) => done,
        // Aborted after a sibling failed; the task guard has recorded it.
        Err(e) if e.is_cancelled() => continue,
        Err(e) => {
          let err = ParallelMapError::Join {
            message: e.to_string(),
          };
          Self::record_failure(&mut failure, err, &cancel, &mut set, &execution_id);
          continue;
        }
      };

      match outcome {
        Outcome::Success(value) => {
          if let Some(slot) = results.get_mut(index) {
            *slot = Some(value);
          }
        }
        Outcome::Failure(TaskFailure::Cancelled) if failure.is_some() => {}
        Outcome::Failure(task_failure) => {
          let err = task_failure.into_map_error(index);
          Self::record_failure(&mut failure, err, &cancel, &mut set, &execution_id);
        }
      }
    }

    // Tasks aborted before their first poll never ran their guard.
    shared.cancel_remaining();

    let result = match failure {
      Some(err) => Err(err),
      None => results
        .into_iter()
        .collect::<Option<Vec<Out>>>()
        .ok_or_else(|| ParallelMapError::Join {
          message: "a task finished without reporting a result".to_string(),
        }),
    };

    match &result {
      Ok(_) => {
        info!(execution_id = %execution_id, "map_completed");
        self.notifier.notify(TaskEvent::MapCompleted {
          execution_id: execution_id.clone(),
        });
      }
      Err(e) => {
        error!(execution_id = %execution_id, error = %e, "map_failed");
        self.notifier.notify(TaskEvent::MapFailed {
          execution_id: execution_id.clone(),
          error: e.to_string(),
        });
      }
    }

    result
  }

  /// Keep the first failure and cancel everything else; drop later ones.
  fn record_failure<E: Display, T: 'static>(
    failure: &mut Option<ParallelMapError<E>>,
    err: ParallelMapError<E>,
    cancel: &CancellationToken,
    set: &mut JoinSet<T>,
    execution_id: &str,
  ) {
    if failure.is_some() {
      debug!(execution_id = %execution_id, error = %err, "suppressed sibling failure");
      return;
    }

    match &err {
      ParallelMapError::Cancelled => {
        warn!(execution_id = %execution_id, "parallel map cancelled");
      }
      _ => {
        error!(
          execution_id = %execution_id,
          index = ?err.index(),
          error = %err,
          "task_failed"
        );
      }
    }

    cancel.cancel();
    set.abort_all();
    *failure = Some(err);
  }
}
