//! A single unit of work inside a parallel map.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use fanout_outcome::{Outcome, fold_raised};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

use crate::error::TaskFailure;
use crate::events::{TaskEvent, TaskNotifier};

/// Lifecycle of a task.
///
/// `Pending -> Running -> {Completed | Failed | Cancelled}`. A `Pending` task
/// may also go straight to `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
  Pending,
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl TaskState {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      TaskState::Completed | TaskState::Failed | TaskState::Cancelled
    )
  }

  fn can_become(self, next: TaskState) -> bool {
    match (self, next) {
      (TaskState::Pending, TaskState::Running) => true,
      (TaskState::Pending, TaskState::Cancelled) => true,
      (TaskState::Running, next) => next.is_terminal(),
      _ => false,
    }
  }
}

/// Handed to a transform alongside its input.
///
/// Cancellation is cooperative: a task is interrupted at its next `.await`.
/// A transform that computes without yielding runs to completion even after
/// a sibling fails; long synchronous work can check
/// [`is_cancelled`](Self::is_cancelled) to stop early.
#[derive(Debug, Clone)]
pub struct TaskContext {
  index: usize,
  cancel: CancellationToken,
}

impl TaskContext {
  /// Position of this task's element in the input.
  pub fn index(&self) -> usize {
    self.index
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  /// Resolves once the map has been cancelled.
  pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
    self.cancel.cancelled()
  }
}

/// Per-invocation table of task states.
#[derive(Debug)]
pub(crate) struct TaskTable {
  states: Mutex<Vec<TaskState>>,
}

impl TaskTable {
  pub(crate) fn new(len: usize) -> Self {
    Self {
      states: Mutex::new(vec![TaskState::Pending; len]),
    }
  }

  /// Move task `index` to `next`. Returns `false` if the move is not legal
  /// from the current state (e.g. the task is already terminal).
  pub(crate) fn transition(&self, index: usize, next: TaskState) -> bool {
    let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
    match states.get_mut(index) {
      Some(state) if state.can_become(next) => {
        *state = next;
        true
      }
      _ => false,
    }
  }

  /// Cancel every task that is not yet terminal, returning their indices.
  pub(crate) fn cancel_live(&self) -> Vec<usize> {
    let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
    states
      .iter_mut()
      .enumerate()
      .filter(|(_, state)| !state.is_terminal())
      .map(|(index, state)| {
        *state = TaskState::Cancelled;
        index
      })
      .collect()
  }

  #[cfg(test)]
  pub(crate) fn snapshot(&self) -> Vec<TaskState> {
    self.states.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }
}

/// Everything a spawned task shares with its invocation.
pub(crate) struct TaskShared<N> {
  pub(crate) execution_id: String,
  pub(crate) cancel: CancellationToken,
  pub(crate) table: TaskTable,
  pub(crate) semaphore: Option<Arc<Semaphore>>,
  pub(crate) notifier: Arc<N>,
}

impl<N: TaskNotifier> TaskShared<N> {
  /// Record a terminal state and emit the matching event, once.
  pub(crate) fn finish(&self, index: usize, state: TaskState, error: Option<String>) {
    if !self.table.transition(index, state) {
      return;
    }
    let execution_id = self.execution_id.clone();
    let event = match state {
      TaskState::Completed => TaskEvent::TaskCompleted {
        execution_id,
        index,
      },
      TaskState::Failed => TaskEvent::TaskFailed {
        execution_id,
        index,
        error: error.unwrap_or_default(),
      },
      _ => TaskEvent::TaskCancelled {
        execution_id,
        index,
      },
    };
    self.notifier.notify(event);
  }

  /// Mark every task that is not yet terminal as cancelled and emit its
  /// event. Covers tasks aborted before their first poll.
  pub(crate) fn cancel_remaining(&self) {
    for index in self.table.cancel_live() {
      self.notifier.notify(TaskEvent::TaskCancelled {
        execution_id: self.execution_id.clone(),
        index,
      });
    }
  }
}

/// Held by an invocation for as long as it runs.
///
/// If the caller drops the call before it finishes, the join set aborts the
/// tasks but work stuck off an `.await` keeps going; dropping this records
/// the remaining tasks as cancelled and trips the token they poll.
pub(crate) struct InvocationGuard<N: TaskNotifier> {
  pub(crate) shared: Arc<TaskShared<N>>,
}

impl<N: TaskNotifier> Drop for InvocationGuard<N> {
  fn drop(&mut self) {
    self.shared.cancel_remaining();
    self.shared.cancel.cancel();
  }
}

/// Marks its task cancelled if dropped before the task finished, which is
/// what happens when the join set aborts it mid-flight.
struct TaskGuard<N: TaskNotifier> {
  index: usize,
  shared: Arc<TaskShared<N>>,
}

impl<N: TaskNotifier> Drop for TaskGuard<N> {
  fn drop(&mut self) {
    self.shared.finish(self.index, TaskState::Cancelled, None);
  }
}

/// Run one element through the transform.
///
/// Returns the element's index with its outcome. Panics inside the transform
/// are caught and reported as a failure of this task.
pub(crate) async fn run_task<In, Out, E, F, Fut, N>(
  index: usize,
  item: In,
  transform: Arc<F>,
  shared: Arc<TaskShared<N>>,
) -> (usize, Outcome<Out, TaskFailure<E>>)
where
  E: std::fmt::Display,
  F: Fn(In, TaskContext) -> Fut,
  Fut: Future<Output = Result<Out, E>>,
  N: TaskNotifier,
{
  let guard = TaskGuard {
    index,
    shared: shared.clone(),
  };

  let _permit = match &shared.semaphore {
    Some(semaphore) => tokio::select! {
      biased;
      _ = shared.cancel.cancelled() => return (index, Outcome::Failure(TaskFailure::Cancelled)),
      permit = semaphore.clone().acquire_owned() => match permit {
        Ok(permit) => Some(permit),
        Err(_) => return (index, Outcome::Failure(TaskFailure::Cancelled)),
      },
    },
    None => None,
  };

  if shared.cancel.is_cancelled() || !shared.table.transition(index, TaskState::Running) {
    return (index, Outcome::Failure(TaskFailure::Cancelled));
  }

  debug!(execution_id = %shared.execution_id, index, "task_started");
  shared.notifier.notify(TaskEvent::TaskStarted {
    execution_id: shared.execution_id.clone(),
    index,
  });

  let ctx = TaskContext {
    index,
    cancel: shared.cancel.clone(),
  };
  let work = AssertUnwindSafe(async move { transform(item, ctx).await }).catch_unwind();

  let outcome = tokio::select! {
    biased;
    _ = shared.cancel.cancelled() => Outcome::Failure(TaskFailure::Cancelled),
    caught = work => match caught {
      Ok(Ok(value)) => Outcome::Success(value),
      Ok(Err(e)) => Outcome::Failure(TaskFailure::Transform(e)),
      Err(payload) => Outcome::Failure(TaskFailure::Panicked(fold_raised(
        payload,
        |message| message,
        |never| match never {},
      ))),
    },
  };

  match &outcome {
    Outcome::Success(_) => {
      debug!(execution_id = %shared.execution_id, index, "task_completed");
      shared.finish(index, TaskState::Completed, None);
    }
    Outcome::Failure(TaskFailure::Transform(e)) => {
      shared.finish(index, TaskState::Failed, Some(e.to_string()));
    }
    Outcome::Failure(TaskFailure::Panicked(message)) => {
      shared.finish(index, TaskState::Failed, Some(format!("panicked: {}", message)));
    }
    Outcome::Failure(TaskFailure::Cancelled) => {
      debug!(execution_id = %shared.execution_id, index, "task_cancelled");
      shared.finish(index, TaskState::Cancelled, None);
    }
  }

  drop(guard);
  (index, outcome)
}
