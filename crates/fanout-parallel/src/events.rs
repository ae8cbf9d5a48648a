//! Task lifecycle events and notifiers.
//!
//! Events are emitted while a parallel map runs so callers can observe
//! progress, or check that every task reached a terminal state. Each task
//! emits exactly one of `TaskCompleted`, `TaskFailed` or `TaskCancelled`.
//! An empty input emits nothing.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted during a parallel map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskEvent {
  /// Tasks are about to be spawned.
  MapStarted { execution_id: String, tasks: usize },

  /// A task entered `Running` and is calling the transform.
  TaskStarted { execution_id: String, index: usize },

  /// A task's transform returned a value.
  TaskCompleted { execution_id: String, index: usize },

  /// A task's transform returned an error or panicked.
  TaskFailed {
    execution_id: String,
    index: usize,
    error: String,
  },

  /// A task was cancelled before its transform finished.
  TaskCancelled { execution_id: String, index: usize },

  /// Every task completed and the ordered results were returned.
  MapCompleted { execution_id: String },

  /// The map failed; every task is terminal by the time this is sent.
  MapFailed { execution_id: String, error: String },
}

impl TaskEvent {
  /// Input index, for per-task events.
  pub fn index(&self) -> Option<usize> {
    match self {
      TaskEvent::TaskStarted { index, .. }
      | TaskEvent::TaskCompleted { index, .. }
      | TaskEvent::TaskFailed { index, .. }
      | TaskEvent::TaskCancelled { index, .. } => Some(*index),
      _ => None,
    }
  }

  /// Whether this event ends a task's lifecycle.
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      TaskEvent::TaskCompleted { .. }
        | TaskEvent::TaskFailed { .. }
        | TaskEvent::TaskCancelled { .. }
    )
  }
}

/// Receives task lifecycle events.
///
/// Called from inside spawned tasks, so implementations must be cheap and
/// must not block.
pub trait TaskNotifier: Send + Sync + 'static {
  fn notify(&self, event: TaskEvent);
}

/// A notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl TaskNotifier for NoopNotifier {
  fn notify(&self, _event: TaskEvent) {}
}

/// A notifier that forwards events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never stalls a task; volume is a handful of
  // events per element.
  sender: mpsc::UnboundedSender<TaskEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<TaskEvent>) -> Self {
    Self { sender }
  }

  /// Create a notifier together with its receiving end.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self::new(sender), receiver)
  }
}

impl TaskNotifier for ChannelNotifier {
  fn notify(&self, event: TaskEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
