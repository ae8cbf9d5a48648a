//! Integration tests for the structured parallel map.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use fanout_parallel::{
  ChannelNotifier, ParallelConfig, ParallelMap, ParallelMapError, TaskEvent, parallel_map,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

#[derive(Debug, PartialEq, thiserror::Error)]
#[error("rejected {0}")]
struct Rejected(i32);

/// Everything sent before the map returned.
fn drain(receiver: &mut UnboundedReceiver<TaskEvent>) -> Vec<TaskEvent> {
  let mut events = Vec::new();
  while let Ok(event) = receiver.try_recv() {
    events.push(event);
  }
  events
}

/// Count terminal events per task index.
fn terminal_counts(events: &[TaskEvent]) -> HashMap<usize, usize> {
  let mut counts = HashMap::new();
  for event in events.iter().filter(|e| e.is_terminal()) {
    if let Some(index) = event.index() {
      *counts.entry(index).or_insert(0) += 1;
    }
  }
  counts
}

fn assert_all_terminal_once(events: &[TaskEvent], tasks: usize) {
  let counts = terminal_counts(events);
  assert_eq!(counts.len(), tasks, "events: {:?}", events);
  assert!(counts.values().all(|&n| n == 1), "events: {:?}", events);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_results_follow_input_order_not_completion_order() {
  let input = vec![1, 2, 3, 4];

  let result = parallel_map(input, |x| async move {
    // Later elements finish first
    tokio::time::sleep(Duration::from_millis(40 - x as u64 * 10)).await;
    Ok::<_, Rejected>(x * 2)
  })
  .await
  .unwrap();

  assert_eq!(result, vec![2, 4, 6, 8]);
}

#[tokio::test]
async fn test_lazy_iterator_input() {
  let result = parallel_map((5..=7).map(|x| x as i64), |x| async move {
    tokio::time::sleep(Duration::from_millis(5)).await;
    Ok::<_, Rejected>(x + 1)
  })
  .await
  .unwrap();

  assert_eq!(result, vec![6, 7, 8]);
}

#[tokio::test]
async fn test_empty_input_emits_nothing() {
  let (notifier, mut receiver) = ChannelNotifier::channel();
  let calls = Arc::new(AtomicUsize::new(0));
  let counter = calls.clone();

  let result = ParallelMap::new()
    .with_notifier(notifier)
    .run(Vec::<i32>::new(), move |x| {
      counter.fetch_add(1, Ordering::SeqCst);
      async move { Ok::<_, Rejected>(x) }
    })
    .await
    .unwrap();

  assert!(result.is_empty());
  assert_eq!(calls.load(Ordering::SeqCst), 0);
  assert!(drain(&mut receiver).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_failure_cancels_siblings() {
  let (notifier, mut receiver) = ChannelNotifier::channel();
  let started = Instant::now();

  let err = ParallelMap::new()
    .with_notifier(notifier)
    .run(vec![5, 6, 7], |x| async move {
      match x {
        6 => {
          tokio::time::sleep(Duration::from_millis(20)).await;
          Err(Rejected(x))
        }
        7 => {
          tokio::time::sleep(Duration::from_secs(30)).await;
          Ok(x)
        }
        _ => Ok(x),
      }
    })
    .await
    .unwrap_err();

  assert!(started.elapsed() < Duration::from_secs(10));
  assert_eq!(err.index(), Some(1));
  assert_eq!(err.into_source(), Some(Rejected(6)));

  let events = drain(&mut receiver);
  assert_all_terminal_once(&events, 3);
  assert!(events.contains(&TaskEvent::TaskCancelled {
    execution_id: execution_id(&events),
    index: 2,
  }));
  assert!(matches!(events.last(), Some(TaskEvent::MapFailed { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_surface_exactly_one() {
  let (notifier, mut receiver) = ChannelNotifier::channel();

  let err = ParallelMap::new()
    .with_notifier(notifier)
    .run(0..8, |x| async move {
      tokio::time::sleep(Duration::from_millis(5)).await;
      Err::<i32, _>(Rejected(x))
    })
    .await
    .unwrap_err();

  // Which one wins is not specified
  let index = err.index().unwrap();
  assert!(index < 8);
  assert_eq!(err.into_source(), Some(Rejected(index as i32)));

  let events = drain(&mut receiver);
  assert_all_terminal_once(&events, 8);
  let map_failures = events
    .iter()
    .filter(|e| matches!(e, TaskEvent::MapFailed { .. }))
    .count();
  assert_eq!(map_failures, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_transform_fails_the_map() {
  let (notifier, mut receiver) = ChannelNotifier::channel();

  let err = ParallelMap::new()
    .with_notifier(notifier)
    .run(vec![1, 2, 3], |x| async move {
      if x == 2 {
        panic!("boom {}", x);
      }
      tokio::time::sleep(Duration::from_secs(30)).await;
      Ok::<_, Rejected>(x)
    })
    .await
    .unwrap_err();

  match err {
    ParallelMapError::Panicked { index, message } => {
      assert_eq!(index, 1);
      assert_eq!(message, "boom 2");
    }
    other => panic!("expected Panicked, got {:?}", other),
  }

  assert_all_terminal_once(&drain(&mut receiver), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_external_cancellation() {
  let (notifier, mut receiver) = ChannelNotifier::channel();
  let parent = CancellationToken::new();
  let trigger = parent.clone();

  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(20)).await;
    trigger.cancel();
  });

  let err = ParallelMap::new()
    .with_notifier(notifier)
    .cancel_on(parent)
    .run(vec![1, 2, 3], |x| async move {
      tokio::time::sleep(Duration::from_secs(30)).await;
      Ok::<_, Rejected>(x)
    })
    .await
    .unwrap_err();

  assert!(matches!(err, ParallelMapError::Cancelled));

  let events = drain(&mut receiver);
  assert_all_terminal_once(&events, 3);
  assert!(
    events
      .iter()
      .filter(|e| e.is_terminal())
      .all(|e| matches!(e, TaskEvent::TaskCancelled { .. }))
  );
}

#[tokio::test]
async fn test_sibling_failure_does_not_cancel_parent() {
  let parent = CancellationToken::new();
  let map = ParallelMap::new().cancel_on(parent.clone());

  let err = map
    .run(vec![1, 2], |x| async move {
      if x == 1 { Err(Rejected(x)) } else { Ok(x) }
    })
    .await
    .unwrap_err();
  assert_eq!(err.index(), Some(0));
  assert!(!parent.is_cancelled());

  // The same map is reusable after a failure
  let ok = map
    .run(vec![3, 4], |x| async move { Ok::<_, Rejected>(x) })
    .await
    .unwrap();
  assert_eq!(ok, vec![3, 4]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bounded_concurrency_is_opt_in() {
  let running = Arc::new(AtomicUsize::new(0));
  let peak = Arc::new(AtomicUsize::new(0));
  let config = ParallelConfig::bounded(NonZeroUsize::new(2).unwrap());

  let result = {
    let running = running.clone();
    let peak = peak.clone();
    ParallelMap::with_config(config)
      .run(0..8, move |x| {
        let running = running.clone();
        let peak = peak.clone();
        async move {
          let now = running.fetch_add(1, Ordering::SeqCst) + 1;
          peak.fetch_max(now, Ordering::SeqCst);
          tokio::time::sleep(Duration::from_millis(10)).await;
          running.fetch_sub(1, Ordering::SeqCst);
          Ok::<_, Rejected>(x * 10)
        }
      })
      .await
      .unwrap()
  };

  assert_eq!(result, (0..8).map(|x| x * 10).collect::<Vec<_>>());
  assert!(peak.load(Ordering::SeqCst) <= 2);
  assert_eq!(running.load(Ordering::SeqCst), 0);
}

// Single-threaded so element 0 takes the only permit first
#[tokio::test]
async fn test_bounded_failure_cancels_waiting_tasks() {
  let (notifier, mut receiver) = ChannelNotifier::channel();
  let calls = Arc::new(AtomicUsize::new(0));
  let counter = calls.clone();

  let err = ParallelMap::with_config(ParallelConfig::bounded(NonZeroUsize::new(1).unwrap()))
    .with_notifier(notifier)
    .run(0..5, move |x| {
      counter.fetch_add(1, Ordering::SeqCst);
      async move {
        if x == 0 {
          return Err(Rejected(x));
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(x)
      }
    })
    .await
    .unwrap_err();

  assert!(matches!(err, ParallelMapError::Task { index: 0, .. }));
  // The failing task and at most the one that grabbed its permit
  assert!(calls.load(Ordering::SeqCst) <= 2);

  let events = drain(&mut receiver);
  assert_all_terminal_once(&events, 5);
  assert!(matches!(events.last(), Some(TaskEvent::MapFailed { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unbounded_runs_every_element_at_once() {
  let running = Arc::new(AtomicUsize::new(0));
  let peak = Arc::new(AtomicUsize::new(0));

  let run_counter = running.clone();
  let peak_counter = peak.clone();
  parallel_map(0..6, move |x| {
    let running = run_counter.clone();
    let peak = peak_counter.clone();
    async move {
      let now = running.fetch_add(1, Ordering::SeqCst) + 1;
      peak.fetch_max(now, Ordering::SeqCst);
      tokio::time::sleep(Duration::from_millis(50)).await;
      running.fetch_sub(1, Ordering::SeqCst);
      Ok::<_, Rejected>(x)
    }
  })
  .await
  .unwrap();

  assert_eq!(peak.load(Ordering::SeqCst), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_transform_is_awaited_not_interrupted() {
  let (notifier, mut receiver) = ChannelNotifier::channel();
  let started = Instant::now();

  let err = ParallelMap::new()
    .with_notifier(notifier)
    .run(vec![0, 1], |x| async move {
      if x == 0 {
        // Never yields, so cancellation cannot reach it
        std::thread::sleep(Duration::from_millis(200));
        Ok(x)
      } else {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Err(Rejected(x))
      }
    })
    .await
    .unwrap_err();

  assert_eq!(err.index(), Some(1));
  assert!(started.elapsed() >= Duration::from_millis(200));

  let events = drain(&mut receiver);
  assert_all_terminal_once(&events, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_context_lets_blocking_work_stop_early() {
  let observed = Arc::new(AtomicUsize::new(0));
  let counter = observed.clone();
  let started = Instant::now();

  let err = ParallelMap::new()
    .run_with_context(vec![0, 1], move |x, ctx| {
      let counter = counter.clone();
      async move {
        if ctx.index() == 1 {
          tokio::time::sleep(Duration::from_millis(20)).await;
          return Err(Rejected(x));
        }
        // Synchronous loop that polls the flag instead of yielding
        let deadline = Instant::now() + Duration::from_secs(10);
        while !ctx.is_cancelled() && Instant::now() < deadline {
          std::thread::sleep(Duration::from_millis(1));
        }
        if ctx.is_cancelled() {
          counter.fetch_add(1, Ordering::SeqCst);
        }
        Ok(x)
      }
    })
    .await
    .unwrap_err();

  assert_eq!(err.index(), Some(1));
  assert_eq!(observed.load(Ordering::SeqCst), 1);
  assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_call_cancels_its_tasks() {
  let (notifier, mut receiver) = ChannelNotifier::channel();
  let saw_cancel = Arc::new(AtomicBool::new(false));
  let exited = Arc::new(AtomicBool::new(false));

  let map = ParallelMap::new().with_notifier(notifier);
  let call = {
    let saw_cancel = saw_cancel.clone();
    let exited = exited.clone();
    map.run_with_context(vec![0], move |x, ctx| {
      let saw_cancel = saw_cancel.clone();
      let exited = exited.clone();
      async move {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !ctx.is_cancelled() && Instant::now() < deadline {
          std::thread::sleep(Duration::from_millis(5));
        }
        saw_cancel.store(ctx.is_cancelled(), Ordering::SeqCst);
        exited.store(true, Ordering::SeqCst);
        Ok::<_, Rejected>(x)
      }
    })
  };

  let timed_out = tokio::time::timeout(Duration::from_millis(50), call).await;
  assert!(timed_out.is_err());

  let waited = Instant::now();
  while !exited.load(Ordering::SeqCst) && waited.elapsed() < Duration::from_secs(10) {
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  assert!(saw_cancel.load(Ordering::SeqCst));
  assert!(waited.elapsed() < Duration::from_secs(2));

  // Give the finished task a moment to unwind
  tokio::time::sleep(Duration::from_millis(20)).await;
  let events = drain(&mut receiver);
  assert_all_terminal_once(&events, 1);
  assert!(events.contains(&TaskEvent::TaskCancelled {
    execution_id: execution_id(&events),
    index: 0,
  }));
}

fn execution_id(events: &[TaskEvent]) -> String {
  events
    .iter()
    .find_map(|e| match e {
      TaskEvent::MapStarted { execution_id, .. } => Some(execution_id.clone()),
      _ => None,
    })
    .expect("MapStarted event")
}
