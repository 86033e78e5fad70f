use cirrus_sync::{
    enqueue_for_all, OrderingQueue, PredecessorOutcome, QueueRegistry, ResourceKey, SyncError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

type Log = Arc<Mutex<Vec<&'static str>>>;

fn record(log: &Log, entry: &'static str) {
    log.lock().unwrap().push(entry);
}

// ── Ordering ────────────────────────────────────────────────────

#[tokio::test]
async fn tasks_run_in_submission_order() {
    let queue = OrderingQueue::new();
    let cancel = CancellationToken::new();
    let log: Log = Arc::default();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let first_log = log.clone();
    let first = queue.enqueue(
        move |predecessor| async move {
            predecessor.ready().await?;
            let _ = release_rx.await;
            record(&first_log, "first");
            Ok(())
        },
        &cancel,
    );
    let second_log = log.clone();
    let second = queue.enqueue(
        move |predecessor| async move {
            predecessor.ready().await?;
            record(&second_log, "second");
            Ok(())
        },
        &cancel,
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(queue.in_flight(), 2);

    release_tx.send(()).unwrap();
    first.await.unwrap();
    second.await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    assert_eq!(queue.in_flight(), 0);
}

#[tokio::test]
async fn factories_run_in_submission_order_before_waiting() {
    let queue = OrderingQueue::new();
    let cancel = CancellationToken::new();
    let log: Log = Arc::default();

    let mut tasks = Vec::new();
    for name in ["a", "b", "c"] {
        let log = log.clone();
        tasks.push(queue.enqueue(
            move |predecessor| {
                record(&log, name);
                async move { predecessor.ready().await }
            },
            &cancel,
        ));
    }
    assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn failed_predecessor_does_not_fail_successor() {
    let queue = OrderingQueue::new();
    let cancel = CancellationToken::new();

    let failing = queue.enqueue(
        |_| async { Err::<(), _>(SyncError::Transport("boom".into())) },
        &cancel,
    );
    let next = queue.enqueue(
        |predecessor| async move {
            predecessor.ready().await?;
            Ok("ran")
        },
        &cancel,
    );

    assert!(matches!(failing.await, Err(SyncError::Transport(_))));
    assert_eq!(next.await.unwrap(), "ran");
}

#[tokio::test]
async fn long_runs_of_tasks_ignoring_their_predecessor_stay_shallow() {
    let queue = OrderingQueue::new();
    let cancel = CancellationToken::new();

    let tasks: Vec<_> = (0..20_000)
        .map(|_| queue.enqueue(|_| async { Ok(()) }, &cancel))
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let last = queue.enqueue(|predecessor| predecessor.ready(), &cancel);
    last.await.unwrap();
    assert_eq!(queue.in_flight(), 0);
}

// ── Cancellation ────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_wait_returns_immediately() {
    let queue = OrderingQueue::new();
    let live = CancellationToken::new();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let blocker = queue.enqueue(
        move |_| async move {
            let _ = release_rx.await;
            Ok(())
        },
        &live,
    );

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let outcome = queue
        .enqueue(
            |predecessor| async move { Ok(predecessor.wait().await) },
            &cancelled,
        )
        .await
        .unwrap();
    assert_eq!(outcome, PredecessorOutcome::Cancelled);

    release_tx.send(()).unwrap();
    blocker.await.unwrap();
}

#[tokio::test]
async fn cancellation_mid_wait_is_reported() {
    let queue = OrderingQueue::new();
    let live = CancellationToken::new();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let blocker = queue.enqueue(
        move |_| async move {
            let _ = release_rx.await;
            Ok(())
        },
        &live,
    );
    let cancel = CancellationToken::new();
    let waiting = queue.enqueue(|predecessor| predecessor.ready(), &cancel);

    cancel.cancel();
    assert!(matches!(waiting.await, Err(SyncError::Cancelled)));

    release_tx.send(()).unwrap();
    blocker.await.unwrap();
}

#[tokio::test]
async fn cancelled_task_does_not_let_the_tail_overtake() {
    let queue = OrderingQueue::new();
    let live = CancellationToken::new();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let third_ran = Arc::new(AtomicBool::new(false));

    let first = queue.enqueue(
        move |_| async move {
            let _ = release_rx.await;
            Ok(())
        },
        &live,
    );

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let second = queue.enqueue(|predecessor| predecessor.ready(), &cancelled);

    let flag = third_ran.clone();
    let third = queue.enqueue(
        move |predecessor| async move {
            predecessor.ready().await?;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        },
        &live,
    );

    assert!(matches!(second.await, Err(SyncError::Cancelled)));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!third_ran.load(Ordering::SeqCst));

    release_tx.send(()).unwrap();
    first.await.unwrap();
    third.await.unwrap();
    assert!(third_ran.load(Ordering::SeqCst));
}

// ── Multi-queue ─────────────────────────────────────────────────

#[tokio::test]
async fn multi_queue_task_waits_for_every_tail() {
    let a = OrderingQueue::new();
    let b = OrderingQueue::new();
    let cancel = CancellationToken::new();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let ran = Arc::new(AtomicBool::new(false));

    let blocker = b.enqueue(
        move |_| async move {
            let _ = release_rx.await;
            Ok(())
        },
        &cancel,
    );
    let flag = ran.clone();
    let joint = enqueue_for_all(
        &[&a, &b],
        move |predecessor| async move {
            predecessor.ready().await?;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        },
        &cancel,
    );
    let after_a = a.enqueue(|predecessor| predecessor.ready(), &cancel);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!ran.load(Ordering::SeqCst));

    release_tx.send(()).unwrap();
    blocker.await.unwrap();
    joint.await.unwrap();
    after_a.await.unwrap();
    assert!(ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn registry_hands_out_one_queue_per_key() {
    let registry = QueueRegistry::new();
    let key = ResourceKey::singleton("CurrentUser");
    let first = registry.queue_for(key.clone());
    let second = registry.queue_for(key);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.len(), 1);
}
