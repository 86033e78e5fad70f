//! Per-resource ordering queues.
//!
//! An [`OrderingQueue`] serializes asynchronous work against one logical
//! resource: an entity instance or a named singleton such as the current
//! user. Each enqueued task is built synchronously, in submission order,
//! and receives a [`Predecessor`] it awaits before doing anything that must
//! not overtake earlier work. Work that has to happen in submission order
//! (snapshotting pending operations, for instance) is done by the factory
//! before the predecessor is awaited.
//!
//! The queue tail settles only once the newest task and everything ahead of
//! it have finished, so a task whose predecessor wait was cancelled still
//! cannot let later work run ahead of tasks that have not finished.

use crate::error::{SyncError, SyncResult};
use futures::future::{self, BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};
use uuid::Uuid;

type Tail = Shared<BoxFuture<'static, ()>>;

fn completed() -> Tail {
    future::ready(()).boxed().shared()
}

/// How a wait for the predecessor ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredecessorOutcome {
    /// Every earlier task has settled.
    Completed,
    /// The caller's cancellation token fired first.
    Cancelled,
}

/// Completion signal of the work queued ahead of a task.
pub struct Predecessor {
    tail: Tail,
    cancel: CancellationToken,
}

impl Predecessor {
    /// Waits until every earlier task has settled or the task is cancelled.
    ///
    /// Failures of earlier tasks are not propagated; a cancelled wait returns
    /// immediately.
    pub async fn wait(self) -> PredecessorOutcome {
        tokio::select! {
            biased;
            _ = self.tail => PredecessorOutcome::Completed,
            _ = self.cancel.cancelled() => PredecessorOutcome::Cancelled,
        }
    }

    /// Like [`wait`](Self::wait) but maps cancellation to [`SyncError::Cancelled`].
    pub async fn ready(self) -> SyncResult<()> {
        match self.wait().await {
            PredecessorOutcome::Completed => Ok(()),
            PredecessorOutcome::Cancelled => Err(SyncError::Cancelled),
        }
    }
}

/// A FIFO serialization primitive for one resource.
pub struct OrderingQueue {
    tail: Mutex<Tail>,
    in_flight: Arc<AtomicUsize>,
}

impl Default for OrderingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderingQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tail: Mutex::new(completed()),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tail> {
        self.tail.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of tasks enqueued but not yet settled.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Enqueues a task built by `factory`.
    ///
    /// `factory` runs before this call returns, while the queue is locked,
    /// so calls to `enqueue` build their tasks in submission order. The task
    /// runs on the tokio runtime and keeps running if the returned future is
    /// dropped.
    pub fn enqueue<F, Fut, T>(
        &self,
        factory: F,
        cancel: &CancellationToken,
    ) -> impl Future<Output = SyncResult<T>> + Send + 'static + use<F, Fut, T>
    where
        F: FnOnce(Predecessor) -> Fut,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        enqueue_for_all(std::slice::from_ref(self), factory, cancel)
    }
}

/// Enqueues one task across several queues.
///
/// The task's predecessor is every current tail, and the task becomes part
/// of every queue's tail. Queues are locked in address order so that
/// overlapping multi-queue submissions cannot deadlock.
pub fn enqueue_for_all<Q, F, Fut, T>(
    queues: &[Q],
    factory: F,
    cancel: &CancellationToken,
) -> impl Future<Output = SyncResult<T>> + Send + 'static + use<Q, F, Fut, T>
where
    Q: std::borrow::Borrow<OrderingQueue>,
    F: FnOnce(Predecessor) -> Fut,
    Fut: Future<Output = SyncResult<T>> + Send + 'static,
    T: Send + 'static,
{
    let mut ordered: Vec<&OrderingQueue> = queues.iter().map(|q| q.borrow()).collect();
    ordered.sort_by_key(|q| *q as *const OrderingQueue as usize);
    ordered.dedup_by_key(|q| *q as *const OrderingQueue as usize);

    let mut guards: Vec<MutexGuard<'_, Tail>> = ordered.iter().map(|q| q.lock()).collect();
    let counters: Vec<Arc<AtomicUsize>> = ordered.iter().map(|q| q.in_flight.clone()).collect();

    let predecessor = Predecessor {
        tail: future::join_all(guards.iter().map(|tail| (**tail).clone()))
            .map(|_| ())
            .boxed()
            .shared(),
        cancel: cancel.clone(),
    };
    let task = factory(predecessor);

    // The spawned task settles `done` only after the previous tails, so each
    // tail is a single signal rather than a chain of joins.
    let (done_tx, done_rx) = oneshot::channel::<()>();
    let done: Tail = done_rx.map(|_| ()).boxed().shared();
    let previous: Vec<Tail> = guards
        .iter_mut()
        .map(|tail| std::mem::replace(&mut **tail, done.clone()))
        .collect();
    for counter in &counters {
        counter.fetch_add(1, Ordering::SeqCst);
    }
    drop(guards);

    let (result_tx, result_rx) = oneshot::channel::<SyncResult<T>>();
    tokio::spawn(async move {
        let _ = result_tx.send(task.await);
        future::join_all(previous).await;
        for counter in &counters {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
        let _ = done_tx.send(());
    });

    async move {
        result_rx.await.unwrap_or_else(|_| {
            warn!("queued task did not finish");
            Err(SyncError::InvalidState("queued task did not finish".into()))
        })
    }
}

/// Key of the resource a queue serializes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    /// An in-memory entity instance.
    Entity(Uuid),
    /// A named singleton such as `CurrentUser`.
    Singleton(String),
}

impl ResourceKey {
    pub fn singleton(name: impl Into<String>) -> Self {
        ResourceKey::Singleton(name.into())
    }
}

/// Looks up ordering queues by resource key.
///
/// Queues nobody holds and with no work in flight are dropped on the next
/// lookup.
#[derive(Clone, Default)]
pub struct QueueRegistry {
    queues: Arc<Mutex<HashMap<ResourceKey, Arc<OrderingQueue>>>>,
}

impl QueueRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The queue for `key`, created on first use.
    #[must_use]
    pub fn queue_for(&self, key: ResourceKey) -> Arc<OrderingQueue> {
        let mut queues = self.queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        queues.retain(|k, queue| {
            let keep = *k == key || Arc::strong_count(queue) > 1 || queue.in_flight() > 0;
            if !keep {
                trace!(resource = ?k, "dropping idle queue");
            }
            keep
        });
        queues
            .entry(key)
            .or_insert_with(|| Arc::new(OrderingQueue::new()))
            .clone()
    }

    /// Number of live queues.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
