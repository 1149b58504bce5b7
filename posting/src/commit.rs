//! Background commit pipeline.
//!
//! Dirty posting lists travel through a bounded queue to a fixed pool of
//! worker tasks that write their resolved views to the store.
//!
//! # Design
//!
//! - `enqueue` is the only place a caller waits: it blocks while the queue is
//!   full. A list that is already queued is not queued twice.
//! - Workers run the store write on the blocking pool. A failed write leaves
//!   the list dirty; the worker puts it back in the dirty set and re-queues
//!   it without blocking, so a mutation is never dropped.
//! - A ticker drains the cache's dirty set into the queue every
//!   `commit_interval` and evicts clean lists once the cache grows past
//!   `cache_soft_limit`. It holds a `Weak` cache reference and exits when
//!   the cache is dropped.
//!
//! # Shutdown
//!
//! `shutdown` stops the ticker, closes the queue, and waits for the workers
//! to drain it. Lists still in the dirty set afterwards are left for
//! `Engine::commit_all`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::list::{FlushOutcome, ListCache, PostingList};

/// Pause before a failed list is re-queued.
const RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Counters shared by the workers.
#[derive(Debug, Default)]
pub struct PipelineStats {
    lists_written: AtomicU64,
    flush_failures: AtomicU64,
}

impl PipelineStats {
    /// Lists whose resolved view a worker wrote.
    #[must_use]
    pub fn lists_written(&self) -> u64 {
        self.lists_written.load(Ordering::Relaxed)
    }

    /// Flush attempts that failed and were retried.
    #[must_use]
    pub fn flush_failures(&self) -> u64 {
        self.flush_failures.load(Ordering::Relaxed)
    }
}

/// Handle to the running pipeline.
pub struct CommitPipeline {
    sender: mpsc::Sender<Arc<PostingList>>,
    workers: Vec<JoinHandle<()>>,
    ticker: JoinHandle<()>,
    stop_ticker: CancellationToken,
    stats: Arc<PipelineStats>,
}

impl CommitPipeline {
    /// Start the workers and the ticker for `engine`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn start(engine: &Engine) -> Self {
        let config = engine.config().clone();
        let (sender, receiver) = mpsc::channel(config.commit_queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let stats = Arc::new(PipelineStats::default());

        let workers = (0..config.commit_workers)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(engine.cache()),
                    Arc::clone(&receiver),
                    sender.downgrade(),
                    Arc::clone(&stats),
                ))
            })
            .collect();

        let stop_ticker = CancellationToken::new();
        let ticker = tokio::spawn(tick_loop(
            Arc::downgrade(engine.cache()),
            sender.clone(),
            config.clone(),
            stop_ticker.clone(),
        ));

        tracing::info!(
            "Commit pipeline started: {} workers, queue capacity {}",
            config.commit_workers,
            config.commit_queue_capacity
        );

        Self {
            sender,
            workers,
            ticker,
            stop_ticker,
            stats,
        }
    }

    /// Queue `list` for a flush, waiting while the queue is full.
    ///
    /// Returns false if the list was already queued. Dropping the returned
    /// future before it completes leaves the list unqueued.
    pub async fn enqueue(&self, list: Arc<PostingList>) -> Result<bool, EngineError> {
        enqueue_on(&self.sender, list).await
    }

    /// Worker counters.
    #[must_use]
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Stop the ticker, close the queue, and wait for the workers.
    pub async fn shutdown(self) {
        self.stop_ticker.cancel();
        if let Err(e) = self.ticker.await {
            tracing::error!("Commit ticker panicked: {e}");
        }

        // Workers only hold weak senders, so this closes the queue.
        drop(self.sender);
        for result in futures::future::join_all(self.workers).await {
            if let Err(e) = result {
                tracing::error!("Commit worker panicked: {e}");
            }
        }
        tracing::info!(
            "Commit pipeline stopped: {} lists written, {} failed flushes",
            self.stats.lists_written(),
            self.stats.flush_failures()
        );
    }
}

async fn enqueue_on(
    sender: &mpsc::Sender<Arc<PostingList>>,
    list: Arc<PostingList>,
) -> Result<bool, EngineError> {
    if list.is_queued() {
        return Ok(false);
    }
    // Reserve before claiming the flag so a cancelled wait claims nothing.
    let permit = sender
        .reserve()
        .await
        .map_err(|_| EngineError::PipelineClosed)?;
    if !list.try_mark_queued() {
        return Ok(false);
    }
    permit.send(list);
    Ok(true)
}

/// Take lists off the shared queue until it closes.
#[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
async fn worker_loop(
    id: usize,
    cache: Arc<ListCache>,
    receiver: Arc<Mutex<mpsc::Receiver<Arc<PostingList>>>>,
    requeue: mpsc::WeakSender<Arc<PostingList>>,
    stats: Arc<PipelineStats>,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(list) = next else {
            tracing::debug!("Commit worker {id} exiting: queue closed");
            break;
        };
        list.clear_queued();

        let flushed = tokio::task::spawn_blocking({
            let cache = Arc::clone(&cache);
            let list = Arc::clone(&list);
            move || list.flush(cache.store())
        })
        .await;
        let outcome = match flushed {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Commit worker {id}: flush task panicked: {e}");
                mark_dirty(&cache, &list);
                continue;
            }
        };

        match outcome {
            Ok(FlushOutcome::Clean) => {
                stats.lists_written.fetch_add(1, Ordering::Relaxed);
            }
            Ok(FlushOutcome::StillDirty) => {
                stats.lists_written.fetch_add(1, Ordering::Relaxed);
                mark_dirty(&cache, &list);
            }
            Ok(FlushOutcome::Skipped) => {}
            Err(e) => {
                stats.flush_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Commit worker {id} failed to flush list, retrying: {e}");
                mark_dirty(&cache, &list);
                tokio::time::sleep(RETRY_BACKOFF).await;
                requeue_now(&requeue, list);
            }
        }
    }
}

/// Put `list` back on the queue without waiting. If the queue is full or
/// closed the dirty set still holds it for the ticker or a checkpoint.
fn requeue_now(requeue: &mpsc::WeakSender<Arc<PostingList>>, list: Arc<PostingList>) {
    let Some(sender) = requeue.upgrade() else {
        return;
    };
    if !list.try_mark_queued() {
        return;
    }
    if let Err(e) = sender.try_send(list) {
        e.into_inner().clear_queued();
    }
}

fn mark_dirty(cache: &ListCache, list: &PostingList) {
    if let Err(e) = cache.mark_dirty(list.key()) {
        tracing::error!("Failed to re-mark list dirty: {e}");
    }
}

/// Drain the dirty set into the queue every `commit_interval`.
#[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
async fn tick_loop(
    cache: Weak<ListCache>,
    sender: mpsc::Sender<Arc<PostingList>>,
    config: EngineConfig,
    stop: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.commit_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            _ = interval.tick() => {}
        }

        let Some(cache) = cache.upgrade() else {
            tracing::debug!("Commit ticker exiting: cache dropped");
            break;
        };

        let lists = match cache.take_dirty(config.commit_batch_size) {
            Ok(lists) => lists,
            Err(e) => {
                tracing::error!("Commit ticker stopping: {e}");
                break;
            }
        };

        let mut lists = lists.into_iter();
        while let Some(list) = lists.next() {
            let queued = tokio::select! {
                () = stop.cancelled() => None,
                queued = enqueue_on(&sender, Arc::clone(&list)) => Some(queued),
            };
            match queued {
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!("Commit ticker stopping: {e}");
                    mark_dirty(&cache, &list);
                    lists.for_each(|rest| mark_dirty(&cache, &rest));
                    return;
                }
                None => {
                    mark_dirty(&cache, &list);
                    lists.for_each(|rest| mark_dirty(&cache, &rest));
                    return;
                }
            }
        }

        match cache.len() {
            Ok(len) if len > config.cache_soft_limit => {
                if let Err(e) = cache.evict_clean() {
                    tracing::error!("Cache eviction failed: {e}");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::error!("Cache size check failed: {e}"),
        }
    }
}
