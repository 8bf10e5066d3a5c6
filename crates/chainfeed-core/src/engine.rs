//! The feed engine: orchestrates catch-up and streaming phases.
//!
//! # Phase 1: CATCH-UP
//! Fetch one block at a time starting at the cursor. For each height:
//! fetch → dispatch → advance cursor → check the chain head. Sleep
//! `catch_up_poll_interval_ms` between blocks until the cursor reaches the head.
//!
//! # Phase 2: STREAMING
//! Subscribe to the ledger's block feed. Blocks below the cursor are
//! discarded. A block above the cursor first has the missing heights fetched
//! and dispatched; then it is dispatched and moves the cursor to `height + 1`.
//!
//! Both phases run inside one Tokio task, so a block is fully dispatched
//! before the cursor moves and before the next block is requested.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{broadcast, watch};

use crate::config::{FeedConfig, FeedState, FetchFailurePolicy};
use crate::cursor::Cursor;
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::error::FeedError;
use crate::events::{FeedEvent, FeedMetrics};
use crate::handler::{
    BlockHandler, FnBlockHandler, FnOperationHandler, HandlerRegistry, OperationHandler,
};
use crate::ledger::{BlockStream, LedgerClient};
use crate::retry::RetryPolicy;
use crate::types::{Block, FeedPhase};

/// Result of trying to fetch one historical height.
enum FetchOutcome {
    Fetched(Block),
    /// Retries exhausted; the height is consumed without dispatch.
    Skipped,
    /// The height is above the chain head; nothing to consume yet.
    NotProduced,
    /// Stop was requested while backing off.
    Interrupted,
}

/// Sequential block-ingestion engine.
///
/// Cloning yields another handle to the same engine.
pub struct FeedEngine<C: LedgerClient> {
    inner: Arc<Inner<C>>,
}

impl<C: LedgerClient> Clone for FeedEngine<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<C> {
    config: FeedConfig,
    client: C,
    cursor: Cursor,
    dispatcher: Dispatcher,
    retry: RetryPolicy,
    state: watch::Sender<FeedState>,
    shutdown: watch::Sender<bool>,
    events: broadcast::Sender<FeedEvent>,
    metrics: Mutex<FeedMetrics>,
}

impl<C: LedgerClient> FeedEngine<C> {
    /// Create an engine. Fails if `config` is invalid.
    pub fn new(config: FeedConfig, client: C) -> Result<Self, FeedError> {
        config.validate()?;

        let registry = HandlerRegistry::new(config.operation_prefix.clone());
        let (state, _) = watch::channel(FeedState::Created);
        let (shutdown, _) = watch::channel(false);
        let (events, _) = broadcast::channel(config.event_channel_capacity);

        Ok(Self {
            inner: Arc::new(Inner {
                cursor: Cursor::new(config.initial_cursor),
                dispatcher: Dispatcher::new(Arc::new(RwLock::new(registry))),
                retry: RetryPolicy::new(config.retry.clone()),
                state,
                shutdown,
                events,
                metrics: Mutex::new(FeedMetrics::default()),
                client,
                config,
            }),
        })
    }

    // ─── Registration ─────────────────────────────────────────────────────

    /// Register a handler for operation `id` (the namespace prefix is added).
    ///
    /// Allowed at any time; takes effect from the next dispatched operation.
    pub fn register(&self, id: &str, handler: Arc<dyn OperationHandler>) {
        self.inner
            .dispatcher
            .registry()
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(id, handler);
    }

    /// Register a closure `(payload, authorizer)` for operation `id`.
    pub fn register_fn<F>(&self, id: &str, f: F)
    where
        F: Fn(&Value, &str) + Send + Sync + 'static,
    {
        self.register(id, Arc::new(FnOperationHandler(f)));
    }

    /// Replace the per-block callback.
    pub fn on_block(&self, handler: Arc<dyn BlockHandler>) {
        self.inner
            .dispatcher
            .registry()
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .on_block(handler);
    }

    /// Replace the per-block callback with a closure `(height, block)`.
    pub fn on_block_fn<F>(&self, f: F)
    where
        F: Fn(u64, &Block) + Send + Sync + 'static,
    {
        self.on_block(Arc::new(FnBlockHandler(f)));
    }

    // ─── Accessors ────────────────────────────────────────────────────────

    /// Next height the engine will process.
    pub fn cursor(&self) -> u64 {
        self.inner.cursor.get()
    }

    /// A read-only handle that follows the engine's cursor.
    pub fn cursor_handle(&self) -> Cursor {
        self.inner.cursor.clone()
    }

    pub fn state(&self) -> FeedState {
        *self.inner.state.borrow()
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == FeedState::Streaming
    }

    pub fn config(&self) -> &FeedConfig {
        &self.inner.config
    }

    /// Subscribe to status events. Subscribe before `start()` to see every event.
    pub fn subscribe_events(&self) -> broadcast::Receiver<FeedEvent> {
        self.inner.events.subscribe()
    }

    /// Returns a snapshot of current metrics.
    pub fn metrics(&self) -> FeedMetrics {
        self.inner
            .metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ─── Lifecycle ────────────────────────────────────────────────────────

    /// Start ingesting in catch-up mode. Spawns the engine task and returns
    /// immediately. Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<(), FeedError> {
        let mut previous = FeedState::Created;
        let started = self.inner.state.send_if_modified(|s| {
            previous = *s;
            if *s == FeedState::Created {
                *s = FeedState::CatchingUp;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(match previous {
                FeedState::Stopped => FeedError::Other("engine was stopped before start".into()),
                _ => FeedError::AlreadyStarted,
            });
        }
        self.inner.emit(FeedEvent::StateChanged(FeedState::CatchingUp));

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            inner.run().await;
        });

        // `stop()` waits for Stopped, so it is published even if the task dies.
        let watcher = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(e) = task.await {
                tracing::error!(error = %e, cursor = watcher.cursor.get(), "Feed task aborted");
                watcher.shutdown.send_replace(true);
                watcher.set_state(FeedState::Stopped);
            }
        });
        Ok(())
    }

    /// Request shutdown and wait until the engine has stopped.
    ///
    /// Idempotent: later calls just wait for the same completion.
    pub async fn stop(&self) {
        self.inner.request_stop();
        let mut rx = self.inner.state.subscribe();
        while *rx.borrow_and_update() != FeedState::Stopped {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Request shutdown and invoke `on_stopped` once the engine has stopped.
    pub fn stop_with<F>(&self, on_stopped: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.request_stop();
        let engine = self.clone();
        tokio::spawn(async move {
            engine.stop().await;
            on_stopped();
        });
    }
}

impl<C: LedgerClient> Inner<C> {
    async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();

        if self.catch_up(&mut shutdown).await && !self.is_stopping() {
            self.set_state(FeedState::Streaming);
            self.stream(&mut shutdown).await;
        }

        let grace = self.config.shutdown_grace_ms;
        if grace > 0 {
            tokio::time::sleep(Duration::from_millis(grace)).await;
        }
        self.set_state(FeedState::Stopped);
        tracing::info!(cursor = self.cursor.get(), "Feed stopped");
    }

    /// Returns `true` once caught up with the head, `false` if stopped.
    async fn catch_up(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tracing::info!(from = self.cursor.get(), "Starting catch-up phase");
        let poll_interval = Duration::from_millis(self.config.catch_up_poll_interval_ms);

        loop {
            if self.is_stopping() {
                return false;
            }

            // Snapshot: the cursor only moves after this height is done.
            let height = self.cursor.get();
            match self.fetch_with_policy(height, shutdown).await {
                FetchOutcome::Fetched(block) => {
                    let report = self
                        .dispatcher
                        .process(&block, height, FeedPhase::CatchUp)
                        .await;
                    self.record(&report);
                    self.cursor.advance_to(height + 1);
                }
                FetchOutcome::Skipped => {
                    self.cursor.advance_to(height + 1);
                }
                FetchOutcome::NotProduced => {
                    tracing::info!(height, "Cursor is ahead of the chain head");
                    return true;
                }
                FetchOutcome::Interrupted => return false,
            }

            if self.is_stopping() {
                return false;
            }

            let Some(head) = self.head_with_backoff(shutdown).await else {
                return false;
            };
            self.emit(FeedEvent::CatchUpProgress { height, head });

            if self.cursor.is_caught_up(head) {
                tracing::info!(cursor = self.cursor.get(), head, "Catch-up complete");
                return true;
            }

            if self.sleep_or_shutdown(shutdown, poll_interval).await {
                return false;
            }
        }
    }

    async fn stream(&self, shutdown: &mut watch::Receiver<bool>) {
        let mut stream: BlockStream = match self.client.subscribe_blocks().await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Block stream subscription failed");
                self.emit(FeedEvent::StreamError(e.to_string()));
                self.emit(FeedEvent::StreamEnded);
                wait_for_shutdown(shutdown).await;
                return;
            }
        };
        tracing::info!(cursor = self.cursor.get(), "Streaming live blocks");

        loop {
            let item = tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown) => break,
                item = stream.next() => item,
            };
            match item {
                Some(Ok(block)) => {
                    if !self.on_stream_block(block, shutdown).await {
                        break;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Block stream error");
                    self.emit(FeedEvent::StreamError(e.to_string()));
                }
                None => {
                    tracing::error!("Block stream ended unexpectedly");
                    self.emit(FeedEvent::StreamEnded);
                    wait_for_shutdown(shutdown).await;
                    break;
                }
            }
        }
        // Dropping the stream pauses the subscription.
        drop(stream);
    }

    /// Returns `false` if stop was requested while filling a gap.
    async fn on_stream_block(&self, block: Block, shutdown: &mut watch::Receiver<bool>) -> bool {
        let height = match block.height() {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping streamed block");
                return true;
            }
        };

        if self.cursor.is_behind(height) {
            let cursor = self.cursor.get();
            tracing::debug!(height, cursor, "Discarding already processed block");
            self.metrics().blocks_discarded += 1;
            self.emit(FeedEvent::BlockDiscarded { height, cursor });
            return true;
        }
        if !self.fill_gap(height, shutdown).await {
            return false;
        }

        let report = self
            .dispatcher
            .process(&block, height, FeedPhase::Streaming)
            .await;
        self.record(&report);
        self.cursor.advance_to(height + 1);
        true
    }

    /// Fetch and dispatch every height between the cursor and `height`
    /// (exclusive), so a stream that starts or jumps ahead loses nothing.
    async fn fill_gap(&self, height: u64, shutdown: &mut watch::Receiver<bool>) -> bool {
        let cursor = self.cursor.get();
        if cursor < height {
            tracing::warn!(height, cursor, gap = height - cursor, "Stream skipped ahead of cursor, fetching gap");
        }

        while self.cursor.get() < height {
            if self.is_stopping() {
                return false;
            }
            let next = self.cursor.get();
            match self.fetch_with_policy(next, shutdown).await {
                FetchOutcome::Fetched(block) => {
                    let report = self
                        .dispatcher
                        .process(&block, next, FeedPhase::Streaming)
                        .await;
                    self.record(&report);
                }
                FetchOutcome::Skipped => {}
                FetchOutcome::NotProduced => {
                    tracing::error!(height = next, "Node does not serve a block below its stream");
                    self.metrics().blocks_skipped += 1;
                    self.emit(FeedEvent::BlockSkipped {
                        height: next,
                        reason: "not served by node".into(),
                    });
                }
                FetchOutcome::Interrupted => return false,
            }
            self.cursor.advance_to(next + 1);
        }
        true
    }

    // ─── Ledger access ────────────────────────────────────────────────────

    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = Result<T, FeedError>>,
    ) -> Result<T, FeedError> {
        let ms = self.config.fetch_timeout_ms;
        tokio::time::timeout(Duration::from_millis(ms), fut)
            .await
            .map_err(|_| FeedError::Timeout { ms })?
    }

    async fn fetch_block(&self, height: u64) -> Result<Block, FeedError> {
        self.with_timeout(self.client.get_block(height))
            .await?
            .ok_or(FeedError::BlockNotFound { height })
    }

    async fn fetch_with_policy(
        &self,
        height: u64,
        shutdown: &mut watch::Receiver<bool>,
    ) -> FetchOutcome {
        let max_retries = match self.config.fetch_failure_policy {
            FetchFailurePolicy::Skip => 0,
            FetchFailurePolicy::Retry { max_retries } => max_retries,
        };

        let mut attempt = 0u32;
        loop {
            let err = match self.fetch_block(height).await {
                Ok(block) => return FetchOutcome::Fetched(block),
                Err(e) => e,
            };
            if !err.is_retryable() {
                return self.skip(height, err);
            }

            if let FeedError::BlockNotFound { .. } = err {
                if let Ok(head) = self.with_timeout(self.client.head_block_number()).await {
                    if height > head {
                        return FetchOutcome::NotProduced;
                    }
                }
            }

            attempt += 1;
            match self.retry.bounded_delay(attempt, max_retries) {
                Some(delay) => {
                    tracing::warn!(
                        height,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying block fetch"
                    );
                    if self.sleep_or_shutdown(shutdown, delay).await {
                        return FetchOutcome::Interrupted;
                    }
                }
                None => return self.skip(height, err),
            }
        }
    }

    fn skip(&self, height: u64, err: FeedError) -> FetchOutcome {
        tracing::error!(height, error = %err, "Skipping block after failed fetch");
        self.metrics().blocks_skipped += 1;
        self.emit(FeedEvent::BlockSkipped {
            height,
            reason: err.to_string(),
        });
        FetchOutcome::Skipped
    }

    /// Query the head, backing off on errors. `None` if stopped meanwhile.
    async fn head_with_backoff(&self, shutdown: &mut watch::Receiver<bool>) -> Option<u64> {
        let mut attempt = 0u32;
        loop {
            let head = self
                .with_timeout(self.client.head_block_number())
                .await
                .map_err(|e| FeedError::HeadQuery(e.to_string()));
            match head {
                Ok(head) => return Some(head),
                Err(e) => {
                    attempt += 1;
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying head query"
                    );
                    if self.sleep_or_shutdown(shutdown, delay).await {
                        return None;
                    }
                }
            }
        }
    }

    // ─── State helpers ────────────────────────────────────────────────────

    fn request_stop(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        tracing::info!(state = %*self.state.borrow(), "Stop requested");

        let never_started = self.state.send_if_modified(|s| {
            if *s == FeedState::Created {
                *s = FeedState::Stopped;
                true
            } else {
                false
            }
        });
        if never_started {
            self.emit(FeedEvent::StateChanged(FeedState::Stopped));
        }
    }

    fn is_stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn set_state(&self, state: FeedState) {
        self.state.send_replace(state);
        tracing::info!(state = %state, "Feed state changed");
        self.emit(FeedEvent::StateChanged(state));
    }

    /// Sleep for `duration` unless stop is requested first.
    /// Returns `true` if the engine is stopping.
    async fn sleep_or_shutdown(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        duration: Duration,
    ) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = wait_for_shutdown(shutdown) => {}
        }
        self.is_stopping()
    }

    fn emit(&self, event: FeedEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn metrics(&self) -> std::sync::MutexGuard<'_, FeedMetrics> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, report: &DispatchReport) {
        self.metrics().record(report);
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
