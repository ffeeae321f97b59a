//! Background propagation of local mutations to the durable store.
//!
//! Mutations hand a [`SyncCommand`] to the queue and return immediately. A
//! single worker drains the queue in order, so an upsert can never land
//! after the delete that followed it. Failures are reported through
//! [`SyncHealth`] instead of the caller.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempo_core::error::{Result, TempoError};
use tempo_core::session::{
    CompletedEntry, DurableSessionStore, EngineEvent, SessionRecord, SyncStatus,
    TimeEntryRepository,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) enum SyncCommand {
    Upsert(SessionRecord),
    Delete {
        owner_id: String,
    },
    /// Record a finished interval, then drop the live record.
    Complete {
        entry: CompletedEntry,
        reply: oneshot::Sender<Result<()>>,
    },
}

impl SyncCommand {
    fn name(&self) -> &'static str {
        match self {
            SyncCommand::Upsert(_) => "upsert",
            SyncCommand::Delete { .. } => "delete",
            SyncCommand::Complete { .. } => "complete",
        }
    }
}

/// Shared view of durable sync health for one context.
#[derive(Clone)]
pub(crate) struct SyncHealth {
    status: Arc<Mutex<SyncStatus>>,
    events: broadcast::Sender<EngineEvent>,
}

impl SyncHealth {
    pub(crate) fn new(events: broadcast::Sender<EngineEvent>) -> Self {
        Self {
            status: Arc::new(Mutex::new(SyncStatus::Idle)),
            events,
        }
    }

    fn replace(&self, next: SyncStatus) -> SyncStatus {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *status, next)
    }

    pub(crate) fn status(&self) -> SyncStatus {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn local_only(&self) {
        self.replace(SyncStatus::LocalOnly);
    }

    /// Marks a write as queued. A failure stays visible until a write succeeds.
    pub(crate) fn pending(&self) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if !matches!(*status, SyncStatus::Failed(_)) {
            *status = SyncStatus::Pending;
        }
    }

    pub(crate) fn succeeded(&self) {
        if matches!(self.replace(SyncStatus::Synced), SyncStatus::Failed(_)) {
            tracing::info!("[SyncHealth] durable sync restored");
            let _ = self.events.send(EngineEvent::SyncRestored);
        }
    }

    pub(crate) fn failed(&self, operation: &str, err: &TempoError) {
        tracing::warn!(operation, error = %err, "[SyncHealth] durable sync failed");
        self.replace(SyncStatus::Failed(err.to_string()));
        let _ = self.events.send(EngineEvent::SyncFailed {
            operation: operation.to_string(),
            message: err.to_string(),
        });
    }
}

/// Bounded retry for fire-and-forget commands.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

/// Sending half of the propagation queue.
#[derive(Clone)]
pub(crate) struct SyncQueue {
    tx: mpsc::UnboundedSender<SyncCommand>,
}

impl SyncQueue {
    pub(crate) fn submit(&self, command: SyncCommand) -> Result<()> {
        let name = command.name();
        self.tx
            .send(command)
            .map_err(|_| TempoError::sync(name, "propagation queue closed"))
    }
}

pub(crate) struct SyncWorker {
    durable: Arc<dyn DurableSessionStore>,
    entries: Arc<dyn TimeEntryRepository>,
    health: SyncHealth,
    retry: RetryPolicy,
    rx: mpsc::UnboundedReceiver<SyncCommand>,
    cancel: CancellationToken,
}

impl SyncWorker {
    /// Spawns the worker. Must be called from within a Tokio runtime.
    pub(crate) fn spawn(
        durable: Arc<dyn DurableSessionStore>,
        entries: Arc<dyn TimeEntryRepository>,
        health: SyncHealth,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> (SyncQueue, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = SyncWorker {
            durable,
            entries,
            health,
            retry,
            rx,
            cancel,
        };
        (SyncQueue { tx }, tokio::spawn(worker.run()))
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                command = self.rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => return,
                },
            }
        }

        // Accept nothing new, but let queued writes finish.
        self.rx.close();
        while let Some(command) = self.rx.recv().await {
            self.handle(command).await;
        }
        tracing::debug!("[SyncWorker] propagation queue drained");
    }

    async fn handle(&self, command: SyncCommand) {
        match command {
            SyncCommand::Upsert(record) => {
                let result = self
                    .with_retry("upsert", || self.durable.upsert_by_owner(&record))
                    .await;
                self.report("upsert", result);
            }
            SyncCommand::Delete { owner_id } => {
                let result = self
                    .with_retry("delete", || self.durable.delete_by_owner(&owner_id))
                    .await;
                self.report("delete", result);
            }
            SyncCommand::Complete { entry, reply } => {
                if let Err(err) = self.entries.insert_entry(&entry).await {
                    self.health.failed("insert_entry", &err);
                    let _ = reply.send(Err(err));
                    return;
                }
                tracing::info!(
                    session_id = %entry.id,
                    total_duration = entry.total_duration,
                    "[SyncWorker] completed entry recorded"
                );

                // The entry is safe; a leftover live record is only a warning.
                let result = self.durable.delete_by_owner(&entry.owner_id).await;
                self.report("delete", result);
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn report(&self, operation: &str, result: Result<()>) {
        match result {
            Ok(()) => self.health.succeeded(),
            Err(err) => self.health.failed(operation, &err),
        }
    }

    async fn with_retry<F, Fut>(&self, operation: &str, f: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut backoff = self.retry.backoff;
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_sync() && attempt < self.retry.attempts => {
                    attempt += 1;
                    tracing::debug!(
                        operation,
                        attempt,
                        error = %err,
                        "[SyncWorker] retrying durable write"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(err) => return Err(err),
            }
        }
    }
}
