use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use tempo_core::clock::Clock;
use tempo_core::config::EngineConfig;
use tempo_core::error::{Result, TempoError};
use tempo_core::session::{
    ChangeFeedSubscription, ChangeOrigin, CompletedEntry, DurableSessionStore, EngineEvent,
    IdentityProvider, LocalChange, LocalSessionStore, SessionRecord, SessionState,
    StalenessPolicy, SyncStatus, TimeEntryRepository, reconcile,
};
use tokio::sync::{Mutex, broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::listener::{spawn_change_feed_listener, spawn_same_device_listener};
use super::propagator::{RetryPolicy, SyncCommand, SyncHealth, SyncQueue, SyncWorker};
use super::ticker::spawn_ticker;

/// Owner id stamped on sessions started without an identity.
pub const LOCAL_OWNER_ID: &str = "local";

/// Collaborators the engine is wired against.
#[derive(Clone)]
pub struct EngineStores {
    pub local: Arc<dyn LocalSessionStore>,
    pub durable: Arc<dyn DurableSessionStore>,
    pub entries: Arc<dyn TimeEntryRepository>,
    pub identity: Arc<dyn IdentityProvider>,
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub record: Option<SessionRecord>,
    pub elapsed_secs: i64,
}

#[derive(Default)]
struct Held {
    record: Option<SessionRecord>,
    /// Last session ended by this context, used to drop its late echoes.
    retired: Option<(String, DateTime<Utc>)>,
    /// Id of the session last seen in the durable store.
    confirmed: Option<String>,
    /// Session this context evicted as stale; the delete it caused is ignored.
    evicted: Option<String>,
}

enum DurableLoad {
    Loaded(Option<SessionRecord>),
    Evicted(SessionRecord),
    Unavailable,
}

/// The session state machine for one execution context.
///
/// `SessionEngine` is responsible for:
/// - Reconciling the local and durable candidates on activation
/// - Applying `start`/`pause`/`resume`/`stop`/`reset`, local store first
/// - Propagating mutations to the durable store in the background
/// - Applying change-feed and same-device notifications from other contexts
/// - Publishing elapsed-time ticks while running
///
/// Construction spawns the propagation worker, so it must happen inside a
/// Tokio runtime. Dropping the engine tears down its background tasks.
pub struct SessionEngine {
    inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    local: Arc<dyn LocalSessionStore>,
    durable: Arc<dyn DurableSessionStore>,
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    staleness: StalenessPolicy,
    held: Mutex<Held>,
    current: watch::Sender<Option<SessionRecord>>,
    events: broadcast::Sender<EngineEvent>,
    health: SyncHealth,
    queue: SyncQueue,
    cancel: CancellationToken,
    worker: StdMutex<Option<JoinHandle<()>>>,
    ticker: StdMutex<Option<JoinHandle<()>>>,
    listeners: StdMutex<Vec<JoinHandle<()>>>,
}

impl SessionEngine {
    /// Creates an engine for one execution context.
    ///
    /// The engine starts idle; call [`SessionEngine::activate`] to load the
    /// persisted session and begin listening for external changes.
    pub fn new(stores: EngineStores, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let health = SyncHealth::new(events.clone());
        let cancel = CancellationToken::new();
        let retry = RetryPolicy {
            attempts: config.sync_retry_attempts,
            backoff: config.retry_backoff(),
        };
        let (queue, worker) = SyncWorker::spawn(
            stores.durable.clone(),
            stores.entries,
            health.clone(),
            retry,
            cancel.clone(),
        );
        let (current, _) = watch::channel(None);

        Self {
            inner: Arc::new(EngineInner {
                local: stores.local,
                durable: stores.durable,
                identity: stores.identity,
                clock,
                staleness: config.staleness_policy(),
                config,
                held: Mutex::new(Held::default()),
                current,
                events,
                health,
                queue,
                cancel,
                worker: StdMutex::new(Some(worker)),
                ticker: StdMutex::new(None),
                listeners: StdMutex::new(Vec::new()),
            }),
        }
    }

    /// Loads both candidates, reconciles them and starts listening.
    ///
    /// The winner is written back to whichever store lacked it. A durable
    /// record older than the staleness threshold is deleted instead of being
    /// considered. Calling this again re-runs reconciliation and replaces the
    /// listeners.
    ///
    /// Both subscriptions are opened before either store is read, so a change
    /// landing while activation runs is queued for the listeners.
    pub async fn activate(&self) -> Result<SessionSnapshot> {
        let inner = &self.inner;
        let same_device = inner.local.subscribe();
        let owner = inner.owner();
        let feed = match owner.as_deref() {
            Some(owner_id) => match inner.durable.subscribe(owner_id).await {
                Ok(feed) => Some(feed),
                Err(err) => {
                    inner.health.failed("subscribe", &err);
                    None
                }
            },
            None => None,
        };

        {
            let mut held = inner.held.lock().await;

            let mut local = inner.read_local().unwrap_or_else(|err| {
                tracing::warn!(error = %err, "[SessionEngine] local store unreadable, treating as empty");
                None
            });

            let load = match owner.as_deref() {
                Some(owner_id) => inner.load_durable(owner_id).await,
                None => DurableLoad::Unavailable,
            };
            let (durable, durable_known) = match load {
                DurableLoad::Loaded(record) => (record, true),
                DurableLoad::Evicted(stale) => {
                    held.evicted = Some(stale.id.clone());
                    // The same abandoned session must not come back from this device.
                    if local
                        .as_ref()
                        .is_some_and(|l| l.id == stale.id && l.updated_at <= stale.updated_at)
                    {
                        inner.write_local(None);
                        local = None;
                    }
                    (None, true)
                }
                DurableLoad::Unavailable => (None, false),
            };

            held.confirmed = durable.as_ref().map(|record| record.id.clone());
            let outcome = reconcile(local.as_ref(), durable.as_ref());
            let settled = outcome.is_settled();
            let mut winner = outcome.winner;
            let mut to_local = outcome.propagate_to_local;
            let mut to_durable = outcome.propagate_to_durable && durable_known;

            if let (Some(record), Some(owner_id)) = (winner.as_mut(), owner.as_ref()) {
                if record.owner_id == LOCAL_OWNER_ID {
                    tracing::info!(%owner_id, "[SessionEngine] adopting local-only session");
                    record.owner_id = owner_id.clone();
                    record.touch(inner.clock.now());
                    to_local = true;
                    to_durable = durable_known;
                }
            }

            if to_local {
                inner.write_local(winner.as_ref());
            }
            if to_durable {
                if let Some(record) = &winner {
                    inner.propagate(record);
                }
            }

            let origin = if outcome.propagate_to_local {
                ChangeOrigin::Remote
            } else {
                ChangeOrigin::Local
            };
            tracing::info!(
                state = %SessionState::of(winner.as_ref()),
                settled,
                to_local,
                to_durable,
                "[SessionEngine] activated"
            );
            inner.commit(&mut held, winner, origin);
        }

        self.spawn_listeners(feed, same_device);
        Ok(self.snapshot())
    }

    fn spawn_listeners(
        &self,
        feed: Option<ChangeFeedSubscription>,
        same_device: broadcast::Receiver<LocalChange>,
    ) {
        let inner = &self.inner;
        let mut handles = Vec::new();

        if let Some(feed) = feed {
            handles.push(spawn_change_feed_listener(inner.clone(), feed));
        }
        handles.push(spawn_same_device_listener(inner.clone(), same_device));

        let mut listeners = inner.listeners.lock().unwrap_or_else(|e| e.into_inner());
        for old in listeners.drain(..) {
            old.abort();
        }
        *listeners = handles;
    }

    /// Starts a new running session.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless idle. A session a sibling context already
    /// wrote to the local store counts as not idle; it is adopted before the
    /// error is returned. Durable problems never fail the call.
    pub async fn start(
        &self,
        subject_id: impl Into<String>,
        note: Option<String>,
    ) -> Result<SessionRecord> {
        let inner = &self.inner;
        let mut held = inner.held.lock().await;
        if held.record.is_none() {
            if let Some(sibling) = inner.unseen_local_session(&held) {
                let state = sibling.state();
                tracing::info!(
                    session_id = %sibling.id,
                    %state,
                    "[SessionEngine] start refused, adopting session from the local store"
                );
                inner.commit(&mut held, Some(sibling), ChangeOrigin::SameDevice);
                inner.emit(EngineEvent::ExternalChange { state });
                return Err(TempoError::InvalidTransition {
                    from: state.to_string(),
                    operation: "start",
                });
            }
        }
        if let Some(current) = &held.record {
            return Err(TempoError::InvalidTransition {
                from: current.state().to_string(),
                operation: "start",
            });
        }

        let owner_id = inner
            .owner()
            .unwrap_or_else(|| LOCAL_OWNER_ID.to_string());
        let record = SessionRecord::start(owner_id, subject_id, note, inner.clock.now());
        tracing::info!(
            session_id = %record.id,
            subject_id = %record.subject_id,
            "[SessionEngine] session started"
        );

        inner.write_local(Some(&record));
        inner.commit(&mut held, Some(record.clone()), ChangeOrigin::Local);
        inner.propagate(&record);
        Ok(record)
    }

    /// Pauses the running session, banking its elapsed time.
    pub async fn pause(&self) -> Result<SessionRecord> {
        self.inner
            .transition("pause", |record, now| record.pause(now))
            .await
    }

    /// Resumes the paused session.
    pub async fn resume(&self) -> Result<SessionRecord> {
        self.inner
            .transition("resume", |record, now| record.resume(now))
            .await
    }

    /// Stops the session and records a completed entry.
    ///
    /// The entry must be durably written before the session is cleared from
    /// either store. On failure the session stays intact and the call can be
    /// retried.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition` when idle
    /// - `Auth` without an identity (there is nowhere to record the entry)
    /// - `Sync` when the durable write failed
    pub async fn stop(&self) -> Result<CompletedEntry> {
        let inner = &self.inner;
        let mut held = inner.held.lock().await;
        let Some(mut record) = held.record.clone() else {
            return Err(TempoError::InvalidTransition {
                from: SessionState::Idle.to_string(),
                operation: "stop",
            });
        };

        if let Err(err) = inner.identity.current_owner_id() {
            inner.health.local_only();
            tracing::warn!(error = %err, "[SessionEngine] cannot stop without an identity");
            return Err(err);
        }

        let now = inner.clock.now();
        record.touch(now);
        inner.write_local(Some(&record));
        held.record = Some(record.clone());
        inner.current.send_replace(Some(record.clone()));

        let entry = record.complete(now);
        let (reply, outcome) = oneshot::channel();
        inner.health.pending();
        if let Err(err) = inner.queue.submit(SyncCommand::Complete {
            entry: entry.clone(),
            reply,
        }) {
            inner.health.failed("complete", &err);
            return Err(err);
        }

        let result = outcome
            .await
            .unwrap_or_else(|_| Err(TempoError::sync("complete", "propagation worker stopped")));
        if let Err(err) = result {
            tracing::error!(
                session_id = %record.id,
                error = %err,
                "[SessionEngine] stop failed, session kept for retry"
            );
            return Err(err);
        }

        tracing::info!(
            session_id = %record.id,
            total_duration = entry.total_duration,
            "[SessionEngine] session stopped"
        );
        held.retired = Some((record.id.clone(), record.updated_at));
        inner.write_local(None);
        inner.commit(&mut held, None, ChangeOrigin::Local);
        Ok(entry)
    }

    /// Clears the session from both stores without recording an entry.
    ///
    /// The durable delete is best-effort.
    pub async fn reset(&self) -> Result<()> {
        let inner = &self.inner;
        let mut held = inner.held.lock().await;
        if let Some(record) = &held.record {
            tracing::info!(session_id = %record.id, "[SessionEngine] session reset");
            held.retired = Some((record.id.clone(), record.updated_at));
        }

        inner.write_local(None);
        if let Some(owner_id) = inner.owner() {
            inner.health.pending();
            if let Err(err) = inner.queue.submit(SyncCommand::Delete { owner_id }) {
                inner.health.failed("delete", &err);
            }
        }
        inner.commit(&mut held, None, ChangeOrigin::Local);
        Ok(())
    }

    /// Current state, record and elapsed time.
    pub fn snapshot(&self) -> SessionSnapshot {
        let record = self.inner.current.borrow().clone();
        let elapsed_secs = record
            .as_ref()
            .map(|r| r.elapsed_secs(self.inner.clock.now()))
            .unwrap_or(0);
        SessionSnapshot {
            state: SessionState::of(record.as_ref()),
            record,
            elapsed_secs,
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::of(self.inner.current.borrow().as_ref())
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.inner.health.status()
    }

    /// Subscribes to ticks, state changes and sync notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    /// Deregisters listeners and stops ticking.
    ///
    /// Queued durable writes still run to completion; nothing new is accepted.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        for handle in inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            handle.abort();
        }
        if let Some(handle) = inner.ticker.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
        inner.cancel.cancel();
        tracing::debug!(context_id = %inner.context_id(), "[SessionEngine] shut down");
    }

    /// Shuts down and waits until every queued durable write has been attempted.
    pub async fn close(&self) {
        self.shutdown();
        let worker = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                tracing::warn!(error = %err, "[SessionEngine] propagation worker ended abnormally");
            }
        }
    }
}

impl Drop for SessionEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl EngineInner {
    pub(crate) fn context_id(&self) -> &str {
        self.local.context_id()
    }

    pub(crate) fn read_local(&self) -> Result<Option<SessionRecord>> {
        self.local.get()
    }

    /// A session in the local store this context has not applied yet.
    fn unseen_local_session(&self, held: &Held) -> Option<SessionRecord> {
        let record = match self.read_local() {
            Ok(record) => record?,
            Err(err) => {
                tracing::warn!(error = %err, "[SessionEngine] local store unreadable");
                return None;
            }
        };
        let ended_here = held
            .retired
            .as_ref()
            .is_some_and(|(id, stamp)| *id == record.id && record.updated_at <= *stamp);
        (!ended_here).then_some(record)
    }

    /// Resolves the identity, switching to local-only mode without one.
    fn owner(&self) -> Option<String> {
        match self.identity.current_owner_id() {
            Ok(owner_id) => Some(owner_id),
            Err(err) => {
                tracing::debug!(error = %err, "[SessionEngine] no identity, durable sync skipped");
                self.health.local_only();
                None
            }
        }
    }

    /// Writes the local store. Failures are logged; in-memory state stays authoritative.
    fn write_local(&self, record: Option<&SessionRecord>) {
        if let Err(err) = self.local.set(record) {
            tracing::warn!(error = %err, "[SessionEngine] local store write failed");
        }
    }

    /// Queues a durable upsert of `record`.
    fn propagate(&self, record: &SessionRecord) {
        if self.owner().is_none() {
            return;
        }
        self.health.pending();
        if let Err(err) = self.queue.submit(SyncCommand::Upsert(record.clone())) {
            self.health.failed("upsert", &err);
        }
    }

    async fn load_durable(&self, owner_id: &str) -> DurableLoad {
        let record = match self.durable.fetch_by_owner(owner_id).await {
            Ok(record) => record,
            Err(err) => {
                self.health.failed("fetch", &err);
                return DurableLoad::Unavailable;
            }
        };

        match record {
            Some(record) if self.staleness.is_stale(&record, self.clock.now()) => {
                let stale = TempoError::StaleRecord {
                    owner_id: owner_id.to_string(),
                    age_secs: self.staleness.age(&record, self.clock.now()).num_seconds(),
                };
                tracing::warn!(error = %stale, session_id = %record.id, "[SessionEngine] evicting abandoned session");
                if let Err(err) = self.durable.delete_by_owner(owner_id).await {
                    self.health.failed("delete", &err);
                }
                DurableLoad::Evicted(record)
            }
            record => DurableLoad::Loaded(record),
        }
    }

    async fn transition<F>(&self, operation: &'static str, f: F) -> Result<SessionRecord>
    where
        F: FnOnce(&mut SessionRecord, DateTime<Utc>) -> Result<()>,
    {
        let mut held = self.held.lock().await;
        let Some(mut record) = held.record.clone() else {
            return Err(TempoError::InvalidTransition {
                from: SessionState::Idle.to_string(),
                operation,
            });
        };

        f(&mut record, self.clock.now())?;
        tracing::info!(
            session_id = %record.id,
            state = %record.state(),
            elapsed_secs = record.elapsed_secs(self.clock.now()),
            "[SessionEngine] {}",
            operation
        );

        self.write_local(Some(&record));
        self.commit(&mut held, Some(record.clone()), ChangeOrigin::Local);
        self.propagate(&record);
        Ok(record)
    }

    /// Installs `next` as the live record and notifies observers.
    fn commit(&self, held: &mut Held, next: Option<SessionRecord>, origin: ChangeOrigin) {
        let state = SessionState::of(next.as_ref());
        held.record = next.clone();
        self.current.send_replace(next);
        self.sync_ticker(state);
        self.emit(EngineEvent::StateChanged { state, origin });
    }

    fn sync_ticker(&self, state: SessionState) {
        let mut ticker = self.ticker.lock().unwrap_or_else(|e| e.into_inner());
        if state == SessionState::Running {
            if ticker.as_ref().is_none_or(|handle| handle.is_finished()) {
                *ticker = Some(spawn_ticker(
                    self.config.tick_interval(),
                    self.clock.clone(),
                    self.current.subscribe(),
                    self.events.clone(),
                ));
            }
        } else if let Some(handle) = ticker.take() {
            handle.abort();
        }
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    /// Applies a record written by another context.
    pub(crate) async fn apply_incoming(&self, incoming: SessionRecord, origin: ChangeOrigin) {
        let mut held = self.held.lock().await;
        if origin == ChangeOrigin::Remote {
            held.confirmed = Some(incoming.id.clone());
        }

        if held
            .record
            .as_ref()
            .is_some_and(|current| current.updated_at == incoming.updated_at)
        {
            tracing::debug!(session_id = %incoming.id, ?origin, "[SessionEngine] dropping echo");
            return;
        }
        if held
            .retired
            .as_ref()
            .is_some_and(|(id, stamp)| *id == incoming.id && incoming.updated_at <= *stamp)
        {
            tracing::debug!(session_id = %incoming.id, "[SessionEngine] dropping update for ended session");
            return;
        }

        let outcome = reconcile(held.record.as_ref(), Some(&incoming));
        if outcome.propagate_to_local {
            let winner = outcome.winner;
            let state = SessionState::of(winner.as_ref());
            tracing::info!(%state, ?origin, "[SessionEngine] applying external change");
            // A sibling's write is already in the shared local store.
            if origin == ChangeOrigin::Remote {
                self.write_local(winner.as_ref());
            }
            self.commit(&mut held, winner, origin);
            self.emit(EngineEvent::ExternalChange { state });
        } else if outcome.propagate_to_durable {
            let Some(record) = outcome.winner else {
                return;
            };
            tracing::debug!(session_id = %record.id, ?origin, "[SessionEngine] incoming record is older, re-asserting ours");
            match origin {
                ChangeOrigin::Remote => self.propagate(&record),
                ChangeOrigin::SameDevice => self.write_local(Some(&record)),
                ChangeOrigin::Local => {}
            }
        }
    }

    /// Applies the removal of a session by another context.
    ///
    /// `removed_id` names the session that was removed. A removal of some
    /// other session is stale and leaves the held one alone. `None` clears
    /// whatever is held.
    pub(crate) async fn apply_removal(&self, removed_id: Option<String>, origin: ChangeOrigin) {
        let mut held = self.held.lock().await;
        if let Some(removed_id) = removed_id.as_deref() {
            if held.evicted.as_deref() == Some(removed_id) {
                held.evicted = None;
                tracing::debug!(%removed_id, "[SessionEngine] dropping delete of evicted session");
                return;
            }
        }
        let Some(current) = &held.record else {
            return;
        };
        if let Some(removed_id) = removed_id {
            if removed_id != current.id {
                tracing::debug!(
                    %removed_id,
                    held_id = %current.id,
                    ?origin,
                    "[SessionEngine] ignoring removal of an earlier session"
                );
                return;
            }
        }
        self.clear_external(&mut held, origin);
    }

    /// Applies an eviction this context performed while catching up.
    async fn apply_eviction(&self, stale: SessionRecord) {
        let mut held = self.held.lock().await;
        held.evicted = Some(stale.id.clone());
        let Some(current) = held.record.clone() else {
            return;
        };
        if current.id != stale.id {
            return;
        }
        if current.updated_at > stale.updated_at {
            // The evicted copy was older than ours.
            self.propagate(&current);
            return;
        }
        self.clear_external(&mut held, ChangeOrigin::Remote);
    }

    fn clear_external(&self, held: &mut Held, origin: ChangeOrigin) {
        if let Some(current) = &held.record {
            tracing::info!(session_id = %current.id, ?origin, "[SessionEngine] session ended elsewhere");
        }
        if origin == ChangeOrigin::Remote {
            self.write_local(None);
        }
        self.commit(held, None, origin);
        self.emit(EngineEvent::ExternalChange {
            state: SessionState::Idle,
        });
    }

    /// Re-reads the durable record after change-feed events were dropped.
    pub(crate) async fn resync_durable(&self, owner_id: &str) {
        tracing::info!(%owner_id, "[SessionEngine] change feed lagged, re-reading durable record");
        match self.load_durable(owner_id).await {
            DurableLoad::Loaded(Some(record)) => {
                self.apply_incoming(record, ChangeOrigin::Remote).await
            }
            DurableLoad::Loaded(None) => {
                // Only a session the store is known to have had can have been removed.
                // Anything else may still be on its way there.
                let confirmed = self.held.lock().await.confirmed.clone();
                match confirmed {
                    Some(session_id) => {
                        self.apply_removal(Some(session_id), ChangeOrigin::Remote)
                            .await
                    }
                    None => tracing::debug!("[SessionEngine] held session not yet durable"),
                }
            }
            DurableLoad::Evicted(stale) => self.apply_eviction(stale).await,
            DurableLoad::Unavailable => {}
        }
    }
}
