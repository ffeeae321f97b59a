mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use tempo_application::LOCAL_OWNER_ID;
use tempo_core::clock::ManualClock;
use tempo_core::session::{
    DurableSessionStore, EngineEvent, LocalSessionStore, SessionRecord, SessionState, SyncStatus,
};
use tempo_infrastructure::{MemoryDurableStore, StaticIdentity};

#[tokio::test]
async fn test_pause_resume_stop_records_total_duration() {
    let device = Device::new();
    let durable = Arc::new(MemoryDurableStore::new());
    let clock = Arc::new(ManualClock::at_secs(0));
    let engine = engine(device.local(), &durable, signed_in(), &clock);
    engine.activate().await.unwrap();

    let started = engine.start("P1", Some("deep work".into())).await.unwrap();
    assert_eq!(started.owner_id, OWNER);
    assert_eq!(engine.state(), SessionState::Running);

    clock.set(at(100));
    let paused = engine.pause().await.unwrap();
    assert_eq!(paused.paused_accumulated, 100);
    assert_eq!(engine.snapshot().elapsed_secs, 100);

    clock.set(at(150));
    engine.resume().await.unwrap();
    assert_eq!(engine.snapshot().elapsed_secs, 100);

    clock.set(at(220));
    let entry = engine.stop().await.unwrap();
    assert_eq!(entry.total_duration, 170);
    assert_eq!(entry.ended_at, at(220));
    assert_eq!(entry.id, started.id);
    assert_eq!(engine.state(), SessionState::Idle);

    assert_eq!(durable.entries_for(OWNER).await, vec![entry]);
    assert!(durable.fetch_by_owner(OWNER).await.unwrap().is_none());
    assert!(device.local().get().unwrap().is_none());
}

#[tokio::test]
async fn test_elapsed_sums_running_intervals() {
    let device = Device::new();
    let durable = Arc::new(MemoryDurableStore::new());
    let clock = Arc::new(ManualClock::at_secs(1_000));
    let engine = engine(device.local(), &durable, signed_in(), &clock);
    engine.activate().await.unwrap();

    engine.start("P1", None).await.unwrap();
    clock.advance_secs(30);
    engine.pause().await.unwrap();
    clock.advance_secs(3_600);
    assert_eq!(engine.snapshot().elapsed_secs, 30);

    engine.resume().await.unwrap();
    clock.advance_secs(45);
    assert_eq!(engine.snapshot().elapsed_secs, 75);
}

#[tokio::test]
async fn test_invalid_transitions_leave_state_unchanged() {
    let device = Device::new();
    let durable = Arc::new(MemoryDurableStore::new());
    let clock = Arc::new(ManualClock::at_secs(0));
    let engine = engine(device.local(), &durable, signed_in(), &clock);
    engine.activate().await.unwrap();

    assert!(engine.pause().await.unwrap_err().is_invalid_transition());
    assert!(engine.resume().await.unwrap_err().is_invalid_transition());
    assert!(engine.stop().await.unwrap_err().is_invalid_transition());

    let first = engine.start("P1", None).await.unwrap();
    let err = engine.start("P2", None).await.unwrap_err();
    assert!(err.is_invalid_transition());
    assert_eq!(err.to_string(), "Cannot start while running");
    assert!(engine.resume().await.unwrap_err().is_invalid_transition());

    assert_eq!(engine.snapshot().record.unwrap().id, first.id);
}

#[tokio::test]
async fn test_stop_keeps_session_when_durable_write_fails() {
    let device = Device::new();
    let durable = Arc::new(MemoryDurableStore::new());
    let clock = Arc::new(ManualClock::at_secs(0));
    let engine = engine(device.local(), &durable, signed_in(), &clock);
    engine.activate().await.unwrap();

    let started = engine.start("P1", None).await.unwrap();
    wait_for_durable(&durable, "insert", |r| r.is_some()).await;

    durable.set_online(false);
    clock.set(at(30));
    let err = engine.stop().await.unwrap_err();
    assert!(err.is_sync());
    assert_eq!(engine.state(), SessionState::Running);
    assert_eq!(device.local().get().unwrap().unwrap().id, started.id);
    assert!(durable.entries_for(OWNER).await.is_empty());

    durable.set_online(true);
    clock.set(at(40));
    let entry = engine.stop().await.unwrap();
    assert_eq!(entry.total_duration, 40);
    assert_eq!(durable.entries_for(OWNER).await.len(), 1);
    assert!(durable.fetch_by_owner(OWNER).await.unwrap().is_none());
    assert!(device.local().get().unwrap().is_none());
}

#[tokio::test]
async fn test_reset_discards_without_entry() {
    let device = Device::new();
    let durable = Arc::new(MemoryDurableStore::new());
    let clock = Arc::new(ManualClock::at_secs(0));
    let engine = engine(device.local(), &durable, signed_in(), &clock);
    engine.activate().await.unwrap();

    engine.start("P1", None).await.unwrap();
    wait_for_durable(&durable, "insert", |r| r.is_some()).await;

    engine.reset().await.unwrap();
    assert_eq!(engine.state(), SessionState::Idle);
    assert!(device.local().get().unwrap().is_none());
    wait_for_durable(&durable, "delete", |r| r.is_none()).await;
    assert!(durable.entries_for(OWNER).await.is_empty());

    // Resetting while idle is harmless.
    engine.reset().await.unwrap();
}

#[tokio::test]
async fn test_local_only_mode_without_identity() {
    let device = Device::new();
    let durable = Arc::new(MemoryDurableStore::new());
    let clock = Arc::new(ManualClock::at_secs(0));
    let engine = engine(device.local(), &durable, StaticIdentity::anonymous(), &clock);
    engine.activate().await.unwrap();
    assert_eq!(engine.sync_status(), SyncStatus::LocalOnly);

    let record = engine.start("P1", None).await.unwrap();
    assert_eq!(record.owner_id, LOCAL_OWNER_ID);
    clock.advance_secs(10);
    engine.pause().await.unwrap();
    engine.resume().await.unwrap();
    assert_eq!(device.local().get().unwrap().unwrap().id, record.id);

    let err = engine.stop().await.unwrap_err();
    assert!(err.is_auth());
    assert_eq!(engine.state(), SessionState::Running);
    assert!(durable.fetch_by_owner(LOCAL_OWNER_ID).await.unwrap().is_none());

    engine.reset().await.unwrap();
    assert_eq!(engine.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_local_only_session_adopted_after_sign_in() {
    let device = Device::new();
    let durable = Arc::new(MemoryDurableStore::new());
    let clock = Arc::new(ManualClock::at_secs(0));

    let anonymous = engine(device.local(), &durable, StaticIdentity::anonymous(), &clock);
    anonymous.activate().await.unwrap();
    let record = anonymous.start("P1", None).await.unwrap();
    drop(anonymous);

    clock.advance_secs(5);
    let engine = engine(device.local(), &durable, signed_in(), &clock);
    let snapshot = engine.activate().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Running);

    let adopted = snapshot.record.unwrap();
    assert_eq!(adopted.id, record.id);
    assert_eq!(adopted.owner_id, OWNER);
    assert_eq!(device.local().get().unwrap().unwrap().owner_id, OWNER);
    wait_for_durable(&durable, "adopted record", |r| {
        r.is_some_and(|r| r.id == record.id)
    })
    .await;
}

#[tokio::test]
async fn test_session_survives_restart_while_offline() {
    let device = Device::new();
    let durable = Arc::new(MemoryDurableStore::new());
    let clock = Arc::new(ManualClock::at_secs(0));

    let first = engine(device.local(), &durable, signed_in(), &clock);
    first.activate().await.unwrap();
    let record = first.start("P1", None).await.unwrap();
    drop(first);

    durable.set_online(false);
    clock.advance_secs(90);
    let second = engine(device.local(), &durable, signed_in(), &clock);
    let snapshot = second.activate().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Running);
    assert_eq!(snapshot.record.unwrap().id, record.id);
    assert_eq!(snapshot.elapsed_secs, 90);
    assert!(matches!(second.sync_status(), SyncStatus::Failed(_)));
}

#[tokio::test]
async fn test_stale_durable_record_is_evicted_on_activation() {
    let device = Device::new();
    let durable = Arc::new(MemoryDurableStore::new());
    let clock = Arc::new(ManualClock::at_secs(200_000));

    let abandoned = SessionRecord::start(OWNER, "P1", None, at(200_000 - 25 * 3_600));
    durable.seed(abandoned.clone()).await;
    device.local().set(Some(&abandoned)).unwrap();

    let engine = engine(device.local(), &durable, signed_in(), &clock);
    let snapshot = engine.activate().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert!(durable.fetch_by_owner(OWNER).await.unwrap().is_none());
    assert!(device.local().get().unwrap().is_none());
}

#[tokio::test]
async fn test_newer_local_copy_survives_eviction_of_stale_durable_copy() {
    let device = Device::new();
    let durable = Arc::new(MemoryDurableStore::new());
    let clock = Arc::new(ManualClock::at_secs(200_000));

    let mut record = SessionRecord::start(OWNER, "P1", None, at(200_000 - 30 * 3_600));
    durable.seed(record.clone()).await;
    record.pause(at(200_000 - 60)).unwrap();
    device.local().set(Some(&record)).unwrap();

    let engine = engine(device.local(), &durable, signed_in(), &clock);
    let snapshot = engine.activate().await.unwrap();
    let mut events = engine.subscribe();
    assert_eq!(snapshot.state, SessionState::Paused);
    wait_for_durable(&durable, "local copy pushed back", |r| {
        r.is_some_and(|r| r.updated_at == record.updated_at)
    })
    .await;

    // The delete caused by the eviction must not end the kept session.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.state(), SessionState::Paused);
    assert_eq!(device.local().get().unwrap(), Some(record));
    assert!(
        !drain(&mut events)
            .iter()
            .any(|e| matches!(e, EngineEvent::ExternalChange { .. }))
    );
}

#[tokio::test]
async fn test_record_at_threshold_is_not_stale() {
    let device = Device::new();
    let durable = Arc::new(MemoryDurableStore::new());
    let clock = Arc::new(ManualClock::at_secs(200_000));

    let record = SessionRecord::start(OWNER, "P1", None, at(200_000 - 24 * 3_600));
    durable.seed(record.clone()).await;

    let engine = engine(device.local(), &durable, signed_in(), &clock);
    let snapshot = engine.activate().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Running);
    assert_eq!(device.local().get().unwrap(), Some(record));
}

#[tokio::test]
async fn test_activation_propagates_newer_local_record() {
    let device = Device::new();
    let durable = Arc::new(MemoryDurableStore::new());
    let clock = Arc::new(ManualClock::at_secs(60));

    let mut record = SessionRecord::start(OWNER, "P1", None, at(0));
    durable.seed(record.clone()).await;
    record.pause(at(50)).unwrap();
    device.local().set(Some(&record)).unwrap();

    let engine = engine(device.local(), &durable, signed_in(), &clock);
    let snapshot = engine.activate().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Paused);
    wait_for_durable(&durable, "newer local record", |r| {
        r.is_some_and(|r| r.updated_at == at(50))
    })
    .await;
}

#[tokio::test]
async fn test_activation_adopts_newer_durable_record() {
    let device = Device::new();
    let durable = Arc::new(MemoryDurableStore::new());
    let clock = Arc::new(ManualClock::at_secs(60));

    let mut record = SessionRecord::start(OWNER, "P1", None, at(0));
    device.local().set(Some(&record)).unwrap();
    record.pause(at(50)).unwrap();
    durable.seed(record.clone()).await;

    let engine = engine(device.local(), &durable, signed_in(), &clock);
    let snapshot = engine.activate().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Paused);
    assert_eq!(snapshot.elapsed_secs, 50);
    assert_eq!(device.local().get().unwrap(), Some(record));
}

#[tokio::test]
async fn test_ticks_only_while_running() {
    let device = Device::new();
    let durable = Arc::new(MemoryDurableStore::new());
    let clock = Arc::new(ManualClock::at_secs(0));
    let engine = engine(device.local(), &durable, signed_in(), &clock);
    engine.activate().await.unwrap();
    let mut events = engine.subscribe();

    engine.start("P1", None).await.unwrap();
    clock.advance_secs(5);
    let tick = next_matching(&mut events, |e| {
        matches!(e, EngineEvent::Tick { elapsed_secs: 5 })
    })
    .await;
    assert_eq!(tick, EngineEvent::Tick { elapsed_secs: 5 });

    engine.pause().await.unwrap();
    drain(&mut events);
    tokio::time::sleep(Duration::from_millis(80)).await;
    let after_pause = drain(&mut events);
    assert!(
        !after_pause
            .iter()
            .any(|e| matches!(e, EngineEvent::Tick { .. })),
        "unexpected ticks: {after_pause:?}"
    );
}

#[tokio::test]
async fn test_sync_failure_is_reported_and_restored() {
    let device = Device::new();
    let durable = Arc::new(MemoryDurableStore::new());
    let clock = Arc::new(ManualClock::at_secs(0));
    let engine = engine(device.local(), &durable, signed_in(), &clock);
    engine.activate().await.unwrap();
    let mut events = engine.subscribe();

    durable.set_online(false);
    engine.start("P1", None).await.unwrap();
    let failed = next_matching(&mut events, |e| matches!(e, EngineEvent::SyncFailed { .. })).await;
    assert!(matches!(failed, EngineEvent::SyncFailed { ref operation, .. } if operation == "upsert"));
    assert!(matches!(engine.sync_status(), SyncStatus::Failed(_)));
    assert_eq!(engine.state(), SessionState::Running);

    durable.set_online(true);
    clock.advance_secs(10);
    engine.pause().await.unwrap();
    next_matching(&mut events, |e| matches!(e, EngineEvent::SyncRestored)).await;
    assert_eq!(engine.sync_status(), SyncStatus::Synced);
    wait_for_durable(&durable, "paused record", |r| {
        r.is_some_and(|r| r.state() == SessionState::Paused)
    })
    .await;
}
