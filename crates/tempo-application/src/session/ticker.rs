use std::sync::Arc;
use std::time::Duration;

use tempo_core::clock::Clock;
use tempo_core::session::{EngineEvent, SessionRecord};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Publishes elapsed time at a fixed cadence while the session runs.
///
/// Reads the latest record from `current` and never touches a store. The
/// loop exits on its own once the record is no longer running.
pub(crate) fn spawn_ticker(
    period: Duration,
    clock: Arc<dyn Clock>,
    current: watch::Receiver<Option<SessionRecord>>,
    events: broadcast::Sender<EngineEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let elapsed_secs = match current.borrow().as_ref() {
                Some(record) if record.is_running() => record.elapsed_secs(clock.now()),
                _ => break,
            };
            let _ = events.send(EngineEvent::Tick { elapsed_secs });
        }
        tracing::trace!("tick loop stopped");
    })
}
