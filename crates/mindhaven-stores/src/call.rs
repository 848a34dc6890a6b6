use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mindhaven_common::{Error, Result};
use mindhaven_realtime::CallTransition;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const TICK: Duration = Duration::from_secs(1);

/// What a call screen renders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallSnapshot {
    pub call_active: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_secs: u64,
    pub participant_joined: bool,
    pub show_summary: bool,
    pub final_duration_secs: u64,
}

struct CallState {
    snapshot: CallSnapshot,
    started: Option<Instant>,
    ticker: Option<JoinHandle<()>>,
}

struct Shared {
    state: Mutex<CallState>,
    snapshot_tx: watch::Sender<CallSnapshot>,
}

impl Shared {
    fn state(&self) -> Result<MutexGuard<'_, CallState>> {
        self.state
            .lock()
            .map_err(|_| Error::Store("call session lock poisoned".into()))
    }

    fn publish(&self, snapshot: &CallSnapshot) {
        self.snapshot_tx.send_replace(snapshot.clone());
    }
}

/// Lifecycle of the current video call, plus its running duration.
///
/// Owns at most one one-second ticker, started when the call becomes active and
/// stopped when it ends, is reset, or the store is dropped.
pub struct CallSessionStore {
    shared: Arc<Shared>,
}

impl Default for CallSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CallSessionStore {
    pub fn new() -> Self {
        let (snapshot_tx, _) = watch::channel(CallSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CallState {
                    snapshot: CallSnapshot::default(),
                    started: None,
                    ticker: None,
                }),
                snapshot_tx,
            }),
        }
    }

    pub fn apply(&self, transition: CallTransition) -> Result<()> {
        let mut state = self.shared.state()?;
        match transition {
            CallTransition::WaitingForPeer => {
                if state.snapshot.call_active {
                    debug!("stores: peer update while call already active");
                    return Ok(());
                }
                // A new call is forming: the previous summary is stale.
                state.snapshot.show_summary = false;
                state.snapshot.participant_joined = true;
            }
            CallTransition::Active => {
                if state.snapshot.call_active {
                    debug!("stores: call already active");
                    return Ok(());
                }
                info!("stores: call started");
                state.started = Some(Instant::now());
                state.snapshot = CallSnapshot {
                    call_active: true,
                    started_at: Some(Utc::now()),
                    participant_joined: true,
                    ..CallSnapshot::default()
                };
                state.ticker = self.spawn_ticker();
            }
            CallTransition::Ended { duration_secs } => {
                if let Some(ticker) = state.ticker.take() {
                    ticker.abort();
                }
                let measured = state.started.take().map(|s| s.elapsed().as_secs());
                let final_duration = duration_secs
                    .or(measured)
                    .unwrap_or(state.snapshot.elapsed_secs);
                info!(duration_secs = final_duration, "stores: call ended");

                let snapshot = &mut state.snapshot;
                snapshot.call_active = false;
                snapshot.participant_joined = false;
                snapshot.show_summary = true;
                snapshot.final_duration_secs = final_duration;
            }
        }
        self.shared.publish(&state.snapshot);
        Ok(())
    }

    fn spawn_ticker(&self) -> Option<JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("stores: no async runtime, call duration will not tick");
            return None;
        };
        let shared = Arc::downgrade(&self.shared);
        Some(runtime.spawn(tick(shared)))
    }

    pub fn snapshot(&self) -> Result<CallSnapshot> {
        Ok(self.shared.state()?.snapshot.clone())
    }

    /// Subscribe to every snapshot change, including ticks.
    pub fn watch(&self) -> watch::Receiver<CallSnapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    /// Final duration of the call that just ended, while its summary is showing.
    pub fn summary(&self) -> Result<Option<u64>> {
        let state = self.shared.state()?;
        Ok(state
            .snapshot
            .show_summary
            .then_some(state.snapshot.final_duration_secs))
    }

    pub fn is_ticking(&self) -> Result<bool> {
        Ok(self
            .shared
            .state()?
            .ticker
            .as_ref()
            .is_some_and(|t| !t.is_finished()))
    }

    pub fn reset(&self) -> Result<()> {
        let mut state = self.shared.state()?;
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
        state.started = None;
        state.snapshot = CallSnapshot::default();
        self.shared.publish(&state.snapshot);
        Ok(())
    }
}

impl Drop for CallSessionStore {
    fn drop(&mut self) {
        let mut state = match self.shared.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
    }
}

async fn tick(shared: Weak<Shared>) {
    let mut interval = tokio::time::interval_at(Instant::now() + TICK, TICK);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let Ok(mut state) = shared.state() else {
            return;
        };
        let Some(started) = state.started else {
            return;
        };
        if !state.snapshot.call_active {
            return;
        }
        state.snapshot.elapsed_secs = started.elapsed().as_secs();
        shared.publish(&state.snapshot);
    }
}
