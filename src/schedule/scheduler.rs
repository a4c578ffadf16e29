//! Per-subscription fetch scheduling.
//!
//! Each subscription gets one detached worker task that loops through the
//! cycle states: sleep until the next cron fire (`Idle`), wake (`Due`), run
//! the fetch pipeline (`Fetching`), then advance the schedule regardless of
//! outcome (`Cooldown`). A failed cycle is never retried out-of-band — the
//! next attempt is the subscription's own next tick, which bounds retry
//! storms without extra backoff state.
//!
//! Workers hold only a `Weak` reference to the engine, so dropping the
//! engine stops every worker at its next state transition.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::engine::Engine;
use crate::store::SubId;

/// Per-subscription cycle state, traced at each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleState {
    Idle,
    Due,
    Fetching,
    Cooldown,
}

/// Owns the worker task per subscription.
///
/// Unrelated subscriptions' cycles stay fully concurrent; serialization of
/// work for one subscription happens in the engine's per-subscription
/// flight slot, which the manual `get` path shares.
#[derive(Default)]
pub struct Scheduler {
    workers: Mutex<HashMap<SubId, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every worker and spawns one per current subscription.
    /// Used at startup; mutations use the targeted methods below so an
    /// unrelated in-flight cycle is never cut short.
    pub fn rebuild(&self, engine: &Arc<Engine>) {
        let mut workers = self.workers.lock().expect("scheduler lock poisoned");
        for (_, handle) in workers.drain() {
            handle.abort();
        }
        for id in engine.store().subscription_ids() {
            workers.insert(id, spawn_worker(Arc::downgrade(engine), id));
        }
        tracing::info!(subscriptions = workers.len(), "Scheduler started");
    }

    /// (Re)starts the worker for one subscription, e.g. after its cron
    /// expression changed or it was just created.
    pub fn reschedule(&self, engine: &Arc<Engine>, id: SubId) {
        let mut workers = self.workers.lock().expect("scheduler lock poisoned");
        if let Some(old) = workers.insert(id, spawn_worker(Arc::downgrade(engine), id)) {
            old.abort();
        }
    }

    /// Stops the worker for a destroyed subscription.
    pub fn remove(&self, id: SubId) {
        if let Some(handle) = self
            .workers
            .lock()
            .expect("scheduler lock poisoned")
            .remove(&id)
        {
            handle.abort();
        }
    }

    pub fn shutdown(&self) {
        let mut workers = self.workers.lock().expect("scheduler lock poisoned");
        for (_, handle) in workers.drain() {
            handle.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker(engine: Weak<Engine>, id: SubId) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            // Compute the sleep without holding the engine alive through it.
            let wait = {
                let Some(engine) = engine.upgrade() else { return };
                let Some(cron) = engine.store().cron_of(id) else {
                    tracing::debug!(subscription = id, "Subscription gone, stopping worker");
                    return;
                };

                let now = Utc::now();
                let Some(next) = cron.next_after(now) else {
                    tracing::warn!(
                        subscription = id,
                        expr = %cron,
                        "Cron expression yields no future fire time, stopping worker"
                    );
                    return;
                };

                tracing::trace!(
                    subscription = id,
                    state = ?CycleState::Idle,
                    next_fire = %next,
                    "Waiting for next fire"
                );
                (next - now).to_std().unwrap_or_default()
            };

            tokio::time::sleep(wait).await;
            tracing::trace!(subscription = id, state = ?CycleState::Due, "Schedule fired");

            let Some(engine) = engine.upgrade() else { return };
            tracing::debug!(
                subscription = id,
                state = ?CycleState::Fetching,
                "Starting fetch cycle"
            );
            match engine.run_cycle(id).await {
                Ok(outcome) => {
                    tracing::info!(
                        subscription = id,
                        delivered = outcome.delivered,
                        channels = outcome.channels,
                        "Fetch cycle complete"
                    );
                }
                Err(e) => {
                    // Contained: checkpoint untouched, next attempt at the
                    // subscription's next cron tick.
                    tracing::warn!(subscription = id, error = %e, "Fetch cycle failed");
                }
            }
            tracing::trace!(
                subscription = id,
                state = ?CycleState::Cooldown,
                "Advancing schedule"
            );
        }
    })
}
