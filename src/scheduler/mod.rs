//! Scheduler module for running checks and remediations.
//!
//! Every check has its own timer. Ticks dispatch a cycle onto a worker
//! pool shared by all checks:
//!
//! ```text
//! Idle -> Probing -> Evaluating -> Idle
//!                             \-> Remediating -> Idle
//! ```
//!
//! A check never has two cycles in flight. A tick that arrives while the
//! previous cycle is still running is dropped and logged, not queued.

mod registry;
mod state;

pub use registry::*;
pub use state::*;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::policy::{evaluate, Verdict};
use crate::probe::{run_probe, Target};
use crate::remediation::{run_remediation, Outcome, VerdictContext};
use crate::sink::{Event, SinkHandle};

/// Largest worker pool; `shutdown` must be able to take every permit at once.
pub const MAX_WORKERS: usize = if Semaphore::MAX_PERMITS < u32::MAX as usize {
    Semaphore::MAX_PERMITS
} else {
    u32::MAX as usize
};

struct Shared {
    registry: Registry,
    slots: Vec<CheckSlot>,
    pool: Arc<Semaphore>,
    sink: SinkHandle,
    shutdown: watch::Receiver<bool>,
}

impl Shared {
    fn slot(&self, id: CheckId) -> Option<&CheckSlot> {
        self.slots.get(id.0)
    }
}

/// Status of one check for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct CheckSnapshot {
    pub id: CheckId,
    pub name: String,
    pub target: Target,
    pub probe: &'static str,
    pub remediation: Option<&'static str>,
    pub interval_seconds: u64,
    pub phase: Phase,
    pub in_flight: bool,
    pub last_verdict: Option<Verdict>,
    pub consecutive_failures: u32,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_remediation: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
}

/// Releases the check's slot when its cycle finishes or is aborted.
struct InFlight {
    shared: Arc<Shared>,
    id: CheckId,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(slot) = self.shared.slot(self.id) {
            slot.release();
        }
    }
}

/// The scheduler that owns the check registry and all per-check state.
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: usize,
    shutdown_tx: watch::Sender<bool>,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler with a pool of `workers` concurrent cycles,
    /// clamped to `1..=MAX_WORKERS`.
    pub fn new(registry: Registry, workers: usize, sink: SinkHandle) -> Self {
        let workers = workers.clamp(1, MAX_WORKERS);
        let (shutdown_tx, shutdown) = watch::channel(false);
        let slots = registry.iter().map(|_| CheckSlot::default()).collect();

        Self {
            shared: Arc::new(Shared {
                registry,
                slots,
                pool: Arc::new(Semaphore::new(workers)),
                sink,
                shutdown,
            }),
            workers,
            shutdown_tx,
            timers: Mutex::new(Vec::new()),
        }
    }

    /// Start one timer per check.
    pub fn start(&self) {
        if self.shared.registry.is_empty() {
            tracing::warn!("No checks registered, scheduler idle");
            return;
        }
        tracing::info!(
            "Starting scheduler with {} checks and {} workers",
            self.shared.registry.len(),
            self.workers
        );

        let Ok(mut timers) = self.timers.lock() else {
            return;
        };
        for check in self.shared.registry.iter() {
            tracing::info!(check = %check.name, target = %check.target, "Scheduling every {:?}", check.interval);
            timers.push(tokio::spawn(run_timer(self.shared.clone(), check.id)));
        }
    }

    /// Dispatch one cycle for `id` the way a timer tick does. Returns
    /// `None` when a cycle for the check is already in flight.
    #[cfg(test)]
    pub fn trigger(&self, id: CheckId) -> Option<JoinHandle<()>> {
        dispatch(&self.shared, id)
    }

    pub fn snapshot(&self) -> Vec<CheckSnapshot> {
        self.shared
            .registry
            .iter()
            .zip(&self.shared.slots)
            .map(|(check, slot)| {
                let summary = slot.summary();
                CheckSnapshot {
                    id: check.id,
                    name: check.name.clone(),
                    target: check.target.clone(),
                    probe: check.probe_kind,
                    remediation: check.remediation.as_ref().map(|r| r.name()),
                    interval_seconds: check.interval.as_secs(),
                    phase: slot.phase(),
                    in_flight: slot.is_in_flight(),
                    last_verdict: summary.last_verdict,
                    consecutive_failures: summary.consecutive_failures,
                    last_checked: summary.last_checked,
                    last_remediation: summary.last_remediation,
                    cooldown_until: summary.cooldown_until,
                }
            })
            .collect()
    }

    /// Stop all timers, wait up to `grace` for in-flight cycles, then
    /// abort whatever is still running.
    pub async fn shutdown(&self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);

        let timers: Vec<_> = match self.timers.lock() {
            Ok(mut timers) => timers.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for timer in timers {
            let _ = timer.await;
        }

        let in_flight = self.shared.slots.iter().filter(|s| s.is_in_flight()).count();
        if in_flight > 0 {
            tracing::info!("Waiting up to {:?} for {} in-flight checks", grace, in_flight);
        }

        // Every cycle holds a pool permit, so owning all of them means idle
        let all = u32::try_from(self.workers).unwrap_or(u32::MAX);
        match tokio::time::timeout(grace, self.shared.pool.acquire_many(all)).await {
            Ok(_) => tracing::info!("Scheduler stopped"),
            Err(_) => {
                tracing::warn!("Grace period elapsed, aborting in-flight checks");
                for slot in &self.shared.slots {
                    slot.abort_cycle();
                }
            }
        }
        self.shared.pool.close();
    }
}

fn dispatch(shared: &Arc<Shared>, id: CheckId) -> Option<JoinHandle<()>> {
    let slot = shared.slot(id)?;
    if !slot.try_claim() {
        return None;
    }

    let guard = InFlight {
        shared: shared.clone(),
        id,
    };
    let handle = tokio::spawn(run_cycle(shared.clone(), id, guard));
    if let Ok(mut cycle) = slot.cycle.lock() {
        *cycle = Some(handle.abort_handle());
    }
    Some(handle)
}

/// Random start offset so checks sharing an interval do not fire together.
fn start_jitter(interval: Duration) -> Duration {
    let max_ms = (interval / 10).min(Duration::from_secs(5)).as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::random::<u64>() % max_ms)
}

/// Run the timer loop for a single check.
async fn run_timer(shared: Arc<Shared>, id: CheckId) {
    let Some(check) = shared.registry.get(id) else {
        return;
    };
    let mut shutdown = shared.shutdown.clone();
    if *shutdown.borrow() {
        return;
    }

    let start = Instant::now() + start_jitter(check.interval);
    let mut interval = tokio::time::interval_at(start, check.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                break;
            }
            _ = interval.tick() => {
                if dispatch(&shared, id).is_none() {
                    tracing::warn!(
                        check = %check.name,
                        phase = ?shared.slot(id).map(|s| s.phase()),
                        "Skipping tick, previous cycle still in flight"
                    );
                }
            }
        }
    }
    tracing::debug!(check = %check.name, "timer stopped");
}

/// One probe, evaluate, remediate cycle. Publishes every verdict and every
/// remediation outcome.
async fn run_cycle(shared: Arc<Shared>, id: CheckId, _guard: InFlight) {
    let (Some(check), Some(slot)) = (shared.registry.get(id), shared.slot(id)) else {
        return;
    };

    let Ok(_permit) = shared.pool.clone().acquire_owned().await else {
        return;
    };
    if *shared.shutdown.borrow() {
        return;
    }

    let mut state = slot.state.lock().await;
    let state = state.get_or_insert_with(|| CheckState::new(&check.policy));

    slot.set_phase(Phase::Probing);
    let result = run_probe(check.probe.clone(), &check.target, check.timeout).await;

    slot.set_phase(Phase::Evaluating);
    let eval = evaluate(&result, &state.history, &check.policy);
    state.history.record(eval.failing);

    // A first verdict of OK is not a transition
    let changed = match state.last_verdict {
        Some(previous) => previous != eval.verdict,
        None => eval.verdict != Verdict::Ok,
    };
    state.last_verdict = Some(eval.verdict);

    slot.update_summary(|s| {
        s.last_verdict = Some(eval.verdict);
        s.consecutive_failures = eval.consecutive_failures;
        s.last_checked = Some(result.timestamp);
    });

    shared.sink.publish(Event::Verdict {
        check: id,
        name: check.name.clone(),
        target: check.target.clone(),
        probe: check.probe_kind,
        verdict: eval.verdict,
        changed,
        consecutive_failures: eval.consecutive_failures,
        reasons: eval.reasons.clone(),
        result,
    });

    if eval.verdict != Verdict::Critical {
        return;
    }
    let Some(action) = &check.remediation else {
        return;
    };

    let now = Instant::now();
    let outcome = if state.record.ready(now) {
        slot.set_phase(Phase::Remediating);
        let ctx = VerdictContext {
            check: check.name.clone(),
            verdict: eval.verdict,
            consecutive_failures: eval.consecutive_failures,
            reasons: eval.reasons,
        };
        let outcome = run_remediation(action.clone(), &check.target, ctx, check.timeout).await;
        state.record.fire(now, check.cooldown);

        let cooldown_until = state.record.cooldown_until_utc;
        slot.update_summary(|s| {
            s.last_remediation = Some(Utc::now());
            s.cooldown_until = cooldown_until;
        });
        outcome
    } else {
        Outcome::Skipped(format!(
            "cooldown active, {}s remaining",
            state.record.remaining(now).as_secs()
        ))
    };

    if let Outcome::Failed(detail) = &outcome {
        tracing::warn!(check = %check.name, action = action.name(), "Remediation failed: {}", detail);
    }

    shared.sink.publish(Event::Remediation {
        check: id,
        name: check.name.clone(),
        target: check.target.clone(),
        action: action.name(),
        outcome,
        at: Utc::now(),
    });
}
