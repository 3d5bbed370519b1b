//! Per-check runtime state owned by the scheduler.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::config::MAX_DURATION_SECONDS;
use crate::policy::{History, Policy, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Phase {
    Idle = 0,
    Probing = 1,
    Evaluating = 2,
    Remediating = 3,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Phase::Probing,
            2 => Phase::Evaluating,
            3 => Phase::Remediating,
            _ => Phase::Idle,
        }
    }
}

/// Longest cooldown the scheduler honours.
pub const MAX_COOLDOWN: Duration = Duration::from_secs(MAX_DURATION_SECONDS);

/// Used only if the clock cannot represent `now + MAX_COOLDOWN`.
const FALLBACK_COOLDOWN: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// When a check's remediation last fired and when it may fire again.
#[derive(Debug, Clone, Default)]
pub struct RemediationRecord {
    pub last_fired_at: Option<Instant>,
    pub in_cooldown_until: Option<Instant>,
    /// Wall-clock mirror of `in_cooldown_until` for reporting.
    pub cooldown_until_utc: Option<DateTime<Utc>>,
}

impl RemediationRecord {
    pub fn ready(&self, now: Instant) -> bool {
        self.in_cooldown_until.map_or(true, |until| now >= until)
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.in_cooldown_until
            .map_or(Duration::ZERO, |until| until.saturating_duration_since(now))
    }

    /// Start a cooldown of `cooldown`, capped at [`MAX_COOLDOWN`].
    pub fn fire(&mut self, now: Instant, cooldown: Duration) {
        let cooldown = cooldown.min(MAX_COOLDOWN);
        self.last_fired_at = Some(now);
        self.in_cooldown_until = now
            .checked_add(cooldown)
            .or_else(|| now.checked_add(FALLBACK_COOLDOWN));
        self.cooldown_until_utc = chrono::Duration::from_std(cooldown)
            .ok()
            .and_then(|c| Utc::now().checked_add_signed(c));
    }
}

/// History and cooldown for one check, created on its first evaluation.
#[derive(Debug)]
pub struct CheckState {
    pub history: History,
    pub record: RemediationRecord,
    pub last_verdict: Option<Verdict>,
}

impl CheckState {
    pub fn new(policy: &Policy) -> Self {
        Self {
            history: History::new(policy.consecutive_failures),
            record: RemediationRecord::default(),
            last_verdict: None,
        }
    }
}

/// Latest figures for the status API.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub last_verdict: Option<Verdict>,
    pub consecutive_failures: u32,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_remediation: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
}

/// Scheduler-side slot for one check.
#[derive(Default)]
pub struct CheckSlot {
    in_flight: AtomicBool,
    phase: AtomicU8,
    /// Locked for a whole cycle, so a force-run late tick cannot
    /// interleave with the previous one.
    pub state: tokio::sync::Mutex<Option<CheckState>>,
    pub cycle: Mutex<Option<AbortHandle>>,
    pub summary: Mutex<Summary>,
}

impl CheckSlot {
    /// Claim the slot. Returns false if a cycle is already in flight.
    pub fn try_claim(&self) -> bool {
        !self.in_flight.swap(true, Ordering::AcqRel)
    }

    pub fn release(&self) {
        self.set_phase(Phase::Idle);
        self.in_flight.store(false, Ordering::Release);
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub fn summary(&self) -> Summary {
        self.summary.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn update_summary(&self, f: impl FnOnce(&mut Summary)) {
        if let Ok(mut summary) = self.summary.lock() {
            f(&mut summary);
        }
    }

    pub fn abort_cycle(&self) {
        if let Some(handle) = self.cycle.lock().ok().and_then(|mut c| c.take()) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_exclusive() {
        let slot = CheckSlot::default();
        assert!(slot.try_claim());
        assert!(!slot.try_claim());
        slot.set_phase(Phase::Probing);
        assert_eq!(slot.phase(), Phase::Probing);
        slot.release();
        assert_eq!(slot.phase(), Phase::Idle);
        assert!(slot.try_claim());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_window() {
        let mut record = RemediationRecord::default();
        let start = Instant::now();
        assert!(record.ready(start));

        record.fire(start, Duration::from_secs(300));
        assert!(!record.ready(start + Duration::from_secs(100)));
        assert_eq!(record.remaining(start + Duration::from_secs(100)), Duration::from_secs(200));
        assert!(record.ready(start + Duration::from_secs(300)));
        assert!(record.cooldown_until_utc.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_cooldown_is_capped() {
        let mut record = RemediationRecord::default();
        let start = Instant::now();

        record.fire(start, Duration::from_secs(u64::MAX));
        assert!(!record.ready(start + Duration::from_secs(10 * 365 * 24 * 60 * 60)));
        assert!(record.remaining(start) <= MAX_COOLDOWN);
        assert!(record.cooldown_until_utc.is_some());
    }
}
