//! Result sink: every verdict and remediation outcome is published here.
//!
//! Publishing never blocks the scheduler. Events go into a bounded queue
//! with `try_send`; when the queue is full the event is dropped and a
//! warning is logged. A single dispatcher task drains the queue and hands
//! each event to every sink in order, so events for one check arrive in
//! the order they were produced.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::collab::{Notifier, Severity};
use crate::policy::Verdict;
use crate::probe::{ProbeResult, Target};
use crate::remediation::Outcome;
use crate::scheduler::CheckId;

/// Sink error types.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("event queue full")]
    Full,
    #[error("event queue closed")]
    Closed,
    #[error("delivery failed: {0}")]
    Delivery(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Verdict {
        check: CheckId,
        name: String,
        target: Target,
        probe: &'static str,
        verdict: Verdict,
        /// Verdict differs from the previous one for this check.
        changed: bool,
        consecutive_failures: u32,
        reasons: Vec<String>,
        result: ProbeResult,
    },
    Remediation {
        check: CheckId,
        name: String,
        target: Target,
        action: &'static str,
        outcome: Outcome,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn check(&self) -> CheckId {
        match self {
            Event::Verdict { check, .. } | Event::Remediation { check, .. } => *check,
        }
    }
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, event: &Event) -> Result<(), SinkError>;
}

/// Non-blocking publisher side of the event queue.
#[derive(Clone)]
pub struct SinkHandle {
    tx: mpsc::Sender<Event>,
}

impl SinkHandle {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn try_publish(&self, event: Event) -> Result<(), SinkError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }

    /// Publish best-effort; a dropped event is only logged.
    pub fn publish(&self, event: Event) {
        let check = event.check();
        if let Err(e) = self.try_publish(event) {
            tracing::warn!(%check, "dropping sink event: {}", e);
        }
    }
}

/// Drain `rx` into every sink until all publishers are gone.
pub fn spawn_dispatcher(mut rx: mpsc::Receiver<Event>, sinks: Vec<Arc<dyn ResultSink>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            for sink in &sinks {
                if let Err(e) = sink.deliver(&event).await {
                    tracing::warn!(sink = sink.name(), "event delivery failed: {}", e);
                }
            }
        }
        tracing::debug!("sink dispatcher stopped");
    })
}

/// Writes events to the log.
pub struct LogSink;

#[async_trait]
impl ResultSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, event: &Event) -> Result<(), SinkError> {
        match event {
            Event::Verdict {
                name,
                target,
                verdict,
                consecutive_failures,
                reasons,
                ..
            } => {
                let reasons = reasons.join("; ");
                match verdict {
                    Verdict::Ok => tracing::debug!(check = %name, %target, "OK"),
                    Verdict::Warn => tracing::warn!(
                        check = %name,
                        %target,
                        failures = consecutive_failures,
                        "WARN: {}",
                        reasons
                    ),
                    Verdict::Critical => tracing::error!(
                        check = %name,
                        %target,
                        failures = consecutive_failures,
                        "CRITICAL: {}",
                        reasons
                    ),
                }
            }
            Event::Remediation {
                name, action, outcome, ..
            } => match outcome {
                Outcome::Applied(detail) => tracing::info!(check = %name, action, "applied: {}", detail),
                Outcome::Skipped(detail) => tracing::info!(check = %name, action, "skipped: {}", detail),
                Outcome::Failed(detail) => tracing::error!(check = %name, action, "failed: {}", detail),
            },
        }
        Ok(())
    }
}

/// Keeps the most recent events in memory for the status API.
pub struct MemorySink {
    capacity: usize,
    events: Mutex<VecDeque<Event>>,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    /// Up to `limit` events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Event> {
        match self.events.lock() {
            Ok(events) => events.iter().rev().take(limit).cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn deliver(&self, event: &Event) -> Result<(), SinkError> {
        if self.capacity == 0 {
            return Ok(());
        }
        let mut events = self
            .events
            .lock()
            .map_err(|_| SinkError::Delivery("event buffer poisoned".to_string()))?;
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
        Ok(())
    }
}

/// Forwards verdict transitions and failed remediations to a notifier.
pub struct NotifierSink {
    notifier: Arc<dyn Notifier>,
    /// Checks whose remediation already sends the CRITICAL notification.
    self_notifying: HashSet<CheckId>,
}

impl NotifierSink {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            self_notifying: HashSet::new(),
        }
    }

    /// Skip the CRITICAL transition message for `checks`; their recovery
    /// and failed remediations are still forwarded.
    pub fn self_notifying(mut self, checks: impl IntoIterator<Item = CheckId>) -> Self {
        self.self_notifying.extend(checks);
        self
    }
}

#[async_trait]
impl ResultSink for NotifierSink {
    fn name(&self) -> &'static str {
        "notifier"
    }

    async fn deliver(&self, event: &Event) -> Result<(), SinkError> {
        let (message, severity) = match event {
            Event::Verdict {
                changed: true,
                check,
                name,
                target,
                verdict: Verdict::Critical,
                reasons,
                ..
            } => {
                if self.self_notifying.contains(check) {
                    return Ok(());
                }
                (format!("{} ({}) is CRITICAL: {}", name, target, reasons.join("; ")), Severity::Critical)
            }
            Event::Verdict {
                changed: true,
                name,
                target,
                verdict: Verdict::Ok,
                ..
            } => (format!("{} ({}) recovered", name, target), Severity::Info),
            Event::Remediation {
                name,
                action,
                outcome: Outcome::Failed(detail),
                ..
            } => (format!("{} on {} failed: {}", action, name, detail), Severity::Warning),
            _ => return Ok(()),
        };

        self.notifier
            .send(&message, severity)
            .await
            .map_err(|e| SinkError::Delivery(e.to_string()))
    }
}
