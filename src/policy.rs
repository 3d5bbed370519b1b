//! Policy evaluation: probe results to verdicts.
//!
//! `evaluate` is pure. A result is *failing* when its status is not
//! Success or when any configured threshold is breached; failing results
//! escalate to CRITICAL once `consecutive_failures` of them arrive in a
//! row, and are WARN before that. A single passing result resets the run.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::probe::{ProbeResult, ProbeStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Ok,
    Warn,
    Critical,
}

/// A bound on one metric. Exactly one of `above` / `below` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub metric: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub above: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub below: Option<f64>,
}

impl Threshold {
    #[cfg(test)]
    pub fn above(metric: &str, limit: f64) -> Self {
        Self {
            metric: metric.to_string(),
            above: Some(limit),
            below: None,
        }
    }

    #[cfg(test)]
    pub fn below(metric: &str, limit: f64) -> Self {
        Self {
            metric: metric.to_string(),
            above: None,
            below: Some(limit),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.above.is_some() != self.below.is_some()
    }

    /// Describe the breach, if `result` breaches this threshold. A metric
    /// missing from the result is not a breach.
    fn breach(&self, result: &ProbeResult) -> Option<String> {
        let value = result.metric(&self.metric)?;
        match (self.above, self.below) {
            (Some(limit), _) if value > limit => Some(format!("{} {} > {}", self.metric, value, limit)),
            (_, Some(limit)) if value < limit => Some(format!("{} {} < {}", self.metric, value, limit)),
            _ => None,
        }
    }
}

fn default_consecutive_failures() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Failing evaluations in a row needed for CRITICAL.
    #[serde(default = "default_consecutive_failures")]
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub thresholds: Vec<Threshold>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            consecutive_failures: default_consecutive_failures(),
            thresholds: Vec::new(),
        }
    }
}

/// Bounded ring of whether each recent result was failing, for one check.
///
/// Only the last `capacity` results are kept. Failures that fall off the
/// ring while the run is unbroken are carried in a counter, so the run
/// length stays exact however long it gets.
#[derive(Debug, Clone)]
pub struct History {
    capacity: usize,
    entries: VecDeque<bool>,
    carried: u32,
}

impl History {
    pub fn new(capacity: u32) -> Self {
        let capacity = capacity.max(1) as usize;
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            carried: 0,
        }
    }

    pub fn record(&mut self, failing: bool) {
        if self.entries.len() == self.capacity {
            let dropped = self.entries.pop_front().unwrap_or(false);
            if dropped && self.entries.iter().all(|f| *f) {
                self.carried = self.carried.saturating_add(1);
            }
        }
        if !failing {
            self.carried = 0;
        }
        self.entries.push_back(failing);
    }

    /// Length of the trailing run of failing results.
    pub fn consecutive_failures(&self) -> u32 {
        let tail = self.entries.iter().rev().take_while(|f| **f).count();
        if tail == self.entries.len() {
            (tail as u32).saturating_add(self.carried)
        } else {
            tail as u32
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Result of evaluating one probe result.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub verdict: Verdict,
    /// Whether the result counts towards the failure run.
    pub failing: bool,
    /// Failure run length including this result; 0 when passing.
    pub consecutive_failures: u32,
    /// Human-readable reasons; empty when OK.
    pub reasons: Vec<String>,
}

pub fn evaluate(result: &ProbeResult, history: &History, policy: &Policy) -> Evaluation {
    let mut reasons = Vec::new();
    match &result.status {
        ProbeStatus::Success => {}
        ProbeStatus::Failure(reason) => reasons.push(reason.clone()),
        ProbeStatus::Timeout => reasons.push("timed out".to_string()),
    }
    // Threshold breaches count even when the status is Success
    reasons.extend(policy.thresholds.iter().filter_map(|t| t.breach(result)));

    if reasons.is_empty() {
        return Evaluation {
            verdict: Verdict::Ok,
            failing: false,
            consecutive_failures: 0,
            reasons,
        };
    }

    let consecutive_failures = history.consecutive_failures().saturating_add(1);
    let verdict = if consecutive_failures >= policy.consecutive_failures {
        Verdict::Critical
    } else {
        Verdict::Warn
    };

    Evaluation {
        verdict,
        failing: true,
        consecutive_failures,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{metric, Metrics};

    fn policy(n: u32, thresholds: Vec<Threshold>) -> Policy {
        Policy {
            consecutive_failures: n,
            thresholds,
        }
    }

    fn with_metric(name: &str, value: f64) -> ProbeResult {
        let mut metrics = Metrics::new();
        metrics.insert(name.to_string(), value);
        ProbeResult::success(metrics)
    }

    /// Evaluate and record, the way the scheduler does.
    fn step(result: ProbeResult, history: &mut History, policy: &Policy) -> Verdict {
        let eval = evaluate(&result, history, policy);
        history.record(eval.failing);
        eval.verdict
    }

    #[test]
    fn test_third_consecutive_failure_is_critical() {
        let policy = policy(3, vec![]);
        let mut history = History::new(3);
        assert_eq!(step(ProbeResult::failure("down"), &mut history, &policy), Verdict::Warn);
        assert_eq!(step(ProbeResult::timeout(), &mut history, &policy), Verdict::Warn);
        assert_eq!(step(ProbeResult::failure("down"), &mut history, &policy), Verdict::Critical);
        // Stays critical while failures continue
        assert_eq!(step(ProbeResult::failure("down"), &mut history, &policy), Verdict::Critical);
    }

    #[test]
    fn test_success_resets_count() {
        let policy = policy(3, vec![]);
        let mut history = History::new(3);
        step(ProbeResult::failure("down"), &mut history, &policy);
        step(ProbeResult::failure("down"), &mut history, &policy);
        assert_eq!(step(ProbeResult::success(Metrics::new()), &mut history, &policy), Verdict::Ok);
        assert_eq!(history.consecutive_failures(), 0);
        assert_eq!(step(ProbeResult::failure("down"), &mut history, &policy), Verdict::Warn);
        assert_eq!(step(ProbeResult::failure("down"), &mut history, &policy), Verdict::Warn);
        assert_eq!(step(ProbeResult::failure("down"), &mut history, &policy), Verdict::Critical);
    }

    #[test]
    fn test_expiry_breach_with_single_failure_policy() {
        let policy = policy(1, vec![Threshold::below(metric::DAYS_LEFT, 10.0)]);
        let history = History::new(1);
        let eval = evaluate(&with_metric(metric::DAYS_LEFT, 5.0), &history, &policy);
        assert_eq!(eval.verdict, Verdict::Critical);
        assert_eq!(eval.reasons, vec!["days_left 5 < 10".to_string()]);
    }

    #[test]
    fn test_breach_overrides_success_status() {
        let policy = policy(2, vec![Threshold::above(metric::PERCENT_USED, 90.0)]);
        let mut history = History::new(2);
        assert_eq!(step(with_metric(metric::PERCENT_USED, 95.0), &mut history, &policy), Verdict::Warn);
        assert_eq!(step(with_metric(metric::PERCENT_USED, 97.0), &mut history, &policy), Verdict::Critical);
        assert_eq!(step(with_metric(metric::PERCENT_USED, 40.0), &mut history, &policy), Verdict::Ok);
    }

    #[test]
    fn test_missing_metric_is_not_a_breach() {
        let policy = policy(1, vec![Threshold::below(metric::DAYS_LEFT, 10.0)]);
        let eval = evaluate(&ProbeResult::success(Metrics::new()), &History::new(1), &policy);
        assert_eq!(eval.verdict, Verdict::Ok);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = History::new(2);
        for _ in 0..5 {
            history.record(true);
        }
        assert_eq!(history.len(), 2);
        assert_eq!(history.consecutive_failures(), 5);
    }

    #[test]
    fn test_long_failure_run_is_counted_exactly() {
        let policy = policy(3, vec![]);
        let mut history = History::new(3);
        let mut last = None;
        for _ in 0..10 {
            let eval = evaluate(&ProbeResult::failure("down"), &history, &policy);
            history.record(eval.failing);
            last = Some(eval);
        }
        let last = last.unwrap();
        assert_eq!(last.verdict, Verdict::Critical);
        assert_eq!(last.consecutive_failures, 10);

        // A pass clears the carried run as well as the ring
        assert_eq!(step(ProbeResult::success(Metrics::new()), &mut history, &policy), Verdict::Ok);
        assert_eq!(history.consecutive_failures(), 0);
        assert_eq!(evaluate(&ProbeResult::failure("down"), &history, &policy).consecutive_failures, 1);
    }

    #[test]
    fn test_threshold_validity() {
        assert!(Threshold::above("x", 1.0).is_valid());
        let both = Threshold {
            metric: "x".to_string(),
            above: Some(1.0),
            below: Some(0.0),
        };
        assert!(!both.is_valid());
    }
}
