use anyhow::{Context, Result};
use failure_tracker::{FailureLedger, SessionFacts, TrackerSettings};
use serde::{Deserialize, Serialize};
use shared::protocol::{ClientNotification, DecryptionFailureCode, ErrorCategory, ReportProperties};
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayLine {
    pub at: i64,
    pub notification: ClientNotification,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub at: i64,
    pub category: ErrorCategory,
    pub code: DecryptionFailureCode,
    pub properties: ReportProperties,
}

pub fn parse_lines(raw: &str) -> Result<Vec<ReplayLine>> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str::<ReplayLine>(line)
                .with_context(|| format!("invalid replay entry on line {}", index + 1))
        })
        .collect()
}

/// Drives a ledger on a simulated clock with the tracker's check and track cadence.
pub struct Replay {
    ledger: FailureLedger,
    settings: TrackerSettings,
    trusts_own_identity: Option<bool>,
    next_check: Option<i64>,
    next_track: Option<i64>,
    logged_out: bool,
    reports: Vec<ReplayReport>,
}

impl Replay {
    pub fn new(
        settings: TrackerSettings,
        facts: SessionFacts,
        trusts_own_identity: Option<bool>,
    ) -> Self {
        let mut ledger = FailureLedger::new(settings.windows());
        ledger.bind_session(facts);
        ledger.set_user_trusts_own_identity(trusts_own_identity);
        Self {
            ledger,
            settings,
            trusts_own_identity,
            next_check: None,
            next_track: None,
            logged_out: false,
            reports: Vec::new(),
        }
    }

    fn check_period(&self) -> i64 {
        i64::try_from(self.settings.check_interval_ms).unwrap_or(i64::MAX)
    }

    fn track_period(&self) -> i64 {
        i64::try_from(self.settings.track_interval_ms).unwrap_or(i64::MAX)
    }

    /// Runs every timer tick scheduled at or before `at`, in time order.
    pub fn advance_to(&mut self, at: i64) {
        if self.logged_out {
            return;
        }
        if self.next_check.is_none() {
            self.next_check = Some(at.saturating_add(self.check_period()));
            self.next_track = Some(at.saturating_add(self.track_period()));
            return;
        }

        loop {
            let (Some(check), Some(track)) = (self.next_check, self.next_track) else {
                return;
            };
            let next = check.min(track);
            if next > at {
                return;
            }
            if check == next {
                self.ledger.check_failures(check);
                self.next_check = Some(check.saturating_add(self.check_period()));
            } else {
                self.flush(track);
                self.next_track = Some(track.saturating_add(self.track_period()));
            }
        }
    }

    pub fn apply(&mut self, line: &ReplayLine) {
        self.advance_to(line.at);
        if self.logged_out {
            return;
        }

        match &line.notification {
            ClientNotification::EventDecrypted(event) => {
                self.ledger.event_decrypted(event, line.at);
            }
            ClientNotification::EventVisible(event_id) => self.ledger.add_visible_event(event_id),
            ClientNotification::KeysChanged => {
                debug!(at = line.at, "utd: keys changed, keeping replayed verification status");
                self.ledger
                    .set_user_trusts_own_identity(self.trusts_own_identity);
            }
            ClientNotification::SessionLoggedOut => {
                info!(at = line.at, "utd: session logged out, discarding tracker state");
                self.ledger.reset();
                self.logged_out = true;
            }
        }
    }

    /// Runs the timers up to `end_at`, then confirms and flushes whatever is left.
    pub fn finish(mut self, end_at: i64) -> Vec<ReplayReport> {
        self.advance_to(end_at);
        if !self.logged_out {
            self.ledger.check_failures(i64::MAX);
            self.flush(end_at);
        }
        self.reports
    }

    fn flush(&mut self, at: i64) {
        let reports = &mut self.reports;
        self.ledger.track_failures(
            ErrorCategory::from_failure_code,
            |category, code, properties: &ReportProperties| {
                reports.push(ReplayReport {
                    at,
                    category,
                    code,
                    properties: properties.clone(),
                })
            },
        );
    }
}

/// Default end of the replay: long enough for the last failure to be swept and flushed.
pub fn default_end_at(last_at: i64, settings: &TrackerSettings) -> i64 {
    let intervals = settings
        .check_interval_ms
        .saturating_add(settings.track_interval_ms);
    last_at
        .saturating_add(settings.maximum_late_decryption_period_ms)
        .saturating_add(i64::try_from(intervals).unwrap_or(i64::MAX))
}

#[cfg(test)]
#[path = "tests/replay_tests.rs"]
mod tests;
