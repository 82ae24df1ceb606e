use std::collections::{HashMap, HashSet};

use shared::{
    domain::{is_federated, EventId},
    protocol::{
        BaseProperties, DecryptionEvent, DecryptionFailureCode, ErrorCategory, ReportProperties,
    },
};
use tracing::{debug, trace};

use crate::client::SessionFacts;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerWindows {
    pub grace_period_ms: i64,
    pub maximum_late_decryption_period_ms: i64,
}

impl Default for LedgerWindows {
    fn default() -> Self {
        Self {
            grace_period_ms: 4_000,
            maximum_late_decryption_period_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptionFailure {
    pub failed_event_id: EventId,
    pub error_code: DecryptionFailureCode,
    /// First time the failure was observed, in milliseconds.
    pub timestamp: i64,
    pub is_federated: Option<bool>,
    pub was_visible_to_user: bool,
    pub user_trusts_own_identity: Option<bool>,
    /// Set only when the event decrypted late but inside the observation window.
    pub time_to_decrypt_millis: Option<i64>,
}

impl DecryptionFailure {
    pub fn new(
        failed_event_id: EventId,
        error_code: DecryptionFailureCode,
        timestamp: i64,
    ) -> Self {
        Self {
            failed_event_id,
            error_code,
            timestamp,
            is_federated: None,
            was_visible_to_user: false,
            user_trusts_own_identity: None,
            time_to_decrypt_millis: None,
        }
    }

    pub fn report_properties(&self, base: &BaseProperties) -> ReportProperties {
        ReportProperties {
            time_to_decrypt_millis: self
                .time_to_decrypt_millis
                .unwrap_or(ReportProperties::UNDECRYPTABLE),
            was_visible_to_user: self.was_visible_to_user,
            is_federated: self.is_federated,
            user_trusts_own_identity: self.user_trusts_own_identity,
            base: base.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReport {
    pub event_id: EventId,
    pub error_code: DecryptionFailureCode,
    pub properties: ReportProperties,
}

/// In-memory bookkeeping of decryption failures for one client session.
///
/// Every method takes the current time explicitly, so the ledger itself never
/// reads a clock. An event id lives in at most one of the pending failures and
/// the tracked set, and once tracked it is never accepted again.
#[derive(Debug, Default)]
pub struct FailureLedger {
    windows: LedgerWindows,
    failures: HashMap<EventId, DecryptionFailure>,
    visible_events: HashSet<EventId>,
    failures_to_report: Vec<DecryptionFailure>,
    tracked_events: HashSet<EventId>,
    session: SessionFacts,
    user_trusts_own_identity: Option<bool>,
}

impl FailureLedger {
    pub fn new(windows: LedgerWindows) -> Self {
        Self {
            windows,
            ..Self::default()
        }
    }

    pub fn bind_session(&mut self, session: SessionFacts) {
        self.session = session;
    }

    pub fn base_properties(&self) -> &BaseProperties {
        &self.session.base_properties
    }

    pub fn user_trusts_own_identity(&self) -> Option<bool> {
        self.user_trusts_own_identity
    }

    pub fn set_user_trusts_own_identity(&mut self, trusted: Option<bool>) {
        self.user_trusts_own_identity = trusted;
    }

    pub fn event_decrypted(&mut self, event: &DecryptionEvent, now: i64) {
        if !event.is_group_encrypted() {
            return;
        }

        let Some(error_code) = event.failure_reason else {
            self.remove_decryption_failures_for_event(&event.event_id, now);
            return;
        };

        if self.tracked_events.contains(&event.event_id) {
            return;
        }

        let timestamp = self
            .failures
            .get(&event.event_id)
            .map_or(now, |existing| existing.timestamp);

        let federated = is_federated(event.sender.as_ref(), self.session.user_domain.as_deref());
        let failure = DecryptionFailure {
            failed_event_id: event.event_id.clone(),
            error_code,
            timestamp,
            is_federated: federated,
            was_visible_to_user: self.visible_events.contains(&event.event_id),
            user_trusts_own_identity: self.user_trusts_own_identity,
            time_to_decrypt_millis: None,
        };
        self.add_decryption_failure(failure);
    }

    pub fn add_visible_event(&mut self, event_id: &EventId) {
        if self.tracked_events.contains(event_id) {
            return;
        }

        if let Some(failure) = self.failures.get_mut(event_id) {
            failure.was_visible_to_user = true;
        }
        self.visible_events.insert(event_id.clone());
    }

    pub fn add_decryption_failure(&mut self, failure: DecryptionFailure) {
        if self.tracked_events.contains(&failure.failed_event_id) {
            return;
        }

        trace!(
            event_id = %failure.failed_event_id,
            code = %failure.error_code,
            "utd: recording decryption failure"
        );
        self.failures.insert(failure.failed_event_id.clone(), failure);
    }

    pub fn remove_decryption_failures_for_event(&mut self, event_id: &EventId, now: i64) {
        let Some(mut failure) = self.failures.remove(event_id) else {
            return;
        };

        let elapsed = now.saturating_sub(failure.timestamp);
        if elapsed < self.windows.grace_period_ms {
            debug!(event_id = %event_id, elapsed, "utd: decrypted within grace period");
            return;
        }

        if elapsed <= self.windows.maximum_late_decryption_period_ms {
            failure.time_to_decrypt_millis = Some(elapsed);
            debug!(event_id = %event_id, elapsed, "utd: late decryption");
        } else {
            debug!(event_id = %event_id, elapsed, "utd: decrypted after the late window");
        }

        self.mark_for_report(failure);
    }

    pub fn check_failures(&mut self, now: i64) {
        let window = self.windows.maximum_late_decryption_period_ms;
        let ready = self
            .failures
            .iter()
            .filter(|(_, failure)| {
                failure.time_to_decrypt_millis.is_some()
                    || now > failure.timestamp.saturating_add(window)
            })
            .map(|(event_id, _)| event_id.clone())
            .collect::<Vec<_>>();

        for event_id in ready {
            if let Some(failure) = self.failures.remove(&event_id) {
                self.mark_for_report(failure);
            }
        }
    }

    fn mark_for_report(&mut self, failure: DecryptionFailure) {
        self.tracked_events.insert(failure.failed_event_id.clone());
        self.visible_events.remove(&failure.failed_event_id);
        self.failures_to_report.push(failure);
    }

    /// Hands out every confirmed failure exactly once, with its report payload.
    pub fn drain_reports(&mut self) -> Vec<PendingReport> {
        let base = &self.session.base_properties;
        self.failures_to_report
            .drain(..)
            .map(|failure| PendingReport {
                properties: failure.report_properties(base),
                error_code: failure.error_code,
                event_id: failure.failed_event_id,
            })
            .collect()
    }

    /// Drains the confirmed failures through a mapping and a reporting function.
    pub fn track_failures<M, R>(&mut self, mut map_error: M, mut report: R) -> usize
    where
        M: FnMut(DecryptionFailureCode) -> ErrorCategory,
        R: FnMut(ErrorCategory, DecryptionFailureCode, &ReportProperties),
    {
        let reports = self.drain_reports();
        for pending in &reports {
            report(
                map_error(pending.error_code),
                pending.error_code,
                &pending.properties,
            );
        }
        reports.len()
    }

    /// Drops every collection and the cached verification status.
    pub fn reset(&mut self) {
        self.failures.clear();
        self.visible_events.clear();
        self.failures_to_report.clear();
        self.tracked_events.clear();
        self.user_trusts_own_identity = None;
    }

    pub fn pending_failure(&self, event_id: &EventId) -> Option<&DecryptionFailure> {
        self.failures.get(event_id)
    }

    pub fn pending_count(&self) -> usize {
        self.failures.len()
    }

    pub fn ready_count(&self) -> usize {
        self.failures_to_report.len()
    }

    pub fn is_tracked(&self, event_id: &EventId) -> bool {
        self.tracked_events.contains(event_id)
    }

    pub fn is_visible(&self, event_id: &EventId) -> bool {
        self.visible_events.contains(event_id)
    }
}

#[cfg(test)]
#[path = "tests/ledger_tests.rs"]
mod tests;
