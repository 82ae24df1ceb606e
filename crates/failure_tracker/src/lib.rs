use std::{sync::Arc, time::Duration};

use chrono::Utc;
use shared::{
    domain::EventId,
    error::TrackerError,
    protocol::{
        ClientNotification, DecryptionEvent, DecryptionFailureCode, ErrorCategory,
        ReportProperties,
    },
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

pub mod client;
pub mod config;
pub mod ledger;
pub mod reporter;
pub mod verification;

pub use client::{CryptoClient, SessionFacts};
pub use config::{load_settings, TrackerSettings};
pub use ledger::{DecryptionFailure, FailureLedger, LedgerWindows, PendingReport};
pub use reporter::{tracing_reporter, ErrorMapFn, ReportFn};

use verification::{spawn_verification_recheck, CoalescingTask, CoalescingTrigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sweep {
    Check,
    Track,
}

struct ActiveSession {
    relay_task: JoinHandle<()>,
    check_task: JoinHandle<()>,
    track_task: JoinHandle<()>,
    recheck: CoalescingTask,
}

#[derive(Default)]
pub struct DecryptionFailureTrackerBuilder {
    reporter: Option<ReportFn>,
    error_mapper: Option<ErrorMapFn>,
    settings: TrackerSettings,
}

impl DecryptionFailureTrackerBuilder {
    pub fn reporter<F>(mut self, reporter: F) -> Self
    where
        F: Fn(ErrorCategory, DecryptionFailureCode, &ReportProperties) + Send + Sync + 'static,
    {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    pub fn error_mapper<F>(mut self, error_mapper: F) -> Self
    where
        F: Fn(DecryptionFailureCode) -> ErrorCategory + Send + Sync + 'static,
    {
        self.error_mapper = Some(Arc::new(error_mapper));
        self
    }

    pub fn settings(mut self, settings: TrackerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<Arc<DecryptionFailureTracker>, TrackerError> {
        let reporter = self.reporter.ok_or(TrackerError::MissingReporter)?;
        let error_mapper = self.error_mapper.ok_or(TrackerError::MissingErrorMapper)?;
        self.settings.validate()?;

        Ok(DecryptionFailureTracker::with_parts(
            self.settings,
            reporter,
            error_mapper,
        ))
    }
}

/// Aggregates undecryptable-message outcomes of one client session and reports
/// each confirmed failure at most once.
///
/// Owned by the application's composition root and shared by handle with
/// whatever delivers decryption and visibility notifications.
pub struct DecryptionFailureTracker {
    settings: TrackerSettings,
    reporter: ReportFn,
    error_mapper: ErrorMapFn,
    ledger: Arc<Mutex<FailureLedger>>,
    session: Mutex<Option<ActiveSession>>,
    clock_origin: Instant,
    clock_origin_millis: i64,
}

impl DecryptionFailureTracker {
    pub fn builder() -> DecryptionFailureTrackerBuilder {
        DecryptionFailureTrackerBuilder::default()
    }

    pub fn new<R, M>(reporter: R, error_mapper: M) -> Arc<Self>
    where
        R: Fn(ErrorCategory, DecryptionFailureCode, &ReportProperties) + Send + Sync + 'static,
        M: Fn(DecryptionFailureCode) -> ErrorCategory + Send + Sync + 'static,
    {
        Self::with_parts(
            TrackerSettings::default(),
            Arc::new(reporter),
            Arc::new(error_mapper),
        )
    }

    fn with_parts(
        settings: TrackerSettings,
        reporter: ReportFn,
        error_mapper: ErrorMapFn,
    ) -> Arc<Self> {
        Arc::new(Self {
            ledger: Arc::new(Mutex::new(FailureLedger::new(settings.windows()))),
            settings,
            reporter,
            error_mapper,
            session: Mutex::new(None),
            clock_origin: Instant::now(),
            clock_origin_millis: Utc::now().timestamp_millis(),
        })
    }

    /// Wall-clock milliseconds, advanced by the runtime's monotonic clock.
    pub fn now_millis(&self) -> i64 {
        let elapsed = i64::try_from(self.clock_origin.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.clock_origin_millis.saturating_add(elapsed)
    }

    pub async fn is_started(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Binds the tracker to `client`, subscribes to its notifications and
    /// starts the check and track timers.
    pub async fn start(
        self: &Arc<Self>,
        client: Arc<dyn CryptoClient>,
    ) -> Result<(), TrackerError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(TrackerError::AlreadyStarted);
        }

        let facts = SessionFacts::from_client(client.as_ref(), &self.settings);
        info!(
            user_domain = ?facts.user_domain,
            is_matrix_dot_org = ?facts.base_properties.is_matrix_dot_org,
            crypto_sdk = ?facts.base_properties.crypto_sdk,
            "utd: tracker started"
        );
        self.ledger.lock().await.bind_session(facts);

        let recheck = spawn_verification_recheck(Arc::clone(&client), Arc::clone(&self.ledger));
        recheck.request();

        let notifications = client.subscribe_notifications();
        *session = Some(ActiveSession {
            relay_task: self.spawn_relay_task(notifications, recheck.trigger()),
            check_task: self.spawn_sweep(Sweep::Check, self.settings.check_interval()),
            track_task: self.spawn_sweep(Sweep::Track, self.settings.track_interval()),
            recheck,
        });
        Ok(())
    }

    /// Unbinds the client and drops all state. Failures waiting to be
    /// reported are discarded, not flushed.
    pub async fn stop(&self) {
        let mut session = self.session.lock().await;
        let Some(active) = session.take() else {
            return;
        };

        // The logout path runs stop on the relay task itself, which then
        // handles no further notifications.
        if tokio::task::try_id() != Some(active.relay_task.id()) {
            active.relay_task.abort();
            let _ = active.relay_task.await;
        }
        active.check_task.abort();
        active.track_task.abort();
        let _ = active.check_task.await;
        let _ = active.track_task.await;
        active.recheck.shutdown().await;

        self.ledger.lock().await.reset();
        drop(session);
        info!("utd: tracker stopped");
    }

    pub async fn event_decrypted(&self, event: &DecryptionEvent, now: i64) {
        self.ledger.lock().await.event_decrypted(event, now);
    }

    pub async fn add_visible_event(&self, event_id: &EventId) {
        self.ledger.lock().await.add_visible_event(event_id);
    }

    pub async fn remove_decryption_failures_for_event(&self, event_id: &EventId, now: i64) {
        self.ledger
            .lock()
            .await
            .remove_decryption_failures_for_event(event_id, now);
    }

    pub async fn check_failures(&self, now: i64) {
        self.ledger.lock().await.check_failures(now);
    }

    /// Reports every confirmed failure and forgets it. Returns the number reported.
    pub async fn track_failures(&self) -> usize {
        let reports = self.ledger.lock().await.drain_reports();
        for pending in &reports {
            let category = (self.error_mapper)(pending.error_code);
            (self.reporter)(category, pending.error_code, &pending.properties);
        }
        if !reports.is_empty() {
            debug!(count = reports.len(), "utd: reported decryption failures");
        }
        reports.len()
    }

    fn spawn_relay_task(
        self: &Arc<Self>,
        mut notifications: broadcast::Receiver<ClientNotification>,
        recheck: CoalescingTrigger,
    ) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(ClientNotification::EventDecrypted(event)) => {
                        tracker.event_decrypted(&event, tracker.now_millis()).await;
                    }
                    Ok(ClientNotification::EventVisible(event_id)) => {
                        tracker.add_visible_event(&event_id).await;
                    }
                    Ok(ClientNotification::KeysChanged) => recheck.request(),
                    Ok(ClientNotification::SessionLoggedOut) => {
                        info!("utd: session logged out");
                        tracker.stop().await;
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "utd: client notification stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("utd: client notification stream closed");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_sweep(self: &Arc<Self>, sweep: Sweep, period: Duration) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match sweep {
                    Sweep::Check => tracker.check_failures(tracker.now_millis()).await,
                    Sweep::Track => {
                        tracker.track_failures().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
