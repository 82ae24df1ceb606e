use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{EventId, RoomId, UserId},
    protocol::{
        ClientNotification, DecryptionEvent, DecryptionFailureCode, ErrorCategory,
        ReportProperties, MEGOLM_ALGORITHM,
    },
};
use tokio::sync::{broadcast, Mutex, Semaphore};

use crate::{client::CryptoClient, config::TrackerSettings, DecryptionFailureTracker};

pub struct FakeCryptoClient {
    domain: Option<String>,
    crypto_version: Option<String>,
    trust: Mutex<std::result::Result<bool, String>>,
    lookup_gate: Option<Arc<Semaphore>>,
    lookups: AtomicUsize,
    notifications: broadcast::Sender<ClientNotification>,
}

impl FakeCryptoClient {
    pub fn new(domain: &str) -> Arc<Self> {
        Self::build(Some(domain.to_string()), None)
    }

    pub fn gated(domain: &str, gate: Arc<Semaphore>) -> Arc<Self> {
        Self::build(Some(domain.to_string()), Some(gate))
    }

    fn build(domain: Option<String>, lookup_gate: Option<Arc<Semaphore>>) -> Arc<Self> {
        let (notifications, _) = broadcast::channel(4_096);
        Arc::new(Self {
            domain,
            crypto_version: Some("Rust SDK 0.7.0 (test)".into()),
            trust: Mutex::new(Ok(true)),
            lookup_gate,
            lookups: AtomicUsize::new(0),
            notifications,
        })
    }

    pub async fn set_trust(&self, trust: std::result::Result<bool, &str>) {
        *self.trust.lock().await = trust.map_err(str::to_string);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn send(&self, notification: ClientNotification) {
        self.notifications
            .send(notification)
            .expect("tracker should be subscribed");
    }
}

#[async_trait]
impl CryptoClient for FakeCryptoClient {
    fn user_domain(&self) -> Option<String> {
        self.domain.clone()
    }

    fn crypto_version(&self) -> Option<String> {
        self.crypto_version.clone()
    }

    async fn user_trusts_own_identity(&self) -> Result<bool> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.lookup_gate {
            gate.acquire().await.expect("lookup gate closed").forget();
        }
        self.trust.lock().await.clone().map_err(|err| anyhow!(err))
    }

    fn subscribe_notifications(&self) -> broadcast::Receiver<ClientNotification> {
        self.notifications.subscribe()
    }
}

pub fn failed_event(event_id: &str, sender: &str, code: DecryptionFailureCode) -> DecryptionEvent {
    DecryptionEvent {
        event_id: EventId::from(event_id),
        room_id: RoomId::from("!room:home.example"),
        sender: Some(UserId::from(sender)),
        algorithm: Some(MEGOLM_ALGORITHM.to_string()),
        failure_reason: Some(code),
    }
}

pub fn decrypted_event(event_id: &str, sender: &str) -> DecryptionEvent {
    DecryptionEvent {
        failure_reason: None,
        ..failed_event(event_id, sender, DecryptionFailureCode::UnknownError)
    }
}

pub type Reported = (ErrorCategory, DecryptionFailureCode, ReportProperties);

/// Tracker whose reports are collected into the returned log.
pub fn recording_tracker(
    settings: TrackerSettings,
) -> (Arc<DecryptionFailureTracker>, Arc<std::sync::Mutex<Vec<Reported>>>) {
    let log = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let tracker = DecryptionFailureTracker::builder()
        .settings(settings)
        .error_mapper(ErrorCategory::from_failure_code)
        .reporter(
            move |category: ErrorCategory,
                  code: DecryptionFailureCode,
                  properties: &ReportProperties| {
                sink.lock()
                    .expect("report log poisoned")
                    .push((category, code, properties.clone()));
            },
        )
        .build()
        .expect("valid tracker");
    (tracker, log)
}
