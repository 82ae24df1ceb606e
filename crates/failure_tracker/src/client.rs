use async_trait::async_trait;
use shared::protocol::{BaseProperties, ClientNotification, CryptoSdk};
use tokio::sync::broadcast;

use crate::config::TrackerSettings;

/// The protocol client the tracker observes.
#[async_trait]
pub trait CryptoClient: Send + Sync {
    /// Server part of the local user's id, when logged in.
    fn user_domain(&self) -> Option<String>;
    /// Version string of the crypto backend; `None` when encryption is disabled.
    fn crypto_version(&self) -> Option<String>;
    async fn user_trusts_own_identity(&self) -> anyhow::Result<bool>;
    fn subscribe_notifications(&self) -> broadcast::Receiver<ClientNotification>;
}

/// Facts about the bound client, recomputed on every `start`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFacts {
    pub user_domain: Option<String>,
    pub base_properties: BaseProperties,
}

impl SessionFacts {
    pub fn compute(
        user_domain: Option<String>,
        crypto_version: Option<&str>,
        settings: &TrackerSettings,
    ) -> Self {
        let is_matrix_dot_org = user_domain
            .as_deref()
            .map(|domain| domain == settings.well_known_provider_domain);
        let crypto_sdk = crypto_version.map(|version| {
            if version.starts_with(&settings.rust_crypto_version_prefix) {
                CryptoSdk::Rust
            } else {
                CryptoSdk::Legacy
            }
        });

        Self {
            user_domain,
            base_properties: BaseProperties {
                is_matrix_dot_org,
                crypto_sdk,
            },
        }
    }

    pub fn from_client(client: &dyn CryptoClient, settings: &TrackerSettings) -> Self {
        Self::compute(
            client.user_domain(),
            client.crypto_version().as_deref(),
            settings,
        )
    }
}
