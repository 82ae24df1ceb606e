use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{EventId, RoomId, UserId};

/// Wire algorithm of group-encrypted room messages; the only one tracked.
pub const MEGOLM_ALGORITHM: &str = "m.megolm.v1.aes-sha2";

/// Raw reason reported by the protocol client for a message it could not decrypt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecryptionFailureCode {
    MegolmUnknownInboundSessionId,
    MegolmKeyWithheld,
    MegolmKeyWithheldForUnverifiedDevice,
    OlmUnknownMessageIndex,
    HistoricalMessageNoKeyBackup,
    HistoricalMessageBackupUnconfigured,
    HistoricalMessageWorkingBackup,
    HistoricalMessageUserNotJoined,
    SenderIdentityPreviouslyVerified,
    UnsignedSenderDevice,
    UnknownSenderDevice,
    UnknownError,
}

impl DecryptionFailureCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MegolmUnknownInboundSessionId => "MEGOLM_UNKNOWN_INBOUND_SESSION_ID",
            Self::MegolmKeyWithheld => "MEGOLM_KEY_WITHHELD",
            Self::MegolmKeyWithheldForUnverifiedDevice => {
                "MEGOLM_KEY_WITHHELD_FOR_UNVERIFIED_DEVICE"
            }
            Self::OlmUnknownMessageIndex => "OLM_UNKNOWN_MESSAGE_INDEX",
            Self::HistoricalMessageNoKeyBackup => "HISTORICAL_MESSAGE_NO_KEY_BACKUP",
            Self::HistoricalMessageBackupUnconfigured => "HISTORICAL_MESSAGE_BACKUP_UNCONFIGURED",
            Self::HistoricalMessageWorkingBackup => "HISTORICAL_MESSAGE_WORKING_BACKUP",
            Self::HistoricalMessageUserNotJoined => "HISTORICAL_MESSAGE_USER_NOT_JOINED",
            Self::SenderIdentityPreviouslyVerified => "SENDER_IDENTITY_PREVIOUSLY_VERIFIED",
            Self::UnsignedSenderDevice => "UNSIGNED_SENDER_DEVICE",
            Self::UnknownSenderDevice => "UNKNOWN_SENDER_DEVICE",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for DecryptionFailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse analytics bucket a raw failure code is reported under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorCategory {
    OlmKeysNotSentError,
    OlmIndexError,
    HistoricalMessage,
    ExpectedDueToMembership,
    RoomKeysWithheldForUnverifiedDevice,
    ExpectedVerificationViolation,
    ExpectedSentByInsecureDevice,
    UnknownError,
}

impl ErrorCategory {
    /// Default mapping from raw failure codes to analytics categories.
    pub fn from_failure_code(code: DecryptionFailureCode) -> Self {
        use DecryptionFailureCode as Code;

        match code {
            Code::MegolmUnknownInboundSessionId | Code::MegolmKeyWithheld => {
                Self::OlmKeysNotSentError
            }
            Code::MegolmKeyWithheldForUnverifiedDevice => {
                Self::RoomKeysWithheldForUnverifiedDevice
            }
            Code::OlmUnknownMessageIndex => Self::OlmIndexError,
            Code::HistoricalMessageNoKeyBackup
            | Code::HistoricalMessageBackupUnconfigured
            | Code::HistoricalMessageWorkingBackup => Self::HistoricalMessage,
            Code::HistoricalMessageUserNotJoined => Self::ExpectedDueToMembership,
            Code::SenderIdentityPreviouslyVerified => Self::ExpectedVerificationViolation,
            Code::UnsignedSenderDevice | Code::UnknownSenderDevice => {
                Self::ExpectedSentByInsecureDevice
            }
            _ => Self::UnknownError,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OlmKeysNotSentError => "OlmKeysNotSentError",
            Self::OlmIndexError => "OlmIndexError",
            Self::HistoricalMessage => "HistoricalMessage",
            Self::ExpectedDueToMembership => "ExpectedDueToMembership",
            Self::RoomKeysWithheldForUnverifiedDevice => "RoomKeysWithheldForUnverifiedDevice",
            Self::ExpectedVerificationViolation => "ExpectedVerificationViolation",
            Self::ExpectedSentByInsecureDevice => "ExpectedSentByInsecureDevice",
            Self::UnknownError => "UnknownError",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one decryption attempt, as announced by the protocol client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionEvent {
    pub event_id: EventId,
    pub room_id: RoomId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<DecryptionFailureCode>,
}

impl DecryptionEvent {
    pub fn is_group_encrypted(&self) -> bool {
        self.algorithm.as_deref() == Some(MEGOLM_ALGORITHM)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientNotification {
    EventDecrypted(DecryptionEvent),
    EventVisible(EventId),
    KeysChanged,
    SessionLoggedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CryptoSdk {
    Rust,
    Legacy,
}

/// Client-level facts attached to every report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseProperties {
    #[serde(
        rename = "isMatrixDotOrg",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub is_matrix_dot_org: Option<bool>,
    #[serde(rename = "cryptoSDK", default, skip_serializing_if = "Option::is_none")]
    pub crypto_sdk: Option<CryptoSdk>,
}

/// Payload handed to the reporting function for one failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportProperties {
    /// Milliseconds until a late decryption, or `-1` when it never decrypted in time.
    pub time_to_decrypt_millis: i64,
    pub was_visible_to_user: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_federated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_trusts_own_identity: Option<bool>,
    #[serde(flatten)]
    pub base: BaseProperties,
}

impl ReportProperties {
    pub const UNDECRYPTABLE: i64 = -1;
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
