use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("a reporting function is required to construct the decryption failure tracker")]
    MissingReporter,
    #[error("an error-code mapping function is required to construct the decryption failure tracker")]
    MissingErrorMapper,
    #[error("decryption failure tracker is already bound to a client")]
    AlreadyStarted,
    #[error("invalid tracker settings: {0}")]
    InvalidSettings(String),
}
