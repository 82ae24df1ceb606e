use std::sync::Arc;

use shared::protocol::{DecryptionFailureCode, ErrorCategory, ReportProperties};
use tracing::{info, warn};

/// Receives one confirmed failure at flush time: mapped category, raw code, payload.
pub type ReportFn = Arc<dyn Fn(ErrorCategory, DecryptionFailureCode, &ReportProperties) + Send + Sync>;

/// Groups raw failure codes into analytics categories. Must be total.
pub type ErrorMapFn = Arc<dyn Fn(DecryptionFailureCode) -> ErrorCategory + Send + Sync>;

/// Reporting function that writes each report to the `tracing` pipeline.
pub fn tracing_reporter(
) -> impl Fn(ErrorCategory, DecryptionFailureCode, &ReportProperties) + Send + Sync + 'static {
    |category: ErrorCategory, code: DecryptionFailureCode, properties: &ReportProperties| {
        match serde_json::to_string(properties) {
            Ok(properties) => info!(
                category = %category,
                code = %code,
                properties = %properties,
                "utd: decryption failure"
            ),
            Err(err) => warn!(
                category = %category,
                code = %code,
                "utd: failed to encode report properties: {err}"
            ),
        }
    }
}
