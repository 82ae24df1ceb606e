use super::*;

use shared::protocol::CryptoSdk;

fn replay() -> Replay {
    let settings = TrackerSettings::default();
    let facts = SessionFacts::compute(
        Some("home.example".into()),
        Some("Rust SDK 0.7.0"),
        &settings,
    );
    Replay::new(settings, facts, Some(true))
}

fn failure(at: i64, event_id: &str, sender: &str, code: &str) -> String {
    format!(
        r#"{{"at":{at},"notification":{{"type":"event_decrypted","payload":{{"event_id":"{event_id}","room_id":"!r:home.example","sender":"{sender}","algorithm":"m.megolm.v1.aes-sha2","failure_reason":"{code}"}}}}}}"#
    )
}

fn decrypted(at: i64, event_id: &str) -> String {
    format!(
        r#"{{"at":{at},"notification":{{"type":"event_decrypted","payload":{{"event_id":"{event_id}","room_id":"!r:home.example","sender":"@a:home.example","algorithm":"m.megolm.v1.aes-sha2"}}}}}}"#
    )
}

fn run(entries: &[String], end_at: i64) -> Vec<ReplayReport> {
    let lines = parse_lines(&entries.join("\n")).expect("parse replay");
    let mut replay = replay();
    for line in &lines {
        replay.apply(line);
    }
    replay.finish(end_at)
}

#[test]
fn parse_reports_the_offending_line() {
    let raw = format!("{}\n\nnot json\n", decrypted(0, "$1"));
    let err = parse_lines(&raw).expect_err("invalid line");
    assert!(err.to_string().contains("line 3"), "{err}");
}

#[test]
fn undecryptable_event_is_flushed_on_the_track_cadence() {
    let reports = run(
        &[
            failure(1_000, "$1", "@b:remote.example", "MEGOLM_UNKNOWN_INBOUND_SESSION_ID"),
            format!(r#"{{"at":2000,"notification":{{"type":"event_visible","payload":"$1"}}}}"#),
        ],
        200_000,
    );

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    // Checks at 41s/81s; the 81s sweep confirms it and the 121s track tick reports it.
    assert_eq!(report.at, 121_000);
    assert_eq!(report.category, ErrorCategory::OlmKeysNotSentError);
    assert_eq!(report.properties.time_to_decrypt_millis, -1);
    assert!(report.properties.was_visible_to_user);
    assert_eq!(report.properties.is_federated, Some(true));
    assert_eq!(report.properties.user_trusts_own_identity, Some(true));
    assert_eq!(report.properties.base.crypto_sdk, Some(CryptoSdk::Rust));
}

#[test]
fn late_and_fast_decryptions_are_classified() {
    let reports = run(
        &[
            failure(0, "$late", "@a:home.example", "OLM_UNKNOWN_MESSAGE_INDEX"),
            failure(0, "$fast", "@a:home.example", "UNKNOWN_ERROR"),
            decrypted(3_000, "$fast"),
            decrypted(25_000, "$late"),
        ],
        30_000,
    );

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].code, DecryptionFailureCode::OlmUnknownMessageIndex);
    assert_eq!(reports[0].properties.time_to_decrypt_millis, 25_000);
    assert_eq!(reports[0].properties.is_federated, Some(false));
}

#[test]
fn final_flush_confirms_failures_still_pending_at_the_end() {
    let reports = run(
        &[failure(0, "$1", "@a:home.example", "HISTORICAL_MESSAGE_NO_KEY_BACKUP")],
        10_000,
    );
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].at, 10_000);
    assert_eq!(reports[0].category, ErrorCategory::HistoricalMessage);
}

#[test]
fn logout_discards_everything_pending() {
    let reports = run(
        &[
            failure(0, "$1", "@a:home.example", "UNKNOWN_ERROR"),
            format!(r#"{{"at":1000,"notification":{{"type":"session_logged_out"}}}}"#),
            failure(2_000, "$2", "@a:home.example", "UNKNOWN_ERROR"),
        ],
        500_000,
    );
    assert!(reports.is_empty());
}

#[test]
fn default_end_covers_the_late_window_and_both_timers() {
    assert_eq!(
        default_end_at(5_000, &TrackerSettings::default()),
        5_000 + 60_000 + 40_000 + 60_000
    );
}
