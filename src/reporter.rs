use crate::types::MatchEvent;

/// Emit a relayed match as a single JSON line to stdout.
pub fn report_match(event: &MatchEvent) {
    if let Ok(json) = serde_json::to_string(event) {
        println!("{json}");
    }
}

/// Build the report line for a match at the current time.
pub fn match_event(wallet: &str, logs: &[String], delivered: bool) -> MatchEvent {
    MatchEvent {
        timestamp: chrono::Utc::now().to_rfc3339(),
        wallet: wallet.to_string(),
        logs: logs.to_vec(),
        delivered,
    }
}
