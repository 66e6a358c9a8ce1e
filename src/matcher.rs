use serde_json::Value;

use crate::error::RelayError;
use crate::state::WatchList;
use crate::types::FeedMessage;

/// Classify a raw feed frame.
///
/// Log lines are accepted from either `result.logs` or the node's native
/// `logsNotification` shape (`params.result.value.logs`). Only non-JSON input
/// is an error; unexpected shapes come back as [`FeedMessage::Other`].
pub fn classify(raw: &str) -> Result<FeedMessage, RelayError> {
    let value: Value = serde_json::from_str(raw)?;

    if let Some(lines) = log_lines(&value) {
        return Ok(FeedMessage::Logs(lines));
    }

    let id = value.get("id").and_then(Value::as_u64);

    if let (Some(id), Some(subscription)) =
        (id, value.get("result").and_then(Value::as_u64))
    {
        return Ok(FeedMessage::SubscriptionAck { id, subscription });
    }

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Ok(FeedMessage::RpcError { id, message });
    }

    Ok(FeedMessage::Other)
}

fn log_lines(value: &Value) -> Option<Vec<String>> {
    let logs = value
        .pointer("/result/logs")
        .or_else(|| value.pointer("/params/result/value/logs"))?
        .as_array()?;
    // A non-string entry means this isn't a log notification we understand.
    logs.iter()
        .map(|line| line.as_str().map(str::to_string))
        .collect()
}

/// Wallets with at least one line mentioning them, in watch-list order.
///
/// Plain substring containment: a wallet embedded in a longer token still
/// counts as a hit.
pub fn matching_wallets(lines: &[String], watch_list: &WatchList) -> Vec<String> {
    watch_list
        .iter()
        .filter(|wallet| lines.iter().any(|line| line.contains(wallet)))
        .map(str::to_string)
        .collect()
}
