//! HTTP probe.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::Client;

use crate::store::{CheckResult, MonitorStatus};

/// Issue a GET against `url` and classify the response. 2xx and 3xx count as
/// up; transport errors and 4xx/5xx as down. The body is dropped unread.
pub async fn check_http(
    client: &Client,
    now: DateTime<Utc>,
    monitor_id: &str,
    url: &str,
    deadline: Duration,
) -> CheckResult {
    if url.is_empty() {
        return CheckResult {
            monitor_id: monitor_id.to_string(),
            status: MonitorStatus::Down,
            checked_at: now,
            latency_ms: 0,
            message: "missing url".to_string(),
        };
    }

    let start = Instant::now();
    let resp = client.get(url).timeout(deadline).send().await;
    let latency_ms = start.elapsed().as_millis() as i64;

    match resp {
        Err(err) => CheckResult {
            monitor_id: monitor_id.to_string(),
            status: MonitorStatus::Down,
            checked_at: now,
            latency_ms,
            message: err.to_string(),
        },
        Ok(resp) => {
            let code = resp.status();
            drop(resp);
            let message = match code.canonical_reason() {
                Some(reason) => format!("{} {}", code.as_u16(), reason),
                None => code.as_u16().to_string(),
            };
            let status = if (200..400).contains(&code.as_u16()) {
                MonitorStatus::Up
            } else {
                MonitorStatus::Down
            };
            CheckResult {
                monitor_id: monitor_id.to_string(),
                status,
                checked_at: now,
                latency_ms,
                message,
            }
        }
    }
}
