//! Notification dispatch: canonical event payloads rendered into per-channel
//! wire formats and delivered over HTTP POST.

mod format;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::NotificationWebhook;

pub const EVENT_STATUS_CHANGED: &str = "status_changed";
pub const EVENT_REMEDIATED: &str = "remediated";
pub const EVENT_ERROR: &str = "error";

const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Channel-agnostic event payload. The `webhook` channel serializes this
/// verbatim; the other channels render it into their own shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    #[serde(rename = "type")]
    pub kind: String,
    pub monitor_id: String,
    pub at: DateTime<Utc>,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<LogsAttachment>,
}

/// A bounded excerpt of container log output attached to an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsAttachment {
    pub container_id: String,
    pub content: String,
    pub truncated: bool,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook {name} returned status {status}: {body}")]
    Status {
        name: String,
        status: u16,
        body: String,
    },
    #[error("dingtalk error {code}: {message}")]
    DingTalk { code: i64, message: String },
    #[error("delivery cancelled")]
    Cancelled,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

/// Holds the legacy config-declared webhooks (keyed by name) and the shared
/// HTTP client used for all deliveries.
pub struct Dispatcher {
    webhooks: HashMap<String, NotificationWebhook>,
    client: Client,
}

impl Dispatcher {
    pub fn new(webhooks: &[NotificationWebhook]) -> Self {
        let mut map = HashMap::with_capacity(webhooks.len());
        for w in webhooks {
            if w.name.is_empty() || w.url.is_empty() {
                continue;
            }
            map.insert(w.name.clone(), w.clone());
        }
        let client = Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .build()
            .expect("failed to build notification http client");
        Self {
            webhooks: map,
            client,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Deliver to a config-declared webhook by name. Unknown names are a
    /// silent no-op.
    pub async fn send_legacy(
        &self,
        name: &str,
        payload: &Payload,
        cancel: &CancellationToken,
    ) -> Result<(), NotifyError> {
        match self.webhooks.get(name) {
            Some(w) => send(&self.client, w, payload, cancel).await,
            None => Ok(()),
        }
    }
}

/// Render `payload` for the channel and POST it. A response status of 400 or
/// above is a delivery failure; DingTalk additionally fails on a non-zero
/// `errcode` in a 2xx response body.
///
/// The caller's cancellation token bounds the whole delivery on top of the
/// 10 s client timeout; cancelling mid-flight aborts the request.
pub async fn send(
    client: &Client,
    webhook: &NotificationWebhook,
    payload: &Payload,
    cancel: &CancellationToken,
) -> Result<(), NotifyError> {
    let body = match webhook.kind.as_str() {
        "dingtalk" => format::dingtalk_body(payload)?,
        "wechat" => format::wechat_body(payload)?,
        "discord" => format::discord_body(payload)?,
        _ => serde_json::to_vec(payload)?,
    };

    let deliver = async {
        let resp = client
            .post(&webhook.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        let resp_body = resp.text().await.unwrap_or_default();
        if status.as_u16() >= 400 {
            return Err(NotifyError::Status {
                name: webhook.name.clone(),
                status: status.as_u16(),
                body: resp_body,
            });
        }

        if webhook.kind == "dingtalk" {
            #[derive(Deserialize)]
            struct DingTalkResponse {
                #[serde(default)]
                errcode: i64,
                #[serde(default)]
                errmsg: String,
            }
            if let Ok(dt) = serde_json::from_str::<DingTalkResponse>(&resp_body) {
                if dt.errcode != 0 {
                    return Err(NotifyError::DingTalk {
                        code: dt.errcode,
                        message: dt.errmsg,
                    });
                }
            }
        }

        Ok(())
    };

    tokio::select! {
        _ = cancel.cancelled() => Err(NotifyError::Cancelled),
        out = deliver => out,
    }
}
