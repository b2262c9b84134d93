//! Domain model shared by the store, engine, notifier and API layers.
//!
//! Wire names stay camelCase for compatibility with existing data files and
//! the front-end (`isPaused`, `intervalSeconds`, `notifyWebhookIds`, ...).

use std::fmt;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Generate a random 128-bit identifier as lowercase hex.
pub fn new_id() -> String {
    let bytes: [u8; 16] = rand::random();
    let mut out = String::with_capacity(32);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorType {
    Http,
    Container,
}

impl fmt::Display for MonitorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorType::Http => f.write_str("http"),
            MonitorType::Container => f.write_str("container"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    #[default]
    Unknown,
    Up,
    Down,
    Paused,
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorStatus::Unknown => f.write_str("unknown"),
            MonitorStatus::Up => f.write_str("up"),
            MonitorStatus::Down => f.write_str("down"),
            MonitorStatus::Paused => f.write_str("paused"),
        }
    }
}

impl MonitorStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "up" => MonitorStatus::Up,
            "down" => MonitorStatus::Down,
            "paused" => MonitorStatus::Paused,
            _ => MonitorStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemediationAction {
    #[default]
    None,
    Start,
    Restart,
}

impl fmt::Display for RemediationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemediationAction::None => f.write_str("none"),
            RemediationAction::Start => f.write_str("start"),
            RemediationAction::Restart => f.write_str("restart"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicyName {
    #[serde(rename = "no")]
    No,
    #[serde(rename = "always")]
    Always,
    #[serde(rename = "on-failure")]
    OnFailure,
    #[serde(rename = "unless-stopped")]
    UnlessStopped,
}

impl RestartPolicyName {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicyName::No => "no",
            RestartPolicyName::Always => "always",
            RestartPolicyName::OnFailure => "on-failure",
            RestartPolicyName::UnlessStopped => "unless-stopped",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "no" => Some(RestartPolicyName::No),
            "always" => Some(RestartPolicyName::Always),
            "on-failure" => Some(RestartPolicyName::OnFailure),
            "unless-stopped" => Some(RestartPolicyName::UnlessStopped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartPolicy {
    pub name: RestartPolicyName,
    #[serde(default)]
    pub maximum_retry_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationPolicy {
    #[serde(default)]
    pub action: RemediationAction,
    #[serde(default)]
    pub max_attempts: u32,
    #[serde(default)]
    pub cooldown_seconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerLogOptions {
    #[serde(default)]
    pub include: bool,
    #[serde(default)]
    pub tail: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HttpMonitor {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerMonitor {
    #[serde(default)]
    pub container_id: String,
    /// Restart policy pushed to the runtime while the container is failing.
    /// Legacy records with an empty or unknown policy name parse to `None`.
    #[serde(
        default,
        deserialize_with = "de_restart_policy",
        skip_serializing_if = "Option::is_none"
    )]
    pub restart_policy: Option<RestartPolicy>,
    #[serde(default)]
    pub remediation: RemediationPolicy,
}

fn de_restart_policy<'de, D>(deserializer: D) -> Result<Option<RestartPolicy>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Wire {
        #[serde(default)]
        name: String,
        #[serde(default)]
        maximum_retry_count: i64,
    }

    let wire: Option<Wire> = Option::deserialize(deserializer)?;
    Ok(wire.and_then(|w| {
        RestartPolicyName::parse(&w.name).map(|name| RestartPolicy {
            name,
            maximum_retry_count: w.maximum_retry_count,
        })
    }))
}

/// The variant payload of a monitor. Exactly one of the two arms exists;
/// the serialized form keeps the legacy optional `http`/`container` fields.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorTarget {
    Http(HttpMonitor),
    Container(ContainerMonitor),
}

impl MonitorTarget {
    pub fn kind(&self) -> MonitorType {
        match self {
            MonitorTarget::Http(_) => MonitorType::Http,
            MonitorTarget::Container(_) => MonitorType::Container,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "MonitorWire", into = "MonitorWire")]
pub struct Monitor {
    pub id: String,
    pub name: String,
    pub is_paused: bool,
    pub interval_seconds: i64,
    pub timeout_seconds: i64,
    pub notify_webhook_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub target: MonitorTarget,
    pub logs: DockerLogOptions,
}

impl Monitor {
    pub fn kind(&self) -> MonitorType {
        self.target.kind()
    }

    /// The probed endpoint: URL for HTTP monitors, container id otherwise.
    pub fn target_label(&self) -> &str {
        match &self.target {
            MonitorTarget::Http(h) => &h.url,
            MonitorTarget::Container(c) => &c.container_id,
        }
    }

    pub fn container(&self) -> Option<&ContainerMonitor> {
        match &self.target {
            MonitorTarget::Container(c) => Some(c),
            MonitorTarget::Http(_) => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MonitorWire {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    kind: MonitorType,
    #[serde(default)]
    is_paused: bool,
    #[serde(default)]
    interval_seconds: i64,
    #[serde(default)]
    timeout_seconds: i64,
    #[serde(default)]
    notify_webhook_ids: Vec<String>,
    #[serde(default = "unix_epoch")]
    created_at: DateTime<Utc>,
    #[serde(default = "unix_epoch")]
    updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    http: Option<HttpMonitor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    container: Option<ContainerMonitor>,
    #[serde(default)]
    logs: DockerLogOptions,
}

fn unix_epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

impl From<MonitorWire> for Monitor {
    fn from(w: MonitorWire) -> Self {
        let target = match w.kind {
            MonitorType::Http => MonitorTarget::Http(w.http.unwrap_or_default()),
            MonitorType::Container => MonitorTarget::Container(w.container.unwrap_or_default()),
        };
        Monitor {
            id: w.id,
            name: w.name,
            is_paused: w.is_paused,
            interval_seconds: w.interval_seconds,
            timeout_seconds: w.timeout_seconds,
            notify_webhook_ids: w.notify_webhook_ids,
            created_at: w.created_at,
            updated_at: w.updated_at,
            target,
            logs: w.logs,
        }
    }
}

impl From<Monitor> for MonitorWire {
    fn from(m: Monitor) -> Self {
        let kind = m.kind();
        let (http, container) = match m.target {
            MonitorTarget::Http(h) => (Some(h), None),
            MonitorTarget::Container(c) => (None, Some(c)),
        };
        MonitorWire {
            id: m.id,
            name: m.name,
            kind,
            is_paused: m.is_paused,
            interval_seconds: m.interval_seconds,
            timeout_seconds: m.timeout_seconds,
            notify_webhook_ids: m.notify_webhook_ids,
            created_at: m.created_at,
            updated_at: m.updated_at,
            http,
            container,
            logs: m.logs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub monitor_id: String,
    pub status: MonitorStatus,
    pub checked_at: DateTime<Utc>,
    pub latency_ms: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorHistoryEntry {
    pub status: MonitorStatus,
    pub checked_at: DateTime<Utc>,
    pub latency_ms: i64,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatusInfo {
    pub status: MonitorStatus,
    pub last_check: DateTime<Utc>,
}

/// A notification channel stored alongside monitors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// webhook, dingtalk, wechat or discord; anything else delivers as a
    /// plain webhook.
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "unix_epoch")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "unix_epoch")]
    pub updated_at: DateTime<Utc>,
}

/// Snapshot of everything the store holds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    #[serde(default)]
    pub monitors: Vec<Monitor>,
    #[serde(default)]
    pub notifications: Vec<Notification>,
}
