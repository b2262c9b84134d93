//! Monitoring engine: the 1 Hz scheduling loop, per-monitor state machine,
//! container remediation and notification emission.
//!
//! All mutable per-monitor state lives in keyed maps behind a single
//! reader-writer lock. Probes run as tracked tasks so `stop` can wait for
//! every in-flight check to unwind; a root cancellation token propagates to
//! each of them.

mod probe;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::NotificationWebhook;
use crate::docker::{read_capped, DockerClient};
use crate::notify::{self, Dispatcher, LogsAttachment, NotifyError, Payload};
use crate::store::{
    push_capped, CheckResult, ContainerMonitor, Monitor, MonitorHistoryEntry, MonitorStatus,
    MonitorStatusInfo, MonitorTarget, RemediationAction, Store,
};

const MIN_INTERVAL_SECONDS: i64 = 5;
const MIN_COOLDOWN_SECONDS: i64 = 5;
const REMEDIATION_TIMEOUT: Duration = Duration::from_secs(10);

pub struct EngineDeps {
    pub store: Arc<dyn Store>,
    pub docker: Arc<DockerClient>,
    pub notifier: Arc<Dispatcher>,
    pub max_log_bytes: usize,
    pub default_log_since: Duration,
}

#[derive(Default)]
struct EngineState {
    last_status: HashMap<String, MonitorStatus>,
    last_check: HashMap<String, DateTime<Utc>>,
    history: HashMap<String, Vec<MonitorHistoryEntry>>,
    remediate_at: HashMap<String, DateTime<Utc>>,
    attempts: HashMap<String, u32>,
    in_flight: HashSet<String>,
}

pub struct Engine {
    deps: EngineDeps,
    http: reqwest::Client,
    state: RwLock<EngineState>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Engine {
    pub fn new(deps: EngineDeps) -> Arc<Self> {
        Arc::new(Self {
            deps,
            http: reqwest::Client::new(),
            state: RwLock::new(EngineState::default()),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    /// Begin background scheduling.
    pub fn start(self: &Arc<Self>) {
        tracing::info!("monitor engine started");
        let engine = self.clone();
        self.tracker.spawn(async move { engine.run().await });
    }

    /// Cancel the scheduler and every in-flight probe, then wait for all of
    /// them to exit.
    pub async fn stop(&self) {
        tracing::info!("monitor engine stopping");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("monitor engine stopped");
    }

    /// A consistent copy of each monitor's latest status and check time.
    pub async fn status_snapshot(&self) -> HashMap<String, MonitorStatusInfo> {
        let state = self.state.read().await;
        state
            .last_status
            .iter()
            .map(|(id, status)| {
                (
                    id.clone(),
                    MonitorStatusInfo {
                        status: *status,
                        last_check: state
                            .last_check
                            .get(id)
                            .copied()
                            .unwrap_or(DateTime::UNIX_EPOCH),
                    },
                )
            })
            .collect()
    }

    /// A defensive copy of a monitor's history, newest first. Unknown ids
    /// yield an empty list.
    pub async fn get_history(&self, id: &str) -> Vec<MonitorHistoryEntry> {
        self.state
            .read()
            .await
            .history
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut next_run: HashMap<String, DateTime<Utc>> = HashMap::new();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            self.tick(Utc::now(), &mut next_run).await;
        }
    }

    /// One scheduler beat: read the monitor set and dispatch every due probe.
    /// Probes run concurrently across monitors; the `next_run` re-arm plus
    /// the in-flight set keep each monitor down to a single live probe.
    async fn tick(self: &Arc<Self>, now: DateTime<Utc>, next_run: &mut HashMap<String, DateTime<Utc>>) {
        let state = self.deps.store.get_state();
        next_run.retain(|id, _| state.monitors.iter().any(|m| m.id == *id));

        for m in state.monitors {
            if m.is_paused {
                self.set_last_status(&m.id, MonitorStatus::Paused, now).await;
                continue;
            }

            let interval = chrono::Duration::seconds(m.interval_seconds.max(MIN_INTERVAL_SECONDS));
            if next_run.get(&m.id).is_some_and(|nr| now < *nr) {
                continue;
            }
            {
                let mut st = self.state.write().await;
                if !st.in_flight.insert(m.id.clone()) {
                    continue;
                }
            }
            next_run.insert(m.id.clone(), now + interval);

            let engine = self.clone();
            self.tracker.spawn(async move { engine.check_once(now, m).await });
        }
    }

    /// Run one probe under its deadline and apply the transition rules.
    async fn check_once(self: Arc<Self>, now: DateTime<Utc>, m: Monitor) {
        let deadline = Duration::from_secs(m.timeout_seconds.max(1) as u64);

        let outcome = tokio::select! {
            _ = self.shutdown.cancelled() => None,
            probed = tokio::time::timeout(deadline, self.probe(now, &m)) => Some(match probed {
                Ok(result) => result,
                Err(_) => (
                    CheckResult {
                        monitor_id: m.id.clone(),
                        status: MonitorStatus::Down,
                        checked_at: now,
                        latency_ms: deadline.as_millis() as i64,
                        message: format!("timeout after {}s", deadline.as_secs()),
                    },
                    None,
                ),
            }),
        };

        let Some((res, logs)) = outcome else {
            // Shutting down: record nothing for the aborted probe.
            self.state.write().await.in_flight.remove(&m.id);
            return;
        };

        let entry = MonitorHistoryEntry {
            status: res.status,
            checked_at: res.checked_at,
            latency_ms: res.latency_ms,
            message: res.message.clone(),
        };

        let prev = {
            let mut st = self.state.write().await;
            st.in_flight.remove(&m.id);
            let prev = st
                .last_status
                .get(&m.id)
                .copied()
                .unwrap_or(MonitorStatus::Unknown);
            st.last_status.insert(m.id.clone(), res.status);
            st.last_check.insert(m.id.clone(), now);
            push_capped(st.history.entry(m.id.clone()).or_default(), entry.clone());
            if res.status == MonitorStatus::Up && prev != MonitorStatus::Up {
                st.attempts.remove(&m.id);
            }
            prev
        };

        if let Err(err) = self.deps.store.add_history(&m.id, entry) {
            tracing::warn!(monitor_id = %m.id, error = %err, "failed to persist history entry");
        }

        if prev != res.status {
            tracing::info!(
                monitor_id = %m.id,
                monitor_name = %m.name,
                previous = %prev,
                current = %res.status,
                message = %res.message,
                "monitor status changed"
            );
            // Delivery must not outlive stop(): a stalled webhook would
            // otherwise hold up tracker.wait() past the probe deadline.
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::debug!(monitor_id = %m.id, "shutdown during notification emission");
                }
                _ = self.emit_status_changed(&m, &res, logs, prev) => {}
            }
        }
    }

    async fn probe(&self, now: DateTime<Utc>, m: &Monitor) -> (CheckResult, Option<LogsAttachment>) {
        match &m.target {
            MonitorTarget::Http(http) => {
                let deadline = Duration::from_secs(m.timeout_seconds.max(1) as u64);
                (
                    probe::check_http(&self.http, now, &m.id, &http.url, deadline).await,
                    None,
                )
            }
            MonitorTarget::Container(c) => self.check_container(now, m, c).await,
        }
    }

    async fn check_container(
        &self,
        now: DateTime<Utc>,
        m: &Monitor,
        c: &ContainerMonitor,
    ) -> (CheckResult, Option<LogsAttachment>) {
        let result = |status: MonitorStatus, message: String| CheckResult {
            monitor_id: m.id.clone(),
            status,
            checked_at: now,
            latency_ms: 0,
            message,
        };

        if c.container_id.is_empty() {
            return (
                result(MonitorStatus::Down, "missing container id".to_string()),
                None,
            );
        }

        let state = match self.deps.docker.container_state(&c.container_id).await {
            Err(err) => {
                return (
                    result(MonitorStatus::Down, err.to_string()),
                    self.try_attach_logs(now, m, c).await,
                )
            }
            Ok(state) => state,
        };

        if state == "running" {
            return (result(MonitorStatus::Up, state), None);
        }

        self.apply_restart_policy(m, c).await;
        self.try_remediate(now, m, c).await;

        (
            result(MonitorStatus::Down, state),
            self.try_attach_logs(now, m, c).await,
        )
    }

    /// Best-effort push of the declared restart policy to the runtime on
    /// every failed container probe. The next tick retries on error.
    async fn apply_restart_policy(&self, m: &Monitor, c: &ContainerMonitor) {
        let Some(policy) = &c.restart_policy else {
            return;
        };
        if let Err(err) = self
            .deps
            .docker
            .update_restart_policy(&c.container_id, policy)
            .await
        {
            tracing::debug!(monitor_id = %m.id, error = %err, "restart policy update failed");
        }
    }

    async fn try_remediate(&self, now: DateTime<Utc>, m: &Monitor, c: &ContainerMonitor) {
        let p = &c.remediation;
        if p.action == RemediationAction::None || p.max_attempts == 0 {
            return;
        }

        // Gate check and counter update happen atomically under the write
        // lock; the runtime call itself runs after release.
        let attempt = {
            let mut st = self.state.write().await;
            if st.remediate_at.get(&m.id).is_some_and(|next| now < *next) {
                return;
            }
            let used = st.attempts.get(&m.id).copied().unwrap_or(0);
            if used >= p.max_attempts {
                return;
            }
            st.attempts.insert(m.id.clone(), used + 1);
            st.remediate_at.insert(
                m.id.clone(),
                now + chrono::Duration::seconds(p.cooldown_seconds.max(MIN_COOLDOWN_SECONDS)),
            );
            used + 1
        };

        let action_result = match p.action {
            RemediationAction::Start => self.deps.docker.start(&c.container_id).await,
            RemediationAction::Restart => {
                self.deps
                    .docker
                    .restart(&c.container_id, REMEDIATION_TIMEOUT)
                    .await
            }
            RemediationAction::None => return,
        };

        match action_result {
            Ok(()) => {
                tracing::info!(
                    monitor_id = %m.id,
                    action = %p.action,
                    attempt,
                    "remediation action succeeded"
                );
                let payload = Payload {
                    kind: notify::EVENT_REMEDIATED.to_string(),
                    monitor_id: m.id.clone(),
                    at: now,
                    data: serde_json::json!({
                        "monitorName": m.name,
                        "target": c.container_id,
                        "action": p.action.to_string(),
                        "attempt": attempt,
                    }),
                    logs: None,
                };
                self.emit(&m.notify_webhook_ids, &m.id, payload).await;
            }
            Err(err) => {
                // The attempt remains counted even on failure.
                tracing::error!(
                    monitor_id = %m.id,
                    action = %p.action,
                    error = %err,
                    "remediation action failed"
                );
            }
        }
    }

    async fn try_attach_logs(
        &self,
        now: DateTime<Utc>,
        m: &Monitor,
        c: &ContainerMonitor,
    ) -> Option<LogsAttachment> {
        if !m.logs.include {
            return None;
        }
        let tail = m.logs.tail.max(1);
        let since = now
            - chrono::Duration::from_std(self.deps.default_log_since)
                .unwrap_or_else(|_| chrono::Duration::seconds(3600));

        let stream = self.deps.docker.logs(&c.container_id, tail, since).await.ok()?;
        let (bytes, truncated) = read_capped(stream, self.deps.max_log_bytes).await;
        attachment_from(&c.container_id, bytes, truncated)
    }

    async fn emit_status_changed(
        &self,
        m: &Monitor,
        res: &CheckResult,
        logs: Option<LogsAttachment>,
        prev: MonitorStatus,
    ) {
        let payload = Payload {
            kind: notify::EVENT_STATUS_CHANGED.to_string(),
            monitor_id: m.id.clone(),
            at: res.checked_at,
            data: serde_json::json!({
                "monitorName": m.name,
                "target": m.target_label(),
                "previous": prev.to_string(),
                "current": res.status.to_string(),
                "message": res.message,
                "latencyMs": res.latency_ms,
            }),
            logs,
        };
        self.emit(&m.notify_webhook_ids, &m.id, payload).await;
    }

    /// Resolve each listed webhook (store id, then store name, then legacy
    /// config name) and deliver best-effort under the engine's root
    /// cancellation token. Failures never bubble up.
    async fn emit(&self, webhook_ids: &[String], monitor_id: &str, payload: Payload) {
        let notifications = self.deps.store.get_notifications();
        for id in webhook_ids {
            let found = notifications
                .iter()
                .find(|n| &n.id == id)
                .or_else(|| notifications.iter().find(|n| &n.name == id));

            if let Some(n) = found {
                let webhook = NotificationWebhook {
                    name: n.name.clone(),
                    url: n.url.clone(),
                    kind: n.kind.clone(),
                };
                let result =
                    notify::send(self.deps.notifier.client(), &webhook, &payload, &self.shutdown)
                        .await;
                log_delivery(monitor_id, &n.name, result);
                continue;
            }

            let result = self.deps.notifier.send_legacy(id, &payload, &self.shutdown).await;
            log_delivery(monitor_id, id, result);
        }
    }

    async fn set_last_status(&self, id: &str, status: MonitorStatus, now: DateTime<Utc>) {
        let mut st = self.state.write().await;
        st.last_status.insert(id.to_string(), status);
        st.last_check.insert(id.to_string(), now);
    }
}

fn log_delivery(monitor_id: &str, webhook: &str, result: Result<(), NotifyError>) {
    match result {
        Ok(()) => {}
        Err(NotifyError::Cancelled) => {
            tracing::debug!(monitor_id, webhook, "notification delivery cancelled")
        }
        Err(err) => {
            tracing::warn!(monitor_id, webhook, error = %err, "notification delivery failed")
        }
    }
}

/// Build a log attachment, suppressing content that trims to nothing.
fn attachment_from(container_id: &str, bytes: Vec<u8>, truncated: bool) -> Option<LogsAttachment> {
    let content = String::from_utf8_lossy(&bytes).into_owned();
    if content.trim().is_empty() {
        return None;
    }
    Some(LogsAttachment {
        container_id: container_id.to_string(),
        content,
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        DockerLogOptions, HttpMonitor, JsonStore, RemediationPolicy, HISTORY_CAP,
    };
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        engine: Arc<Engine>,
        store: Arc<dyn Store>,
        docker: Arc<DockerClient>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        fixture_with(64 * 1024, &[])
    }

    fn fixture_with(max_log_bytes: usize, webhooks: &[NotificationWebhook]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Store> =
            Arc::new(JsonStore::open(dir.path().join("data.json")).unwrap());
        let docker = Arc::new(DockerClient::mock());
        let engine = Engine::new(EngineDeps {
            store: store.clone(),
            docker: docker.clone(),
            notifier: Arc::new(Dispatcher::new(webhooks)),
            max_log_bytes,
            default_log_since: Duration::from_secs(3600),
        });
        Fixture {
            engine,
            store,
            docker,
            _dir: dir,
        }
    }

    fn http_monitor(id: &str, url: &str, webhook_ids: Vec<String>) -> Monitor {
        Monitor {
            id: id.to_string(),
            name: "api".to_string(),
            is_paused: false,
            interval_seconds: 5,
            timeout_seconds: 5,
            notify_webhook_ids: webhook_ids,
            created_at: DateTime::UNIX_EPOCH,
            updated_at: DateTime::UNIX_EPOCH,
            target: MonitorTarget::Http(HttpMonitor { url: url.to_string() }),
            logs: DockerLogOptions::default(),
        }
    }

    fn container_monitor(id: &str, container_id: &str, remediation: RemediationPolicy) -> Monitor {
        Monitor {
            id: id.to_string(),
            name: "db".to_string(),
            is_paused: false,
            interval_seconds: 5,
            timeout_seconds: 5,
            notify_webhook_ids: vec![],
            created_at: DateTime::UNIX_EPOCH,
            updated_at: DateTime::UNIX_EPOCH,
            target: MonitorTarget::Container(ContainerMonitor {
                container_id: container_id.to_string(),
                restart_policy: None,
                remediation,
            }),
            logs: DockerLogOptions::default(),
        }
    }

    async fn attempts(engine: &Arc<Engine>, id: &str) -> u32 {
        engine.state.read().await.attempts.get(id).copied().unwrap_or(0)
    }

    #[tokio::test]
    async fn test_http_up_down_up_transitions() {
        let server = MockServer::start().await;
        let hooks = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(3)
            .mount(&hooks)
            .await;

        let f = fixture_with(
            64 * 1024,
            &[NotificationWebhook {
                name: "ops".to_string(),
                url: hooks.uri(),
                kind: "webhook".to_string(),
            }],
        );
        let m = http_monitor("m1", &server.uri(), vec!["ops".to_string()]);

        // unknown -> up
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        f.engine.clone().check_once(Utc::now(), m.clone()).await;
        assert_eq!(
            f.engine.state.read().await.last_status["m1"],
            MonitorStatus::Up
        );

        // up -> down
        server.reset().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;
        f.engine.clone().check_once(Utc::now(), m.clone()).await;
        assert_eq!(
            f.engine.state.read().await.last_status["m1"],
            MonitorStatus::Down
        );

        // down -> up
        server.reset().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        f.engine.clone().check_once(Utc::now(), m.clone()).await;
        assert_eq!(
            f.engine.state.read().await.last_status["m1"],
            MonitorStatus::Up
        );

        let history = f.engine.get_history("m1").await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].status, MonitorStatus::Up);
        assert_eq!(history[1].status, MonitorStatus::Down);
        assert_eq!(history[1].message, "503 Service Unavailable");
    }

    #[tokio::test]
    async fn test_steady_state_emits_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let hooks = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&hooks)
            .await;

        let f = fixture_with(
            64 * 1024,
            &[NotificationWebhook {
                name: "ops".to_string(),
                url: hooks.uri(),
                kind: "webhook".to_string(),
            }],
        );
        let m = http_monitor("m1", &server.uri(), vec!["ops".to_string()]);

        // First probe transitions unknown -> up and notifies; the next two
        // stay up and must not.
        for _ in 0..3 {
            f.engine.clone().check_once(Utc::now(), m.clone()).await;
        }
    }

    #[tokio::test]
    async fn test_notification_resolution_prefers_store_then_legacy() {
        let hooks = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&hooks)
            .await;

        let f = fixture();
        // Store has no record with id "ops" but one with that name.
        f.store
            .upsert_notification(crate::store::Notification {
                id: "n-123".to_string(),
                name: "ops".to_string(),
                kind: "webhook".to_string(),
                url: hooks.uri(),
                created_at: DateTime::UNIX_EPOCH,
                updated_at: DateTime::UNIX_EPOCH,
            })
            .unwrap();

        let payload = Payload {
            kind: notify::EVENT_STATUS_CHANGED.to_string(),
            monitor_id: "m1".to_string(),
            at: Utc::now(),
            data: serde_json::json!({"current": "down"}),
            logs: None,
        };
        f.engine.emit(&["ops".to_string()], "m1", payload).await;
    }

    #[tokio::test]
    async fn test_unresolvable_webhook_is_dropped_silently() {
        let f = fixture();
        let payload = Payload {
            kind: notify::EVENT_STATUS_CHANGED.to_string(),
            monitor_id: "m1".to_string(),
            at: Utc::now(),
            data: serde_json::json!({}),
            logs: None,
        };
        // Neither store nor legacy config knows "ghost"; this must not hang
        // or error.
        f.engine.emit(&["ghost".to_string()], "m1", payload).await;
    }

    #[tokio::test]
    async fn test_container_missing_id_is_down() {
        let f = fixture();
        let m = container_monitor("m1", "", RemediationPolicy::default());
        f.engine.clone().check_once(Utc::now(), m).await;

        let history = f.engine.get_history("m1").await;
        assert_eq!(history[0].status, MonitorStatus::Down);
        assert_eq!(history[0].message, "missing container id");
    }

    #[tokio::test]
    async fn test_container_running_is_up() {
        let f = fixture();
        let m = container_monitor("m1", "mock-1", RemediationPolicy::default());
        f.engine.clone().check_once(Utc::now(), m).await;

        let history = f.engine.get_history("m1").await;
        assert_eq!(history[0].status, MonitorStatus::Up);
        assert_eq!(history[0].message, "running");
    }

    #[tokio::test]
    async fn test_remediation_cooldown_and_attempt_cap() {
        let f = fixture();
        let m = container_monitor(
            "m1",
            "mock-2",
            RemediationPolicy {
                action: RemediationAction::Restart,
                max_attempts: 2,
                cooldown_seconds: 10,
            },
        );

        let t0 = Utc::now();

        // t=0: exited, first remediation fires and restarts the container.
        f.engine.clone().check_once(t0, m.clone()).await;
        assert_eq!(attempts(&f.engine, "m1").await, 1);
        assert_eq!(f.docker.container_state("mock-2").await.unwrap(), "running");
        assert_eq!(
            f.engine.state.read().await.remediate_at["m1"],
            t0 + chrono::Duration::seconds(10)
        );

        // Container dies again; t=5 is inside the cooldown window.
        f.docker.stop("mock-2", Duration::from_secs(1)).await.unwrap();
        f.engine
            .clone()
            .check_once(t0 + chrono::Duration::seconds(5), m.clone())
            .await;
        assert_eq!(attempts(&f.engine, "m1").await, 1);
        assert_eq!(f.docker.container_state("mock-2").await.unwrap(), "exited");

        // t=10: cooldown elapsed, second attempt fires.
        f.engine
            .clone()
            .check_once(t0 + chrono::Duration::seconds(10), m.clone())
            .await;
        assert_eq!(attempts(&f.engine, "m1").await, 2);
        assert_eq!(f.docker.container_state("mock-2").await.unwrap(), "running");

        // Dies again; t=20 is past the cooldown but the attempt cap holds.
        f.docker.stop("mock-2", Duration::from_secs(1)).await.unwrap();
        f.engine
            .clone()
            .check_once(t0 + chrono::Duration::seconds(20), m.clone())
            .await;
        assert_eq!(attempts(&f.engine, "m1").await, 2);
        assert_eq!(f.docker.container_state("mock-2").await.unwrap(), "exited");

        // Recovery resets the attempt counter.
        f.docker.start("mock-2").await.unwrap();
        f.engine
            .clone()
            .check_once(t0 + chrono::Duration::seconds(25), m.clone())
            .await;
        assert_eq!(attempts(&f.engine, "m1").await, 0);
    }

    #[tokio::test]
    async fn test_short_cooldown_clamps_to_five_seconds() {
        let f = fixture();
        let m = container_monitor(
            "m1",
            "mock-2",
            RemediationPolicy {
                action: RemediationAction::Start,
                max_attempts: 5,
                cooldown_seconds: 1,
            },
        );

        let t0 = Utc::now();
        f.engine.clone().check_once(t0, m.clone()).await;
        assert_eq!(
            f.engine.state.read().await.remediate_at["m1"],
            t0 + chrono::Duration::seconds(5)
        );
    }

    #[tokio::test]
    async fn test_transport_error_records_down_without_remediation() {
        let f = fixture();
        // A container the mock does not know: the state query errors, so the
        // probe records down with the error text and remediation never runs.
        let gone = container_monitor(
            "m2",
            "no-such-container",
            RemediationPolicy {
                action: RemediationAction::Start,
                max_attempts: 3,
                cooldown_seconds: 10,
            },
        );
        f.engine.clone().check_once(Utc::now(), gone).await;

        let history = f.engine.get_history("m2").await;
        assert_eq!(history[0].status, MonitorStatus::Down);
        assert!(history[0].message.contains("not found"));
        assert_eq!(attempts(&f.engine, "m2").await, 0);
    }

    #[tokio::test]
    async fn test_log_attachment_truncates_at_cap() {
        let f = fixture_with(100, &[]);
        let mut m = container_monitor("m1", "mock-2", RemediationPolicy::default());
        m.logs = DockerLogOptions {
            include: true,
            tail: 200,
        };
        let c = m.container().unwrap().clone();

        let attachment = f
            .engine
            .try_attach_logs(Utc::now(), &m, &c)
            .await
            .expect("mock logs are non-empty");
        assert_eq!(attachment.content.len(), 100);
        assert!(attachment.truncated);
        assert_eq!(attachment.container_id, "mock-2");
    }

    #[tokio::test]
    async fn test_logs_not_attached_when_disabled() {
        let f = fixture();
        let m = container_monitor("m1", "mock-2", RemediationPolicy::default());
        let c = m.container().unwrap().clone();
        assert!(f.engine.try_attach_logs(Utc::now(), &m, &c).await.is_none());
    }

    #[test]
    fn test_whitespace_only_attachment_is_suppressed() {
        assert!(attachment_from("c1", b"  \n\t \n".to_vec(), false).is_none());
        assert!(attachment_from("c1", Vec::new(), false).is_none());
        let some = attachment_from("c1", b" line\n".to_vec(), true).unwrap();
        assert!(some.truncated);
    }

    #[tokio::test]
    async fn test_paused_monitor_skips_probing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let f = fixture();
        let mut m = http_monitor("m1", &server.uri(), vec![]);
        m.is_paused = true;
        f.store.upsert_monitor(m).unwrap();

        let mut next_run = HashMap::new();
        for i in 0..5 {
            f.engine
                .tick(Utc::now() + chrono::Duration::seconds(i), &mut next_run)
                .await;
        }

        let snapshot = f.engine.status_snapshot().await;
        assert_eq!(snapshot["m1"].status, MonitorStatus::Paused);
        assert!(next_run.is_empty());
    }

    #[tokio::test]
    async fn test_interval_clamps_to_five_seconds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        for interval in [0i64, 1, 4] {
            let f = fixture();
            let id = format!("m-{interval}");
            let mut m = http_monitor(&id, &server.uri(), vec![]);
            m.interval_seconds = interval;
            f.store.upsert_monitor(m).unwrap();

            let now = Utc::now();
            let mut next_run = HashMap::new();
            f.engine.tick(now, &mut next_run).await;
            assert_eq!(next_run[id.as_str()], now + chrono::Duration::seconds(5));
        }
    }

    #[tokio::test]
    async fn test_tick_drops_next_run_for_deleted_monitors() {
        let f = fixture();
        let mut next_run = HashMap::new();
        next_run.insert("ghost".to_string(), Utc::now());
        f.engine.tick(Utc::now(), &mut next_run).await;
        assert!(next_run.is_empty());
    }

    #[tokio::test]
    async fn test_history_ring_is_bounded() {
        let f = fixture();
        let m = container_monitor("m1", "mock-1", RemediationPolicy::default());
        for _ in 0..(HISTORY_CAP + 10) {
            f.engine.clone().check_once(Utc::now(), m.clone()).await;
        }
        let history = f.engine.get_history("m1").await;
        assert_eq!(history.len(), HISTORY_CAP);
        for pair in history.windows(2) {
            assert!(pair[0].checked_at >= pair[1].checked_at);
        }
    }

    #[tokio::test]
    async fn test_stop_completes_promptly() {
        let f = fixture();
        f.engine.start();
        tokio::time::timeout(Duration::from_secs(2), f.engine.stop())
            .await
            .expect("stop must complete in bounded time");
    }

    #[tokio::test]
    async fn test_stop_unblocks_stalled_notification_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        // The webhook stalls far beyond the stop bound.
        let hooks = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&hooks)
            .await;

        let f = fixture_with(
            64 * 1024,
            &[NotificationWebhook {
                name: "ops".to_string(),
                url: hooks.uri(),
                kind: "webhook".to_string(),
            }],
        );
        let m = http_monitor("m1", &server.uri(), vec!["ops".to_string()]);

        // Dispatch the probe the way the scheduler does, so stop() has to
        // wait for it. The probe transitions unknown -> up and parks inside
        // the stalled webhook POST.
        let engine = f.engine.clone();
        f.engine
            .tracker
            .spawn(async move { engine.check_once(Utc::now(), m).await });
        tokio::time::sleep(Duration::from_millis(300)).await;

        tokio::time::timeout(Duration::from_secs(2), f.engine.stop())
            .await
            .expect("stop must not wait out a stalled webhook");
    }

    #[tokio::test]
    async fn test_get_history_unknown_monitor_is_empty() {
        let f = fixture();
        assert!(f.engine.get_history("nope").await.is_empty());
    }
}
