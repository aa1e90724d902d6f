//! Periodic health evaluation and alert lifecycle.
//!
//! Each tick observes queue depth, error rate, disk usage, tool availability
//! and mean processing time, fires rules whose condition holds and whose
//! cooldown has elapsed, resolves active alerts whose condition cleared and
//! writes one [`SystemMetric`]. Ticks are serialized.

pub mod notify;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::AlertConfig;
use crate::error::{PipelineError, StoreError};
use crate::models::{Alert, AlertRule, AlertStatus, AlertType, ProcessingStatus, SystemMetric};
use crate::repository::{AlertRepository, MetricRepository, Store, VideoRepository};
use crate::services::guard::Guard;

pub use notify::{Notifications, Notifier, NotifyError};

/// Values observed at one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Observations {
    pub queue_size: usize,
    /// Percent of finished jobs that failed in the trailing window.
    pub error_rate: f64,
    pub disk_usage_percent: f64,
    pub tools_available: bool,
    /// Minutes per successful attempt in the trailing window.
    pub avg_processing_minutes: f64,
}

impl Observations {
    pub fn value_for(&self, alert_type: AlertType) -> f64 {
        match alert_type {
            AlertType::QueueSize => self.queue_size as f64,
            AlertType::ErrorRate => self.error_rate,
            AlertType::ToolUnavailable => {
                if self.tools_available {
                    0.0
                } else {
                    1.0
                }
            }
            AlertType::DiskSpace => self.disk_usage_percent,
            AlertType::ProcessingTime => self.avg_processing_minutes,
        }
    }
}

pub fn condition_met(rule: &AlertRule, value: f64) -> bool {
    match rule.alert_type {
        AlertType::ToolUnavailable => value > 0.0,
        _ => value >= rule.threshold,
    }
}

pub fn alert_message(rule: &AlertRule, value: f64) -> String {
    match rule.alert_type {
        AlertType::QueueSize => format!(
            "Queue size is high: {:.0} tasks (threshold: {:.0})",
            value, rule.threshold
        ),
        AlertType::ErrorRate => format!(
            "Error rate is high: {:.1}% (threshold: {:.1}%)",
            value, rule.threshold
        ),
        AlertType::ToolUnavailable => {
            "FFmpeg is not available - video processing will fail".to_string()
        }
        AlertType::DiskSpace => format!(
            "Disk usage is high: {:.1}% (threshold: {:.1}%)",
            value, rule.threshold
        ),
        AlertType::ProcessingTime => format!(
            "Processing time is high: {:.1} min (threshold: {:.1} min)",
            value, rule.threshold
        ),
    }
}

#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub created: Vec<Alert>,
    pub resolved: Vec<Uuid>,
    pub snapshot: Option<SystemMetric>,
}

/// Current state for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub healthy: bool,
    pub tools_available: bool,
    pub disk_usage_percent: f64,
    pub queue_size: usize,
    pub active_alerts: usize,
    pub last_snapshot: Option<SystemMetric>,
}

pub struct AlertEngine {
    store: Arc<dyn Store>,
    guard: Arc<Guard>,
    notifier: Arc<dyn Notifier>,
    media_root: PathBuf,
    config: AlertConfig,
    tick_lock: Mutex<()>,
}

impl AlertEngine {
    pub fn new(
        store: Arc<dyn Store>,
        guard: Arc<Guard>,
        notifier: Arc<dyn Notifier>,
        media_root: PathBuf,
        config: AlertConfig,
    ) -> Self {
        Self {
            store,
            guard,
            notifier,
            media_root,
            config,
            tick_lock: Mutex::new(()),
        }
    }

    /// Installs the default rule set when no active rule exists.
    pub async fn seed_default_rules(&self) -> Result<usize, StoreError> {
        if !self.store.active_rules().await?.is_empty() {
            return Ok(0);
        }
        let rules = AlertRule::default_rules();
        for rule in &rules {
            self.store.save_rule(rule).await?;
        }
        log::info!("Seeded {} default alert rules", rules.len());
        Ok(rules.len())
    }

    pub async fn tick(&self) -> Result<TickReport, PipelineError> {
        self.tick_at(Utc::now()).await
    }

    /// Evaluates every active rule as of `now`.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport, PipelineError> {
        let _serial = self.tick_lock.lock().await;

        let observed = self.observe(now).await?;
        let mut report = TickReport::default();

        for rule in self.store.active_rules().await? {
            let value = observed.value_for(rule.alert_type);
            if condition_met(&rule, value) {
                if let Some(alert) = self.fire(&rule, value, now).await? {
                    report.created.push(alert);
                }
            } else {
                for mut alert in self.store.active_alerts(Some(rule.id)).await? {
                    alert.resolve();
                    self.store.save_alert(&alert).await?;
                    log::info!("Alert {} ({}) resolved", alert.id, rule.name);
                    report.resolved.push(alert.id);
                }
            }
        }

        let snapshot = SystemMetric {
            id: Uuid::new_v4(),
            queue_size: observed.queue_size as i32,
            error_rate: observed.error_rate,
            disk_usage_percent: observed.disk_usage_percent,
            tools_available: observed.tools_available,
            avg_processing_time: observed.avg_processing_minutes,
            created_at: now,
        };
        self.store.record_system_metric(&snapshot).await?;
        report.snapshot = Some(snapshot);

        log::debug!(
            "Alert tick: {} created, {} resolved",
            report.created.len(),
            report.resolved.len()
        );
        Ok(report)
    }

    pub async fn observe(&self, now: DateTime<Utc>) -> Result<Observations, PipelineError> {
        let queue_size = self
            .store
            .videos_with_status(ProcessingStatus::Pending, None)
            .await?
            .len();
        let error_rate = self
            .store
            .outcomes_since(now - Duration::minutes(self.config.error_rate_window_minutes))
            .await?
            .error_rate();
        let avg_processing_minutes = self
            .store
            .average_processing_time(
                now - Duration::minutes(self.config.processing_time_window_minutes),
            )
            .await?
            .map(|secs| secs / 60.0)
            .unwrap_or(0.0);

        Ok(Observations {
            queue_size,
            error_rate,
            disk_usage_percent: self.guard.disk_usage_percent(&self.media_root),
            tools_available: self.guard.tools_available().await,
            avg_processing_minutes,
        })
    }

    async fn fire(
        &self,
        rule: &AlertRule,
        value: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<Alert>, PipelineError> {
        if let Some(last) = self.store.latest_alert(rule.id).await? {
            if now - last.created_at < Duration::minutes(rule.cooldown_minutes as i64) {
                log::debug!("Rule {} in cooldown since {}", rule.name, last.created_at);
                return Ok(None);
            }
        }

        let mut alert = Alert {
            id: Uuid::new_v4(),
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            severity: rule.severity,
            status: AlertStatus::Active,
            current_value: value,
            threshold: rule.threshold,
            message: alert_message(rule, value),
            email_sent: false,
            webhook_sent: false,
            created_at: now,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
        };
        log::warn!("Alert {}: {}", rule.name, alert.message);

        if !rule.email_recipients.is_empty() {
            match self.notifier.send_email(&rule.email_recipients, &alert).await {
                Ok(()) => alert.email_sent = true,
                Err(e) => log::error!("Alert email for {} failed: {}", rule.name, e),
            }
        }
        if let Some(url) = rule.webhook_url.as_deref().filter(|u| !u.is_empty()) {
            match self.notifier.send_webhook(url, &alert).await {
                Ok(()) => alert.webhook_sent = true,
                Err(e) => log::error!("Alert webhook for {} failed: {}", rule.name, e),
            }
        }

        self.store.save_alert(&alert).await?;
        Ok(Some(alert))
    }

    /// `active -> acknowledged`.
    pub async fn acknowledge(&self, alert_id: Uuid, by: &str) -> Result<Alert, PipelineError> {
        let mut alert = self.store.load_alert(alert_id).await?;
        if alert.status != AlertStatus::Active {
            return Err(PipelineError::InvalidState {
                id: alert_id,
                status: alert.status.to_string(),
                expected: "active",
            });
        }
        alert.acknowledge(by);
        self.store.save_alert(&alert).await?;
        log::info!("Alert {} acknowledged by {}", alert_id, by);
        Ok(alert)
    }

    pub async fn active_alerts(&self) -> Result<Vec<Alert>, StoreError> {
        self.store.active_alerts(None).await
    }

    pub async fn system_health(&self) -> Result<SystemHealth, PipelineError> {
        let observed = self.observe(Utc::now()).await?;
        let active_alerts = self.store.active_alerts(None).await?.len();
        let last_snapshot = self.store.recent_system_metrics(1).await?.into_iter().next();
        Ok(SystemHealth {
            healthy: observed.tools_available,
            tools_available: observed.tools_available,
            disk_usage_percent: observed.disk_usage_percent,
            queue_size: observed.queue_size,
            active_alerts,
            last_snapshot,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Severity, Video};
    use crate::repository::{AlertRepository, MemoryStore, VideoRepository};
    use crate::test_utils::{FakeTools, FixedProbe, RecordingNotifier};

    struct Fixture {
        store: Arc<MemoryStore>,
        tools: Arc<FakeTools>,
        notifier: Arc<RecordingNotifier>,
        engine: AlertEngine,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let tools = Arc::new(FakeTools::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let guard = Arc::new(Guard::new(
            Arc::new(FixedProbe::free_mb(50_000)),
            tools.clone(),
            0,
        ));
        let engine = AlertEngine::new(
            store.clone(),
            guard,
            notifier.clone(),
            PathBuf::from("/media"),
            AlertConfig::default(),
        );
        Fixture {
            store,
            tools,
            notifier,
            engine,
        }
    }

    async fn queue_rule(fx: &Fixture, threshold: f64) -> AlertRule {
        let mut rule = AlertRule::new("High queue size", AlertType::QueueSize, threshold, Severity::Warning);
        rule.email_recipients = vec!["ops@example.com".into()];
        rule.webhook_url = Some("http://hooks.local/alert".into());
        fx.store.save_rule(&rule).await.unwrap();
        rule
    }

    async fn add_pending(fx: &Fixture, n: usize) {
        for i in 0..n {
            fx.store
                .save_video(&Video::new(format!("v{i}"), "/src.mp4", None))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn seeds_defaults_once() {
        let fx = fixture();
        let seeded = fx.engine.seed_default_rules().await.unwrap();
        assert_eq!(seeded, AlertRule::default_rules().len());
        assert_eq!(fx.engine.seed_default_rules().await.unwrap(), 0);
        assert_eq!(fx.store.active_rules().await.unwrap().len(), seeded);
    }

    #[test]
    fn messages() {
        let rule = AlertRule::new("q", AlertType::QueueSize, 50.0, Severity::Warning);
        assert_eq!(
            alert_message(&rule, 57.0),
            "Queue size is high: 57 tasks (threshold: 50)"
        );
        let rule = AlertRule::new("e", AlertType::ErrorRate, 20.0, Severity::Critical);
        assert_eq!(
            alert_message(&rule, 33.333),
            "Error rate is high: 33.3% (threshold: 20.0%)"
        );
    }

    #[tokio::test]
    async fn fires_and_delivers_both_channels() {
        let fx = fixture();
        queue_rule(&fx, 2.0).await;
        add_pending(&fx, 3).await;

        let report = fx.engine.tick().await.unwrap();

        assert_eq!(report.created.len(), 1);
        let alert = &report.created[0];
        assert_eq!(alert.current_value, 3.0);
        assert!(alert.email_sent);
        assert!(alert.webhook_sent);
        assert_eq!(fx.notifier.emails(), 1);
        assert_eq!(fx.notifier.webhooks(), 1);
    }

    #[tokio::test]
    async fn failed_webhook_does_not_block_email() {
        let fx = fixture();
        queue_rule(&fx, 1.0).await;
        add_pending(&fx, 1).await;
        fx.notifier.fail_webhooks();

        let report = fx.engine.tick().await.unwrap();

        let alert = &report.created[0];
        assert!(alert.email_sent);
        assert!(!alert.webhook_sent);
        assert_eq!(fx.store.all_alerts().await.len(), 1);
    }

    #[tokio::test]
    async fn cooldown_limits_alerts_per_window() {
        let fx = fixture();
        let rule = queue_rule(&fx, 1.0).await;
        assert_eq!(rule.cooldown_minutes, 15);
        add_pending(&fx, 1).await;

        let start = Utc::now();
        for minute in (0..=40).step_by(5) {
            fx.engine
                .tick_at(start + Duration::minutes(minute))
                .await
                .unwrap();
        }

        let mut created: Vec<_> = fx
            .store
            .all_alerts()
            .await
            .into_iter()
            .map(|a| a.created_at)
            .collect();
        created.sort();
        // fires at 0, 15 and 30
        assert_eq!(created.len(), 3);
        for pair in created.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::minutes(15));
        }
        assert_eq!(fx.store.system_metric_count().await, 9);
    }

    #[tokio::test]
    async fn clears_resolve_active_alerts() {
        let fx = fixture();
        let mut rule = AlertRule::new(
            "Transcoder unavailable",
            AlertType::ToolUnavailable,
            1.0,
            Severity::Critical,
        );
        rule.cooldown_minutes = 60;
        fx.store.save_rule(&rule).await.unwrap();

        fx.tools.set_available(false);
        let fired = fx.engine.tick().await.unwrap();
        assert_eq!(fired.created.len(), 1);
        assert_eq!(
            fired.created[0].message,
            "FFmpeg is not available - video processing will fail"
        );

        fx.tools.set_available(true);
        let cleared = fx.engine.tick().await.unwrap();
        assert_eq!(cleared.resolved, vec![fired.created[0].id]);
        let stored = fx.store.load_alert(fired.created[0].id).await.unwrap();
        assert_eq!(stored.status, AlertStatus::Resolved);
        assert!(stored.resolved_at.is_some());
    }

    #[tokio::test]
    async fn snapshot_written_when_nothing_fires() {
        let fx = fixture();
        let report = fx.engine.tick().await.unwrap();
        assert!(report.created.is_empty());
        assert!(report.snapshot.unwrap().tools_available);
        assert_eq!(fx.store.system_metric_count().await, 1);
    }

    #[tokio::test]
    async fn acknowledge_only_active() {
        let fx = fixture();
        queue_rule(&fx, 1.0).await;
        add_pending(&fx, 1).await;
        let alert = fx.engine.tick().await.unwrap().created.remove(0);

        let acked = fx.engine.acknowledge(alert.id, "oncall").await.unwrap();
        assert_eq!(acked.status, AlertStatus::Acknowledged);
        assert_eq!(acked.acknowledged_by.as_deref(), Some("oncall"));

        assert!(matches!(
            fx.engine.acknowledge(alert.id, "oncall").await,
            Err(PipelineError::InvalidState { .. })
        ));
    }
}
