use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Declares a string-backed enum with `as_str`, `Display` and `FromStr`.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $field:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = StoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(StoreError::InvalidValue {
                        field: $field,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum!(
    /// Lifecycle of a video through the pipeline.
    ProcessingStatus, "processing_status" {
        Pending => "pending",
        Processing => "processing",
        Success => "success",
        Failed => "failed",
    }
);

string_enum!(MetricStatus, "metric_status" {
    Success => "success",
    Error => "error",
});

string_enum!(StreamProtocol, "protocol" {
    Hls => "hls",
    Dash => "dash",
});

string_enum!(AlertType, "alert_type" {
    QueueSize => "queue_size",
    ErrorRate => "error_rate",
    ToolUnavailable => "tool_unavailable",
    DiskSpace => "disk_space",
    ProcessingTime => "processing_time",
});

string_enum!(Severity, "severity" {
    Info => "info",
    Warning => "warning",
    Critical => "critical",
});

string_enum!(AlertStatus, "alert_status" {
    Active => "active",
    Acknowledged => "acknowledged",
    Resolved => "resolved",
});

impl StreamProtocol {
    pub const ALL: [StreamProtocol; 2] = [StreamProtocol::Hls, StreamProtocol::Dash];
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Video {
    pub id: Uuid,
    pub title: String,
    pub owner_id: Option<Uuid>,
    /// Uploaded source file awaiting or undergoing processing.
    pub source_path: String,
    pub processing_status: ProcessingStatus,
    pub processing_progress: i32,
    /// Whole seconds.
    pub duration: Option<i32>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub video_codec: Option<String>,
    pub container_format: Option<String>,
    pub bitrate_kbps: Option<i32>,
    pub fps: Option<f64>,
    pub has_audio: bool,
    pub file_size: Option<i64>,
    pub poster_path: Option<String>,
    pub preview_path: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Video {
    pub fn new(title: impl Into<String>, source_path: impl Into<String>, owner_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            owner_id,
            source_path: source_path.into(),
            processing_status: ProcessingStatus::Pending,
            processing_progress: 0,
            duration: None,
            width: None,
            height: None,
            video_codec: None,
            container_format: None,
            bitrate_kbps: None,
            fps: None,
            has_audio: false,
            file_size: None,
            poster_path: None,
            preview_path: None,
            error_message: None,
            retry_count: 0,
            processing_started_at: None,
            processing_finished_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.processing_status == ProcessingStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        self.processing_status == ProcessingStatus::Failed
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) {
        let now = Utc::now();
        self.processing_status = ProcessingStatus::Failed;
        self.error_message = Some(message.into());
        self.processing_finished_at = Some(now);
        self.updated_at = now;
    }

    /// `failed -> pending`. Returns false for any other status.
    pub fn reset_for_retry(&mut self) -> bool {
        if self.processing_status != ProcessingStatus::Failed {
            return false;
        }
        self.processing_status = ProcessingStatus::Pending;
        self.processing_progress = 0;
        self.error_message = None;
        self.processing_started_at = None;
        self.processing_finished_at = None;
        self.updated_at = Utc::now();
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncodingProfile {
    pub id: Uuid,
    /// Rendition label, e.g. `720p`; used for directory and file names.
    pub name: String,
    pub width: i32,
    pub height: i32,
    /// Video bitrate in kbps.
    pub bitrate: i32,
    pub is_active: bool,
    pub sort_order: i32,
}

impl EncodingProfile {
    pub fn new(name: &str, width: i32, height: i32, bitrate: i32, sort_order: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            width,
            height,
            bitrate,
            is_active: true,
            sort_order,
        }
    }

    /// Bandwidth in bits per second as advertised in master manifests.
    pub fn bandwidth(&self) -> i64 {
        self.bitrate as i64 * 1000
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncodedFile {
    pub id: Uuid,
    pub video_id: Uuid,
    pub profile_id: Uuid,
    pub profile_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub duration: Option<i32>,
    pub width: i32,
    pub height: i32,
    pub bitrate: i32,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingMetric {
    pub id: Uuid,
    pub video_id: Uuid,
    pub profile_id: Option<Uuid>,
    pub profile_name: String,
    /// Seconds spent on the attempt.
    pub processing_time: f64,
    pub input_size: i64,
    pub output_size: Option<i64>,
    pub bitrate: Option<i32>,
    pub status: MetricStatus,
    pub error_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stream {
    pub id: Uuid,
    pub video_id: Uuid,
    pub protocol: StreamProtocol,
    pub profile_id: Uuid,
    pub profile_name: String,
    pub manifest_path: String,
    pub segment_count: i32,
    pub total_size: i64,
    pub is_ready: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertRule {
    pub id: Uuid,
    pub name: String,
    pub alert_type: AlertType,
    pub threshold: f64,
    pub severity: Severity,
    pub cooldown_minutes: i32,
    pub is_active: bool,
    pub email_recipients: Vec<String>,
    pub webhook_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AlertRule {
    pub fn new(name: &str, alert_type: AlertType, threshold: f64, severity: Severity) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            alert_type,
            threshold,
            severity,
            cooldown_minutes: 15,
            is_active: true,
            email_recipients: Vec::new(),
            webhook_url: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_cooldown(mut self, minutes: i32) -> Self {
        self.cooldown_minutes = minutes;
        self
    }

    /// Rule set seeded on a fresh install.
    pub fn default_rules() -> Vec<AlertRule> {
        vec![
            AlertRule::new("High queue size", AlertType::QueueSize, 50.0, Severity::Warning)
                .with_cooldown(30),
            AlertRule::new("Critical queue size", AlertType::QueueSize, 100.0, Severity::Critical)
                .with_cooldown(15),
            AlertRule::new("High error rate", AlertType::ErrorRate, 20.0, Severity::Critical)
                .with_cooldown(30),
            AlertRule::new("Transcoder unavailable", AlertType::ToolUnavailable, 1.0, Severity::Critical)
                .with_cooldown(60),
            AlertRule::new("Disk space low", AlertType::DiskSpace, 85.0, Severity::Warning)
                .with_cooldown(60),
            AlertRule::new("Disk space critical", AlertType::DiskSpace, 95.0, Severity::Critical)
                .with_cooldown(30),
            AlertRule::new("Slow processing", AlertType::ProcessingTime, 30.0, Severity::Warning)
                .with_cooldown(60),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub rule_name: String,
    pub severity: Severity,
    pub status: AlertStatus,
    pub current_value: f64,
    pub threshold: f64,
    pub message: String,
    pub email_sent: bool,
    pub webhook_sent: bool,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn acknowledge(&mut self, by: &str) {
        self.status = AlertStatus::Acknowledged;
        self.acknowledged_at = Some(Utc::now());
        self.acknowledged_by = Some(by.to_string());
    }

    pub fn resolve(&mut self) {
        self.status = AlertStatus::Resolved;
        self.resolved_at = Some(Utc::now());
    }
}

/// Periodic health snapshot written by every alert tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemMetric {
    pub id: Uuid,
    pub queue_size: i32,
    /// Percentage, 0-100.
    pub error_rate: f64,
    pub disk_usage_percent: f64,
    pub tools_available: bool,
    /// Minutes.
    pub avg_processing_time: f64,
    pub created_at: DateTime<Utc>,
}

/// What the priority manager needs to know about an uploader.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: Uuid,
    pub is_premium: bool,
    pub is_staff: bool,
    /// Explicit per-account priority for elevated accounts.
    pub priority: Option<i32>,
    pub video_count: i64,
}

impl Account {
    pub fn is_elevated(&self) -> bool {
        self.is_premium || self.is_staff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        assert_eq!("failed".parse::<ProcessingStatus>().unwrap(), ProcessingStatus::Failed);
        assert_eq!(ProcessingStatus::Processing.to_string(), "processing");
        assert!("done".parse::<ProcessingStatus>().is_err());
    }

    #[test]
    fn retry_only_from_failed() {
        let mut video = Video::new("clip", "/tmp/clip.mp4", None);
        assert!(!video.reset_for_retry());

        video.mark_failed("boom");
        assert!(video.reset_for_retry());
        assert_eq!(video.processing_status, ProcessingStatus::Pending);
        assert_eq!(video.error_message, None);
        assert_eq!(video.processing_progress, 0);
    }

    #[test]
    fn default_rules_cover_every_type() {
        let rules = AlertRule::default_rules();
        for kind in [
            AlertType::QueueSize,
            AlertType::ErrorRate,
            AlertType::ToolUnavailable,
            AlertType::DiskSpace,
            AlertType::ProcessingTime,
        ] {
            assert!(rules.iter().any(|r| r.alert_type == kind), "missing {kind}");
        }
    }
}
