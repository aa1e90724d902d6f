use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::db::schema::{
    accounts, alert_rules, alerts, encoded_files, encoding_profiles, processing_metrics,
    system_metrics, video_streams, videos,
};
use crate::error::StoreError;
use crate::models::{
    Alert, AlertRule, EncodedFile, EncodingProfile, ProcessingMetric, Stream, SystemMetric, Video,
};

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = videos)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
pub struct VideoRow {
    pub id: Uuid,
    pub title: String,
    pub owner_id: Option<Uuid>,
    pub source_path: String,
    pub processing_status: String,
    pub processing_progress: i32,
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

impl From<&Video> for VideoRow {
    fn from(v: &Video) -> Self {
        Self {
            id: v.id,
            title: v.title.clone(),
            owner_id: v.owner_id,
            source_path: v.source_path.clone(),
            processing_status: v.processing_status.to_string(),
            processing_progress: v.processing_progress,
            duration: v.duration,
            width: v.width,
            height: v.height,
            video_codec: v.video_codec.clone(),
            container_format: v.container_format.clone(),
            bitrate_kbps: v.bitrate_kbps,
            fps: v.fps,
            has_audio: v.has_audio,
            file_size: v.file_size,
            poster_path: v.poster_path.clone(),
            preview_path: v.preview_path.clone(),
            error_message: v.error_message.clone(),
            retry_count: v.retry_count,
            processing_started_at: v.processing_started_at,
            processing_finished_at: v.processing_finished_at,
            created_at: v.created_at,
            updated_at: v.updated_at,
        }
    }
}

impl TryFrom<VideoRow> for Video {
    type Error = StoreError;

    fn try_from(r: VideoRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            title: r.title,
            owner_id: r.owner_id,
            source_path: r.source_path,
            processing_status: r.processing_status.parse()?,
            processing_progress: r.processing_progress,
            duration: r.duration,
            width: r.width,
            height: r.height,
            video_codec: r.video_codec,
            container_format: r.container_format,
            bitrate_kbps: r.bitrate_kbps,
            fps: r.fps,
            has_audio: r.has_audio,
            file_size: r.file_size,
            poster_path: r.poster_path,
            preview_path: r.preview_path,
            error_message: r.error_message,
            retry_count: r.retry_count,
            processing_started_at: r.processing_started_at,
            processing_finished_at: r.processing_finished_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = encoding_profiles)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ProfileRow {
    pub id: Uuid,
    pub name: String,
    pub width: i32,
    pub height: i32,
    pub bitrate: i32,
    pub is_active: bool,
    pub sort_order: i32,
}

impl From<&EncodingProfile> for ProfileRow {
    fn from(p: &EncodingProfile) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            width: p.width,
            height: p.height,
            bitrate: p.bitrate,
            is_active: p.is_active,
            sort_order: p.sort_order,
        }
    }
}

impl From<ProfileRow> for EncodingProfile {
    fn from(r: ProfileRow) -> Self {
        Self {
            id: r.id,
            name: r.name,
            width: r.width,
            height: r.height,
            bitrate: r.bitrate,
            is_active: r.is_active,
            sort_order: r.sort_order,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = encoded_files)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct EncodedFileRow {
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

impl From<&EncodedFile> for EncodedFileRow {
    fn from(f: &EncodedFile) -> Self {
        Self {
            id: f.id,
            video_id: f.video_id,
            profile_id: f.profile_id,
            profile_name: f.profile_name.clone(),
            file_path: f.file_path.clone(),
            file_size: f.file_size,
            duration: f.duration,
            width: f.width,
            height: f.height,
            bitrate: f.bitrate,
            is_primary: f.is_primary,
            created_at: f.created_at,
        }
    }
}

impl From<EncodedFileRow> for EncodedFile {
    fn from(r: EncodedFileRow) -> Self {
        Self {
            id: r.id,
            video_id: r.video_id,
            profile_id: r.profile_id,
            profile_name: r.profile_name,
            file_path: r.file_path,
            file_size: r.file_size,
            duration: r.duration,
            width: r.width,
            height: r.height,
            bitrate: r.bitrate,
            is_primary: r.is_primary,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = processing_metrics)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MetricRow {
    pub id: Uuid,
    pub video_id: Uuid,
    pub profile_id: Option<Uuid>,
    pub profile_name: String,
    pub processing_time: f64,
    pub input_size: i64,
    pub output_size: Option<i64>,
    pub bitrate: Option<i32>,
    pub status: String,
    pub error_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&ProcessingMetric> for MetricRow {
    fn from(m: &ProcessingMetric) -> Self {
        Self {
            id: m.id,
            video_id: m.video_id,
            profile_id: m.profile_id,
            profile_name: m.profile_name.clone(),
            processing_time: m.processing_time,
            input_size: m.input_size,
            output_size: m.output_size,
            bitrate: m.bitrate,
            status: m.status.to_string(),
            error_text: m.error_text.clone(),
            created_at: m.created_at,
        }
    }
}

impl TryFrom<MetricRow> for ProcessingMetric {
    type Error = StoreError;

    fn try_from(r: MetricRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            video_id: r.video_id,
            profile_id: r.profile_id,
            profile_name: r.profile_name,
            processing_time: r.processing_time,
            input_size: r.input_size,
            output_size: r.output_size,
            bitrate: r.bitrate,
            status: r.status.parse()?,
            error_text: r.error_text,
            created_at: r.created_at,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = video_streams)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct StreamRow {
    pub id: Uuid,
    pub video_id: Uuid,
    pub protocol: String,
    pub profile_id: Uuid,
    pub profile_name: String,
    pub manifest_path: String,
    pub segment_count: i32,
    pub total_size: i64,
    pub is_ready: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Stream> for StreamRow {
    fn from(s: &Stream) -> Self {
        Self {
            id: s.id,
            video_id: s.video_id,
            protocol: s.protocol.to_string(),
            profile_id: s.profile_id,
            profile_name: s.profile_name.clone(),
            manifest_path: s.manifest_path.clone(),
            segment_count: s.segment_count,
            total_size: s.total_size,
            is_ready: s.is_ready,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

impl TryFrom<StreamRow> for Stream {
    type Error = StoreError;

    fn try_from(r: StreamRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            video_id: r.video_id,
            protocol: r.protocol.parse()?,
            profile_id: r.profile_id,
            profile_name: r.profile_name,
            manifest_path: r.manifest_path,
            segment_count: r.segment_count,
            total_size: r.total_size,
            is_ready: r.is_ready,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = alert_rules)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
pub struct AlertRuleRow {
    pub id: Uuid,
    pub name: String,
    pub alert_type: String,
    pub threshold: f64,
    pub severity: String,
    pub cooldown_minutes: i32,
    pub is_active: bool,
    pub email_recipients: Vec<String>,
    pub webhook_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&AlertRule> for AlertRuleRow {
    fn from(r: &AlertRule) -> Self {
        Self {
            id: r.id,
            name: r.name.clone(),
            alert_type: r.alert_type.to_string(),
            threshold: r.threshold,
            severity: r.severity.to_string(),
            cooldown_minutes: r.cooldown_minutes,
            is_active: r.is_active,
            email_recipients: r.email_recipients.clone(),
            webhook_url: r.webhook_url.clone(),
            created_at: r.created_at,
        }
    }
}

impl TryFrom<AlertRuleRow> for AlertRule {
    type Error = StoreError;

    fn try_from(r: AlertRuleRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            name: r.name,
            alert_type: r.alert_type.parse()?,
            threshold: r.threshold,
            severity: r.severity.parse()?,
            cooldown_minutes: r.cooldown_minutes,
            is_active: r.is_active,
            email_recipients: r.email_recipients,
            webhook_url: r.webhook_url,
            created_at: r.created_at,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = alerts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
pub struct AlertRow {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub rule_name: String,
    pub severity: String,
    pub status: String,
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

impl From<&Alert> for AlertRow {
    fn from(a: &Alert) -> Self {
        Self {
            id: a.id,
            rule_id: a.rule_id,
            rule_name: a.rule_name.clone(),
            severity: a.severity.to_string(),
            status: a.status.to_string(),
            current_value: a.current_value,
            threshold: a.threshold,
            message: a.message.clone(),
            email_sent: a.email_sent,
            webhook_sent: a.webhook_sent,
            created_at: a.created_at,
            acknowledged_at: a.acknowledged_at,
            acknowledged_by: a.acknowledged_by.clone(),
            resolved_at: a.resolved_at,
        }
    }
}

impl TryFrom<AlertRow> for Alert {
    type Error = StoreError;

    fn try_from(r: AlertRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            rule_id: r.rule_id,
            rule_name: r.rule_name,
            severity: r.severity.parse()?,
            status: r.status.parse()?,
            current_value: r.current_value,
            threshold: r.threshold,
            message: r.message,
            email_sent: r.email_sent,
            webhook_sent: r.webhook_sent,
            created_at: r.created_at,
            acknowledged_at: r.acknowledged_at,
            acknowledged_by: r.acknowledged_by,
            resolved_at: r.resolved_at,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = system_metrics)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SystemMetricRow {
    pub id: Uuid,
    pub queue_size: i32,
    pub error_rate: f64,
    pub disk_usage_percent: f64,
    pub tools_available: bool,
    pub avg_processing_time: f64,
    pub created_at: DateTime<Utc>,
}

impl From<&SystemMetric> for SystemMetricRow {
    fn from(m: &SystemMetric) -> Self {
        Self {
            id: m.id,
            queue_size: m.queue_size,
            error_rate: m.error_rate,
            disk_usage_percent: m.disk_usage_percent,
            tools_available: m.tools_available,
            avg_processing_time: m.avg_processing_time,
            created_at: m.created_at,
        }
    }
}

impl From<SystemMetricRow> for SystemMetric {
    fn from(r: SystemMetricRow) -> Self {
        Self {
            id: r.id,
            queue_size: r.queue_size,
            error_rate: r.error_rate,
            disk_usage_percent: r.disk_usage_percent,
            tools_available: r.tools_available,
            avg_processing_time: r.avg_processing_time,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = accounts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AccountRow {
    pub id: Uuid,
    pub is_premium: bool,
    pub is_staff: bool,
    pub priority: Option<i32>,
}
