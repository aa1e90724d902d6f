use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::pooled_connection::deadpool::Object;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use super::models::{
    AccountRow, AlertRow, AlertRuleRow, EncodedFileRow, MetricRow, ProfileRow, StreamRow,
    SystemMetricRow, VideoRow,
};
use super::schema::{
    accounts, alert_rules, alerts, encoded_files, encoding_profiles, processing_metrics,
    system_metrics, video_streams, videos,
};
use super::DbPool;
use crate::error::StoreError;
use crate::models::{
    Account, Alert, AlertRule, AlertStatus, EncodedFile, EncodingProfile, MetricStatus,
    ProcessingMetric, ProcessingStatus, Stream, StreamProtocol, SystemMetric, Video,
};
use crate::repository::{
    AccountRepository, AlertRepository, EncodedFileRepository, MetricRepository, OutcomeCounts,
    ProfileRepository, StreamRepository, VideoRepository,
};

type Conn = Object<AsyncPgConnection>;

/// Postgres-backed implementation of every repository trait.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<Conn, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }
}

#[async_trait]
impl VideoRepository for PgStore {
    async fn load_video(&self, id: Uuid) -> Result<Video, StoreError> {
        let conn = &mut self.conn().await?;
        let row = videos::table
            .find(id)
            .select(VideoRow::as_select())
            .first(conn)
            .await
            .optional()?
            .ok_or_else(|| StoreError::NotFound {
                entity: "video",
                id: id.to_string(),
            })?;
        row.try_into()
    }

    async fn save_video(&self, video: &Video) -> Result<(), StoreError> {
        let conn = &mut self.conn().await?;
        let row = VideoRow::from(video);
        diesel::insert_into(videos::table)
            .values(&row)
            .on_conflict(videos::id)
            .do_update()
            .set(&row)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn claim_video(&self, id: Uuid) -> Result<Option<Video>, StoreError> {
        let conn = &mut self.conn().await?;
        let now = Utc::now();
        let claimed = diesel::update(
            videos::table
                .filter(videos::id.eq(id))
                .filter(videos::processing_status.eq(ProcessingStatus::Pending.as_str())),
        )
        .set((
            videos::processing_status.eq(ProcessingStatus::Processing.as_str()),
            videos::processing_progress.eq(0),
            videos::processing_started_at.eq(Some(now)),
            videos::updated_at.eq(now),
        ))
        .returning(VideoRow::as_returning())
        .get_result(conn)
        .await
        .optional()?;

        match claimed {
            Some(row) => Ok(Some(row.try_into()?)),
            None => {
                let exists: i64 = videos::table
                    .filter(videos::id.eq(id))
                    .count()
                    .get_result(conn)
                    .await?;
                if exists == 0 {
                    return Err(StoreError::NotFound {
                        entity: "video",
                        id: id.to_string(),
                    });
                }
                Ok(None)
            }
        }
    }

    async fn videos_with_status(
        &self,
        status: ProcessingStatus,
        limit: Option<usize>,
    ) -> Result<Vec<Video>, StoreError> {
        let conn = &mut self.conn().await?;
        let mut query = videos::table
            .filter(videos::processing_status.eq(status.as_str()))
            .order(videos::created_at.asc())
            .select(VideoRow::as_select())
            .into_boxed();
        if let Some(limit) = limit {
            query = query.limit(limit as i64);
        }
        let rows = query.load(conn).await?;
        rows.into_iter().map(Video::try_from).collect()
    }

    async fn stuck_videos(&self, idle_since: DateTime<Utc>) -> Result<Vec<Video>, StoreError> {
        let conn = &mut self.conn().await?;
        let rows = videos::table
            .filter(videos::processing_status.eq(ProcessingStatus::Processing.as_str()))
            .filter(videos::updated_at.lt(idle_since))
            .select(VideoRow::as_select())
            .load(conn)
            .await?;
        rows.into_iter().map(Video::try_from).collect()
    }

    async fn outcomes_since(&self, since: DateTime<Utc>) -> Result<OutcomeCounts, StoreError> {
        let conn = &mut self.conn().await?;
        let succeeded: i64 = videos::table
            .filter(videos::updated_at.ge(since))
            .filter(videos::processing_status.eq(ProcessingStatus::Success.as_str()))
            .count()
            .get_result(conn)
            .await?;
        let failed: i64 = videos::table
            .filter(videos::updated_at.ge(since))
            .filter(videos::processing_status.eq(ProcessingStatus::Failed.as_str()))
            .count()
            .get_result(conn)
            .await?;
        Ok(OutcomeCounts {
            succeeded: succeeded as u64,
            failed: failed as u64,
        })
    }
}

#[async_trait]
impl ProfileRepository for PgStore {
    async fn active_profiles(&self) -> Result<Vec<EncodingProfile>, StoreError> {
        let conn = &mut self.conn().await?;
        let rows = encoding_profiles::table
            .filter(encoding_profiles::is_active.eq(true))
            .order(encoding_profiles::sort_order.asc())
            .select(ProfileRow::as_select())
            .load(conn)
            .await?;
        Ok(rows.into_iter().map(EncodingProfile::from).collect())
    }

    async fn save_profile(&self, profile: &EncodingProfile) -> Result<(), StoreError> {
        let conn = &mut self.conn().await?;
        let row = ProfileRow::from(profile);
        diesel::insert_into(encoding_profiles::table)
            .values(&row)
            .on_conflict(encoding_profiles::id)
            .do_update()
            .set(&row)
            .execute(conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EncodedFileRepository for PgStore {
    async fn replace_encoded_files(
        &self,
        video_id: Uuid,
        files: &[EncodedFile],
    ) -> Result<(), StoreError> {
        let conn = &mut self.conn().await?;
        let rows: Vec<EncodedFileRow> = files.iter().map(EncodedFileRow::from).collect();
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                diesel::delete(encoded_files::table.filter(encoded_files::video_id.eq(video_id)))
                    .execute(conn)
                    .await?;
                if !rows.is_empty() {
                    diesel::insert_into(encoded_files::table)
                        .values(&rows)
                        .execute(conn)
                        .await?;
                }
                Ok(())
            }
            .scope_boxed()
        })
        .await?;
        Ok(())
    }

    async fn encoded_files(&self, video_id: Uuid) -> Result<Vec<EncodedFile>, StoreError> {
        let conn = &mut self.conn().await?;
        let rows = encoded_files::table
            .filter(encoded_files::video_id.eq(video_id))
            .order(encoded_files::created_at.asc())
            .select(EncodedFileRow::as_select())
            .load(conn)
            .await?;
        Ok(rows.into_iter().map(EncodedFile::from).collect())
    }
}

#[async_trait]
impl MetricRepository for PgStore {
    async fn record_metric(&self, metric: &ProcessingMetric) -> Result<(), StoreError> {
        let conn = &mut self.conn().await?;
        diesel::insert_into(processing_metrics::table)
            .values(MetricRow::from(metric))
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn metrics_for_video(&self, video_id: Uuid) -> Result<Vec<ProcessingMetric>, StoreError> {
        let conn = &mut self.conn().await?;
        let rows = processing_metrics::table
            .filter(processing_metrics::video_id.eq(video_id))
            .order(processing_metrics::created_at.asc())
            .select(MetricRow::as_select())
            .load(conn)
            .await?;
        rows.into_iter().map(ProcessingMetric::try_from).collect()
    }

    async fn average_processing_time(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Option<f64>, StoreError> {
        let conn = &mut self.conn().await?;
        let avg: Option<f64> = processing_metrics::table
            .filter(processing_metrics::status.eq(MetricStatus::Success.as_str()))
            .filter(processing_metrics::created_at.ge(since))
            .select(diesel::dsl::avg(processing_metrics::processing_time))
            .first(conn)
            .await?;
        Ok(avg)
    }
}

#[async_trait]
impl StreamRepository for PgStore {
    async fn find_stream(
        &self,
        video_id: Uuid,
        protocol: StreamProtocol,
        profile_id: Uuid,
    ) -> Result<Option<Stream>, StoreError> {
        let conn = &mut self.conn().await?;
        let row = video_streams::table
            .filter(video_streams::video_id.eq(video_id))
            .filter(video_streams::protocol.eq(protocol.as_str()))
            .filter(video_streams::profile_id.eq(profile_id))
            .select(StreamRow::as_select())
            .first(conn)
            .await
            .optional()?;
        row.map(Stream::try_from).transpose()
    }

    async fn save_stream(&self, stream: &Stream) -> Result<(), StoreError> {
        let conn = &mut self.conn().await?;
        diesel::insert_into(video_streams::table)
            .values(StreamRow::from(stream))
            .on_conflict((
                video_streams::video_id,
                video_streams::protocol,
                video_streams::profile_id,
            ))
            .do_update()
            .set((
                video_streams::profile_name.eq(excluded(video_streams::profile_name)),
                video_streams::manifest_path.eq(excluded(video_streams::manifest_path)),
                video_streams::segment_count.eq(excluded(video_streams::segment_count)),
                video_streams::total_size.eq(excluded(video_streams::total_size)),
                video_streams::is_ready.eq(excluded(video_streams::is_ready)),
                video_streams::updated_at.eq(excluded(video_streams::updated_at)),
            ))
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn ready_streams(
        &self,
        video_id: Uuid,
        protocol: StreamProtocol,
    ) -> Result<Vec<Stream>, StoreError> {
        let conn = &mut self.conn().await?;
        let rows = video_streams::table
            .filter(video_streams::video_id.eq(video_id))
            .filter(video_streams::protocol.eq(protocol.as_str()))
            .filter(video_streams::is_ready.eq(true))
            .select(StreamRow::as_select())
            .load(conn)
            .await?;
        rows.into_iter().map(Stream::try_from).collect()
    }
}

#[async_trait]
impl AlertRepository for PgStore {
    async fn active_rules(&self) -> Result<Vec<AlertRule>, StoreError> {
        let conn = &mut self.conn().await?;
        let rows = alert_rules::table
            .filter(alert_rules::is_active.eq(true))
            .order(alert_rules::created_at.asc())
            .select(AlertRuleRow::as_select())
            .load(conn)
            .await?;
        rows.into_iter().map(AlertRule::try_from).collect()
    }

    async fn save_rule(&self, rule: &AlertRule) -> Result<(), StoreError> {
        let conn = &mut self.conn().await?;
        let row = AlertRuleRow::from(rule);
        diesel::insert_into(alert_rules::table)
            .values(&row)
            .on_conflict(alert_rules::id)
            .do_update()
            .set(&row)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn latest_alert(&self, rule_id: Uuid) -> Result<Option<Alert>, StoreError> {
        let conn = &mut self.conn().await?;
        let row = alerts::table
            .filter(alerts::rule_id.eq(rule_id))
            .order(alerts::created_at.desc())
            .select(AlertRow::as_select())
            .first(conn)
            .await
            .optional()?;
        row.map(Alert::try_from).transpose()
    }

    async fn active_alerts(&self, rule_id: Option<Uuid>) -> Result<Vec<Alert>, StoreError> {
        let conn = &mut self.conn().await?;
        let mut query = alerts::table
            .filter(alerts::status.eq(AlertStatus::Active.as_str()))
            .order(alerts::created_at.desc())
            .select(AlertRow::as_select())
            .into_boxed();
        if let Some(rule_id) = rule_id {
            query = query.filter(alerts::rule_id.eq(rule_id));
        }
        let rows = query.load(conn).await?;
        rows.into_iter().map(Alert::try_from).collect()
    }

    async fn load_alert(&self, id: Uuid) -> Result<Alert, StoreError> {
        let conn = &mut self.conn().await?;
        let row = alerts::table
            .find(id)
            .select(AlertRow::as_select())
            .first(conn)
            .await
            .optional()?
            .ok_or_else(|| StoreError::NotFound {
                entity: "alert",
                id: id.to_string(),
            })?;
        row.try_into()
    }

    async fn save_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        let conn = &mut self.conn().await?;
        let row = AlertRow::from(alert);
        diesel::insert_into(alerts::table)
            .values(&row)
            .on_conflict(alerts::id)
            .do_update()
            .set(&row)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn record_system_metric(&self, metric: &SystemMetric) -> Result<(), StoreError> {
        let conn = &mut self.conn().await?;
        diesel::insert_into(system_metrics::table)
            .values(SystemMetricRow::from(metric))
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn recent_system_metrics(&self, limit: usize) -> Result<Vec<SystemMetric>, StoreError> {
        let conn = &mut self.conn().await?;
        let rows = system_metrics::table
            .order(system_metrics::created_at.desc())
            .limit(limit as i64)
            .select(SystemMetricRow::as_select())
            .load(conn)
            .await?;
        Ok(rows.into_iter().map(SystemMetric::from).collect())
    }
}

#[async_trait]
impl AccountRepository for PgStore {
    async fn account(&self, owner_id: Uuid) -> Result<Option<Account>, StoreError> {
        let conn = &mut self.conn().await?;
        let Some(row) = accounts::table
            .find(owner_id)
            .select(AccountRow::as_select())
            .first(conn)
            .await
            .optional()?
        else {
            return Ok(None);
        };
        let video_count: i64 = videos::table
            .filter(videos::owner_id.eq(owner_id))
            .count()
            .get_result(conn)
            .await?;
        Ok(Some(Account {
            id: row.id,
            is_premium: row.is_premium,
            is_staff: row.is_staff,
            priority: row.priority,
            video_count,
        }))
    }
}
