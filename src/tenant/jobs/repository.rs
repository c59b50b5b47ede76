/*
 * This file is part of the Insights Analytics backend.
 *
 * Copyright (C) 2025 Insights Analytics contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::common::error::RepositoryResult;
use crate::manager::app::database::PgSessionRouter;
use crate::tenant::jobs::dto::{IngestionJobRequest, JobStatusUpdate};
use crate::tenant::jobs::model::ProcessingJob;
use crate::tenant::jobs::types::JobStatus;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait JobsRepository: Send + Sync {
    /// Inserts the queued job row. `progress` and `records_processed` start
    /// as empty objects.
    async fn create_job(
        &self,
        tenant_id: Uuid,
        job_id: &str,
        request: &IngestionJobRequest,
    ) -> RepositoryResult<ProcessingJob>;

    /// Applies a sparse status update. Returns whether the row existed.
    async fn update_job_status(
        &self,
        tenant_id: Uuid,
        job_id: &str,
        status: JobStatus,
        update: JobStatusUpdate,
    ) -> RepositoryResult<bool>;

    async fn get_job(&self, tenant_id: Uuid, job_id: &str)
    -> RepositoryResult<Option<ProcessingJob>>;
}

#[async_trait]
impl JobsRepository for PgSessionRouter {
    async fn create_job(
        &self,
        tenant_id: Uuid,
        job_id: &str,
        request: &IngestionJobRequest,
    ) -> RepositoryResult<ProcessingJob> {
        let data_types = serde_json::to_value(&request.data_types)
            .unwrap_or_else(|_| serde_json::Value::Array(vec![]));
        let start_date = request.start_date;
        let end_date = request.end_date;
        let job_id = job_id.to_string();
        self.with_session(tenant_id, move |conn| {
            Box::pin(async move {
                Ok(sqlx::query_as::<_, ProcessingJob>(
                    r#"
                    INSERT INTO processing_jobs (
                        job_id, tenant_id, status, data_types,
                        start_date, end_date, progress, records_processed, created_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, '{}'::jsonb, '{}'::jsonb, NOW())
                    RETURNING *
                    "#,
                )
                .bind(job_id)
                .bind(tenant_id)
                .bind(JobStatus::Queued.as_str())
                .bind(data_types)
                .bind(start_date)
                .bind(end_date)
                .fetch_one(&mut *conn)
                .await?)
            })
        })
        .await
    }

    async fn update_job_status(
        &self,
        tenant_id: Uuid,
        job_id: &str,
        status: JobStatus,
        update: JobStatusUpdate,
    ) -> RepositoryResult<bool> {
        let job_id = job_id.to_string();
        self.with_session(tenant_id, move |conn| {
            Box::pin(async move {
                let mut qb = QueryBuilder::<Postgres>::new("UPDATE processing_jobs SET status = ");
                qb.push_bind(status.as_str());
                if let Some(started_at) = update.started_at {
                    qb.push(", started_at = ").push_bind(started_at);
                }
                if let Some(completed_at) = update.completed_at {
                    qb.push(", completed_at = ").push_bind(completed_at);
                }
                if let Some(error_message) = update.error_message {
                    qb.push(", error_message = ").push_bind(error_message);
                }
                if let Some(progress) = update.progress {
                    qb.push(", progress = ").push_bind(progress);
                }
                if let Some(records_processed) = update.records_processed {
                    qb.push(", records_processed = ").push_bind(records_processed);
                }
                qb.push(" WHERE tenant_id = ").push_bind(tenant_id);
                qb.push(" AND job_id = ").push_bind(job_id);
                let affected = qb.build().execute(&mut *conn).await?.rows_affected();
                Ok(affected > 0)
            })
        })
        .await
    }

    async fn get_job(
        &self,
        tenant_id: Uuid,
        job_id: &str,
    ) -> RepositoryResult<Option<ProcessingJob>> {
        let job_id = job_id.to_string();
        self.with_session(tenant_id, move |conn| {
            Box::pin(async move {
                Ok(sqlx::query_as::<_, ProcessingJob>(
                    r#"
                    SELECT *
                    FROM processing_jobs
                    WHERE tenant_id = $1
                        AND job_id = $2
                    "#,
                )
                .bind(tenant_id)
                .bind(job_id)
                .fetch_optional(&mut *conn)
                .await?)
            })
        })
        .await
    }
}
