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

use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::common::error::{ExtractorError, RepositoryError};
use crate::tenant::events::model::{EventType, EventsByType, SearchEvent};
use crate::tenant::jobs::IngestionModule;
use crate::tenant::jobs::dto::{IngestionJobRequest, JobStatusUpdate, RecordsProcessed};
use crate::tenant::jobs::model::ProcessingJob;
use crate::tenant::jobs::types::{DataType, JobStatus};

/// Hard wall-clock budget for one job.
pub const JOB_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const TIMEOUT_MESSAGE: &str = "Job timed out after 30 minutes";

/// Page titles containing this marker identify searches that genuinely
/// returned nothing; the upstream site tags every search on the search page
/// as `no_search_results` regardless of outcome.
const NO_RESULTS_MARKER: &str = "No Results Found";

#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Extractor(#[from] ExtractorError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// A phase failure already normalized into its human-readable form.
    #[error("{0}")]
    Phase(String),

    #[error("{0}")]
    Other(String),
}

impl JobError {
    fn kind_name(&self) -> &'static str {
        match self {
            JobError::Config(_) => "ConfigurationError",
            JobError::Validation(_) => "ValidationError",
            JobError::Extractor(e) => e.kind_name(),
            JobError::Repository(_) => "DatabaseError",
            JobError::Phase(_) | JobError::Other(_) => "Error",
        }
    }
}

/// Per-phase context for the error-message normalizer.
struct PhaseFailure {
    action: &'static str,
    network_hint: &'static str,
    auth_hint: &'static str,
    missing_hint: Option<&'static str>,
}

const EVENTS_FAILURE: PhaseFailure = PhaseFailure {
    action: "extract events from BigQuery",
    network_hint: "Please check BigQuery configuration and network connectivity.",
    auth_hint: "Please check service account credentials.",
    missing_hint: None,
};

const USERS_FAILURE: PhaseFailure = PhaseFailure {
    action: "process users",
    network_hint: "Please check BigQuery/SFTP configuration and network connectivity.",
    auth_hint: "Please check service account or SFTP credentials.",
    missing_hint: None,
};

const LOCATIONS_FAILURE: PhaseFailure = PhaseFailure {
    action: "download locations data from SFTP",
    network_hint: "Please verify SFTP hostname in tenant configuration.",
    auth_hint: "Please check SFTP credentials.",
    missing_hint: Some("Please verify the file exists on the server."),
};

/// Maps a phase failure onto one of the normalized single-line messages by
/// scanning the error text. Stack traces never reach `error_message`.
fn classify_failure(ctx: &PhaseFailure, error: &JobError) -> String {
    let root_cause = error.to_string();
    let lowered = root_cause.to_lowercase();

    if ["nodename nor servname", "gaierror", "network/dns", "dns error"]
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        return format!(
            "Failed to {} - Network/DNS error. {}",
            ctx.action, ctx.network_hint
        );
    }
    if ["credentials", "authentication", "permission denied"]
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        return format!(
            "Failed to {} - Authentication error. {}",
            ctx.action, ctx.auth_hint
        );
    }
    if let Some(hint) = ctx.missing_hint
        && ["no such file", "file not found"]
            .iter()
            .any(|marker| lowered.contains(marker))
    {
        return format!("Failed to {} - File not found. {}", ctx.action, hint);
    }
    format!(
        "Failed to {} - {}: {}",
        ctx.action,
        error.kind_name(),
        root_cause
    )
}

/// Drives ingestion jobs from `queued` through a terminal status.
pub struct IngestionService;

impl IngestionService {
    /// Validates the request and inserts the queued job row.
    pub async fn create_job(
        module: &IngestionModule,
        job_id: &str,
        tenant_id: Uuid,
        request: &IngestionJobRequest,
    ) -> Result<ProcessingJob, JobError> {
        request.validate().map_err(JobError::Validation)?;
        Ok(module.jobs_repo.create_job(tenant_id, job_id, request).await?)
    }

    /// Runs a queued job with the 30-minute budget and a defensive outer
    /// wrapper: whatever happens, a terminal status is written.
    pub async fn run_job_safe(
        module: &IngestionModule,
        job_id: &str,
        tenant_id: Uuid,
        request: &IngestionJobRequest,
    ) {
        Self::run_job_with_budget(module, job_id, tenant_id, request, JOB_TIMEOUT).await
    }

    async fn run_job_with_budget(
        module: &IngestionModule,
        job_id: &str,
        tenant_id: Uuid,
        request: &IngestionJobRequest,
        budget: Duration,
    ) {
        match tokio::time::timeout(budget, Self::run_job(module, job_id, tenant_id, request)).await
        {
            Ok(Ok(results)) => {
                info!("Completed processing job {job_id}: {results:?}");
            }
            Ok(Err(e)) => {
                let mut message = e.to_string();
                if message.is_empty() {
                    message = format!(
                        "Job failed unexpectedly. Please contact administrator with job ID: {job_id}"
                    );
                }
                // run_job already attempted the failed write; repeat it here
                // in case that write itself was what blew up.
                if let Err(update_error) = module
                    .jobs_repo
                    .update_job_status(
                        tenant_id,
                        job_id,
                        JobStatus::Failed,
                        JobStatusUpdate::new().completed_now().error_message(message),
                    )
                    .await
                {
                    error!("Failed to update job status: {update_error}");
                }
            }
            Err(_) => {
                error!("Job {job_id} timed out after 30 minutes");
                if let Err(update_error) = module
                    .jobs_repo
                    .update_job_status(
                        tenant_id,
                        job_id,
                        JobStatus::Failed,
                        JobStatusUpdate::new()
                            .completed_now()
                            .error_message(TIMEOUT_MESSAGE),
                    )
                    .await
                {
                    error!("Failed to update job status after timeout: {update_error}");
                }
            }
        }
    }

    async fn run_job(
        module: &IngestionModule,
        job_id: &str,
        tenant_id: Uuid,
        request: &IngestionJobRequest,
    ) -> Result<RecordsProcessed, JobError> {
        match Self::run_phases(module, job_id, tenant_id, request).await {
            Ok(results) => Ok(results),
            Err(e) => {
                error!("Failed processing job {job_id}: {e}");
                if let Err(update_error) = module
                    .jobs_repo
                    .update_job_status(
                        tenant_id,
                        job_id,
                        JobStatus::Failed,
                        JobStatusUpdate::new()
                            .completed_now()
                            .error_message(e.to_string()),
                    )
                    .await
                {
                    error!("Failed to update job status: {update_error}");
                }
                Err(e)
            }
        }
    }

    /// The phase pipeline: events, then users, then locations, each only when
    /// requested. Partial failures accumulate warnings; a phase failure is
    /// fatal and already classified when it leaves here.
    async fn run_phases(
        module: &IngestionModule,
        job_id: &str,
        tenant_id: Uuid,
        request: &IngestionJobRequest,
    ) -> Result<RecordsProcessed, JobError> {
        request.validate().map_err(JobError::Validation)?;

        module
            .jobs_repo
            .update_job_status(
                tenant_id,
                job_id,
                JobStatus::Processing,
                JobStatusUpdate::new().started_now(),
            )
            .await?;

        let mut results = RecordsProcessed::default();
        let mut warnings: Vec<String> = Vec::new();

        if request.includes(DataType::Events) {
            info!("Processing events for job {job_id}");
            module
                .jobs_repo
                .update_job_status(
                    tenant_id,
                    job_id,
                    JobStatus::Processing,
                    JobStatusUpdate::new().progress_step("events"),
                )
                .await?;
            match Self::process_events(module, tenant_id, request).await {
                Ok((counts, event_warnings)) => {
                    for (event_type, count) in counts {
                        results.set_event_count(event_type, count);
                    }
                    warnings.extend(event_warnings);
                }
                Err(e) => {
                    error!("Failed to extract events from BigQuery: {e}");
                    return Err(JobError::Phase(classify_failure(&EVENTS_FAILURE, &e)));
                }
            }
        }

        if request.includes(DataType::Users) {
            info!("Processing users for job {job_id}");
            module
                .jobs_repo
                .update_job_status(
                    tenant_id,
                    job_id,
                    JobStatus::Processing,
                    JobStatusUpdate::new().progress_step("users"),
                )
                .await?;
            match Self::process_users(module, tenant_id).await {
                Ok((count, batch_errors)) => {
                    results.users_processed = count;
                    if batch_errors > 0 {
                        warnings.push(format!("Users: {batch_errors} batch errors during upsert"));
                    }
                }
                Err(e) => {
                    error!("Failed to process users: {e}");
                    return Err(JobError::Phase(classify_failure(&USERS_FAILURE, &e)));
                }
            }
        }

        if request.includes(DataType::Locations) {
            info!("Processing locations for job {job_id}");
            module
                .jobs_repo
                .update_job_status(
                    tenant_id,
                    job_id,
                    JobStatus::Processing,
                    JobStatusUpdate::new().progress_step("locations"),
                )
                .await?;
            match Self::process_locations(module, tenant_id).await {
                Ok((count, batch_errors)) => {
                    results.locations_processed = count;
                    if batch_errors > 0 {
                        warnings.push(format!(
                            "Locations: {batch_errors} batch errors during upsert"
                        ));
                    }
                }
                Err(e) => {
                    error!("Failed to download/process locations: {e}");
                    return Err(JobError::Phase(classify_failure(&LOCATIONS_FAILURE, &e)));
                }
            }
        }

        if !warnings.is_empty() {
            warn!("Job {job_id} completed with warnings: {warnings:?}");
            results.warnings = warnings;
        }
        let final_status = if results.warnings.is_empty() {
            JobStatus::Completed
        } else {
            JobStatus::CompletedWithWarnings
        };
        module
            .jobs_repo
            .update_job_status(
                tenant_id,
                job_id,
                final_status,
                JobStatusUpdate::new()
                    .completed_now()
                    .records_processed(results.to_json()),
            )
            .await?;

        Ok(results)
    }

    /// The events phase: one warehouse extraction, reclassification, then six
    /// concurrent per-type table replacements. The six tasks touch disjoint
    /// tables and each runs in its own session; all are joined before the
    /// next status update. A failing type becomes a warning and a zero count.
    async fn process_events(
        module: &IngestionModule,
        tenant_id: Uuid,
        request: &IngestionJobRequest,
    ) -> Result<(Vec<(EventType, u64)>, Vec<String>), JobError> {
        let client = module
            .client_factory
            .warehouse_client(tenant_id)
            .await
            .ok_or_else(|| {
                JobError::Config(format!(
                    "BigQuery configuration not found for tenant {tenant_id}"
                ))
            })?;

        info!(
            "Starting BigQuery extraction for {} to {}",
            request.start_date, request.end_date
        );
        let events = client
            .get_date_range_events(request.start_date, request.end_date)
            .await?;
        let events = Self::reclassify_search_events(events);

        let mut tasks: Vec<JoinHandle<(EventType, u64, Option<String>)>> = Vec::new();
        for batch in events.into_batches() {
            let repo = module.events_repo.clone();
            let start_date = request.start_date;
            let end_date = request.end_date;
            tasks.push(tokio::spawn(async move {
                let event_type = batch.event_type();
                match repo
                    .replace_events(tenant_id, start_date, end_date, batch)
                    .await
                {
                    Ok(count) => {
                        info!("Processed {count} {event_type} events");
                        (event_type, count, None)
                    }
                    Err(e) => {
                        error!("Failed to insert {event_type} events: {e}");
                        (event_type, 0, Some(e.to_string()))
                    }
                }
            }));
        }

        let mut counts = Vec::with_capacity(tasks.len());
        let mut warnings = Vec::new();
        for task in tasks {
            let (event_type, count, failure) = task
                .await
                .map_err(|e| JobError::Other(format!("event insert task failed: {e}")))?;
            counts.push((event_type, count));
            if let Some(failure) = failure {
                warnings.push(format!("{event_type}: {failure}"));
            }
        }
        Ok((counts, warnings))
    }

    /// The users phase. Without a configured user table the phase is a
    /// zero-count skip, not an error.
    async fn process_users(
        module: &IngestionModule,
        tenant_id: Uuid,
    ) -> Result<(u64, u64), JobError> {
        let user_table = module
            .client_factory
            .warehouse_config(tenant_id)
            .await
            .and_then(|config| config.user_table);
        let Some(user_table) = user_table else {
            warn!("No user table configured for tenant {tenant_id}, skipping user processing");
            return Ok((0, 0));
        };

        let client = module
            .client_factory
            .warehouse_client(tenant_id)
            .await
            .ok_or_else(|| {
                JobError::Config(format!(
                    "BigQuery client could not be created for tenant {tenant_id}"
                ))
            })?;

        info!("Extracting users from table {user_table}");
        let users = client.extract_users(&user_table).await?;
        if users.is_empty() {
            info!("No users found in user table");
            return Ok((0, 0));
        }
        Ok(module.users_repo.upsert_users(tenant_id, users).await?)
    }

    /// The locations phase. A missing SFTP configuration is a zero-count
    /// skip; anything else that fails is fatal for the phase.
    async fn process_locations(
        module: &IngestionModule,
        tenant_id: Uuid,
    ) -> Result<(u64, u64), JobError> {
        let Some(client) = module.client_factory.location_client(tenant_id).await else {
            warn!("SFTP configuration not found for tenant {tenant_id}, skipping location processing");
            return Ok((0, 0));
        };

        info!("Connecting to SFTP to download locations data for tenant {tenant_id}");
        let locations = client.get_locations().await?;
        if locations.is_empty() {
            info!("No locations data received from SFTP");
            return Ok((0, 0));
        }
        Ok(module
            .locations_repo
            .upsert_locations(tenant_id, locations)
            .await?)
    }

    /// Splits `no_search_results` into genuine misses and mistagged
    /// successes, relabeling the latter into `view_search_results`. Runs
    /// exactly once, between extraction and loading.
    fn reclassify_search_events(mut events: EventsByType) -> EventsByType {
        let no_search = std::mem::take(&mut events.no_search_results);
        if no_search.is_empty() {
            return events;
        }

        let mut genuinely_failed = Vec::new();
        let mut reclassified: Vec<SearchEvent> = Vec::new();
        for event in no_search {
            let title = event.param_page_title.as_deref().unwrap_or("");
            if title.contains(NO_RESULTS_MARKER) {
                genuinely_failed.push(event);
            } else {
                reclassified.push(SearchEvent::from(event));
            }
        }

        if !reclassified.is_empty() {
            info!(
                "Reclassified {} mistagged no_search_results events as view_search_results (genuinely failed: {})",
                reclassified.len(),
                genuinely_failed.len()
            );
        }
        events.no_search_results = genuinely_failed;
        events.view_search_results.extend(reclassified);
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{EventExtractor, LocationExtractor, MockClientFactory, MockEventExtractor};
    use crate::common::error::ExtractorResult;
    use crate::manager::app::config::AppConfigBuilder;
    use crate::manager::tenants::repository::WarehouseConfig;
    use crate::tenant::events::model::{EventBatch, NoSearchEvent, PurchaseEvent};
    use crate::tenant::events::repository::MockEventsRepository;
    use crate::tenant::jobs::repository::MockJobsRepository;
    use crate::tenant::locations::model::LocationRecord;
    use crate::tenant::locations::repository::MockLocationsRepository;
    use crate::tenant::users::model::UserRecord;
    use crate::tenant::users::repository::MockUsersRepository;
    use async_trait::async_trait;
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;
    use std::sync::{Arc, Mutex};

    const TENANT: &str = "550e8400-e29b-41d4-a716-446655440000";

    fn tenant_id() -> Uuid {
        Uuid::parse_str(TENANT).unwrap()
    }

    fn events_request() -> IngestionJobRequest {
        IngestionJobRequest {
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            data_types: vec![DataType::Events],
        }
    }

    fn purchase(timestamp: &str, revenue: &str) -> PurchaseEvent {
        PurchaseEvent {
            event_date: "20240101".to_string(),
            event_timestamp: Some(timestamp.to_string()),
            ecommerce_purchase_revenue: Some(BigDecimal::from_str(revenue).unwrap()),
            ..Default::default()
        }
    }

    fn three_purchases() -> EventsByType {
        EventsByType {
            purchase: vec![
                purchase("1000", "10.00"),
                purchase("2000", "20.00"),
                purchase("3000", "30.50"),
            ],
            ..Default::default()
        }
    }

    type Updates = Arc<Mutex<Vec<(JobStatus, JobStatusUpdate)>>>;

    fn capture_updates(jobs: &mut MockJobsRepository) -> Updates {
        let updates: Updates = Arc::new(Mutex::new(Vec::new()));
        let sink = updates.clone();
        jobs.expect_update_job_status()
            .returning(move |_, _, status, update| {
                sink.lock().unwrap().push((status, update));
                Ok(true)
            });
        updates
    }

    struct ModuleMocks {
        jobs: MockJobsRepository,
        events: MockEventsRepository,
        users: MockUsersRepository,
        locations: MockLocationsRepository,
        factory: MockClientFactory,
    }

    impl ModuleMocks {
        fn new() -> Self {
            Self {
                jobs: MockJobsRepository::new(),
                events: MockEventsRepository::new(),
                users: MockUsersRepository::new(),
                locations: MockLocationsRepository::new(),
                factory: MockClientFactory::new(),
            }
        }

        fn build(self) -> IngestionModule {
            IngestionModule {
                config: Arc::new(AppConfigBuilder::default().build().unwrap()),
                jobs_repo: Arc::new(self.jobs),
                events_repo: Arc::new(self.events),
                users_repo: Arc::new(self.users),
                locations_repo: Arc::new(self.locations),
                client_factory: Arc::new(self.factory),
            }
        }
    }

    fn extractor_returning(events: EventsByType) -> Arc<dyn EventExtractor> {
        let mut extractor = MockEventExtractor::new();
        extractor
            .expect_get_date_range_events()
            .returning(move |_, _| Ok(events.clone()));
        Arc::new(extractor)
    }

    fn final_update(updates: &Updates) -> (JobStatus, JobStatusUpdate) {
        updates.lock().unwrap().last().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_happy_path_single_event_type() {
        let mut mocks = ModuleMocks::new();
        let updates = capture_updates(&mut mocks.jobs);

        let extractor = extractor_returning(three_purchases());
        mocks
            .factory
            .expect_warehouse_client()
            .returning(move |_| Some(extractor.clone()));
        mocks
            .events
            .expect_replace_events()
            .returning(|tenant, _, _, batch| {
                assert_eq!(tenant.to_string(), TENANT);
                if let EventBatch::Purchase(rows) = &batch {
                    let total: BigDecimal = rows
                        .iter()
                        .filter_map(|r| r.ecommerce_purchase_revenue.clone())
                        .sum();
                    assert_eq!(total, BigDecimal::from_str("60.50").unwrap());
                    let timestamps: Vec<_> =
                        rows.iter().filter_map(|r| r.event_timestamp.clone()).collect();
                    assert_eq!(timestamps, vec!["1000", "2000", "3000"]);
                }
                Ok(batch.len() as u64)
            });

        let module = mocks.build();
        IngestionService::run_job_safe(&module, "job-1", tenant_id(), &events_request()).await;

        let collected = updates.lock().unwrap().clone();
        assert_eq!(collected[0].0, JobStatus::Processing);
        assert!(collected[0].1.started_at.is_some());
        assert_eq!(
            collected[1].1.progress.as_ref().unwrap()["current"],
            "events"
        );

        let (status, update) = final_update(&updates);
        assert_eq!(status, JobStatus::Completed);
        assert!(update.completed_at.is_some());
        let records = update.records_processed.unwrap();
        assert_eq!(records["purchase"], 3);
        assert_eq!(records["page_view"], 0);
        assert!(records.get("warnings").is_none());
    }

    #[tokio::test]
    async fn test_rerun_is_reported_identically() {
        for _ in 0..2 {
            let mut mocks = ModuleMocks::new();
            let updates = capture_updates(&mut mocks.jobs);
            let extractor = extractor_returning(three_purchases());
            mocks
                .factory
                .expect_warehouse_client()
                .returning(move |_| Some(extractor.clone()));
            mocks
                .events
                .expect_replace_events()
                .returning(|_, _, _, batch| Ok(batch.len() as u64));

            let module = mocks.build();
            IngestionService::run_job_safe(&module, "job-1", tenant_id(), &events_request()).await;
            let (status, update) = final_update(&updates);
            assert_eq!(status, JobStatus::Completed);
            assert_eq!(update.records_processed.unwrap()["purchase"], 3);
        }
    }

    #[tokio::test]
    async fn test_partial_failure_yields_warning_status() {
        let mut mocks = ModuleMocks::new();
        let updates = capture_updates(&mut mocks.jobs);

        let events = EventsByType {
            purchase: vec![purchase("1000", "10.00"), purchase("2000", "20.00")],
            add_to_cart: vec![Default::default()],
            ..Default::default()
        };
        let extractor = extractor_returning(events);
        mocks
            .factory
            .expect_warehouse_client()
            .returning(move |_| Some(extractor.clone()));
        mocks
            .events
            .expect_replace_events()
            .returning(|_, _, _, batch| {
                if batch.event_type() == EventType::AddToCart {
                    Err(RepositoryError::Custom(
                        "duplicate key value violates unique constraint".to_string(),
                    ))
                } else {
                    Ok(batch.len() as u64)
                }
            });

        let module = mocks.build();
        IngestionService::run_job_safe(&module, "job-2", tenant_id(), &events_request()).await;

        let (status, update) = final_update(&updates);
        assert_eq!(status, JobStatus::CompletedWithWarnings);
        let records = update.records_processed.unwrap();
        assert_eq!(records["purchase"], 2);
        assert_eq!(records["add_to_cart"], 0);
        let warnings = records["warnings"].as_array().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(
            warnings[0]
                .as_str()
                .unwrap()
                .starts_with("add_to_cart: ")
        );
    }

    #[tokio::test]
    async fn test_missing_warehouse_config_fails_events_phase() {
        let mut mocks = ModuleMocks::new();
        let updates = capture_updates(&mut mocks.jobs);
        mocks.factory.expect_warehouse_client().returning(|_| None);

        let module = mocks.build();
        IngestionService::run_job_safe(&module, "job-3", tenant_id(), &events_request()).await;

        let (status, update) = final_update(&updates);
        assert_eq!(status, JobStatus::Failed);
        assert!(update.completed_at.is_some());
        let message = update.error_message.unwrap();
        assert!(message.starts_with("Failed to extract events from BigQuery - "));
        assert!(message.contains("BigQuery configuration not found"));
    }

    struct SlowExtractor;

    #[async_trait]
    impl EventExtractor for SlowExtractor {
        async fn get_date_range_events(
            &self,
            _start_date: NaiveDate,
            _end_date: NaiveDate,
        ) -> ExtractorResult<EventsByType> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(EventsByType::default())
        }

        async fn extract_users(&self, _user_table: &str) -> ExtractorResult<Vec<UserRecord>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_timeout_writes_failed_status() {
        let mut mocks = ModuleMocks::new();
        let updates = capture_updates(&mut mocks.jobs);
        mocks
            .factory
            .expect_warehouse_client()
            .returning(|_| Some(Arc::new(SlowExtractor)));

        let module = mocks.build();
        IngestionService::run_job_with_budget(
            &module,
            "job-4",
            tenant_id(),
            &events_request(),
            Duration::from_millis(50),
        )
        .await;

        let (status, update) = final_update(&updates);
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(update.error_message.as_deref(), Some(TIMEOUT_MESSAGE));
        assert!(update.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_users_phase_upserts_and_counts_batch_errors() {
        let mut mocks = ModuleMocks::new();
        let updates = capture_updates(&mut mocks.jobs);

        mocks.factory.expect_warehouse_config().returning(|_| {
            Some(WarehouseConfig {
                project_id: "acme".to_string(),
                dataset_id: "analytics".to_string(),
                service_account: serde_json::json!({}),
                user_table: Some("acme.analytics.users".to_string()),
            })
        });
        let mut extractor = MockEventExtractor::new();
        extractor.expect_extract_users().returning(|table| {
            assert_eq!(table, "acme.analytics.users");
            Ok(vec![
                UserRecord {
                    user_id: "u-1".to_string(),
                    ..Default::default()
                },
                UserRecord {
                    user_id: "u-2".to_string(),
                    ..Default::default()
                },
            ])
        });
        let extractor: Arc<dyn EventExtractor> = Arc::new(extractor);
        mocks
            .factory
            .expect_warehouse_client()
            .returning(move |_| Some(extractor.clone()));
        mocks
            .users
            .expect_upsert_users()
            .returning(|_, users| Ok((users.len() as u64, 1)));

        let request = IngestionJobRequest {
            data_types: vec![DataType::Users],
            ..events_request()
        };
        let module = mocks.build();
        IngestionService::run_job_safe(&module, "job-5", tenant_id(), &request).await;

        let (status, update) = final_update(&updates);
        assert_eq!(status, JobStatus::CompletedWithWarnings);
        let records = update.records_processed.unwrap();
        assert_eq!(records["users_processed"], 2);
        assert_eq!(records["warnings"][0], "Users: 1 batch errors during upsert");
    }

    #[tokio::test]
    async fn test_users_phase_skips_without_user_table() {
        let mut mocks = ModuleMocks::new();
        let updates = capture_updates(&mut mocks.jobs);
        mocks.factory.expect_warehouse_config().returning(|_| {
            Some(WarehouseConfig {
                project_id: "acme".to_string(),
                dataset_id: "analytics".to_string(),
                service_account: serde_json::json!({}),
                user_table: None,
            })
        });

        let request = IngestionJobRequest {
            data_types: vec![DataType::Users],
            ..events_request()
        };
        let module = mocks.build();
        IngestionService::run_job_safe(&module, "job-6", tenant_id(), &request).await;

        let (status, update) = final_update(&updates);
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(update.records_processed.unwrap()["users_processed"], 0);
    }

    struct StaticLocations(Vec<LocationRecord>);

    #[async_trait]
    impl LocationExtractor for StaticLocations {
        async fn get_locations(&self) -> ExtractorResult<Vec<LocationRecord>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_locations_phase_upserts() {
        let mut mocks = ModuleMocks::new();
        let updates = capture_updates(&mut mocks.jobs);

        let records = vec![
            LocationRecord {
                warehouse_id: "101".to_string(),
                ..Default::default()
            },
            LocationRecord {
                warehouse_id: "102".to_string(),
                ..Default::default()
            },
        ];
        mocks.factory.expect_location_client().returning(move |_| {
            Some(Arc::new(StaticLocations(records.clone())) as Arc<dyn LocationExtractor>)
        });
        mocks
            .locations
            .expect_upsert_locations()
            .returning(|_, locations| Ok((locations.len() as u64, 0)));

        let request = IngestionJobRequest {
            data_types: vec![DataType::Locations],
            ..events_request()
        };
        let module = mocks.build();
        IngestionService::run_job_safe(&module, "job-7", tenant_id(), &request).await;

        let (status, update) = final_update(&updates);
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(update.records_processed.unwrap()["locations_processed"], 2);
    }

    struct FailingLocations(ExtractorError);

    #[async_trait]
    impl LocationExtractor for FailingLocations {
        async fn get_locations(&self) -> ExtractorResult<Vec<LocationRecord>> {
            Err(match &self.0 {
                ExtractorError::Transport(m) => ExtractorError::Transport(m.clone()),
                ExtractorError::Auth(m) => ExtractorError::Auth(m.clone()),
                ExtractorError::SourceMissing(m) => ExtractorError::SourceMissing(m.clone()),
                ExtractorError::Parse(m) => ExtractorError::Parse(m.clone()),
                ExtractorError::Other(m) => ExtractorError::Other(m.clone()),
            })
        }
    }

    #[tokio::test]
    async fn test_locations_transport_failure_is_classified() {
        let mut mocks = ModuleMocks::new();
        let updates = capture_updates(&mut mocks.jobs);
        mocks.factory.expect_location_client().returning(|_| {
            Some(Arc::new(FailingLocations(ExtractorError::Transport(
                "nodename nor servname provided, or not known".to_string(),
            ))) as Arc<dyn LocationExtractor>)
        });

        let request = IngestionJobRequest {
            data_types: vec![DataType::Locations],
            ..events_request()
        };
        let module = mocks.build();
        IngestionService::run_job_safe(&module, "job-8", tenant_id(), &request).await;

        let (status, update) = final_update(&updates);
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(
            update.error_message.as_deref(),
            Some(
                "Failed to download locations data from SFTP - Network/DNS error. \
                 Please verify SFTP hostname in tenant configuration."
            )
        );
    }

    #[test]
    fn test_classifier_message_forms() {
        let auth = JobError::Extractor(ExtractorError::Auth("invalid_grant".to_string()));
        assert_eq!(
            classify_failure(&EVENTS_FAILURE, &auth),
            "Failed to extract events from BigQuery - Authentication error. \
             Please check service account credentials."
        );

        let missing = JobError::Extractor(ExtractorError::SourceMissing(
            "Locations_List.xlsx".to_string(),
        ));
        assert_eq!(
            classify_failure(&LOCATIONS_FAILURE, &missing),
            "Failed to download locations data from SFTP - File not found. \
             Please verify the file exists on the server."
        );

        // Events have no file-not-found hint; unknown errors forward kind and
        // message.
        let other = JobError::Other("boom".to_string());
        assert_eq!(
            classify_failure(&EVENTS_FAILURE, &other),
            "Failed to extract events from BigQuery - Error: boom"
        );
    }

    #[test]
    fn test_reclassification_partitions_and_relabels() {
        let events = EventsByType {
            no_search_results: vec![
                NoSearchEvent {
                    event_date: "20240101".to_string(),
                    param_page_title: Some("No Results Found — X".to_string()),
                    param_no_search_results_term: Some("x".to_string()),
                    ..Default::default()
                },
                NoSearchEvent {
                    event_date: "20240101".to_string(),
                    param_page_title: Some("Results for Y".to_string()),
                    param_no_search_results_term: Some("y".to_string()),
                    ..Default::default()
                },
                NoSearchEvent {
                    event_date: "20240101".to_string(),
                    param_page_title: Some("Results for Z".to_string()),
                    param_no_search_results_term: Some("z".to_string()),
                    ..Default::default()
                },
            ],
            view_search_results: vec![SearchEvent {
                event_date: "20240101".to_string(),
                param_search_term: Some("w".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };

        let reclassified = IngestionService::reclassify_search_events(events);

        assert_eq!(reclassified.no_search_results.len(), 1);
        assert_eq!(
            reclassified.no_search_results[0]
                .param_no_search_results_term
                .as_deref(),
            Some("x")
        );
        let terms: Vec<_> = reclassified
            .view_search_results
            .iter()
            .map(|e| e.param_search_term.as_deref().unwrap())
            .collect();
        assert_eq!(terms, vec!["w", "y", "z"]);
        // No relabeled record may still carry the genuine-miss marker.
        for event in &reclassified.view_search_results[1..] {
            assert!(
                !event
                    .param_page_title
                    .as_deref()
                    .unwrap_or("")
                    .contains(NO_RESULTS_MARKER)
            );
        }
    }

    #[test]
    fn test_reclassification_conserves_record_count() {
        let events = EventsByType {
            no_search_results: (0..10)
                .map(|i| NoSearchEvent {
                    event_date: "20240101".to_string(),
                    param_page_title: if i % 3 == 0 {
                        Some("No Results Found".to_string())
                    } else {
                        Some(format!("Results for {i}"))
                    },
                    param_no_search_results_term: Some(format!("t{i}")),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        let out = IngestionService::reclassify_search_events(events);
        assert_eq!(
            out.no_search_results.len() + out.view_search_results.len(),
            10
        );
    }

    #[tokio::test]
    async fn test_invalid_range_fails_before_any_phase() {
        let mut mocks = ModuleMocks::new();
        let updates = capture_updates(&mut mocks.jobs);

        let request = IngestionJobRequest {
            start_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            data_types: vec![DataType::Events],
        };
        let module = mocks.build();
        IngestionService::run_job_safe(&module, "job-9", tenant_id(), &request).await;

        let (status, update) = final_update(&updates);
        assert_eq!(status, JobStatus::Failed);
        assert!(update.error_message.unwrap().contains("after end_date"));
    }
}
