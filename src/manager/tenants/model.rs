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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// The tenant's configuration row, stored in the tenant's own database.
///
/// One row per tenant. The row is created by the external onboarding flow and
/// is read-only to the ingestion engine. Each sub-configuration (warehouse,
/// SFTP, SMTP) carries an `enabled` flag and a nullable `validation_error`;
/// only enabled and validated sub-configurations are usable.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TenantConfig {
    pub id: Uuid,
    pub name: Option<String>,
    pub domain: Option<String>,
    pub is_active: bool,
    pub bigquery_project_id: Option<String>,
    pub bigquery_dataset_id: Option<String>,
    pub bigquery_credentials: Option<Value>,
    pub bigquery_user_table: Option<String>,
    pub bigquery_enabled: bool,
    pub bigquery_validation_error: Option<String>,
    pub sftp_config: Option<Value>,
    pub sftp_enabled: bool,
    pub sftp_validation_error: Option<String>,
    pub email_config: Option<Value>,
    pub smtp_enabled: bool,
    pub smtp_validation_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
