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
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::common::error::RepositoryResult;
use crate::manager::app::database::PgSessionRouter;
use crate::manager::tenants::model::TenantConfig;

/// Warehouse (BigQuery) sub-configuration, assembled from the tenant's
/// `tenant_config` row.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    pub project_id: String,
    pub dataset_id: String,
    /// Service-account credential blob, exactly as stored.
    pub service_account: Value,
    /// Fully qualified user dimension table; the users phase is skipped when
    /// unset.
    pub user_table: Option<String>,
}

/// SFTP sub-configuration, decoded from the `sftp_config` JSONB blob.
#[derive(Debug, Clone, Deserialize)]
pub struct SftpConfig {
    pub host: String,
    #[serde(default = "default_sftp_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub remote_path: String,
    #[serde(default = "default_locations_file")]
    pub locations_file: String,
}

fn default_sftp_port() -> u16 {
    22
}

fn default_locations_file() -> String {
    "Locations_List.xlsx".to_string()
}

/// Credential blobs are JSONB but some onboarding paths store them as a JSON
/// string; decode that extra layer when present.
fn decode_json_blob(value: &Value) -> Option<Value> {
    match value {
        Value::String(s) => serde_json::from_str(s).ok(),
        Value::Null => None,
        other => Some(other.clone()),
    }
}

impl WarehouseConfig {
    pub fn from_tenant_config(config: &TenantConfig) -> Option<WarehouseConfig> {
        if !config.bigquery_enabled || config.bigquery_validation_error.is_some() {
            return None;
        }
        Some(WarehouseConfig {
            project_id: config.bigquery_project_id.clone()?,
            dataset_id: config.bigquery_dataset_id.clone()?,
            service_account: decode_json_blob(config.bigquery_credentials.as_ref()?)?,
            user_table: config.bigquery_user_table.clone(),
        })
    }
}

impl SftpConfig {
    pub fn from_tenant_config(config: &TenantConfig) -> Option<SftpConfig> {
        if !config.sftp_enabled || config.sftp_validation_error.is_some() {
            return None;
        }
        let blob = decode_json_blob(config.sftp_config.as_ref()?)?;
        serde_json::from_value(blob).ok()
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait TenantConfigRepository: Send + Sync {
    /// Fetches the tenant's configuration row (`id = tenant AND is_active`).
    async fn get_tenant_config(&self, tenant_id: Uuid) -> RepositoryResult<Option<TenantConfig>>;
    /// Usable warehouse sub-configuration, or `None` when disabled, invalid
    /// or incomplete.
    async fn get_warehouse_config(
        &self,
        tenant_id: Uuid,
    ) -> RepositoryResult<Option<WarehouseConfig>>;
    /// Usable SFTP sub-configuration, or `None` when disabled, invalid or
    /// incomplete.
    async fn get_sftp_config(&self, tenant_id: Uuid) -> RepositoryResult<Option<SftpConfig>>;
}

#[async_trait]
impl TenantConfigRepository for PgSessionRouter {
    async fn get_tenant_config(&self, tenant_id: Uuid) -> RepositoryResult<Option<TenantConfig>> {
        self.with_session(tenant_id, move |conn| {
            Box::pin(async move {
                Ok(sqlx::query_as::<_, TenantConfig>(
                    r#"
                    SELECT *
                    FROM tenant_config
                    WHERE id = $1
                        AND is_active = true
                    "#,
                )
                .bind(tenant_id)
                .fetch_optional(&mut *conn)
                .await?)
            })
        })
        .await
    }

    async fn get_warehouse_config(
        &self,
        tenant_id: Uuid,
    ) -> RepositoryResult<Option<WarehouseConfig>> {
        Ok(self
            .get_tenant_config(tenant_id)
            .await?
            .as_ref()
            .and_then(WarehouseConfig::from_tenant_config))
    }

    async fn get_sftp_config(&self, tenant_id: Uuid) -> RepositoryResult<Option<SftpConfig>> {
        Ok(self
            .get_tenant_config(tenant_id)
            .await?
            .as_ref()
            .and_then(SftpConfig::from_tenant_config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn tenant_config_row() -> TenantConfig {
        TenantConfig {
            id: Uuid::new_v4(),
            name: Some("acme".to_string()),
            domain: None,
            is_active: true,
            bigquery_project_id: Some("acme-project".to_string()),
            bigquery_dataset_id: Some("analytics_123".to_string()),
            bigquery_credentials: Some(json!({"client_email": "svc@acme.iam", "private_key": "-----BEGIN"})),
            bigquery_user_table: None,
            bigquery_enabled: true,
            bigquery_validation_error: None,
            sftp_config: Some(json!({
                "host": "sftp.acme.com",
                "username": "feed",
                "password": "secret"
            })),
            sftp_enabled: true,
            sftp_validation_error: None,
            email_config: None,
            smtp_enabled: false,
            smtp_validation_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_warehouse_config_requires_enabled_flag() {
        let mut row = tenant_config_row();
        row.bigquery_enabled = false;
        assert!(WarehouseConfig::from_tenant_config(&row).is_none());
    }

    #[test]
    fn test_warehouse_config_requires_validation() {
        let mut row = tenant_config_row();
        row.bigquery_validation_error = Some("missing permission".to_string());
        assert!(WarehouseConfig::from_tenant_config(&row).is_none());
    }

    #[test]
    fn test_warehouse_config_decodes_string_credentials() {
        let mut row = tenant_config_row();
        row.bigquery_credentials =
            Some(json!(r#"{"client_email": "svc@acme.iam", "private_key": "k"}"#));
        let config = WarehouseConfig::from_tenant_config(&row).unwrap();
        assert_eq!(config.service_account["client_email"], "svc@acme.iam");
    }

    #[test]
    fn test_sftp_config_defaults() {
        let row = tenant_config_row();
        let config = SftpConfig::from_tenant_config(&row).unwrap();
        assert_eq!(config.port, 22);
        assert_eq!(config.remote_path, "");
        assert_eq!(config.locations_file, "Locations_List.xlsx");
    }

    #[test]
    fn test_sftp_config_missing_required_field_is_none() {
        let mut row = tenant_config_row();
        row.sftp_config = Some(json!({"host": "sftp.acme.com"}));
        assert!(SftpConfig::from_tenant_config(&row).is_none());
    }
}
