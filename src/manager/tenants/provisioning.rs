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

use std::sync::Arc;

use sqlx::{PgPool, Postgres, Transaction};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::common::error::{RepositoryError, RepositoryResult};
use crate::manager::app::database::{PgSessionRouter, tenant_database_name};

/// Table scripts in dependency order. `tenant_config` doubles as the
/// schema-initialization probe.
const TABLE_SCRIPTS: &[(&str, &str)] = &[
    (
        "tenant_config.sql",
        include_str!("../../../schema/tables/tenant_config.sql"),
    ),
    (
        "branch_email_mappings.sql",
        include_str!("../../../schema/tables/branch_email_mappings.sql"),
    ),
    (
        "email_sending_jobs.sql",
        include_str!("../../../schema/tables/email_sending_jobs.sql"),
    ),
    (
        "email_send_history.sql",
        include_str!("../../../schema/tables/email_send_history.sql"),
    ),
    ("users.sql", include_str!("../../../schema/tables/users.sql")),
    (
        "locations.sql",
        include_str!("../../../schema/tables/locations.sql"),
    ),
    (
        "processing_jobs.sql",
        include_str!("../../../schema/tables/processing_jobs.sql"),
    ),
    (
        "page_view.sql",
        include_str!("../../../schema/tables/page_view.sql"),
    ),
    (
        "add_to_cart.sql",
        include_str!("../../../schema/tables/add_to_cart.sql"),
    ),
    (
        "purchase.sql",
        include_str!("../../../schema/tables/purchase.sql"),
    ),
    (
        "view_item.sql",
        include_str!("../../../schema/tables/view_item.sql"),
    ),
    (
        "view_search_results.sql",
        include_str!("../../../schema/tables/view_search_results.sql"),
    ),
    (
        "no_search_results.sql",
        include_str!("../../../schema/tables/no_search_results.sql"),
    ),
];

/// Read-side function scripts, executed after the tables in lexical filename
/// order. The engine never calls these; their signatures are part of the
/// provisioned contract.
const FUNCTION_SCRIPTS: &[(&str, &str)] = &[
    (
        "get_cart_abandonment_tasks.sql",
        include_str!("../../../schema/functions/get_cart_abandonment_tasks.sql"),
    ),
    (
        "get_chart_data.sql",
        include_str!("../../../schema/functions/get_chart_data.sql"),
    ),
    (
        "get_dashboard_overview_stats.sql",
        include_str!("../../../schema/functions/get_dashboard_overview_stats.sql"),
    ),
    (
        "get_data_availability_combined.sql",
        include_str!("../../../schema/functions/get_data_availability_combined.sql"),
    ),
    (
        "get_email_jobs_paginated.sql",
        include_str!("../../../schema/functions/get_email_jobs_paginated.sql"),
    ),
    (
        "get_email_send_history_paginated.sql",
        include_str!("../../../schema/functions/get_email_send_history_paginated.sql"),
    ),
    (
        "get_location_stats_bulk.sql",
        include_str!("../../../schema/functions/get_location_stats_bulk.sql"),
    ),
    (
        "get_locations.sql",
        include_str!("../../../schema/functions/get_locations.sql"),
    ),
    (
        "get_performance_tasks.sql",
        include_str!("../../../schema/functions/get_performance_tasks.sql"),
    ),
    (
        "get_purchase_tasks.sql",
        include_str!("../../../schema/functions/get_purchase_tasks.sql"),
    ),
    (
        "get_repeat_visit_tasks.sql",
        include_str!("../../../schema/functions/get_repeat_visit_tasks.sql"),
    ),
    (
        "get_search_analysis_tasks.sql",
        include_str!("../../../schema/functions/get_search_analysis_tasks.sql"),
    ),
    (
        "get_session_history.sql",
        include_str!("../../../schema/functions/get_session_history.sql"),
    ),
    (
        "get_tenant_jobs_paginated.sql",
        include_str!("../../../schema/functions/get_tenant_jobs_paginated.sql"),
    ),
    (
        "get_user_history.sql",
        include_str!("../../../schema/functions/get_user_history.sql"),
    ),
];

/// Creates and initializes tenant databases.
///
/// Provisioning is idempotent: an existing, initialized database is left
/// untouched unless `force_recreate` asks for a drop-and-rebuild. A database
/// created by this call is dropped again if schema initialization fails.
pub struct TenantProvisioner {
    router: Arc<PgSessionRouter>,
}

impl TenantProvisioner {
    pub fn new(router: Arc<PgSessionRouter>) -> Self {
        Self { router }
    }

    /// Provisions the tenant database. Returns `true` on success; failures
    /// are logged and reported as `false`.
    pub async fn provision(&self, tenant_id: Uuid, force_recreate: bool) -> bool {
        let db_name = tenant_database_name(tenant_id);
        info!("Starting provisioning for tenant database '{db_name}'");

        let exists = match self.database_exists(tenant_id).await {
            Ok(exists) => exists,
            Err(e) => {
                error!("Error checking if tenant database '{db_name}' exists: {e}");
                return false;
            }
        };

        if exists {
            if force_recreate {
                warn!("Force recreate requested, dropping existing database '{db_name}'");
                if let Err(e) = self.drop_database(tenant_id).await {
                    error!("Failed to drop existing database '{db_name}': {e}");
                    return false;
                }
            } else {
                match self.schema_initialized(tenant_id).await {
                    Ok(true) => {
                        info!("Tenant database '{db_name}' already initialized, skipping");
                        return true;
                    }
                    Ok(false) => {
                        info!("Tenant database '{db_name}' exists but schema not initialized");
                    }
                    Err(e) => {
                        error!("Error probing schema of tenant database '{db_name}': {e}");
                        return false;
                    }
                }
            }
        }

        let mut created = false;
        let exists_now = !force_recreate && exists;
        if !exists_now {
            if let Err(e) = self.create_database(tenant_id).await {
                error!("Failed to create tenant database '{db_name}': {e}");
                return false;
            }
            created = true;
        }

        if let Err(e) = self.initialize_schema(tenant_id).await {
            error!("Schema initialization failed for tenant database '{db_name}': {e}");
            if created {
                if let Err(drop_err) = self.drop_database(tenant_id).await {
                    error!("Rollback drop of tenant database '{db_name}' failed: {drop_err}");
                }
            }
            return false;
        }

        info!("Successfully provisioned tenant database '{db_name}'");
        true
    }

    async fn database_exists(&self, tenant_id: Uuid) -> RepositoryResult<bool> {
        let pool = self.router.admin_engine().await?;
        let result = sqlx::query_scalar::<_, i32>("SELECT 1 FROM pg_database WHERE datname = $1")
            .bind(tenant_database_name(tenant_id))
            .fetch_optional(&pool)
            .await;
        pool.close().await;
        Ok(result?.is_some())
    }

    async fn create_database(&self, tenant_id: Uuid) -> RepositoryResult<()> {
        let db_name = tenant_database_name(tenant_id);
        let pool = self.router.admin_engine().await?;
        let result = sqlx::query(&format!(r#"CREATE DATABASE "{db_name}""#))
            .execute(&pool)
            .await;
        pool.close().await;
        match result {
            Ok(_) => {
                info!("Tenant database '{db_name}' created");
                Ok(())
            }
            Err(e) => {
                let err = RepositoryError::Database(e);
                // Racing provisioners: a concurrent CREATE DATABASE winning
                // the race is success, not failure.
                if err.is_duplicate_database() {
                    info!("Tenant database '{db_name}' already exists (concurrent creation)");
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn drop_database(&self, tenant_id: Uuid) -> RepositoryResult<()> {
        let db_name = tenant_database_name(tenant_id);
        let pool = self.router.admin_engine().await?;
        let result = async {
            sqlx::query(
                r#"
                SELECT pg_terminate_backend(pg_stat_activity.pid)
                FROM pg_stat_activity
                WHERE pg_stat_activity.datname = $1
                    AND pid <> pg_backend_pid()
                "#,
            )
            .bind(&db_name)
            .execute(&pool)
            .await?;
            sqlx::query(&format!(r#"DROP DATABASE "{db_name}""#))
                .execute(&pool)
                .await?;
            Ok::<_, RepositoryError>(())
        }
        .await;
        pool.close().await;
        result?;
        info!("Tenant database '{db_name}' dropped");
        Ok(())
    }

    /// The `tenant_config` table is the marker for an initialized schema.
    async fn schema_initialized(&self, tenant_id: Uuid) -> RepositoryResult<bool> {
        let pool = self.router.tenant_engine(tenant_id).await?;
        let result = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM information_schema.tables
                WHERE table_schema = 'public'
                    AND table_name = 'tenant_config'
            )
            "#,
        )
        .fetch_one(&pool)
        .await;
        pool.close().await;
        Ok(result?)
    }

    async fn initialize_schema(&self, tenant_id: Uuid) -> RepositoryResult<()> {
        let pool = self.router.tenant_engine(tenant_id).await?;
        let result = Self::run_scripts(&pool).await;
        pool.close().await;
        result
    }

    /// Executes every schema script inside a single transaction: tables in
    /// dependency order, then functions in lexical order.
    async fn run_scripts(pool: &PgPool) -> RepositoryResult<()> {
        let mut tx = pool.begin().await?;
        for (name, sql) in TABLE_SCRIPTS.iter().chain(FUNCTION_SCRIPTS.iter()) {
            Self::execute_script(&mut tx, name, sql).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn execute_script(
        tx: &mut Transaction<'_, Postgres>,
        name: &str,
        sql: &str,
    ) -> RepositoryResult<()> {
        if sql.trim().is_empty() {
            warn!("Skipping empty schema script {name}");
            return Ok(());
        }
        if has_dollar_quoting(sql) {
            // Dollar-quoted bodies (functions, DO blocks) cannot be split on
            // ';'. The whole file goes through the raw multi-statement path.
            sqlx::raw_sql(sql).execute(&mut **tx).await?;
        } else {
            for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                sqlx::query(statement).execute(&mut **tx).await?;
            }
        }
        info!("Executed schema script {name}");
        Ok(())
    }
}

fn has_dollar_quoting(sql: &str) -> bool {
    sql.contains("$$")
        || sql.contains("$function$")
        || sql.contains("$body$")
        || sql.to_uppercase().contains("CREATE OR REPLACE FUNCTION")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_table_scripts_are_in_dependency_order() {
        let names: Vec<&str> = TABLE_SCRIPTS.iter().map(|(name, _)| *name).collect();
        assert_eq!(
            names,
            vec![
                "tenant_config.sql",
                "branch_email_mappings.sql",
                "email_sending_jobs.sql",
                "email_send_history.sql",
                "users.sql",
                "locations.sql",
                "processing_jobs.sql",
                "page_view.sql",
                "add_to_cart.sql",
                "purchase.sql",
                "view_item.sql",
                "view_search_results.sql",
                "no_search_results.sql",
            ]
        );
    }

    #[test]
    fn test_function_scripts_are_lexically_ordered() {
        let names: Vec<&str> = FUNCTION_SCRIPTS.iter().map(|(name, _)| *name).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_function_scripts_use_dollar_quoting() {
        for (name, sql) in FUNCTION_SCRIPTS {
            assert!(has_dollar_quoting(sql), "{name} should be dollar-quoted");
        }
    }

    #[test]
    fn test_table_scripts_split_cleanly() {
        for (name, sql) in TABLE_SCRIPTS {
            assert!(!has_dollar_quoting(sql), "{name} must not be dollar-quoted");
            assert!(
                sql.split(';').any(|s| !s.trim().is_empty()),
                "{name} is empty"
            );
        }
    }

    #[test]
    fn test_dollar_quote_detection() {
        assert!(has_dollar_quoting("DO $$ BEGIN END $$;"));
        assert!(has_dollar_quoting(
            "create or replace function f() returns int"
        ));
        assert!(!has_dollar_quoting(
            "CREATE TABLE t (id INT); CREATE INDEX i ON t (id);"
        ));
    }
}
