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

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::common::error::{RepositoryError, RepositoryResult};
use crate::manager::app::config::{AppConfig, DatabaseConfig, DatabaseUrlProvider};

/// Name of a tenant's isolated database: `google-analytics-<tenant-uuid>`,
/// lower-case hyphenated UUID form. The name contains `-` and therefore must
/// be double-quoted wherever it appears in DDL.
pub fn tenant_database_name(tenant_id: Uuid) -> String {
    format!("google-analytics-{tenant_id}")
}

pub type SessionFuture<'c, T> = Pin<Box<dyn Future<Output = RepositoryResult<T>> + Send + 'c>>;

/// Routes database work to the correct per-tenant database.
///
/// A fresh engine is constructed for every session and disposed when the
/// session ends; nothing is pooled across invocations. This keeps the engine
/// serverless-friendly and guarantees that no connection ever outlives the
/// credentials it was built from or leaks across tenants. Tenant engines are
/// capped at a single connection with no overflow; pre-ping is enabled so
/// dead sockets are dropped before use.
pub struct PgSessionRouter {
    config: Arc<AppConfig>,
}

impl PgSessionRouter {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    fn connect_options(&self, db: &DatabaseConfig) -> RepositoryResult<PgConnectOptions> {
        let options = PgConnectOptions::from_str(&db.url())?;
        Ok(if self.config.database_echo() {
            options.log_statements(log::LevelFilter::Info)
        } else {
            options.disable_statement_logging()
        })
    }

    async fn engine(&self, db: &DatabaseConfig) -> RepositoryResult<PgPool> {
        Ok(PgPoolOptions::new()
            .max_connections(db.max_pool_size())
            .test_before_acquire(true)
            .acquire_timeout(Duration::from_secs(3))
            .connect_with(self.connect_options(db)?)
            .await?)
    }

    /// Opens a transactional session against the tenant's database.
    ///
    /// If the database does not exist the underlying driver error surfaces
    /// unchanged; the caller is expected to run the provisioner and retry.
    pub async fn session(&self, tenant_id: Uuid) -> RepositoryResult<TenantSession> {
        let pool = self.engine(&self.config.tenant_database(tenant_id)).await?;
        TenantSession::begin(pool).await
    }

    /// Runs `work` inside a scoped session: commit on `Ok`, rollback and
    /// re-raise on `Err`. The engine is disposed on both paths.
    pub async fn with_session<T, F>(&self, tenant_id: Uuid, work: F) -> RepositoryResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> SessionFuture<'c, T> + Send,
    {
        let mut session = self.session(tenant_id).await?;
        match work(session.conn()).await {
            Ok(value) => {
                session.commit().await?;
                Ok(value)
            }
            Err(e) => {
                session.rollback().await?;
                Err(e)
            }
        }
    }

    /// Non-transactional engine on the administrative `postgres` database.
    /// CREATE/DROP DATABASE cannot run inside a transaction block.
    pub async fn admin_engine(&self) -> RepositoryResult<PgPool> {
        self.engine(&self.config.admin_database()).await
    }

    /// Non-transactional engine on a tenant database, used by the
    /// provisioner to execute schema scripts.
    pub async fn tenant_engine(&self, tenant_id: Uuid) -> RepositoryResult<PgPool> {
        self.engine(&self.config.tenant_database(tenant_id)).await
    }
}

/// A scoped database session: one freshly constructed engine, one open
/// transaction. Consuming it through [`TenantSession::commit`] or
/// [`TenantSession::rollback`] also closes the engine; dropping it without
/// either rolls the transaction back through the transaction guard.
pub struct TenantSession {
    pool: PgPool,
    tx: Transaction<'static, Postgres>,
}

impl TenantSession {
    async fn begin(pool: PgPool) -> RepositoryResult<Self> {
        match pool.begin().await {
            Ok(tx) => Ok(Self { pool, tx }),
            Err(e) => {
                pool.close().await;
                Err(RepositoryError::Database(e))
            }
        }
    }

    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> RepositoryResult<()> {
        let result = self.tx.commit().await;
        self.pool.close().await;
        Ok(result?)
    }

    pub async fn rollback(self) -> RepositoryResult<()> {
        let result = self.tx.rollback().await;
        self.pool.close().await;
        Ok(result?)
    }
}
