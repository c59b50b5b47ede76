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
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::common::error::RepositoryResult;
use crate::manager::app::database::PgSessionRouter;
use crate::tenant::users::model::UserRecord;

const BATCH_SIZE: usize = 500;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait UsersRepository: Send + Sync {
    /// Upserts users keyed on `(tenant_id, user_id)` in batches of 500, one
    /// session per batch. A failing batch increments the error count and the
    /// remaining batches continue. Returns `(rows processed, batch errors)`.
    async fn upsert_users(
        &self,
        tenant_id: Uuid,
        users: Vec<UserRecord>,
    ) -> RepositoryResult<(u64, u64)>;
}

#[async_trait]
impl UsersRepository for PgSessionRouter {
    async fn upsert_users(
        &self,
        tenant_id: Uuid,
        users: Vec<UserRecord>,
    ) -> RepositoryResult<(u64, u64)> {
        if users.is_empty() {
            return Ok((0, 0));
        }

        let mut total: u64 = 0;
        let mut errors: u64 = 0;

        for (index, chunk) in users.chunks(BATCH_SIZE).enumerate() {
            let batch_num = index + 1;
            let chunk = chunk.to_vec();
            let result = self
                .with_session(tenant_id, move |conn| {
                    Box::pin(async move { upsert_chunk(&mut *conn, tenant_id, &chunk).await })
                })
                .await;
            match result {
                Ok(count) => {
                    total += count;
                    debug!("Upserted user batch {batch_num}: {count} rows");
                }
                Err(e) => {
                    errors += 1;
                    warn!("Error upserting user batch {batch_num}: {e}");
                }
            }
        }

        info!("Upserted {total} users ({errors} batch errors)");
        Ok((total, errors))
    }
}

async fn upsert_chunk(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    rows: &[UserRecord],
) -> RepositoryResult<u64> {
    let mut qb = QueryBuilder::<Postgres>::new(
        "INSERT INTO users (tenant_id, user_id, user_name, first_name, middle_name, \
         last_name, job_title, user_erp_id, email, office_phone, cell_phone, fax, \
         address1, address2, address3, city, state, country, zip, warehouse_code, \
         registered_date, last_login_date, cimm_buying_company_id, buying_company_name, \
         buying_company_erp_id, role_name, site_name, is_active, updated_at) ",
    );
    qb.push_values(rows, |mut b, user| {
        b.push_bind(tenant_id)
            .push_bind(&user.user_id)
            .push_bind(&user.user_name)
            .push_bind(&user.first_name)
            .push_bind(&user.middle_name)
            .push_bind(&user.last_name)
            .push_bind(&user.job_title)
            .push_bind(&user.user_erp_id)
            .push_bind(&user.email)
            .push_bind(&user.office_phone)
            .push_bind(&user.cell_phone)
            .push_bind(&user.fax)
            .push_bind(&user.address1)
            .push_bind(&user.address2)
            .push_bind(&user.address3)
            .push_bind(&user.city)
            .push_bind(&user.state)
            .push_bind(&user.country)
            .push_bind(&user.zip)
            .push_bind(&user.warehouse_code)
            .push_bind(user.registered_date)
            .push_bind(user.last_login_date)
            .push_bind(&user.cimm_buying_company_id)
            .push_bind(&user.buying_company_name)
            .push_bind(&user.buying_company_erp_id)
            .push_bind(&user.role_name)
            .push_bind(&user.site_name)
            .push_bind(true)
            .push("NOW()");
    });
    qb.push(
        " ON CONFLICT (tenant_id, user_id) DO UPDATE SET \
         user_name = EXCLUDED.user_name, \
         first_name = EXCLUDED.first_name, \
         middle_name = EXCLUDED.middle_name, \
         last_name = EXCLUDED.last_name, \
         job_title = EXCLUDED.job_title, \
         email = EXCLUDED.email, \
         is_active = EXCLUDED.is_active, \
         updated_at = NOW()",
    );
    Ok(qb.build().execute(&mut *conn).await?.rows_affected())
}
