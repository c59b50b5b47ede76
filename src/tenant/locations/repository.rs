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
use crate::tenant::locations::model::LocationRecord;

const BATCH_SIZE: usize = 500;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait LocationsRepository: Send + Sync {
    /// Upserts locations keyed on `(tenant_id, warehouse_id)` in batches of
    /// 500. Every batch runs in its own session so that one failing batch
    /// cannot poison its siblings; failures are counted, not raised. Returns
    /// `(rows processed, batch errors)`.
    async fn upsert_locations(
        &self,
        tenant_id: Uuid,
        locations: Vec<LocationRecord>,
    ) -> RepositoryResult<(u64, u64)>;
}

#[async_trait]
impl LocationsRepository for PgSessionRouter {
    async fn upsert_locations(
        &self,
        tenant_id: Uuid,
        locations: Vec<LocationRecord>,
    ) -> RepositoryResult<(u64, u64)> {
        if locations.is_empty() {
            return Ok((0, 0));
        }

        let mut total: u64 = 0;
        let mut errors: u64 = 0;

        for (index, chunk) in locations.chunks(BATCH_SIZE).enumerate() {
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
                    debug!("Upserted location batch {batch_num}: {count} rows");
                }
                Err(e) => {
                    errors += 1;
                    warn!("Error upserting location batch {batch_num}: {e}");
                }
            }
        }

        info!("Upserted {total} locations ({errors} batch errors)");
        Ok((total, errors))
    }
}

async fn upsert_chunk(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    rows: &[LocationRecord],
) -> RepositoryResult<u64> {
    let mut qb = QueryBuilder::<Postgres>::new(
        "INSERT INTO locations (tenant_id, warehouse_id, warehouse_code, warehouse_name, \
         city, state, country, address1, address2, zip, is_active, updated_at) ",
    );
    qb.push_values(rows, |mut b, loc| {
        b.push_bind(tenant_id)
            .push_bind(&loc.warehouse_id)
            .push_bind(&loc.warehouse_code)
            .push_bind(&loc.warehouse_name)
            .push_bind(&loc.city)
            .push_bind(&loc.state)
            .push_bind(&loc.country)
            .push_bind(&loc.address1)
            .push_bind(&loc.address2)
            .push_bind(&loc.zip)
            .push_bind(true)
            .push("NOW()");
    });
    qb.push(
        " ON CONFLICT (tenant_id, warehouse_id) DO UPDATE SET \
         warehouse_code = EXCLUDED.warehouse_code, \
         warehouse_name = EXCLUDED.warehouse_name, \
         city = EXCLUDED.city, \
         state = EXCLUDED.state, \
         country = EXCLUDED.country, \
         address1 = EXCLUDED.address1, \
         address2 = EXCLUDED.address2, \
         zip = EXCLUDED.zip, \
         is_active = EXCLUDED.is_active, \
         updated_at = NOW()",
    );
    Ok(qb.build().execute(&mut *conn).await?.rows_affected())
}
