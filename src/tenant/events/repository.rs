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
use chrono::NaiveDate;
#[cfg(test)]
use mockall::automock;
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::{debug, info};
use uuid::Uuid;

use crate::common::error::{RepositoryError, RepositoryResult};
use crate::manager::app::database::PgSessionRouter;
use crate::tenant::events::model::{
    AddToCartEvent, EventBatch, NoSearchEvent, PageViewEvent, PurchaseEvent, SearchEvent,
    ViewItemEvent, parse_event_date,
};

const BATCH_SIZE: usize = 500;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventsRepository: Send + Sync {
    /// Replaces the `(tenant, event type, date range)` slice wholesale:
    /// existing rows in the range are deleted, then the new rows are inserted
    /// in batches of 500, all within one session. Re-running the same request
    /// therefore converges on identical table content. Returns the number of
    /// rows inserted.
    async fn replace_events(
        &self,
        tenant_id: Uuid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        batch: EventBatch,
    ) -> RepositoryResult<u64>;
}

#[async_trait]
impl EventsRepository for PgSessionRouter {
    async fn replace_events(
        &self,
        tenant_id: Uuid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        batch: EventBatch,
    ) -> RepositoryResult<u64> {
        let event_type = batch.event_type();
        self.with_session(tenant_id, move |conn| {
            Box::pin(async move {
                let deleted = sqlx::query(&format!(
                    "DELETE FROM {} WHERE tenant_id = $1 AND event_date BETWEEN $2 AND $3",
                    event_type.table_name()
                ))
                .bind(tenant_id)
                .bind(start_date)
                .bind(end_date)
                .execute(&mut *conn)
                .await?
                .rows_affected();
                debug!("Deleted {deleted} existing {event_type} events");

                let total = batch.len() as u64;
                match &batch {
                    EventBatch::Purchase(rows) => {
                        for chunk in rows.chunks(BATCH_SIZE) {
                            insert_purchase_chunk(&mut *conn, tenant_id, chunk).await?;
                        }
                    }
                    EventBatch::AddToCart(rows) => {
                        for chunk in rows.chunks(BATCH_SIZE) {
                            insert_add_to_cart_chunk(&mut *conn, tenant_id, chunk).await?;
                        }
                    }
                    EventBatch::PageView(rows) => {
                        for chunk in rows.chunks(BATCH_SIZE) {
                            insert_page_view_chunk(&mut *conn, tenant_id, chunk).await?;
                        }
                    }
                    EventBatch::ViewSearchResults(rows) => {
                        for chunk in rows.chunks(BATCH_SIZE) {
                            insert_search_chunk(&mut *conn, tenant_id, chunk).await?;
                        }
                    }
                    EventBatch::NoSearchResults(rows) => {
                        for chunk in rows.chunks(BATCH_SIZE) {
                            insert_no_search_chunk(&mut *conn, tenant_id, chunk).await?;
                        }
                    }
                    EventBatch::ViewItem(rows) => {
                        for chunk in rows.chunks(BATCH_SIZE) {
                            insert_view_item_chunk(&mut *conn, tenant_id, chunk).await?;
                        }
                    }
                }
                info!("Inserted {total} {event_type} events");
                Ok(total)
            })
        })
        .await
    }
}

fn parsed_date(raw: &str) -> RepositoryResult<NaiveDate> {
    parse_event_date(raw)
        .ok_or_else(|| RepositoryError::InvalidInput(format!("event_date: {raw:?}")))
}

async fn insert_purchase_chunk(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    rows: &[PurchaseEvent],
) -> RepositoryResult<()> {
    let mut dates = Vec::with_capacity(rows.len());
    for ev in rows {
        dates.push(parsed_date(&ev.event_date)?);
    }
    let mut qb = QueryBuilder::<Postgres>::new(
        "INSERT INTO purchase (tenant_id, event_date, event_timestamp, user_pseudo_id, \
         user_prop_webuserid, user_prop_default_branch_id, param_ga_session_id, \
         param_transaction_id, param_page_title, param_page_location, \
         ecommerce_purchase_revenue, items_json, device_category, \
         device_operating_system, geo_country, geo_city, raw_data) ",
    );
    qb.push_values(rows.iter().zip(dates), |mut b, (ev, date)| {
        b.push_bind(tenant_id)
            .push_bind(date)
            .push_bind(&ev.event_timestamp)
            .push_bind(&ev.user_pseudo_id)
            .push_bind(&ev.user_prop_webuserid)
            .push_bind(&ev.user_prop_default_branch_id)
            .push_bind(&ev.param_ga_session_id)
            .push_bind(&ev.param_transaction_id)
            .push_bind(&ev.param_page_title)
            .push_bind(&ev.param_page_location)
            .push_bind(&ev.ecommerce_purchase_revenue)
            .push_bind(&ev.items_json)
            .push_bind(&ev.device_category)
            .push_bind(&ev.device_operating_system)
            .push_bind(&ev.geo_country)
            .push_bind(&ev.geo_city)
            .push_bind(&ev.raw_data);
    });
    qb.build().execute(&mut *conn).await?;
    Ok(())
}

async fn insert_add_to_cart_chunk(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    rows: &[AddToCartEvent],
) -> RepositoryResult<()> {
    let mut dates = Vec::with_capacity(rows.len());
    for ev in rows {
        dates.push(parsed_date(&ev.event_date)?);
    }
    let mut qb = QueryBuilder::<Postgres>::new(
        "INSERT INTO add_to_cart (tenant_id, event_date, event_timestamp, user_pseudo_id, \
         user_prop_webuserid, user_prop_default_branch_id, param_ga_session_id, \
         param_page_title, param_page_location, first_item_item_id, first_item_item_name, \
         first_item_item_category, first_item_price, first_item_quantity, items_json, \
         device_category, device_operating_system, geo_country, geo_city, raw_data) ",
    );
    qb.push_values(rows.iter().zip(dates), |mut b, (ev, date)| {
        b.push_bind(tenant_id)
            .push_bind(date)
            .push_bind(&ev.event_timestamp)
            .push_bind(&ev.user_pseudo_id)
            .push_bind(&ev.user_prop_webuserid)
            .push_bind(&ev.user_prop_default_branch_id)
            .push_bind(&ev.param_ga_session_id)
            .push_bind(&ev.param_page_title)
            .push_bind(&ev.param_page_location)
            .push_bind(&ev.first_item_item_id)
            .push_bind(&ev.first_item_item_name)
            .push_bind(&ev.first_item_item_category)
            .push_bind(&ev.first_item_price)
            .push_bind(ev.first_item_quantity)
            .push_bind(&ev.items_json)
            .push_bind(&ev.device_category)
            .push_bind(&ev.device_operating_system)
            .push_bind(&ev.geo_country)
            .push_bind(&ev.geo_city)
            .push_bind(&ev.raw_data);
    });
    qb.build().execute(&mut *conn).await?;
    Ok(())
}

async fn insert_page_view_chunk(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    rows: &[PageViewEvent],
) -> RepositoryResult<()> {
    let mut dates = Vec::with_capacity(rows.len());
    for ev in rows {
        dates.push(parsed_date(&ev.event_date)?);
    }
    let mut qb = QueryBuilder::<Postgres>::new(
        "INSERT INTO page_view (tenant_id, event_date, event_timestamp, user_pseudo_id, \
         user_prop_webuserid, user_prop_default_branch_id, param_ga_session_id, \
         param_page_title, param_page_location, param_page_referrer, device_category, \
         device_operating_system, geo_country, geo_city, raw_data) ",
    );
    qb.push_values(rows.iter().zip(dates), |mut b, (ev, date)| {
        b.push_bind(tenant_id)
            .push_bind(date)
            .push_bind(&ev.event_timestamp)
            .push_bind(&ev.user_pseudo_id)
            .push_bind(&ev.user_prop_webuserid)
            .push_bind(&ev.user_prop_default_branch_id)
            .push_bind(&ev.param_ga_session_id)
            .push_bind(&ev.param_page_title)
            .push_bind(&ev.param_page_location)
            .push_bind(&ev.param_page_referrer)
            .push_bind(&ev.device_category)
            .push_bind(&ev.device_operating_system)
            .push_bind(&ev.geo_country)
            .push_bind(&ev.geo_city)
            .push_bind(&ev.raw_data);
    });
    qb.build().execute(&mut *conn).await?;
    Ok(())
}

async fn insert_search_chunk(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    rows: &[SearchEvent],
) -> RepositoryResult<()> {
    let mut dates = Vec::with_capacity(rows.len());
    for ev in rows {
        dates.push(parsed_date(&ev.event_date)?);
    }
    let mut qb = QueryBuilder::<Postgres>::new(
        "INSERT INTO view_search_results (tenant_id, event_date, event_timestamp, \
         user_pseudo_id, user_prop_webuserid, user_prop_default_branch_id, \
         param_ga_session_id, param_search_term, param_page_title, param_page_location, \
         device_category, device_operating_system, geo_country, geo_city, raw_data) ",
    );
    qb.push_values(rows.iter().zip(dates), |mut b, (ev, date)| {
        b.push_bind(tenant_id)
            .push_bind(date)
            .push_bind(&ev.event_timestamp)
            .push_bind(&ev.user_pseudo_id)
            .push_bind(&ev.user_prop_webuserid)
            .push_bind(&ev.user_prop_default_branch_id)
            .push_bind(&ev.param_ga_session_id)
            .push_bind(&ev.param_search_term)
            .push_bind(&ev.param_page_title)
            .push_bind(&ev.param_page_location)
            .push_bind(&ev.device_category)
            .push_bind(&ev.device_operating_system)
            .push_bind(&ev.geo_country)
            .push_bind(&ev.geo_city)
            .push_bind(&ev.raw_data);
    });
    qb.build().execute(&mut *conn).await?;
    Ok(())
}

async fn insert_no_search_chunk(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    rows: &[NoSearchEvent],
) -> RepositoryResult<()> {
    let mut dates = Vec::with_capacity(rows.len());
    for ev in rows {
        dates.push(parsed_date(&ev.event_date)?);
    }
    let mut qb = QueryBuilder::<Postgres>::new(
        "INSERT INTO no_search_results (tenant_id, event_date, event_timestamp, \
         user_pseudo_id, user_prop_webuserid, user_prop_default_branch_id, \
         param_ga_session_id, param_no_search_results_term, param_page_title, \
         param_page_location, device_category, device_operating_system, geo_country, \
         geo_city, raw_data) ",
    );
    qb.push_values(rows.iter().zip(dates), |mut b, (ev, date)| {
        b.push_bind(tenant_id)
            .push_bind(date)
            .push_bind(&ev.event_timestamp)
            .push_bind(&ev.user_pseudo_id)
            .push_bind(&ev.user_prop_webuserid)
            .push_bind(&ev.user_prop_default_branch_id)
            .push_bind(&ev.param_ga_session_id)
            .push_bind(&ev.param_no_search_results_term)
            .push_bind(&ev.param_page_title)
            .push_bind(&ev.param_page_location)
            .push_bind(&ev.device_category)
            .push_bind(&ev.device_operating_system)
            .push_bind(&ev.geo_country)
            .push_bind(&ev.geo_city)
            .push_bind(&ev.raw_data);
    });
    qb.build().execute(&mut *conn).await?;
    Ok(())
}

async fn insert_view_item_chunk(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    rows: &[ViewItemEvent],
) -> RepositoryResult<()> {
    let mut dates = Vec::with_capacity(rows.len());
    for ev in rows {
        dates.push(parsed_date(&ev.event_date)?);
    }
    let mut qb = QueryBuilder::<Postgres>::new(
        "INSERT INTO view_item (tenant_id, event_date, event_timestamp, user_pseudo_id, \
         user_prop_webuserid, user_prop_default_branch_id, param_ga_session_id, \
         first_item_item_id, first_item_item_name, first_item_item_category, \
         first_item_price, param_page_title, param_page_location, items_json, \
         device_category, device_operating_system, geo_country, geo_city, raw_data) ",
    );
    qb.push_values(rows.iter().zip(dates), |mut b, (ev, date)| {
        b.push_bind(tenant_id)
            .push_bind(date)
            .push_bind(&ev.event_timestamp)
            .push_bind(&ev.user_pseudo_id)
            .push_bind(&ev.user_prop_webuserid)
            .push_bind(&ev.user_prop_default_branch_id)
            .push_bind(&ev.param_ga_session_id)
            .push_bind(&ev.first_item_item_id)
            .push_bind(&ev.first_item_item_name)
            .push_bind(&ev.first_item_item_category)
            .push_bind(&ev.first_item_price)
            .push_bind(&ev.param_page_title)
            .push_bind(&ev.param_page_location)
            .push_bind(&ev.items_json)
            .push_bind(&ev.device_category)
            .push_bind(&ev.device_operating_system)
            .push_bind(&ev.geo_country)
            .push_bind(&ev.geo_city)
            .push_bind(&ev.raw_data);
    });
    qb.build().execute(&mut *conn).await?;
    Ok(())
}
