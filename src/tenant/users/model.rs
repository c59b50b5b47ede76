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

/// One user row as extracted from the tenant's user dimension table.
///
/// `(tenant_id, user_id)` is the upsert key. Every id-like column, phone
/// number and zip is a string; the two datetime columns are parsed
/// permissively by the extractor and left null when unparseable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub user_name: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub job_title: Option<String>,
    pub user_erp_id: Option<String>,
    pub email: Option<String>,
    pub office_phone: Option<String>,
    pub cell_phone: Option<String>,
    pub fax: Option<String>,
    pub address1: Option<String>,
    pub address2: Option<String>,
    pub address3: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub zip: Option<String>,
    pub warehouse_code: Option<String>,
    pub registered_date: Option<DateTime<Utc>>,
    pub last_login_date: Option<DateTime<Utc>>,
    pub cimm_buying_company_id: Option<String>,
    pub buying_company_name: Option<String>,
    pub buying_company_erp_id: Option<String>,
    pub role_name: Option<String>,
    pub site_name: Option<String>,
}
