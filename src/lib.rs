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

//! Multi-tenant analytics ingestion engine.
//!
//! For each tenant the engine pulls GA4 event data from BigQuery, pulls
//! dimensional data (locations, optionally users) from an SFTP spreadsheet
//! source, and lands everything in the tenant's isolated PostgreSQL database
//! (`google-analytics-<tenant-uuid>`). There is no HTTP or CLI surface here;
//! the orchestration layer drives jobs through in-process calls on
//! [`tenant::jobs::IngestionModule`].

#![forbid(unsafe_code)]

pub mod clients;
pub mod common;
pub mod manager;
pub mod tenant;
