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

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::common::AppState;
use crate::tenant::jobs::{IngestionModule, init_default_ingestion_module};

pub fn init_subscriber() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

/// Builds the default process wiring: configuration from the environment,
/// the session router, the client factory and the ingestion module the
/// orchestration layer calls into.
pub fn init_default_app() -> Result<(Arc<AppState>, Arc<IngestionModule>)> {
    let app_state = Arc::new(AppState::new()?);
    let ingestion = Arc::new(
        init_default_ingestion_module(&app_state)
            .build()
            .map_err(anyhow::Error::msg)?,
    );
    Ok((app_state, ingestion))
}
