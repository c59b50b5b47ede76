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

use crate::clients::ClientFactory;
use crate::common::AppState;
use crate::manager::app::config::AppConfig;
use crate::tenant::events::repository::EventsRepository;
use crate::tenant::jobs::repository::JobsRepository;
use crate::tenant::locations::repository::LocationsRepository;
use crate::tenant::users::repository::UsersRepository;

pub mod dto;
pub mod model;
pub mod repository;
pub mod service;
pub mod types;

pub fn init_default_ingestion_module(state: &AppState) -> IngestionModuleBuilder {
    IngestionModuleBuilder::default()
        .config(state.config.clone())
        .jobs_repo(state.router.clone())
        .events_repo(state.router.clone())
        .users_repo(state.router.clone())
        .locations_repo(state.router.clone())
        .client_factory(state.client_factory.clone())
}

/// Wiring for the ingestion job engine: the repositories it writes through
/// and the factory that builds per-tenant extractor clients.
pub struct IngestionModule {
    pub config: Arc<AppConfig>,
    pub jobs_repo: Arc<dyn JobsRepository>,
    pub events_repo: Arc<dyn EventsRepository>,
    pub users_repo: Arc<dyn UsersRepository>,
    pub locations_repo: Arc<dyn LocationsRepository>,
    pub client_factory: Arc<dyn ClientFactory>,
}

pub struct IngestionModuleBuilder {
    pub config: Option<Arc<AppConfig>>,
    pub jobs_repo: Option<Arc<dyn JobsRepository>>,
    pub events_repo: Option<Arc<dyn EventsRepository>>,
    pub users_repo: Option<Arc<dyn UsersRepository>>,
    pub locations_repo: Option<Arc<dyn LocationsRepository>>,
    pub client_factory: Option<Arc<dyn ClientFactory>>,
}

impl IngestionModuleBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            jobs_repo: None,
            events_repo: None,
            users_repo: None,
            locations_repo: None,
            client_factory: None,
        }
    }
    pub fn config(mut self, config: Arc<AppConfig>) -> Self {
        self.config = Some(config);
        self
    }
    pub fn jobs_repo(mut self, jobs_repo: Arc<dyn JobsRepository>) -> Self {
        self.jobs_repo = Some(jobs_repo);
        self
    }
    pub fn events_repo(mut self, events_repo: Arc<dyn EventsRepository>) -> Self {
        self.events_repo = Some(events_repo);
        self
    }
    pub fn users_repo(mut self, users_repo: Arc<dyn UsersRepository>) -> Self {
        self.users_repo = Some(users_repo);
        self
    }
    pub fn locations_repo(mut self, locations_repo: Arc<dyn LocationsRepository>) -> Self {
        self.locations_repo = Some(locations_repo);
        self
    }
    pub fn client_factory(mut self, client_factory: Arc<dyn ClientFactory>) -> Self {
        self.client_factory = Some(client_factory);
        self
    }
    pub fn build(self) -> Result<IngestionModule, String> {
        Ok(IngestionModule {
            config: self.config.ok_or("config is required".to_string())?,
            jobs_repo: self.jobs_repo.ok_or("jobs_repo is required".to_string())?,
            events_repo: self
                .events_repo
                .ok_or("events_repo is required".to_string())?,
            users_repo: self
                .users_repo
                .ok_or("users_repo is required".to_string())?,
            locations_repo: self
                .locations_repo
                .ok_or("locations_repo is required".to_string())?,
            client_factory: self
                .client_factory
                .ok_or("client_factory is required".to_string())?,
        })
    }
}

impl Default for IngestionModuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}
