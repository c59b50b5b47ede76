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

use crate::clients::DefaultClientFactory;
use crate::manager::app::config::AppConfig;
use crate::manager::app::database::PgSessionRouter;
use crate::manager::tenants::provisioning::TenantProvisioner;

pub mod error;

pub trait ConfigProvider: Send + Sync {
    fn config(&self) -> Arc<AppConfig>;
}

/// Process-wide wiring: one configuration, one session router, one client
/// factory and one provisioner shared by every job. None of these hold open
/// connections between invocations; engines are constructed per session.
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub router: Arc<PgSessionRouter>,
    pub client_factory: Arc<DefaultClientFactory>,
    pub provisioner: Arc<TenantProvisioner>,
}

impl AppState {
    pub fn new() -> anyhow::Result<AppState> {
        let config = Arc::new(AppConfig::from_env()?);
        Self::with_config(config)
    }

    pub fn with_config(config: Arc<AppConfig>) -> anyhow::Result<AppState> {
        let router = Arc::new(PgSessionRouter::new(config.clone()));
        Ok(Self {
            config,
            router: router.clone(),
            client_factory: Arc::new(DefaultClientFactory::new(router.clone())),
            provisioner: Arc::new(TenantProvisioner::new(router)),
        })
    }
}

impl ConfigProvider for AppState {
    fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }
}
