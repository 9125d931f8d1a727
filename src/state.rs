// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::{
    config::Config,
    services::{
        anti_cheat::AntiCheatMonitor, grader::Grader, late_code::LateCodeRegistry,
        lifecycle::AttemptLifecycle,
    },
    store::{AttemptStore, ExamCatalog, LateCodeStore, PgStore},
    utils::clock::{Clock, SystemClock},
};

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<AttemptLifecycle>,
    pub late_codes: Arc<LateCodeRegistry>,
    pub config: Config,
}

impl AppState {
    /// Wires the services over explicit storage ports.
    pub fn new(
        config: Config,
        attempts: Arc<dyn AttemptStore>,
        late_codes: Arc<dyn LateCodeStore>,
        catalog: Arc<dyn ExamCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = Arc::new(LateCodeRegistry::new(
            late_codes,
            catalog.clone(),
            clock.clone(),
            config.late_codes.clone(),
        ));
        let lifecycle = Arc::new(AttemptLifecycle::new(
            attempts,
            catalog,
            registry.clone(),
            AntiCheatMonitor::new(config.anti_cheat.clone()),
            Grader::default(),
            clock,
            config.frontend_url.clone(),
        ));

        Self {
            lifecycle,
            late_codes: registry,
            config,
        }
    }

    /// Production wiring: Postgres for every port, wall clock.
    pub fn with_pool(config: Config, pool: PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self::new(
            config,
            store.clone(),
            store.clone(),
            store,
            Arc::new(SystemClock),
        )
    }
}

impl FromRef<AppState> for Arc<AttemptLifecycle> {
    fn from_ref(state: &AppState) -> Self {
        state.lifecycle.clone()
    }
}

impl FromRef<AppState> for Arc<LateCodeRegistry> {
    fn from_ref(state: &AppState) -> Self {
        state.late_codes.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
