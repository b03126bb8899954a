//! Engine assembly: concepts, sessions, passthrough table and syncs.

use std::sync::Arc;

use anyhow::Result;
use crewcall_concepts::{Concepts, UserExistenceGuard};
use crewcall_sync::Engine;
use tracing::{info, warn};

use crate::auth::JwtSessionStore;
use crate::config::ServerConfig;
use crate::passthrough::PassthroughTable;
use crate::syncs;

/// Everything a server instance runs on
#[derive(Clone)]
pub struct App {
    pub engine: Engine,
    pub concepts: Arc<Concepts>,
    pub sessions: Arc<JwtSessionStore>,
    pub table: Arc<PassthroughTable>,
}

impl App {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        Self::with_sessions(Arc::new(JwtSessionStore::from_config(&config.session)))
    }

    /// Assemble the standard concepts and catalogue around `sessions`
    pub fn with_sessions(sessions: Arc<JwtSessionStore>) -> Result<Self> {
        let table = Arc::new(PassthroughTable::standard());
        let users: Arc<dyn UserExistenceGuard> = sessions.clone();
        let concepts = Arc::new(Concepts::new(Some(users)));

        let engine = concepts
            .install(Engine::builder())
            .syncs(syncs::catalogue(&table)?)
            .session_store(sessions.clone())
            .build()?;

        for route in table.unverified_routes(engine.concepts()) {
            warn!(%route, "route is neither included nor excluded; it goes through Requesting");
        }
        for route in table.stale_routes(engine.concepts()) {
            warn!(%route, "passthrough table names an unknown operation");
        }
        info!(
            syncs = engine.syncs().len(),
            passthrough = table.inclusions().count(),
            gated = table.exclusions().count(),
            "app assembled"
        );

        Ok(Self {
            engine,
            concepts,
            sessions,
            table,
        })
    }
}
