pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod routes;

use std::sync::Arc;

use config::Config;
use db::pool::DbPool;
use gateway::broadcast::Broadcaster;
use gateway::registry::ConnectionRegistry;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Broadcaster,
}
