pub mod api;
pub mod catalog;
pub mod config;
pub mod db;
pub mod retry;

pub use db::DbPool;

use config::Config;
use std::sync::Arc;
use std::time::Instant;

use crate::api::cache::ResponseCache;
use crate::retry::RetryPolicy;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub cache: Arc<ResponseCache>,
    /// Policy applied to every data-access call
    pub retry: RetryPolicy,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let retry = config.retry.policy();
        Self {
            config,
            db,
            cache: Arc::new(ResponseCache::new()),
            retry,
            started_at: Instant::now(),
        }
    }
}
