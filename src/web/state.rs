use chrono::{DateTime, Utc};

use crate::config::AppConfig;
use crate::pipeline::QueryPipeline;

/// Shared application state for the web server. The pipeline carries its own
/// store and gateway handles; nothing here is mutable across requests.
pub struct AppState {
    pub config: AppConfig,
    pub pipeline: QueryPipeline,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: AppConfig, pipeline: QueryPipeline) -> Self {
        Self {
            config,
            pipeline,
            startup_time: Utc::now(),
        }
    }
}
