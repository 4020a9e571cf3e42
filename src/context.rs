use crate::config::AppConfig;
use crate::core::platform::Platform;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub platform: Platform,
}

impl AppContext {
    pub fn new(config: AppConfig, platform: Platform) -> Self {
        Self {
            config: Arc::new(config),
            platform,
        }
    }
}
