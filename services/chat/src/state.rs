//! Application state shared across handlers

use std::sync::Arc;

use crate::gateway::Gateway;
use crate::middleware::JwtConfig;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub jwt: JwtConfig,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>, jwt: JwtConfig) -> Self {
        Self { gateway, jwt }
    }
}
