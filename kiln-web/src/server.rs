//! Listener settings.

use kiln_core::Environment;

use crate::constants::{
    DEFAULT_HOST, DEFAULT_PORT, SERVER_ENABLE_REQUEST_LOGGING, SERVER_HOST, SERVER_PORT,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerProperties {
    pub host: String,
    pub port: u16,
    pub enable_request_logging: bool,
}

impl Default for ServerProperties {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            enable_request_logging: true,
        }
    }
}

impl ServerProperties {
    pub fn from_environment(env: &Environment) -> Self {
        let port = env
            .get_i64(SERVER_PORT)
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(DEFAULT_PORT);

        Self {
            host: env.get_string_or(SERVER_HOST, DEFAULT_HOST),
            port,
            enable_request_logging: env.get_bool_or(SERVER_ENABLE_REQUEST_LOGGING, true),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
