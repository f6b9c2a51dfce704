use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub api_url: String,
    pub api_key: String,
    /// Secret used when exchanging a request token for a session.
    pub api_secret: String,
    /// Bound on every broker call; a placement that exceeds it surfaces as
    /// an ambiguous order state, not a retry.
    pub request_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/options_desk".to_string(),
                max_connections: 10,
            },
            broker: BrokerConfig {
                api_url: "https://api.kite.trade".to_string(),
                api_key: String::new(),
                api_secret: String::new(),
                request_timeout_secs: 10,
            },
        }
    }
}
