use dotenvy::dotenv;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    /// Absent means the in-memory store (dev/demo mode).
    pub database_url: Option<String>,
    /// Absent means in-process fan-out only, no cross-node pub/sub.
    pub redis_url: Option<String>,
    pub bind_addr: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, crate::error::AppError> {
        dotenv().ok();
        Ok(Self::from_lookup(|key| env::var(key).ok()))
    }

    // Parsing is separated from the process environment so it can be tested
    // without mutating global state.
    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let database_url = get("DATABASE_URL").filter(|s| !s.trim().is_empty());
        let redis_url = get("REDIS_URL").filter(|s| !s.trim().is_empty());
        let bind_addr = get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".into());
        let port = get("PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);

        Self {
            database_url,
            redis_url,
            bind_addr,
            port,
        }
    }
}
