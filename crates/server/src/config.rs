//! Server configuration
//!
//! Listening port comes from the CLI or the `APPLYWATCH_PORT` environment
//! override. The CORS allowlist is fixed to the local development origins
//! the dashboard and extension dev servers run on.

use axum::http::{header, HeaderValue, Method};
use clap::Parser;
use thiserror::Error;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Origins the dashboard dev servers are reachable on.
const DEV_ORIGINS: &[&str] = &["http://localhost:3000", "http://localhost:5173"];

#[derive(Debug, Parser)]
#[command(name = "applywatch", about = "Real-time monitoring relay for autofill runs")]
pub struct ServerArgs {
    /// Port to listen on
    #[arg(long, env = "APPLYWATCH_PORT", default_value_t = 3001)]
    pub port: u16,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid CORS origin: {0}")]
    InvalidOrigin(String),
}

/// CORS layer restricted to the fixed local development origins.
pub fn cors_layer() -> Result<CorsLayer, ConfigError> {
    let origins = DEV_ORIGINS
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin)
                .map_err(|_| ConfigError::InvalidOrigin(origin.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]))
}

/// Activity Driver tunables: one action every 0.5–2.5 s, 25 actions per
/// run. Tests shrink these to keep runs fast.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Lower bound of the jittered tick interval, in milliseconds
    pub min_tick_ms: u64,
    /// Upper bound of the jittered tick interval, in milliseconds
    pub max_tick_ms: u64,
    /// A run completes after exactly this many actions
    pub action_limit: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            min_tick_ms: 500,
            max_tick_ms: 2500,
            action_limit: 25,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_origins_parse_as_header_values() {
        assert!(cors_layer().is_ok());
    }

    #[test]
    fn default_driver_config_matches_relay_cadence() {
        let config = DriverConfig::default();
        assert_eq!(config.min_tick_ms, 500);
        assert_eq!(config.max_tick_ms, 2500);
        assert_eq!(config.action_limit, 25);
    }
}
