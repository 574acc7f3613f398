//! The façade's entire configuration surface: two environment variables.
//!
//! File-based configuration, secrets, and hot reload are out of scope; this
//! struct exists only to carry `PORT` and `USE_LEGACY_VALIDATOR` the way the
//! rest of the ambient stack expects a config type to look.

use std::env;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayServerConfig {
    pub port: u16,
    pub use_legacy_validator: bool,
}

fn default_port() -> u16 {
    8903
}

impl Default for GatewayServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            use_legacy_validator: false,
        }
    }
}

/// Reads `PORT`/`USE_LEGACY_VALIDATOR` from the environment, falling back to
/// defaults (with a logged warning) rather than failing startup.
pub fn load_config() -> GatewayServerConfig {
    let mut cfg = GatewayServerConfig::default();

    match env::var("PORT") {
        Ok(raw) => match raw.parse::<u16>() {
            Ok(port) => cfg.port = port,
            Err(err) => tracing::warn!("invalid PORT={raw:?} ({err}), using default {}", cfg.port),
        },
        Err(_) => {}
    }

    match env::var("USE_LEGACY_VALIDATOR") {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => cfg.use_legacy_validator = true,
            "0" | "false" | "no" | "" => cfg.use_legacy_validator = false,
            other => tracing::warn!(
                "invalid USE_LEGACY_VALIDATOR={other:?}, using default {}",
                cfg.use_legacy_validator
            ),
        },
        Err(_) => {}
    }

    cfg
}
