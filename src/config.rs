//! Ambient config/env lookup, shaped after
//! `shared/src/os/env_var.rs`'s `EnvVarQuery`: a mockable trait over
//! `std::env` so config-dependent code is testable without touching the
//! real process environment.

use std::env::VarError;

use mockall::automock;

#[automock]
pub trait EnvVarQuery {
    fn get_env_var(&self, name: &'static str) -> Result<String, VarError>;
}

pub struct ActualEnvVarQuery;

impl EnvVarQuery for ActualEnvVarQuery {
    fn get_env_var(&self, name: &'static str) -> Result<String, VarError> {
        std::env::var(name)
    }
}

/// Env var naming the metrics server's listen port (§6, default 8080).
pub const METRICS_PORT_VAR: &str = "ARKLET_METRICS_PORT";

pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Parses `METRICS_PORT_VAR`, falling back to `DEFAULT_METRICS_PORT` when
/// unset or unparseable.
pub fn metrics_port(query: &dyn EnvVarQuery) -> u16 {
    query
        .get_env_var(METRICS_PORT_VAR)
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(DEFAULT_METRICS_PORT)
}
