//! Engine configuration loader for Waypoint.
//!
//! Reads `waypoint.toml` and deserializes it into [`EngineConfig`].
//!
//! - Missing file: the defaults apply (no routes, 1000 steps, 60s tasks).
//! - Unreadable or malformed file: an explicit `ConfigError`. A config the
//!   operator wrote but that cannot be used is never silently replaced.
//! - Parsed values are range-checked with `EngineConfig::validate`.

use std::path::Path;

use waypoint_types::config::EngineConfig;
use waypoint_types::error::ConfigError;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "waypoint.toml";

/// Load engine configuration from `path`.
pub async fn load_engine_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return Ok(EngineConfig::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            });
        }
    };

    let config = parse_engine_config(&content).map_err(|err| match err {
        ConfigError::Parse { reason, .. } => ConfigError::Parse {
            path: path.display().to_string(),
            reason,
        },
        other => other,
    })?;

    tracing::debug!(
        path = %path.display(),
        routes = config.routes.len(),
        max_steps = config.max_steps,
        "loaded engine config"
    );
    Ok(config)
}

/// Parse and validate configuration from a TOML string.
pub fn parse_engine_config(content: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        path: "<inline>".to_string(),
        reason: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}
