//! Layered configuration for the gateway binary.
//!
//! Settings resolve in priority order: CLI flags first, then environment
//! variables (clap's `env` attribute), then an optional TOML file, and
//! finally the compiled defaults. The file lives at
//! `~/.config/wirechat-gateway/config.toml` unless `--config` points
//! elsewhere.

use std::path::PathBuf;

/// Errors raised while loading gateway configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("cannot read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("cannot parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

/// On-disk TOML schema. Every field is optional so a file can override
/// just the settings it cares about.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerSection,
}

/// `[server]` table of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerSection {
    bind_addr: Option<String>,
    auth_token: Option<String>,
}

/// Command-line interface of the gateway binary.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "WireChat event gateway")]
pub struct GatewayCliArgs {
    /// Address to bind the gateway to.
    #[arg(short, long, env = "GATEWAY_ADDR")]
    pub bind: Option<String>,

    /// Path to an alternative config file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Session token all clients must present; omit to accept any.
    #[arg(long, env = "GATEWAY_TOKEN")]
    pub auth_token: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "GATEWAY_LOG")]
    pub log_level: String,
}

/// The gateway's fully resolved settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Listen address, e.g. `0.0.0.0:9100`.
    pub bind_addr: String,
    /// Required session token; `None` accepts any.
    pub auth_token: Option<String>,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9100".to_string(),
            auth_token: None,
            log_level: "info".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Resolves the effective configuration for the given CLI arguments.
    ///
    /// An explicitly-passed `--config` file must exist; the default file
    /// location may be absent (treated as an empty file).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the config file cannot be read or
    /// parsed.
    pub fn load(cli: &GatewayCliArgs) -> Result<Self, ConfigError> {
        let file = read_config_file(cli.config.as_deref())?;
        Ok(Self::merge(cli, &file))
    }

    /// Merges CLI arguments over file settings over defaults.
    fn merge(cli: &GatewayCliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            auth_token: cli
                .auth_token
                .clone()
                .or_else(|| file.server.auth_token.clone()),
            log_level: cli.log_level.clone(),
        }
    }
}

/// Reads and parses the TOML file, tolerating a missing default file.
fn read_config_file(explicit: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = match explicit {
        Some(p) => {
            let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
                path: p.to_path_buf(),
                source: e,
            })?;
            return Ok(toml::from_str(&contents)?);
        }
        None => {
            let Some(config_dir) = dirs::config_dir() else {
                return Ok(ConfigFile::default());
            };
            config_dir.join("wirechat-gateway").join("config.toml")
        }
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
