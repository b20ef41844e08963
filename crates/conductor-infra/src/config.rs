//! Configuration loader for Conductor.
//!
//! Reads `config.toml` from the data directory (`~/.conductor/` unless
//! overridden) into [`ConductorConfig`]. Falls back to defaults when the file
//! is missing or malformed.

use std::path::{Path, PathBuf};

use conductor_types::config::ConductorConfig;
use conductor_types::error::{ErrorCode, OrchestratorError};
use secrecy::SecretString;
use thiserror::Error;

pub const CONFIG_FILE: &str = "config.toml";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "CONDUCTOR_DATA_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot determine the home directory; set {DATA_DIR_ENV}")]
    NoHomeDir,

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("environment variable {0} is not set")]
    MissingEnv(String),
}

impl From<ConfigError> for OrchestratorError {
    fn from(err: ConfigError) -> Self {
        OrchestratorError::new(ErrorCode::SystemConfiguration, err.to_string()).with_cause(err)
    }
}

/// Resolve the data directory: explicit override, then `CONDUCTOR_DATA_DIR`,
/// then `~/.conductor`.
pub fn resolve_data_dir(override_dir: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(dir) = override_dir {
        return Ok(dir.to_path_buf());
    }
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".conductor"))
        .ok_or(ConfigError::NoHomeDir)
}

/// Strict read of `{data_dir}/config.toml`. `Ok(None)` when the file does
/// not exist.
pub async fn read_config(data_dir: &Path) -> Result<Option<ConductorConfig>, ConfigError> {
    let path = data_dir.join(CONFIG_FILE);
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(ConfigError::Read { path, source }),
    };
    toml::from_str(&content)
        .map(Some)
        .map_err(|source| ConfigError::Parse { path, source })
}

/// Load configuration, never failing.
///
/// - Missing file: defaults.
/// - Unreadable or unparseable file: logs a warning, defaults.
pub async fn load_config(data_dir: &Path) -> ConductorConfig {
    match read_config(data_dir).await {
        Ok(Some(config)) => config,
        Ok(None) => {
            tracing::debug!(
                "No {CONFIG_FILE} found in {}, using defaults",
                data_dir.display()
            );
            ConductorConfig::default()
        }
        Err(err) => {
            tracing::warn!("{err}, using defaults");
            ConductorConfig::default()
        }
    }
}

/// Read a credential from the environment.
pub fn secret_from_env(var: &str) -> Result<SecretString, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Ok(SecretString::from(value)),
        _ => Err(ConfigError::MissingEnv(var.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).await;
        assert_eq!(config.engine.max_concurrent_runs, 10);
        assert!(config.llm_providers.is_empty());
        assert!(read_config(tmp.path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn load_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join(CONFIG_FILE),
            r#"
[engine]
max_concurrent_runs = 2
default_step_timeout_secs = 30

[events]
retention_hours = 24

[[llm_providers]]
name = "anthropic"
kind = "anthropic"
api_key_env = "ANTHROPIC_API_KEY"
default_model = "claude-sonnet-4-20250514"
default = true

[[integrations]]
id = "crm"
base_url = "https://crm.example.com/api"
auth_header = "Authorization"
auth_env = "CRM_TOKEN"

[integrations.operations.get_contact]
path = "/contacts/{id}"

[integrations.operations.create_note]
method = "POST"
path = "/contacts/{id}/notes"
"#,
        )
        .await
        .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config.engine.max_concurrent_runs, 2);
        assert_eq!(config.engine.default_step_timeout_secs, Some(30));
        assert_eq!(config.events.retention_hours, 24);
        assert_eq!(config.events.bus_capacity, 1_024);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert!(config.llm_providers[0].default);

        let crm = &config.integrations[0];
        assert_eq!(crm.operations["get_contact"].method, "GET");
        assert_eq!(crm.operations["create_note"].method, "POST");
    }

    #[tokio::test]
    async fn load_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join(CONFIG_FILE), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config.engine.max_concurrent_runs, 10);
        assert!(matches!(
            read_config(tmp.path()).await,
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn explicit_data_dir_wins() {
        let dir = resolve_data_dir(Some(Path::new("/tmp/conductor-test"))).unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/conductor-test"));
    }

    #[test]
    fn missing_secret_env() {
        let err = secret_from_env("CONDUCTOR_TEST_SURELY_UNSET_VAR").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(ref v) if v == "CONDUCTOR_TEST_SURELY_UNSET_VAR"));
        let orchestrator: OrchestratorError = err.into();
        assert_eq!(orchestrator.code, ErrorCode::SystemConfiguration);
    }
}
