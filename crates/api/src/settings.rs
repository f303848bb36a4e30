//! Server configuration
//!
//! Sources, later ones overriding earlier ones:
//! 1. built-in defaults
//! 2. `config/default.{toml,yaml,json}` (optional)
//! 3. the file named by `RSA_CONFIG` (optional)
//! 4. `RSA_<SECTION>__<KEY>` environment variables

use analysis::ModelsConfig;
use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tile_mosaic::FetchConfig;

use crate::rate_limit::RateLimitConfig;

const ENV_PREFIX: &str = "RSA";
const CONFIG_FILE_ENV: &str = "RSA_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub database: DatabaseConfig,
    pub models: ModelsConfig,
    pub tiles: FetchConfig,
    pub rate_limit: RateLimitConfig,
    pub render: RenderConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Prefix for result URLs; derived from the `Host` header when unset
    pub public_base_url: Option<String>,
    pub body_limit_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5000".to_string(),
            public_base_url: None,
            body_limit_mb: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Uploads and stitched mosaics awaiting analysis
    pub temp_dir: PathBuf,
    /// Served under `/static`
    pub static_root: PathBuf,
    pub result_dir: PathBuf,
    pub history_input_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            temp_dir: PathBuf::from("temp_uploads"),
            static_root: PathBuf::from("static"),
            result_dir: PathBuf::from("static/output"),
            history_input_dir: PathBuf::from("static/history_inputs"),
        }
    }
}

impl PathsConfig {
    /// Result and archived-input directories must sit under the static root,
    /// otherwise their files have no `/static` URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, dir) in [
            ("paths.result_dir", &self.result_dir),
            ("paths.history_input_dir", &self.history_input_dir),
        ] {
            if !within(dir, &self.static_root) {
                return Err(ConfigError::Message(format!(
                    "{} ({}) must be inside paths.static_root ({})",
                    key,
                    dir.display(),
                    self.static_root.display()
                )));
            }
        }
        Ok(())
    }
}

fn within(dir: &Path, root: &Path) -> bool {
    dir.starts_with(root) && dir != root
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://history.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// TTF/OTF used for detection labels; boxes are drawn unlabelled without it
    pub font_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load from the default file locations and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        let extra = std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from);
        Self::from_sources(extra, environment())
    }

    fn from_sources(extra_file: Option<PathBuf>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(File::with_name("config/default").required(false));
        if let Some(path) = extra_file {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config: Self = builder.add_source(env).build()?.try_deserialize()?;
        config.paths.validate()?;
        Ok(config)
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis::TaskType;
    use predictor::BackendKind;
    use tile_mosaic::MissingTilePolicy;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(map))
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_sources(None, env(&[])).unwrap();

        assert_eq!(config.server.bind_addr, "127.0.0.1:5000");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.tiles.timeout_secs, 5);
        assert_eq!(config.tiles.policy, MissingTilePolicy::FailFast);
        assert_eq!(config.models.backend, BackendKind::Tract);
        assert_eq!(config.models.score_threshold, 0.5);
        assert!(config.rate_limit.enabled);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(
            &path,
            r#"
[server]
bind_addr = "0.0.0.0:8080"

[tiles]
policy = "tolerate"
concurrency = 2

[models]
road_extraction_dir = "/srv/models/road"
"#,
        )
        .unwrap();

        let config = AppConfig::from_sources(Some(path), env(&[])).unwrap();

        assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.tiles.policy, MissingTilePolicy::Tolerate);
        assert_eq!(config.tiles.concurrency, 2);
        assert_eq!(config.tiles.timeout_secs, 5);
        assert_eq!(
            config.models.dir(TaskType::RoadExtraction),
            std::path::Path::new("/srv/models/road")
        );
    }

    #[test]
    fn test_environment_overrides() {
        let config = AppConfig::from_sources(
            None,
            env(&[
                ("RSA_DATABASE__URL", "sqlite::memory:"),
                ("RSA_RATE_LIMIT__ENABLED", "false"),
                ("RSA_TILES__MAX_TILES", "64"),
            ]),
        )
        .unwrap();

        assert_eq!(config.database.url, "sqlite::memory:");
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.tiles.max_tiles, 64);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = AppConfig::from_sources(Some(PathBuf::from("/nonexistent/rsa.toml")), env(&[]));
        assert!(result.is_err());
    }

    #[test]
    fn test_output_dirs_must_be_served() {
        let result = AppConfig::from_sources(
            None,
            env(&[("RSA_PATHS__RESULT_DIR", "/var/lib/rsa/output")]),
        );
        let err = result.unwrap_err().to_string();
        assert!(err.contains("paths.result_dir"), "{}", err);

        let result = AppConfig::from_sources(
            None,
            env(&[("RSA_PATHS__HISTORY_INPUT_DIR", "static")]),
        );
        assert!(result.is_err());

        let config = AppConfig::from_sources(
            None,
            env(&[
                ("RSA_PATHS__STATIC_ROOT", "/srv/www"),
                ("RSA_PATHS__RESULT_DIR", "/srv/www/results"),
                ("RSA_PATHS__HISTORY_INPUT_DIR", "/srv/www/inputs"),
            ]),
        )
        .unwrap();
        assert_eq!(config.paths.result_dir, PathBuf::from("/srv/www/results"));
    }
}
