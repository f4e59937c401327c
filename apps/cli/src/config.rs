//! CLI configuration management.
//!
//! Configuration is stored as TOML at `~/.config/cirrus/cli.toml` unless
//! `--config` or `CIRRUS_CONFIG` points elsewhere. Engine tuning lives in
//! the `[engine]` table.

use std::path::{Path, PathBuf};

use cirrus_engine::EngineConfig;
use serde::{Deserialize, Serialize};

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory of the local backend (chunk store + index).
    #[serde(default = "default_backend_dir")]
    pub backend_dir: String,

    /// JSON file holding durable client state (offline download index).
    #[serde(default = "default_state_file")]
    pub state_file: String,

    /// Default destination folder for uploads.
    #[serde(default = "default_folder")]
    pub default_folder: String,

    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_backend_dir() -> String {
    "~/.local/share/cirrus/backend".into()
}

fn default_state_file() -> String {
    "~/.local/share/cirrus/state.json".into()
}

fn default_folder() -> String {
    "root".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_dir: default_backend_dir(),
            state_file: default_state_file(),
            default_folder: default_folder(),
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, writing a default file if none exists.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config.engine.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn backend_path(&self) -> PathBuf {
        expand_home(&self.backend_dir)
    }

    pub fn state_path(&self) -> PathBuf {
        expand_home(&self.state_file)
    }
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    home_dir().join(".config").join("cirrus").join("cli.toml")
}

/// Expands a leading `~/` to the home directory.
fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None if path == "~" => home_dir(),
        None => PathBuf::from(path),
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.default_folder, "root");
        assert!(config.backend_dir.starts_with("~/"));
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml_str = r#"
backend_dir = "/srv/cirrus"

[engine]
max_concurrent_downloads = 2
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.backend_path(), PathBuf::from("/srv/cirrus"));
        assert_eq!(config.default_folder, "root");
        assert_eq!(config.engine.max_concurrent_downloads, 2);
        assert_eq!(
            config.engine.max_download_chunk_requests,
            EngineConfig::default().max_download_chunk_requests
        );
    }

    #[test]
    fn load_creates_default_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("cli.toml");

        let config = Config::load(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        // Second load reads the file back.
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn load_rejects_invalid_engine_settings() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cli.toml");
        std::fs::write(&path, "[engine]\ncommit_window = 0\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn tilde_expands_to_home() {
        let expanded = expand_home("~/data");
        assert!(expanded.ends_with("data"));
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert_eq!(expand_home("/abs"), PathBuf::from("/abs"));
    }

    #[test]
    fn default_path_mentions_cirrus() {
        let path = default_config_path();
        assert!(path.ends_with("cirrus/cli.toml"));
    }
}
