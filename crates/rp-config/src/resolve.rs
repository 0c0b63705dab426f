//! Config resolution: CLI → env → user config dir → defaults.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::player::PlayerConfig;
use crate::ConfigError;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "RECPLAY_CONFIG";

/// File looked up inside the user config directory.
pub const CONFIG_FILE_NAME: &str = "player.toml";

/// Candidate locations, highest priority first.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    pub explicit: Option<PathBuf>,
    pub env: Option<PathBuf>,
    pub user_dir: Option<PathBuf>,
}

impl ConfigPaths {
    /// Collect candidates from the CLI flag, environment and platform dirs.
    pub fn discover(explicit: Option<PathBuf>) -> Self {
        ConfigPaths {
            explicit,
            env: std::env::var_os(CONFIG_ENV_VAR)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            user_dir: dirs::config_dir().map(|d| d.join("recplay")),
        }
    }
}

/// Where the resolved configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum ConfigSource {
    Cli(PathBuf),
    Env(PathBuf),
    User(PathBuf),
    Defaults,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Cli(p) => write!(f, "cli:{}", p.display()),
            ConfigSource::Env(p) => write!(f, "env:{}", p.display()),
            ConfigSource::User(p) => write!(f, "user:{}", p.display()),
            ConfigSource::Defaults => write!(f, "defaults"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: PlayerConfig,
    pub source: ConfigSource,
}

/// Resolve the effective configuration.
///
/// Explicit and environment paths must exist; a missing user config file
/// silently falls through to defaults.
pub fn resolve_config(paths: &ConfigPaths) -> Result<ResolvedConfig, ConfigError> {
    if let Some(path) = &paths.explicit {
        return Ok(ResolvedConfig {
            config: load_file(path)?,
            source: ConfigSource::Cli(path.clone()),
        });
    }
    if let Some(path) = &paths.env {
        return Ok(ResolvedConfig {
            config: load_file(path)?,
            source: ConfigSource::Env(path.clone()),
        });
    }
    if let Some(dir) = &paths.user_dir {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.is_file() {
            return Ok(ResolvedConfig {
                config: load_file(&path)?,
                source: ConfigSource::User(path),
            });
        }
    }
    Ok(ResolvedConfig {
        config: PlayerConfig::default(),
        source: ConfigSource::Defaults,
    })
}

/// Load a TOML or JSON config file, chosen by extension.
pub fn load_file(path: &Path) -> Result<PlayerConfig, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        Ok(serde_json::from_str(&text)?)
    } else {
        toml::from_str(&text).map_err(|e| ConfigError::Toml {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defaults_when_nothing_configured() {
        let resolved = resolve_config(&ConfigPaths::default()).unwrap();
        assert_eq!(resolved.source, ConfigSource::Defaults);
        assert_eq!(resolved.config, PlayerConfig::default());
    }

    #[test]
    fn test_explicit_beats_env_and_user() {
        let dir = tempfile::tempdir().unwrap();
        let cli = dir.path().join("cli.toml");
        let env = dir.path().join("env.toml");
        fs::write(&cli, "[buffer]\nmax_read_ahead_mb = 1\n").unwrap();
        fs::write(&env, "[buffer]\nmax_read_ahead_mb = 2\n").unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "[buffer]\nmax_read_ahead_mb = 3\n").unwrap();

        let paths = ConfigPaths {
            explicit: Some(cli.clone()),
            env: Some(env.clone()),
            user_dir: Some(dir.path().to_path_buf()),
        };
        let resolved = resolve_config(&paths).unwrap();
        assert_eq!(resolved.source, ConfigSource::Cli(cli));
        assert_eq!(resolved.config.buffer.max_read_ahead_mb, 1);

        let paths = ConfigPaths {
            explicit: None,
            ..paths
        };
        let resolved = resolve_config(&paths).unwrap();
        assert_eq!(resolved.source, ConfigSource::Env(env));
        assert_eq!(resolved.config.buffer.max_read_ahead_mb, 2);

        let paths = ConfigPaths {
            env: None,
            ..paths
        };
        let resolved = resolve_config(&paths).unwrap();
        assert!(matches!(resolved.source, ConfigSource::User(_)));
        assert_eq!(resolved.config.buffer.max_read_ahead_mb, 3);
    }

    #[test]
    fn test_missing_explicit_is_error() {
        let paths = ConfigPaths {
            explicit: Some(PathBuf::from("/definitely/not/here.toml")),
            ..Default::default()
        };
        assert!(matches!(
            resolve_config(&paths),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_json_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.json");
        fs::write(&path, r#"{"playback": {"realtime_factor": 1.5}}"#).unwrap();
        let cfg = load_file(&path).unwrap();
        assert!((cfg.playback.realtime_factor - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_bad_toml_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[buffer\n").unwrap();
        match load_file(&path) {
            Err(ConfigError::Toml { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected toml error, got {other:?}"),
        }
    }
}
