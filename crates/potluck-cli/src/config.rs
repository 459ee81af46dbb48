//! Configuration file management for potluck.
//!
//! Provides a TOML-based config file at `~/.config/potluck/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use potluck_db::config::DbConfig;

/// Env var naming the catalog file.
pub const CATALOG_ENV: &str = "POTLUCK_CATALOG";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<CatalogSection>,
    #[serde(default)]
    pub voting: VotingSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CatalogSection {
    /// Households, meals, recipes and unit conversions.
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingSection {
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_store_attempts")]
    pub max_store_attempts: u32,
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_store_attempts() -> u32 {
    3
}

impl Default for VotingSection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            request_timeout_secs: default_request_timeout(),
            max_store_attempts: default_max_store_attempts(),
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the potluck config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/potluck` or `~/.config/potluck`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("potluck");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("potluck")
}

/// Return the path to the potluck config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

pub fn load_config_from(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config_to(config: &ConfigFile, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    // The database URL may carry a password.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct PotluckConfig {
    pub db_config: DbConfig,
    pub catalog_path: Option<PathBuf>,
    pub sweep_interval: Duration,
    pub request_timeout: Duration,
    pub max_store_attempts: u32,
}

impl PotluckConfig {
    /// Resolve configuration from the default config file location.
    pub fn resolve(cli_db_url: Option<&str>, cli_catalog: Option<&Path>) -> Result<Self> {
        let path = config_path();
        let file = if path.exists() {
            Some(load_config_from(&path)?)
        } else {
            None
        };
        Ok(Self::resolve_with(cli_db_url, cli_catalog, file))
    }

    /// Resolve using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `POTLUCK_DATABASE_URL` > `database.url` > `DbConfig::DEFAULT_URL`
    /// - Catalog: `cli_catalog` > `POTLUCK_CATALOG` > `catalog.path` > none
    /// - Voting timings come from the file or their defaults.
    pub fn resolve_with(
        cli_db_url: Option<&str>,
        cli_catalog: Option<&Path>,
        file: Option<ConfigFile>,
    ) -> Self {
        let db_url = if let Some(url) = cli_db_url {
            url.to_owned()
        } else if let Ok(url) = std::env::var("POTLUCK_DATABASE_URL") {
            url
        } else if let Some(ref cfg) = file {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_owned()
        };

        let catalog_path = if let Some(path) = cli_catalog {
            Some(path.to_path_buf())
        } else if let Ok(path) = std::env::var(CATALOG_ENV) {
            Some(PathBuf::from(path))
        } else {
            file.as_ref()
                .and_then(|cfg| cfg.catalog.as_ref())
                .map(|c| c.path.clone())
        };

        let voting = file.map(|cfg| cfg.voting).unwrap_or_default();

        Self {
            db_config: DbConfig::new(db_url),
            catalog_path,
            sweep_interval: Duration::from_secs(voting.sweep_interval_secs.max(1)),
            request_timeout: Duration::from_secs(voting.request_timeout_secs.max(1)),
            max_store_attempts: voting.max_store_attempts.max(1),
        }
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    fn file(url: &str) -> ConfigFile {
        ConfigFile {
            database: DatabaseSection { url: url.to_owned() },
            catalog: Some(CatalogSection {
                path: PathBuf::from("/etc/potluck/catalog.toml"),
            }),
            voting: VotingSection {
                sweep_interval_secs: 15,
                request_timeout_secs: 5,
                max_store_attempts: 4,
            },
        }
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("potluck").join("config.toml");

        save_config_to(&file("postgresql://testhost:5432/testdb"), &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        assert_eq!(loaded.database.url, "postgresql://testhost:5432/testdb");
        assert_eq!(loaded.voting.sweep_interval_secs, 15);
        assert_eq!(
            loaded.catalog.unwrap().path,
            PathBuf::from("/etc/potluck/catalog.toml")
        );
    }

    #[cfg(unix)]
    #[test]
    fn save_config_sets_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        save_config_to(&file("postgresql://h/db"), &path).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn voting_section_defaults_when_missing() {
        let cfg: ConfigFile = toml::from_str("[database]\nurl = \"postgresql://h/db\"\n").unwrap();
        assert_eq!(cfg.voting, VotingSection::default());
        assert!(cfg.catalog.is_none());
    }

    #[test]
    fn resolve_with_cli_flag_overrides_all() {
        let _lock = lock_env();
        unsafe { std::env::set_var("POTLUCK_DATABASE_URL", "postgresql://env:5432/envdb") };
        unsafe { std::env::set_var(CATALOG_ENV, "/env/catalog.toml") };

        let config = PotluckConfig::resolve_with(
            Some("postgresql://cli:5432/clidb"),
            Some(Path::new("/cli/catalog.toml")),
            Some(file("postgresql://file:5432/filedb")),
        );
        assert_eq!(config.db_config.database_url, "postgresql://cli:5432/clidb");
        assert_eq!(config.catalog_path, Some(PathBuf::from("/cli/catalog.toml")));

        unsafe { std::env::remove_var("POTLUCK_DATABASE_URL") };
        unsafe { std::env::remove_var(CATALOG_ENV) };
    }

    #[test]
    fn resolve_with_env_var_overrides_config_file() {
        let _lock = lock_env();
        unsafe { std::env::set_var("POTLUCK_DATABASE_URL", "postgresql://env:5432/envdb") };
        unsafe { std::env::remove_var(CATALOG_ENV) };

        let config =
            PotluckConfig::resolve_with(None, None, Some(file("postgresql://file:5432/filedb")));
        assert_eq!(config.db_config.database_url, "postgresql://env:5432/envdb");
        assert_eq!(
            config.catalog_path,
            Some(PathBuf::from("/etc/potluck/catalog.toml"))
        );
        assert_eq!(config.sweep_interval, Duration::from_secs(15));
        assert_eq!(config.max_store_attempts, 4);

        unsafe { std::env::remove_var("POTLUCK_DATABASE_URL") };
    }

    #[test]
    fn resolve_defaults_when_nothing_set() {
        let _lock = lock_env();
        unsafe { std::env::remove_var("POTLUCK_DATABASE_URL") };
        unsafe { std::env::remove_var(CATALOG_ENV) };

        let config = PotluckConfig::resolve_with(None, None, None);
        assert_eq!(config.db_config.database_url, DbConfig::DEFAULT_URL);
        assert!(config.catalog_path.is_none());
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.max_store_attempts, 3);
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("potluck/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
