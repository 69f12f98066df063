//! Configuration for the face verification service.
//!
//! Settings are layered: an optional TOML config file is read first, then
//! environment variables override individual fields, then defaults fill the
//! gaps. The cache section is optional — a missing Redis host disables
//! caching without failing startup.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const PRIMARY_CONFIG_PATH: &str = "/etc/facegate/config.toml";
pub const SECONDARY_CONFIG_PATH: &str = "/usr/local/etc/facegate/config.toml";

pub const DEFAULT_DATA_DIR: &str = "/var/lib/facegate/encodings";
pub const DEFAULT_TOLERANCE: f64 = 0.6;
pub const DEFAULT_MODEL: &str = "large";
pub const DEFAULT_ENROLL_JITTERS: u32 = 2;
pub const DEFAULT_VERIFY_JITTERS: u32 = 1;
pub const DEFAULT_REDIS_PORT: u16 = 6379;
pub const DEFAULT_REDIS_DB: i64 = 1;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;

pub const ENV_DATA_DIR: &str = "FACEGATE_DATA_DIR";
pub const ENV_TOLERANCE: &str = "FACEGATE_TOLERANCE";
pub const ENV_MODEL: &str = "FACEGATE_MODEL";
pub const ENV_ENROLL_JITTERS: &str = "FACEGATE_ENROLL_JITTERS";
pub const ENV_VERIFY_JITTERS: &str = "FACEGATE_VERIFY_JITTERS";
pub const ENV_REDIS_HOST: &str = "FACEGATE_REDIS_HOST";
pub const ENV_REDIS_PORT: &str = "FACEGATE_REDIS_PORT";
pub const ENV_REDIS_PASSWORD: &str = "FACEGATE_REDIS_PASSWORD";
pub const ENV_REDIS_DB: &str = "FACEGATE_REDIS_DB";
pub const ENV_CACHE_TTL: &str = "FACEGATE_CACHE_TTL_SECS";
pub const ENV_HOST: &str = "FACEGATE_HOST";
pub const ENV_PORT: &str = "FACEGATE_PORT";
pub const ENV_PORT_FALLBACK: &str = "PORT";
pub const ENV_LANDMARK_MODEL: &str = "FACEGATE_LANDMARK_MODEL";
pub const ENV_ENCODER_MODEL: &str = "FACEGATE_ENCODER_MODEL";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigFile {
    pub data_dir: Option<PathBuf>,
    pub tolerance: Option<f64>,
    pub model: Option<String>,
    pub enroll_jitters: Option<u32>,
    pub verify_jitters: Option<u32>,
    pub redis_host: Option<String>,
    pub redis_port: Option<u16>,
    pub redis_password: Option<String>,
    pub redis_db: Option<i64>,
    pub cache_ttl_secs: Option<u64>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub landmark_model: Option<PathBuf>,
    pub encoder_model: Option<PathBuf>,
}

/// Connection settings for the optional encoding cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub data_dir: PathBuf,
    pub tolerance: f64,
    pub model: String,
    pub enroll_jitters: u32,
    pub verify_jitters: u32,
    pub cache: Option<CacheSettings>,
    pub cache_ttl: Duration,
    pub host: String,
    pub port: u16,
    pub landmark_model: Option<PathBuf>,
    pub encoder_model: Option<PathBuf>,
}

impl ResolvedConfig {
    pub fn from_raw(raw: ConfigFile) -> Self {
        let cache = raw.redis_host.map(|host| CacheSettings {
            host,
            port: raw.redis_port.unwrap_or(DEFAULT_REDIS_PORT),
            password: raw.redis_password,
            db: raw.redis_db.unwrap_or(DEFAULT_REDIS_DB),
        });

        Self {
            data_dir: raw
                .data_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            tolerance: raw.tolerance.unwrap_or(DEFAULT_TOLERANCE),
            model: raw.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            enroll_jitters: raw.enroll_jitters.unwrap_or(DEFAULT_ENROLL_JITTERS),
            verify_jitters: raw.verify_jitters.unwrap_or(DEFAULT_VERIFY_JITTERS),
            cache,
            cache_ttl: Duration::from_secs(
                raw.cache_ttl_secs.unwrap_or(DEFAULT_CACHE_TTL_SECS).max(1),
            ),
            host: raw.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: raw.port.unwrap_or(DEFAULT_PORT),
            landmark_model: raw.landmark_model,
            encoder_model: raw.encoder_model,
        }
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self::from_raw(ConfigFile::default())
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub contents: ConfigFile,
    pub source: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfigWithSource {
    pub resolved: ResolvedConfig,
    pub source: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid value for {var}: {message}")]
    InvalidEnv { var: String, message: String },
}

/// Loads the config file from the standard locations and applies process
/// environment overrides.
pub fn load_resolved_config() -> Result<ResolvedConfigWithSource, ConfigError> {
    let sources = [
        PathBuf::from(PRIMARY_CONFIG_PATH),
        PathBuf::from(SECONDARY_CONFIG_PATH),
    ];
    let loaded = load_from_paths(&sources)?;
    let (mut contents, source) = match loaded {
        Some(entry) => (entry.contents, Some(entry.source)),
        None => (ConfigFile::default(), None),
    };
    apply_env_overrides_from(&mut contents, |key| env::var(key).ok())?;
    Ok(ResolvedConfigWithSource {
        resolved: ResolvedConfig::from_raw(contents),
        source,
    })
}

pub fn load_from_paths(paths: &[PathBuf]) -> Result<Option<LoadedConfig>, ConfigError> {
    for path in paths {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let parsed =
                    toml::from_str::<ConfigFile>(&contents).map_err(|err| ConfigError::Parse {
                        path: path.clone(),
                        message: err.to_string(),
                    })?;
                return Ok(Some(LoadedConfig {
                    contents: parsed,
                    source: path.clone(),
                }));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.clone(),
                    source: err,
                })
            }
        }
    }

    Ok(None)
}

/// Applies environment overrides on top of file contents. The lookup is
/// injected so callers other than the process boundary (tests) can supply
/// their own variable source.
pub fn apply_env_overrides_from<F>(file: &mut ConfigFile, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(ENV_DATA_DIR) {
        file.data_dir = Some(PathBuf::from(value));
    }
    if let Some(value) = lookup(ENV_TOLERANCE) {
        file.tolerance = Some(parse_env(ENV_TOLERANCE, &value)?);
    }
    if let Some(value) = lookup(ENV_MODEL) {
        file.model = Some(value);
    }
    if let Some(value) = lookup(ENV_ENROLL_JITTERS) {
        file.enroll_jitters = Some(parse_env(ENV_ENROLL_JITTERS, &value)?);
    }
    if let Some(value) = lookup(ENV_VERIFY_JITTERS) {
        file.verify_jitters = Some(parse_env(ENV_VERIFY_JITTERS, &value)?);
    }
    if let Some(value) = lookup(ENV_REDIS_HOST) {
        file.redis_host = Some(value);
    }
    if let Some(value) = lookup(ENV_REDIS_PORT) {
        file.redis_port = Some(parse_env(ENV_REDIS_PORT, &value)?);
    }
    if let Some(value) = lookup(ENV_REDIS_PASSWORD) {
        if !value.is_empty() {
            file.redis_password = Some(value);
        }
    }
    if let Some(value) = lookup(ENV_REDIS_DB) {
        file.redis_db = Some(parse_env(ENV_REDIS_DB, &value)?);
    }
    if let Some(value) = lookup(ENV_CACHE_TTL) {
        file.cache_ttl_secs = Some(parse_env(ENV_CACHE_TTL, &value)?);
    }
    if let Some(value) = lookup(ENV_HOST) {
        file.host = Some(value);
    }
    if let Some(value) = lookup(ENV_PORT).or_else(|| lookup(ENV_PORT_FALLBACK)) {
        file.port = Some(parse_env(ENV_PORT, &value)?);
    }
    if let Some(value) = lookup(ENV_LANDMARK_MODEL) {
        file.landmark_model = Some(PathBuf::from(value));
    }
    if let Some(value) = lookup(ENV_ENCODER_MODEL) {
        file.encoder_model = Some(PathBuf::from(value));
    }

    Ok(())
}

fn parse_env<T>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|err| ConfigError::InvalidEnv {
        var: var.to_string(),
        message: format!("{err}"),
    })
}

pub fn config_source_display(source: Option<&Path>) -> String {
    match source {
        Some(path) => path.display().to_string(),
        None => "built-in defaults".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup_from<'a>(map: &'a HashMap<&'a str, &'a str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| map.get(key).map(|value| value.to_string())
    }

    #[test]
    fn defaults_apply_when_nothing_is_configured() {
        let resolved = ResolvedConfig::default();
        assert_eq!(resolved.tolerance, DEFAULT_TOLERANCE);
        assert_eq!(resolved.model, DEFAULT_MODEL);
        assert_eq!(resolved.enroll_jitters, DEFAULT_ENROLL_JITTERS);
        assert_eq!(resolved.verify_jitters, DEFAULT_VERIFY_JITTERS);
        assert_eq!(resolved.port, DEFAULT_PORT);
        assert_eq!(
            resolved.cache_ttl,
            Duration::from_secs(DEFAULT_CACHE_TTL_SECS)
        );
        assert!(resolved.cache.is_none());
    }

    #[test]
    fn primary_path_wins() {
        let dir = tempdir().unwrap();
        let primary = dir.path().join("primary.toml");
        let secondary = dir.path().join("secondary.toml");
        fs::write(&secondary, "tolerance = 0.4").unwrap();
        fs::write(&primary, "tolerance = 0.5").unwrap();

        let loaded = load_from_paths(&[primary.clone(), secondary])
            .unwrap()
            .expect("config expected");
        assert_eq!(loaded.source, primary);
        assert_eq!(loaded.contents.tolerance, Some(0.5));
    }

    #[test]
    fn secondary_used_when_primary_missing() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let secondary = dir.path().join("secondary.toml");
        fs::write(&secondary, "model = \"small\"").unwrap();

        let loaded = load_from_paths(&[missing, secondary.clone()])
            .unwrap()
            .expect("config expected");
        assert_eq!(loaded.source, secondary);
        assert_eq!(loaded.contents.model.as_deref(), Some("small"));
    }

    #[test]
    fn parse_errors_are_reported() {
        let dir = tempdir().unwrap();
        let broken = dir.path().join("broken.toml");
        fs::write(&broken, "tolerance = { nope = true }").unwrap();

        let err = load_from_paths(&[broken.clone()]).unwrap_err();
        match err {
            ConfigError::Parse { path, .. } => assert_eq!(path, broken),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn env_overrides_file_values() {
        let mut file = ConfigFile {
            tolerance: Some(0.4),
            port: Some(9000),
            ..ConfigFile::default()
        };
        let vars = HashMap::from([(ENV_TOLERANCE, "0.55"), (ENV_PORT, "8100")]);
        apply_env_overrides_from(&mut file, lookup_from(&vars)).unwrap();

        let resolved = ResolvedConfig::from_raw(file);
        assert_eq!(resolved.tolerance, 0.55);
        assert_eq!(resolved.port, 8100);
    }

    #[test]
    fn plain_port_env_is_a_fallback() {
        let mut file = ConfigFile::default();
        let vars = HashMap::from([(ENV_PORT_FALLBACK, "8080")]);
        apply_env_overrides_from(&mut file, lookup_from(&vars)).unwrap();
        assert_eq!(file.port, Some(8080));

        let mut file = ConfigFile::default();
        let vars = HashMap::from([(ENV_PORT, "8001"), (ENV_PORT_FALLBACK, "8080")]);
        apply_env_overrides_from(&mut file, lookup_from(&vars)).unwrap();
        assert_eq!(file.port, Some(8001));
    }

    #[test]
    fn redis_host_enables_the_cache_section() {
        let mut file = ConfigFile::default();
        let vars = HashMap::from([(ENV_REDIS_HOST, "cache.internal"), (ENV_REDIS_DB, "2")]);
        apply_env_overrides_from(&mut file, lookup_from(&vars)).unwrap();

        let resolved = ResolvedConfig::from_raw(file);
        let cache = resolved.cache.expect("cache settings expected");
        assert_eq!(cache.host, "cache.internal");
        assert_eq!(cache.port, DEFAULT_REDIS_PORT);
        assert_eq!(cache.db, 2);
        assert!(cache.password.is_none());
    }

    #[test]
    fn empty_redis_password_is_treated_as_unset() {
        let mut file = ConfigFile::default();
        let vars = HashMap::from([(ENV_REDIS_HOST, "localhost"), (ENV_REDIS_PASSWORD, "")]);
        apply_env_overrides_from(&mut file, lookup_from(&vars)).unwrap();
        assert!(file.redis_password.is_none());
    }

    #[test]
    fn invalid_numeric_env_is_an_error() {
        let mut file = ConfigFile::default();
        let vars = HashMap::from([(ENV_TOLERANCE, "not-a-number")]);
        let err = apply_env_overrides_from(&mut file, lookup_from(&vars)).unwrap_err();
        match err {
            ConfigError::InvalidEnv { var, .. } => assert_eq!(var, ENV_TOLERANCE),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
