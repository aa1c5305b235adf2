//! Declarative configuration for the proxy.
//!
//! The document is YAML: a `proxy` block, a reserved `cache` block, an
//! ordered `matches` list, and an optional `pluginDir` (parsed but
//! never consumed: no dynamic plugin loader is implemented).

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::datasources::Registry;
use crate::errors::AppError;
use crate::rules::{Match, RawMatch};

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyOptions {
    #[serde(default)]
    pub mode: String,
    pub port: u16,
    #[serde(default, rename = "exposeErrorsToClient")]
    pub expose_errors_to_client: bool,
    #[serde(default, rename = "preserveHeaders")]
    pub preserve_headers: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheOptions {
    #[serde(default, rename = "redisUrl")]
    pub redis_url: String,
}

/// The raw document as it comes off the wire, before canonicalization.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    pub proxy: ProxyOptions,
    #[serde(default)]
    pub cache: CacheOptions,
    #[serde(default)]
    pub matches: Vec<RawMatch>,
    #[serde(default, rename = "pluginDir")]
    pub plugin_dir: Option<String>,
}

/// Canonicalized proxy settings: mode, host names, and header names are
/// all lowercased for case-insensitive matching.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub mode: String,
    pub port: u16,
    pub expose_errors_to_client: bool,
    pub preserve_headers: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    pub redis_url: Option<String>,
}

/// Fully validated configuration: regexes compiled, data sources
/// constructed, dependency graphs checked. Ready to hand to the proxy.
#[derive(Clone)]
pub struct Config {
    pub proxy: ProxyConfig,
    pub cache: CacheConfig,
    pub matches: Vec<Match>,
    pub plugin_dir: PathBuf,
}

impl Config {
    /// Reads and parses the config file at `path`, building every data
    /// source via `registry`. Fails fast: a bad regex, an unknown data
    /// source type, or a dependency problem aborts before the process
    /// tries to bind a listener.
    pub fn load(path: &Path, registry: &Registry) -> Result<Self, AppError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents, registry)
    }

    pub fn parse(yaml: &str, registry: &Registry) -> Result<Self, AppError> {
        let raw: RawConfig = serde_yaml::from_str(yaml)?;

        let proxy = ProxyConfig {
            mode: raw.proxy.mode.to_lowercase(),
            port: raw.proxy.port,
            expose_errors_to_client: raw.proxy.expose_errors_to_client,
            preserve_headers: lower_all(raw.proxy.preserve_headers),
        };

        let cache = CacheConfig {
            redis_url: non_empty(raw.cache.redis_url),
        };

        let mut matches = Vec::with_capacity(raw.matches.len());
        for (index, raw_match) in raw.matches.into_iter().enumerate() {
            matches.push(Match::from_raw(index, raw_match, registry)?);
        }

        let plugin_dir = raw
            .plugin_dir
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/etc/kreme/plugins/datasources"));

        Ok(Config {
            proxy,
            cache,
            matches,
            plugin_dir,
        })
    }
}

fn lower_all(values: Vec<String>) -> Vec<String> {
    values.into_iter().map(|v| v.to_lowercase()).collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
