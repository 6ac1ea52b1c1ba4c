use crate::error::ImportError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV_VAR: &str = "GENOME_IMPORT_CONFIG";
pub const DEFAULT_TAXONOMY_SOURCE: &str = "assets/reference_taxa.json";
/// 1 GiB
pub const DEFAULT_MAX_GENOME_SIZE: u64 = 1 << 30;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Settings for the import helpers, usually read from a JSON file.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ImportConfig {
    /// Path or URL of the reference taxonomy snapshot.
    pub taxonomy_source: String,
    /// When set, taxa are looked up per request against this service
    /// instead of a local snapshot.
    pub taxonomy_service_url: Option<String>,
    pub max_genome_size: u64,
    pub http_timeout_secs: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            taxonomy_source: DEFAULT_TAXONOMY_SOURCE.to_string(),
            taxonomy_service_url: None,
            max_genome_size: DEFAULT_MAX_GENOME_SIZE,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

impl ImportConfig {
    /// Loads a config file. Relative `taxonomy_source` paths are resolved
    /// against the directory holding the file.
    pub fn from_json_file(path: &str) -> Result<Self, ImportError> {
        let text = fs::read_to_string(path)
            .map_err(|e| ImportError::Config(format!("Could not read config '{path}': {e}")))?;
        let mut config: ImportConfig = serde_json::from_str(&text)
            .map_err(|e| ImportError::Config(format!("Could not parse config '{path}': {e}")))?;
        let base = Path::new(path)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.taxonomy_source = resolve_relative(&base, &config.taxonomy_source);
        let problems = config.validate();
        if !problems.is_empty() {
            return Err(ImportError::Config(format!(
                "Invalid config '{path}': {}",
                problems.join("; ")
            )));
        }
        Ok(config)
    }

    /// Reads the file named by `GENOME_IMPORT_CONFIG`, or returns the
    /// defaults when the variable is unset.
    pub fn from_env() -> Result<Self, ImportError> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::from_json_file(path.trim()),
            _ => Ok(Self::default()),
        }
    }

    /// Returns the list of problems; empty when the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.http_timeout_secs == 0 {
            errors.push("http_timeout_secs must be at least 1".to_string());
        }
        if self.taxonomy_source.trim().is_empty() && self.taxonomy_service_url.is_none() {
            errors.push("either taxonomy_source or taxonomy_service_url must be set".to_string());
        }
        if let Some(url) = &self.taxonomy_service_url {
            if !is_http_url(url) {
                errors.push(format!("taxonomy_service_url '{url}' is not an http(s) URL"));
            }
        }
        errors
    }

    pub fn http_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.http_timeout_secs)
    }
}

pub(crate) fn is_http_url(raw: &str) -> bool {
    raw.starts_with("http://") || raw.starts_with("https://")
}

fn resolve_relative(base: &Path, raw: &str) -> String {
    if raw.is_empty() || is_http_url(raw) || raw.starts_with("file://") {
        return raw.to_string();
    }
    let p = Path::new(raw);
    if p.is_absolute() {
        raw.to_string()
    } else {
        base.join(p).display().to_string()
    }
}
