use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::FetchError;

/// The unblocking proxy rejects requests outright above this many in flight
pub const DECODO_HARD_CONCURRENCY: usize = 3;

/// Largest batch a single run accepts
pub const MAX_BATCH_URLS: usize = 10_000;

/// Upper bound for every timeout, cooldown and deadline setting (one week)
pub const MAX_WAIT_SECS: u64 = 7 * 24 * 60 * 60;

/// Resolved settings for one orchestration run.
///
/// `Default` is the static table of process-wide defaults. Profiles on disk
/// are stored in this same shape, and per-request overrides are merged on top
/// with [`RunConfiguration::merged`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RunConfiguration {
    pub static_xhr: StaticXhrSettings,
    pub custom_js: CustomJsSettings,
    pub decodo: DecodoSettings,
    pub content: ContentThresholds,
    pub output: OutputSettings,
    /// Whole-run deadline in seconds; unset means no deadline
    #[serde(default)]
    pub run_deadline_secs: Option<u64>,
}

/// Tier 1 and 2 settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StaticXhrSettings {
    pub concurrency: usize,
    pub timeout_secs: u64,
    /// Extra headers sent with both static and xhr requests
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Tier 3 settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CustomJsSettings {
    pub service_endpoints: Vec<String>,
    pub batch_size: usize,
    pub cooldown_secs: u64,
    pub timeout_secs: u64,
    /// Consecutive failed batches before an endpoint is retired for the run
    pub max_endpoint_failures: u32,
}

/// Tier 4 settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DecodoSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub max_concurrent: usize,
    pub timeout_secs: u64,
    pub headless_mode: String,
    pub location: Option<String>,
    pub language: Option<String>,
}

/// Content sufficiency thresholds
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ContentThresholds {
    /// Minimum body length in bytes
    pub min_content_length: usize,
    /// Minimum visible text length in characters
    pub min_text_length: usize,
    pub min_meaningful_elements: usize,
    pub text_to_markup_ratio: f64,
}

/// Output persistence settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OutputSettings {
    pub save_outputs: bool,
    pub output_dir: PathBuf,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self {
            static_xhr: StaticXhrSettings {
                concurrency: 100,
                timeout_secs: 30,
                headers: BTreeMap::new(),
            },
            custom_js: CustomJsSettings {
                service_endpoints: vec![
                    "https://chromeworkers-copy-production.up.railway.app/render".to_string(),
                ],
                batch_size: 20,
                cooldown_secs: 120,
                timeout_secs: 300,
                max_endpoint_failures: 3,
            },
            decodo: DecodoSettings {
                enabled: true,
                endpoint: "https://scraper-api.decodo.com/v2/scrape".to_string(),
                username: None,
                password: None,
                max_concurrent: DECODO_HARD_CONCURRENCY,
                timeout_secs: 180,
                headless_mode: "html".to_string(),
                location: None,
                language: None,
            },
            content: ContentThresholds::default(),
            output: OutputSettings {
                save_outputs: false,
                output_dir: PathBuf::from("outputs"),
            },
            run_deadline_secs: None,
        }
    }
}

impl Default for ContentThresholds {
    fn default() -> Self {
        Self {
            min_content_length: 1000,
            min_text_length: 200,
            min_meaningful_elements: 5,
            text_to_markup_ratio: 0.001,
        }
    }
}

impl StaticXhrSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl CustomJsSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl DecodoSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// In-flight limit actually applied, never above the upstream ceiling
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrent.clamp(1, DECODO_HARD_CONCURRENCY)
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

/// Per-request overrides; every field is optional and unknown keys are rejected
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    pub static_xhr_concurrency: Option<usize>,
    pub static_xhr_timeout: Option<u64>,
    pub static_xhr_headers: Option<BTreeMap<String, String>>,
    pub custom_js_service_endpoints: Option<Vec<String>>,
    pub custom_js_batch_size: Option<usize>,
    pub custom_js_cooldown_seconds: Option<u64>,
    pub custom_js_timeout: Option<u64>,
    pub custom_js_max_endpoint_failures: Option<u32>,
    pub decodo_enabled: Option<bool>,
    pub decodo_timeout: Option<u64>,
    pub decodo_max_concurrent: Option<usize>,
    pub decodo_username: Option<String>,
    pub decodo_password: Option<String>,
    pub decodo_location: Option<String>,
    pub decodo_language: Option<String>,
    pub min_content_length: Option<usize>,
    pub min_text_length: Option<usize>,
    pub min_meaningful_elements: Option<usize>,
    pub text_to_markup_ratio: Option<f64>,
    pub save_outputs: Option<bool>,
    pub output_dir: Option<PathBuf>,
    pub run_deadline_seconds: Option<u64>,
}

impl RunConfiguration {
    /// Merge caller overrides onto these defaults and validate the result
    pub fn merged(&self, overrides: &ConfigOverrides) -> Result<Self, FetchError> {
        let mut config = self.clone();
        let o = overrides.clone();

        if let Some(v) = o.static_xhr_concurrency {
            config.static_xhr.concurrency = v;
        }
        if let Some(v) = o.static_xhr_timeout {
            config.static_xhr.timeout_secs = v;
        }
        if let Some(headers) = o.static_xhr_headers {
            config.static_xhr.headers.extend(headers);
        }
        if let Some(v) = o.custom_js_service_endpoints {
            config.custom_js.service_endpoints = v;
        }
        if let Some(v) = o.custom_js_batch_size {
            config.custom_js.batch_size = v;
        }
        if let Some(v) = o.custom_js_cooldown_seconds {
            config.custom_js.cooldown_secs = v;
        }
        if let Some(v) = o.custom_js_timeout {
            config.custom_js.timeout_secs = v;
        }
        if let Some(v) = o.custom_js_max_endpoint_failures {
            config.custom_js.max_endpoint_failures = v;
        }
        if let Some(v) = o.decodo_enabled {
            config.decodo.enabled = v;
        }
        if let Some(v) = o.decodo_timeout {
            config.decodo.timeout_secs = v;
        }
        if let Some(v) = o.decodo_max_concurrent {
            config.decodo.max_concurrent = v;
        }
        if o.decodo_username.is_some() {
            config.decodo.username = o.decodo_username;
        }
        if o.decodo_password.is_some() {
            config.decodo.password = o.decodo_password;
        }
        if o.decodo_location.is_some() {
            config.decodo.location = o.decodo_location;
        }
        if o.decodo_language.is_some() {
            config.decodo.language = o.decodo_language;
        }
        if let Some(v) = o.min_content_length {
            config.content.min_content_length = v;
        }
        if let Some(v) = o.min_text_length {
            config.content.min_text_length = v;
        }
        if let Some(v) = o.min_meaningful_elements {
            config.content.min_meaningful_elements = v;
        }
        if let Some(v) = o.text_to_markup_ratio {
            config.content.text_to_markup_ratio = v;
        }
        if let Some(v) = o.save_outputs {
            config.output.save_outputs = v;
        }
        if let Some(v) = o.output_dir {
            config.output.output_dir = v;
        }
        if o.run_deadline_seconds.is_some() {
            config.run_deadline_secs = o.run_deadline_seconds;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings no run could honour
    pub fn validate(&self) -> Result<(), FetchError> {
        if self.static_xhr.concurrency == 0 {
            return Err(FetchError::config("static_xhr_concurrency must be at least 1"));
        }
        if self.static_xhr.timeout_secs == 0 {
            return Err(FetchError::config("static_xhr_timeout must be positive"));
        }
        if self.custom_js.batch_size == 0 {
            return Err(FetchError::config("custom_js_batch_size must be at least 1"));
        }
        if self.custom_js.timeout_secs == 0 {
            return Err(FetchError::config("custom_js_timeout must be positive"));
        }
        if self.custom_js.max_endpoint_failures == 0 {
            return Err(FetchError::config(
                "custom_js_max_endpoint_failures must be at least 1",
            ));
        }
        if self.custom_js.service_endpoints.is_empty() {
            return Err(FetchError::config(
                "custom_js_service_endpoints is empty but the rendering tier is reachable",
            ));
        }
        if let Some(blank) = self
            .custom_js
            .service_endpoints
            .iter()
            .find(|e| e.trim().is_empty())
        {
            return Err(FetchError::config(format!(
                "invalid custom_js service endpoint '{blank}'"
            )));
        }
        if self.decodo.enabled {
            if self.decodo.timeout_secs == 0 {
                return Err(FetchError::config("decodo_timeout must be positive"));
            }
            if self.decodo.max_concurrent == 0 {
                return Err(FetchError::config("decodo_max_concurrent must be at least 1"));
            }
            if self.decodo.credentials().is_none() {
                return Err(FetchError::config(
                    "decodo is enabled but no credentials were provided",
                ));
            }
        }
        let ratio = self.content.text_to_markup_ratio;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(FetchError::config(format!(
                "text_to_markup_ratio must be within [0, 1], got {ratio}"
            )));
        }
        if self.run_deadline_secs == Some(0) {
            return Err(FetchError::config("run_deadline_seconds must be positive"));
        }

        let waits = [
            ("static_xhr_timeout", Some(self.static_xhr.timeout_secs)),
            ("custom_js_timeout", Some(self.custom_js.timeout_secs)),
            ("custom_js_cooldown_seconds", Some(self.custom_js.cooldown_secs)),
            ("decodo_timeout", Some(self.decodo.timeout_secs)),
            ("run_deadline_seconds", self.run_deadline_secs),
        ];
        for (name, secs) in waits {
            if let Some(secs) = secs.filter(|s| *s > MAX_WAIT_SECS) {
                return Err(FetchError::config(format!(
                    "{name} must be at most {MAX_WAIT_SECS} seconds, got {secs}"
                )));
            }
        }
        Ok(())
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        self.run_deadline_secs.map(Duration::from_secs)
    }

    /// Fill in proxy credentials from `DECODO_USERNAME` / `DECODO_PASSWORD`.
    ///
    /// Called by the command layer while building process defaults; if the
    /// proxy tier is enabled but no credentials can be found it is switched off.
    pub fn with_env_credentials(mut self) -> Self {
        if self.decodo.username.is_none() {
            self.decodo.username = std::env::var("DECODO_USERNAME").ok();
        }
        if self.decodo.password.is_none() {
            self.decodo.password = std::env::var("DECODO_PASSWORD").ok();
        }
        if self.decodo.enabled && self.decodo.credentials().is_none() {
            warn!("DECODO_USERNAME/DECODO_PASSWORD not set, proxy fallback disabled");
            self.decodo.enabled = false;
        }
        self
    }

    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        let mut path = if let Some(proj_dirs) =
            directories::ProjectDirs::from("com", "smart-fetcher", "smart-fetcher")
        {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        };

        path.push("sites");
        if !path.exists() {
            if let Err(e) = fs::create_dir_all(&path) {
                error!("Failed to create config directory: {}", e);
            }
        }

        path.pop();
        path
    }

    /// Load the default configuration
    pub fn load_default() -> Result<Self> {
        let config_path = Self::config_dir().join("default.yaml");

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            info!("Default configuration not found. Creating...");
            let config = Self::default();
            config.save_as_default()?;
            Ok(config)
        }
    }

    /// Load a configuration profile
    pub fn load_profile(profile: &str) -> Result<Self> {
        let profile_path = Self::config_dir()
            .join("sites")
            .join(format!("{}.yaml", profile));

        if profile_path.exists() {
            Self::load_from_file(&profile_path)
        } else {
            anyhow::bail!("Profile '{}' not found", profile)
        }
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))?;

        Ok(config)
    }

    /// Save the configuration as the default
    pub fn save_as_default(&self) -> Result<()> {
        let config_path = Self::config_dir().join("default.yaml");
        self.save_to_file(&config_path)
    }

    /// Save the configuration as a profile
    pub fn save_as_profile(&self, profile: &str) -> Result<()> {
        let sites_dir = Self::config_dir().join("sites");
        let profile_path = sites_dir.join(format!("{}.yaml", profile));
        self.save_to_file(&profile_path)
    }

    /// Save the configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// List all available profiles
    pub fn list_profiles() -> Result<Vec<String>> {
        let sites_dir = Self::config_dir().join("sites");

        if !sites_dir.exists() {
            return Ok(vec![]);
        }

        let mut profiles = Vec::new();
        for entry in fs::read_dir(sites_dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().map_or(false, |ext| ext == "yaml") {
                if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                    profiles.push(name.to_string());
                }
            }
        }
        profiles.sort();

        Ok(profiles)
    }
}
