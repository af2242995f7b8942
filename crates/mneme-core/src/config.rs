//! Configuration types for Mneme components.
//!
//! Values come from three layers, lowest priority first: built-in defaults,
//! the optional `mneme.toml` profile, then CLI flags and environment
//! variables (handled by the binary).

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;
use crate::ledger::RetryPolicy;
use crate::pagination::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

// =============================================================================
// Remote API
// =============================================================================

/// Default REST endpoint root.
pub const DEFAULT_API_URL: &str = "https://api.twitter.com/1.1/";

/// Connection settings for the remote timeline service.
#[derive(Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub bearer_token: String,
}

impl ApiConfig {
    pub fn new(bearer_token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            bearer_token: bearer_token.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

// Keeps the token out of logs.
impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("bearer_token", &"<redacted>")
            .finish()
    }
}

/// HTTP client configuration for external API calls.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

// =============================================================================
// Harvest
// =============================================================================

/// Harvest run configuration.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Items requested per timeline page.
    pub page_size: u32,
    /// Identities harvested at the same time.
    pub concurrency: usize,
    pub retry_policy: RetryPolicy,
    /// Run the batch validator before computing the work set.
    pub validate_first: bool,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: 1,
            retry_policy: RetryPolicy::default(),
            validate_first: false,
        }
    }
}

impl HarvestConfig {
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_validation(mut self) -> Self {
        self.validate_first = true;
        self
    }

    /// Checks the bounds the remote service imposes.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(AppError::ConfigError(format!(
                "page_size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, self.page_size
            )));
        }
        if self.concurrency == 0 {
            return Err(AppError::ConfigError(
                "concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Profile (mneme.toml)
// =============================================================================

/// Optional defaults read from `mneme.toml`.
///
/// ```toml
/// [api]
/// base_url = "https://api.example.com/1.1/"
///
/// [harvest]
/// page_size = 100
/// concurrency = 4
/// retry_failed = false
/// validate = true
/// output = "items.jsonl"
/// ledger = "ledger.db"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub api: ApiProfile,
    #[serde(default)]
    pub harvest: HarvestProfile,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiProfile {
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HarvestProfile {
    pub page_size: Option<u32>,
    pub concurrency: Option<usize>,
    pub retry_failed: Option<bool>,
    pub validate: Option<bool>,
    pub output: Option<PathBuf>,
    pub ledger: Option<PathBuf>,
}

impl HarvestProfile {
    /// Overlays the profile's values onto `config`.
    pub fn apply(&self, mut config: HarvestConfig) -> HarvestConfig {
        if let Some(page_size) = self.page_size {
            config = config.with_page_size(page_size);
        }
        if let Some(concurrency) = self.concurrency {
            config = config.with_concurrency(concurrency);
        }
        if self.retry_failed == Some(true) {
            config = config.with_retry_policy(RetryPolicy::RetryFailed);
        }
        if self.validate == Some(true) {
            config = config.with_validation();
        }
        config
    }
}

/// Default profile file name.
pub const PROFILE_FILE_NAME: &str = "mneme.toml";

/// Returns the default configuration directory path: `~/.config/mneme/`.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("mneme"))
}

/// Returns the default profile path: `~/.config/mneme/mneme.toml`.
pub fn default_profile_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join(PROFILE_FILE_NAME))
}

/// Loads the TOML profile.
///
/// # Returns
/// * `Ok(Some(profile))` - Profile loaded
/// * `Ok(None)` - No explicit path given and no file at the default path
/// * `Err(e)` - Explicit path missing, unreadable file, or invalid TOML
pub fn load_profile(path: Option<PathBuf>) -> Result<Option<Profile>, AppError> {
    let profile_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(AppError::ConfigError(format!(
                    "Profile not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => match default_profile_path() {
            Some(p) if p.exists() => p,
            _ => return Ok(None),
        },
    };

    read_profile(&profile_path).map(Some)
}

fn read_profile(path: &Path) -> Result<Profile, AppError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AppError::ConfigError(format!(
            "Failed to read profile '{}': {}",
            path.display(),
            e
        ))
    })?;

    let profile: Profile = toml::from_str(&content).map_err(|e| {
        AppError::ConfigError(format!("Invalid TOML in '{}': {}", path.display(), e))
    })?;

    tracing::debug!(path = %path.display(), "Loaded profile");
    Ok(profile)
}
