use anyhow::{bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for ecr-mirror
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// Target registry and credential settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// OS/architecture selection applied to every listing and copy
    #[serde(default)]
    pub platform: PlatformConfig,

    /// Copy stage behavior
    #[serde(default)]
    pub sync: SyncConfig,

    /// External tool locations
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Target registry configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RegistryConfig {
    /// Registry ID, usually the AWS account ID (caller's account if unset)
    pub registry_id: Option<String>,

    /// Role to assume before talking to the registry
    pub role_arn: Option<String>,

    /// AWS region (CLI default resolution if unset)
    pub region: Option<String>,

    /// Session name used when assuming `role_arn`
    #[serde(default = "default_role_session_name")]
    pub role_session_name: String,

    /// Lifetime of the assumed role session in seconds
    #[serde(default = "default_role_duration")]
    pub role_duration_secs: u64,
}

/// Platform override configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlatformConfig {
    /// OS passed to the transfer tool
    #[serde(default = "default_override_os")]
    pub override_os: String,

    /// Architecture passed to the transfer tool, or "all"
    #[serde(default = "default_override_arch")]
    pub override_arch: String,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Maximum concurrent image copies
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Timeout for a single image copy in seconds (0 disables)
    #[serde(default = "default_copy_timeout")]
    pub copy_timeout: u64,

    /// Pause after every copy attempt in seconds
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    /// Maximum concurrent repository tag lookups (unbounded if unset)
    #[serde(default)]
    pub discovery_parallel: Option<usize>,
}

/// External tool configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ToolsConfig {
    /// skopeo binary
    #[serde(default = "default_skopeo")]
    pub skopeo: String,

    /// AWS CLI binary
    #[serde(default = "default_aws")]
    pub aws: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

// Default value functions
fn default_role_session_name() -> String {
    "ecr-mirror".to_string()
}
fn default_role_duration() -> u64 {
    3600
}
fn default_override_os() -> String {
    "linux".to_string()
}
fn default_override_arch() -> String {
    "amd64".to_string()
}
fn default_max_parallel() -> usize {
    4
}
fn default_copy_timeout() -> u64 {
    1800
}
fn default_cooldown() -> u64 {
    1
}
fn default_skopeo() -> String {
    "skopeo".to_string()
}
fn default_aws() -> String {
    "aws".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

// Default implementations
impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registry_id: None,
            role_arn: None,
            region: None,
            role_session_name: default_role_session_name(),
            role_duration_secs: default_role_duration(),
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            override_os: default_override_os(),
            override_arch: default_override_arch(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            copy_timeout: default_copy_timeout(),
            cooldown_secs: default_cooldown(),
            discovery_parallel: None,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            skopeo: default_skopeo(),
            aws: default_aws(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            color: default_true(),
        }
    }
}

/// Command-line values that take precedence over the config file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub registry_id: Option<String>,
    pub role_arn: Option<String>,
    pub region: Option<String>,
    pub override_os: Option<String>,
    pub override_arch: Option<String>,
}

/// Architecture selection for listing and copying images
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchSelection {
    /// Restrict to a single architecture
    Only(String),
    /// Copy every architecture of a multi-arch image
    All,
}

/// Resolved OS/architecture override shared by the resolver and copier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: ArchSelection,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: &str) -> Self {
        let arch = if arch == "all" {
            ArchSelection::All
        } else {
            ArchSelection::Only(arch.to_string())
        };
        Self { os: os.into(), arch }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::new(default_override_os(), &default_override_arch())
    }
}

impl Config {
    /// Load configuration from the default location, falling back to defaults
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            tracing::debug!("No configuration at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;

        Ok(config)
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("ecr-mirror").join("config.yml"))
    }

    /// Expand environment variables in tool paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.tools.skopeo = shellexpand::full(&self.tools.skopeo)
            .context("Failed to expand skopeo path")?
            .into_owned();

        self.tools.aws = shellexpand::full(&self.tools.aws)
            .context("Failed to expand aws path")?
            .into_owned();

        Ok(())
    }

    /// Apply command-line overrides on top of file values
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if overrides.registry_id.is_some() {
            self.registry.registry_id = overrides.registry_id;
        }
        if overrides.role_arn.is_some() {
            self.registry.role_arn = overrides.role_arn;
        }
        if overrides.region.is_some() {
            self.registry.region = overrides.region;
        }
        if let Some(os) = overrides.override_os {
            self.platform.override_os = os;
        }
        if let Some(arch) = overrides.override_arch {
            self.platform.override_arch = arch;
        }
        self
    }

    /// Reject values that would make a run meaningless
    pub fn validate(&self) -> Result<()> {
        if self.sync.max_parallel == 0 {
            bail!("sync.max_parallel must be at least 1");
        }
        if self.sync.discovery_parallel == Some(0) {
            bail!("sync.discovery_parallel must be at least 1 when set");
        }
        if self.platform.override_os.trim().is_empty() {
            bail!("platform.override_os must not be empty");
        }
        if self.platform.override_arch.trim().is_empty() {
            bail!("platform.override_arch must not be empty");
        }
        Ok(())
    }

    pub fn platform(&self) -> Platform {
        Platform::new(
            self.platform.override_os.clone(),
            &self.platform.override_arch,
        )
    }

    /// Per-copy timeout, `None` when disabled
    pub fn copy_timeout(&self) -> Option<Duration> {
        match self.sync.copy_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.sync.cooldown_secs)
    }
}
