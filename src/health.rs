//! Preflight checks for ecr-mirror
//!
//! Verifies the external tools are installed and the registry accepts our
//! credentials before a sync is attempted.

use crate::registry::{AwsCliRegistry, RegistryClient};
use crate::Config;

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// skopeo installation status
    pub skopeo: CheckResult,
    /// AWS CLI installation status
    pub aws: CheckResult,
    /// Registry authorization status
    pub registry_auth: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
}

impl CheckResult {
    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: None,
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
        }
    }
}

impl HealthCheck {
    /// Run all health checks
    pub async fn run(config: &Config) -> Self {
        let aws = check_tool("AWS CLI", &config.tools.aws);
        let registry_auth = if aws.passed {
            Self::check_registry_auth(config).await
        } else {
            CheckResult::error("Registry authorization not checked (AWS CLI unavailable)")
        };

        Self {
            skopeo: check_tool("skopeo", &config.tools.skopeo),
            aws,
            registry_auth,
        }
    }

    /// Check if all checks passed
    pub fn all_passed(&self) -> bool {
        self.skopeo.passed && self.aws.passed && self.registry_auth.passed
    }

    async fn check_registry_auth(config: &Config) -> CheckResult {
        let token = match AwsCliRegistry::connect(config).await {
            Ok(registry) => registry.authorization_token().await,
            Err(e) => Err(e),
        };

        match token {
            Ok(token) => CheckResult::ok_with_details(
                "Registry authorization successful",
                format!("Username: {}", token.username()),
            ),
            Err(e) => CheckResult::error_with_details(
                "Registry authorization failed",
                format!("{:#}", e),
            ),
        }
    }

    /// Get all checks for iteration
    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 3] {
        [
            ("skopeo", &self.skopeo),
            ("AWS CLI", &self.aws),
            ("Registry", &self.registry_auth),
        ]
    }
}

/// Check a tool answers `--version`
fn check_tool(name: &str, binary: &str) -> CheckResult {
    match std::process::Command::new(binary).arg("--version").output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout);
            CheckResult::ok_with_details(format!("{} installed", name), version.trim().to_string())
        }
        Ok(_) => CheckResult::error(format!("{} --version failed", binary)),
        Err(_) => CheckResult::error_with_details(
            format!("{} not found", name),
            format!("No executable {:?} in PATH", binary),
        ),
    }
}
