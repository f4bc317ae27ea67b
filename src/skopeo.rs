//! Image transfer through skopeo
//!
//! Wraps `skopeo list-tags` and `skopeo copy`. Both honour the process-wide
//! OS/architecture override.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

use crate::config::{ArchSelection, Platform};
use crate::registry::AuthToken;

/// Characters of tool output kept when reporting a failed copy
pub const DIAGNOSTIC_TAIL_CHARS: usize = 1000;

/// Lists and copies images between registries
#[async_trait]
pub trait ImageTransfer: Send + Sync {
    /// List every tag of a remote image (no tag in `image`)
    async fn list_tags(&self, image: &str) -> Result<Vec<String>>;

    /// Copy `source` to `destination`, pushing with `token`
    ///
    /// A failed copy comes back as an error carrying the tool's diagnostics.
    async fn copy(&self, source: &str, destination: &str, token: &AuthToken) -> Result<()>;
}

#[derive(Deserialize)]
struct TagListing {
    #[serde(rename = "Tags", default)]
    tags: Vec<String>,
}

/// `ImageTransfer` backed by the skopeo binary
#[derive(Debug, Clone)]
pub struct Skopeo {
    binary: String,
    platform: Platform,
}

impl Skopeo {
    pub fn new(binary: impl Into<String>, platform: Platform) -> Self {
        Self {
            binary: binary.into(),
            platform,
        }
    }

    fn os_arg(&self) -> String {
        format!("--override-os={}", self.platform.os)
    }

    /// Arguments for `list-tags`; "all" architectures drops the arch filter
    pub fn list_tags_args(&self, image: &str) -> Vec<String> {
        let mut args = vec![
            "list-tags".to_string(),
            format!("docker://{}", image),
            self.os_arg(),
        ];
        if let ArchSelection::Only(arch) = &self.platform.arch {
            args.push(format!("--override-arch={}", arch));
        }
        args
    }

    /// Arguments for `copy`, without credentials
    pub fn copy_args(&self, source: &str, destination: &str) -> Vec<String> {
        let mut args = vec![
            "copy".to_string(),
            format!("docker://{}", source),
            format!("docker://{}", destination),
            self.os_arg(),
        ];
        match &self.platform.arch {
            ArchSelection::All => args.push("--multi-arch=all".to_string()),
            ArchSelection::Only(arch) => args.push(format!("--override-arch={}", arch)),
        }
        args
    }
}

#[async_trait]
impl ImageTransfer for Skopeo {
    async fn list_tags(&self, image: &str) -> Result<Vec<String>> {
        let args = self.list_tags_args(image);
        debug!("Running {} {}", self.binary, args.join(" "));

        let output = AsyncCommand::new(&self.binary)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", self.binary))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "Listing tags of {} failed: {}",
                image,
                tail(stderr.trim(), DIAGNOSTIC_TAIL_CHARS)
            ));
        }

        let listing: TagListing = serde_json::from_slice(&output.stdout)
            .with_context(|| format!("Failed to parse tag listing for {}", image))?;

        debug!("{} has {} upstream tags", image, listing.tags.len());
        Ok(listing.tags)
    }

    async fn copy(&self, source: &str, destination: &str, token: &AuthToken) -> Result<()> {
        let args = self.copy_args(source, destination);
        debug!("Running {} {}", self.binary, args.join(" "));

        let output = AsyncCommand::new(&self.binary)
            .args(&args)
            .arg(format!("--dest-creds={}", token.as_str()))
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", self.binary))?;

        if output.status.success() {
            return Ok(());
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let diagnostics = tail(combined.trim(), DIAGNOSTIC_TAIL_CHARS);

        Err(anyhow!("{} copy {}: {}", self.binary, output.status, diagnostics))
    }
}

/// The last `max_chars` characters of `text`
pub fn tail(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    match text.char_indices().rev().nth(max_chars - 1) {
        Some((start, _)) => &text[start..],
        None => text,
    }
}
