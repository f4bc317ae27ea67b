//! Mirror discovery
//!
//! Scans the target registry for repositories carrying an `upstream-image`
//! resource tag and turns each into a [`MirrorDescriptor`].

use anyhow::{anyhow, bail, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::matcher::decode_patterns;
use crate::registry::{RegistryClient, Repository};

/// Resource tag naming the upstream image; its presence marks a mirror
pub const UPSTREAM_IMAGE_KEY: &str = "upstream-image";

/// Resource tag holding encoded include patterns
pub const UPSTREAM_TAGS_KEY: &str = "upstream-tags";

/// Resource tag holding encoded exclude patterns
pub const IGNORE_TAGS_KEY: &str = "ignore-tags";

/// "Copy the matching tags of `upstream_image` into `destination_repository`"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorDescriptor {
    /// Fully qualified source image, without tag
    pub upstream_image: String,

    /// Target repository URI, without tag
    pub destination_repository: String,

    /// Tags to copy; empty means all tags not excluded
    pub include_patterns: Vec<String>,

    /// Tags never to copy
    pub exclude_patterns: Vec<String>,
}

impl MirrorDescriptor {
    /// Build a descriptor from a repository's resource tags
    ///
    /// Returns `None` when the repository is not marked for mirroring.
    pub fn from_repository_tags(
        repository: &Repository,
        tags: &HashMap<String, String>,
    ) -> Option<Self> {
        let upstream_image = tags.get(UPSTREAM_IMAGE_KEY)?;

        Some(Self {
            upstream_image: upstream_image.trim().to_string(),
            destination_repository: repository.repository_uri.clone(),
            include_patterns: decode_patterns(tags.get(UPSTREAM_TAGS_KEY).map(String::as_str)),
            exclude_patterns: decode_patterns(tags.get(IGNORE_TAGS_KEY).map(String::as_str)),
        })
    }

    /// Descriptor for a single `image:tag` reference copied under the same tag
    ///
    /// The tag is used as an include pattern, so it may contain wildcards.
    pub fn for_reference(source: &str, destination_repository: &str) -> Result<Self> {
        let (image, tag) = split_reference(source)
            .ok_or_else(|| anyhow!("Expected an image:tag reference, got {:?}", source))?;

        let destination_repository = destination_repository.trim().trim_end_matches('/');
        if destination_repository.is_empty() {
            bail!("Destination repository must not be empty");
        }

        // The tag always comes from the source; a port before the last slash is fine
        let last_segment = destination_repository.rsplit('/').next().unwrap_or_default();
        if last_segment.contains(':') || destination_repository.contains('@') {
            bail!(
                "Destination must be a repository without a tag, got {:?}",
                destination_repository
            );
        }

        Ok(Self {
            upstream_image: image.to_string(),
            destination_repository: destination_repository.to_string(),
            include_patterns: vec![tag.to_string()],
            exclude_patterns: Vec::new(),
        })
    }

    pub fn source_ref(&self, tag: &str) -> String {
        format!("{}:{}", self.upstream_image, tag)
    }

    pub fn destination_ref(&self, tag: &str) -> String {
        format!("{}:{}", self.destination_repository, tag)
    }
}

/// Split `registry:port/image:tag` into image and tag
pub fn split_reference(reference: &str) -> Option<(&str, &str)> {
    if reference.contains('@') {
        return None;
    }

    let colon = reference.rfind(':')?;
    let (image, tag) = (&reference[..colon], &reference[colon + 1..]);

    // A colon before the last slash belongs to a registry port
    if image.is_empty() || tag.is_empty() || tag.contains('/') {
        return None;
    }

    Some((image, tag))
}

/// What a single repository turned out to be
#[derive(Debug)]
pub enum RepositoryOutcome {
    Mirror(MirrorDescriptor),
    NotMirrored,
    LookupFailed {
        repository: Repository,
        error: anyhow::Error,
    },
}

/// Result of scanning the registry
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub repositories_scanned: usize,
    pub mirrors: Vec<MirrorDescriptor>,
    /// Repositories whose tags could not be read, with the reason
    pub failures: Vec<(Repository, String)>,
}

/// Finds mirror targets in the registry
pub struct RegistryDiscovery {
    registry: Arc<dyn RegistryClient>,
    max_parallel: Option<usize>,
}

impl RegistryDiscovery {
    /// `max_parallel` bounds concurrent tag lookups; `None` is unbounded
    pub fn new(registry: Arc<dyn RegistryClient>, max_parallel: Option<usize>) -> Self {
        Self {
            registry,
            max_parallel,
        }
    }

    /// Classify one repository by its resource tags
    pub async fn inspect(&self, repository: Repository) -> RepositoryOutcome {
        match self.registry.repository_tags(&repository.repository_arn).await {
            Ok(tags) => match MirrorDescriptor::from_repository_tags(&repository, &tags) {
                Some(descriptor) => RepositoryOutcome::Mirror(descriptor),
                None => RepositoryOutcome::NotMirrored,
            },
            Err(error) => RepositoryOutcome::LookupFailed { repository, error },
        }
    }

    /// List all repositories and inspect them concurrently
    ///
    /// Only a failure to list repositories is an error. Per-repository lookup
    /// failures are logged and reported, and the scan carries on. Mirrors come
    /// back in completion order, not registry order.
    pub async fn discover(&self) -> Result<DiscoveryReport> {
        let repositories = self.registry.list_repositories().await?;
        let semaphore = self.max_parallel.map(|n| Arc::new(Semaphore::new(n.max(1))));

        let mut report = DiscoveryReport {
            repositories_scanned: repositories.len(),
            ..Default::default()
        };

        let mut futures = FuturesUnordered::new();
        for repository in repositories {
            let semaphore = semaphore.clone();
            futures.push(async move {
                let _permit = match &semaphore {
                    Some(semaphore) => Some(semaphore.acquire().await),
                    None => None,
                };
                self.inspect(repository).await
            });
        }

        while let Some(outcome) = futures.next().await {
            match outcome {
                RepositoryOutcome::Mirror(descriptor) => {
                    debug!(
                        repository = %descriptor.destination_repository,
                        upstream = %descriptor.upstream_image,
                        "Found mirrored repository"
                    );
                    report.mirrors.push(descriptor);
                }
                RepositoryOutcome::NotMirrored => {}
                RepositoryOutcome::LookupFailed { repository, error } => {
                    warn!(
                        repository = %repository.repository_arn,
                        "Skipping repository, failed to read its tags: {:#}",
                        error
                    );
                    report.failures.push((repository, format!("{:#}", error)));
                }
            }
        }

        info!(
            "Discovered {} mirrored repositories out of {} ({} lookups failed)",
            report.mirrors.len(),
            report.repositories_scanned,
            report.failures.len()
        );

        Ok(report)
    }
}
