//! Common test utilities and fakes for ecr-mirror integration tests

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ecr_mirror::registry::Repository;
use ecr_mirror::{AuthToken, ImageTransfer, MirrorDescriptor, RegistryClient};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// In-memory registry with a fixed repository set
#[derive(Default)]
pub struct FakeRegistry {
    pub repositories: Vec<(Repository, HashMap<String, String>)>,
    pub deny_auth: bool,
    pub auth_calls: AtomicUsize,
}

impl FakeRegistry {
    pub fn with_repository(mut self, name: &str, tags: &[(&str, &str)]) -> Self {
        let repository = Repository {
            repository_name: name.to_string(),
            repository_arn: format!("arn:aws:ecr:us-east-1:123456789012:repository/{}", name),
            repository_uri: format!("123456789012.dkr.ecr.us-east-1.amazonaws.com/{}", name),
        };
        let tags = tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.repositories.push((repository, tags));
        self
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        Ok(self.repositories.iter().map(|(r, _)| r.clone()).collect())
    }

    async fn repository_tags(&self, repository_arn: &str) -> Result<HashMap<String, String>> {
        self.repositories
            .iter()
            .find(|(r, _)| r.repository_arn == repository_arn)
            .map(|(_, tags)| tags.clone())
            .ok_or_else(|| anyhow!("RepositoryNotFoundException"))
    }

    async fn authorization_token(&self) -> Result<AuthToken> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        if self.deny_auth {
            Err(anyhow!("AccessDeniedException"))
        } else {
            AuthToken::from_credential("AWS:test-password")
        }
    }
}

/// Transfer tool fake that records copies and tracks concurrency
#[derive(Default)]
pub struct FakeTransfer {
    /// Upstream tags per image
    pub tags: HashMap<String, Vec<String>>,
    /// Sources whose copy fails
    pub failing: HashSet<String>,
    pub delay: Duration,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub copied: Mutex<Vec<(String, String)>>,
}

impl FakeTransfer {
    pub fn with_image(mut self, image: &str, tags: &[&str]) -> Self {
        self.tags.insert(
            image.to_string(),
            tags.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    pub fn failing_on(mut self, source: &str) -> Self {
        self.failing.insert(source.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn copied_destinations(&self) -> Vec<String> {
        let mut destinations: Vec<_> = self
            .copied
            .lock()
            .unwrap()
            .iter()
            .map(|(_, d)| d.clone())
            .collect();
        destinations.sort();
        destinations
    }
}

#[async_trait]
impl ImageTransfer for FakeTransfer {
    async fn list_tags(&self, image: &str) -> Result<Vec<String>> {
        self.tags
            .get(image)
            .cloned()
            .ok_or_else(|| anyhow!("unable to reach {}", image))
    }

    async fn copy(&self, source: &str, destination: &str, token: &AuthToken) -> Result<()> {
        assert_eq!(token.as_str(), "AWS:test-password");

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(source) {
            return Err(anyhow!("exit status: 1: manifest unknown"));
        }
        self.copied
            .lock()
            .unwrap()
            .push((source.to_string(), destination.to_string()));
        Ok(())
    }
}

pub fn descriptor(upstream: &str, destination: &str, include: &[&str], exclude: &[&str]) -> MirrorDescriptor {
    MirrorDescriptor {
        upstream_image: upstream.to_string(),
        destination_repository: destination.to_string(),
        include_patterns: include.iter().map(|s| s.to_string()).collect(),
        exclude_patterns: exclude.iter().map(|s| s.to_string()).collect(),
    }
}

/// Write an executable `/bin/sh` script into `dir` and return its path
#[cfg(unix)]
pub fn write_script(dir: &tempfile::TempDir, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.path().join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("Failed to write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("Failed to make script executable");
    path.to_string_lossy().into_owned()
}
