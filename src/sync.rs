//! Sync Engine - Orchestrates parallel image mirroring
//!
//! Resolves each mirror descriptor into concrete work items and copies them
//! through a bounded pool. A failing item never stops its siblings.

use anyhow::{Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::discovery::MirrorDescriptor;
use crate::registry::{AuthToken, RegistryClient};
use crate::resolver::TagResolver;
use crate::skopeo::ImageTransfer;

/// One `image:tag` copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub source: String,
    pub destination: String,
}

impl WorkItem {
    /// One item per tag, copied under the same tag
    pub fn expand(descriptor: &MirrorDescriptor, tags: &[String]) -> Vec<WorkItem> {
        tags.iter()
            .map(|tag| WorkItem {
                source: descriptor.source_ref(tag),
                destination: descriptor.destination_ref(tag),
            })
            .collect()
    }
}

/// Terminal state of a work item
#[derive(Debug, Clone)]
pub enum CopyResult {
    Copied { item: WorkItem, duration: Duration },
    Failed { item: WorkItem, error: String },
    TimedOut { item: WorkItem, after: Duration },
}

impl CopyResult {
    pub fn item(&self) -> &WorkItem {
        match self {
            CopyResult::Copied { item, .. }
            | CopyResult::Failed { item, .. }
            | CopyResult::TimedOut { item, .. } => item,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CopyResult::Copied { .. })
    }
}

/// Work items for a run, plus descriptors whose tags could not be resolved
#[derive(Debug, Default)]
pub struct SyncPlan {
    pub items: Vec<WorkItem>,
    pub unresolved: Vec<(MirrorDescriptor, String)>,
}

/// Results from a complete sync operation
#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub total_items: usize,
    pub copied: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Descriptors skipped because their upstream could not be listed
    pub unresolved: Vec<(MirrorDescriptor, String)>,
    pub duration: Duration,
    pub results: Vec<CopyResult>,
}

impl SyncSummary {
    fn compile(
        results: Vec<CopyResult>,
        unresolved: Vec<(MirrorDescriptor, String)>,
        duration: Duration,
    ) -> Self {
        let mut copied = 0;
        let mut failed = 0;
        let mut timed_out = 0;

        for result in &results {
            match result {
                CopyResult::Copied { .. } => copied += 1,
                CopyResult::Failed { .. } => failed += 1,
                CopyResult::TimedOut { .. } => timed_out += 1,
            }
        }

        Self {
            total_items: results.len(),
            copied,
            failed,
            timed_out,
            unresolved,
            duration,
            results,
        }
    }

    /// Whether any item or descriptor failed
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.timed_out > 0 || !self.unresolved.is_empty()
    }
}

/// Copy stage tuning
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Pool width: concurrent copies never exceed this
    pub max_parallel: usize,
    pub copy_timeout: Option<Duration>,
    /// Pause after every copy attempt, holding the pool slot
    pub cooldown: Duration,
}

impl SyncSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_parallel: config.sync.max_parallel.max(1),
            copy_timeout: config.copy_timeout(),
            cooldown: config.cooldown(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// The engine that resolves and copies mirrors
#[derive(Clone)]
pub struct MirrorEngine {
    registry: Arc<dyn RegistryClient>,
    transfer: Arc<dyn ImageTransfer>,
    resolver: TagResolver,
    settings: SyncSettings,
}

impl MirrorEngine {
    pub fn new(
        registry: Arc<dyn RegistryClient>,
        transfer: Arc<dyn ImageTransfer>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            registry,
            resolver: TagResolver::new(transfer.clone()),
            transfer,
            settings,
        }
    }

    /// Authenticate once, resolve every descriptor, then copy everything
    ///
    /// Only authentication failure is an error; everything after that is
    /// contained per descriptor or per item.
    pub async fn run(&self, descriptors: &[MirrorDescriptor]) -> Result<SyncSummary> {
        let start_time = Instant::now();

        let token = self
            .registry
            .authorization_token()
            .await
            .context("Failed to authenticate with the destination registry")?;
        debug!("Authenticated as {}", token.username());

        info!("Finding all tags to copy...");
        let plan = self.plan(descriptors).await;

        info!("Beginning the copy of {} images", plan.items.len());
        let results = self.copy_all(plan.items, &token).await;

        let summary = SyncSummary::compile(results, plan.unresolved, start_time.elapsed());

        info!(
            "Sync completed in {:.2}s: {} copied, {} failed, {} timed out, {} mirrors unresolved",
            summary.duration.as_secs_f64(),
            summary.copied,
            summary.failed,
            summary.timed_out,
            summary.unresolved.len()
        );

        Ok(summary)
    }

    /// Resolve upstream tags for every descriptor and expand into work items
    pub async fn plan(&self, descriptors: &[MirrorDescriptor]) -> SyncPlan {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_parallel.max(1)));
        let mut futures = FuturesUnordered::new();

        for descriptor in descriptors {
            let semaphore = semaphore.clone();
            futures.push(async move {
                let _permit = semaphore.acquire().await;
                (descriptor, self.resolver.resolve(descriptor).await)
            });
        }

        let mut plan = SyncPlan::default();
        while let Some((descriptor, resolved)) = futures.next().await {
            match resolved {
                Ok(tags) => plan.items.extend(WorkItem::expand(descriptor, &tags)),
                Err(e) => {
                    warn!(
                        upstream = %descriptor.upstream_image,
                        repository = %descriptor.destination_repository,
                        "Skipping mirror: {:#}",
                        e
                    );
                    plan.unresolved.push((descriptor.clone(), format!("{:#}", e)));
                }
            }
        }

        plan
    }

    /// Copy all items, at most `max_parallel` at a time, and wait for every one
    pub async fn copy_all(&self, items: Vec<WorkItem>, token: &AuthToken) -> Vec<CopyResult> {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_parallel.max(1)));
        let mut futures = FuturesUnordered::new();

        for item in items {
            let semaphore = semaphore.clone();
            futures.push(async move {
                let _permit = semaphore.acquire().await;
                let result = self.copy_one(item, token).await;

                if !self.settings.cooldown.is_zero() {
                    tokio::time::sleep(self.settings.cooldown).await;
                }
                result
            });
        }

        let mut results = Vec::new();
        while let Some(result) = futures.next().await {
            results.push(result);
        }
        results
    }

    async fn copy_one(&self, item: WorkItem, token: &AuthToken) -> CopyResult {
        info!(source = %item.source, destination = %item.destination, "Copying image");
        let started = Instant::now();

        let copy = self.transfer.copy(&item.source, &item.destination, token);
        let outcome = match self.settings.copy_timeout {
            Some(limit) => timeout(limit, copy).await.map_err(|_| limit),
            None => Ok(copy.await),
        };

        match outcome {
            Ok(Ok(())) => {
                debug!(source = %item.source, "Copy finished");
                CopyResult::Copied {
                    item,
                    duration: started.elapsed(),
                }
            }
            Ok(Err(e)) => {
                error!(
                    source = %item.source,
                    destination = %item.destination,
                    "Copy failed: {:#}",
                    e
                );
                CopyResult::Failed {
                    item,
                    error: format!("{:#}", e),
                }
            }
            Err(limit) => {
                warn!(
                    source = %item.source,
                    destination = %item.destination,
                    "Copy timed out after {}s",
                    limit.as_secs()
                );
                CopyResult::TimedOut { item, after: limit }
            }
        }
    }
}
