//! Upstream tag resolution

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;

use crate::discovery::MirrorDescriptor;
use crate::matcher::select;
use crate::skopeo::ImageTransfer;

/// Works out which upstream tags a mirror should copy
#[derive(Clone)]
pub struct TagResolver {
    transfer: Arc<dyn ImageTransfer>,
}

impl TagResolver {
    pub fn new(transfer: Arc<dyn ImageTransfer>) -> Self {
        Self { transfer }
    }

    /// List the upstream tags and keep those the descriptor's patterns select
    pub async fn resolve(&self, descriptor: &MirrorDescriptor) -> Result<Vec<String>> {
        let all_tags = self
            .transfer
            .list_tags(&descriptor.upstream_image)
            .await
            .with_context(|| format!("Failed to list tags for {}", descriptor.upstream_image))?;

        let selected = select(
            &all_tags,
            &descriptor.include_patterns,
            &descriptor.exclude_patterns,
        );

        debug!(
            upstream = %descriptor.upstream_image,
            "{} of {} upstream tags selected",
            selected.len(),
            all_tags.len()
        );

        Ok(selected.into_iter().collect())
    }
}
