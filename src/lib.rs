//! ecr-mirror - Mirror public container images into ECR
//!
//! Repositories in the target registry opt in to mirroring through resource
//! tags. ecr-mirror finds them, works out which upstream tags to copy and
//! copies them with skopeo, a few at a time.
//!
//! ## Modules
//!
//! - [`matcher`]: include/exclude tag pattern matching
//! - [`registry`]: ECR access and push credentials
//! - [`discovery`]: finding repositories marked for mirroring
//! - [`resolver`]: resolving upstream tags for a mirror
//! - [`skopeo`]: listing and copying images
//! - [`sync`]: bounded-concurrency copy orchestration
//! - [`config`]: configuration management and parsing

pub mod config;
pub mod discovery;
pub mod health;
pub mod matcher;
pub mod registry;
pub mod resolver;
pub mod skopeo;
pub mod sync;

#[cfg(all(test, unix))]
mod test_support;

pub use config::{Config, Platform};
pub use discovery::{MirrorDescriptor, RegistryDiscovery};
pub use health::HealthCheck;
pub use registry::{AuthToken, AwsCliRegistry, RegistryClient};
pub use resolver::TagResolver;
pub use skopeo::{ImageTransfer, Skopeo};
pub use sync::{CopyResult, MirrorEngine, SyncSettings, SyncSummary, WorkItem};
