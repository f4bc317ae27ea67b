use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ecr_mirror::config::Overrides;
use ecr_mirror::discovery::DiscoveryReport;
use ecr_mirror::{
    AwsCliRegistry, Config, CopyResult, HealthCheck, MirrorDescriptor, MirrorEngine,
    RegistryClient, RegistryDiscovery, Skopeo, SyncSettings, SyncSummary,
};

#[derive(Parser)]
#[command(name = "ecr-mirror")]
#[command(about = "Mirror upstream container images into ECR using repository tags")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// The registry ID. This is usually your AWS account ID
    #[arg(long, global = true)]
    registry_id: Option<String>,

    /// Assume a specific role to push to AWS
    #[arg(long, global = true)]
    role_arn: Option<String>,

    /// AWS region of the registry
    #[arg(long, global = true)]
    region: Option<String>,

    /// OS of the images to copy [default: linux]
    #[arg(long, global = true)]
    override_os: Option<String>,

    /// Architecture of the images to copy, or "all" for every architecture [default: amd64]
    #[arg(long, global = true)]
    override_arch: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy public images to ECR using ECR repository tags
    Sync {
        /// Resolve and print the images that would be copied, without copying
        #[arg(long)]
        dry_run: bool,

        /// Exit non-zero if any image or repository failed
        #[arg(long)]
        fail_on_error: bool,
    },

    /// Copy all tags matching an image:tag glob into an ECR repository
    Copy {
        /// Source image reference, e.g. library/alpine:3.*
        source: String,

        /// Destination repository URI (no tag)
        destination_repository: String,

        /// Exit non-zero if any image failed
        #[arg(long)]
        fail_on_error: bool,
    },

    /// List all repositories that will be synced
    ListRepos,

    /// Check tools and registry access
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?.with_overrides(Overrides {
        registry_id: cli.registry_id,
        role_arn: cli.role_arn,
        region: cli.region,
        override_os: cli.override_os,
        override_arch: cli.override_arch,
    });
    config.validate()?;

    init_logging(cli.verbose, &config)?;
    info!("Starting ecr-mirror v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Sync {
            dry_run,
            fail_on_error,
        } => cmd_sync(dry_run, fail_on_error, &config).await,
        Commands::Copy {
            source,
            destination_repository,
            fail_on_error,
        } => cmd_copy(&source, &destination_repository, fail_on_error, &config).await,
        Commands::ListRepos => cmd_list_repos(&config).await,
        Commands::Doctor => cmd_doctor(&config).await,
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool, config: &Config) -> Result<()> {
    let default_level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    colored::control::set_override(config.logging.color);

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(config.logging.color))
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&std::path::Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

/// Registry client and engine for a run; role assumption happens here
async fn connect(config: &Config) -> Result<(Arc<dyn RegistryClient>, MirrorEngine)> {
    let registry: Arc<dyn RegistryClient> = Arc::new(AwsCliRegistry::connect(config).await?);
    let transfer = Arc::new(Skopeo::new(config.tools.skopeo.clone(), config.platform()));
    let engine = MirrorEngine::new(
        registry.clone(),
        transfer,
        SyncSettings::from_config(config),
    );
    Ok((registry, engine))
}

async fn discover(registry: Arc<dyn RegistryClient>, config: &Config) -> Result<DiscoveryReport> {
    let discovery = RegistryDiscovery::new(registry, config.sync.discovery_parallel);
    let report = discovery.discover().await?;

    for (repository, error) in &report.failures {
        println!(
            "{}",
            format!(
                "⚠️  Could not read tags of {}: {}",
                repository.repository_arn, error
            )
            .yellow()
        );
    }

    Ok(report)
}

/// Discover mirrored repositories and copy every resolved tag
async fn cmd_sync(dry_run: bool, fail_on_error: bool, config: &Config) -> Result<()> {
    let (registry, engine) = connect(config).await?;

    println!("🔍 Discovering mirrored repositories...");
    let report = discover(registry, config).await?;
    println!(
        "   Found {} mirrors in {} repositories",
        report.mirrors.len(),
        report.repositories_scanned
    );

    if dry_run {
        println!("\n🔍 Dry run mode - resolving tags only");
        let plan = engine.plan(&report.mirrors).await;

        for item in &plan.items {
            println!("   {} -> {}", item.source.green(), item.destination.blue());
        }
        for (descriptor, error) in &plan.unresolved {
            println!(
                "   {} {}: {}",
                "❌".red(),
                descriptor.upstream_image.red(),
                error
            );
        }
        println!("\n📈 {} images would be copied", plan.items.len());
        return Ok(());
    }

    let summary = engine.run(&report.mirrors).await?;
    print_summary(&summary);

    if fail_on_error && (summary.has_failures() || !report.failures.is_empty()) {
        bail!("Sync finished with failures");
    }
    Ok(())
}

/// Copy one image reference, bypassing discovery
async fn cmd_copy(
    source: &str,
    destination_repository: &str,
    fail_on_error: bool,
    config: &Config,
) -> Result<()> {
    let descriptor = MirrorDescriptor::for_reference(source, destination_repository)?;
    let (_, engine) = connect(config).await?;

    let summary = engine.run(std::slice::from_ref(&descriptor)).await?;
    print_summary(&summary);

    if summary.total_items == 0 && summary.unresolved.is_empty() {
        println!(
            "{}",
            format!("⚠️  No upstream tags of {} matched", descriptor.upstream_image).yellow()
        );
    }

    if fail_on_error && summary.has_failures() {
        bail!("Copy finished with failures");
    }
    Ok(())
}

/// List all repositories that will be synced
async fn cmd_list_repos(config: &Config) -> Result<()> {
    let (registry, _) = connect(config).await?;
    let report = discover(registry, config).await?;

    println!("Repositories to mirror:");
    for mirror in &report.mirrors {
        println!("- upstream: {}", mirror.upstream_image.green());
        println!("  mirror: {}", mirror.destination_repository.red());
        if !mirror.include_patterns.is_empty() {
            println!("  tags: {}", mirror.include_patterns.join(", ").yellow());
        }
        if !mirror.exclude_patterns.is_empty() {
            println!("  ignored: {}", mirror.exclude_patterns.join(", ").yellow());
        }
    }

    Ok(())
}

/// System health check and diagnostics
async fn cmd_doctor(config: &Config) -> Result<()> {
    let health = HealthCheck::run(config).await;

    println!("🔍 ecr-mirror System Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        println!("{}:", name);
        let icon = if result.passed { "✅" } else { "❌" };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
        println!();
    }

    if health.all_passed() {
        println!("{}", "✅ All checks passed".green());
        Ok(())
    } else {
        bail!("Some checks failed")
    }
}

fn print_summary(summary: &SyncSummary) {
    println!("\n🎉 Mirroring Complete!");
    println!("   📊 Total images: {}", summary.total_items);
    println!("   ✅ Copied: {}", summary.copied);
    println!("   ❌ Failed: {}", summary.failed);
    println!("   ⏱️  Timed out: {}", summary.timed_out);
    println!("   ⏱️  Duration: {:.2}s", summary.duration.as_secs_f64());

    if summary.failed + summary.timed_out > 0 {
        println!("\n🔍 Failed Copies:");
        for result in &summary.results {
            match result {
                CopyResult::Failed { item, error } => {
                    println!("   {} {}", "❌".red(), item.source.green());
                    println!("      {}", format!("Last output: {}", error).red());
                }
                CopyResult::TimedOut { item, after } => {
                    println!(
                        "   {} {} {}",
                        "⏱️ ".red(),
                        item.source.green(),
                        format!("timed out after {}s", after.as_secs()).red()
                    );
                }
                CopyResult::Copied { .. } => {}
            }
        }
    }

    if !summary.unresolved.is_empty() {
        println!("\n🔍 Unresolved Mirrors:");
        for (descriptor, error) in &summary.unresolved {
            println!(
                "   {} {}: {}",
                "❌".red(),
                descriptor.upstream_image.red(),
                error
            );
        }
    }
}
