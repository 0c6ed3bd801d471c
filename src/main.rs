//! cloudsync - multi-cloud vault synchronizer

use clap::{Parser, Subcommand};
use cloudsync::cache::SyncCache;
use cloudsync::config::Settings;
use cloudsync::orchestrator::SyncRunner;
use cloudsync::types::Provider;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Version string including build timestamp for --version output
fn version_long() -> &'static str {
    static V: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    V.get_or_init(|| {
        format!(
            "{} (built {})",
            env!("CARGO_PKG_VERSION"),
            env!("CLOUDSYNC_BUILD_TIME"),
        )
    })
}

/// cloudsync — synchronize a local vault against S3, Azure Blob, and GCS
#[derive(Parser, Debug)]
#[command(name = "cloudsync")]
#[command(version = version_long())]
#[command(author, about, long_about = None)]
struct Cli {
    /// Path to the TOML settings file
    #[arg(short, long, value_name = "FILE", default_value = "cloudsync.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile the vault against every enabled provider
    Sync,
    /// Authenticate against one provider (or all) without transferring
    Check {
        /// Provider to test: aws, azure, or gcp
        provider: Option<String>,
    },
    /// Delete the fingerprint cache for one provider (or all)
    ClearCache {
        /// Provider whose cache to clear: aws, azure, or gcp
        provider: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match Settings::from_file(&cli.config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };

    // Priority: RUST_LOG > --verbose > settings log_level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("cloudsync=debug")
        } else {
            EnvFilter::new(settings.log_level.clone())
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "cloudsync v{} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("CLOUDSYNC_BUILD_TIME"),
    );

    let exit = match cli.command {
        Command::Sync => run_sync(settings).await,
        Command::Check { provider } => run_check(settings, provider.as_deref()).await,
        Command::ClearCache { provider } => clear_cache(&settings, provider.as_deref()),
    };
    std::process::exit(exit);
}

async fn run_sync(settings: Settings) -> i32 {
    let runner = match SyncRunner::new(settings) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            eprintln!("Error: {e}");
            return 2;
        }
    };

    // Ctrl+C requests cooperative cancellation; scenarios in flight finish
    // and the cache stays uncommitted.
    let canceller = Arc::clone(&runner);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cancellation requested, finishing the current file");
            canceller.cancel();
        }
    });

    let reports = runner.run_sync().await;
    let mut failed = false;
    for report in &reports {
        match &report.outcome {
            Ok(progress) => {
                info!(
                    "{}: {} file(s) processed in {:.1}s",
                    report.provider,
                    progress.total_done(),
                    report.duration.as_secs_f64()
                );
            }
            Err(e) => {
                eprintln!("{}: {e}", report.provider);
                failed = true;
            }
        }
    }
    if failed {
        1
    } else {
        0
    }
}

async fn run_check(settings: Settings, provider: Option<&str>) -> i32 {
    let providers = match resolve_providers(&settings, provider) {
        Ok(p) => p,
        Err(code) => return code,
    };
    let runner = match SyncRunner::new(settings) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {e}");
            return 2;
        }
    };

    let mut failed = false;
    for p in providers {
        match runner.test_connectivity(p).await {
            Ok(()) => println!("{}: OK", p),
            Err(e) => {
                eprintln!("{}: {e}", p);
                failed = true;
            }
        }
    }
    if failed {
        1
    } else {
        0
    }
}

fn clear_cache(settings: &Settings, provider: Option<&str>) -> i32 {
    let providers = match resolve_providers(settings, provider) {
        Ok(p) => p,
        Err(code) => return code,
    };
    for p in providers {
        let mut cache = SyncCache::open(&settings.state_dir(), p);
        match cache.clear() {
            Ok(()) => println!("{}: cache cleared", p),
            Err(e) => {
                eprintln!("{}: {e}", p);
                return 1;
            }
        }
    }
    0
}

fn resolve_providers(settings: &Settings, requested: Option<&str>) -> Result<Vec<Provider>, i32> {
    match requested {
        Some(name) => match Provider::parse(name) {
            Some(p) => Ok(vec![p]),
            None => {
                eprintln!("Error: unknown provider {name:?} (expected aws, azure, or gcp)");
                Err(2)
            }
        },
        None => Ok(settings.enabled_providers()),
    }
}
