use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use mediadex::services::{ScanMode, ScanOutcome};
use mediadex::{Catalog, CatalogConfig};

#[derive(Parser, Debug)]
#[command(name = "mediadex", version, about = "Catalog media folders and track near-duplicates")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest one directory
    Scan {
        /// Directory to scan
        #[arg(value_name = "DIR")]
        path: PathBuf,
        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,
        /// Wait for a running scan instead of skipping
        #[arg(long)]
        wait: bool,
    },

    /// Scan every enabled folder from the configuration
    ScanAll,

    /// Remove catalog entries whose files are gone
    Cleanup {
        /// Only check assets under this directory
        #[arg(long, value_name = "DIR")]
        prefix: Option<PathBuf>,
    },

    /// Delete one asset from the catalog (the file is left alone)
    Delete {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// List duplicate groups
    Duplicates,

    /// Scan and clean up periodically until interrupted
    Watch,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

fn load_config(path: Option<&Path>) -> Result<CatalogConfig> {
    match path {
        Some(path) => CatalogConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(CatalogConfig::default()),
    }
}

fn print_outcome(label: &str, outcome: &ScanOutcome) {
    match outcome {
        ScanOutcome::Completed(report) => println!(
            "▶ {}: {} added ({} replaced), {} unchanged, {} failed",
            label, report.added, report.replaced, report.unchanged, report.failed
        ),
        ScanOutcome::Skipped => println!("▶ {}: skipped, another scan is running", label),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    let catalog = Catalog::open(config).context("Failed to open catalog")?;

    match cli.command {
        Commands::Scan {
            path,
            recursive,
            wait,
        } => {
            let mode = if wait {
                ScanMode::Blocking
            } else {
                ScanMode::NonBlocking
            };
            let outcome = catalog
                .scan_path(&path, recursive, mode)
                .await
                .with_context(|| format!("Failed to scan {}", path.display()))?;
            print_outcome(&path.display().to_string(), &outcome);
        }

        Commands::ScanAll => {
            catalog
                .register_folders()
                .await
                .context("Failed to register folders")?;
            let outcomes = catalog.scan_all_folders().await?;
            if outcomes.is_empty() {
                println!("No enabled folders.");
            }
            for (path, outcome) in &outcomes {
                print_outcome(path, outcome);
            }
        }

        Commands::Cleanup { prefix } => {
            let report = catalog.cleanup_deleted_files(prefix.as_deref()).await?;
            println!(
                "Checked {} assets, removed {} ({} failed)",
                report.checked, report.removed, report.failed
            );
        }

        Commands::Delete { id } => {
            let report = catalog
                .delete_asset(&id)
                .await
                .with_context(|| format!("Failed to delete asset {}", id))?;
            println!("Deleted {} ({})", report.asset_id, report.path);
        }

        Commands::Duplicates => {
            let groups = catalog.duplicate_groups()?;
            if groups.is_empty() {
                println!("No duplicates found.");
            } else {
                println!("Found {} duplicate group(s):", groups.len());
                for (i, group) in groups.iter().enumerate() {
                    println!(
                        " Group {} (prime {}x{}):",
                        i + 1,
                        group.prime.width,
                        group.prime.height
                    );
                    for member in &group.members {
                        let marker = if member.id == group.prime.id { "*" } else { " " };
                        println!("  {} {} [{}]", marker, member.path, member.id);
                    }
                }
            }
        }

        Commands::Watch => {
            catalog
                .register_folders()
                .await
                .context("Failed to register folders")?;
            let interval = catalog.config().scan_interval();
            log::info!("Watching configured folders every {:?}", interval);

            catalog
                .run_periodic(interval, async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        log::error!("Failed to listen for ctrl-c: {}", e);
                    }
                })
                .await;
        }
    }

    Ok(())
}
