use std::path::PathBuf;

use anyhow::Result;
use backup_core::CompressionFormat;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

mod config;
mod daemon;
mod host;
mod lock;
mod triggers;

use config::DEFAULT_CONFIG_PATH;

#[derive(Parser)]
#[command(
    name = "atlas-backupd",
    version,
    about = "Consistent world backups for a running Minecraft server"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the interval and player join/quit triggers until interrupted.
    Run,
    /// Take one backup now.
    Now {
        #[arg(long, value_name = "FORMAT", value_parser = ["zstd", "gzip", "zip"], ignore_case = true)]
        format: Option<String>,

        #[arg(long, value_name = "LABEL", default_value = "console")]
        label: String,
    },
    /// Apply the retention policy without taking a backup.
    Prune,
    /// List backups in the backups directory.
    List,
    /// Print shell completions.
    Completions { shell: Shell },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "atlas-backupd", &mut std::io::stdout());
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Run => daemon::serve(config).await,
        Commands::Now { format, label } => {
            let format = format
                .map(|name| name.parse::<CompressionFormat>())
                .transpose()?;
            let Some(opened) = daemon::open_service(&config).await? else {
                anyhow::bail!("another backupd is running; use its triggers instead");
            };
            let format = format.unwrap_or(opened.service.settings().default_format);
            let outcome = opened.service.run_backup(&label, format).await?;
            println!("Backup created: {}", outcome.file_name);
            Ok(())
        }
        Commands::Prune => {
            let Some(opened) = daemon::open_service(&config).await? else {
                anyhow::bail!("another backupd is running");
            };
            let report = opened.service.prune().await?;
            if report.deleted.is_empty() {
                println!("Nothing to delete");
            } else {
                println!("Deleted: {}", report.deleted.join(", "));
            }
            for err in &report.failed {
                eprintln!("{err}");
            }
            Ok(())
        }
        Commands::List => {
            let settings = config.resolve()?;
            let artifacts = backup_core::retention::list_artifacts(&settings.backups_dir)?;
            let total: u64 = artifacts.iter().map(|a| a.size).sum();
            for artifact in &artifacts {
                println!("{:>10}  {}", format_size(artifact.size), artifact.name);
            }
            println!(
                "{} backup(s), {} in {}",
                artifacts.len(),
                format_size(total),
                settings.backups_dir.display()
            );
            Ok(())
        }
        Commands::Completions { .. } => Ok(()),
    }
}

fn format_size(bytes: u64) -> String {
    const MIB: f64 = 1024.0 * 1024.0;
    format!("{:.1} MiB", bytes as f64 / MIB)
}
