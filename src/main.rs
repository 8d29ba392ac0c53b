//! CLI entry point for entra-export.
//!
//! Authenticates with Entra ID app credentials, then either exports
//! Defender device groups to spreadsheets, lists SharePoint sites, or
//! downloads files from a SharePoint folder.
//!
//! Exit codes:
//! - 0: success
//! - 1: runtime error (auth failure, API error, unmatched groups, etc.)
//! - 2: argument validation error (clap handles this automatically)

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use entra_export::auth::{DEFENDER_SCOPE, GRAPH_SCOPE};
use entra_export::client::ApiClient;
use entra_export::config::Config;
use entra_export::error::Result;
use entra_export::graph;
use entra_export::orchestrate::{self, ExportManifest};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "entra-export.toml")]
    config: PathBuf,

    /// Client secret of the app registration. Prefer the
    /// ENTRA_CLIENT_SECRET environment variable to keep it out of process
    /// listings and shell history.
    #[arg(long, global = true, env = "ENTRA_CLIENT_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export the machines of Defender device groups to spreadsheets.
    Machines {
        /// Group to export (repeatable). Defaults to the configured groups,
        /// or every group when none are configured.
        #[arg(long = "group")]
        groups: Vec<String>,
    },

    /// List SharePoint sites visible to the app.
    Sites,

    /// Download matching files from a SharePoint folder.
    Download {
        /// Substring of the site display name (overrides the config).
        #[arg(long)]
        site: Option<String>,

        /// Folder path inside the drive (overrides the config).
        #[arg(long)]
        folder: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { "info" })
    });
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;
    let secret = cli.secret.as_deref();

    match cli.command {
        Commands::Machines { groups } => {
            let client = ApiClient::defender(config.token_provider(secret, DEFENDER_SCOPE)?)?;
            client.authenticate().await?;
            let manifest =
                orchestrate::export_device_groups(&client, &config.defender_options(&groups))
                    .await?;
            print_manifest("Group", &manifest);
        }
        Commands::Sites => {
            let client = ApiClient::graph(config.token_provider(secret, GRAPH_SCOPE)?)?;
            client.authenticate().await?;
            let sites = graph::list_sites(&client).await?;
            info!(count = sites.len(), "sites found");
            for site in sites {
                println!(
                    "{}\t{}\t{}",
                    site.id,
                    site.display_name.as_deref().unwrap_or("-"),
                    site.web_url.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Download { site, folder } => {
            let options = config.sharepoint_options(site.as_deref(), folder.as_deref())?;
            let client = ApiClient::graph(config.token_provider(secret, GRAPH_SCOPE)?)?;
            client.authenticate().await?;
            let manifest = orchestrate::download_site_files(&client, &options).await?;
            print_manifest("File", &manifest);
        }
    }
    Ok(())
}

fn print_manifest(label: &str, manifest: &ExportManifest) {
    println!("Export summary:");
    for entry in &manifest.entries {
        println!("- {label} '{}': {}", entry.name, entry.path.display());
    }
    for skipped in &manifest.skipped {
        println!("- {label} '{}' skipped: {}", skipped.name, skipped.reason);
    }
}
