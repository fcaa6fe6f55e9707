pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a batch of URLs, escalating through the tiers as needed
    Fetch {
        /// URLs to fetch
        urls: Vec<String>,

        /// File with one URL per line, or a JSON batch request
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Configuration profile to use instead of the default
        #[arg(short, long)]
        profile: Option<String>,

        /// JSON file with configuration overrides
        #[arg(long)]
        overrides: Option<PathBuf>,

        /// Abandon the run after this many seconds
        #[arg(long)]
        deadline: Option<u64>,

        /// Skip the proxy fallback tier
        #[arg(long)]
        no_decodo: bool,

        /// Write the JSON response here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check whether a saved HTML file would be accepted
    Classify {
        /// HTML file to classify
        #[arg(required = true)]
        file: PathBuf,

        /// Profile whose thresholds to use
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Manage configuration profiles
    Config {
        /// Profile name to manage
        #[arg(required = false)]
        profile: Option<String>,

        /// List all available profiles
        #[arg(short, long)]
        list: bool,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Fetch {
            urls,
            input,
            profile,
            overrides,
            deadline,
            no_decodo,
            output,
        } => {
            info!("Starting fetch run");
            commands::fetch(commands::FetchOptions {
                urls,
                input,
                profile,
                overrides,
                deadline,
                no_decodo,
                output,
            })
            .await
        }
        Commands::Classify { file, profile } => {
            info!("Classifying {}", file.display());
            commands::classify(file, profile).await
        }
        Commands::Config { profile, list } => {
            if list {
                info!("Listing all configuration profiles");
                commands::list_profiles()
            } else if let Some(profile_name) = profile {
                info!("Managing configuration profile: {}", profile_name);
                commands::manage_profile(profile_name)
            } else {
                info!("Showing current configuration");
                commands::show_config()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert()
    }

    #[test]
    fn test_fetch_flags_parse() {
        let cli = Cli::try_parse_from([
            "fetcher",
            "--verbose",
            "fetch",
            "https://a.test",
            "https://b.test",
            "--deadline",
            "60",
            "--no-decodo",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Fetch {
                urls,
                deadline,
                no_decodo,
                ..
            } => {
                assert_eq!(urls, vec!["https://a.test", "https://b.test"]);
                assert_eq!(deadline, Some(60));
                assert!(no_decodo);
            }
            _ => panic!("expected fetch command"),
        }
    }
}
