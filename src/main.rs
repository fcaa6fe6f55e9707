use anyhow::Result;
use tracing::{error, info};

use smart_fetcher::cli;
use smart_fetcher::utils::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = cli::parse_args();

    // Initialize logging
    init_logging(args.verbose, args.log_file.clone())?;

    info!("Starting Smart Fetcher v{}", env!("CARGO_PKG_VERSION"));

    // Process commands
    match cli::process_command(args).await {
        Ok(_) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            Err(e)
        }
    }
}
