use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter for the crate's own events; everything else stays at warn
fn build_filter(verbose: bool) -> Result<EnvFilter> {
    let own_level = if verbose {
        "smart_fetcher=debug"
    } else {
        "smart_fetcher=info"
    };

    Ok(EnvFilter::from_default_env()
        .add_directive(own_level.parse()?)
        .add_directive("warn".parse()?))
}

/// Initialize the logging system.
///
/// `RUST_LOG` still applies. When `log_file` is given, events are also
/// appended there without ANSI colours so a long batch can be inspected later.
pub fn init_logging(verbose: bool, log_file: Option<PathBuf>) -> Result<()> {
    let env_filter = build_filter(verbose)?;

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::CLOSE);

    match log_file {
        Some(log_file) => {
            if let Some(parent) = log_file.parent() {
                fs::create_dir_all(parent).context(format!(
                    "Failed to create log directory: {}",
                    parent.display()
                ))?;
            }

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)
                .context(format!("Failed to open log file: {}", log_file.display()))?;
            let file_layer = fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(file);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .init();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_levels_parse() {
        assert!(build_filter(true).is_ok());
        assert!(build_filter(false).is_ok());
    }
}
