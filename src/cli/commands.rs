use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::config::{ConfigOverrides, RunConfiguration};
use crate::content::ContentClassifier;
use crate::orchestrator::{BatchRequest, FetchOrchestrator};

/// Options for the `fetch` command
#[derive(Debug, Default)]
pub struct FetchOptions {
    pub urls: Vec<String>,
    pub input: Option<PathBuf>,
    pub profile: Option<String>,
    pub overrides: Option<PathBuf>,
    pub deadline: Option<u64>,
    pub no_decodo: bool,
    pub output: Option<PathBuf>,
}

/// Load process defaults from a profile (or the default file) plus the environment
fn load_defaults(profile: Option<&str>) -> Result<RunConfiguration> {
    let config = match profile {
        Some(name) => RunConfiguration::load_profile(name)
            .context(format!("Failed to load profile: {}", name))?,
        None => RunConfiguration::load_default()?,
    };
    Ok(config.with_env_credentials())
}

/// Build the batch request from an input file and/or positional URLs
fn read_request(urls: Vec<String>, input: Option<&Path>) -> Result<BatchRequest> {
    let mut request = match input {
        Some(path) => {
            let contents = fs::read_to_string(path)
                .context(format!("Failed to read input file: {}", path.display()))?;
            parse_input(&contents)
                .context(format!("Failed to parse input file: {}", path.display()))?
        }
        None => BatchRequest::new(Vec::new()),
    };

    request.urls.extend(urls);
    if request.urls.is_empty() {
        anyhow::bail!("No URLs given; pass them as arguments or with --input");
    }

    Ok(request)
}

/// A JSON batch request, or one URL per line with `#` comments
fn parse_input(contents: &str) -> Result<BatchRequest> {
    if contents.trim_start().starts_with('{') {
        return Ok(serde_json::from_str(contents)?);
    }

    let urls = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();
    Ok(BatchRequest::new(urls))
}

/// Fetch a batch of URLs and emit the JSON response
pub async fn fetch(options: FetchOptions) -> Result<()> {
    let mut request = read_request(options.urls, options.input.as_deref())?;

    if let Some(path) = &options.overrides {
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read overrides file: {}", path.display()))?;
        let overrides: ConfigOverrides = serde_json::from_str(&contents)
            .context(format!("Invalid overrides in {}", path.display()))?;
        if request.config.is_some() {
            warn!("Overrides file replaces the config embedded in the input file");
        }
        request.config = Some(overrides);
    }

    // Command line flags win over everything else
    if options.deadline.is_some() || options.no_decodo {
        let overrides = request.config.get_or_insert_with(ConfigOverrides::default);
        if let Some(seconds) = options.deadline {
            overrides.run_deadline_seconds = Some(seconds);
        }
        if options.no_decodo {
            overrides.decodo_enabled = Some(false);
        }
    }

    let defaults = load_defaults(options.profile.as_deref())?;
    let orchestrator = FetchOrchestrator::new(defaults)?;

    // Ctrl-C cancels the run but still returns partial results
    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            ctrl_c.cancel();
        }
    });

    let response = orchestrator
        .run_with_cancellation(request, token)
        .await
        .context("Run rejected")?;

    let summary = &response.summary;
    info!(
        "{} succeeded, {} failed ({:.1}%), by tier: {:?}",
        summary.success, summary.failed, summary.success_rate, summary.by_tier
    );

    let json = serde_json::to_string_pretty(&response).context("Failed to serialize response")?;
    match options.output {
        Some(path) => {
            fs::write(&path, json)
                .context(format!("Failed to write response: {}", path.display()))?;
            info!("Response written to: {}", path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}

/// Classify a saved HTML file under a profile's thresholds
pub async fn classify(file: PathBuf, profile: Option<String>) -> Result<()> {
    let html = tokio::fs::read_to_string(&file)
        .await
        .context(format!("Failed to read HTML file: {}", file.display()))?;

    let config = match profile.as_deref() {
        Some(name) => RunConfiguration::load_profile(name)
            .context(format!("Failed to load profile: {}", name))?,
        None => RunConfiguration::load_default()?,
    };

    let classifier = ContentClassifier::new(config.content);
    let verdict = classifier.classify(Some(&html));
    println!("{}: {}", file.display(), verdict);

    Ok(())
}

/// List all available configuration profiles
pub fn list_profiles() -> Result<()> {
    let profiles = RunConfiguration::list_profiles()?;

    println!("Available configuration profiles:");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Show a profile, creating it from the defaults if it does not exist yet
pub fn manage_profile(profile_name: String) -> Result<()> {
    match RunConfiguration::load_profile(&profile_name) {
        Ok(config) => {
            println!("Profile: {}", profile_name);
            println!("{}", serde_yaml::to_string(&config)?);
        }
        Err(_) => {
            warn!(
                "Profile '{}' does not exist. Creating a default profile.",
                profile_name
            );
            let config = RunConfiguration::default();
            config.save_as_profile(&profile_name)?;
            println!("Created default profile: {}", profile_name);
        }
    }

    Ok(())
}

/// Show the current configuration
pub fn show_config() -> Result<()> {
    let config = RunConfiguration::load_default()?;
    println!("Current configuration:");
    println!("{}", serde_yaml::to_string(&config)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_list_input() {
        let request = parse_input(
            "# shop pages\nhttps://a.test/1\n\n  https://a.test/2  \n#https://skipped.test\n",
        )
        .unwrap();
        assert_eq!(request.urls, vec!["https://a.test/1", "https://a.test/2"]);
        assert!(request.config.is_none());
    }

    #[test]
    fn test_parse_json_input() {
        let request = parse_input(
            r#"{"urls": ["https://a.test"], "config": {"decodo_enabled": false}}"#,
        )
        .unwrap();
        assert_eq!(request.urls, vec!["https://a.test"]);
        assert_eq!(request.config.unwrap().decodo_enabled, Some(false));
    }

    #[test]
    fn test_read_request_requires_urls() {
        assert!(read_request(Vec::new(), None).is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.txt");
        fs::write(&path, "https://a.test\n").unwrap();
        let request = read_request(vec!["https://b.test".to_string()], Some(&path)).unwrap();
        assert_eq!(request.urls, vec!["https://a.test", "https://b.test"]);
    }
}
