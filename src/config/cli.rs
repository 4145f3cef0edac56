use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the Townsite binary.
#[derive(Debug, Parser)]
#[command(
    name = "townsite",
    version,
    about = "Townsite media resolution client"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "TOWNSITE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Resolve media ids to display URLs.
    Resolve(ResolveArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ResolveArgs {
    #[command(flatten)]
    pub overrides: ResolveOverrides,

    /// Fetch each id with its own request instead of batching.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub degraded: bool,

    /// Print results as a JSON object keyed by id.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub json: bool,

    /// Resource ids to resolve; duplicates are resolved once.
    #[arg(value_name = "ID", required = true)]
    pub ids: Vec<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ResolveOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the site base URL the resolve endpoints live under.
    #[arg(long = "endpoint-base-url", value_name = "URL")]
    pub endpoint_base_url: Option<String>,

    /// Override the per-request timeout.
    #[arg(long = "endpoint-request-timeout-seconds", value_name = "SECONDS")]
    pub endpoint_request_timeout_seconds: Option<u64>,

    /// Override the quiet period before a batch is sent.
    #[arg(long = "media-debounce-ms", value_name = "MILLIS")]
    pub media_debounce_ms: Option<u64>,

    /// Override the longest a batch window may stay open.
    #[arg(long = "media-max-wait-ms", value_name = "MILLIS")]
    pub media_max_wait_ms: Option<u64>,

    /// Override the maximum number of ids per batch request.
    #[arg(long = "media-max-batch-size", value_name = "COUNT")]
    pub media_max_batch_size: Option<u64>,
}
