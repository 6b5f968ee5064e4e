use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the htmlcache binary.
#[derive(Debug, Parser)]
#[command(name = "htmlcache", version, about = "Cached, minified HTML page server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "HTMLCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Serve HTML pages through the page cache.
    Serve(Box<ServeArgs>),
    /// Minify a document and write it to stdout.
    Minify(MinifyArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct MinifyArgs {
    /// File to minify; reads stdin when omitted.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: Option<PathBuf>,

    /// Keep comments in the output.
    #[arg(long = "include-comments", action = clap::ArgAction::SetTrue)]
    pub include_comments: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the directory pages are served from.
    #[arg(long = "pages-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub pages_dir: Option<PathBuf>,

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

    /// Override the cache entry lifetime.
    #[arg(long = "cache-ttl-seconds", value_name = "SECONDS")]
    pub cache_ttl_seconds: Option<u64>,

    /// Toggle minification of rendered pages.
    #[arg(
        long = "cache-minify",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_minify: Option<bool>,

    /// Toggle keeping comments in minified pages.
    #[arg(
        long = "cache-include-comments",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_include_comments: Option<bool>,

    /// Toggle the durable cache tier.
    #[arg(
        long = "cache-use-durable-tier",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_use_durable_tier: Option<bool>,

    /// Override the database connection URL backing the durable tier.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}
