//! Wikimirror CLI
//!
//! Command-line tools for mirroring a MediaWiki site.
//!
//! # Commands
//!
//! - `sync` - Run one incremental sync pass
//! - `verify` - Compare the mirror with the remote
//! - `status` - Display checkpoints and mirror statistics
//! - `content` - Fetch missing revision texts

mod client;
mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use wikimirror_protocol::StreamKind;
use wikimirror_sync::ContentMode;

/// Wikimirror command-line tools.
#[derive(Parser)]
#[command(name = "wikimirror")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the mirror directory
    #[arg(global = true, short, long)]
    mirror: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by commands that talk to the remote.
#[derive(Args, Clone)]
struct RemoteArgs {
    /// Action API endpoint, e.g. https://wiki.example.org/w/api.php
    #[arg(long)]
    api_url: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// User agent sent with every request
    #[arg(long)]
    user_agent: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one incremental sync pass
    Sync {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Maximum records per listing request
        #[arg(short, long, default_value = "100")]
        batch_size: u32,

        /// Attempts per remote request
        #[arg(short, long, default_value = "4")]
        retries: u32,

        /// Streams to pull (pages, revisions, logevents, tags, restrictions)
        #[arg(short, long, value_delimiter = ',')]
        streams: Vec<StreamKind>,

        /// Pull streams one after another
        #[arg(long)]
        sequential: bool,

        /// Compare the mirror with the remote after pulling
        #[arg(long)]
        verify: bool,

        /// Revision texts to fetch (off, latest, all)
        #[arg(short, long, default_value = "off")]
        content: ContentMode,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Compare the mirror with the remote
    Verify {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Number of pages whose revision counts are compared
        #[arg(long, default_value = "20")]
        sample: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Display checkpoints and mirror statistics
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Fetch missing revision texts
    Content {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Revisions to cover (latest, all)
        #[arg(long, default_value = "latest")]
        mode: ContentMode,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Sync {
            remote,
            batch_size,
            retries,
            streams,
            sequential,
            verify,
            content,
            format,
        } => {
            let path = cli.mirror.ok_or("Mirror path required for sync")?;
            let options = commands::sync::SyncOptions {
                batch_size,
                retries,
                streams,
                parallel: !sequential,
                verify,
                content,
            };
            commands::sync::run(&path, &remote.into(), options, &format)?;
        }
        Commands::Verify {
            remote,
            sample,
            format,
        } => {
            let path = cli.mirror.ok_or("Mirror path required for verify")?;
            commands::verify::run(&path, &remote.into(), sample, &format)?;
        }
        Commands::Status { format } => {
            let path = cli.mirror.ok_or("Mirror path required for status")?;
            commands::status::run(&path, &format)?;
        }
        Commands::Content { remote, mode } => {
            let path = cli.mirror.ok_or("Mirror path required for content")?;
            commands::content::run(&path, &remote.into(), mode)?;
        }
        Commands::Version => {
            println!("Wikimirror CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Mirror schema v{}", wikimirror_store::SCHEMA_VERSION);
        }
    }

    Ok(())
}

impl From<RemoteArgs> for commands::Remote {
    fn from(args: RemoteArgs) -> Self {
        Self {
            api_url: args.api_url,
            timeout: std::time::Duration::from_secs(args.timeout),
            user_agent: args.user_agent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn sync_arguments_are_parsed() {
        let cli = Cli::parse_from([
            "wikimirror",
            "--mirror",
            "/tmp/m",
            "sync",
            "--api-url",
            "https://wiki.example.org/w/api.php",
            "--streams",
            "pages,logevents",
            "--content",
            "latest",
            "--sequential",
        ]);
        assert_eq!(cli.mirror, Some(PathBuf::from("/tmp/m")));
        match cli.command {
            Commands::Sync {
                streams,
                content,
                sequential,
                batch_size,
                ..
            } => {
                assert_eq!(streams, vec![StreamKind::Pages, StreamKind::LogEvents]);
                assert_eq!(content, ContentMode::Latest);
                assert!(sequential);
                assert_eq!(batch_size, 100);
            }
            _ => panic!("expected sync"),
        }
    }

    #[test]
    fn unknown_stream_is_rejected() {
        let parsed = Cli::try_parse_from([
            "wikimirror",
            "sync",
            "--api-url",
            "u",
            "--streams",
            "users",
        ]);
        assert!(parsed.is_err());
    }
}
