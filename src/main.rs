//! Followgraph CLI - follow relationships with a cache-aside read path

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use followgraph::RelationKind;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "followgraph")]
#[command(version)]
#[command(about = "Follow graph service - person and topic follows with cached listings and counts")]
#[command(long_about = r#"
Followgraph records who follows whom (and which topics), and serves:
  • Paginated follow / follower / topic listings, most recent first
  • Follow and follower counts
  • Full exports of a subject's lists

Example usage:
  followgraph init
  followgraph follow 1 2
  followgraph follows 1 --page-size 20
  followgraph counts 1 --kind topic
  followgraph serve --port 8080
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit machine-readable JSON instead of human output
    #[arg(long, global = true)]
    json: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the database file (overrides the config)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default config file and create the database
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Serve the HTTP API
    Serve {
        /// Port to listen on (overrides the config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Follow a person or topic
    Follow {
        subject: i64,
        target: i64,

        /// Relation kind: person or topic
        #[arg(short, long, default_value = "person", value_parser = parse_kind)]
        kind: RelationKind,
    },

    /// Unfollow a person or topic
    Unfollow {
        subject: i64,
        target: i64,

        /// Relation kind: person or topic
        #[arg(short, long, default_value = "person", value_parser = parse_kind)]
        kind: RelationKind,
    },

    /// List who or what a subject follows
    Follows {
        subject: i64,

        #[arg(short, long, default_value = "person", value_parser = parse_kind)]
        kind: RelationKind,

        /// Rank to start from
        #[arg(long, default_value = "0")]
        cursor: u64,

        /// Page size (0 uses the configured default)
        #[arg(long, default_value = "0")]
        page_size: u32,
    },

    /// List a subject's followers
    Followers {
        subject: i64,

        #[arg(long, default_value = "0")]
        cursor: u64,

        #[arg(long, default_value = "0")]
        page_size: u32,
    },

    /// Show follow counts
    Counts {
        subject: i64,

        #[arg(short, long, default_value = "person", value_parser = parse_kind)]
        kind: RelationKind,
    },

    /// Export a subject's whole list
    Export {
        subject: i64,

        #[arg(short, long, default_value = "person", value_parser = parse_kind)]
        kind: RelationKind,

        /// Export followers instead of follows
        #[arg(long)]
        followers: bool,
    },

    /// Show store statistics
    Stats,
}

fn parse_kind(s: &str) -> Result<RelationKind, String> {
    s.parse::<RelationKind>().map_err(|e| e.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    pub fn is_human(&self) -> bool {
        matches!(self, OutputMode::Human)
    }
}

/// Print a `{"ok": true, ...}` envelope in JSON mode; no-op for humans.
pub fn emit_success(output_mode: OutputMode, command: &str, data: serde_json::Value) -> anyhow::Result<()> {
    if output_mode == OutputMode::Json {
        let envelope = serde_json::json!({
            "ok": true,
            "command": command,
            "data": data,
        });
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    }
    Ok(())
}

fn emit_error(output_mode: OutputMode, err: &anyhow::Error) {
    match output_mode {
        OutputMode::Human => followgraph::ui::error(&format!("{:#}", err)),
        OutputMode::Json => {
            let envelope = serde_json::json!({
                "ok": false,
                "error": format!("{:#}", err),
            });
            println!("{}", envelope);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let output_mode = if cli.json { OutputMode::Json } else { OutputMode::Human };
    let ctx = commands::Context {
        config_path: cli.config,
        database: cli.database,
        output_mode,
    };

    if let Err(e) = commands::run(ctx, cli.command).await {
        emit_error(output_mode, &e);
        std::process::exit(1);
    }
}
