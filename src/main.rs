//! jira-bridge - Bidirectional production management <-> Jira sync
//!
//! Main entry point for the jira-bridge CLI.

use anyhow::Context;
use clap::{Parser, Subcommand};
use jira_bridge::config::{validate_settings_result, BridgeSettings};
use jira_bridge::event::{JiraEvent, PmEvent};
use jira_bridge::integrations::{MemoryJira, MemoryPm};
use jira_bridge::{Bridge, BridgeError};
use serde::de::DeserializeOwned;
use std::io::Read;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// Exit code telling the caller a later re-delivery may succeed (EX_TEMPFAIL)
const EXIT_TRANSIENT: i32 = 75;

/// jira-bridge - Sync production management entities and Jira issues
#[derive(Parser, Debug)]
#[command(name = "jira-bridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to settings file (default: ~/.config/jira-bridge/settings.yaml)
    #[arg(short, long, env = "JIRA_BRIDGE_SETTINGS")]
    settings: Option<PathBuf>,

    /// Use in-memory clients instead of connecting to either site
    #[arg(long)]
    dry_run: bool,

    /// Default log level when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate settings and list the configured channels
    Check,

    /// Sync a production management change to Jira
    SyncInJira {
        /// Channel name (e.g., task_issue)
        channel: String,

        /// Entity type (e.g., Task)
        entity_type: String,

        /// Entity id
        entity_id: i64,

        /// Event payload file, or - for stdin
        #[arg(short, long, default_value = "-")]
        event: String,
    },

    /// Sync a Jira change to production management
    SyncInPm {
        /// Channel name (e.g., task_issue)
        channel: String,

        /// Resource type (e.g., Issue)
        resource_type: String,

        /// Resource key (e.g., PROJ-123)
        resource_key: String,

        /// Webhook payload file, or - for stdin
        #[arg(short, long, default_value = "-")]
        event: String,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = jira_bridge::logging::init(&cli.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        let transient = e
            .downcast_ref::<BridgeError>()
            .is_some_and(BridgeError::is_transient);
        process::exit(if transient { EXIT_TRANSIENT } else { 1 });
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = match cli.settings {
        Some(ref path) => BridgeSettings::load(path)?,
        None => BridgeSettings::load_default()?,
    };

    let bridge = if cli.dry_run {
        validate_settings_result(&settings)?;
        Bridge::new(&settings, Arc::new(MemoryPm::new()), Arc::new(MemoryJira::new()))?
    } else {
        Bridge::connect(&settings)?
    };

    match cli.command {
        Commands::Check => {
            println!("Settings OK. Channels:");
            for name in bridge.channel_names() {
                println!("  {}", name);
            }
        }
        Commands::SyncInJira {
            channel,
            entity_type,
            entity_id,
            event,
        } => {
            let event: PmEvent = read_event(&event)?;
            let wrote = bridge.sync_in_jira(&channel, &entity_type, entity_id, &event)?;
            print_outcome(wrote);
        }
        Commands::SyncInPm {
            channel,
            resource_type,
            resource_key,
            event,
        } => {
            let event: JiraEvent = read_event(&event)?;
            let wrote = bridge.sync_in_pm(&channel, &resource_type, &resource_key, &event)?;
            print_outcome(wrote);
        }
    }

    Ok(())
}

fn read_event<T: DeserializeOwned>(source: &str) -> anyhow::Result<T> {
    let content = if source == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read event from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(source)
            .with_context(|| format!("Failed to read event from {}", source))?
    };
    serde_json::from_str(&content).context("Invalid event payload")
}

fn print_outcome(wrote: bool) {
    if wrote {
        println!("synced");
    } else {
        println!("no changes");
    }
}
