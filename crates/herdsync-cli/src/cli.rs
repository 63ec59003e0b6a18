use std::path::PathBuf;

use clap::{Parser, Subcommand};
use herdsync_core::EntityType;

#[derive(Parser)]
#[command(name = "herdsync")]
#[command(about = "Keep a local herd replica in sync with the farm backend")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local replica file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name for backend and auth configuration
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Pull every table for the signed-in farm
    Sync {
        /// Pull lookup tables even when they were pulled recently
        #[arg(long)]
        force_reference: bool,
    },
    /// Pull a single table
    Pull {
        /// Entity name or table name (e.g. `cattle`, `health_records`)
        #[arg(value_parser = parse_entity)]
        entity: EntityType,
    },
    /// Push every local row of the farm, ignoring sync status
    PushAll,
    /// Inspect and drive the retry queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Show sync status of the local replica
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the sync engine until interrupted
    Watch {
        /// Skip the initial full sync
        #[arg(long)]
        no_initial_sync: bool,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Authenticate a CLI profile with Supabase
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List queued operations
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop operations that exhausted their retries
    Clear {
        /// Drop every queued operation, pending ones included
        #[arg(long)]
        all: bool,
    },
    /// Replay eligible operations now
    Process,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init {
        /// Supabase project URL
        #[arg(long, value_name = "URL")]
        supabase_url: Option<String>,
        /// Supabase anon/public key
        #[arg(long, value_name = "KEY")]
        supabase_anon_key: Option<String>,
        /// Realtime websocket URL override
        #[arg(long, value_name = "URL")]
        realtime_url: Option<String>,
        /// Fixed farm id instead of the signed-in user's membership
        #[arg(long, value_name = "ID")]
        farm_id: Option<String>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Print the resolved profile
    Show,
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Login with Supabase email/password and store session in keychain
    Login {
        /// Supabase account email
        #[arg(long, value_name = "EMAIL")]
        email: String,
        /// Supabase account password
        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Show auth status for profile
    Status,
    /// Logout profile and clear stored session
    Logout,
}

pub fn parse_entity(value: &str) -> Result<EntityType, String> {
    value.parse()
}
