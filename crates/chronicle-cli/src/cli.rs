use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chronicle")]
#[command(about = "Sync and migrate a Chronicle journal from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the attachment file root
    #[arg(long, global = true, value_name = "PATH")]
    pub file_root: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage sync configurations
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Run synchronization
    Sync {
        /// Config ID or unique ID prefix (default: all enabled configs)
        #[arg(long, value_name = "ID")]
        config: Option<String>,
    },
    /// Check that a config's server accepts its stored credential
    TestConnection {
        /// Config ID or unique ID prefix
        id: String,
    },
    /// Show the last sync status per configuration
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Migrate attachment files to the organized storage layout
    Migrate {
        #[command(subcommand)]
        command: MigrateCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Add a sync configuration
    Add {
        /// WebDAV server URL (https)
        #[arg(long, value_name = "URL")]
        server: String,
        /// Account username
        #[arg(long, value_name = "NAME")]
        user: String,
        /// Display name (defaults to the server host)
        #[arg(long, value_name = "NAME")]
        name: Option<String>,
        /// Password or app token (falls back to $CHRONICLE_PASSWORD)
        #[arg(long, value_name = "SECRET")]
        password: Option<String>,
        /// Skip attachment content when syncing
        #[arg(long)]
        no_attachments: bool,
    },
    /// List configurations
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a configuration (and its manifest and credential)
    Remove {
        /// Config ID or unique ID prefix
        id: String,
    },
    /// Enable a configuration
    Enable {
        /// Config ID or unique ID prefix
        id: String,
    },
    /// Disable a configuration
    Disable {
        /// Config ID or unique ID prefix
        id: String,
    },
    /// Drop a configuration's manifest, forcing a full re-diff
    Reset {
        /// Config ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum MigrateCommands {
    /// Migrate every legacy attachment
    Run {
        /// Classify and report without copying or updating anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Count attachments still on legacy paths
    Count,
    /// Check that every attachment's file is readable
    Validate {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
