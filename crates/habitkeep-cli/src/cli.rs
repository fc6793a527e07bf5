use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "habitkeep")]
#[command(about = "Track habits offline and sync them when you are back online")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new habit
    #[command(alias = "new")]
    Add {
        /// Habit name
        name: Vec<String>,
        /// Longer description
        #[arg(short, long)]
        description: Option<String>,
        /// Hex color such as #3B82F6
        #[arg(long)]
        color: Option<String>,
        /// Icon name
        #[arg(long)]
        icon: Option<String>,
        /// Target completions per week (1-7)
        #[arg(short, long, value_name = "DAYS")]
        frequency: Option<u8>,
    },
    /// List habits with their streaks
    #[command(alias = "ls")]
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an existing habit
    Edit {
        /// Habit ID or unique ID prefix
        id: String,
        /// New name
        #[arg(long)]
        name: Option<String>,
        /// New description
        #[arg(short, long, conflicts_with = "clear_description")]
        description: Option<String>,
        /// Remove the description
        #[arg(long)]
        clear_description: bool,
        /// New hex color
        #[arg(long)]
        color: Option<String>,
        /// New icon name
        #[arg(long)]
        icon: Option<String>,
        /// New target completions per week (1-7)
        #[arg(short, long, value_name = "DAYS")]
        frequency: Option<u8>,
    },
    /// Delete an existing habit
    Delete {
        /// Habit ID or unique ID prefix
        id: String,
    },
    /// Mark a habit done for today or another day
    Done {
        /// Habit ID or unique ID prefix
        id: String,
        /// Local day to record (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        date: Option<NaiveDate>,
    },
    /// Remove a completion for today or another day
    Undo {
        /// Habit ID or unique ID prefix
        id: String,
        /// Local day to clear (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        date: Option<NaiveDate>,
    },
    /// Show streaks and completion rates
    Stats {
        /// Limit to one habit (ID or unique ID prefix)
        id: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show mutations waiting to be pushed
    Queue {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Push local changes and pull remote ones
    Sync {
        /// Keep running and sync on an interval and on reconnect
        #[arg(long)]
        watch: bool,
        /// Output the sync report as JSON
        #[arg(long, conflicts_with = "watch")]
        json: bool,
    },
    /// Manage the Supabase session
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Inspect or update settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Sign in with email/password and store the session in the keychain
    Login {
        /// Account email
        #[arg(long, value_name = "EMAIL")]
        email: String,
        /// Account password
        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Show who is signed in
    Status,
    /// Sign out and clear the stored session
    Logout,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write settings to the config file
    Init {
        /// Supabase project URL
        #[arg(long, value_name = "URL")]
        supabase_url: Option<String>,
        /// Supabase anon/public key
        #[arg(long, value_name = "KEY")]
        supabase_anon_key: Option<String>,
        /// Seconds between background syncs
        #[arg(long, value_name = "SECS")]
        sync_interval: Option<u64>,
        /// Enqueue deletes of never-pushed habits instead of cancelling them
        #[arg(long)]
        enqueue_unsynced_deletes: bool,
    },
}
