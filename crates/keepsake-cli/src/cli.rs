use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "keepsake")]
#[command(about = "Local-first notes that sync across devices")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to the local database of this device
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Path to the shared remote document file
    #[arg(long, global = true, value_name = "PATH")]
    pub remote_path: Option<PathBuf>,

    /// Path to the sync config JSON file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Signed-in user id
    #[arg(long, global = true, value_name = "ID")]
    pub user: Option<String>,

    /// Quick capture: keepsake "my thought here"
    #[arg(trailing_var_arg = true)]
    pub note: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new note; the first line becomes the title
    #[command(alias = "new")]
    Add {
        /// Note content
        content: Vec<String>,
    },
    /// List recent notes
    List {
        /// Number of notes to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an existing note
    Edit {
        /// Note ID or unique ID prefix
        id: String,
        /// Replace the title without opening an editor
        #[arg(long)]
        title: Option<String>,
        /// Replace the body without opening an editor
        #[arg(long)]
        body: Option<String>,
    },
    /// Delete a note locally and from the remote store
    Delete {
        /// Note ID or unique ID prefix
        id: String,
    },
    /// Show or update the profile
    Profile {
        #[command(subcommand)]
        command: Option<ProfileCommands>,
    },
    /// Download missing data and upload every pending change
    Sync,
    /// Show sync status for this device
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete the account and all of its data
    DeleteAccount {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum ProfileCommands {
    /// Print the profile
    Show,
    /// Change the display name
    Rename {
        /// New display name
        name: Vec<String>,
    },
    /// Mark onboarding as completed
    CompleteOnboarding,
}
