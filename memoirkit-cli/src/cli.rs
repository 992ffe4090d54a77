//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use memoirkit_core::platform::ConnectionType;

/// Encrypted memoir backups against a local directory.
#[derive(Parser, Debug)]
#[command(name = "memoirkit", author, version, about, long_about = None)]
pub struct Cli {
    /// Data directory holding keys, the library, config and the object store.
    #[arg(long, env = "MEMOIRKIT_HOME", global = true)]
    pub home: Option<PathBuf>,

    /// Vault password.
    #[arg(long, env = "MEMOIRKIT_PASSWORD", global = true, hide_env_values = true)]
    pub password: Option<String>,

    /// Network state reported to preflight (wifi, cellular, none).
    #[arg(long, default_value = "wifi", global = true)]
    pub network: ConnectionType,

    /// Battery level reported to preflight, 0.0 to 1.0.
    #[arg(long, default_value_t = 1.0, global = true)]
    pub battery: f32,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print results as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    /// The command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the vault, or unlock it to check the password.
    Init,

    /// Add a memory to the local library.
    AddMemory {
        /// Record id.
        #[arg(long)]
        id: String,
        /// Display title.
        #[arg(long)]
        title: String,
        /// Recording to attach.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Tags, repeatable.
        #[arg(short, long)]
        tag: Vec<String>,
        /// Mark the memory archived.
        #[arg(long)]
        archived: bool,
    },

    /// Run a backup.
    Backup {
        /// Skip the wifi and battery gates.
        #[arg(long)]
        manual: bool,
    },

    /// Restore a backup into the local library.
    Restore {
        /// Backup id; defaults to the newest backup.
        backup_id: Option<String>,
    },

    /// List published backups, newest first.
    List,

    /// Delete a published backup.
    Delete {
        /// Backup id.
        backup_id: String,
    },

    /// Delete backups past the retention window.
    Prune,

    /// Score backup health.
    Health,

    /// Rotate the backup key.
    Rotate,

    /// Export every key into a password-protected escrow file.
    ExportKeys {
        /// Output file.
        #[arg(long)]
        out: PathBuf,
        /// Escrow password.
        #[arg(long, env = "MEMOIRKIT_EXPORT_PASSWORD", hide_env_values = true)]
        export_password: String,
    },

    /// Import keys from an escrow file.
    ImportKeys {
        /// Escrow file written by `export-keys`.
        #[arg(long)]
        file: PathBuf,
        /// Escrow password.
        #[arg(long, env = "MEMOIRKIT_EXPORT_PASSWORD", hide_env_values = true)]
        export_password: String,
    },

    /// Delete every key. Existing backups become unrecoverable.
    ClearKeys {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },

    /// Generate a recovery password.
    RecoveryPassword {
        /// Alternate consonants and vowels so the password can be read aloud.
        #[arg(long)]
        pronounceable: bool,
    },
}
