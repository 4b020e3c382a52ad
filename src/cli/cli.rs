use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "krypta",
    version,
    about = "Local password vault and browser native-messaging host"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the native-messaging host loop on stdin/stdout (default).
    Host,
    /// First-time master password setup for the configured vault.
    Init {
        /// Display label stored in the vault header; not a secret.
        #[arg(long)]
        user: String,
    },
    /// Print a summary of the vault header (no secrets).
    Header,
    /// Change the master password, rewrapping the vault key.
    ChangeMaster,
}
