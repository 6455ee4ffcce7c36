use clap::{Parser, Subcommand};

/// Jetstream: authentication and credential brokering for the Stratos console
#[derive(Parser)]
#[command(name = "jetstream", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the backend server
    Serve {
        /// Port to bind (defaults to JETSTREAM_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Apply database migrations and exit
    Migrate,

    /// Print a fresh ENCRYPTION_KEY
    Keygen,
}
