use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line options for Burner.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a throwaway inbox on a random active domain
    Generate,
    /// Create an inbox with a chosen address and password
    Register {
        #[arg(long)]
        address: String,
        #[arg(long)]
        password: String,
    },
    /// Sign in to an existing inbox
    Login {
        #[arg(long)]
        address: String,
        #[arg(long)]
        password: String,
    },
    /// Show the current session (address, usage, expiry)
    Status,
    /// List domains available for address generation
    Domains,
    /// Fetch and print the inbox once
    List,
    /// Poll the inbox and print messages as they arrive (Ctrl-C to stop)
    Watch,
    /// Open one message, marking it read
    Read { id: String },
    /// Print the raw RFC822 source of a message
    Source { id: String },
    /// Delete one message
    Delete { id: String },
    /// Delete every message in the inbox
    Clear,
    /// Download an attachment to a file
    Download {
        /// Attachment id (shown by `read`)
        id: String,
        /// Destination path
        #[arg(long, short)]
        output: PathBuf,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Delete the account remotely and sign out
    DeleteAccount {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}
