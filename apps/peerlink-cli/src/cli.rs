use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "peerlink - chat and file transfer with one peer")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to a config file (TOML). Defaults to ~/.config/peerlink/config.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory received files are saved into.
    #[arg(long, global = true)]
    pub download_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open a room and wait for a guest.
    Host {
        /// Room id to use instead of a generated one.
        #[arg(long)]
        id: Option<String>,

        /// Address to listen on.
        #[arg(long)]
        listen: Option<String>,
    },

    /// Join a room opened by a host.
    Join {
        /// Room id shown by the host.
        room: String,

        /// Host address to dial.
        #[arg(long)]
        connect: Option<String>,
    },

    /// Send FILE between two in-process sessions and verify the copy.
    Selftest { file: PathBuf },
}
