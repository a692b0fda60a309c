//! isofetch CLI - resumable operating system image downloads.

mod commands;
mod error;
mod runner;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::fetch::FetchArgs;
use commands::serve::ServeArgs;

#[derive(Debug, Parser)]
#[command(name = "isofetch", version, about, long_about = None)]
struct Cli {
    /// Path to config.ini (defaults to ~/.isofetch/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP and WebSocket download server
    Serve {
        /// Address to bind (overrides [server] bind)
        #[arg(long)]
        bind: Option<SocketAddr>,
    },

    /// Download a single file in the foreground
    Fetch {
        /// Primary source URL
        #[arg(long)]
        url: String,

        /// Fallback mirror URL, tried in order (repeatable)
        #[arg(long = "mirror")]
        mirrors: Vec<String>,

        /// Destination file (defaults to the URL's file name in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Expected digest, hex encoded
        #[arg(long)]
        checksum: Option<String>,

        /// Digest algorithm: sha256, sha1, sha512 or md5
        #[arg(long, default_value = "sha256")]
        checksum_type: String,

        /// Expected size in bytes
        #[arg(long)]
        size: Option<u64>,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();
    let config_path = cli.config;

    let result = match cli.command {
        Commands::Serve { bind } => commands::serve::run(ServeArgs { bind, config_path }),
        Commands::Fetch {
            url,
            mirrors,
            output,
            checksum,
            checksum_type,
            size,
        } => commands::fetch::run(FetchArgs {
            url,
            mirrors,
            output,
            checksum,
            checksum_type,
            size,
            config_path,
        }),
        Commands::Config { command } => commands::config::run(command, config_path),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}
