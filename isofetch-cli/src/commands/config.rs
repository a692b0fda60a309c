//! Configuration management CLI commands.
//!
//! `config init` writes a file with every default spelled out; `config show`
//! prints the effective settings; `config path` prints where the file lives.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use isofetch::config::{config_file_path, ConfigFile};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Write a config file containing the default settings
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,

    /// Show the configuration file path
    Path,
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands, config_path: Option<PathBuf>) -> Result<(), CliError> {
    let path = config_path.unwrap_or_else(config_file_path);
    match command {
        ConfigCommands::Init { force } => run_init(&path, force),
        ConfigCommands::Show => run_show(&path),
        ConfigCommands::Path => {
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn run_init(path: &Path, force: bool) -> Result<(), CliError> {
    if path.exists() && !force {
        return Err(CliError::Config(format!(
            "{} already exists. Use --force to overwrite it.",
            path.display()
        )));
    }
    ConfigFile::default().save(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn run_show(path: &Path) -> Result<(), CliError> {
    let config = ConfigFile::load(path)?;

    println!("[server]");
    println!("  bind = {}", config.server.bind);
    println!();
    println!("[downloads]");
    println!("  directory = {}", config.downloads.directory.display());
    println!("  state_dir = {}", config.downloads.state_dir.display());
    println!("  connect_timeout = {}", config.downloads.connect_timeout_secs);
    println!("  attempt_timeout = {}", config.downloads.attempt_timeout_secs);
    println!("  persist_step = {}", config.downloads.persist_step);
    println!("  progress_interval_ms = {}", config.downloads.progress_interval_ms);
    println!();
    println!("[proxy]");
    println!("  timeout = {}", config.proxy.timeout_secs);
    println!("  chunk_size = {}", config.proxy.chunk_size);
    println!();
    println!("[logging]");
    println!("  level = {}", config.logging.level);
    match &config.logging.directory {
        Some(dir) => println!("  directory = {}", dir.display()),
        None => println!("  directory = (not set)"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");

        run_init(&path, false).unwrap();
        assert_eq!(ConfigFile::load(&path).unwrap(), ConfigFile::default());
    }

    #[test]
    fn test_init_refuses_overwrite() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        std::fs::write(&path, "[server]\nbind = 0.0.0.0:1\n").unwrap();

        assert!(matches!(run_init(&path, false), Err(CliError::Config(_))));
        run_init(&path, true).unwrap();
        assert_eq!(ConfigFile::load(&path).unwrap().server.bind.port(), 8000);
    }
}
