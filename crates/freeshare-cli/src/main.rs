// SPDX-License-Identifier: AGPL-3.0
// FreeShare CLI - entry point
//
// Upload a file to get a 5-digit code, or enter a code to download the file.

mod commands;
mod state;

use clap::{Parser, Subcommand};
use freeshare_core::SettingsStore;
use state::AppState;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "freeshare", version, about = "Share a file with a 5-digit code")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Share(ShareCommand),
    /// Show or change settings
    Settings {
        /// Directory holding records and uploaded blobs
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Directory downloads are written to
        #[arg(long)]
        download_dir: Option<PathBuf>,
        /// Give up allocating a code after this many draws
        #[arg(long)]
        max_attempts: Option<u32>,
    },
}

/// Commands that need the share service
#[derive(Subcommand)]
enum ShareCommand {
    /// Upload a file and print its share code
    Upload {
        /// Path to the file to share
        file: PathBuf,
    },
    /// Download the file shared under a code
    Download {
        /// 5-digit share code
        code: String,
        /// Destination directory (defaults to the configured download dir)
        #[arg(long)]
        dest: Option<PathBuf>,
    },
    /// Show the name and location behind a code
    Lookup {
        /// 5-digit share code
        code: String,
    },
    /// Print the location of a code whenever it changes
    Watch {
        /// 5-digit share code
        code: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("freeshare_cli=info".parse()?)
                .add_directive("freeshare_core=warn".parse()?),
        )
        .init();

    tracing::debug!("Starting FreeShare v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();

    match cli.command {
        Commands::Settings {
            data_dir,
            download_dir,
            max_attempts,
        } => {
            let store = SettingsStore::new()?;
            commands::settings(&store, data_dir, download_dir, max_attempts)
        }
        Commands::Share(command) => {
            let state = AppState::new().await?;
            run(&state, command).await
        }
    }
}

async fn run(state: &AppState, command: ShareCommand) -> anyhow::Result<()> {
    match command {
        ShareCommand::Upload { file } => commands::upload(state, file).await,
        ShareCommand::Download { code, dest } => commands::download(state, code, dest).await,
        ShareCommand::Lookup { code } => commands::lookup(state, code).await,
        ShareCommand::Watch { code } => commands::watch(state, code).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_share_commands_parse_at_top_level() {
        let cli = Cli::try_parse_from(["freeshare", "download", "54231", "--dest", "/tmp"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Share(ShareCommand::Download { ref code, dest: Some(_) }) if code == "54231"
        ));

        let cli = Cli::try_parse_from(["freeshare", "settings", "--max-attempts", "3"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Settings { max_attempts: Some(3), .. }
        ));
    }
}
