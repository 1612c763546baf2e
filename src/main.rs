//! asset-sync: fetch versioned game data into a local cache and place it on
//! disk.

use std::path::PathBuf;
use std::process::ExitCode;

use asset_sync::commands;
use asset_sync::core::state::default_data_dir;
use asset_sync::{SyncError, SyncResult, SyncSettings, SyncState, Version};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "asset-sync", version, about)]
struct Cli {
    /// Data server root, overrides the saved setting
    #[arg(long, global = true, env = "ASSET_SYNC_SERVER")]
    server: Option<String>,

    /// Directory holding settings, the cache and the filesystem
    #[arg(long, global = true, env = "ASSET_SYNC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the file lists of a version, cache every install file and
    /// place the startup files
    Install {
        /// Version to install; falls back to the saved default
        version: Option<String>,
        /// Revalidate cached files against the server
        #[arg(long)]
        check_server: bool,
    },
    /// Cache specific files of a version
    Fetch {
        version: String,
        #[arg(required = true)]
        files: Vec<String>,
        #[arg(long)]
        check_server: bool,
    },
    /// Remove a placed file unless it is persistent
    Remove { version: String, file: String },
    /// Create the addons directory and its persistent links
    InitFs,
    /// Unpack a zip of addons into the addons directory
    ExtractAddons { archive: PathBuf },
    /// Ask the server for its default version and save it
    CheckVersion,
    /// Zip the persistent user directory into a file
    ExportUserData {
        output: PathBuf,
        /// Directory to export; defaults to the persistent user directory
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Delete persisted user files under a path
    DeleteUserData { path: String },
    /// Delete all cached data
    Reset,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            if e.is_recoverable() {
                eprintln!("Hint: retry, or run `asset-sync reset` to clear cached data");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> SyncResult<()> {
    let cli = Cli::parse();
    asset_sync::init_tracing(cli.verbose);

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    debug!("Using data directory {}", data_dir.display());

    let mut settings = SyncSettings::load(&data_dir);
    if let Some(server) = cli.server {
        settings.server_url = server;
    }
    let mut state = SyncState::open(settings, &data_dir)?;

    match cli.command {
        Command::Install {
            version,
            check_server,
        } => {
            let version = version
                .or_else(|| state.settings.default_version.clone())
                .map(Version::from)
                .ok_or_else(|| SyncError::Other("no version given and no default set".into()))?;

            let report = commands::install_program(
                &mut state,
                &version,
                check_server,
                print_progress,
                |report| info!("Cached {} files", report.completed()),
            )
            .await?;
            if !report.not_needed.is_empty() {
                info!("{} optional files not provided", report.not_needed.len());
            }
            commands::write_startup_files(&state, &version, check_server).await?;
        }
        Command::Fetch {
            version,
            files,
            check_server,
        } => {
            let version = Version::from(version);
            commands::check_install_file_list(
                &state,
                &files,
                &version,
                check_server,
                print_progress,
                |report| info!("Cached {} files", report.completed()),
            )
            .await?;
        }
        Command::Remove { version, file } => {
            commands::load_file_lists(&mut state, &Version::from(version)).await?;
            if !commands::delete_installed_file_from_fs(&state, &file).await? {
                info!("{} is persistent, kept", file);
            }
        }
        Command::InitFs => commands::initialize_fs(&state).await?,
        Command::ExtractAddons { archive } => {
            let bytes = tokio::fs::read(&archive)
                .await
                .map_err(|e| SyncError::io(archive.clone(), e))?;
            let dest = state.settings.persistent_mount.addons_dir.clone();
            commands::extract_addon_archive(&state, &dest, &bytes).await?;
        }
        Command::CheckVersion => match commands::check_default_version(&mut state).await? {
            Some(version) => println!("New default version: {}", version),
            None => debug!("Default version unchanged"),
        },
        Command::ExportUserData { output, prefix } => {
            let prefix =
                prefix.unwrap_or_else(|| state.settings.persistent_mount.user_dir.clone());
            let archive = commands::export_user_data(&state, &prefix).await?;
            tokio::fs::write(&output, archive)
                .await
                .map_err(|e| SyncError::io(output.clone(), e))?;
            info!("Wrote {}", output.display());
        }
        Command::DeleteUserData { path } => {
            let removed = commands::delete_user_data(&state, &path).await?;
            info!("Removed {} entries", removed);
        }
        Command::Reset => commands::reset_program_data(&state).await,
    }

    Ok(())
}

fn print_progress(progress: asset_sync::core::downloader::FetchProgress<'_>) {
    match progress.next {
        Some(name) => eprintln!("[{}/{}] {}", progress.index, progress.total, name),
        None => eprintln!("[{}/{}] done", progress.index, progress.total),
    }
}
