//! CloudSave - command line client
//!
//! Tracks game save directories, archives them into versioned snapshots and
//! keeps them in sync with a CloudSave server.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cloudsave::config::{Config, ConflictPolicy};
use cloudsave::remote::{Connector, HttpConnector};
use cloudsave::repository;
use cloudsave::scanner::{ScanOutcome, Scanner};
use cloudsave::service::Service;
use cloudsave::sync::{
    ConflictInfo, ConflictResolver, PolicyResolver, Reconciler, Resolution, SyncOutcome,
    SyncStatus,
};
use cloudsave::utils;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Datastore directory (overrides config)
    #[arg(short, long, value_name = "DIR")]
    datastore: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a save directory
    Add {
        path: PathBuf,
        /// Display name (defaults to the directory name)
        #[arg(short, long)]
        name: Option<String>,
    },
    /// List registered saves, or the saves stored on a remote
    List {
        #[arg(short, long, value_name = "URL")]
        remote: Option<String>,
    },
    /// Show one save and its backups
    Show { game_id: String },
    /// Archive every save whose directory changed
    Run,
    /// Forget a save, including its archives and backups
    Remove { game_id: String },
    /// Manage remote links
    Remote {
        #[command(subcommand)]
        command: RemoteCommand,
    },
    /// Synchronize every save with its remote
    Sync,
    /// Restore the current archive, or a backup, into the save directory
    Apply {
        game_id: String,
        backup_id: Option<String>,
    },
    /// Fetch a save that only exists on a remote
    Pull {
        url: String,
        game_id: String,
        /// Directory that will contain the restored save directory
        parent: PathBuf,
    },
    /// Print client (and optionally server) version
    Version {
        #[arg(short, long, value_name = "URL")]
        remote: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum RemoteCommand {
    /// Link a save to a remote
    Set { game_id: String, url: String },
    /// List every save with its remote
    List,
}

/// Asks on the terminal: `[M: My, T: Their, A: Abort]`.
struct PromptResolver;

impl ConflictResolver for PromptResolver {
    fn resolve(&self, conflict: &ConflictInfo) -> Resolution {
        println!();
        println!("--- /!\\ CONFLICT ---");
        println!("{} ({})", conflict.name, conflict.game_id);
        println!("----");
        println!("Your version:  {}", conflict.local_date.to_rfc2822());
        println!("Their version: {}", conflict.remote_date.to_rfc2822());
        println!();
        print!("[M: My, T: Their, A: Abort]: ");
        if io::stdout().flush().is_err() {
            return Resolution::Abort;
        }

        // Resolvers run inside the reconcile future; free the worker while waiting
        let mut answer = String::new();
        let read = tokio::task::block_in_place(|| io::stdin().lock().read_line(&mut answer));
        if read.is_err() {
            return Resolution::Abort;
        }

        parse_answer(&answer)
    }
}

fn parse_answer(answer: &str) -> Resolution {
    match answer.trim().to_lowercase().as_str() {
        "m" => Resolution::KeepLocal,
        "t" => Resolution::TakeRemote,
        _ => Resolution::Abort,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(datastore) = args.datastore {
        config.datastore.path = datastore;
    }

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    let repository = repository::open(&config.datastore.path, config.datastore.mode)
        .with_context(|| format!("failed to open datastore {}", config.datastore.path.display()))?;
    let scanner = Scanner::new(repository.clone())
        .with_compression_level(config.archive.compression_level)
        .with_max_backups(config.backup.max_backups);
    let service = Service::new(repository.clone()).with_scanner(scanner);

    match args.command {
        Command::Add { path, name } => {
            let name = match name {
                Some(name) => name,
                None => path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .context("cannot derive a name from the path, use --name")?,
            };
            let game_id = service.add(&name, &path)?;
            println!("{}", game_id);
        }

        Command::List { remote: None } => {
            for record in service.all_games()? {
                println!("{}  {}  v{}  {}", record.id, record.name, record.version, record.path.display());
            }
        }

        Command::List { remote: Some(url) } => {
            let client = HttpConnector::from_config(&config).connect(&url)?;
            for record in client.list_games().await? {
                println!("{}  {}  v{}  {}", record.id, record.name, record.version, record.date.to_rfc2822());
            }
        }

        Command::Show { game_id } => {
            let record = service.one(&game_id)?;
            println!("{}", record.name);
            println!("------");
            println!("Version: {}", record.version);
            println!("Date:    {}", record.date.to_rfc2822());
            println!("Path:    {}", record.path.display());
            println!("Hash:    {}", record.hash.as_deref().unwrap_or("-"));
            if let Some(remote) = service.remote(&game_id)? {
                println!("Remote:  {}", remote.url);
            }

            let backups = service.all_backups(&game_id)?;
            if !backups.is_empty() {
                println!();
                println!("Backups:");
                for backup in backups {
                    println!("  {}  {}", backup.uuid, backup.created_at.to_rfc2822());
                }
            }
        }

        Command::Run => {
            let mut failed = 0;
            for (game_id, outcome) in service.scan_all()? {
                match outcome {
                    Ok(ScanOutcome::Archived { version }) => println!("{}: archived v{}", game_id, version),
                    Ok(ScanOutcome::Unchanged) => {}
                    Err(e) => {
                        failed += 1;
                        eprintln!("{}: {}", game_id, e);
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{} save(s) could not be archived", failed);
            }
        }

        Command::Remove { game_id } => service.remove(&game_id)?,

        Command::Remote { command: RemoteCommand::Set { game_id, url } } => {
            service.set_remote(&game_id, &url)?;
        }

        Command::Remote { command: RemoteCommand::List } => {
            for (record, remote) in service.all_remotes()? {
                let url = remote.map(|r| r.url).unwrap_or_else(|| "-".to_string());
                println!("{}  {}  {}", record.id, record.name, url);
            }
        }

        Command::Sync => {
            let connector = HttpConnector::from_config(&config);
            let cancel = utils::shutdown::cancel_on_signal();
            let reconciler = Reconciler::new(repository.clone())
                .with_cancellation(cancel)
                .with_max_backups(config.backup.max_backups);

            let report = match config.sync.on_conflict {
                ConflictPolicy::Prompt => reconciler.sync_all(&connector, &PromptResolver).await?,
                policy => {
                    reconciler
                        .sync_all(&connector, &PolicyResolver::from_policy(policy))
                        .await?
                }
            };

            for entry in &report.entries {
                let label = if entry.name.is_empty() { &entry.game_id } else { &entry.name };
                match &entry.status {
                    SyncStatus::Synced(synced) => {
                        let outcome = match &synced.outcome {
                            SyncOutcome::Pushed => "pushed".to_string(),
                            SyncOutcome::Pulled { version } => format!("pulled v{}", version),
                            SyncOutcome::UpToDate { .. } => "already up-to-date".to_string(),
                            SyncOutcome::Conflict { resolution, .. } => {
                                format!("conflict, {:?}", resolution)
                            }
                        };
                        println!("{}: {}", label, outcome);
                    }
                    SyncStatus::NoRemote => println!("{}: no remote configured", label),
                    SyncStatus::Unreachable(e) => eprintln!("{}: remote unreachable: {}", label, e),
                    SyncStatus::Failed(e) => eprintln!("{}: {}", label, e),
                }
            }

            report.into_result()?;
            println!("done.");
        }

        Command::Apply { game_id, backup_id } => match backup_id {
            Some(backup_id) => service.apply_backup(&game_id, &backup_id)?,
            None => service.apply_current(&game_id)?,
        },

        Command::Pull { url, game_id, parent } => {
            let client = HttpConnector::from_config(&config).connect(&url)?;
            client.ping().await.context("failed to connect to the remote")?;
            let record = service.pull_new(client.as_ref(), &url, &game_id, &parent).await?;
            println!("{}: restored to {}", record.name, record.path.display());
        }

        Command::Version { remote } => {
            println!("Client: {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            if let Some(url) = remote {
                let client = HttpConnector::from_config(&config).connect(&url)?;
                let info = client.version().await?;
                println!("Server: v{} (api v{})", info.version, info.api_version);
                println!("Server OS: {}/{}", info.os_name, info.os_architecture);
            }
        }
    }

    Ok(())
}
