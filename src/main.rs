//! share-storage command line entry point

use std::path::PathBuf;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use share_storage::config::{Config, MountConfig, TransportConfig};
use share_storage::share::local::LocalTransport;
use share_storage::share::memory::{MemoryShare, MemoryTransport};
use share_storage::share::{Dependencies, Transport};
use share_storage::translate::stream_failure;
use share_storage::{ShareStorage, Storage, StorageError};

/// Print usage information
fn print_usage() {
    eprintln!("Usage: share-storage <config.yaml> <mount> <command> [args]");
    eprintln!();
    eprintln!("share-storage - operate on a remote share through the storage adapter");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  ls [path]        List a directory");
    eprintln!("  stat <path>      Show type, size, mtime and permissions");
    eprintln!("  cat <path>       Write a file to stdout");
    eprintln!("  put <path>       Replace a file with stdin");
    eprintln!("  append <path>    Append stdin to a file");
    eprintln!("  rm <path>        Delete a file or directory tree");
    eprintln!("  mkdir <path>     Create a directory");
    eprintln!("  mv <from> <to>   Rename, replacing the target");
    eprintln!("  touch <path>     Create an empty file if missing");
    eprintln!("  check            Probe dependencies and share health");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  share-storage /etc/share-storage/config.yaml projects ls docs");
}

enum Command {
    List(String),
    Stat(String),
    Cat(String),
    Put(String),
    Append(String),
    Remove(String),
    Mkdir(String),
    Move(String, String),
    Touch(String),
    Check,
}

impl Command {
    fn parse(name: &str, args: &[String]) -> Option<Self> {
        let path = |i: usize| args.get(i).cloned();
        let command = match (name, args.len()) {
            ("ls", 0) => Command::List(String::new()),
            ("ls", 1) => Command::List(path(0)?),
            ("stat", 1) => Command::Stat(path(0)?),
            ("cat", 1) => Command::Cat(path(0)?),
            ("put", 1) => Command::Put(path(0)?),
            ("append", 1) => Command::Append(path(0)?),
            ("rm", 1) => Command::Remove(path(0)?),
            ("mkdir", 1) => Command::Mkdir(path(0)?),
            ("mv", 2) => Command::Move(path(0)?, path(1)?),
            ("touch", 1) => Command::Touch(path(0)?),
            ("check", 0) => Command::Check,
            _ => return None,
        };
        Some(command)
    }
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        print_usage();
        std::process::exit(1);
    }

    let config_path = PathBuf::from(&args[1]);
    let config = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!("Loaded configuration from {:?}", config_path);

    let Some(mount) = config.mount(&args[2]) else {
        eprintln!("No mount named {:?} in {:?}", args[2], config_path);
        std::process::exit(1);
    };

    let Some(command) = Command::parse(&args[3], &args[4..]) else {
        print_usage();
        std::process::exit(1);
    };

    let transport = transport_for(mount);
    if let Err(e) = run(transport.as_ref(), mount, command).await {
        error!("{} on mount {} failed: {}", args[3], mount.name, e);
        eprintln!("{}: {}", args[3], e);
        std::process::exit(if e.is_unavailable() { 2 } else { 1 });
    }
}

/// Build the transport a mount is configured with
fn transport_for(mount: &MountConfig) -> Box<dyn Transport> {
    match &mount.transport {
        TransportConfig::Local { base_dir } => Box::new(LocalTransport::new(base_dir.clone())),
        TransportConfig::Memory => {
            let name = mount
                .share
                .share
                .as_deref()
                .unwrap_or_default()
                .trim_matches('/');
            Box::new(MemoryTransport::new().with_share(Arc::new(MemoryShare::new(name))))
        }
    }
}

fn ensure(done: bool, what: &str, path: &str) -> Result<(), StorageError> {
    if done {
        Ok(())
    } else {
        Err(StorageError::Backend(format!("{} {} failed", what, path)))
    }
}

async fn run(transport: &dyn Transport, mount: &MountConfig, command: Command) -> Result<(), StorageError> {
    if let Command::Check = command {
        if let Dependencies::Missing(missing) = ShareStorage::check_dependencies(transport) {
            return Err(StorageError::Config(format!(
                "{} transport unavailable: {}",
                transport.kind(),
                missing.join(", ")
            )));
        }
    }

    let storage = ShareStorage::connect(transport, &mount.share).await?;
    info!("Using mount {} ({})", mount.name, storage.id());

    match command {
        Command::Check => {
            println!("id: {}", storage.id());
            let healthy = storage.test().await?;
            println!("healthy: {}", healthy);
            ensure(healthy, "health check of", &mount.name)
        }
        Command::List(path) => {
            for name in storage.list_dir(&path).await? {
                let child = if path.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", path.trim_end_matches('/'), name)
                };
                let marker = if storage.is_dir(&child).await? { "/" } else { "" };
                println!("{}{}", name, marker);
            }
            Ok(())
        }
        Command::Stat(path) => {
            let kind = storage
                .file_type(&path)
                .await?
                .ok_or_else(|| StorageError::InvalidArgument(format!("{}: not found", path)))?;
            let stat = storage.stat(&path).await?.unwrap_or(share_storage::StatInfo {
                size: 0,
                mtime: UNIX_EPOCH,
            });
            let mtime = stat
                .mtime
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            println!("type: {}", kind.as_str());
            println!("size: {}", stat.size);
            println!("mtime: {}", mtime);
            println!("readable: {}", storage.is_readable(&path).await?);
            println!("updatable: {}", storage.is_updatable(&path).await?);
            println!("deletable: {}", storage.is_deletable(&path).await?);
            Ok(())
        }
        Command::Cat(path) => {
            let mut handle = storage
                .open(&path, "r")
                .await?
                .ok_or_else(|| StorageError::InvalidArgument(format!("{}: not found", path)))?;
            let mut stdout = tokio::io::stdout();
            tokio::io::copy(&mut handle, &mut stdout)
                .await
                .map_err(|e| stream_failure("read", e))?;
            stdout.flush().await?;
            handle.close().await
        }
        Command::Put(path) => upload(&storage, &path, "w").await,
        Command::Append(path) => upload(&storage, &path, "a").await,
        Command::Remove(path) => ensure(storage.remove(&path).await?, "rm", &path),
        Command::Mkdir(path) => ensure(storage.mkdir(&path).await?, "mkdir", &path),
        Command::Move(from, to) => ensure(storage.rename(&from, &to).await?, "mv", &from),
        Command::Touch(path) => ensure(storage.touch(&path).await?, "touch", &path),
    }
}

/// Stream stdin into `path` opened with `mode`
async fn upload(storage: &ShareStorage, path: &str, mode: &str) -> Result<(), StorageError> {
    let mut handle = storage
        .open(path, mode)
        .await?
        .ok_or_else(|| StorageError::PermissionDenied(path.to_string()))?;
    let copied = tokio::io::copy(&mut tokio::io::stdin(), &mut handle)
        .await
        .map_err(|e| stream_failure("write", e))?;
    handle.close().await?;
    debug!("wrote {} bytes to {}", copied, path);
    Ok(())
}
