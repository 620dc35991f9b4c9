//! pgsnap: snapshot and restore a local or hosted PostgreSQL database.
//!
//! Provides the CLI over the backup/restore engine

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

use pgsnap::config::{ConfigStore, DEFAULT_CONFIG_FILE, LocalConfig, ToolsConfig};
use pgsnap::progress::{ChannelObserver, Event, LogLevel};
use pgsnap::restore::RestoreSelection;
use pgsnap::{ArtifactKind, Engine, Target};

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "pgsnap", version, about = "Backup and restore a local or cloud database")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the local instance and test connections
    Status,
    /// List backups, newest first
    List,
    /// Dump roles, schema, data and storage policies
    Backup { target: Target },
    /// Restore a backup into a target
    Restore(RestoreArgs),
    /// Show or change the stored configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Args)]
struct RestoreArgs {
    target: Target,

    /// Backup directory to restore from
    #[arg(conflicts_with = "latest")]
    path: Option<PathBuf>,

    /// Restore the newest backup
    #[arg(long)]
    latest: bool,

    /// Restore only these artifacts (roles, schema, data, storage)
    #[arg(long = "only", value_name = "KIND")]
    only: Vec<ArtifactKind>,

    /// Skip the safety backup taken before restoring
    #[arg(long)]
    no_auto_backup: bool,

    /// Stop the data step at the first conflicting row
    #[arg(long)]
    no_skip_conflicts: bool,
}

#[derive(Subcommand)]
enum ConfigCommand {
    Show,
    /// Set the cloud connection url and password
    Cloud { url: String, password: String },
    /// Set the local connection parameters
    Local {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        database: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    /// Set the directory backups are written to
    DumpDir { path: PathBuf },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    match run_app(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(cli: Cli) -> Result<()> {
    let mut store = ConfigStore::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    match cli.command {
        Command::Config { action } => run_config(&mut store, action),
        Command::Status => status(&build_engine(&store)).await,
        Command::List => {
            list(&build_engine(&store));
            Ok(())
        }
        Command::Backup { target } => backup(build_engine(&store), target).await,
        Command::Restore(args) => restore(build_engine(&store), args).await,
    }
}

fn build_engine(store: &ConfigStore) -> Arc<Engine> {
    Arc::new(Engine::new(store.config().clone(), ToolsConfig::default()))
}

async fn status(engine: &Engine) -> Result<()> {
    let local = engine.discover_local().await;
    if local.is_running {
        println!(
            "🟢 Local instance running at {}:{} (database '{}', user '{}')",
            local.host, local.port, local.database, local.user
        );
        let ok = engine.check_connection(Target::Local, CONNECTION_TIMEOUT).await?;
        println!("{} Local connection", if ok { "✅" } else { "❌" });
    } else {
        println!("⚪ Local instance not running");
    }

    if engine.config().cloud.validate().is_ok() {
        let ok = engine.check_connection(Target::Cloud, CONNECTION_TIMEOUT).await?;
        println!("{} Cloud connection", if ok { "✅" } else { "❌" });
    } else {
        println!("⚪ Cloud connection not configured");
    }
    Ok(())
}

fn list(engine: &Engine) {
    let records = engine.catalog().list();
    if records.is_empty() {
        println!("No backups found in {}", engine.dump_dir().display());
        return;
    }
    for record in records {
        println!(
            "📦 {}  {:<5}  {}  {}/{} files",
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record.environment,
            record.name,
            record.artifacts().len(),
            ArtifactKind::ALL.len()
        );
    }
}

async fn backup(engine: Arc<Engine>, target: Target) -> Result<()> {
    let (observer, events) = ChannelObserver::new();
    let printer = tokio::spawn(print_events(events));
    let interrupt = watch_interrupt(engine.clone());

    let result = engine.backup().backup(target, &observer).await;
    interrupt.abort();
    drop(observer);
    printer.await.context("Event printer failed")?;

    let path = result.context("Backup failed")?;
    println!("✅ Backup stored in {}", path.display());
    Ok(())
}

async fn restore(engine: Arc<Engine>, args: RestoreArgs) -> Result<()> {
    let source = match (args.path, args.latest) {
        (Some(path), _) => path,
        (None, true) => engine
            .catalog()
            .latest()
            .map(|record| record.path)
            .with_context(|| format!("No backups found in {}", engine.dump_dir().display()))?,
        (None, false) => bail!("Specify a backup directory or --latest"),
    };

    let mut selection = match args.only.as_slice() {
        [] => RestoreSelection::all(),
        [kind] => RestoreSelection::only(*kind),
        kinds => RestoreSelection::of(kinds.iter().copied()).with_skip_conflicts(true),
    };
    if args.no_auto_backup {
        selection = selection.with_auto_backup(false);
    }
    if args.no_skip_conflicts {
        selection = selection.with_skip_conflicts(false);
    }

    let (observer, events) = ChannelObserver::new();
    let printer = tokio::spawn(print_events(events));
    let interrupt = watch_interrupt(engine.clone());

    let result = engine
        .restore()
        .restore(args.target, &source, &selection, &observer)
        .await;
    interrupt.abort();
    drop(observer);
    printer.await.context("Event printer failed")?;

    let report = result.context("Restore failed")?;
    if let Some(safety) = &report.safety_backup {
        println!("🛟 Safety backup stored in {}", safety.display());
    }
    for (kind, error) in &report.failed {
        println!("⚠️ {} not restored: {}", kind.file_name(), error);
    }
    println!(
        "✅ Restored {}/{} artifacts into {}",
        report.restored.len(),
        selection.kinds.len(),
        report.target
    );
    Ok(())
}

fn run_config(store: &mut ConfigStore, action: ConfigCommand) -> Result<()> {
    match action {
        ConfigCommand::Show => {
            let mut shown = store.config().clone();
            if !shown.cloud.password.is_empty() {
                shown.cloud.password = "*****".to_string();
            }
            if !shown.local.password.is_empty() {
                shown.local.password = "*****".to_string();
            }
            println!("# {}", store.path().display());
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        ConfigCommand::Cloud { url, password } => {
            store.set_cloud(url, password)?;
            match store.config().cloud.validate() {
                Ok(()) => println!("✅ Cloud connection saved"),
                Err(e) => println!("⚠️ Saved, but {}", e),
            }
        }
        ConfigCommand::Local {
            host,
            port,
            user,
            database,
            password,
        } => {
            let current = store.config().local.clone();
            let local = LocalConfig {
                host: host.unwrap_or(current.host),
                port: port.unwrap_or(current.port),
                user: user.unwrap_or(current.user),
                database: database.unwrap_or(current.database),
                password: password.unwrap_or(current.password),
            };
            local.validate()?;
            store.set_local(local)?;
            println!("✅ Local connection saved");
        }
        ConfigCommand::DumpDir { path } => {
            store.set_dump_dir(path)?;
            println!(
                "✅ Backups will be written to {}",
                store.config().backup.dump_dir.display()
            );
        }
    }
    Ok(())
}

// Ctrl-C terminates the running step instead of leaving it behind.
fn watch_interrupt(engine: Arc<Engine>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("🛑 Interrupted, terminating the running step...");
            engine.kill_all();
        }
    })
}

async fn print_events(mut events: UnboundedReceiver<Event>) {
    while let Some(event) = events.recv().await {
        match event {
            Event::Progress { percent, label } => println!("📊 {:>5.1}%  {}", percent, label),
            Event::Log { line, level } => match level {
                LogLevel::Info | LogLevel::Success => println!("{}", line),
                LogLevel::Warning => eprintln!("  {}", line),
                LogLevel::Error => eprintln!("  ❗ {}", line),
            },
        }
    }
}
