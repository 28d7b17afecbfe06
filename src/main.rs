use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shardctl::config::{Config, ConfigError};
use shardctl::models::{GroupId, ServerRole, SlotId, SlotStatus};
use shardctl::{ClusterContext, MigrationTask, PreflightVerdict};

#[derive(Parser)]
#[command(name = "shardctl")]
#[command(about = "Slot migration control plane for sharded key-value clusters")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/shardctl.toml")]
    config: PathBuf,

    /// Override the configured log level
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Slot management and migration
    #[command(subcommand)]
    Slot(SlotCommand),
    /// Server group management
    #[command(subcommand)]
    Server(ServerCommand),
    /// Generate an example configuration file
    Config {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show who holds the cluster lock
    Unlock {
        /// Remove the lock whoever holds it; only once that process is known dead
        #[arg(long)]
        force: bool,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum SlotCommand {
    /// Create all slots offline and unassigned
    Init {
        /// Reset slots that already exist
        #[arg(short, long)]
        force: bool,
    },
    /// Print one slot as JSON
    Info { slot: SlotId },
    /// Assign one slot
    Set {
        slot: SlotId,
        group: GroupId,
        status: SlotStatus,
    },
    /// Assign a slot range
    RangeSet {
        from: SlotId,
        to: SlotId,
        group: GroupId,
        status: SlotStatus,
    },
    /// Move a slot range to another group
    Migrate(MigrateArgs),
}

#[derive(Args)]
struct MigrateArgs {
    from: SlotId,
    to: SlotId,
    group: GroupId,
    /// Pause between migration steps, in milliseconds
    #[arg(short, long, default_value_t = 0)]
    delay: u64,
}

#[derive(Subcommand)]
enum ServerCommand {
    /// Print all groups as JSON
    List,
    /// Add a server to a group, creating the group if needed
    Add {
        group: GroupId,
        addr: String,
        /// master or slave; the first server of a group defaults to master
        #[arg(short, long)]
        role: Option<ServerRole>,
    },
    /// Remove a server from a group
    Remove { group: GroupId, addr: String },
    /// Remove a group that no longer serves slots
    RemoveGroup { group: GroupId },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config { output } => generate_config(output),
        Commands::Validate { config } => validate_config(config),
        Commands::Version => {
            show_version();
            Ok(())
        }
        Commands::Slot(command) => {
            let context = open_context(&cli.config, cli.log_level.as_deref()).await?;
            run_slot_command(&context, command).await
        }
        Commands::Server(command) => {
            let context = open_context(&cli.config, cli.log_level.as_deref()).await?;
            run_server_command(&context, command).await
        }
        Commands::Unlock { force } => {
            let context = open_context(&cli.config, cli.log_level.as_deref()).await?;
            run_unlock(&context, force).await
        }
    }
}

async fn open_context(config_path: &Path, log_level: Option<&str>) -> Result<ClusterContext> {
    let config = Config::load_from_file(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    init_logging(&config, log_level)?;
    info!(
        config = ?config_path,
        product = %config.coordinator.product,
        "shardctl v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    ClusterContext::open(config)
        .await
        .context("Failed to open coordination store")
}

async fn run_slot_command(context: &ClusterContext, command: SlotCommand) -> Result<()> {
    let admin = context.admin();

    match command {
        SlotCommand::Init { force } => {
            admin
                .init_slots(context.config().cluster.slot_num, force)
                .await?;
            println!("Initialized {} slots", context.config().cluster.slot_num);
        }
        SlotCommand::Info { slot } => {
            let slot = admin.slot_info(slot).await?;
            println!("{}", serde_json::to_string_pretty(&slot)?);
        }
        SlotCommand::Set {
            slot,
            group,
            status,
        } => admin.set_slot(slot, group, status).await?,
        SlotCommand::RangeSet {
            from,
            to,
            group,
            status,
        } => admin.set_slot_range(from, to, group, status).await?,
        SlotCommand::Migrate(args) => run_migration(context, args).await?,
    }

    Ok(())
}

async fn run_migration(context: &ClusterContext, args: MigrateArgs) -> Result<()> {
    let orchestrator = context.orchestrator();
    let mut task = MigrationTask::new(args.from, args.to, args.group, args.delay)?;

    if let PreflightVerdict::Reattach { slot } = orchestrator.preflight(&task).await? {
        info!(slot, "Continuing the migration already in progress");
    }

    let stop = task.stop_token();
    let interrupt = tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown signal received, stopping after the current step");
        stop.cancel();
    });

    let result = orchestrator.run(&mut task).await;
    interrupt.abort();

    println!("{}", serde_json::to_string_pretty(&task)?);
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_stopped() => {
            println!("Migration stopped at {}%", task.percent);
            Ok(())
        }
        Err(e) => Err(e).context(format!("Migration task {} failed", task.id)),
    }
}

/// Wait for ctrl-c, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn run_unlock(context: &ClusterContext, force: bool) -> Result<()> {
    let admin = context.admin();

    if !force {
        match admin.lock_owner().await? {
            Some(holder) => println!("Cluster lock held by {}", holder),
            None => println!("Cluster lock is free"),
        }
        return Ok(());
    }

    match admin.force_unlock().await? {
        Some(holder) => println!("Removed cluster lock held by {}", holder),
        None => println!("Cluster lock is free"),
    }
    Ok(())
}

async fn run_server_command(context: &ClusterContext, command: ServerCommand) -> Result<()> {
    let admin = context.admin();

    match command {
        ServerCommand::List => {
            let groups = admin.list_groups().await?;
            println!("{}", serde_json::to_string_pretty(&groups)?);
        }
        ServerCommand::Add { group, addr, role } => {
            let group = admin.add_server(group, &addr, role).await?;
            println!("{}", serde_json::to_string_pretty(&group)?);
        }
        ServerCommand::Remove { group, addr } => {
            if !admin.remove_server(group, &addr).await? {
                println!("{} is not a member of group {}", addr, group);
            }
        }
        ServerCommand::RemoveGroup { group } => admin.remove_group(group).await?,
    }

    Ok(())
}

fn generate_config(output: PathBuf) -> Result<()> {
    println!("Generating configuration file: {:?}", output);

    Config::create_example_config(&output).context("Failed to generate config")?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  shardctl --config {:?} slot init", output);

    Ok(())
}

fn validate_config(config_path: PathBuf) -> Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid");
            println!("  Coordinator: {:?} at {:?}", config.coordinator.kind, config.coordinator.path);
            println!("  Product: {}", config.coordinator.product);
            println!("  Slots: {}", config.cluster.slot_num);
            println!(
                "  Migration: {:?} mode, batch {}, master wait {}s",
                config.migration.mode, config.migration.batch_size, config.migration.master_wait_sec
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
            }
            Err(e.into())
        }
    }
}

fn show_version() {
    println!("shardctl v{}", env!("CARGO_PKG_VERSION"));
    println!("Slot migration control plane for sharded key-value clusters");
    println!();
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Features:");
    println!("  • Cluster-locked slot migration with stop and resume");
    println!("  • Partition-wise (MIGRATEDB) and key-wise (SCAN + MIGRATE) data movement");
    println!("  • File-backed coordination store shared across operator hosts");
}

fn init_logging(config: &Config, override_level: Option<&str>) -> Result<()> {
    let filter = match override_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.logging.level))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let compact = config.logging.format == "compact";

    match &config.logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path))?;
            let builder = builder.with_ansi(false).with_writer(Mutex::new(file));
            if compact {
                builder.compact().init();
            } else {
                builder.init();
            }
        }
        None => {
            let builder = builder.with_writer(std::io::stderr);
            if compact {
                builder.compact().init();
            } else {
                builder.init();
            }
        }
    }

    Ok(())
}
