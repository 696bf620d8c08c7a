mod flow_cmds;
mod init_cmd;
mod status_cmd;
mod tick_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use octopoid_db::config::DbConfig;
use octopoid_db::pool;
use octopoid_server::lease::LeaseCoordinatorConfig;
use octopoid_server::ServerConfig;

#[derive(Parser)]
#[command(name = "octopoid", about = "Distributed task orchestrator for LLM coding agents")]
struct Cli {
    /// Database URL (overrides OCTOPOID_DATABASE_URL env var; server-side
    /// commands only)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scaffold a .octopoid directory for this project
    Init {
        /// Server URL the orchestrator reports to
        #[arg(long, default_value = "http://localhost:7420")]
        server_url: String,
        /// Cluster name
        #[arg(long, default_value = "default")]
        cluster: String,
        /// Machine identifier (defaults to the hostname)
        #[arg(long)]
        machine_id: Option<String>,
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the octopoid database (create + migrate)
    DbInit,
    /// Run the server: HTTP API plus the lease coordinator
    Serve {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port
        #[arg(long, default_value_t = 7420)]
        port: u16,
        /// Lease window handed out on claim, in seconds
        #[arg(long, default_value_t = 900)]
        lease_seconds: i64,
        /// Rejections before a task routes to failed
        #[arg(long, default_value_t = 3)]
        rejection_budget: i32,
        /// Heartbeat age before an orchestrator is marked offline, in seconds
        #[arg(long, default_value_t = 300)]
        offline_seconds: u64,
        /// Coordinator scan interval, in seconds
        #[arg(long, default_value_t = 30)]
        coordinator_interval: u64,
    },
    /// Run one scheduler tick
    Tick {
        /// Project directory (defaults to the current directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Show orchestrator presence and per-blueprint state
    Status {
        /// Project directory (defaults to the current directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Flow management
    Flow {
        #[command(subcommand)]
        command: FlowCommands,
    },
}

#[derive(Subcommand)]
pub enum FlowCommands {
    /// Register every flow under .octopoid/flows/ with the server
    Register {
        /// Project directory (defaults to the current directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// List flows registered with the server
    List {
        /// Project directory (defaults to the current directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

/// Execute the `octopoid db-init` command: create database and run
/// migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let db_config = match cli_db_url {
        Some(url) => DbConfig::new(url),
        None => DbConfig::from_env(),
    };

    println!("Initializing octopoid database...");

    pool::ensure_database_exists(&db_config).await?;
    let db_pool = pool::create_pool(&db_config).await?;
    pool::run_migrations(&db_pool, pool::default_migrations_path()).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;
    println!("octopoid db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            server_url,
            cluster,
            machine_id,
            force,
        } => {
            init_cmd::run_init(&server_url, &cluster, machine_id.as_deref(), force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Serve {
            bind,
            port,
            lease_seconds,
            rejection_budget,
            offline_seconds,
            coordinator_interval,
        } => {
            let db_config = match cli.database_url.as_deref() {
                Some(url) => DbConfig::new(url),
                None => DbConfig::from_env(),
            };
            let db_pool = pool::create_pool(&db_config).await?;
            pool::run_migrations(&db_pool, pool::default_migrations_path()).await?;

            let config = ServerConfig {
                lease_seconds,
                rejection_budget,
            };
            let coordinator = LeaseCoordinatorConfig {
                interval: std::time::Duration::from_secs(coordinator_interval),
                offline_window: std::time::Duration::from_secs(offline_seconds),
            };
            octopoid_server::run_serve(db_pool, config, coordinator, &bind, port).await?;
        }
        Commands::Tick { dir } => {
            tick_cmd::run_tick(dir.as_deref()).await?;
        }
        Commands::Status { dir } => {
            status_cmd::run_status(dir.as_deref()).await?;
        }
        Commands::Flow { command } => match command {
            FlowCommands::Register { dir } => {
                flow_cmds::run_register(dir.as_deref()).await?;
            }
            FlowCommands::List { dir } => {
                flow_cmds::run_list(dir.as_deref()).await?;
            }
        },
    }

    Ok(())
}
