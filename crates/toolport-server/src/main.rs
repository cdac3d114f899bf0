//! toolport Portal Server
//!
//! HTTP portal that queues tool runs for runner machines and collects
//! reports from scheduled jobs.

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use toolport_core::config::load_config;
use toolport_core::tracing_init::init_tracing;
use toolport_core::PortalConfig;
use toolport_server::auth::{JwtManager, claims, mint_secret};
use toolport_server::dispatch::lease::spawn_lease_sweeper;
use toolport_server::server::{AppState, build_router};
use toolport_server::storage::{NewTool, PortalDatabase};

#[derive(Parser, Debug)]
#[command(name = "toolport-server")]
#[command(version, about = "toolport portal server - run queue, runner protocol and job ingestion")]
struct Cli {
    /// Config file (TOML). Defaults to `~/.toolport/server.toml` when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to `SQLite` database file.
    #[arg(long, global = true, env = "TOOLPORT_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default).
    Serve(ServeArgs),
    /// Register and manage runner machines.
    #[command(subcommand)]
    Machine(MachineCommand),
    /// Manage the tool catalog projection.
    #[command(subcommand)]
    Tool(ToolCommand),
    /// Issue access tokens.
    #[command(subcommand)]
    Token(TokenCommand),
}

#[derive(clap::Args, Debug, Default)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Externally reachable base URL handed to runners for callbacks.
    #[arg(long)]
    public_url: Option<String>,

    /// Maximum seconds a run may stay running before it is failed. 0 disables.
    #[arg(long)]
    max_running_secs: Option<i64>,
}

#[derive(Subcommand, Debug)]
enum MachineCommand {
    /// Register a machine and print its key. The key is shown only once.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        id: Option<String>,
    },
    Enable { id: String },
    Disable { id: String },
}

#[derive(Subcommand, Debug)]
enum ToolCommand {
    /// Add a tool to the catalog projection.
    Add {
        #[arg(long)]
        name: String,
        /// exe, bat, python_runner, pad, excel, bi, folder, folder_set, shortcut, ...
        #[arg(long = "type")]
        tool_type: String,
        #[arg(long)]
        target: Option<String>,
        /// JSON copied into each run's payload at claim time.
        #[arg(long)]
        run_config: Option<String>,
        /// open, queue or helper.
        #[arg(long, default_value = "queue")]
        mode: String,
        #[arg(long)]
        id: Option<String>,
    },
    Archive { id: String },
}

#[derive(Subcommand, Debug)]
enum TokenCommand {
    /// Issue an access token for a user.
    Issue {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        username: Option<String>,
        #[arg(long, default_value = claims::ROLE_USER)]
        role: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(env!("CARGO_CRATE_NAME"), cli.log_json);

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(path) = cli.db_path {
        config.server.database_path = Some(path);
    }

    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => serve(config, args).await,
        Command::Machine(cmd) => machine(&open_db(&config).await?, cmd).await,
        Command::Tool(cmd) => tool(&open_db(&config).await?, cmd).await,
        Command::Token(cmd) => token(&config, cmd),
    }
}

async fn open_db(config: &PortalConfig) -> anyhow::Result<PortalDatabase> {
    let path = config
        .database_path()
        .context("Cannot determine home directory; pass --db-path")?;
    info!(path = %path.display(), "Opening portal database");
    Ok(PortalDatabase::open(&path).await?)
}

async fn serve(mut config: PortalConfig, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(url) = args.public_url {
        config.server.public_url = url;
    }
    if let Some(secs) = args.max_running_secs {
        config.dispatch.max_running_secs = secs;
    }
    if config.auth.webhook_secret.is_none() {
        tracing::warn!("No webhook secret configured; ingestion endpoints will answer 500");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.server.addr,
        public_url = %config.server.public_url,
        "Starting toolport-server"
    );

    let db = open_db(&config).await?;
    let sweeper = spawn_lease_sweeper(
        db.clone(),
        config.dispatch.max_running_secs,
        config.dispatch.lease_sweep_interval_secs,
    );

    let app = build_router(AppState::new(db, &config));
    let listener = tokio::net::TcpListener::bind(config.server.addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.addr))?;

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    sweeper.abort();
    info!("Portal stopped");
    Ok(())
}

async fn machine(db: &PortalDatabase, cmd: MachineCommand) -> anyhow::Result<()> {
    match cmd {
        MachineCommand::Add { name, id } => {
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let (key, key_hash) = mint_secret();
            db.create_machine(&id, &name, &key_hash).await?;
            info!(machine_id = %id, name = %name, "Machine registered");
            let mut out = std::io::stdout().lock();
            writeln!(out, "machine_id: {id}")?;
            writeln!(out, "machine_key: {key}")?;
            writeln!(out, "Store the key now; it cannot be shown again.")?;
        }
        MachineCommand::Enable { id } => set_enabled(db, &id, true).await?,
        MachineCommand::Disable { id } => set_enabled(db, &id, false).await?,
    }
    Ok(())
}

async fn set_enabled(db: &PortalDatabase, id: &str, enabled: bool) -> anyhow::Result<()> {
    if !db.set_machine_enabled(id, enabled).await? {
        anyhow::bail!("Machine {id} not found");
    }
    info!(machine_id = %id, enabled, "Machine updated");
    Ok(())
}

async fn tool(db: &PortalDatabase, cmd: ToolCommand) -> anyhow::Result<()> {
    match cmd {
        ToolCommand::Add {
            name,
            tool_type,
            target,
            run_config,
            mode,
            id,
        } => {
            if !matches!(mode.as_str(), "open" | "queue" | "helper") {
                anyhow::bail!("mode must be one of open, queue, helper");
            }
            if let Some(raw) = run_config.as_deref() {
                serde_json::from_str::<serde_json::Value>(raw).context("run_config is not valid JSON")?;
            }
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let tool = db
                .create_tool(&NewTool {
                    id: &id,
                    name: &name,
                    tool_type: &tool_type,
                    target: target.as_deref(),
                    run_config: run_config.as_deref(),
                    execution_mode: &mode,
                })
                .await?;
            writeln!(std::io::stdout().lock(), "tool_id: {}", tool.id)?;
        }
        ToolCommand::Archive { id } => {
            if !db.set_tool_archived(&id, true).await? {
                anyhow::bail!("Tool {id} not found");
            }
            info!(tool_id = %id, "Tool archived");
        }
    }
    Ok(())
}

fn token(config: &PortalConfig, cmd: TokenCommand) -> anyhow::Result<()> {
    let TokenCommand::Issue {
        user_id,
        username,
        role,
    } = cmd;
    if ![claims::ROLE_USER, claims::ROLE_OPERATOR, claims::ROLE_ADMIN].contains(&role.as_str()) {
        anyhow::bail!("role must be one of user, operator, admin");
    }
    let jwt = JwtManager::new(config.auth.jwt_secret.as_bytes(), config.auth.access_ttl_secs);
    let username = username.unwrap_or_else(|| user_id.clone());
    let (token, ttl) = jwt.issue_access_token(&user_id, &username, &role)?;
    let mut out = std::io::stdout().lock();
    writeln!(out, "{token}")?;
    writeln!(out, "expires_in: {ttl}s")?;
    Ok(())
}
