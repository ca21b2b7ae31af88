use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use shardgraph::automation::{self, TASK_NAMES, TaskContainer};
use shardgraph::{
    LockScope, MemoryTopoServer, RebuildConfig, RebuildDriver, RebuildEngine, TabletRole,
    TopoServer,
};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "topo-tool")]
#[command(about = "Operator tooling for serving-graph rebuilds over a topology snapshot file")]
struct Cli {
    /// Topology snapshot (JSON) to operate on.
    #[arg(long, global = true, default_value = "topology.json")]
    state: PathBuf,

    /// Overrides SHARDGRAPH_LOCK_SCOPE.
    #[arg(long, global = true)]
    lock_scope: Option<LockScope>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    RebuildShard {
        #[arg(long)]
        keyspace: String,
        #[arg(long)]
        shard: String,
        /// Comma separated. Defaults to the cells listed on the shard.
        #[arg(long, value_delimiter = ',')]
        cells: Vec<String>,
        #[arg(long)]
        lock_timeout_ms: Option<u64>,
    },
    RebuildKeyspace {
        #[arg(long)]
        keyspace: String,
        #[arg(long, value_delimiter = ',')]
        cells: Vec<String>,
        #[arg(long)]
        lock_timeout_ms: Option<u64>,
    },
    ShowEndpoints {
        #[arg(long)]
        keyspace: String,
        #[arg(long)]
        shard: String,
        #[arg(long)]
        cell: String,
        /// Limits output to one role.
        #[arg(long)]
        role: Option<TabletRole>,
    },
    /// Runs an automation task and every task it emits.
    RunTask {
        #[arg(long)]
        name: String,
        /// Task parameter as key=value. Repeatable.
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    ListTasks,
}

fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shardgraph=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::RebuildShard {
            keyspace,
            shard,
            cells,
            lock_timeout_ms,
        } => {
            let (topo, driver) = open(&cli.state, cli.lock_scope).await?;
            let timeout = lock_timeout(&driver, lock_timeout_ms);
            let result = driver.rebuild_shard(&keyspace, &shard, &cells, timeout).await;
            // Cells that succeeded stay published even when others failed.
            save_state(&topo, &cli.state).await?;
            let changed =
                result.with_context(|| format!("Rebuild of {}/{} failed", keyspace, shard))?;
            println!("{}/{}: changed={}", keyspace, shard, changed);
        }
        Command::RebuildKeyspace {
            keyspace,
            cells,
            lock_timeout_ms,
        } => {
            let (topo, driver) = open(&cli.state, cli.lock_scope).await?;
            let timeout = lock_timeout(&driver, lock_timeout_ms);
            let report = driver
                .rebuild_keyspace(&keyspace, &cells, timeout)
                .await
                .with_context(|| format!("Rebuild of keyspace {} failed", keyspace))?;
            for shard in &report.shards {
                println!(
                    "{}/{}: changed={} failed_cells={}",
                    shard.keyspace,
                    shard.shard,
                    shard.changed(),
                    shard.failed.len()
                );
            }
            for failure in &report.failed_shards {
                println!("{}/{}: not started: {}", failure.keyspace, failure.shard, failure.source);
            }
            save_state(&topo, &cli.state).await?;
            report.into_result()?;
        }
        Command::ShowEndpoints {
            keyspace,
            shard,
            cell,
            role,
        } => {
            let topo = load_state(&cli.state).await?;
            show_endpoints(&topo, &keyspace, &shard, &cell, role).await?;
        }
        Command::RunTask { name, params } => {
            let (topo, driver) = open(&cli.state, cli.lock_scope).await?;
            let container = TaskContainer {
                name,
                parameters: params.into_iter().collect(),
            };
            let result = run_task_queue(container, &driver).await;
            save_state(&topo, &cli.state).await?;
            result?;
        }
        Command::ListTasks => {
            for name in TASK_NAMES {
                println!("{}", name);
            }
        }
    }
    Ok(())
}

/// Loads the snapshot and builds a driver over it from SHARDGRAPH_* settings.
async fn open(
    path: &Path,
    lock_scope: Option<LockScope>,
) -> Result<(MemoryTopoServer, RebuildDriver)> {
    let topo = load_state(path).await?;
    let mut config = RebuildConfig::from_env().context("Invalid SHARDGRAPH_* environment")?;
    if let Some(scope) = lock_scope {
        config = config.lock_scope(scope);
    }
    let engine = RebuildEngine::new(Arc::new(topo.clone()));
    let driver = RebuildDriver::new(engine, config).context("Invalid rebuild configuration")?;
    Ok((topo, driver))
}

fn lock_timeout(driver: &RebuildDriver, override_ms: Option<u64>) -> Duration {
    override_ms
        .map(Duration::from_millis)
        .unwrap_or(driver.config().lock_timeout)
}

async fn load_state(path: &Path) -> Result<MemoryTopoServer> {
    if !path.exists() {
        bail!("Topology snapshot '{}' does not exist", path.display());
    }
    MemoryTopoServer::load(path)
        .await
        .with_context(|| format!("Failed to load topology snapshot '{}'", path.display()))
}

async fn save_state(topo: &MemoryTopoServer, path: &Path) -> Result<()> {
    topo.save(path)
        .await
        .with_context(|| format!("Failed to write topology snapshot '{}'", path.display()))
}

async fn show_endpoints(
    topo: &MemoryTopoServer,
    keyspace: &str,
    shard: &str,
    cell: &str,
    role: Option<TabletRole>,
) -> Result<()> {
    let roles = match role {
        Some(role) => vec![role],
        None => topo.get_endpoint_set_roles(cell, keyspace, shard).await?,
    };
    if roles.is_empty() {
        println!("no serving graph for {}/{} in {}", keyspace, shard, cell);
        return Ok(());
    }
    for role in roles {
        let set = topo
            .get_endpoint_set(cell, keyspace, shard, role)
            .await
            .map_err(|err| anyhow!("{} endpoints: {}", role, err))?;
        println!("{} ({}):", role, set.entries.len());
        for entry in &set.entries {
            let ports = entry
                .port_map
                .iter()
                .map(|(name, port)| format!("{}={}", name, port))
                .collect::<Vec<_>>()
                .join(",");
            println!("  {} {} [{}]", entry.alias, entry.host, ports);
        }
    }
    Ok(())
}

/// Emitted tasks run right after the task that emitted them, in emission order.
async fn run_task_queue(first: TaskContainer, driver: &RebuildDriver) -> Result<()> {
    let mut queue = VecDeque::from([first]);
    while let Some(container) = queue.pop_front() {
        let output = automation::run_task(&container, driver.clone())
            .await
            .with_context(|| format!("Task {} failed", container.name))?;
        if !output.output.is_empty() {
            println!("[{}] {}", container.name, output.output);
        }
        for task in output.new_tasks.into_iter().rev() {
            queue.push_front(task);
        }
    }
    Ok(())
}
