use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use clap::{Parser, Subcommand};

use taskmesh::core::DependencyGraph;
use taskmesh::{
    Coordinator, CoordinatorConfig, CoordinatorMetrics, Error, Executor, Result, SelectionStrategy,
    Task, TaskResult, TaskState,
};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// taskmesh - distributed task coordinator
#[derive(Parser, Debug)]
#[command(name = "taskmesh")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    TASKMESH_DEBUG=1     Enable debug logging (alternative to --debug)\n    RUST_LOG             Override the log filter")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.taskmesh/taskmesh.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Config file (defaults to ~/.taskmesh/taskmesh.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run a task file through a coordinator with simulated executors
    Run {
        /// JSON array of tasks
        #[arg(long)]
        tasks: PathBuf,

        /// Local node ID (overrides the config file)
        #[arg(long)]
        node_id: Option<String>,

        /// Node selection strategy: least_loaded, round_robin or random
        #[arg(long)]
        strategy: Option<String>,

        /// Simulated peer node, may be repeated. Peers run in-process with
        /// their own simulated executors.
        #[arg(long = "peer")]
        peers: Vec<String>,

        /// Give up after this many seconds
        #[arg(long, default_value_t = 60)]
        deadline_secs: u64,
    },

    /// Validate a task file and print a dependency order
    Check {
        /// JSON array of tasks
        #[arg(long)]
        tasks: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    taskmesh::log::init_with_debug(cli.debug);

    let config = match &cli.config {
        Some(path) => CoordinatorConfig::load_from(path)?,
        None => CoordinatorConfig::load()?,
    };

    match cli.command {
        Command::Run {
            tasks,
            node_id,
            strategy,
            peers,
            deadline_secs,
        } => {
            let config = apply_overrides(config, node_id, strategy, peers)?;
            let tasks = load_tasks(&tasks)?;
            let rt = tokio::runtime::Runtime::new()?;
            let metrics = rt.block_on(run_tasks(config, tasks, Duration::from_secs(deadline_secs)))?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
            Ok(())
        }
        Command::Check { tasks } => run_check(&load_tasks(&tasks)?),
    }
}

fn apply_overrides(
    mut config: CoordinatorConfig,
    node_id: Option<String>,
    strategy: Option<String>,
    peers: Vec<String>,
) -> Result<CoordinatorConfig> {
    if let Some(node_id) = node_id {
        config.node_id = Some(node_id);
    }
    if let Some(strategy) = strategy {
        config.strategy = strategy.parse::<SelectionStrategy>()?;
    }
    config.peers.extend(peers);
    config.validate()?;
    Ok(config)
}

fn load_tasks(path: &Path) -> Result<Vec<Task>> {
    let content = std::fs::read_to_string(path)?;
    let tasks: Vec<Task> = serde_json::from_str(&content)?;
    tracing::info!(path = %path.display(), count = tasks.len(), "loaded task file");
    Ok(tasks)
}

/// Validate duplicates and cycles, then print a dependency order.
fn run_check(tasks: &[Task]) -> Result<()> {
    let mut seen = HashSet::new();
    let mut graph = DependencyGraph::new();
    let mut problems = 0;

    for task in tasks {
        if !seen.insert(task.task_id.clone()) {
            println!("duplicate task id: {}", task.task_id);
            problems += 1;
            continue;
        }
        if let Err(e) = graph.insert(&task.task_id, &task.dependencies) {
            println!("{}", e);
            problems += 1;
        }
    }

    let missing: BTreeSet<_> = tasks
        .iter()
        .flat_map(|t| t.dependencies.iter().map(|d| &d.task_id))
        .filter(|id| !seen.contains(*id))
        .collect();
    for id in &missing {
        println!("warning: dependency {} is not in the task file", id);
    }

    if problems > 0 {
        return Err(Error::Validation(format!("{} problem(s) in task file", problems)));
    }

    println!("{} task(s), {} dependency edge(s)", seen.len(), graph.dependency_count());
    for (position, id) in graph.topological_order()?.iter().enumerate() {
        println!("  {:>3}. {}", position + 1, id);
    }
    Ok(())
}

/// Drive `tasks` to completion or until `deadline`, returning final metrics.
async fn run_tasks(
    config: CoordinatorConfig,
    tasks: Vec<Task>,
    deadline: Duration,
) -> Result<CoordinatorMetrics> {
    let coordinator = Coordinator::new(config)?;

    let task_types: BTreeSet<String> = tasks.iter().map(|t| t.task_type.clone()).collect();
    for task_type in &task_types {
        let executor = Arc::new(SimulatedExecutor::new(task_type.clone(), 4));
        coordinator.add_executor(task_type, executor).await;
    }

    if !coordinator.start(None).await {
        return Err(Error::Validation("coordinator failed to start".to_string()));
    }
    let local = coordinator
        .node_id()
        .await
        .ok_or_else(|| Error::Validation("coordinator has no node id".to_string()))?;
    let peer_executor: Arc<dyn Executor> = Arc::new(SimulatedExecutor::new(
        "*".to_string(),
        4 * coordinator.peers().await.len().max(1),
    ));

    let total = tasks.len();
    if !coordinator.submit_batch(tasks).await {
        eprintln!("some tasks were rejected; see the log for details");
    }

    let started = Instant::now();
    loop {
        for task in coordinator.get_tasks_by_state(TaskState::Assigned).await {
            let executor = match &task.assigned_node {
                Some(node) if *node == local => coordinator.executor_for(&task.task_type).await,
                Some(node) => {
                    tracing::debug!(task_id = %task.task_id, peer = %node, "simulating peer execution");
                    Some(peer_executor.clone())
                }
                None => None,
            };
            if !coordinator.start_task(&task.task_id).await {
                continue;
            }
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                let result = match executor {
                    Some(executor) => executor.execute(&task).await,
                    None => TaskResult::failure(task.task_id.clone(), "no executor for task type"),
                };
                coordinator.complete_task(&task.task_id, result).await;
            });
        }

        let metrics = coordinator.get_metrics().await;
        let finished = metrics.completed_tasks + metrics.failed_tasks + metrics.cancelled_tasks;
        if finished >= metrics.total_tasks {
            break;
        }
        if started.elapsed() > deadline {
            eprintln!(
                "deadline reached with {} of {} task(s) unfinished",
                metrics.total_tasks - finished,
                total
            );
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    coordinator.stop().await;
    Ok(coordinator.get_metrics().await)
}

/// Stand-in executor for `run`. A task type of `*` accepts every type and
/// stands in for the peers.
///
/// Reads two optional payload fields: `duration_ms` (how long the work
/// takes) and `fail_attempts` (how many attempts fail before one succeeds).
struct SimulatedExecutor {
    task_type: String,
    capacity: usize,
    in_flight: AtomicUsize,
}

impl SimulatedExecutor {
    fn new(task_type: String, capacity: usize) -> Self {
        Self {
            task_type,
            capacity: capacity.max(1),
            in_flight: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    fn supports(&self, task_type: &str) -> bool {
        self.task_type == "*" || self.task_type == task_type
    }

    async fn execute(&self, task: &Task) -> TaskResult {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let duration_ms = task.payload["duration_ms"].as_u64().unwrap_or(10);
        tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let fail_attempts = task.payload["fail_attempts"].as_u64().unwrap_or(0);
        if u64::from(task.retry_count) < fail_attempts {
            return TaskResult::failure(
                task.task_id.clone(),
                &format!("simulated failure on attempt {}", task.retry_count + 1),
            );
        }
        TaskResult::success(
            task.task_id.clone(),
            serde_json::json!({ "attempt": task.retry_count + 1, "duration_ms": duration_ms }),
        )
    }

    fn get_utilization(&self) -> f64 {
        self.in_flight.load(Ordering::SeqCst) as f64 / self.capacity as f64
    }
}
