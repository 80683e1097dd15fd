mod config;
mod notifier;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use config::WardenConfig;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use warden_core::{DelegationMode, TaskStatus};
use warden_orchestrator::{
    FileTaskStore, JsonlEventSink, NewTask, Orchestrator, QueueProcessor, RetryRequest,
    SinkRecord, TaskFilter, TaskUpdate, Watchdog,
};

#[derive(Parser)]
#[command(name = "warden", about = "Warden: task orchestration and delegation for agents")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "warden.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the queue processor and watchdog until interrupted
    Run,
    /// Run one queue-processor sweep and one watchdog sweep, then exit
    Sweep,
    /// Create, inspect and update tasks
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Inspect and advance per-agent queues
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Approve or send back finished sub-tasks
    Delegation {
        #[command(subcommand)]
        action: DelegationAction,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Create a task, or a sub-task with --parent
    Create {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Agent to assign
        #[arg(long)]
        agent: Option<String>,
        /// 1 (most urgent) to 5
        #[arg(long, default_value_t = 3)]
        priority: u8,
        /// Hold the sub-task report for human approval
        #[arg(long)]
        manual: bool,
        /// Parent task; makes this a delegated sub-task
        #[arg(long)]
        parent: Option<Uuid>,
        /// Do not dispatch before this time (RFC 3339)
        #[arg(long)]
        scheduled_at: Option<DateTime<Utc>>,
    },
    /// Show a task and its audit trail
    Show { id: Uuid },
    /// List tasks
    List {
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        parent: Option<Uuid>,
    },
    /// Set a task's status
    Status { id: Uuid, status: TaskStatus },
    /// Assign a task to an agent, or clear the assignment with --clear
    Assign {
        id: Uuid,
        agent: Option<String>,
        #[arg(long, conflicts_with = "agent")]
        clear: bool,
    },
    /// Retry a task now, or at a later time with --at
    Retry {
        id: Uuid,
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Cancel a task
    Cancel { id: Uuid },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Show an agent's queue, head first
    Show { agent: String },
    /// Dispatch the head of an idle agent's queue
    Next { agent: String },
}

#[derive(Subcommand)]
enum DelegationAction {
    /// Notify the orchestrator agent about a finished sub-task
    Approve { id: Uuid },
    /// Send a sub-task back to its specialist
    RequestChanges {
        id: Uuid,
        #[arg(long)]
        comment: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn build(config: &WardenConfig) -> anyhow::Result<(Orchestrator, Arc<JsonlEventSink>)> {
    let store = Arc::new(FileTaskStore::new(config.data_dir.join("tasks")).await?);
    let sink = Arc::new(JsonlEventSink::new(config.data_dir.clone()).await?);
    let notifier = notifier::from_config(&config.notifier);
    let orch = Orchestrator::new(store, notifier, sink.clone(), config.orchestrator.clone())?;
    Ok((orch, sink))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = WardenConfig::load(&cli.config).await?;
    let (orch, sink) = build(&config).await?;

    match cli.command {
        Commands::Run => {
            info!(data_dir = %config.data_dir.display(), "Starting warden");
            let shutdown = CancellationToken::new();
            let handles = orch.start_background(shutdown.clone());
            tokio::signal::ctrl_c().await?;
            info!("Shutdown requested");
            shutdown.cancel();
            for handle in handles {
                handle.await?;
            }
            orch.settle().await;
            info!(loops = %orch.monitor().to_json().await, "Warden stopped");
        }
        Commands::Sweep => {
            let queue = QueueProcessor::new(orch.clone()).sweep().await?;
            let watchdog = Watchdog::new(orch.clone()).sweep().await?;
            orch.settle().await;
            print_json(&serde_json::json!({
                "queue_processor": queue,
                "watchdog": watchdog,
            }))?;
        }
        Commands::Task { action } => match action {
            TaskAction::Create {
                title,
                description,
                agent,
                priority,
                manual,
                parent,
                scheduled_at,
            } => {
                let mut new = NewTask::new(title)
                    .with_description(description)
                    .with_priority(priority);
                if let Some(agent) = agent {
                    new = new.assigned_to(agent);
                }
                if manual {
                    new = new.with_delegation_mode(DelegationMode::Manual);
                }
                if let Some(at) = scheduled_at {
                    new = new.scheduled_for(at);
                }
                let task = match parent {
                    Some(parent_id) => orch.delegate(parent_id, new).await?,
                    None => orch.create_task(new).await?,
                };
                orch.settle().await;
                print_json(&task)?;
            }
            TaskAction::Show { id } => {
                let task = orch.get_task(id).await?;
                let trail: Vec<SinkRecord> = sink.read_for_task(id).await?;
                print_json(&serde_json::json!({ "task": task, "trail": trail }))?;
            }
            TaskAction::List {
                status,
                agent,
                parent,
            } => {
                let filter = TaskFilter {
                    status,
                    agent_id: agent,
                    parent_task_id: parent,
                };
                let tasks = orch.list_tasks(&filter).await?;
                if tasks.is_empty() {
                    println!("No tasks.");
                } else {
                    for task in &tasks {
                        println!(
                            "{}  {:<10} p{}  {:<12} {}",
                            task.id,
                            task.status,
                            task.priority,
                            task.assigned_agent_id.as_deref().unwrap_or("-"),
                            task.title
                        );
                    }
                    println!("\nTotal: {} task(s)", tasks.len());
                }
            }
            TaskAction::Status { id, status } => {
                let task = orch.update_status(id, status).await?;
                orch.settle().await;
                print_json(&task)?;
            }
            TaskAction::Assign { id, agent, clear } => {
                let update = match agent {
                    Some(agent) => TaskUpdate::assign(agent),
                    None if clear => TaskUpdate::unassign(),
                    None => anyhow::bail!("Give an agent id, or --clear to unassign"),
                };
                let task = orch.update_task(id, update).await?;
                orch.settle().await;
                print_json(&task)?;
            }
            TaskAction::Retry { id, at } => {
                let request = at.map_or(RetryRequest::Now, RetryRequest::At);
                let task = orch.retry_task(id, request).await?;
                orch.settle().await;
                print_json(&task)?;
            }
            TaskAction::Cancel { id } => {
                let task = orch.cancel_task(id).await?;
                orch.settle().await;
                print_json(&task)?;
            }
        },
        Commands::Queue { action } => match action {
            QueueAction::Show { agent } => {
                print_json(&orch.agent_queue(&agent).await?)?;
            }
            QueueAction::Next { agent } => {
                match orch.dequeue_next(&agent).await? {
                    Some(task) => {
                        orch.settle().await;
                        print_json(&task)?;
                    }
                    None => println!("Queue for {agent} is empty."),
                }
            }
        },
        Commands::Delegation { action } => match action {
            DelegationAction::Approve { id } => {
                let task = orch.approve_delegation(id).await?;
                orch.settle().await;
                print_json(&task)?;
            }
            DelegationAction::RequestChanges { id, comment } => {
                let task = orch.request_changes(id, &comment).await?;
                orch.settle().await;
                print_json(&task)?;
            }
        },
    }

    Ok(())
}
