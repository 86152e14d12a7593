//! hopper - operator CLI for the distributed task queue.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use hopper_core::impls::InMemoryBackend;
use hopper_core::ports::{Clock, IdGenerator, QueueBackend, SystemClock, UlidGenerator};
use hopper_core::{Priority, QueueError, Task, TaskFilter, TaskId, TaskQueue, TaskStatus};
use hopper_redis::RedisBackend;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Settings;

#[derive(Debug, Parser)]
#[command(name = "hopper", version, about = "Distributed priority task queue")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use an in-process backend instead of Redis
    #[arg(long, global = true)]
    memory: bool,

    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Submit a task
    Enqueue {
        #[arg(long = "type")]
        task_type: String,
        #[arg(long, default_value = "cli")]
        user: String,
        #[arg(long, default_value_t = Priority::NORMAL.value(), allow_hyphen_values = true)]
        priority: i32,
        #[arg(long)]
        id: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
        /// JSON input payload
        #[arg(long)]
        input: Option<String>,
    },
    /// Claim the highest-priority task, if any
    Dequeue,
    /// Claim and complete tasks until Ctrl-C
    Work {
        #[arg(long, default_value = "hopper-worker")]
        worker_id: String,
    },
    /// Show one task
    Get { id: String },
    /// Overwrite the status of a task
    SetStatus {
        id: String,
        status: TaskStatus,
        #[arg(long)]
        error: Option<String>,
    },
    /// Cancel a task
    Cancel { id: String },
    /// List tasks
    List {
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long = "type")]
        task_type: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        priority: Option<i32>,
        #[arg(long)]
        assigned_to: Option<String>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Queue depth and per-status counts
    Stats,
    /// Delete every task
    Clear {
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format)?;

    let settings = Settings::load(cli.config.as_deref())?;
    let backend = open_backend(&settings, cli.memory).await?;
    let queue = TaskQueue::new(backend, settings.queue.clone());

    let result = run(&queue, cli.command).await;
    queue.close().await.context("failed to close queue")?;
    result
}

/// ログ初期化（RUST_LOG が優先）
fn init_logging(log_level: &str, log_format: LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    // stdout carries command output; logs go to stderr.
    match log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .context("failed to initialize JSON logging")?,
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init()
            .context("failed to initialize pretty logging")?,
    }
    Ok(())
}

async fn open_backend(settings: &Settings, memory: bool) -> Result<Arc<dyn QueueBackend>> {
    if memory {
        warn!("using in-memory backend; tasks are lost on exit");
        return Ok(Arc::new(InMemoryBackend::new()));
    }
    let backend = RedisBackend::connect(settings.redis.clone())
        .await
        .context("failed to connect to redis")?;
    Ok(Arc::new(backend))
}

async fn run(queue: &TaskQueue, command: Command) -> Result<()> {
    match command {
        Command::Enqueue {
            task_type,
            user,
            priority,
            id,
            description,
            input,
        } => {
            let clock = SystemClock;
            let id = match id {
                Some(id) => TaskId::new(id),
                None => UlidGenerator::new(clock).generate_task_id(),
            };
            let mut task = Task::new(id, user, task_type, clock.now())
                .with_priority(priority)
                .with_description(description);
            if let Some(input) = input {
                let input = serde_json::from_str(&input).context("--input is not valid JSON")?;
                task = task.with_input(input);
            }
            queue.enqueue(&mut task).await?;
            print_json(&task)
        }
        Command::Dequeue => {
            let task = queue.dequeue().await?;
            print_json(&task)
        }
        Command::Work { worker_id } => work(queue, &worker_id).await,
        Command::Get { id } => {
            let task = queue.get(&TaskId::new(id)).await?;
            print_json(&task)
        }
        Command::SetStatus { id, status, error } => {
            let mut task = queue.get(&TaskId::new(id)).await?;
            task.update_status(status, SystemClock.now());
            if error.is_some() {
                task.error = error;
            }
            queue.update(&mut task).await?;
            print_json(&task)
        }
        Command::Cancel { id } => {
            let id = TaskId::new(id);
            queue.cancel(&id).await?;
            print_json(&queue.get(&id).await?)
        }
        Command::List {
            user,
            status,
            task_type,
            priority,
            assigned_to,
            offset,
            limit,
        } => {
            let filter = TaskFilter {
                user_id: user,
                status,
                priority: priority.map(Priority::new),
                task_type,
                assigned_to,
                offset,
                limit,
                ..TaskFilter::default()
            };
            print_json(&queue.list(&filter).await?)
        }
        Command::Stats => {
            #[derive(Serialize)]
            struct Stats {
                waiting: usize,
                total: usize,
                by_status: hopper_core::QueueCounts,
            }
            let stats = Stats {
                waiting: queue.size().await?,
                total: queue.total_tasks().await?,
                by_status: queue.counts_by_status().await?,
            };
            print_json(&stats)
        }
        Command::Clear { yes } => {
            if !yes {
                bail!("refusing to delete every task without --yes");
            }
            queue.clear_all().await?;
            Ok(())
        }
    }
}

/// Blocking consumer: claim, mark running, complete.
async fn work(queue: &TaskQueue, worker_id: &str) -> Result<()> {
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received; stopping worker");
            }
            shutdown.cancel();
        });
    }

    let mut processed = 0usize;
    loop {
        let task = match queue.dequeue_wait(&shutdown).await {
            Ok(task) => task,
            Err(QueueError::Canceled) => break,
            Err(e) => return Err(e).context("failed to wait for a task"),
        };
        if process(queue, task, worker_id, &SystemClock).await? {
            processed += 1;
        }
    }

    info!(processed = processed, "worker stopped");
    Ok(())
}

/// Run one claimed task. Returns `false` if it was canceled underneath us.
///
/// Each transition is conditional on the stored status, so a concurrent
/// cancel wins over the worker.
async fn process(
    queue: &TaskQueue,
    mut task: Task,
    worker_id: &str,
    clock: &dyn Clock,
) -> Result<bool> {
    task.assign_to(worker_id, clock.now());
    task.update_status(TaskStatus::Running, clock.now());
    if !transition(queue, &mut task, TaskStatus::Assigned).await? {
        return Ok(false);
    }

    task.result = Some(task.input.clone());
    task.update_status(TaskStatus::Completed, clock.now());
    if !transition(queue, &mut task, TaskStatus::Running).await? {
        return Ok(false);
    }

    info!(
        task_id = %task.id,
        task_type = %task.task_type,
        worker_id = worker_id,
        "task completed"
    );
    Ok(true)
}

async fn transition(queue: &TaskQueue, task: &mut Task, from: TaskStatus) -> Result<bool> {
    match queue.update_from(task, from).await {
        Ok(()) => Ok(true),
        Err(QueueError::StatusMismatch { actual, .. }) => {
            info!(task_id = %task.id, status = %actual, "task changed underneath worker; skipping");
            Ok(false)
        }
        Err(e) => Err(e).context("failed to update task"),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{out}");
    Ok(())
}
