//! `kh` — the KrakenHashes operator CLI: migrations, claim voucher minting,
//! and read-only inspection of scheduler/queue state. Talks to Postgres
//! directly rather than through the HTTP API, so it works even with the
//! server down (e.g. for first-run migration).

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use kh_core::apikey;
use kh_core::config::Config;
use kh_core::store::Store;
use kh_core::types::JobExecutionStatus;

/// KrakenHashes operator CLI.
#[derive(Parser)]
#[command(name = "kh", version, about)]
struct Cli {
    /// Path to config.toml (defaults to ~/.krakenhashes/config.toml).
    #[arg(short = 'c', long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations.
    Migrate,

    /// Claim voucher management.
    Voucher {
        #[command(subcommand)]
        command: VoucherCommands,
    },

    /// List job executions.
    Jobs {
        /// Filter by status (pending, running, paused, processing, completed, failed, cancelled).
        #[arg(short = 's', long)]
        status: Option<String>,
    },

    /// Show one job execution and its tasks.
    Job {
        job_execution_id: uuid::Uuid,
    },

    /// List preset jobs.
    Presets,

    /// Scheduler-eligible jobs (pending/running, priority order).
    Queue,
}

#[derive(Subcommand)]
enum VoucherCommands {
    /// Mint a new single-use claim voucher.
    Create {
        /// Restrict the voucher to a specific agent hostname.
        #[arg(long)]
        hostname: Option<String>,
        /// Expire the voucher after this many seconds (omit for no expiry).
        #[arg(long)]
        ttl_secs: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    kh_telemetry::logging::init_logging("kh-cli", "warn");

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path).context("failed to load config")?,
        None => Config::load().unwrap_or_default(),
    };

    match cli.command {
        Commands::Migrate => {
            let store = connect(&config).await?;
            store.migrate().await.context("migration failed")?;
            println!("migrations applied");
        }
        Commands::Voucher { command } => match command {
            VoucherCommands::Create { hostname, ttl_secs } => {
                let store = connect(&config).await?;
                let issued = apikey::generate_token().context("failed to generate voucher token")?;
                let expires_at = ttl_secs.map(|secs| chrono::Utc::now() + chrono::Duration::seconds(secs));
                let voucher = store
                    .create_voucher(&issued.hash, hostname.as_deref(), expires_at)
                    .await
                    .context("failed to create voucher")?;
                println!("voucher id:    {}", voucher.id);
                println!("claim token:   {}", issued.plaintext);
                println!("(this token is shown once; it is not recoverable from the database)");
            }
        },
        Commands::Jobs { status } => {
            let store = connect(&config).await?;
            let status = status.as_deref().map(parse_status).transpose()?;
            let jobs = store.list_job_executions(status).await.context("failed to list jobs")?;
            for job in jobs {
                println!(
                    "{}  {:<10}  priority={:<3}  keyspace={}/{}  agents<={}",
                    job.id, status_str(job.status), job.priority, job.processed_keyspace, job.effective_keyspace, job.max_agents
                );
            }
        }
        Commands::Job { job_execution_id } => {
            let store = connect(&config).await?;
            let job = store.get_job_execution(job_execution_id).await.context("job not found")?;
            println!("{job:#?}");
            let tasks = store.list_tasks_for_job(job_execution_id).await.context("failed to list tasks")?;
            println!("-- {} task(s) --", tasks.len());
            for task in tasks {
                println!(
                    "  {}  {:<10}  keyspace=[{}, {})  agent={:?}",
                    task.id, format!("{:?}", task.status).to_lowercase(), task.keyspace_start, task.keyspace_end, task.agent_id
                );
            }
        }
        Commands::Presets => {
            let store = connect(&config).await?;
            let presets = store.list_presets().await.context("failed to list presets")?;
            for preset in presets {
                println!("{}  {:<24}  mode={:?}  max_agents={}", preset.id, preset.name, preset.attack_mode, preset.max_agents);
            }
        }
        Commands::Queue => {
            let store = connect(&config).await?;
            let jobs = store.list_ready_job_executions().await.context("failed to list ready jobs")?;
            if jobs.is_empty() {
                println!("queue is empty");
            }
            for job in jobs {
                println!(
                    "{}  priority={:<3}  dispatched={}/{}",
                    job.id, job.priority, job.dispatched_keyspace, job.effective_keyspace
                );
            }
        }
    }

    Ok(())
}

async fn connect(config: &Config) -> Result<Store> {
    Store::connect(&config.database.url, config.database.max_connections)
        .await
        .context("failed to connect to the database")
}

fn parse_status(s: &str) -> Result<JobExecutionStatus> {
    use JobExecutionStatus::*;
    Ok(match s {
        "pending" => Pending,
        "running" => Running,
        "paused" => Paused,
        "processing" => Processing,
        "completed" => Completed,
        "failed" => Failed,
        "cancelled" => Cancelled,
        other => anyhow::bail!("unknown status {other:?}"),
    })
}

fn status_str(s: JobExecutionStatus) -> &'static str {
    use JobExecutionStatus::*;
    match s {
        Pending => "pending",
        Running => "running",
        Paused => "paused",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}
