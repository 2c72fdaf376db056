//! `job` subcommands.
//!
//! `job run` drives the job in the foreground through the same
//! [`JobRunner`] the server uses, so a job behaves identically whichever
//! process runs it.

use std::sync::Arc;

use chrono::NaiveDate;
use clap::Subcommand;
use xharvest_core::{
    default_export_filename, render_export, AppConfig, DateRange, ExportFormat, JobRun, JobStatus,
    NewJob, QueryMode,
};
use xharvest_db::PgJobStore;
use xharvest_harvester::{ChromiumLauncher, ChromiumSettings, JobRunner};

#[derive(Debug, Subcommand)]
pub enum JobCommands {
    /// Create a pending job
    Create {
        /// Account the job signs in with
        #[arg(long)]
        account: i64,
        /// Target handle; repeat for several
        #[arg(long = "target", required = true)]
        targets: Vec<String>,
        /// from, to, or mentioning
        #[arg(long, default_value = "from")]
        mode: QueryMode,
        /// First day included (YYYY-MM-DD)
        #[arg(long)]
        since: NaiveDate,
        /// First day excluded (YYYY-MM-DD)
        #[arg(long)]
        until: NaiveDate,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Start a pending job and harvest it in the foreground
    Run { job_id: i64 },
    /// Show one job
    Status { job_id: i64 },
    /// List recent jobs
    List {
        #[arg(long, default_value = "20")]
        limit: i64,
    },
    /// Ask a running job to stop at its next window
    Cancel { job_id: i64 },
    /// Write a job's posts into the export directory
    Export {
        job_id: i64,
        /// json or csv
        #[arg(long, default_value = "json")]
        format: ExportFormat,
    },
}

pub(crate) async fn run(
    pool: &sqlx::PgPool,
    config: &AppConfig,
    command: JobCommands,
) -> anyhow::Result<()> {
    match command {
        JobCommands::Create {
            account,
            targets,
            mode,
            since,
            until,
            name,
        } => {
            let new_job = NewJob {
                name,
                account_id: account,
                targets,
                query_mode: mode,
                range: DateRange { since, until },
            };
            create(pool, new_job).await
        }
        JobCommands::Run { job_id } => run_foreground(pool, config, job_id).await,
        JobCommands::Status { job_id } => {
            let job = load(pool, job_id).await?;
            print_job(&job);
            Ok(())
        }
        JobCommands::List { limit } => list(pool, limit).await,
        JobCommands::Cancel { job_id } => {
            xharvest_db::request_cancel(pool, job_id).await?;
            println!("job {job_id} will stop at its next window");
            Ok(())
        }
        JobCommands::Export { job_id, format } => export(pool, config, job_id, format).await,
    }
}

async fn load(pool: &sqlx::PgPool, job_id: i64) -> anyhow::Result<JobRun> {
    xharvest_db::get_job(pool, job_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("job {job_id} not found"))
}

async fn create(pool: &sqlx::PgPool, new_job: NewJob) -> anyhow::Result<()> {
    let new_job = new_job.validate()?;

    match xharvest_db::get_account(pool, new_job.account_id).await? {
        Some(account) if account.is_active => {}
        Some(_) => anyhow::bail!("account {} is inactive", new_job.account_id),
        None => anyhow::bail!("account {} does not exist", new_job.account_id),
    }

    let job = xharvest_db::create_job(pool, &new_job).await?;
    println!("created job {} ({})", job.id, job.public_id);
    Ok(())
}

async fn run_foreground(pool: &sqlx::PgPool, config: &AppConfig, job_id: i64) -> anyhow::Result<()> {
    let launcher = Arc::new(ChromiumLauncher::new(ChromiumSettings::from_app_config(
        config,
    )));
    let store = Arc::new(PgJobStore::new(pool.clone()));
    let runner = JobRunner::from_app_config(store, launcher, config);

    let job = runner.run(job_id).await?;
    print_job(&job);

    if job.status == JobStatus::Failed {
        anyhow::bail!(
            "job {job_id} failed: {}",
            job.error_detail.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn list(pool: &sqlx::PgPool, limit: i64) -> anyhow::Result<()> {
    let jobs = xharvest_db::list_jobs(pool, limit.clamp(1, 200)).await?;
    if jobs.is_empty() {
        println!("no jobs; run `job create` first");
        return Ok(());
    }

    println!(
        "{:<6}{:<11}{:<12}{:<24}{:<8}TARGETS",
        "ID", "STATUS", "MODE", "RANGE", "POSTS"
    );
    for job in &jobs {
        println!(
            "{:<6}{:<11}{:<12}{:<24}{:<8}{}",
            job.id,
            job.status.as_str(),
            job.query_mode.as_str(),
            format!("{}..{}", job.range.since, job.range.until),
            job.result_count,
            job.targets.join(",")
        );
    }
    Ok(())
}

async fn export(
    pool: &sqlx::PgPool,
    config: &AppConfig,
    job_id: i64,
    format: ExportFormat,
) -> anyhow::Result<()> {
    let job = load(pool, job_id).await?;
    let posts = xharvest_db::list_all_posts(pool, job_id).await?;
    let bytes = render_export(&posts, format)?;

    tokio::fs::create_dir_all(&config.export_dir).await?;
    let path = config
        .export_dir
        .join(default_export_filename(job.id, job.export_date(), format));
    tokio::fs::write(&path, bytes).await?;

    println!("wrote {} post(s) to {}", posts.len(), path.display());
    Ok(())
}

fn print_job(job: &JobRun) {
    println!("Job {} {}", job.id, job.name);
    println!("  status:   {}", job.status);
    println!("  account:  {}", job.account_id);
    println!("  targets:  {} ({})", job.targets.join(", "), job.query_mode);
    println!("  range:    {} .. {}", job.range.since, job.range.until);
    println!("  posts:    {}", job.result_count);
    if let Some(duration) = job.duration() {
        println!("  duration: {}s", duration.num_seconds());
    }
    if let Some(detail) = &job.error_detail {
        println!("  error:    {detail}");
    }
    if job.cancel_requested && !job.status.is_terminal() {
        println!("  cancellation requested");
    }
}
