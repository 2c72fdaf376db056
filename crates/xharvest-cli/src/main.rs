mod account;
mod job;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::account::AccountCommands;
use crate::job::JobCommands;

#[derive(Debug, Parser)]
#[command(name = "xharvest-cli")]
#[command(about = "Harvest posts from X search results")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Manage the accounts jobs sign in with
    Account {
        #[command(subcommand)]
        command: AccountCommands,
    },
    /// Create, run and inspect harvest jobs
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Check the database is reachable
    Ping,
    /// Apply pending migrations
    Migrate,
    /// Load search targets from the targets file
    Seed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("no command given; run with --help for usage");
        return Ok(());
    };

    let config = xharvest_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool = xharvest_db::connect_pool_from_config(&config).await?;

    match command {
        Commands::Db { command } => run_db(&pool, &config, command).await,
        Commands::Account { command } => account::run(&pool, command).await,
        Commands::Job { command } => job::run(&pool, &config, command).await,
    }
}

async fn run_db(
    pool: &sqlx::PgPool,
    config: &xharvest_core::AppConfig,
    command: DbCommands,
) -> anyhow::Result<()> {
    match command {
        DbCommands::Ping => {
            xharvest_db::health_check(pool).await?;
            println!("database ok");
        }
        DbCommands::Migrate => {
            let applied = xharvest_db::run_migrations(pool).await?;
            println!("applied {applied} migration(s)");
        }
        DbCommands::Seed => {
            let file = xharvest_core::load_targets(&config.targets_path)?;
            let seeded = xharvest_db::seed_targets(pool, &file.targets).await?;
            println!(
                "seeded {seeded} target(s) from {}",
                config.targets_path.display()
            );
        }
    }
    Ok(())
}
