//! `account` subcommands.

use clap::Subcommand;
use xharvest_core::normalize_handle;

#[derive(Debug, Subcommand)]
pub enum AccountCommands {
    /// Add an account, or update the credentials of an existing one
    Add {
        /// Username to sign in with (a leading @ is ignored)
        username: String,
        /// Name of the environment variable holding the password
        #[arg(long)]
        password_env: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// List accounts and whether they have a saved session
    List,
    /// Forget an account's saved session so the next job logs in again
    ClearSession { account_id: i64 },
}

pub(crate) async fn run(pool: &sqlx::PgPool, command: AccountCommands) -> anyhow::Result<()> {
    match command {
        AccountCommands::Add {
            username,
            password_env,
            email,
        } => add(pool, &username, password_env.as_deref(), email.as_deref()).await,
        AccountCommands::List => list(pool).await,
        AccountCommands::ClearSession { account_id } => {
            xharvest_db::clear_session_state(pool, account_id).await?;
            println!("cleared saved session for account {account_id}");
            Ok(())
        }
    }
}

async fn add(
    pool: &sqlx::PgPool,
    username: &str,
    password_env: Option<&str>,
    email: Option<&str>,
) -> anyhow::Result<()> {
    let username = normalize_handle(username)
        .ok_or_else(|| anyhow::anyhow!("username must not be empty"))?;
    let password = password_env.map(read_password).transpose()?;

    let account = xharvest_db::upsert_account(pool, &username, password.as_deref(), email).await?;
    println!(
        "account {} saved as id {}{}",
        account.username,
        account.id,
        if account.password.is_some() {
            ""
        } else {
            " (no password; jobs need a saved session)"
        }
    );
    Ok(())
}

/// Passwords are read from the environment so they never appear in shell
/// history or process listings.
fn read_password(var: &str) -> anyhow::Result<String> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Ok(value),
        Ok(_) => anyhow::bail!("environment variable {var} is empty"),
        Err(_) => anyhow::bail!("environment variable {var} is not set"),
    }
}

async fn list(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let accounts = xharvest_db::list_accounts(pool).await?;
    if accounts.is_empty() {
        println!("no accounts; run `account add` first");
        return Ok(());
    }

    println!(
        "{:<6}{:<20}{:<8}{:<9}LAST LOGIN",
        "ID", "USERNAME", "ACTIVE", "SESSION"
    );
    for account in &accounts {
        let last_login = account.last_login_at.map_or_else(
            || "-".to_string(),
            |t| t.format("%Y-%m-%d %H:%M").to_string(),
        );
        println!(
            "{:<6}{:<20}{:<8}{:<9}{}",
            account.id,
            account.username,
            if account.is_active { "yes" } else { "no" },
            if account.has_saved_session() { "saved" } else { "-" },
            last_login
        );
    }
    Ok(())
}
