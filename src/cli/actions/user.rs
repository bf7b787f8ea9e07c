use crate::model::{PgUsersRepo, UsersRepo};
use anyhow::{Context, Result, anyhow};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub dsn: String,
    pub username: String,
    pub password: SecretString,
    pub admin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantChange {
    Grant,
    Revoke,
}

#[derive(Debug)]
pub struct GrantArgs {
    pub dsn: String,
    pub username: String,
    pub auth: String,
    pub change: GrantChange,
}

/// Create the account and optionally elevate it.
async fn create(repo: &dyn UsersRepo, args: &Args) -> Result<()> {
    repo.create_user(&args.username, args.password.expose_secret())
        .await
        .with_context(|| format!("Failed to create user {}", args.username))?;

    if args.admin {
        repo.elevate_to_admin(&args.username)
            .await
            .with_context(|| format!("Failed to elevate {} to admin", args.username))?;
    }

    info!("Created user {} (admin: {})", args.username, args.admin);
    Ok(())
}

/// Grant or revoke a named authorization for an existing user.
async fn change_grant(repo: &dyn UsersRepo, args: &GrantArgs) -> Result<()> {
    let user = repo
        .get_user(&args.username)
        .await?
        .ok_or_else(|| anyhow!("no such user: {}", args.username))?;

    match args.change {
        GrantChange::Grant => repo
            .grant_auth(user.user_id, &args.auth)
            .await
            .with_context(|| format!("Failed to grant {} to {}", args.auth, args.username))?,
        GrantChange::Revoke => repo
            .revoke_auth(user.user_id, &args.auth)
            .await
            .with_context(|| format!("Failed to revoke {} from {}", args.auth, args.username))?,
    }

    info!("{:?} {} for user {}", args.change, args.auth, args.username);
    Ok(())
}

async fn connect(dsn: &str) -> Result<PgUsersRepo> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;
    Ok(PgUsersRepo::new(pool))
}

/// Execute the create-user action.
/// # Errors
/// Returns an error if the database is unreachable or the user cannot be created.
pub async fn execute(args: Args) -> Result<()> {
    create(&connect(&args.dsn).await?, &args).await
}

/// Execute the grant or revoke action.
/// # Errors
/// Returns an error if the database is unreachable, the user is unknown or
/// the authorization cannot be granted.
pub async fn execute_grant(args: GrantArgs) -> Result<()> {
    change_grant(&connect(&args.dsn).await?, &args).await
}
