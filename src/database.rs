//! Per-VDE database role and database provisioning.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};

use crate::config::DbConfig;
use crate::error::{AppError, Result};

/// Executes raw SQL statements against the master database.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, statement: &str) -> Result<()>;
}

/// [`SqlExecutor`] backed by a Postgres connection pool.
#[derive(Clone)]
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the master database described by `db`.
    pub async fn connect(db: &DbConfig) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&db.host)
            .port(db.port)
            .username(&db.user)
            .password(&db.password)
            .database(&db.name);
        let pool = PgPoolOptions::new()
            .max_connections(db.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| {
                AppError::db(format!(
                    "Failed to connect to {}:{}/{}: {}",
                    db.host, db.port, db.name, e
                ))
            })?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn execute(&self, statement: &str) -> Result<()> {
        // Role and database DDL cannot run as prepared statements.
        sqlx::raw_sql(statement).execute(&self.pool).await?;
        Ok(())
    }
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub(crate) fn create_role_statement(user: &str, password: &str) -> String {
    format!(
        "CREATE ROLE {} WITH ENCRYPTED PASSWORD {} NOSUPERUSER NOCREATEDB NOCREATEROLE INHERIT LOGIN",
        user,
        quote_literal(password)
    )
}

pub(crate) fn create_database_statement(name: &str, owner: &str) -> String {
    format!("CREATE DATABASE {} OWNER {}", name, owner)
}

pub(crate) fn drop_database_statement(name: &str) -> String {
    format!("DROP DATABASE IF EXISTS {}", name)
}

pub(crate) fn drop_owned_statement(user: &str) -> String {
    format!("DROP OWNED BY {} CASCADE", user)
}

pub(crate) fn drop_role_statement(user: &str) -> String {
    format!("DROP ROLE IF EXISTS {}", user)
}

/// Creates and drops the role/database pair owned by one VDE.
///
/// Statements run one by one without a surrounding transaction, so a failure
/// part way leaves the earlier statements applied.
#[derive(Clone)]
pub struct DatabaseProvisioner {
    executor: Arc<dyn SqlExecutor>,
}

impl DatabaseProvisioner {
    pub fn new(executor: Arc<dyn SqlExecutor>) -> Self {
        Self { executor }
    }

    /// Create the login role, then a database owned by it.
    pub async fn create_instance_db(&self, name: &str, user: &str, password: &str) -> Result<()> {
        if let Err(e) = self
            .executor
            .execute(&create_role_statement(user, password))
            .await
        {
            log::error!("Creating VDE DB user {}: {}", user, e);
            return Err(e.with("step", "create_role").with("role", user));
        }

        if let Err(e) = self
            .executor
            .execute(&create_database_statement(name, user))
            .await
        {
            log::error!(
                "Creating VDE DB {}: {} (role {} is left in place)",
                name,
                e,
                user
            );
            return Err(e.with("step", "create_database").with("role", user));
        }

        Ok(())
    }

    /// Drop the instance database, everything else the role owns, then the
    /// role itself. The role must outlive its owned objects.
    pub async fn drop_instance_db(&self, name: &str, user: &str) -> Result<()> {
        if let Err(e) = self.executor.execute(&drop_database_statement(name)).await {
            log::error!("Deleting VDE DB {}: {}", name, e);
            return Err(e.with("step", "drop_database").with("role", user));
        }

        if let Err(e) = self.executor.execute(&drop_owned_statement(user)).await {
            log::error!("Deleting VDE DB {} owned by {}: {}", name, user, e);
            return Err(e.with("step", "drop_owned").with("role", user));
        }

        if let Err(e) = self.executor.execute(&drop_role_statement(user)).await {
            log::error!("Deleting VDE DB user {}: {}", user, e);
            return Err(e.with("step", "drop_role").with("role", user));
        }

        Ok(())
    }
}
