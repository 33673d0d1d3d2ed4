//! SQLite store.
//!
//! Aggregates are persisted as JSON documents keyed by id, with the
//! columns the queries actually filter on (user, status) lifted out.
//! Good enough for a single-node deployment; a heavier backend can
//! replace this behind the same `Store` trait.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::storage::Store;
use crate::types::{CashoutRequest, CashoutStatus, PaymentChannelAccount, UserCashoutProfile};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open sqlite store at {path}"))?;

        for statement in [
            "CREATE TABLE IF NOT EXISTS requests (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                body TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS profiles (
                user_id TEXT PRIMARY KEY,
                body TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                body TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_requests_user ON requests (user_id)",
            "CREATE INDEX IF NOT EXISTS idx_requests_status ON requests (status)",
        ] {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .context("Failed to initialise sqlite schema")?;
        }

        info!(path, "SQLite store ready");
        Ok(Self { pool })
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: String) -> Result<T> {
    serde_json::from_str(&body).context("Failed to decode stored document")
}

#[async_trait]
impl Store for SqliteStore {
    async fn put_request(&self, request: &CashoutRequest) -> Result<()> {
        let body = serde_json::to_string(request).context("Failed to encode request")?;
        sqlx::query(
            "INSERT INTO requests (id, user_id, status, created_at, body)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET status = excluded.status, body = excluded.body",
        )
        .bind(&request.id)
        .bind(&request.user_id)
        .bind(request.status.to_string())
        .bind(request.created_at.to_rfc3339())
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_request(&self, id: &str) -> Result<Option<CashoutRequest>> {
        let row = sqlx::query("SELECT body FROM requests WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| decode(r.get::<String, _>("body"))).transpose()
    }

    async fn list_requests_by_user(&self, user_id: &str) -> Result<Vec<CashoutRequest>> {
        let rows =
            sqlx::query("SELECT body FROM requests WHERE user_id = ?1 ORDER BY created_at")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|r| decode(r.get::<String, _>("body")))
            .collect()
    }

    async fn list_requests_by_status(
        &self,
        status: CashoutStatus,
    ) -> Result<Vec<CashoutRequest>> {
        let rows =
            sqlx::query("SELECT body FROM requests WHERE status = ?1 ORDER BY created_at")
                .bind(status.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|r| decode(r.get::<String, _>("body")))
            .collect()
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserCashoutProfile>> {
        let row = sqlx::query("SELECT body FROM profiles WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| decode(r.get::<String, _>("body"))).transpose()
    }

    async fn put_profile(&self, profile: &UserCashoutProfile) -> Result<()> {
        let body = serde_json::to_string(profile).context("Failed to encode profile")?;
        sqlx::query(
            "INSERT INTO profiles (user_id, body) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET body = excluded.body",
        )
        .bind(&profile.user_id)
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn put_account(&self, account: &PaymentChannelAccount) -> Result<()> {
        let body = serde_json::to_string(account).context("Failed to encode account")?;
        sqlx::query(
            "INSERT INTO accounts (id, user_id, created_at, body) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET body = excluded.body",
        )
        .bind(&account.id)
        .bind(&account.user_id)
        .bind(account.created_at.to_rfc3339())
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_account(&self, id: &str) -> Result<Option<PaymentChannelAccount>> {
        let row = sqlx::query("SELECT body FROM accounts WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| decode(r.get::<String, _>("body"))).transpose()
    }

    async fn list_accounts_by_user(&self, user_id: &str) -> Result<Vec<PaymentChannelAccount>> {
        let rows =
            sqlx::query("SELECT body FROM accounts WHERE user_id = ?1 ORDER BY created_at")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|r| decode(r.get::<String, _>("body")))
            .collect()
    }

    async fn remove_account(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
