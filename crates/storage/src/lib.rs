use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use uuid::Uuid;

use shared::domain::{MerchantId, OnboardingStep};

const MERCHANT_ID_KEY: &str = "merchant_onboarding_id";
const STEP_KEY: &str = "merchant_onboarding_step";
const API_KEY_KEY: &str = "merchant_api_key";
const ADMIN_TOKEN_KEY: &str = "admin_token";

/// Mutating backend calls that carry a persisted idempotency token. The token
/// survives failed attempts and is rotated only after the action succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotentAction {
    Register,
    PspSetup,
}

impl IdempotentAction {
    fn as_str(&self) -> &'static str {
        match self {
            IdempotentAction::Register => "register",
            IdempotentAction::PspSetup => "psp_setup",
        }
    }
}

/// Local session persistence for the onboarding client: the merchant id, the
/// last derived step, the issued API key, and the operator bearer token.
///
/// Writes are last-writer-wins; the server stays the source of truth and
/// every cached value is advisory.
#[derive(Clone)]
pub struct SessionStore {
    pool: Pool<Sqlite>,
}

impl SessionStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM session_values WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO session_values (key, value, updated_at)
             VALUES (?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_value(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM session_values WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn merchant_id(&self) -> Result<Option<MerchantId>> {
        Ok(self.get_value(MERCHANT_ID_KEY).await?.map(MerchantId::new))
    }

    pub async fn set_merchant_id(&self, merchant_id: &MerchantId) -> Result<()> {
        self.set_value(MERCHANT_ID_KEY, merchant_id.as_str()).await
    }

    /// Last step the client derived. Advisory only: an unparsable stored
    /// value reads as absent rather than failing the session.
    pub async fn cached_step(&self) -> Result<Option<OnboardingStep>> {
        Ok(self
            .get_value(STEP_KEY)
            .await?
            .and_then(|raw| raw.parse::<OnboardingStep>().ok()))
    }

    pub async fn set_cached_step(&self, step: OnboardingStep) -> Result<()> {
        self.set_value(STEP_KEY, step.as_str()).await
    }

    pub async fn api_key(&self) -> Result<Option<String>> {
        self.get_value(API_KEY_KEY).await
    }

    pub async fn set_api_key(&self, api_key: &str) -> Result<()> {
        self.set_value(API_KEY_KEY, api_key).await
    }

    pub async fn has_api_key(&self) -> Result<bool> {
        Ok(self.api_key().await?.is_some())
    }

    pub async fn admin_token(&self) -> Result<Option<String>> {
        self.get_value(ADMIN_TOKEN_KEY).await
    }

    pub async fn set_admin_token(&self, token: &str) -> Result<()> {
        self.set_value(ADMIN_TOKEN_KEY, token).await
    }

    pub async fn clear_admin_token(&self) -> Result<bool> {
        self.delete_value(ADMIN_TOKEN_KEY).await
    }

    /// Returns the persisted token for the action, minting one on first use.
    /// Resending the same token lets the backend deduplicate a retried call.
    pub async fn idempotency_token(&self, action: IdempotentAction) -> Result<String> {
        if let Some(existing) = self.peek_idempotency_token(action).await? {
            return Ok(existing);
        }

        let minted = Uuid::new_v4().to_string();
        let row = sqlx::query(
            "INSERT INTO idempotency_tokens (action, token)
             VALUES (?, ?)
             ON CONFLICT(action) DO UPDATE SET action = excluded.action
             RETURNING token",
        )
        .bind(action.as_str())
        .bind(&minted)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<String, _>(0))
    }

    pub async fn peek_idempotency_token(&self, action: IdempotentAction) -> Result<Option<String>> {
        let row = sqlx::query("SELECT token FROM idempotency_tokens WHERE action = ?")
            .bind(action.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    pub async fn clear_idempotency_token(&self, action: IdempotentAction) -> Result<()> {
        sqlx::query("DELETE FROM idempotency_tokens WHERE action = ?")
            .bind(action.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Clears the whole local session: cached identifiers, the issued key,
    /// the operator token, and any pending idempotency tokens.
    pub async fn reset(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM session_values")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM idempotency_tokens")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
