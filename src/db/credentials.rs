//! Credential (API key) database operations

use async_trait::async_trait;
use chrono::Utc;
use rand::RngCore;
use tokio_postgres::Row;
use tracing::{info, warn};
use uuid::Uuid;

use super::models::{ActiveCredential, Credential};
use super::pool::{DbPool, DbError};
use crate::auth::CredentialHasher;

pub const DEFAULT_RATE_LIMIT_PER_MINUTE: i32 = 1000;
pub const DEFAULT_RATE_LIMIT_PER_DAY: i32 = 100_000;

/// Lookups the decision engine and the billing aggregator depend on
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Active credential whose stored hash equals `key_hash`
    async fn find_active_by_hash(&self, key_hash: &str) -> Result<Option<ActiveCredential>, DbError>;

    /// Refresh `last_used_at`
    async fn touch(&self, id: Uuid) -> Result<(), DbError>;

    /// Owning account of a credential, revoked or not
    async fn account_for(&self, id: Uuid) -> Result<String, DbError>;
}

/// Request to provision a new credential
#[derive(Debug)]
pub struct NewCredential {
    pub user_id: String,
    pub name: String,
    pub rate_limit_per_minute: Option<i32>,
    pub rate_limit_per_day: Option<i32>,
}

/// Freshly created credential together with its plaintext secret (only returned once!)
#[derive(Debug)]
pub struct ProvisionedCredential {
    pub credential: Credential,
    pub plain_key: String,
}

/// Repository for credential operations
#[derive(Clone)]
pub struct CredentialRepository {
    pool: DbPool,
    hasher: CredentialHasher,
}

impl CredentialRepository {
    pub fn new(pool: DbPool, hasher: CredentialHasher) -> Self {
        Self { pool, hasher }
    }

    /// Generate a new secret
    /// Format: sk-<64 hex chars>
    fn generate_api_key() -> String {
        let mut key_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key_bytes);
        format!("sk-{}", hex::encode(key_bytes))
    }

    fn credential_from_row(row: &Row) -> Credential {
        Credential {
            id: row.get("id"),
            user_id: row.get("user_id"),
            key_hash: row.get("key_hash"),
            name: row.get("name"),
            created_at: row.get("created_at"),
            last_used_at: row.get("last_used_at"),
            is_active: row.get("is_active"),
            rate_limit_per_minute: row.get("rate_limit_per_minute"),
            rate_limit_per_day: row.get("rate_limit_per_day"),
        }
    }

    /// Provision a credential. Zero or missing limits fall back to the defaults.
    pub async fn create(&self, request: NewCredential) -> Result<ProvisionedCredential, DbError> {
        let client = self.pool.get().await?;

        let plain_key = Self::generate_api_key();
        let key_hash = self.hasher.hash(&plain_key);

        let rate_limit_per_minute = request.rate_limit_per_minute
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_RATE_LIMIT_PER_MINUTE);
        let rate_limit_per_day = request.rate_limit_per_day
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_RATE_LIMIT_PER_DAY);

        let credential = Credential {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            key_hash,
            name: request.name,
            created_at: Utc::now(),
            last_used_at: None,
            is_active: true,
            rate_limit_per_minute,
            rate_limit_per_day,
        };

        client.execute(
            r#"
            INSERT INTO api_keys (
                id, user_id, key_hash, name, created_at, is_active,
                rate_limit_per_minute, rate_limit_per_day
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
            &[
                &credential.id,
                &credential.user_id,
                &credential.key_hash,
                &credential.name,
                &credential.created_at,
                &credential.is_active,
                &credential.rate_limit_per_minute,
                &credential.rate_limit_per_day,
            ]
        ).await?;

        info!(
            key_id = %credential.id,
            user_id = %credential.user_id,
            "Created new API key"
        );

        Ok(ProvisionedCredential { credential, plain_key })
    }

    /// List active credentials of an account
    pub async fn list_active_by_user(&self, user_id: &str) -> Result<Vec<Credential>, DbError> {
        let client = self.pool.get().await?;

        let rows = client.query(
            r#"
            SELECT id, user_id, key_hash, name, created_at, last_used_at, is_active,
                   rate_limit_per_minute, rate_limit_per_day
            FROM api_keys
            WHERE user_id = $1 AND is_active = TRUE
            ORDER BY created_at DESC
            "#,
            &[&user_id]
        ).await?;

        Ok(rows.iter().map(Self::credential_from_row).collect())
    }

    /// Revoke (deactivate) a credential. Rows are never deleted.
    pub async fn revoke(&self, id: Uuid) -> Result<bool, DbError> {
        let client = self.pool.get().await?;

        let result = client.execute(
            "UPDATE api_keys SET is_active = FALSE WHERE id = $1",
            &[&id]
        ).await?;

        if result > 0 {
            warn!(key_id = %id, "API key revoked");
        }

        Ok(result > 0)
    }
}

#[async_trait]
impl CredentialStore for CredentialRepository {
    async fn find_active_by_hash(&self, key_hash: &str) -> Result<Option<ActiveCredential>, DbError> {
        let client = self.pool.get().await?;

        let row = client.query_opt(
            r#"
            SELECT id, user_id, rate_limit_per_minute, rate_limit_per_day
            FROM api_keys
            WHERE key_hash = $1 AND is_active = TRUE
            "#,
            &[&key_hash]
        ).await?;

        Ok(row.map(|row| ActiveCredential {
            id: row.get("id"),
            user_id: row.get("user_id"),
            rate_limit_per_minute: row.get("rate_limit_per_minute"),
            rate_limit_per_day: row.get("rate_limit_per_day"),
        }))
    }

    async fn touch(&self, id: Uuid) -> Result<(), DbError> {
        let client = self.pool.get().await?;

        client.execute(
            "UPDATE api_keys SET last_used_at = NOW() WHERE id = $1",
            &[&id]
        ).await?;

        Ok(())
    }

    async fn account_for(&self, id: Uuid) -> Result<String, DbError> {
        let client = self.pool.get().await?;

        let row = client.query_opt(
            "SELECT user_id FROM api_keys WHERE id = $1",
            &[&id]
        ).await?;

        row.map(|row| row.get("user_id"))
            .ok_or_else(|| DbError::NotFound(format!("api key {}", id)))
    }
}
