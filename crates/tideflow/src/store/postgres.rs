//! PostgreSQL state store implementation.

use serde_json::Value;
use sqlx::PgPool;

use super::{StateKey, StateStore};
use crate::error::Result;

/// PostgreSQL-backed state store for production use.
///
/// # Database Schema
///
/// Requires the `tideflow.states` table from `migrations/`:
///
/// | Column      | Purpose                                   |
/// |-------------|-------------------------------------------|
/// | `namespace` | Owning engine                             |
/// | `id`        | Entity id                                 |
/// | `state`     | The state document (`jsonb`)              |
/// | `version`   | Number of writes, for inspection          |
///
/// # Concurrency
///
/// Conditional writes compare the stored `jsonb` with the expected document
/// inside the `UPDATE`/`DELETE` statement itself, so the check and the write
/// are a single atomic statement. `jsonb` equality ignores key order.
///
/// # Example
///
/// ```ignore
/// use tideflow::PgStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://...").await?;
/// let store = PgStore::new(pool);
/// let runtime = Runtime::builder(store).build()?;
/// ```
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new PostgreSQL store from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Number of writes applied to the state under `key`, if present.
    pub async fn version(&self, key: &StateKey) -> Result<Option<i64>> {
        let version = sqlx::query_scalar::<_, i64>(
            r#"SELECT version FROM tideflow.states WHERE namespace = $1 AND id = $2"#,
        )
        .bind(key.namespace())
        .bind(key.id())
        .fetch_optional(&self.pool)
        .await?;

        Ok(version)
    }
}

impl StateStore for PgStore {
    async fn get_state(&self, key: &StateKey) -> Result<Option<Value>> {
        let state = sqlx::query_scalar::<_, Value>(
            r#"SELECT state FROM tideflow.states WHERE namespace = $1 AND id = $2"#,
        )
        .bind(key.namespace())
        .bind(key.id())
        .fetch_optional(&self.pool)
        .await?;

        Ok(state)
    }

    async fn create_state(&self, key: &StateKey, state: Value) -> Result<()> {
        let result = sqlx::query(
            r#"INSERT INTO tideflow.states (namespace, id, state)
               VALUES ($1, $2, $3)
               ON CONFLICT DO NOTHING"#,
        )
        .bind(key.namespace())
        .bind(key.id())
        .bind(&state)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(key.already_exists());
        }
        Ok(())
    }

    async fn update_state(&self, key: &StateKey, state: Value, expected: &Value) -> Result<()> {
        let result = sqlx::query(
            r#"UPDATE tideflow.states
               SET state = $3,
                   version = version + 1,
                   updated_at = now()
               WHERE namespace = $1 AND id = $2 AND state = $4"#,
        )
        .bind(key.namespace())
        .bind(key.id())
        .bind(&state)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(key.conflict());
        }
        Ok(())
    }

    async fn delete_state(&self, key: &StateKey, expected: &Value) -> Result<()> {
        let result = sqlx::query(
            r#"DELETE FROM tideflow.states
               WHERE namespace = $1 AND id = $2 AND state = $3"#,
        )
        .bind(key.namespace())
        .bind(key.id())
        .bind(expected)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(key.conflict());
        }
        Ok(())
    }
}
