//! Confirmation plans: the only state that outlives a turn.
//!
//! Two-phase write contract: `writeback.prepare` creates a plan, the user
//! echoes `CONFIRM <id>`, and `writeback.commit` consumes the plan exactly
//! once. Expired plans are invisible to consumption and removed by the
//! purge. Backed by SQLite via `sqlx`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use super::StoreError;

/// Row type for plan queries: id, tool, tenant, user, created, expires, data.
type PlanRow = (String, String, String, String, String, String, String);

/// A staged write awaiting user confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationPlan {
    /// Hex-32 plan id the user echoes back.
    pub id: String,
    /// Tool that will perform the committed write.
    pub tool: String,
    pub tenant_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Staged payload, small string pairs only.
    pub data: BTreeMap<String, String>,
}

impl ConfirmationPlan {
    /// Stage a new plan with a fresh id.
    pub fn stage(
        tool: &str,
        tenant_id: &str,
        user_id: &str,
        ttl_secs: u64,
        data: BTreeMap<String, String>,
    ) -> Self {
        let created_at = Utc::now();
        let expires_at = created_at
            .checked_add_signed(chrono::Duration::seconds(
                i64::try_from(ttl_secs).unwrap_or(i64::MAX),
            ))
            .unwrap_or(created_at);
        Self {
            id: Uuid::new_v4().simple().to_string(),
            tool: tool.to_owned(),
            tenant_id: tenant_id.to_owned(),
            user_id: user_id.to_owned(),
            created_at,
            expires_at,
            data,
        }
    }
}

/// SQLite-backed plan store.
pub struct PlanStore {
    db: SqlitePool,
}

impl PlanStore {
    /// Connect and ensure the schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the pool or migration fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let db = SqlitePool::connect(url).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS confirmation_plans (\
             id TEXT PRIMARY KEY, \
             tool TEXT NOT NULL, \
             tenant_id TEXT NOT NULL, \
             user_id TEXT NOT NULL, \
             created_at TEXT NOT NULL, \
             expires_at TEXT NOT NULL, \
             data_json TEXT NOT NULL)",
        )
        .execute(&db)
        .await?;
        Ok(Self { db })
    }

    /// Persist a staged plan.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub async fn create(&self, plan: &ConfirmationPlan) -> Result<(), StoreError> {
        let data_json =
            serde_json::to_string(&plan.data).map_err(|e| StoreError::Backend(e.to_string()))?;
        sqlx::query(
            "INSERT INTO confirmation_plans \
             (id, tool, tenant_id, user_id, created_at, expires_at, data_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&plan.id)
        .bind(&plan.tool)
        .bind(&plan.tenant_id)
        .bind(&plan.user_id)
        .bind(plan.created_at.to_rfc3339())
        .bind(plan.expires_at.to_rfc3339())
        .bind(data_json)
        .execute(&self.db)
        .await?;
        debug!(plan_id = %plan.id, tool = %plan.tool, "confirmation plan staged");
        Ok(())
    }

    /// Consume a plan exactly once.
    ///
    /// The plan must belong to `(tenant, user)` and must not be expired.
    /// Deletion happens in the same transaction as the read, so two
    /// concurrent commits cannot both observe the plan.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub async fn consume(
        &self,
        id: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Option<ConfirmationPlan>, StoreError> {
        let mut tx = self.db.begin().await?;
        let now = Utc::now().to_rfc3339();
        let row: Option<PlanRow> = sqlx::query_as(
            "SELECT id, tool, tenant_id, user_id, created_at, expires_at, data_json \
             FROM confirmation_plans \
             WHERE id = ?1 AND tenant_id = ?2 AND user_id = ?3 AND expires_at > ?4",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(user_id)
        .bind(&now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query("DELETE FROM confirmation_plans WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(plan_from_row(row)?))
    }

    /// Remove expired plans; returns how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query("DELETE FROM confirmation_plans WHERE expires_at <= ?1")
            .bind(&now)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

fn plan_from_row(row: PlanRow) -> Result<ConfirmationPlan, StoreError> {
    let (id, tool, tenant_id, user_id, created_at, expires_at, data_json) = row;
    let data: BTreeMap<String, String> =
        serde_json::from_str(&data_json).map_err(|e| StoreError::Backend(e.to_string()))?;
    Ok(ConfirmationPlan {
        id,
        tool,
        tenant_id,
        user_id,
        created_at: parse_utc(&created_at)?,
        expires_at: parse_utc(&expires_at)?,
        data,
    })
}

fn parse_utc(text: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("bad timestamp '{text}': {e}")))
}
