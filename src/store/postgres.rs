//! PostgreSQL ledger store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{ActorDirectory, AuditQuery, AuditStore, DeadLetter};
use crate::error::{AppError, Result};
use crate::models::audit_record::{AuditAction, AuditRecord, ChainLink};

const SELECT_COLUMNS: &str = r#"
    id, actor_id, actor_profile_id, entity_type, entity_id, entity_display,
    action, module, old_values, new_values, changed_fields,
    ip_address, user_agent, metadata,
    chain_hash, previous_hash, signature, chain_timestamp, created_at
"#;

/// Row projection of `audit_records`.
#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    actor_id: String,
    actor_profile_id: Option<Uuid>,
    entity_type: String,
    entity_id: String,
    entity_display: Option<String>,
    action: String,
    module: String,
    old_values: Option<serde_json::Value>,
    new_values: Option<serde_json::Value>,
    changed_fields: Vec<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    metadata: Option<serde_json::Value>,
    chain_hash: Option<String>,
    previous_hash: Option<String>,
    signature: Option<String>,
    chain_timestamp: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditRecord {
    type Error = AppError;

    fn try_from(row: AuditRow) -> Result<Self> {
        let action: AuditAction = row.action.parse().map_err(AppError::Internal)?;
        let chain = match (row.chain_hash, row.signature, row.chain_timestamp) {
            (Some(hash), Some(signature), Some(timestamp)) => Some(ChainLink {
                hash,
                previous_hash: row.previous_hash,
                signature,
                timestamp,
            }),
            _ => None,
        };
        Ok(AuditRecord {
            id: row.id,
            actor_id: row.actor_id,
            actor_profile_id: row.actor_profile_id,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            entity_display: row.entity_display,
            action,
            module: row.module,
            old_values: row.old_values,
            new_values: row.new_values,
            changed_fields: row.changed_fields,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            metadata: row.metadata,
            chain,
            created_at: row.created_at,
        })
    }
}

/// Row projection of `audit_dead_letters`.
#[derive(Debug, sqlx::FromRow)]
struct DeadLetterRow {
    id: Uuid,
    record: serde_json::Value,
    error: String,
    failed_at: DateTime<Utc>,
}

impl TryFrom<DeadLetterRow> for DeadLetter {
    type Error = AppError;

    fn try_from(row: DeadLetterRow) -> Result<Self> {
        Ok(DeadLetter {
            id: row.id,
            record: serde_json::from_value(row.record)?,
            error: row.error,
            failed_at: row.failed_at,
        })
    }
}

/// Ledger store over PostgreSQL.
pub struct PgAuditStore {
    db: PgPool,
}

impl PgAuditStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn insert_on(
        executor: impl sqlx::PgExecutor<'_>,
        record: &AuditRecord,
    ) -> Result<bool> {
        let (chain_hash, previous_hash, signature, chain_timestamp) = match &record.chain {
            Some(link) => (
                Some(link.hash.clone()),
                link.previous_hash.clone(),
                Some(link.signature.clone()),
                Some(link.timestamp),
            ),
            None => (None, None, None, None),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO audit_records (
                id, actor_id, actor_profile_id, entity_type, entity_id, entity_display,
                action, module, old_values, new_values, changed_fields,
                ip_address, user_agent, metadata,
                chain_hash, previous_hash, signature, chain_timestamp, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(&record.actor_id)
        .bind(record.actor_profile_id)
        .bind(&record.entity_type)
        .bind(&record.entity_id)
        .bind(&record.entity_display)
        .bind(record.action.as_str())
        .bind(&record.module)
        .bind(&record.old_values)
        .bind(&record.new_values)
        .bind(&record.changed_fields)
        .bind(&record.ip_address)
        .bind(&record.user_agent)
        .bind(&record.metadata)
        .bind(chain_hash)
        .bind(previous_hash)
        .bind(signature)
        .bind(chain_timestamp)
        .bind(record.created_at)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn insert(&self, record: &AuditRecord) -> Result<bool> {
        Self::insert_on(&self.db, record).await
    }

    async fn insert_batch(&self, records: &[AuditRecord]) -> Result<u64> {
        let mut tx = self.db.begin().await?;
        let mut written = 0;
        for record in records {
            if Self::insert_on(&mut *tx, record).await? {
                written += 1;
            }
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn get(&self, id: Uuid) -> Result<Option<AuditRecord>> {
        let row: Option<AuditRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM audit_records WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        row.map(AuditRecord::try_from).transpose()
    }

    async fn range_asc(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<AuditRecord>> {
        let rows: Vec<AuditRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM audit_records
            WHERE ($1::timestamptz IS NULL OR created_at >= $1)
              AND ($2::timestamptz IS NULL OR created_at <= $2)
            ORDER BY created_at ASC, id ASC
            "#
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(AuditRecord::try_from).collect()
    }

    async fn query(&self, filter: &AuditQuery) -> Result<Vec<AuditRecord>> {
        let rows: Vec<AuditRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM audit_records
            WHERE ($1::text IS NULL OR actor_id = $1)
              AND ($2::text IS NULL OR entity_type = $2)
              AND ($3::text IS NULL OR entity_id = $3)
              AND ($4::text IS NULL OR action = $4)
              AND ($5::text IS NULL OR module = $5)
              AND ($6::timestamptz IS NULL OR created_at >= $6)
              AND ($7::timestamptz IS NULL OR created_at <= $7)
            ORDER BY created_at DESC, id DESC
            OFFSET $8
            LIMIT $9
            "#
        ))
        .bind(&filter.actor_id)
        .bind(&filter.entity_type)
        .bind(&filter.entity_id)
        .bind(&filter.action)
        .bind(&filter.module)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.offset)
        .bind(filter.limit)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(AuditRecord::try_from).collect()
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_records")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    async fn latest(&self) -> Result<Option<AuditRecord>> {
        let row: Option<AuditRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM audit_records
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#
        ))
        .fetch_optional(&self.db)
        .await?;

        row.map(AuditRecord::try_from).transpose()
    }

    async fn latest_before(&self, cutoff: DateTime<Utc>) -> Result<Option<AuditRecord>> {
        let row: Option<AuditRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM audit_records
            WHERE created_at < $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(cutoff)
        .fetch_optional(&self.db)
        .await?;

        row.map(AuditRecord::try_from).transpose()
    }

    async fn update_chain_link(&self, id: Uuid, link: &ChainLink) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE audit_records
            SET chain_hash = $2, previous_hash = $3, signature = $4, chain_timestamp = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&link.hash)
        .bind(&link.previous_hash)
        .bind(&link.signature)
        .bind(link.timestamp)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("audit record {id}")));
        }
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM audit_records WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_dead_letter(&self, record: &AuditRecord, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_dead_letters (id, record, error, failed_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(serde_json::to_value(record)?)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let rows: Vec<DeadLetterRow> = sqlx::query_as(
            "SELECT id, record, error, failed_at FROM audit_dead_letters ORDER BY failed_at ASC",
        )
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(DeadLetter::try_from).collect()
    }

    async fn remove_dead_letter(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM audit_dead_letters WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

/// Directory backed by the `staff_profiles` lookup table.
pub struct PgActorDirectory {
    db: PgPool,
}

impl PgActorDirectory {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ActorDirectory for PgActorDirectory {
    async fn resolve(&self, actor_id: &str) -> Result<Option<Uuid>> {
        let profile: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM staff_profiles WHERE external_id = $1")
                .bind(actor_id)
                .fetch_optional(&self.db)
                .await?;
        Ok(profile)
    }
}
