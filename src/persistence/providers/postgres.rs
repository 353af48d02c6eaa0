use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{WorkflowError, WorkflowResult};
use crate::events::ProgressEvent;
use crate::persistence::{
    ProgressLog, ResultStore, ResumedRecord, SearchRecord, SuspendRecord, SuspendStore,
};

const SUSPEND_COLUMNS: &str = "id, run_id, owner_id, step_id, suspend_payload, resume_payload, \
     snapshot, suspended, resume_error, created_at, updated_at";

#[derive(Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn new(connection_string: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(connection_string)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}

fn suspend_record_from_row(row: &PgRow) -> WorkflowResult<SuspendRecord> {
    Ok(SuspendRecord {
        id: row.try_get("id")?,
        run_id: row.try_get("run_id")?,
        owner_id: row.try_get("owner_id")?,
        step_id: row.try_get("step_id")?,
        suspend_payload: row.try_get("suspend_payload")?,
        resume_payload: row.try_get("resume_payload")?,
        snapshot: row.try_get("snapshot")?,
        suspended: row.try_get("suspended")?,
        resume_error: row.try_get("resume_error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn event_from_row(row: &PgRow) -> WorkflowResult<ProgressEvent> {
    let seq: i64 = row.try_get("seq")?;
    let step: i16 = row.try_get("step")?;
    let timestamp: DateTime<Utc> = row.try_get("created_at")?;
    Ok(ProgressEvent {
        run_id: row.try_get("run_id")?,
        seq: u64::try_from(seq).map_err(WorkflowError::persistence)?,
        step: u8::try_from(step).map_err(WorkflowError::persistence)?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        error: row.try_get("error")?,
        error_type: row.try_get("error_type")?,
        timestamp,
    })
}

fn to_db_seq(seq: u64) -> WorkflowResult<i64> {
    i64::try_from(seq).map_err(WorkflowError::persistence)
}

#[async_trait]
impl SuspendStore for PostgresStore {
    async fn save(
        &self,
        run_id: &str,
        owner_id: Option<&str>,
        step_id: &str,
        snapshot: serde_json::Value,
        suspend_payload: serde_json::Value,
    ) -> WorkflowResult<String> {
        let id = Uuid::new_v4().to_string();

        // The partial unique index on (run_id) WHERE suspended enforces one active record.
        let inserted = sqlx::query(
            r#"
            INSERT INTO suspended_workflows
                (id, run_id, owner_id, step_id, suspend_payload, snapshot, suspended, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE, NOW(), NOW())
            "#,
        )
        .bind(&id)
        .bind(run_id)
        .bind(owner_id)
        .bind(step_id)
        .bind(suspend_payload)
        .bind(snapshot)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(id),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                WorkflowError::Conflict(format!("run {run_id} already has an active suspension")),
            ),
            Err(err) => Err(err.into()),
        }
    }

    async fn resume(
        &self,
        run_id: &str,
        resume_payload: serde_json::Value,
    ) -> WorkflowResult<ResumedRecord> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(&format!(
            r#"
            UPDATE suspended_workflows
            SET suspended = FALSE, resume_payload = $2, resume_error = NULL, updated_at = NOW()
            WHERE run_id = $1 AND suspended
            RETURNING {SUSPEND_COLUMNS}
            "#
        ))
        .bind(run_id)
        .bind(resume_payload)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = updated {
            let record = suspend_record_from_row(&row)?;
            tx.commit().await?;
            return Ok(ResumedRecord {
                record,
                first_resume: true,
            });
        }

        let latest = sqlx::query(&format!(
            "SELECT {SUSPEND_COLUMNS} FROM suspended_workflows \
             WHERE run_id = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(run_id)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;

        match latest {
            Some(row) => Ok(ResumedRecord {
                record: suspend_record_from_row(&row)?,
                first_resume: false,
            }),
            None => Err(WorkflowError::NotFound(format!(
                "suspension for run {run_id}"
            ))),
        }
    }

    async fn load_active(&self, run_id: &str) -> WorkflowResult<Option<SuspendRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {SUSPEND_COLUMNS} FROM suspended_workflows WHERE run_id = $1 AND suspended"
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(suspend_record_from_row).transpose()
    }

    async fn mark_resume_error(&self, run_id: &str, message: &str) -> WorkflowResult<()> {
        sqlx::query(
            "UPDATE suspended_workflows SET resume_error = $2, updated_at = NOW() \
             WHERE run_id = $1 AND suspended",
        )
        .bind(run_id)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn discard(&self, run_id: &str) -> WorkflowResult<()> {
        sqlx::query(
            "UPDATE suspended_workflows SET suspended = FALSE, updated_at = NOW() \
             WHERE run_id = $1 AND suspended",
        )
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ProgressLog for PostgresStore {
    async fn append(&self, event: &ProgressEvent) -> WorkflowResult<()> {
        sqlx::query(
            r#"
            INSERT INTO progress_events
                (run_id, seq, step, event_type, payload, error, error_type, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (run_id, seq) DO NOTHING
            "#,
        )
        .bind(&event.run_id)
        .bind(to_db_seq(event.seq)?)
        .bind(i16::from(event.step))
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.error)
        .bind(&event.error_type)
        .bind(event.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self, run_id: &str, after: Option<u64>) -> WorkflowResult<Vec<ProgressEvent>> {
        let after = to_db_seq(after.unwrap_or(0))?;
        let rows = sqlx::query(
            r#"
            SELECT run_id, seq, step, event_type, payload, error, error_type, created_at
            FROM progress_events
            WHERE run_id = $1 AND seq > $2
            ORDER BY seq
            "#,
        )
        .bind(run_id)
        .bind(after)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(event_from_row).collect()
    }

    async fn last_seq(&self, run_id: &str) -> WorkflowResult<Option<u64>> {
        let row = sqlx::query("SELECT MAX(seq) AS last FROM progress_events WHERE run_id = $1")
            .bind(run_id)
            .fetch_one(&self.pool)
            .await?;
        let last: Option<i64> = row.try_get("last")?;
        last.map(|seq| u64::try_from(seq).map_err(WorkflowError::persistence))
            .transpose()
    }
}

#[async_trait]
impl ResultStore for PostgresStore {
    async fn save_result(&self, record: &SearchRecord) -> WorkflowResult<()> {
        let sources = serde_json::to_value(&record.sources)?;

        sqlx::query(
            r#"
            INSERT INTO search_records
                (run_id, enhanced_query, sources, summary, completed, search_approach, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (run_id) DO UPDATE SET
                enhanced_query = EXCLUDED.enhanced_query,
                sources = EXCLUDED.sources,
                summary = EXCLUDED.summary,
                completed = EXCLUDED.completed,
                search_approach = EXCLUDED.search_approach
            "#,
        )
        .bind(&record.run_id)
        .bind(&record.enhanced_query)
        .bind(sources)
        .bind(&record.summary)
        .bind(record.completed)
        .bind(&record.search_approach)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_result(&self, run_id: &str) -> WorkflowResult<Option<SearchRecord>> {
        let row = sqlx::query(
            "SELECT run_id, enhanced_query, sources, summary, completed, search_approach \
             FROM search_records WHERE run_id = $1",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let sources: serde_json::Value = row.try_get("sources")?;
        Ok(Some(SearchRecord {
            run_id: row.try_get("run_id")?,
            enhanced_query: row.try_get("enhanced_query")?,
            sources: serde_json::from_value(sources)?,
            summary: row.try_get("summary")?,
            completed: row.try_get("completed")?,
            search_approach: row.try_get("search_approach")?,
        }))
    }
}
