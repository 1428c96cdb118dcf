use crate::error::Result;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

/// Pipeline stage names. Each stage caches one JSON artifact per key
/// (exam id or attempt id) with a UNIQUE(stage, key) constraint.
pub mod stage {
    pub const EXAM_ANALYSIS: &str = "exam_analysis";
    pub const SCORE_BREAKDOWN: &str = "score_breakdown";
    pub const AI_ANALYSIS: &str = "ai_analysis";
}

/// Read-through JSON artifact cache making the report pipeline idempotent:
/// a cache hit short-circuits recomputation (and, for the AI stage, the
/// provider call) unless the caller forces a recompute.
#[derive(Clone)]
pub struct ArtifactService {
    pool: PgPool,
}

impl ArtifactService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, stage: &str, key: Uuid) -> Result<Option<JsonValue>> {
        let payload: Option<JsonValue> = sqlx::query_scalar(
            r#"SELECT payload FROM pipeline_artifacts WHERE stage = $1 AND key = $2"#,
        )
        .bind(stage)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payload)
    }

    pub async fn put(&self, stage: &str, key: Uuid, payload: &JsonValue) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_artifacts (stage, key, payload)
            VALUES ($1, $2, $3)
            ON CONFLICT (stage, key)
            DO UPDATE SET payload = EXCLUDED.payload, created_at = NOW()
            "#,
        )
        .bind(stage)
        .bind(key)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn invalidate(&self, stage: &str, key: Uuid) -> Result<()> {
        sqlx::query(r#"DELETE FROM pipeline_artifacts WHERE stage = $1 AND key = $2"#)
            .bind(stage)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Read-through for pure stages: return the cached artifact, or run
    /// `compute`, store the result, and return it. `force` deletes and
    /// replaces the cached copy.
    pub async fn get_or_compute<F>(
        &self,
        stage: &str,
        key: Uuid,
        force: bool,
        compute: F,
    ) -> Result<JsonValue>
    where
        F: FnOnce() -> Result<JsonValue>,
    {
        if !force {
            if let Some(cached) = self.get(stage, key).await? {
                return Ok(cached);
            }
        }

        let payload = compute()?;
        self.put(stage, key, &payload).await?;
        Ok(payload)
    }
}
