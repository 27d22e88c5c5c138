use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::db::DatabaseProxy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyEdgeRow {
    pub tenant_id: Uuid,
    pub prerequisite_id: Uuid,
    pub dependent_id: Uuid,
    pub kind: String,
    pub strength: f64,
    pub graph_version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyRow {
    pub tenant_id: Uuid,
    pub domain_id: Uuid,
    pub primary_mode: String,
    pub fallback_modes: serde_json::Value,
    pub switching_rules: serde_json::Value,
    pub active_mode: String,
    pub fallback_cursor: i32,
    pub consecutive_failures: i32,
    pub recent_engagement: f64,
    pub engagement_samples: i32,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryRow {
    pub tenant_id: Uuid,
    pub learner_id: Uuid,
    pub topic_id: Uuid,
    pub confidence_level: String,
    pub review_count: i32,
    pub consecutive_understood: i32,
    pub last_reviewed: DateTime<Utc>,
    pub mastery_date: NaiveDate,
    pub teaching_modes_used: serde_json::Value,
    pub applied_sessions: serde_json::Value,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GapRow {
    pub gap_id: Uuid,
    pub tenant_id: Uuid,
    pub learner_id: Uuid,
    pub topic_id: Uuid,
    pub severity: String,
    pub description: String,
    pub identified_date: NaiveDate,
    pub resolution_date: Option<NaiveDate>,
    pub resolution_notes: Option<String>,
    pub related_sessions: serde_json::Value,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRow {
    pub source_id: Uuid,
    pub tenant_id: Uuid,
    pub source_name: String,
    pub base_url: String,
    pub trust_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRow {
    pub content_id: Uuid,
    pub tenant_id: Uuid,
    pub concept_id: Uuid,
    pub content_text: String,
    pub confidence_score: f64,
    pub verified_at: DateTime<Utc>,
    pub needs_reverification_after: NaiveDate,
    pub sources: serde_json::Value,
    pub version: i64,
}

pub async fn upsert_dependency_edge(
    proxy: &DatabaseProxy,
    edge: &DependencyEdgeRow,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO "topic_dependencies" (
            "tenant_id", "prerequisite_id", "dependent_id",
            "kind", "strength", "graph_version"
        ) VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT ("tenant_id", "prerequisite_id", "dependent_id") DO UPDATE SET
            "kind" = EXCLUDED."kind",
            "strength" = EXCLUDED."strength",
            "graph_version" = EXCLUDED."graph_version"
        "#,
    )
    .bind(edge.tenant_id)
    .bind(edge.prerequisite_id)
    .bind(edge.dependent_id)
    .bind(&edge.kind)
    .bind(edge.strength)
    .bind(edge.graph_version)
    .execute(proxy.pool())
    .await?;
    Ok(())
}

pub async fn get_strategy(
    proxy: &DatabaseProxy,
    tenant_id: Uuid,
    domain_id: Uuid,
) -> Result<Option<StrategyRow>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT * FROM "domain_teaching_strategies"
        WHERE "tenant_id" = $1 AND "domain_id" = $2
        "#,
    )
    .bind(tenant_id)
    .bind(domain_id)
    .fetch_optional(proxy.pool())
    .await?;
    Ok(row.map(|r| map_strategy(&r)))
}

/// Upsert guarded by the optimistic version counter: a row that has moved
/// past the incoming version is left untouched and reported as stale.
pub async fn upsert_strategy(
    proxy: &DatabaseProxy,
    row: &StrategyRow,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO "domain_teaching_strategies" (
            "tenant_id", "domain_id", "primary_mode", "fallback_modes",
            "switching_rules", "active_mode", "fallback_cursor",
            "consecutive_failures", "recent_engagement", "engagement_samples",
            "version"
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT ("tenant_id", "domain_id") DO UPDATE SET
            "primary_mode" = EXCLUDED."primary_mode",
            "fallback_modes" = EXCLUDED."fallback_modes",
            "switching_rules" = EXCLUDED."switching_rules",
            "active_mode" = EXCLUDED."active_mode",
            "fallback_cursor" = EXCLUDED."fallback_cursor",
            "consecutive_failures" = EXCLUDED."consecutive_failures",
            "recent_engagement" = EXCLUDED."recent_engagement",
            "engagement_samples" = EXCLUDED."engagement_samples",
            "version" = EXCLUDED."version"
        WHERE "domain_teaching_strategies"."version" <= EXCLUDED."version"
        "#,
    )
    .bind(row.tenant_id)
    .bind(row.domain_id)
    .bind(&row.primary_mode)
    .bind(&row.fallback_modes)
    .bind(&row.switching_rules)
    .bind(&row.active_mode)
    .bind(row.fallback_cursor)
    .bind(row.consecutive_failures)
    .bind(row.recent_engagement)
    .bind(row.engagement_samples)
    .bind(row.version)
    .execute(proxy.pool())
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_mastery(
    proxy: &DatabaseProxy,
    tenant_id: Uuid,
    learner_id: Uuid,
    topic_id: Uuid,
) -> Result<Option<MasteryRow>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT * FROM "topic_mastery"
        WHERE "tenant_id" = $1 AND "learner_id" = $2 AND "topic_id" = $3
        "#,
    )
    .bind(tenant_id)
    .bind(learner_id)
    .bind(topic_id)
    .fetch_optional(proxy.pool())
    .await?;
    Ok(row.map(|r| map_mastery(&r)))
}

pub async fn upsert_mastery(
    proxy: &DatabaseProxy,
    row: &MasteryRow,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO "topic_mastery" (
            "tenant_id", "learner_id", "topic_id", "confidence_level",
            "review_count", "consecutive_understood", "last_reviewed",
            "mastery_date", "teaching_modes_used", "applied_sessions", "version"
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT ("tenant_id", "learner_id", "topic_id") DO UPDATE SET
            "confidence_level" = EXCLUDED."confidence_level",
            "review_count" = EXCLUDED."review_count",
            "consecutive_understood" = EXCLUDED."consecutive_understood",
            "last_reviewed" = EXCLUDED."last_reviewed",
            "mastery_date" = EXCLUDED."mastery_date",
            "teaching_modes_used" = EXCLUDED."teaching_modes_used",
            "applied_sessions" = EXCLUDED."applied_sessions",
            "version" = EXCLUDED."version"
        WHERE "topic_mastery"."version" <= EXCLUDED."version"
        "#,
    )
    .bind(row.tenant_id)
    .bind(row.learner_id)
    .bind(row.topic_id)
    .bind(&row.confidence_level)
    .bind(row.review_count)
    .bind(row.consecutive_understood)
    .bind(row.last_reviewed)
    .bind(row.mastery_date)
    .bind(&row.teaching_modes_used)
    .bind(&row.applied_sessions)
    .bind(row.version)
    .execute(proxy.pool())
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_gaps(
    proxy: &DatabaseProxy,
    tenant_id: Uuid,
    learner_id: Uuid,
    topic_id: Uuid,
) -> Result<Vec<GapRow>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM "knowledge_gaps"
        WHERE "tenant_id" = $1 AND "learner_id" = $2 AND "topic_id" = $3
        ORDER BY "identified_date", "gap_id"
        "#,
    )
    .bind(tenant_id)
    .bind(learner_id)
    .bind(topic_id)
    .fetch_all(proxy.pool())
    .await?;
    Ok(rows.iter().map(map_gap).collect())
}

pub async fn upsert_gap(proxy: &DatabaseProxy, row: &GapRow) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO "knowledge_gaps" (
            "gap_id", "tenant_id", "learner_id", "topic_id", "severity",
            "description", "identified_date", "resolution_date",
            "resolution_notes", "related_sessions", "version"
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT ("gap_id") DO UPDATE SET
            "severity" = EXCLUDED."severity",
            "resolution_date" = EXCLUDED."resolution_date",
            "resolution_notes" = EXCLUDED."resolution_notes",
            "related_sessions" = EXCLUDED."related_sessions",
            "version" = EXCLUDED."version"
        WHERE "knowledge_gaps"."version" <= EXCLUDED."version"
        "#,
    )
    .bind(row.gap_id)
    .bind(row.tenant_id)
    .bind(row.learner_id)
    .bind(row.topic_id)
    .bind(&row.severity)
    .bind(&row.description)
    .bind(row.identified_date)
    .bind(row.resolution_date)
    .bind(&row.resolution_notes)
    .bind(&row.related_sessions)
    .bind(row.version)
    .execute(proxy.pool())
    .await?;
    Ok(())
}

pub async fn upsert_source(proxy: &DatabaseProxy, row: &SourceRow) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO "authority_sources" (
            "source_id", "tenant_id", "source_name", "base_url", "trust_score"
        ) VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT ("source_id") DO UPDATE SET
            "source_name" = EXCLUDED."source_name",
            "base_url" = EXCLUDED."base_url",
            "trust_score" = EXCLUDED."trust_score"
        "#,
    )
    .bind(row.source_id)
    .bind(row.tenant_id)
    .bind(&row.source_name)
    .bind(&row.base_url)
    .bind(row.trust_score)
    .execute(proxy.pool())
    .await?;
    Ok(())
}

pub async fn upsert_content(proxy: &DatabaseProxy, row: &ContentRow) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO "verified_content" (
            "content_id", "tenant_id", "concept_id", "content_text",
            "confidence_score", "verified_at", "needs_reverification_after",
            "sources", "version"
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT ("content_id") DO UPDATE SET
            "confidence_score" = EXCLUDED."confidence_score",
            "verified_at" = EXCLUDED."verified_at",
            "needs_reverification_after" = EXCLUDED."needs_reverification_after",
            "sources" = EXCLUDED."sources",
            "version" = EXCLUDED."version"
        WHERE "verified_content"."version" <= EXCLUDED."version"
        "#,
    )
    .bind(row.content_id)
    .bind(row.tenant_id)
    .bind(row.concept_id)
    .bind(&row.content_text)
    .bind(row.confidence_score)
    .bind(row.verified_at)
    .bind(row.needs_reverification_after)
    .bind(&row.sources)
    .bind(row.version)
    .execute(proxy.pool())
    .await?;
    Ok(result.rows_affected() > 0)
}

fn map_strategy(row: &PgRow) -> StrategyRow {
    StrategyRow {
        tenant_id: row.get("tenant_id"),
        domain_id: row.get("domain_id"),
        primary_mode: row.get("primary_mode"),
        fallback_modes: row.get("fallback_modes"),
        switching_rules: row.get("switching_rules"),
        active_mode: row.get("active_mode"),
        fallback_cursor: row.get("fallback_cursor"),
        consecutive_failures: row.get("consecutive_failures"),
        recent_engagement: row.get("recent_engagement"),
        engagement_samples: row.get("engagement_samples"),
        version: row.get("version"),
    }
}

fn map_mastery(row: &PgRow) -> MasteryRow {
    MasteryRow {
        tenant_id: row.get("tenant_id"),
        learner_id: row.get("learner_id"),
        topic_id: row.get("topic_id"),
        confidence_level: row.get("confidence_level"),
        review_count: row.get("review_count"),
        consecutive_understood: row.get("consecutive_understood"),
        last_reviewed: row.get("last_reviewed"),
        mastery_date: row.get("mastery_date"),
        teaching_modes_used: row.get("teaching_modes_used"),
        applied_sessions: row.get("applied_sessions"),
        version: row.get("version"),
    }
}

fn map_gap(row: &PgRow) -> GapRow {
    GapRow {
        gap_id: row.get("gap_id"),
        tenant_id: row.get("tenant_id"),
        learner_id: row.get("learner_id"),
        topic_id: row.get("topic_id"),
        severity: row.get("severity"),
        description: row.get("description"),
        identified_date: row.get("identified_date"),
        resolution_date: row.get("resolution_date"),
        resolution_notes: row.get("resolution_notes"),
        related_sessions: row.get("related_sessions"),
        version: row.get("version"),
    }
}
