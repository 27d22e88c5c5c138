use std::sync::Arc;

use uuid::Uuid;

use crate::db::operations::{
    get_gaps, get_mastery, get_strategy, upsert_content, upsert_dependency_edge, upsert_gap,
    upsert_mastery, upsert_source, upsert_strategy, ContentRow, DependencyEdgeRow, GapRow,
    MasteryRow, SourceRow, StrategyRow,
};
use crate::db::DatabaseProxy;
use crate::engine::types::{
    AuthoritySource, ConfidenceLevel, DependencyEdge, DomainStrategyState, GapSeverity,
    KnowledgeGap, SwitchingRules, TeachingMode, TeachingStrategy, TopicMastery, VerifiedContent,
};
use crate::error::PersistenceError;

/// Write-through mapping between engine records and their database rows.
/// Version counters carried on the records double as the optimistic guard:
/// an upsert that loses the race reports `StaleVersion` and the caller keeps
/// its in-memory copy authoritative.
pub struct EnginePersistence {
    db_proxy: Arc<DatabaseProxy>,
}

impl EnginePersistence {
    pub fn new(db_proxy: Arc<DatabaseProxy>) -> Self {
        Self { db_proxy }
    }

    pub async fn save_edge(
        &self,
        tenant_id: Uuid,
        edge: &DependencyEdge,
        graph_version: i64,
    ) -> Result<(), PersistenceError> {
        let row = DependencyEdgeRow {
            tenant_id,
            prerequisite_id: edge.prerequisite,
            dependent_id: edge.dependent,
            kind: edge.kind.as_str().to_string(),
            strength: edge.strength,
            graph_version,
        };
        upsert_dependency_edge(&self.db_proxy, &row).await?;
        Ok(())
    }

    pub async fn save_strategy(
        &self,
        strategy: &TeachingStrategy,
        state: &DomainStrategyState,
    ) -> Result<(), PersistenceError> {
        let row = StrategyRow {
            tenant_id: state.tenant_id,
            domain_id: state.domain_id,
            primary_mode: strategy.primary_mode.as_str().to_string(),
            fallback_modes: serde_json::to_value(&strategy.fallback_modes).unwrap_or_default(),
            switching_rules: serde_json::to_value(&strategy.switching_rules).unwrap_or_default(),
            active_mode: state.active_mode.as_str().to_string(),
            fallback_cursor: state.fallback_cursor,
            consecutive_failures: state.consecutive_failures as i32,
            recent_engagement: state.recent_engagement,
            engagement_samples: state.engagement_samples as i32,
            version: state.version,
        };
        if !upsert_strategy(&self.db_proxy, &row).await? {
            return Err(PersistenceError::StaleVersion {
                entity: "domain_teaching_strategies",
            });
        }
        Ok(())
    }

    pub async fn load_strategy(
        &self,
        tenant_id: Uuid,
        domain_id: Uuid,
    ) -> Result<Option<(TeachingStrategy, DomainStrategyState)>, PersistenceError> {
        let row = match get_strategy(&self.db_proxy, tenant_id, domain_id).await? {
            Some(row) => row,
            None => return Ok(None),
        };

        let primary_mode =
            TeachingMode::parse(&row.primary_mode).unwrap_or(TeachingMode::Socratic);
        let strategy = TeachingStrategy {
            primary_mode,
            fallback_modes: serde_json::from_value(row.fallback_modes).unwrap_or_default(),
            switching_rules: serde_json::from_value::<SwitchingRules>(row.switching_rules)
                .unwrap_or_default(),
        };
        let state = DomainStrategyState {
            tenant_id: row.tenant_id,
            domain_id: row.domain_id,
            active_mode: TeachingMode::parse(&row.active_mode).unwrap_or(primary_mode),
            fallback_cursor: row.fallback_cursor,
            consecutive_failures: row.consecutive_failures.max(0) as u32,
            recent_engagement: row.recent_engagement,
            engagement_samples: row.engagement_samples.max(0) as u32,
            version: row.version,
        };
        Ok(Some((strategy, state)))
    }

    pub async fn save_mastery(
        &self,
        mastery: &TopicMastery,
        gaps: &[KnowledgeGap],
    ) -> Result<(), PersistenceError> {
        let row = MasteryRow {
            tenant_id: mastery.tenant_id,
            learner_id: mastery.learner_id,
            topic_id: mastery.topic_id,
            confidence_level: mastery.confidence_level.as_str().to_string(),
            review_count: mastery.review_count,
            consecutive_understood: mastery.consecutive_understood as i32,
            last_reviewed: mastery.last_reviewed,
            mastery_date: mastery.mastery_date,
            teaching_modes_used: serde_json::to_value(&mastery.teaching_modes_used)
                .unwrap_or_default(),
            applied_sessions: serde_json::to_value(&mastery.applied_sessions).unwrap_or_default(),
            version: mastery.version,
        };
        if !upsert_mastery(&self.db_proxy, &row).await? {
            return Err(PersistenceError::StaleVersion {
                entity: "topic_mastery",
            });
        }

        for gap in gaps {
            let gap_row = GapRow {
                gap_id: gap.gap_id,
                tenant_id: gap.tenant_id,
                learner_id: gap.learner_id,
                topic_id: gap.topic_id,
                severity: gap.severity.as_str().to_string(),
                description: gap.description.clone(),
                identified_date: gap.identified_date,
                resolution_date: gap.resolution_date,
                resolution_notes: gap.resolution_notes.clone(),
                related_sessions: serde_json::to_value(&gap.related_sessions)
                    .unwrap_or_default(),
                version: gap.version,
            };
            upsert_gap(&self.db_proxy, &gap_row).await?;
        }
        Ok(())
    }

    pub async fn load_mastery(
        &self,
        tenant_id: Uuid,
        learner_id: Uuid,
        topic_id: Uuid,
    ) -> Result<Option<(TopicMastery, Vec<KnowledgeGap>)>, PersistenceError> {
        let row = match get_mastery(&self.db_proxy, tenant_id, learner_id, topic_id).await? {
            Some(row) => row,
            None => return Ok(None),
        };

        let mastery = TopicMastery {
            tenant_id: row.tenant_id,
            learner_id: row.learner_id,
            topic_id: row.topic_id,
            confidence_level: ConfidenceLevel::parse(&row.confidence_level),
            review_count: row.review_count,
            consecutive_understood: row.consecutive_understood.max(0) as u32,
            last_reviewed: row.last_reviewed,
            mastery_date: row.mastery_date,
            teaching_modes_used: serde_json::from_value(row.teaching_modes_used)
                .unwrap_or_default(),
            applied_sessions: serde_json::from_value(row.applied_sessions).unwrap_or_default(),
            version: row.version,
        };

        let gaps = get_gaps(&self.db_proxy, tenant_id, learner_id, topic_id)
            .await?
            .into_iter()
            .map(|g| KnowledgeGap {
                gap_id: g.gap_id,
                tenant_id: g.tenant_id,
                learner_id: g.learner_id,
                topic_id: g.topic_id,
                severity: GapSeverity::parse(&g.severity),
                description: g.description,
                identified_date: g.identified_date,
                resolution_date: g.resolution_date,
                resolution_notes: g.resolution_notes,
                related_sessions: serde_json::from_value(g.related_sessions).unwrap_or_default(),
                version: g.version,
            })
            .collect();

        Ok(Some((mastery, gaps)))
    }

    pub async fn save_source(
        &self,
        tenant_id: Uuid,
        source: &AuthoritySource,
    ) -> Result<(), PersistenceError> {
        let row = SourceRow {
            source_id: source.source_id,
            tenant_id,
            source_name: source.source_name.clone(),
            base_url: source.base_url.clone(),
            trust_score: source.trust_score,
        };
        upsert_source(&self.db_proxy, &row).await?;
        Ok(())
    }

    pub async fn save_content(&self, content: &VerifiedContent) -> Result<(), PersistenceError> {
        let row = ContentRow {
            content_id: content.content_id,
            tenant_id: content.tenant_id,
            concept_id: content.concept_id,
            content_text: content.content_text.clone(),
            confidence_score: content.confidence_score,
            verified_at: content.verified_at,
            needs_reverification_after: content.needs_reverification_after,
            sources: serde_json::to_value(&content.sources).unwrap_or_default(),
            version: content.version,
        };
        if !upsert_content(&self.db_proxy, &row).await? {
            return Err(PersistenceError::StaleVersion {
                entity: "verified_content",
            });
        }
        Ok(())
    }
}
