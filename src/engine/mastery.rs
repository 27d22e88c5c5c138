use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::engine::types::{
    ConfidenceLevel, GapSeverity, KnowledgeGap, OutcomeUpdate, SessionOutcome, TeachingMode,
    TopicMastery,
};

pub fn new_mastery(
    tenant_id: Uuid,
    learner_id: Uuid,
    topic_id: Uuid,
    now: DateTime<Utc>,
) -> TopicMastery {
    TopicMastery {
        tenant_id,
        learner_id,
        topic_id,
        confidence_level: ConfidenceLevel::Low,
        review_count: 0,
        consecutive_understood: 0,
        last_reviewed: now,
        mastery_date: now.date_naive(),
        teaching_modes_used: Vec::new(),
        applied_sessions: Default::default(),
        version: 0,
    }
}

/// Applies one session outcome to a learner/topic mastery record and its gap
/// history. De-duplicates by session ref before touching any counter, so a
/// replayed submission is a silent no-op.
pub fn apply_outcome(
    mastery: &mut TopicMastery,
    gaps: &mut Vec<KnowledgeGap>,
    outcome: SessionOutcome,
    session_ref: Uuid,
    mode: TeachingMode,
    promotion_streak: u32,
    now: DateTime<Utc>,
) -> OutcomeUpdate {
    if mastery.applied_sessions.contains(&session_ref) {
        tracing::debug!(
            learner = %mastery.learner_id,
            topic = %mastery.topic_id,
            session = %session_ref,
            "duplicate outcome submission ignored"
        );
        return OutcomeUpdate {
            confidence_level: mastery.confidence_level,
            review_count: mastery.review_count,
            promoted: false,
            open_gap: gaps.iter().find(|g| g.is_open()).cloned(),
            duplicate: true,
            strategy_signal: None,
        };
    }

    mastery.applied_sessions.insert(session_ref);
    mastery.review_count += 1;
    mastery.last_reviewed = now;
    mastery.version += 1;
    if !mastery.teaching_modes_used.contains(&mode) {
        mastery.teaching_modes_used.push(mode);
    }

    let mut promoted = false;
    match outcome {
        SessionOutcome::FullyUnderstood => {
            mastery.consecutive_understood += 1;
            if mastery.consecutive_understood >= promotion_streak
                && mastery.confidence_level < ConfidenceLevel::High
            {
                mastery.confidence_level = mastery.confidence_level.step_up();
                mastery.consecutive_understood = 0;
                promoted = true;
            }
        }
        SessionOutcome::PartiallyUnderstood => {
            mastery.consecutive_understood = 0;
        }
        SessionOutcome::NotUnderstood => {
            mastery.consecutive_understood = 0;
            record_gap(mastery, gaps, session_ref, now);
        }
    }

    OutcomeUpdate {
        confidence_level: mastery.confidence_level,
        review_count: mastery.review_count,
        promoted,
        open_gap: gaps.iter().find(|g| g.is_open()).cloned(),
        duplicate: false,
        strategy_signal: None,
    }
}

/// At most one open gap exists per learner/topic: repeated failures escalate
/// the existing record instead of duplicating it.
fn record_gap(
    mastery: &TopicMastery,
    gaps: &mut Vec<KnowledgeGap>,
    session_ref: Uuid,
    now: DateTime<Utc>,
) {
    if let Some(open) = gaps.iter_mut().find(|g| g.is_open()) {
        let before = open.severity;
        open.severity = open.severity.escalate();
        open.related_sessions.push(session_ref);
        open.version += 1;
        if open.severity != before {
            tracing::info!(
                learner = %mastery.learner_id,
                topic = %mastery.topic_id,
                severity = open.severity.as_str(),
                "knowledge gap escalated"
            );
        }
        return;
    }

    gaps.push(KnowledgeGap {
        gap_id: Uuid::new_v4(),
        tenant_id: mastery.tenant_id,
        learner_id: mastery.learner_id,
        topic_id: mastery.topic_id,
        severity: GapSeverity::Low,
        description: "learner did not understand the topic in an assessed session".to_string(),
        identified_date: now.date_naive(),
        resolution_date: None,
        resolution_notes: None,
        related_sessions: vec![session_ref],
        version: 0,
    });
}

/// Closes the open gap, keeping it queryable as history.
pub fn resolve_open_gap(
    gaps: &mut [KnowledgeGap],
    notes: &str,
    now: DateTime<Utc>,
) -> Option<KnowledgeGap> {
    let open = gaps.iter_mut().find(|g| g.is_open())?;
    open.resolution_date = Some(now.date_naive());
    open.resolution_notes = Some(notes.to_string());
    open.version += 1;
    Some(open.clone())
}
