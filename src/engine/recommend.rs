use std::cmp::Reverse;

use uuid::Uuid;

use crate::config::ReadinessWeights;
use crate::engine::types::{
    ConfidenceLevel, DependencyKind, GapSeverity, Prerequisite, Recommendation,
    RecommendationOutcome,
};

/// A topic may be recommended only when every `required` prerequisite sits at
/// medium confidence or better. Recommended/related edges never block.
pub fn is_eligible(
    prerequisites: &[Prerequisite],
    confidence_of: impl Fn(Uuid) -> Option<ConfidenceLevel>,
) -> bool {
    prerequisites
        .iter()
        .filter(|p| p.kind == DependencyKind::Required)
        .all(|p| confidence_of(p.topic_id).unwrap_or_default() >= ConfidenceLevel::Medium)
}

/// Advisory readiness in [0, 1]: unmet recommended/related prerequisites pull
/// the score down proportionally to their strength.
pub fn readiness_score(
    prerequisites: &[Prerequisite],
    confidence_of: impl Fn(Uuid) -> Option<ConfidenceLevel>,
    weights: &ReadinessWeights,
) -> f64 {
    let mut score = 1.0;
    for prereq in prerequisites {
        let met = confidence_of(prereq.topic_id).unwrap_or_default() >= ConfidenceLevel::Medium;
        if met {
            continue;
        }
        match prereq.kind {
            DependencyKind::Required => {}
            DependencyKind::Recommended => {
                score -= prereq.strength * weights.recommended_penalty
            }
            DependencyKind::Related => score -= prereq.strength * weights.related_penalty,
        }
    }
    score.clamp(0.0, 1.0)
}

/// One domain topic annotated with everything the ranking needs.
#[derive(Debug, Clone)]
pub struct CandidateTopic {
    pub topic_id: Uuid,
    pub confidence: Option<ConfidenceLevel>,
    pub eligible: bool,
    pub readiness_score: f64,
    pub open_gap_severity: Option<GapSeverity>,
    pub topo_index: usize,
    pub estimated_minutes: i32,
}

/// Ranks the domain's topics and picks what the learner should study next:
/// worst open gap first, then earliest in the study sequence, then shortest.
/// The two empty outcomes are reported separately so the caller can tell
/// "done" apart from "blocked".
pub fn recommend_next(candidates: &[CandidateTopic]) -> RecommendationOutcome {
    let unmastered: Vec<&CandidateTopic> = candidates
        .iter()
        .filter(|c| c.confidence.unwrap_or_default() < ConfidenceLevel::High)
        .collect();
    if unmastered.is_empty() {
        return RecommendationOutcome::AllMastered;
    }

    let best = unmastered
        .iter()
        .filter(|c| c.eligible)
        .min_by_key(|c| {
            (
                Reverse(gap_rank(c.open_gap_severity)),
                c.topo_index,
                c.estimated_minutes,
            )
        });

    match best {
        Some(candidate) => RecommendationOutcome::Topic(Recommendation {
            topic_id: candidate.topic_id,
            readiness_score: candidate.readiness_score,
            open_gap_severity: candidate.open_gap_severity,
            estimated_minutes: candidate.estimated_minutes,
        }),
        None => RecommendationOutcome::AllBlocked,
    }
}

fn gap_rank(severity: Option<GapSeverity>) -> u8 {
    match severity {
        Some(GapSeverity::High) => 3,
        Some(GapSeverity::Medium) => 2,
        Some(GapSeverity::Low) => 1,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(
        confidence: Option<ConfidenceLevel>,
        eligible: bool,
        gap: Option<GapSeverity>,
        topo_index: usize,
        minutes: i32,
    ) -> CandidateTopic {
        CandidateTopic {
            topic_id: Uuid::new_v4(),
            confidence,
            eligible,
            readiness_score: 1.0,
            open_gap_severity: gap,
            topo_index,
            estimated_minutes: minutes,
        }
    }

    #[test]
    fn test_worst_gap_wins_over_topo_order() {
        let early = candidate(Some(ConfidenceLevel::Low), true, None, 0, 30);
        let gapped = candidate(Some(ConfidenceLevel::Low), true, Some(GapSeverity::High), 5, 60);

        match recommend_next(&[early, gapped.clone()]) {
            RecommendationOutcome::Topic(rec) => assert_eq!(rec.topic_id, gapped.topic_id),
            other => panic!("expected topic, got {other:?}"),
        }
    }

    #[test]
    fn test_topo_order_breaks_gap_ties_then_duration() {
        let slow = candidate(None, true, None, 1, 90);
        let fast = candidate(None, true, None, 1, 20);
        let later = candidate(None, true, None, 2, 5);

        match recommend_next(&[slow, fast.clone(), later]) {
            RecommendationOutcome::Topic(rec) => assert_eq!(rec.topic_id, fast.topic_id),
            other => panic!("expected topic, got {other:?}"),
        }
    }

    #[test]
    fn test_all_mastered_vs_all_blocked_are_distinct() {
        let mastered = candidate(Some(ConfidenceLevel::High), true, None, 0, 10);
        assert!(matches!(
            recommend_next(&[mastered]),
            RecommendationOutcome::AllMastered
        ));

        let blocked = candidate(Some(ConfidenceLevel::Low), false, None, 0, 10);
        let done = candidate(Some(ConfidenceLevel::High), true, None, 1, 10);
        assert!(matches!(
            recommend_next(&[blocked, done]),
            RecommendationOutcome::AllBlocked
        ));
    }

    #[test]
    fn test_eligibility_requires_medium_on_required_edges_only() {
        let required = Uuid::new_v4();
        let related = Uuid::new_v4();
        let prereqs = vec![
            Prerequisite { topic_id: required, kind: DependencyKind::Required, strength: 1.0 },
            Prerequisite { topic_id: related, kind: DependencyKind::Related, strength: 1.0 },
        ];

        let low_required = |id: Uuid| {
            if id == required {
                Some(ConfidenceLevel::Low)
            } else {
                None
            }
        };
        assert!(!is_eligible(&prereqs, low_required));

        let met_required = |id: Uuid| {
            if id == required {
                Some(ConfidenceLevel::Medium)
            } else {
                None
            }
        };
        assert!(is_eligible(&prereqs, met_required));
    }

    #[test]
    fn test_readiness_penalizes_unmet_advisory_edges() {
        let recommended = Uuid::new_v4();
        let related = Uuid::new_v4();
        let prereqs = vec![
            Prerequisite { topic_id: recommended, kind: DependencyKind::Recommended, strength: 0.8 },
            Prerequisite { topic_id: related, kind: DependencyKind::Related, strength: 0.4 },
        ];

        let unseen = |_: Uuid| None;
        let score = readiness_score(&prereqs, unseen, &ReadinessWeights::default());
        // 1.0 - 0.8*0.5 - 0.4*0.25
        assert!((score - 0.5).abs() < 1e-9);

        let all_met = |_: Uuid| Some(ConfidenceLevel::High);
        assert!((readiness_score(&prereqs, all_met, &ReadinessWeights::default()) - 1.0).abs() < 1e-9);
    }
}
