//! End-to-end tests for the engine facade: registration through dependency
//! graph, mastery tracking, strategy switching and recommendation, all with
//! persistence disabled.

use std::sync::Once;

use chrono::NaiveDate;
use uuid::Uuid;

use tutor_engine::config::EngineConfig;
use tutor_engine::engine::types::{
    ConfidenceLevel, DependencyKind, DifficultyLevel, GapSeverity, RecommendationOutcome,
    SessionOutcome, SourceCitation, StrategySignal, SwitchReason, SwitchingRules, TeachingMode,
    TeachingModeConfig,
};
use tutor_engine::error::{CatalogError, GraphError, MasteryError, StrategyError};
use tutor_engine::TutorEngine;

static INIT_LOGS: Once = Once::new();

fn engine() -> TutorEngine {
    INIT_LOGS.call_once(|| {
        if let Some(guard) = tutor_engine::logging::init_tracing("warn") {
            std::mem::forget(guard);
        }
    });
    TutorEngine::new(EngineConfig::default(), None)
}

struct Fixture {
    tenant: Uuid,
    learner: Uuid,
    domain: Uuid,
}

async fn setup(engine: &TutorEngine) -> Fixture {
    let tenant = Uuid::new_v4();
    let learner = engine
        .register_learner(tenant, "Ada", "ada@example.org")
        .await
        .unwrap();
    let goal = engine
        .register_goal(tenant, learner.learner_id, "pass the algebra exam")
        .await
        .unwrap();
    let domain = engine
        .register_domain(tenant, goal.goal_id, "algebra", 60.0, None)
        .await
        .unwrap();
    Fixture {
        tenant,
        learner: learner.learner_id,
        domain: domain.domain_id,
    }
}

async fn add_topic(engine: &TutorEngine, fx: &Fixture, name: &str, minutes: i32) -> Uuid {
    engine
        .register_topic(fx.tenant, fx.domain, name, DifficultyLevel::Medium, minutes)
        .await
        .unwrap()
        .topic_id
}

async fn record(
    engine: &TutorEngine,
    fx: &Fixture,
    topic: Uuid,
    outcome: SessionOutcome,
) -> tutor_engine::engine::types::OutcomeUpdate {
    engine
        .record_outcome(
            fx.tenant,
            fx.learner,
            topic,
            outcome,
            Uuid::new_v4(),
            TeachingMode::Socratic,
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_registration_enforces_tenant_scoping() {
    let engine = engine();
    let fx = setup(&engine).await;

    // Same email, same tenant: rejected.
    let err = engine
        .register_learner(fx.tenant, "Ada again", "ada@example.org")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        CatalogError::DuplicateEmail("ada@example.org".to_string())
    );

    // Same email, other tenant: fine.
    let other_tenant = Uuid::new_v4();
    assert!(engine
        .register_learner(other_tenant, "Ada", "ada@example.org")
        .await
        .is_ok());

    // A topic from another tenant never gates this tenant's graph.
    let topic = add_topic(&engine, &fx, "linear equations", 30).await;
    let err = engine
        .add_dependency(
            other_tenant,
            topic,
            Uuid::new_v4(),
            DependencyKind::Required,
            1.0,
        )
        .await
        .unwrap_err();
    assert_eq!(err, GraphError::UnknownTopic(topic));
}

#[tokio::test]
async fn test_cycle_rejected_through_the_facade() {
    let engine = engine();
    let fx = setup(&engine).await;
    let a = add_topic(&engine, &fx, "fractions", 20).await;
    let b = add_topic(&engine, &fx, "ratios", 20).await;
    let c = add_topic(&engine, &fx, "proportions", 20).await;

    engine
        .add_dependency(fx.tenant, a, b, DependencyKind::Required, 1.0)
        .await
        .unwrap();
    engine
        .add_dependency(fx.tenant, b, c, DependencyKind::Required, 1.0)
        .await
        .unwrap();

    let err = engine
        .add_dependency(fx.tenant, c, a, DependencyKind::Related, 0.2)
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::Cycle { .. }));

    // The rejected edge left nothing behind.
    assert_eq!(engine.prerequisites_of(fx.tenant, a).await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_topological_order_follows_required_edges_then_registration() {
    let engine = engine();
    let fx = setup(&engine).await;
    let a = add_topic(&engine, &fx, "first registered", 10).await;
    let b = add_topic(&engine, &fx, "second registered", 10).await;
    let c = add_topic(&engine, &fx, "third registered", 10).await;

    // c gates a; b floats freely, placed by registration order.
    engine
        .add_dependency(fx.tenant, c, a, DependencyKind::Required, 1.0)
        .await
        .unwrap();

    let order = engine.topological_order(fx.tenant, fx.domain).await.unwrap();
    assert_eq!(order, vec![b, c, a]);

    // Recomputing yields the same sequence.
    assert_eq!(
        engine.topological_order(fx.tenant, fx.domain).await.unwrap(),
        order
    );
}

#[tokio::test]
async fn test_promotion_after_streak_and_idempotent_replay() {
    let engine = engine();
    let fx = setup(&engine).await;
    let topic = add_topic(&engine, &fx, "quadratics", 45).await;

    record(&engine, &fx, topic, SessionOutcome::FullyUnderstood).await;
    record(&engine, &fx, topic, SessionOutcome::FullyUnderstood).await;
    let update = record(&engine, &fx, topic, SessionOutcome::FullyUnderstood).await;
    assert!(update.promoted);
    assert_eq!(update.confidence_level, ConfidenceLevel::Medium);

    // Replaying one session ref changes nothing.
    let session = Uuid::new_v4();
    engine
        .record_outcome(
            fx.tenant,
            fx.learner,
            topic,
            SessionOutcome::FullyUnderstood,
            session,
            TeachingMode::Lecture,
        )
        .await
        .unwrap();
    let replay = engine
        .record_outcome(
            fx.tenant,
            fx.learner,
            topic,
            SessionOutcome::FullyUnderstood,
            session,
            TeachingMode::Lecture,
        )
        .await
        .unwrap();
    assert!(replay.duplicate);

    let mastery = engine
        .topic_mastery(fx.tenant, fx.learner, topic)
        .await
        .unwrap();
    assert_eq!(mastery.review_count, 4);
}

#[tokio::test]
async fn test_failures_open_and_escalate_gap_then_resolve() {
    let engine = engine();
    let fx = setup(&engine).await;
    let topic = add_topic(&engine, &fx, "polynomials", 40).await;

    let first = record(&engine, &fx, topic, SessionOutcome::NotUnderstood).await;
    assert_eq!(first.open_gap.unwrap().severity, GapSeverity::Low);

    record(&engine, &fx, topic, SessionOutcome::NotUnderstood).await;
    let third = record(&engine, &fx, topic, SessionOutcome::NotUnderstood).await;
    assert_eq!(third.open_gap.unwrap().severity, GapSeverity::High);

    let closed = engine
        .resolve_gap(fx.tenant, fx.learner, topic, "re-taught with worked examples")
        .await
        .unwrap();
    assert!(closed.resolution_date.is_some());

    // Nothing left to resolve.
    let err = engine
        .resolve_gap(fx.tenant, fx.learner, topic, "again")
        .await
        .unwrap_err();
    assert!(matches!(err, MasteryError::NoOpenGap { .. }));

    // History keeps the closed record; a fresh failure opens a new low gap.
    record(&engine, &fx, topic, SessionOutcome::NotUnderstood).await;
    let history = engine.gap_history(fx.tenant, fx.learner, topic).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history.iter().filter(|g| g.is_open()).count(), 1);
}

#[tokio::test]
async fn test_open_gaps_sorted_worst_first_with_min_severity_filter() {
    let engine = engine();
    let fx = setup(&engine).await;
    let mild = add_topic(&engine, &fx, "sets", 15).await;
    let severe = add_topic(&engine, &fx, "logarithms", 35).await;

    record(&engine, &fx, mild, SessionOutcome::NotUnderstood).await;
    for _ in 0..3 {
        record(&engine, &fx, severe, SessionOutcome::NotUnderstood).await;
    }

    let all = engine.open_gaps(fx.tenant, fx.learner, None).await;
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].topic_id, severe);
    assert_eq!(all[0].severity, GapSeverity::High);

    let filtered = engine
        .open_gaps(fx.tenant, fx.learner, Some(GapSeverity::Medium))
        .await;
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].topic_id, severe);
}

#[tokio::test]
async fn test_failure_streak_drives_strategy_switch_through_record_outcome() {
    let engine = engine();
    let fx = setup(&engine).await;
    let topic = add_topic(&engine, &fx, "matrices", 50).await;

    engine
        .configure_strategy(
            fx.tenant,
            fx.domain,
            TeachingMode::Socratic,
            vec![TeachingMode::Lecture, TeachingMode::Demonstration],
            SwitchingRules {
                consecutive_failures_threshold: 3,
                low_engagement_threshold: 0.0,
                auto_switch_enabled: true,
            },
        )
        .await
        .unwrap();

    record(&engine, &fx, topic, SessionOutcome::NotUnderstood).await;
    record(&engine, &fx, topic, SessionOutcome::NotUnderstood).await;
    let third = record(&engine, &fx, topic, SessionOutcome::NotUnderstood).await;
    assert_eq!(
        third.strategy_signal,
        Some(StrategySignal::SwitchedMode {
            from: TeachingMode::Socratic,
            to: TeachingMode::Lecture,
            reason: SwitchReason::FailureStreak,
        })
    );
    assert_eq!(
        engine.active_mode(fx.tenant, fx.domain).await.unwrap(),
        TeachingMode::Lecture
    );

    // Exhaust the fallback list: the mode holds and exhaustion is signalled.
    for _ in 0..3 {
        record(&engine, &fx, topic, SessionOutcome::NotUnderstood).await;
    }
    let mut last = None;
    for _ in 0..3 {
        last = record(&engine, &fx, topic, SessionOutcome::NotUnderstood)
            .await
            .strategy_signal;
    }
    assert_eq!(last, Some(StrategySignal::StrategyExhausted));
    assert_eq!(
        engine.active_mode(fx.tenant, fx.domain).await.unwrap(),
        TeachingMode::Demonstration
    );
}

#[tokio::test]
async fn test_manual_override_and_disabled_mode() {
    let engine = engine();
    let fx = setup(&engine).await;

    engine
        .configure_strategy(
            fx.tenant,
            fx.domain,
            TeachingMode::Socratic,
            vec![TeachingMode::Lecture],
            engine.default_switching_rules(),
        )
        .await
        .unwrap();

    let signal = engine
        .override_mode(fx.tenant, fx.domain, TeachingMode::Inquiry)
        .await
        .unwrap();
    assert_eq!(
        signal,
        StrategySignal::SwitchedMode {
            from: TeachingMode::Socratic,
            to: TeachingMode::Inquiry,
            reason: SwitchReason::ManualOverride,
        }
    );

    let state = engine.strategy_state(fx.tenant, fx.domain).await.unwrap();
    assert_eq!(state.fallback_cursor, -1);
    assert_eq!(state.consecutive_failures, 0);

    engine
        .set_mode_config(
            fx.tenant,
            TeachingModeConfig {
                mode: TeachingMode::CaseBased,
                enabled: false,
                priority: 0,
            },
        )
        .await;
    let err = engine
        .override_mode(fx.tenant, fx.domain, TeachingMode::CaseBased)
        .await
        .unwrap_err();
    assert_eq!(err, StrategyError::ModeDisabled("case_based"));
}

#[tokio::test]
async fn test_invalid_switching_rules_rejected() {
    let engine = engine();
    let fx = setup(&engine).await;

    let err = engine
        .configure_strategy(
            fx.tenant,
            fx.domain,
            TeachingMode::Socratic,
            vec![],
            SwitchingRules {
                consecutive_failures_threshold: 0,
                low_engagement_threshold: 0.3,
                auto_switch_enabled: true,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, StrategyError::InvalidRules);

    let err = engine
        .record_session_outcome(fx.tenant, Uuid::new_v4(), SessionOutcome::NotUnderstood)
        .await
        .unwrap_err();
    assert!(matches!(err, StrategyError::UnknownDomain(_)));
}

#[tokio::test]
async fn test_recommendation_prioritizes_worst_gap_then_study_order() {
    let engine = engine();
    let fx = setup(&engine).await;
    let early = add_topic(&engine, &fx, "arithmetic", 20).await;
    let gapped = add_topic(&engine, &fx, "word problems", 60).await;

    // Without gaps, the earliest eligible topic in study order wins.
    match engine
        .recommend_next(fx.tenant, fx.learner, fx.domain)
        .await
        .unwrap()
    {
        RecommendationOutcome::Topic(rec) => assert_eq!(rec.topic_id, early),
        other => panic!("expected a topic, got {other:?}"),
    }

    // A high-severity gap outranks study order.
    for _ in 0..3 {
        record(&engine, &fx, gapped, SessionOutcome::NotUnderstood).await;
    }
    match engine
        .recommend_next(fx.tenant, fx.learner, fx.domain)
        .await
        .unwrap()
    {
        RecommendationOutcome::Topic(rec) => {
            assert_eq!(rec.topic_id, gapped);
            assert_eq!(rec.open_gap_severity, Some(GapSeverity::High));
        }
        other => panic!("expected a topic, got {other:?}"),
    }
}

#[tokio::test]
async fn test_all_mastered_and_all_blocked_are_distinct_outcomes() {
    let engine = engine();
    let fx = setup(&engine).await;
    let only = add_topic(&engine, &fx, "counting", 10).await;

    // Low -> Medium -> MediumHigh -> High takes three streaks of three.
    for _ in 0..9 {
        record(&engine, &fx, only, SessionOutcome::FullyUnderstood).await;
    }
    assert_eq!(
        engine.confidence_of(fx.tenant, fx.learner, only).await,
        Some(ConfidenceLevel::High)
    );
    assert!(matches!(
        engine
            .recommend_next(fx.tenant, fx.learner, fx.domain)
            .await
            .unwrap(),
        RecommendationOutcome::AllMastered
    ));

    // A second domain whose only topic is gated by an unmastered outsider.
    let goal = engine
        .register_goal(fx.tenant, fx.learner, "geometry basics")
        .await
        .unwrap();
    let other_domain = engine
        .register_domain(fx.tenant, goal.goal_id, "geometry", 40.0, None)
        .await
        .unwrap()
        .domain_id;
    let blocked = engine
        .register_topic(
            fx.tenant,
            other_domain,
            "proofs",
            DifficultyLevel::Hard,
            90,
        )
        .await
        .unwrap()
        .topic_id;
    let outsider = add_topic(&engine, &fx, "logic", 30).await;
    engine
        .add_dependency(fx.tenant, outsider, blocked, DependencyKind::Required, 1.0)
        .await
        .unwrap();

    assert!(!engine
        .is_eligible(fx.tenant, fx.learner, blocked)
        .await
        .unwrap());
    assert!(matches!(
        engine
            .recommend_next(fx.tenant, fx.learner, other_domain)
            .await
            .unwrap(),
        RecommendationOutcome::AllBlocked
    ));
}

#[tokio::test]
async fn test_readiness_score_reflects_advisory_prerequisites() {
    let engine = engine();
    let fx = setup(&engine).await;
    let helper = add_topic(&engine, &fx, "estimation", 15).await;
    let target = add_topic(&engine, &fx, "mental math", 25).await;

    engine
        .add_dependency(fx.tenant, helper, target, DependencyKind::Recommended, 0.8)
        .await
        .unwrap();

    // Unmet recommended prerequisite: 1.0 - 0.8 * 0.5.
    let score = engine
        .readiness_score(fx.tenant, fx.learner, target)
        .await
        .unwrap();
    assert!((score - 0.6).abs() < 1e-9);
    assert!(engine
        .is_eligible(fx.tenant, fx.learner, target)
        .await
        .unwrap());

    for _ in 0..3 {
        record(&engine, &fx, helper, SessionOutcome::FullyUnderstood).await;
    }
    let score = engine
        .readiness_score(fx.tenant, fx.learner, target)
        .await
        .unwrap();
    assert!((score - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_verification_flow_and_trust_weighting() {
    let engine = engine();
    let fx = setup(&engine).await;
    let topic = add_topic(&engine, &fx, "derivatives", 55).await;
    let concept = engine
        .register_concept(
            fx.tenant,
            topic,
            "power rule",
            Some("d/dx x^n = n x^(n-1)".to_string()),
            vec!["applies for real n".to_string()],
            vec!["forgetting the exponent shift".to_string()],
        )
        .await
        .unwrap();

    let source = engine
        .register_source(fx.tenant, "curriculum board", "https://example.org", 0.9)
        .await
        .unwrap();

    let content_id = Uuid::new_v4();
    let deadline = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
    engine
        .mark_verified(
            fx.tenant,
            content_id,
            concept.concept_id,
            "the power rule explained",
            0.6,
            deadline,
            vec![SourceCitation {
                source_id: source.source_id,
                citation: "unit 4".to_string(),
            }],
        )
        .await
        .unwrap();

    let blended = engine
        .trust_weighted_confidence(fx.tenant, content_id)
        .await
        .unwrap();
    assert!((blended - 0.75).abs() < 1e-9);

    let due = engine
        .due_for_reverification(fx.tenant, NaiveDate::from_ymd_opt(2026, 2, 1).unwrap())
        .await;
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].content_id, content_id);
    assert!(engine
        .due_for_reverification(fx.tenant, NaiveDate::from_ymd_opt(2025, 12, 1).unwrap())
        .await
        .is_empty());
}

#[tokio::test]
async fn test_remove_topic_cascades_edges_and_mastery() {
    let engine = engine();
    let fx = setup(&engine).await;
    let a = add_topic(&engine, &fx, "integers", 20).await;
    let b = add_topic(&engine, &fx, "rationals", 20).await;

    engine
        .add_dependency(fx.tenant, a, b, DependencyKind::Required, 1.0)
        .await
        .unwrap();
    record(&engine, &fx, a, SessionOutcome::FullyUnderstood).await;

    engine.remove_topic(fx.tenant, a).await.unwrap();

    assert!(engine.prerequisites_of(fx.tenant, b).await.unwrap().is_empty());
    assert!(engine.confidence_of(fx.tenant, fx.learner, a).await.is_none());
    assert!(matches!(
        engine.remove_topic(fx.tenant, a).await.unwrap_err(),
        CatalogError::UnknownTopic(_)
    ));
}

#[tokio::test]
async fn test_eligibility_flips_once_required_prerequisite_is_mastered() {
    let engine = engine();
    let fx = setup(&engine).await;
    let prereq = add_topic(&engine, &fx, "addition", 10).await;
    let target = add_topic(&engine, &fx, "multiplication", 20).await;

    engine
        .add_dependency(fx.tenant, prereq, target, DependencyKind::Required, 1.0)
        .await
        .unwrap();

    assert!(!engine
        .is_eligible(fx.tenant, fx.learner, target)
        .await
        .unwrap());

    // Two wins leave the prerequisite at Low; the gate stays shut.
    record(&engine, &fx, prereq, SessionOutcome::FullyUnderstood).await;
    record(&engine, &fx, prereq, SessionOutcome::FullyUnderstood).await;
    assert!(!engine
        .is_eligible(fx.tenant, fx.learner, target)
        .await
        .unwrap());

    // The promoting session flips eligibility.
    let update = record(&engine, &fx, prereq, SessionOutcome::FullyUnderstood).await;
    assert!(update.promoted);
    assert_eq!(update.confidence_level, ConfidenceLevel::Medium);
    assert!(engine
        .is_eligible(fx.tenant, fx.learner, target)
        .await
        .unwrap());
}

// Needs a live Postgres; skipped when DATABASE_URL is unset.
#[tokio::test]
async fn test_resolve_gap_finds_persisted_gap_after_restart() {
    if std::env::var("DATABASE_URL").is_err() {
        return;
    }
    let proxy = tutor_engine::db::DatabaseProxy::from_env().await.unwrap();

    let engine = TutorEngine::new(EngineConfig::default(), Some(proxy.clone()));
    let fx = setup(&engine).await;
    let topic = add_topic(&engine, &fx, "limits", 30).await;
    let update = record(&engine, &fx, topic, SessionOutcome::NotUnderstood).await;
    assert!(update.open_gap.is_some());

    // A fresh engine over the same database starts with empty stores.
    let restarted = TutorEngine::new(EngineConfig::default(), Some(proxy));
    let closed = restarted
        .resolve_gap(fx.tenant, fx.learner, topic, "re-taught after restart")
        .await
        .unwrap();
    assert!(closed.resolution_date.is_some());
    assert!(restarted
        .gap_history(fx.tenant, fx.learner, topic)
        .await
        .iter()
        .all(|g| !g.is_open()));
}

#[tokio::test]
async fn test_mastery_summary_counts_levels_and_open_gaps() {
    let engine = engine();
    let fx = setup(&engine).await;
    let promoted = add_topic(&engine, &fx, "percentages", 20).await;
    let struggling = add_topic(&engine, &fx, "interest rates", 30).await;

    for _ in 0..3 {
        record(&engine, &fx, promoted, SessionOutcome::FullyUnderstood).await;
    }
    record(&engine, &fx, struggling, SessionOutcome::NotUnderstood).await;

    let summary = engine.mastery_summary(fx.tenant, fx.learner).await;
    assert_eq!(summary.medium, 1);
    assert_eq!(summary.low, 1);
    assert_eq!(summary.open_gaps, 1);
}
