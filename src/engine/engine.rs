use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::db::DatabaseProxy;
use crate::engine::graph::TenantGraph;
use crate::engine::persistence::EnginePersistence;
use crate::engine::types::*;
use crate::engine::verification::VerificationLedger;
use crate::engine::{mastery, recommend, strategy};
use crate::error::{
    CatalogError, GraphError, MasteryError, RecommendError, StrategyError, VerificationError,
};

#[derive(Debug, Clone, Default)]
struct Catalog {
    learners: HashMap<Uuid, LearnerRecord>,
    goals: HashMap<Uuid, LearningGoalRecord>,
    domains: HashMap<Uuid, DomainRecord>,
    topics: HashMap<Uuid, TopicRecord>,
    concepts: HashMap<Uuid, ConceptRecord>,
    mode_configs: HashMap<(Uuid, TeachingMode), TeachingModeConfig>,
}

impl Catalog {
    fn topic_for_tenant(&self, tenant_id: Uuid, topic_id: Uuid) -> Option<&TopicRecord> {
        self.topics
            .get(&topic_id)
            .filter(|t| t.tenant_id == tenant_id)
    }

    fn domain_for_tenant(&self, tenant_id: Uuid, domain_id: Uuid) -> Option<&DomainRecord> {
        self.domains
            .get(&domain_id)
            .filter(|d| d.tenant_id == tenant_id)
    }

    fn mode_enabled(&self, tenant_id: Uuid, mode: TeachingMode) -> bool {
        self.mode_configs
            .get(&(tenant_id, mode))
            .map(|c| c.enabled)
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone)]
struct StrategyEntry {
    strategy: TeachingStrategy,
    state: DomainStrategyState,
}

#[derive(Debug, Clone)]
struct MasteryEntry {
    mastery: TopicMastery,
    gaps: Vec<KnowledgeGap>,
}

/// The knowledge-state and teaching-strategy engine. All state lives in keyed,
/// versioned records behind per-store locks; the write-lock scope is what
/// serializes concurrent mutations on the same key. An optional persistence
/// layer writes every mutated record through and backfills cache misses.
pub struct TutorEngine {
    config: EngineConfig,
    catalog: Arc<RwLock<Catalog>>,
    graphs: Arc<RwLock<HashMap<Uuid, TenantGraph>>>,
    strategies: Arc<RwLock<HashMap<(Uuid, Uuid), StrategyEntry>>>,
    masteries: Arc<RwLock<HashMap<(Uuid, Uuid, Uuid), MasteryEntry>>>,
    verification: Arc<RwLock<HashMap<Uuid, VerificationLedger>>>,
    persistence: Option<Arc<EnginePersistence>>,
    topic_seq: AtomicU64,
}

impl TutorEngine {
    pub fn new(config: EngineConfig, db_proxy: Option<Arc<DatabaseProxy>>) -> Self {
        let persistence = db_proxy.map(|proxy| Arc::new(EnginePersistence::new(proxy)));
        Self {
            config,
            catalog: Arc::new(RwLock::new(Catalog::default())),
            graphs: Arc::new(RwLock::new(HashMap::new())),
            strategies: Arc::new(RwLock::new(HashMap::new())),
            masteries: Arc::new(RwLock::new(HashMap::new())),
            verification: Arc::new(RwLock::new(HashMap::new())),
            persistence,
            topic_seq: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Switching rules seeded from the engine configuration, for callers that
    /// do not supply their own.
    pub fn default_switching_rules(&self) -> SwitchingRules {
        let defaults = &self.config.strategy_defaults;
        SwitchingRules {
            consecutive_failures_threshold: defaults.consecutive_failures_threshold,
            low_engagement_threshold: defaults.low_engagement_threshold,
            auto_switch_enabled: defaults.auto_switch_enabled,
        }
    }

    // ------------------------------------------------------------------
    // Catalog registration
    // ------------------------------------------------------------------

    pub async fn register_learner(
        &self,
        tenant_id: Uuid,
        name: &str,
        email: &str,
    ) -> Result<LearnerRecord, CatalogError> {
        let mut catalog = self.catalog.write().await;
        let taken = catalog
            .learners
            .values()
            .any(|l| l.tenant_id == tenant_id && l.email.eq_ignore_ascii_case(email));
        if taken {
            return Err(CatalogError::DuplicateEmail(email.to_string()));
        }
        let learner = LearnerRecord {
            learner_id: Uuid::new_v4(),
            tenant_id,
            name: name.to_string(),
            email: email.to_string(),
            created_at: Utc::now(),
        };
        catalog.learners.insert(learner.learner_id, learner.clone());
        Ok(learner)
    }

    pub async fn register_goal(
        &self,
        tenant_id: Uuid,
        learner_id: Uuid,
        goal_name: &str,
    ) -> Result<LearningGoalRecord, CatalogError> {
        let mut catalog = self.catalog.write().await;
        if !catalog
            .learners
            .get(&learner_id)
            .map(|l| l.tenant_id == tenant_id)
            .unwrap_or(false)
        {
            return Err(CatalogError::UnknownLearner(learner_id));
        }
        let goal = LearningGoalRecord {
            goal_id: Uuid::new_v4(),
            tenant_id,
            learner_id,
            goal_name: goal_name.to_string(),
            status: GoalStatus::Active,
            created_at: Utc::now(),
        };
        catalog.goals.insert(goal.goal_id, goal.clone());
        Ok(goal)
    }

    pub async fn set_goal_status(
        &self,
        tenant_id: Uuid,
        goal_id: Uuid,
        status: GoalStatus,
    ) -> Result<LearningGoalRecord, CatalogError> {
        let mut catalog = self.catalog.write().await;
        let goal = catalog
            .goals
            .get_mut(&goal_id)
            .filter(|g| g.tenant_id == tenant_id)
            .ok_or(CatalogError::UnknownGoal(goal_id))?;
        goal.status = status;
        Ok(goal.clone())
    }

    pub async fn register_domain(
        &self,
        tenant_id: Uuid,
        goal_id: Uuid,
        domain_name: &str,
        weight_percentage: f64,
        recommended_teaching_mode: Option<TeachingMode>,
    ) -> Result<DomainRecord, CatalogError> {
        let mut catalog = self.catalog.write().await;
        if !catalog
            .goals
            .get(&goal_id)
            .map(|g| g.tenant_id == tenant_id)
            .unwrap_or(false)
        {
            return Err(CatalogError::UnknownGoal(goal_id));
        }
        let domain = DomainRecord {
            domain_id: Uuid::new_v4(),
            tenant_id,
            goal_id,
            domain_name: domain_name.to_string(),
            weight_percentage: weight_percentage.clamp(0.0, 100.0),
            recommended_teaching_mode,
        };
        catalog.domains.insert(domain.domain_id, domain.clone());
        Ok(domain)
    }

    pub async fn register_topic(
        &self,
        tenant_id: Uuid,
        domain_id: Uuid,
        topic_name: &str,
        difficulty: DifficultyLevel,
        estimated_minutes: i32,
    ) -> Result<TopicRecord, CatalogError> {
        let mut catalog = self.catalog.write().await;
        if catalog.domain_for_tenant(tenant_id, domain_id).is_none() {
            return Err(CatalogError::UnknownDomain(domain_id));
        }
        let topic = TopicRecord {
            topic_id: Uuid::new_v4(),
            tenant_id,
            domain_id,
            topic_name: topic_name.to_string(),
            difficulty,
            estimated_minutes,
            seq: self.topic_seq.fetch_add(1, Ordering::Relaxed),
            created_at: Utc::now(),
        };
        catalog.topics.insert(topic.topic_id, topic.clone());
        Ok(topic)
    }

    pub async fn register_concept(
        &self,
        tenant_id: Uuid,
        topic_id: Uuid,
        concept_name: &str,
        explanation: Option<String>,
        rules: Vec<String>,
        common_pitfalls: Vec<String>,
    ) -> Result<ConceptRecord, CatalogError> {
        let mut catalog = self.catalog.write().await;
        if catalog.topic_for_tenant(tenant_id, topic_id).is_none() {
            return Err(CatalogError::UnknownTopic(topic_id));
        }
        let concept = ConceptRecord {
            concept_id: Uuid::new_v4(),
            tenant_id,
            topic_id,
            concept_name: concept_name.to_string(),
            explanation,
            rules,
            common_pitfalls,
        };
        catalog.concepts.insert(concept.concept_id, concept.clone());
        Ok(concept)
    }

    pub async fn set_mode_config(&self, tenant_id: Uuid, config: TeachingModeConfig) {
        let mut catalog = self.catalog.write().await;
        catalog.mode_configs.insert((tenant_id, config.mode), config);
    }

    // ------------------------------------------------------------------
    // Ownership cascades
    // ------------------------------------------------------------------

    /// Drops every record owned by the tenant. Nothing of the tenant remains
    /// visible afterwards.
    pub async fn remove_tenant(&self, tenant_id: Uuid) {
        {
            let mut catalog = self.catalog.write().await;
            catalog.learners.retain(|_, l| l.tenant_id != tenant_id);
            catalog.goals.retain(|_, g| g.tenant_id != tenant_id);
            catalog.domains.retain(|_, d| d.tenant_id != tenant_id);
            catalog.topics.retain(|_, t| t.tenant_id != tenant_id);
            catalog.concepts.retain(|_, c| c.tenant_id != tenant_id);
            catalog.mode_configs.retain(|(t, _), _| *t != tenant_id);
        }
        self.graphs.write().await.remove(&tenant_id);
        self.strategies
            .write()
            .await
            .retain(|(t, _), _| *t != tenant_id);
        self.masteries
            .write()
            .await
            .retain(|(t, _, _), _| *t != tenant_id);
        self.verification.write().await.remove(&tenant_id);
        tracing::info!(tenant = %tenant_id, "tenant removed with all owned records");
    }

    /// Removes a topic together with everything it owns: concepts (and their
    /// verified content), incident dependency edges, and the mastery/gap
    /// records keyed on it.
    pub async fn remove_topic(&self, tenant_id: Uuid, topic_id: Uuid) -> Result<(), CatalogError> {
        let concept_ids: Vec<Uuid> = {
            let mut catalog = self.catalog.write().await;
            if catalog.topic_for_tenant(tenant_id, topic_id).is_none() {
                return Err(CatalogError::UnknownTopic(topic_id));
            }
            catalog.topics.remove(&topic_id);
            let ids: Vec<Uuid> = catalog
                .concepts
                .values()
                .filter(|c| c.topic_id == topic_id)
                .map(|c| c.concept_id)
                .collect();
            catalog.concepts.retain(|_, c| c.topic_id != topic_id);
            ids
        };

        if let Some(graph) = self.graphs.write().await.get_mut(&tenant_id) {
            graph.remove_topic(topic_id);
        }
        self.masteries
            .write()
            .await
            .retain(|(t, _, topic), _| !(*t == tenant_id && *topic == topic_id));
        if let Some(ledger) = self.verification.write().await.get_mut(&tenant_id) {
            for concept_id in concept_ids {
                ledger.remove_concept_content(concept_id);
            }
        }
        Ok(())
    }

    /// Removes a learner, their goals/domains/topics, and the mastery and gap
    /// records they jointly own.
    pub async fn remove_learner(
        &self,
        tenant_id: Uuid,
        learner_id: Uuid,
    ) -> Result<(), CatalogError> {
        let (domain_ids, topic_ids) = {
            let mut catalog = self.catalog.write().await;
            if !catalog
                .learners
                .get(&learner_id)
                .map(|l| l.tenant_id == tenant_id)
                .unwrap_or(false)
            {
                return Err(CatalogError::UnknownLearner(learner_id));
            }
            catalog.learners.remove(&learner_id);

            let goal_ids: HashSet<Uuid> = catalog
                .goals
                .values()
                .filter(|g| g.learner_id == learner_id)
                .map(|g| g.goal_id)
                .collect();
            let domain_ids: HashSet<Uuid> = catalog
                .domains
                .values()
                .filter(|d| goal_ids.contains(&d.goal_id))
                .map(|d| d.domain_id)
                .collect();
            let topic_ids: Vec<Uuid> = catalog
                .topics
                .values()
                .filter(|t| domain_ids.contains(&t.domain_id))
                .map(|t| t.topic_id)
                .collect();

            catalog.goals.retain(|_, g| g.learner_id != learner_id);
            catalog.domains.retain(|_, d| !goal_ids.contains(&d.goal_id));
            (domain_ids, topic_ids)
        };

        for topic_id in &topic_ids {
            // Already gone from the catalog is fine; only the cascades matter.
            let _ = self.remove_topic(tenant_id, *topic_id).await;
        }
        self.strategies
            .write()
            .await
            .retain(|(t, d), _| !(*t == tenant_id && domain_ids.contains(d)));
        self.masteries
            .write()
            .await
            .retain(|(t, l, _), _| !(*t == tenant_id && *l == learner_id));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dependency graph
    // ------------------------------------------------------------------

    pub async fn add_dependency(
        &self,
        tenant_id: Uuid,
        prerequisite: Uuid,
        dependent: Uuid,
        kind: DependencyKind,
        strength: f64,
    ) -> Result<(), GraphError> {
        {
            let catalog = self.catalog.read().await;
            for topic in [prerequisite, dependent] {
                if catalog.topic_for_tenant(tenant_id, topic).is_none() {
                    return Err(GraphError::UnknownTopic(topic));
                }
            }
        }

        let edge = DependencyEdge {
            prerequisite,
            dependent,
            kind,
            strength,
        };
        let graph_version = {
            let mut graphs = self.graphs.write().await;
            let graph = graphs.entry(tenant_id).or_default();
            graph.add_edge(edge)?;
            graph.version()
        };

        if let Some(ref persistence) = self.persistence {
            if let Err(e) = persistence.save_edge(tenant_id, &edge, graph_version).await {
                tracing::warn!(error = %e, tenant = %tenant_id, "failed to persist dependency edge");
            }
        }
        Ok(())
    }

    pub async fn prerequisites_of(
        &self,
        tenant_id: Uuid,
        topic_id: Uuid,
    ) -> Result<Vec<Prerequisite>, GraphError> {
        {
            let catalog = self.catalog.read().await;
            if catalog.topic_for_tenant(tenant_id, topic_id).is_none() {
                return Err(GraphError::UnknownTopic(topic_id));
            }
        }
        let graphs = self.graphs.read().await;
        Ok(graphs
            .get(&tenant_id)
            .map(|g| g.prerequisites_of(topic_id))
            .unwrap_or_default())
    }

    pub async fn dependents_of(
        &self,
        tenant_id: Uuid,
        topic_id: Uuid,
    ) -> Result<Vec<Prerequisite>, GraphError> {
        {
            let catalog = self.catalog.read().await;
            if catalog.topic_for_tenant(tenant_id, topic_id).is_none() {
                return Err(GraphError::UnknownTopic(topic_id));
            }
        }
        let graphs = self.graphs.read().await;
        Ok(graphs
            .get(&tenant_id)
            .map(|g| g.dependents_of(topic_id))
            .unwrap_or_default())
    }

    /// Default study sequence for a domain: all its topics, required edges
    /// respected, registration order breaking ties.
    pub async fn topological_order(
        &self,
        tenant_id: Uuid,
        domain_id: Uuid,
    ) -> Result<Vec<Uuid>, CatalogError> {
        let (topic_ids, seqs) = {
            let catalog = self.catalog.read().await;
            if catalog.domain_for_tenant(tenant_id, domain_id).is_none() {
                return Err(CatalogError::UnknownDomain(domain_id));
            }
            let topics: Vec<&TopicRecord> = catalog
                .topics
                .values()
                .filter(|t| t.tenant_id == tenant_id && t.domain_id == domain_id)
                .collect();
            let ids: Vec<Uuid> = topics.iter().map(|t| t.topic_id).collect();
            let seqs: HashMap<Uuid, u64> = topics.iter().map(|t| (t.topic_id, t.seq)).collect();
            (ids, seqs)
        };

        let graphs = self.graphs.read().await;
        let order = match graphs.get(&tenant_id) {
            Some(graph) => graph.topological_order(&topic_ids, |t| seqs[&t]),
            None => {
                let mut ids = topic_ids;
                ids.sort_by_key(|t| seqs[t]);
                ids
            }
        };
        Ok(order)
    }

    // ------------------------------------------------------------------
    // Strategy selector
    // ------------------------------------------------------------------

    pub async fn configure_strategy(
        &self,
        tenant_id: Uuid,
        domain_id: Uuid,
        primary_mode: TeachingMode,
        fallback_modes: Vec<TeachingMode>,
        switching_rules: SwitchingRules,
    ) -> Result<DomainStrategyState, StrategyError> {
        if switching_rules.consecutive_failures_threshold < 1
            || !(0.0..=1.0).contains(&switching_rules.low_engagement_threshold)
        {
            return Err(StrategyError::InvalidRules);
        }
        {
            let catalog = self.catalog.read().await;
            if catalog.domain_for_tenant(tenant_id, domain_id).is_none() {
                return Err(StrategyError::UnknownDomain(domain_id));
            }
            for mode in std::iter::once(primary_mode).chain(fallback_modes.iter().copied()) {
                if !catalog.mode_enabled(tenant_id, mode) {
                    return Err(StrategyError::ModeDisabled(mode.as_str()));
                }
            }
        }

        let strategy = TeachingStrategy {
            primary_mode,
            fallback_modes,
            switching_rules,
        };
        let state = strategy::initial_state(tenant_id, domain_id, &strategy);
        self.strategies.write().await.insert(
            (tenant_id, domain_id),
            StrategyEntry {
                strategy: strategy.clone(),
                state: state.clone(),
            },
        );

        if let Some(ref persistence) = self.persistence {
            if let Err(e) = persistence.save_strategy(&strategy, &state).await {
                tracing::warn!(error = %e, domain = %domain_id, "failed to persist strategy");
            }
        }
        Ok(state)
    }

    pub async fn active_mode(
        &self,
        tenant_id: Uuid,
        domain_id: Uuid,
    ) -> Result<TeachingMode, StrategyError> {
        self.strategy_state(tenant_id, domain_id)
            .await
            .map(|s| s.active_mode)
    }

    pub async fn strategy_state(
        &self,
        tenant_id: Uuid,
        domain_id: Uuid,
    ) -> Result<DomainStrategyState, StrategyError> {
        if let Some(entry) = self.strategies.read().await.get(&(tenant_id, domain_id)) {
            return Ok(entry.state.clone());
        }
        if let Some(ref persistence) = self.persistence {
            if let Ok(Some((_, state))) = persistence.load_strategy(tenant_id, domain_id).await {
                return Ok(state);
            }
        }
        Err(StrategyError::UnknownDomain(domain_id))
    }

    /// Drives the selector directly with a session outcome for the domain.
    pub async fn record_session_outcome(
        &self,
        tenant_id: Uuid,
        domain_id: Uuid,
        outcome: SessionOutcome,
    ) -> Result<(TeachingMode, Option<StrategySignal>), StrategyError> {
        self.with_strategy_entry(tenant_id, domain_id, |entry| {
            let signal = strategy::apply_outcome(&mut entry.state, &entry.strategy, outcome);
            (entry.state.active_mode, signal)
        })
        .await
    }

    /// Feeds an engagement sample (0..=1) from the surrounding session flow.
    pub async fn record_engagement_sample(
        &self,
        tenant_id: Uuid,
        domain_id: Uuid,
        value: f64,
    ) -> Result<(TeachingMode, Option<StrategySignal>), StrategyError> {
        self.with_strategy_entry(tenant_id, domain_id, |entry| {
            let signal =
                strategy::apply_engagement_sample(&mut entry.state, &entry.strategy, value);
            (entry.state.active_mode, signal)
        })
        .await
    }

    /// Explicit strategy-set request; always succeeds for an enabled mode.
    pub async fn override_mode(
        &self,
        tenant_id: Uuid,
        domain_id: Uuid,
        mode: TeachingMode,
    ) -> Result<StrategySignal, StrategyError> {
        {
            let catalog = self.catalog.read().await;
            if !catalog.mode_enabled(tenant_id, mode) {
                return Err(StrategyError::ModeDisabled(mode.as_str()));
            }
        }
        self.with_strategy_entry(tenant_id, domain_id, |entry| {
            strategy::apply_manual_override(&mut entry.state, mode)
        })
        .await
    }

    async fn with_strategy_entry<T>(
        &self,
        tenant_id: Uuid,
        domain_id: Uuid,
        apply: impl FnOnce(&mut StrategyEntry) -> T,
    ) -> Result<T, StrategyError> {
        let key = (tenant_id, domain_id);
        let mut strategies = self.strategies.write().await;

        if !strategies.contains_key(&key) {
            let loaded = match self.persistence {
                Some(ref persistence) => persistence
                    .load_strategy(tenant_id, domain_id)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!(error = %e, domain = %domain_id, "failed to load strategy");
                        None
                    }),
                None => None,
            };
            match loaded {
                Some((strategy, state)) => {
                    strategies.insert(key, StrategyEntry { strategy, state });
                }
                None => return Err(StrategyError::UnknownDomain(domain_id)),
            }
        }

        let entry = strategies
            .get_mut(&key)
            .ok_or(StrategyError::UnknownDomain(domain_id))?;
        let result = apply(entry);
        let snapshot = (entry.strategy.clone(), entry.state.clone());
        drop(strategies);

        if let Some(ref persistence) = self.persistence {
            if let Err(e) = persistence.save_strategy(&snapshot.0, &snapshot.1).await {
                tracing::warn!(error = %e, domain = %domain_id, "failed to persist strategy state");
            }
        }
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Mastery & gap tracking
    // ------------------------------------------------------------------

    /// Records one assessed session outcome for a learner/topic pair and
    /// forwards it to the topic's domain strategy selector. Replays with the
    /// same session ref are absorbed silently.
    pub async fn record_outcome(
        &self,
        tenant_id: Uuid,
        learner_id: Uuid,
        topic_id: Uuid,
        outcome: SessionOutcome,
        session_ref: Uuid,
        mode: TeachingMode,
    ) -> Result<OutcomeUpdate, MasteryError> {
        let domain_id = {
            let catalog = self.catalog.read().await;
            catalog
                .topic_for_tenant(tenant_id, topic_id)
                .map(|t| t.domain_id)
                .ok_or(MasteryError::UnknownTopic(topic_id))?
        };

        let key = (tenant_id, learner_id, topic_id);
        let now = Utc::now();
        let (mut update, snapshot) = {
            let mut masteries = self.masteries.write().await;
            if !masteries.contains_key(&key) {
                let loaded = match self.persistence {
                    Some(ref persistence) => persistence
                        .load_mastery(tenant_id, learner_id, topic_id)
                        .await
                        .unwrap_or_else(|e| {
                            tracing::warn!(error = %e, topic = %topic_id, "failed to load mastery");
                            None
                        }),
                    None => None,
                };
                let entry = loaded
                    .map(|(mastery, gaps)| MasteryEntry { mastery, gaps })
                    .unwrap_or_else(|| MasteryEntry {
                        mastery: mastery::new_mastery(tenant_id, learner_id, topic_id, now),
                        gaps: Vec::new(),
                    });
                masteries.insert(key, entry);
            }
            let entry = masteries
                .get_mut(&key)
                .ok_or(MasteryError::UnknownTopic(topic_id))?;
            let update = mastery::apply_outcome(
                &mut entry.mastery,
                &mut entry.gaps,
                outcome,
                session_ref,
                mode,
                self.config.mastery.promotion_streak,
                now,
            );
            (update, (entry.mastery.clone(), entry.gaps.clone()))
        };

        if update.duplicate {
            return Ok(update);
        }

        if let Some(ref persistence) = self.persistence {
            if let Err(e) = persistence.save_mastery(&snapshot.0, &snapshot.1).await {
                tracing::warn!(error = %e, topic = %topic_id, "failed to persist mastery");
            }
        }

        // Repeated failures feed the strategy selector for the topic's domain.
        match self
            .record_session_outcome(tenant_id, domain_id, outcome)
            .await
        {
            Ok((_, signal)) => update.strategy_signal = signal,
            Err(StrategyError::UnknownDomain(_)) => {}
            Err(e) => {
                tracing::warn!(error = %e, domain = %domain_id, "strategy update skipped");
            }
        }

        Ok(update)
    }

    pub async fn resolve_gap(
        &self,
        tenant_id: Uuid,
        learner_id: Uuid,
        topic_id: Uuid,
        resolution_notes: &str,
    ) -> Result<KnowledgeGap, MasteryError> {
        let key = (tenant_id, learner_id, topic_id);
        let (closed, snapshot) = {
            let mut masteries = self.masteries.write().await;
            // Same load-on-miss as record_outcome: the open gap may only
            // exist in the database after a restart.
            if !masteries.contains_key(&key) {
                let loaded = match self.persistence {
                    Some(ref persistence) => persistence
                        .load_mastery(tenant_id, learner_id, topic_id)
                        .await
                        .unwrap_or_else(|e| {
                            tracing::warn!(error = %e, topic = %topic_id, "failed to load mastery");
                            None
                        }),
                    None => None,
                };
                if let Some((mastery, gaps)) = loaded {
                    masteries.insert(key, MasteryEntry { mastery, gaps });
                }
            }
            let entry = masteries.get_mut(&key).ok_or(MasteryError::NoOpenGap {
                learner: learner_id,
                topic: topic_id,
            })?;
            let closed = mastery::resolve_open_gap(&mut entry.gaps, resolution_notes, Utc::now())
                .ok_or(MasteryError::NoOpenGap {
                    learner: learner_id,
                    topic: topic_id,
                })?;
            (closed, (entry.mastery.clone(), entry.gaps.clone()))
        };

        if let Some(ref persistence) = self.persistence {
            if let Err(e) = persistence.save_mastery(&snapshot.0, &snapshot.1).await {
                tracing::warn!(error = %e, topic = %topic_id, "failed to persist resolved gap");
            }
        }
        Ok(closed)
    }

    /// Current confidence, or `None` for a topic the learner has never been
    /// assessed on.
    pub async fn confidence_of(
        &self,
        tenant_id: Uuid,
        learner_id: Uuid,
        topic_id: Uuid,
    ) -> Option<ConfidenceLevel> {
        if let Some(entry) = self
            .masteries
            .read()
            .await
            .get(&(tenant_id, learner_id, topic_id))
        {
            return Some(entry.mastery.confidence_level);
        }
        if let Some(ref persistence) = self.persistence {
            if let Ok(Some((mastery, _))) = persistence
                .load_mastery(tenant_id, learner_id, topic_id)
                .await
            {
                return Some(mastery.confidence_level);
            }
        }
        None
    }

    pub async fn topic_mastery(
        &self,
        tenant_id: Uuid,
        learner_id: Uuid,
        topic_id: Uuid,
    ) -> Option<TopicMastery> {
        self.masteries
            .read()
            .await
            .get(&(tenant_id, learner_id, topic_id))
            .map(|e| e.mastery.clone())
    }

    /// Open gaps for a learner, worst first, oldest first within a severity.
    /// Re-querying reflects the latest state; nothing is snapshotted.
    /// Learner-wide queries read the in-memory stores only; after a restart
    /// a pair re-enters them on its first `record_outcome`/`resolve_gap`.
    pub async fn open_gaps(
        &self,
        tenant_id: Uuid,
        learner_id: Uuid,
        min_severity: Option<GapSeverity>,
    ) -> Vec<KnowledgeGap> {
        let masteries = self.masteries.read().await;
        let mut gaps: Vec<KnowledgeGap> = masteries
            .iter()
            .filter(|((t, l, _), _)| *t == tenant_id && *l == learner_id)
            .flat_map(|(_, entry)| entry.gaps.iter().filter(|g| g.is_open()).cloned())
            .filter(|g| min_severity.map(|min| g.severity >= min).unwrap_or(true))
            .collect();
        gaps.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(a.identified_date.cmp(&b.identified_date))
                .then(a.gap_id.cmp(&b.gap_id))
        });
        gaps
    }

    /// Full gap history for a learner/topic pair, closed records included.
    /// In-memory view; see `open_gaps` for the restart caveat.
    pub async fn gap_history(
        &self,
        tenant_id: Uuid,
        learner_id: Uuid,
        topic_id: Uuid,
    ) -> Vec<KnowledgeGap> {
        self.masteries
            .read()
            .await
            .get(&(tenant_id, learner_id, topic_id))
            .map(|e| e.gaps.clone())
            .unwrap_or_default()
    }

    /// Confidence-level counts and open-gap total for a learner. In-memory
    /// view; see `open_gaps` for the restart caveat.
    pub async fn mastery_summary(&self, tenant_id: Uuid, learner_id: Uuid) -> MasterySummary {
        let masteries = self.masteries.read().await;
        let mut summary = MasterySummary::default();
        for ((t, l, _), entry) in masteries.iter() {
            if *t != tenant_id || *l != learner_id {
                continue;
            }
            match entry.mastery.confidence_level {
                ConfidenceLevel::Low => summary.low += 1,
                ConfidenceLevel::Medium => summary.medium += 1,
                ConfidenceLevel::MediumHigh => summary.medium_high += 1,
                ConfidenceLevel::High => summary.high += 1,
            }
            summary.open_gaps += entry.gaps.iter().filter(|g| g.is_open()).count();
        }
        summary
    }

    // ------------------------------------------------------------------
    // Verification scheduler
    // ------------------------------------------------------------------

    pub async fn register_source(
        &self,
        tenant_id: Uuid,
        source_name: &str,
        base_url: &str,
        trust_score: f64,
    ) -> Result<AuthoritySource, VerificationError> {
        let source = {
            let mut verification = self.verification.write().await;
            let ledger = verification.entry(tenant_id).or_default();
            ledger.register_source(Uuid::new_v4(), source_name, base_url, trust_score)?
        };
        if let Some(ref persistence) = self.persistence {
            if let Err(e) = persistence.save_source(tenant_id, &source).await {
                tracing::warn!(error = %e, source = %source.source_id, "failed to persist source");
            }
        }
        Ok(source)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn mark_verified(
        &self,
        tenant_id: Uuid,
        content_id: Uuid,
        concept_id: Uuid,
        content_text: &str,
        confidence_score: f64,
        reverify_after: NaiveDate,
        citations: Vec<SourceCitation>,
    ) -> Result<VerifiedContent, VerificationError> {
        let content = {
            let mut verification = self.verification.write().await;
            let ledger = verification.entry(tenant_id).or_default();
            ledger.mark_verified(
                tenant_id,
                content_id,
                concept_id,
                content_text,
                confidence_score,
                reverify_after,
                citations,
                Utc::now(),
            )?
        };
        if let Some(ref persistence) = self.persistence {
            if let Err(e) = persistence.save_content(&content).await {
                tracing::warn!(error = %e, content = %content_id, "failed to persist verified content");
            }
        }
        Ok(content)
    }

    /// Stale verified content, oldest deadline first. Fresh on every call.
    pub async fn due_for_reverification(
        &self,
        tenant_id: Uuid,
        as_of: NaiveDate,
    ) -> Vec<VerifiedContent> {
        self.verification
            .read()
            .await
            .get(&tenant_id)
            .map(|ledger| ledger.due_for_reverification(as_of))
            .unwrap_or_default()
    }

    pub async fn trust_weighted_confidence(
        &self,
        tenant_id: Uuid,
        content_id: Uuid,
    ) -> Result<f64, VerificationError> {
        let verification = self.verification.read().await;
        let ledger = verification
            .get(&tenant_id)
            .ok_or(VerificationError::UnknownContent(content_id))?;
        ledger.trust_weighted_confidence(content_id, &self.config.verification)
    }

    // ------------------------------------------------------------------
    // Readiness / recommendation
    // ------------------------------------------------------------------

    pub async fn is_eligible(
        &self,
        tenant_id: Uuid,
        learner_id: Uuid,
        topic_id: Uuid,
    ) -> Result<bool, GraphError> {
        let prereqs = self.prerequisites_of(tenant_id, topic_id).await?;
        let confidences = self.confidences_for(tenant_id, learner_id).await;
        Ok(recommend::is_eligible(&prereqs, |id| {
            confidences.get(&id).copied()
        }))
    }

    pub async fn readiness_score(
        &self,
        tenant_id: Uuid,
        learner_id: Uuid,
        topic_id: Uuid,
    ) -> Result<f64, GraphError> {
        let prereqs = self.prerequisites_of(tenant_id, topic_id).await?;
        let confidences = self.confidences_for(tenant_id, learner_id).await;
        Ok(recommend::readiness_score(
            &prereqs,
            |id| confidences.get(&id).copied(),
            &self.config.readiness,
        ))
    }

    /// What the learner should study next in the domain, or why nothing
    /// qualifies (everything mastered vs. everything blocked).
    pub async fn recommend_next(
        &self,
        tenant_id: Uuid,
        learner_id: Uuid,
        domain_id: Uuid,
    ) -> Result<RecommendationOutcome, RecommendError> {
        let topics: Vec<TopicRecord> = {
            let catalog = self.catalog.read().await;
            if catalog.domain_for_tenant(tenant_id, domain_id).is_none() {
                return Err(RecommendError::UnknownDomain(domain_id));
            }
            catalog
                .topics
                .values()
                .filter(|t| t.tenant_id == tenant_id && t.domain_id == domain_id)
                .cloned()
                .collect()
        };

        let topic_ids: Vec<Uuid> = topics.iter().map(|t| t.topic_id).collect();
        let seqs: HashMap<Uuid, u64> = topics.iter().map(|t| (t.topic_id, t.seq)).collect();

        let (order, prereqs_by_topic) = {
            let graphs = self.graphs.read().await;
            match graphs.get(&tenant_id) {
                Some(graph) => {
                    let order = graph.topological_order(&topic_ids, |t| seqs[&t]);
                    let prereqs: HashMap<Uuid, Vec<Prerequisite>> = topic_ids
                        .iter()
                        .map(|t| (*t, graph.prerequisites_of(*t)))
                        .collect();
                    (order, prereqs)
                }
                None => {
                    let mut ids = topic_ids.clone();
                    ids.sort_by_key(|t| seqs[t]);
                    (ids, HashMap::new())
                }
            }
        };
        let topo_index: HashMap<Uuid, usize> =
            order.iter().enumerate().map(|(i, t)| (*t, i)).collect();

        let confidences = self.confidences_for(tenant_id, learner_id).await;
        let gap_severities = self.open_gap_severities(tenant_id, learner_id).await;

        let candidates: Vec<recommend::CandidateTopic> = topics
            .iter()
            .map(|topic| {
                let prereqs = prereqs_by_topic
                    .get(&topic.topic_id)
                    .cloned()
                    .unwrap_or_default();
                recommend::CandidateTopic {
                    topic_id: topic.topic_id,
                    confidence: confidences.get(&topic.topic_id).copied(),
                    eligible: recommend::is_eligible(&prereqs, |id| {
                        confidences.get(&id).copied()
                    }),
                    readiness_score: recommend::readiness_score(
                        &prereqs,
                        |id| confidences.get(&id).copied(),
                        &self.config.readiness,
                    ),
                    open_gap_severity: gap_severities.get(&topic.topic_id).copied(),
                    topo_index: topo_index.get(&topic.topic_id).copied().unwrap_or(usize::MAX),
                    estimated_minutes: topic.estimated_minutes,
                }
            })
            .collect();

        Ok(recommend::recommend_next(&candidates))
    }

    async fn confidences_for(
        &self,
        tenant_id: Uuid,
        learner_id: Uuid,
    ) -> HashMap<Uuid, ConfidenceLevel> {
        self.masteries
            .read()
            .await
            .iter()
            .filter(|((t, l, _), _)| *t == tenant_id && *l == learner_id)
            .map(|((_, _, topic), entry)| (*topic, entry.mastery.confidence_level))
            .collect()
    }

    async fn open_gap_severities(
        &self,
        tenant_id: Uuid,
        learner_id: Uuid,
    ) -> HashMap<Uuid, GapSeverity> {
        self.masteries
            .read()
            .await
            .iter()
            .filter(|((t, l, _), _)| *t == tenant_id && *l == learner_id)
            .filter_map(|((_, _, topic), entry)| {
                entry
                    .gaps
                    .iter()
                    .find(|g| g.is_open())
                    .map(|g| (*topic, g.severity))
            })
            .collect()
    }
}
