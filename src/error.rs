use thiserror::Error;
use uuid::Uuid;

/// Graph-integrity failures. Always rejected before any mutation; the caller
/// must fix its input rather than retry.
#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("topic {0} not registered for this tenant")]
    UnknownTopic(Uuid),
    #[error("a topic cannot be its own prerequisite")]
    SelfLoop,
    #[error("edge {prerequisite} -> {dependent} already exists")]
    DuplicateEdge { prerequisite: Uuid, dependent: Uuid },
    #[error("edge {prerequisite} -> {dependent} would create a dependency cycle")]
    Cycle { prerequisite: Uuid, dependent: Uuid },
    #[error("dependency strength {0} outside [0, 1]")]
    InvalidStrength(f64),
}

/// Catalog registration failures (tenants, learners, goals, domains, topics).
#[derive(Debug, Error, PartialEq)]
pub enum CatalogError {
    #[error("email {0} is already registered for this tenant")]
    DuplicateEmail(String),
    #[error("learner {0} not found for this tenant")]
    UnknownLearner(Uuid),
    #[error("learning goal {0} not found for this tenant")]
    UnknownGoal(Uuid),
    #[error("domain {0} not found for this tenant")]
    UnknownDomain(Uuid),
    #[error("topic {0} not found for this tenant")]
    UnknownTopic(Uuid),
}

#[derive(Debug, Error, PartialEq)]
pub enum StrategyError {
    #[error("domain {0} is not registered or has no teaching strategy")]
    UnknownDomain(Uuid),
    #[error("teaching mode {0} is disabled for this tenant")]
    ModeDisabled(&'static str),
    #[error("consecutive failures threshold must be at least 1")]
    InvalidRules,
}

#[derive(Debug, Error, PartialEq)]
pub enum MasteryError {
    #[error("topic {0} not registered for this tenant")]
    UnknownTopic(Uuid),
    #[error("no open knowledge gap for learner {learner} on topic {topic}")]
    NoOpenGap { learner: Uuid, topic: Uuid },
}

#[derive(Debug, Error, PartialEq)]
pub enum VerificationError {
    #[error("confidence score {0} outside [0, 1]")]
    InvalidConfidence(f64),
    #[error("authority source {0} is not registered")]
    UnknownSource(Uuid),
    #[error("verified content {0} not found")]
    UnknownContent(Uuid),
}

#[derive(Debug, Error, PartialEq)]
pub enum RecommendError {
    #[error("domain {0} has no registered topics for this tenant")]
    UnknownDomain(Uuid),
}

/// Persistence plumbing failures, surfaced for retry with the same
/// idempotency key.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("stale version for {entity} (concurrent update)")]
    StaleVersion { entity: &'static str },
}
