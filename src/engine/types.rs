use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum ConfidenceLevel {
    #[default]
    Low,
    Medium,
    MediumHigh,
    High,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::MediumHigh => "medium_high",
            Self::High => "high",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "medium" => Self::Medium,
            "medium_high" => Self::MediumHigh,
            "high" => Self::High,
            _ => Self::Low,
        }
    }

    pub fn step_up(&self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::MediumHigh,
            _ => Self::High,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum GapSeverity {
    #[default]
    Low,
    Medium,
    High,
}

impl GapSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "medium" => Self::Medium,
            "high" => Self::High,
            _ => Self::Low,
        }
    }

    pub fn escalate(&self) -> Self {
        match self {
            Self::Low => Self::Medium,
            _ => Self::High,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    FullyUnderstood,
    PartiallyUnderstood,
    NotUnderstood,
}

impl SessionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullyUnderstood => "fully_understood",
            Self::PartiallyUnderstood => "partially_understood",
            Self::NotUnderstood => "not_understood",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "fully_understood" => Self::FullyUnderstood,
            "not_understood" => Self::NotUnderstood,
            _ => Self::PartiallyUnderstood,
        }
    }

    /// Engagement sample fed into the rolling EWMA.
    pub fn engagement_sample(&self) -> f64 {
        match self {
            Self::FullyUnderstood => 1.0,
            Self::PartiallyUnderstood => 0.5,
            Self::NotUnderstood => 0.0,
        }
    }
}

/// Static teaching-mode catalog. Names are resolved to these identifiers once
/// at configuration time; the state machine never round-trips strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeachingMode {
    Socratic,
    Lecture,
    CaseBased,
    Inquiry,
    Demonstration,
}

impl TeachingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Socratic => "socratic",
            Self::Lecture => "lecture",
            Self::CaseBased => "case_based",
            Self::Inquiry => "inquiry",
            Self::Demonstration => "demonstration",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "socratic" => Some(Self::Socratic),
            "lecture" => Some(Self::Lecture),
            "case_based" => Some(Self::CaseBased),
            "inquiry" => Some(Self::Inquiry),
            "demonstration" => Some(Self::Demonstration),
            _ => None,
        }
    }

    pub const CATALOG: [TeachingMode; 5] = [
        Self::Socratic,
        Self::Lecture,
        Self::CaseBased,
        Self::Inquiry,
        Self::Demonstration,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Required,
    Recommended,
    Related,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Recommended => "recommended",
            Self::Related => "related",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "required" => Self::Required,
            "recommended" => Self::Recommended,
            _ => Self::Related,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum DifficultyLevel {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl DifficultyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "easy" => Self::Easy,
            "hard" => Self::Hard,
            _ => Self::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum GoalStatus {
    #[default]
    Active,
    Completed,
    Paused,
    Cancelled,
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchingRules {
    pub consecutive_failures_threshold: u32,
    pub low_engagement_threshold: f64,
    pub auto_switch_enabled: bool,
}

impl Default for SwitchingRules {
    fn default() -> Self {
        Self {
            consecutive_failures_threshold: 3,
            low_engagement_threshold: 0.3,
            auto_switch_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeachingStrategy {
    pub primary_mode: TeachingMode,
    pub fallback_modes: Vec<TeachingMode>,
    pub switching_rules: SwitchingRules,
}

/// Per-tenant enablement/priority override of the static mode catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeachingModeConfig {
    pub mode: TeachingMode,
    pub enabled: bool,
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerRecord {
    pub learner_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningGoalRecord {
    pub goal_id: Uuid,
    pub tenant_id: Uuid,
    pub learner_id: Uuid,
    pub goal_name: String,
    pub status: GoalStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainRecord {
    pub domain_id: Uuid,
    pub tenant_id: Uuid,
    pub goal_id: Uuid,
    pub domain_name: String,
    /// Relative importance within the goal, 0-100. Soft hint only; domains
    /// are not required to sum to 100.
    pub weight_percentage: f64,
    pub recommended_teaching_mode: Option<TeachingMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicRecord {
    pub topic_id: Uuid,
    pub tenant_id: Uuid,
    pub domain_id: Uuid,
    pub topic_name: String,
    pub difficulty: DifficultyLevel,
    pub estimated_minutes: i32,
    /// Registration sequence; breaks topological-order ties deterministically.
    pub seq: u64,
    pub created_at: DateTime<Utc>,
}

/// Static explanatory content attached to a topic. The engine stores but
/// never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptRecord {
    pub concept_id: Uuid,
    pub tenant_id: Uuid,
    pub topic_id: Uuid,
    pub concept_name: String,
    pub explanation: Option<String>,
    pub rules: Vec<String>,
    pub common_pitfalls: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyEdge {
    pub prerequisite: Uuid,
    pub dependent: Uuid,
    pub kind: DependencyKind,
    pub strength: f64,
}

/// A direct prerequisite of a topic, annotated with how hard it gates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prerequisite {
    pub topic_id: Uuid,
    pub kind: DependencyKind,
    pub strength: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicMastery {
    pub tenant_id: Uuid,
    pub learner_id: Uuid,
    pub topic_id: Uuid,
    pub confidence_level: ConfidenceLevel,
    pub review_count: i32,
    pub consecutive_understood: u32,
    pub last_reviewed: DateTime<Utc>,
    pub mastery_date: NaiveDate,
    pub teaching_modes_used: Vec<TeachingMode>,
    /// Session refs already applied; replays are silent no-ops.
    pub applied_sessions: HashSet<Uuid>,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeGap {
    pub gap_id: Uuid,
    pub tenant_id: Uuid,
    pub learner_id: Uuid,
    pub topic_id: Uuid,
    pub severity: GapSeverity,
    pub description: String,
    pub identified_date: NaiveDate,
    pub resolution_date: Option<NaiveDate>,
    pub resolution_notes: Option<String>,
    pub related_sessions: Vec<Uuid>,
    pub version: i64,
}

impl KnowledgeGap {
    pub fn is_open(&self) -> bool {
        self.resolution_date.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCitation {
    pub source_id: Uuid,
    pub citation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthoritySource {
    pub source_id: Uuid,
    pub source_name: String,
    pub base_url: String,
    pub trust_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedContent {
    pub content_id: Uuid,
    pub tenant_id: Uuid,
    pub concept_id: Uuid,
    pub content_text: String,
    pub confidence_score: f64,
    pub verified_at: DateTime<Utc>,
    pub needs_reverification_after: NaiveDate,
    pub sources: Vec<SourceCitation>,
    pub version: i64,
}

/// Per-domain selector state. `fallback_cursor` of -1 means the primary mode
/// is active; 0.. index into the ranked fallback list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainStrategyState {
    pub tenant_id: Uuid,
    pub domain_id: Uuid,
    pub active_mode: TeachingMode,
    pub fallback_cursor: i32,
    pub consecutive_failures: u32,
    pub recent_engagement: f64,
    pub engagement_samples: u32,
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchReason {
    FailureStreak,
    LowEngagement,
    ManualOverride,
}

/// Selector outputs the surrounding system reacts to. `StrategyExhausted` is
/// a signal for escalation, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StrategySignal {
    SwitchedMode {
        from: TeachingMode,
        to: TeachingMode,
        reason: SwitchReason,
    },
    StrategyExhausted,
}

/// Outcome of a `record_outcome` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeUpdate {
    pub confidence_level: ConfidenceLevel,
    pub review_count: i32,
    pub promoted: bool,
    pub open_gap: Option<KnowledgeGap>,
    /// True when the session ref had already been applied and nothing changed.
    pub duplicate: bool,
    /// Raised when the outcome drove the domain's strategy selector.
    pub strategy_signal: Option<StrategySignal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub topic_id: Uuid,
    pub readiness_score: f64,
    pub open_gap_severity: Option<GapSeverity>,
    pub estimated_minutes: i32,
}

/// `recommend_next` result. The two empty cases are deliberately distinct:
/// everything mastered versus unmastered topics all blocked by prerequisites.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecommendationOutcome {
    Topic(Recommendation),
    AllMastered,
    AllBlocked,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterySummary {
    pub low: usize,
    pub medium: usize,
    pub medium_high: usize,
    pub high: usize,
    pub open_gaps: usize,
}
