use serde::{Deserialize, Serialize};

/// Rolling window (in sessions) used for the engagement EWMA. The switching
/// rules only carry a threshold, so the window size is fixed here.
pub const ENGAGEMENT_WINDOW: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyDefaults {
    pub consecutive_failures_threshold: u32,
    pub low_engagement_threshold: f64,
    pub auto_switch_enabled: bool,
}

impl Default for StrategyDefaults {
    fn default() -> Self {
        Self {
            consecutive_failures_threshold: 3,
            low_engagement_threshold: 0.3,
            auto_switch_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasteryParams {
    /// Consecutive fully-understood outcomes needed to raise confidence one step.
    pub promotion_streak: u32,
}

impl Default for MasteryParams {
    fn default() -> Self {
        Self {
            promotion_streak: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationParams {
    /// Weight of the content's own confidence in the trust-weighted blend.
    pub content_weight: f64,
    /// Weight of the best linked source's trust score.
    pub source_weight: f64,
}

impl Default for VerificationParams {
    fn default() -> Self {
        Self {
            content_weight: 0.5,
            source_weight: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessWeights {
    pub recommended_penalty: f64,
    pub related_penalty: f64,
}

impl Default for ReadinessWeights {
    fn default() -> Self {
        Self {
            recommended_penalty: 0.5,
            related_penalty: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    pub strategy_defaults: StrategyDefaults,
    pub mastery: MasteryParams,
    pub verification: VerificationParams,
    pub readiness: ReadinessWeights,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let mut config = Self::default();

        if let Ok(val) = std::env::var("ENGINE_FAILURE_THRESHOLD") {
            if let Ok(parsed) = val.parse::<u32>() {
                config.strategy_defaults.consecutive_failures_threshold = parsed.max(1);
            }
        }
        if let Ok(val) = std::env::var("ENGINE_LOW_ENGAGEMENT_THRESHOLD") {
            if let Ok(parsed) = val.parse::<f64>() {
                config.strategy_defaults.low_engagement_threshold = parsed.clamp(0.0, 1.0);
            }
        }
        if let Ok(val) = std::env::var("ENGINE_AUTO_SWITCH_ENABLED") {
            config.strategy_defaults.auto_switch_enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("ENGINE_PROMOTION_STREAK") {
            if let Ok(parsed) = val.parse::<u32>() {
                config.mastery.promotion_streak = parsed.max(1);
            }
        }

        config
    }
}
