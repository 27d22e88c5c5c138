use uuid::Uuid;

use crate::config::ENGAGEMENT_WINDOW;
use crate::engine::types::{
    DomainStrategyState, SessionOutcome, StrategySignal, SwitchReason, TeachingMode,
    TeachingStrategy,
};

/// EWMA smoothing for the rolling engagement measure, tuned so the effective
/// window is `ENGAGEMENT_WINDOW` sessions.
fn engagement_alpha() -> f64 {
    2.0 / (ENGAGEMENT_WINDOW as f64 + 1.0)
}

pub fn initial_state(
    tenant_id: Uuid,
    domain_id: Uuid,
    strategy: &TeachingStrategy,
) -> DomainStrategyState {
    DomainStrategyState {
        tenant_id,
        domain_id,
        active_mode: strategy.primary_mode,
        fallback_cursor: -1,
        consecutive_failures: 0,
        recent_engagement: 1.0,
        engagement_samples: 0,
        version: 0,
    }
}

/// Applies a session outcome to the per-domain Mealy machine. Returns the
/// signal the surrounding system should react to, if any.
pub fn apply_outcome(
    state: &mut DomainStrategyState,
    strategy: &TeachingStrategy,
    outcome: SessionOutcome,
) -> Option<StrategySignal> {
    state.version += 1;
    observe_engagement(state, outcome.engagement_sample());

    match outcome {
        SessionOutcome::NotUnderstood => {
            state.consecutive_failures += 1;
            if strategy.switching_rules.auto_switch_enabled
                && state.consecutive_failures
                    >= strategy.switching_rules.consecutive_failures_threshold
            {
                return Some(advance_fallback(state, strategy, SwitchReason::FailureStreak));
            }
        }
        SessionOutcome::FullyUnderstood | SessionOutcome::PartiallyUnderstood => {
            state.consecutive_failures = 0;
        }
    }

    check_engagement(state, strategy)
}

/// Feeds an externally-sampled engagement value (0..=1) into the machine.
pub fn apply_engagement_sample(
    state: &mut DomainStrategyState,
    strategy: &TeachingStrategy,
    value: f64,
) -> Option<StrategySignal> {
    state.version += 1;
    observe_engagement(state, value.clamp(0.0, 1.0));
    check_engagement(state, strategy)
}

/// Explicit strategy-set request. Always succeeds: the cursor returns to -1
/// (primary position), counters are zeroed and engagement tracking restarts.
pub fn apply_manual_override(
    state: &mut DomainStrategyState,
    mode: TeachingMode,
) -> StrategySignal {
    let from = state.active_mode;
    state.version += 1;
    state.active_mode = mode;
    state.fallback_cursor = -1;
    state.consecutive_failures = 0;
    reset_engagement(state);
    StrategySignal::SwitchedMode {
        from,
        to: mode,
        reason: SwitchReason::ManualOverride,
    }
}

fn observe_engagement(state: &mut DomainStrategyState, sample: f64) {
    let alpha = engagement_alpha();
    state.recent_engagement = state.recent_engagement * (1.0 - alpha) + sample * alpha;
    state.engagement_samples += 1;
}

fn reset_engagement(state: &mut DomainStrategyState) {
    state.recent_engagement = 1.0;
    state.engagement_samples = 0;
}

/// The low-engagement trigger only arms once a full window of samples has
/// been observed, so a cold start cannot trip it.
fn check_engagement(
    state: &mut DomainStrategyState,
    strategy: &TeachingStrategy,
) -> Option<StrategySignal> {
    if strategy.switching_rules.auto_switch_enabled
        && state.engagement_samples >= ENGAGEMENT_WINDOW
        && state.recent_engagement < strategy.switching_rules.low_engagement_threshold
    {
        return Some(advance_fallback(state, strategy, SwitchReason::LowEngagement));
    }
    None
}

/// Advances the fallback cursor without wrapping. Once the ranked list is
/// exhausted the machine holds the last fallback and signals exhaustion on
/// every further attempt, leaving escalation to the caller.
fn advance_fallback(
    state: &mut DomainStrategyState,
    strategy: &TeachingStrategy,
    reason: SwitchReason,
) -> StrategySignal {
    state.consecutive_failures = 0;
    reset_engagement(state);

    let last = strategy.fallback_modes.len() as i32 - 1;
    if state.fallback_cursor >= last {
        return StrategySignal::StrategyExhausted;
    }

    let from = state.active_mode;
    state.fallback_cursor += 1;
    state.active_mode = strategy.fallback_modes[state.fallback_cursor as usize];
    StrategySignal::SwitchedMode {
        from,
        to: state.active_mode,
        reason,
    }
}
