//! Tiered error backoff for the cycle scheduler.
//!
//! Errors never stop the loop; they only stretch the next timer. Each cycle
//! picks at most one category (by severity priority), the streak tracks
//! consecutive cycles in that category, and the tier table saturates.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Transient,
    Persistent,
    Game,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Persistent => "persistent",
            ErrorCategory::Game => "game",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Selection priority when a cycle produced errors in several
    /// categories: persistent > transient > game > unknown.
    fn priority(&self) -> u8 {
        match self {
            ErrorCategory::Persistent => 3,
            ErrorCategory::Transient => 2,
            ErrorCategory::Game => 1,
            ErrorCategory::Unknown => 0,
        }
    }
}

/// Classify one cycle error by phase and message.
pub fn categorize(phase: &str, message: &str) -> ErrorCategory {
    let msg = message.to_lowercase();
    if msg.is_empty() {
        return ErrorCategory::Unknown;
    }
    if msg.contains("rate limit") || msg.contains("429") || msg.contains("too many requests") {
        return ErrorCategory::Transient;
    }
    if msg.contains("timeout") || msg.contains("timed out") || msg.contains("aborterror") {
        return ErrorCategory::Transient;
    }
    if msg.contains("config") {
        return ErrorCategory::Persistent;
    }
    if phase == "act" && msg.contains("game") {
        return ErrorCategory::Game;
    }
    ErrorCategory::Persistent
}

/// Pick the cycle's single category from all errors it produced.
pub fn select_category(categories: &[ErrorCategory]) -> Option<ErrorCategory> {
    categories.iter().copied().max_by_key(ErrorCategory::priority)
}

/// Interval for the Nth consecutive error (1-based streak) in a category.
pub fn tier_interval(category: ErrorCategory, streak: u32) -> Duration {
    let idx = streak.saturating_sub(1).min(2) as usize;
    let secs = match category {
        ErrorCategory::Transient => [15, 30, 60][idx],
        ErrorCategory::Persistent => [60, 120, 300][idx],
        ErrorCategory::Game => 15,
        ErrorCategory::Unknown => 60,
    };
    Duration::from_secs(secs)
}

/// Persisted backoff state: the category of the last failing cycle and how
/// many consecutive cycles failed in it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackoffState {
    pub category: Option<ErrorCategory>,
    pub streak: u32,
}

impl BackoffState {
    /// Record a failing cycle; the streak resets when the category changes.
    pub fn record_failure(&mut self, category: ErrorCategory) -> Duration {
        if self.category == Some(category) {
            self.streak += 1;
        } else {
            self.category = Some(category);
            self.streak = 1;
        }
        tier_interval(category, self.streak)
    }

    pub fn record_success(&mut self) {
        self.category = None;
        self.streak = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorization_heuristics() {
        assert_eq!(categorize("think", "Rate limit exceeded"), ErrorCategory::Transient);
        assert_eq!(categorize("think", "HTTP 429"), ErrorCategory::Transient);
        assert_eq!(categorize("observe", "request timed out"), ErrorCategory::Transient);
        assert_eq!(categorize("observe", "AbortError: fetch"), ErrorCategory::Transient);
        assert_eq!(categorize("think", "bad config value"), ErrorCategory::Persistent);
        assert_eq!(categorize("act", "game engine rejected move"), ErrorCategory::Game);
        // "game" in a non-act phase is not a game error.
        assert_eq!(categorize("observe", "game unavailable"), ErrorCategory::Persistent);
        assert_eq!(categorize("act", "disk full"), ErrorCategory::Persistent);
        assert_eq!(categorize("act", ""), ErrorCategory::Unknown);
    }

    #[test]
    fn category_selection_priority() {
        assert_eq!(
            select_category(&[ErrorCategory::Game, ErrorCategory::Transient]),
            Some(ErrorCategory::Transient)
        );
        assert_eq!(
            select_category(&[
                ErrorCategory::Transient,
                ErrorCategory::Persistent,
                ErrorCategory::Unknown
            ]),
            Some(ErrorCategory::Persistent)
        );
        assert_eq!(select_category(&[]), None);
    }

    #[test]
    fn transient_tiers_saturate() {
        let mut state = BackoffState::default();
        let intervals: Vec<u64> = (0..4)
            .map(|_| state.record_failure(ErrorCategory::Transient).as_secs())
            .collect();
        assert_eq!(intervals, [15, 30, 60, 60]);
    }

    #[test]
    fn persistent_tiers_saturate() {
        let mut state = BackoffState::default();
        let intervals: Vec<u64> = (0..4)
            .map(|_| state.record_failure(ErrorCategory::Persistent).as_secs())
            .collect();
        assert_eq!(intervals, [60, 120, 300, 300]);
    }

    #[test]
    fn game_is_fixed_and_unknown_is_flat() {
        let mut state = BackoffState::default();
        assert_eq!(state.record_failure(ErrorCategory::Game).as_secs(), 15);
        assert_eq!(state.record_failure(ErrorCategory::Game).as_secs(), 15);
        assert_eq!(tier_interval(ErrorCategory::Unknown, 3).as_secs(), 60);
    }

    #[test]
    fn category_change_resets_streak() {
        let mut state = BackoffState::default();
        state.record_failure(ErrorCategory::Transient);
        state.record_failure(ErrorCategory::Transient);
        assert_eq!(state.streak, 2);
        assert_eq!(state.record_failure(ErrorCategory::Persistent).as_secs(), 60);
        assert_eq!(state.streak, 1);
    }

    #[test]
    fn success_clears_streak() {
        let mut state = BackoffState::default();
        state.record_failure(ErrorCategory::Transient);
        state.record_success();
        assert_eq!(state.streak, 0);
        assert!(state.category.is_none());
        // Next failure starts at the first tier again.
        assert_eq!(state.record_failure(ErrorCategory::Transient).as_secs(), 15);
    }
}
