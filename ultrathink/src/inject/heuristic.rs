// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

// Failure heuristic
//
// Decides whether the previous assistant turn looks like a failed attempt
// (leaked tool-call markup, refusal, truncated turn). What counts as a
// failure is configuration: the catalogue lives in the failure patterns.

use crate::config::PatternSet;

/// Flags assistant text that looks like a failed turn.
pub trait FailureHeuristic: Send + Sync {
    fn looks_like_failure(&self, text: &str) -> bool;
}

/// Regex-backed heuristic over the compiled failure patterns.
#[derive(Debug, Clone)]
pub struct PatternFailureHeuristic {
    patterns: PatternSet,
}

impl PatternFailureHeuristic {
    pub fn new(patterns: PatternSet) -> Self {
        Self { patterns }
    }

    /// Source of the first pattern that flags `text`, for logging.
    pub fn matched_pattern(&self, text: &str) -> Option<&str> {
        self.patterns.first_match(text)
    }
}

impl FailureHeuristic for PatternFailureHeuristic {
    fn looks_like_failure(&self, text: &str) -> bool {
        self.matched_pattern(text).is_some()
    }
}

/// Never flags anything.
pub struct NoFailureHeuristic;

impl FailureHeuristic for NoFailureHeuristic {
    fn looks_like_failure(&self, _text: &str) -> bool {
        false
    }
}
