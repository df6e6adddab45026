// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use regex::{Regex, RegexSet};

use super::error::ConfigError;

/// A compiled regex with its source text kept for logs.
#[derive(Clone)]
pub struct CompiledPattern {
    pub pattern: String,
    pub regex: Regex,
}

impl CompiledPattern {
    pub fn compile(pattern: &str) -> Result<Self, ConfigError> {
        let regex = Regex::new(pattern).map_err(|e| ConfigError::InvalidRegex {
            pattern: pattern.to_string(),
            source: e,
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl fmt::Debug for CompiledPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledPattern")
            .field("pattern", &self.pattern)
            .finish()
    }
}

impl PartialEq for CompiledPattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

/// Patterns matched together in one pass.
#[derive(Clone)]
pub struct PatternSet {
    patterns: Vec<CompiledPattern>,
    set: RegexSet,
}

impl PatternSet {
    pub fn new(patterns: Vec<CompiledPattern>) -> Result<Self, ConfigError> {
        let set = RegexSet::new(patterns.iter().map(|p| p.pattern.as_str())).map_err(|e| {
            ConfigError::InvalidRegex {
                pattern: "<pattern set>".to_string(),
                source: e,
            }
        })?;
        Ok(Self { patterns, set })
    }

    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            set: RegexSet::empty(),
        }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Source text of the first pattern that matches `text`.
    pub fn first_match(&self, text: &str) -> Option<&str> {
        self.set
            .matches(text)
            .iter()
            .next()
            .map(|i| self.patterns[i].pattern.as_str())
    }
}

impl fmt::Debug for PatternSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.patterns.iter().map(|p| &p.pattern)).finish()
    }
}
