// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

use super::pattern::CompiledPattern;

/// Instruction injected when the config does not set one.
pub const DEFAULT_INSTRUCTION: &str = "Ultrathink";

/// Upstream used when the config does not set `upstream.base_url`.
pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://api.openai.com";

pub const DEFAULT_PROVIDER: &str = "openai";

/// The default failure patterns YAML, embedded at compile time.
const DEFAULT_FAILURE_PATTERNS_YAML: &str = include_str!("../../defaults/failure_patterns.yaml");

#[derive(serde::Deserialize)]
struct DefaultFailurePatternsYaml {
    failure_patterns: Vec<String>,
}

/// Parse and compile the embedded default failure patterns.
/// Panics on invalid regex (these are our own patterns).
pub fn default_failure_patterns() -> Vec<CompiledPattern> {
    let raw: DefaultFailurePatternsYaml = serde_yaml::from_str(DEFAULT_FAILURE_PATTERNS_YAML)
        .expect("default failure patterns YAML is invalid");

    raw.failure_patterns
        .into_iter()
        .map(|p| {
            CompiledPattern::compile(&p)
                .unwrap_or_else(|e| panic!("default failure pattern failed to compile: {e}"))
        })
        .collect()
}
