// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

// Raw YAML deserialization types (internal)
// Kept apart from the public Config structs: interpolation, regex
// compilation and validation happen between the two.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub ultrathink: String,
    pub enabled: Option<bool>,
    pub provider: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
    pub mode: Option<String>,
    pub instruction: Option<String>,
    pub retry_instruction: Option<String>,
    #[serde(default)]
    pub failure_patterns: Vec<String>,
    /// If false, skip the embedded default failure patterns. Default: true.
    pub use_default_failure_patterns: Option<bool>,
    pub sanitize: Option<RawSanitizeConfig>,
    pub upstream: Option<RawUpstreamConfig>,
    pub environment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawSanitizeConfig {
    pub enabled: Option<bool>,
    pub likely_sse: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct RawUpstreamConfig {
    pub base_url: Option<String>,
    pub timeout_ms: Option<u64>,
}
