// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

use super::pattern::PatternSet;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Parsed and validated ultrathink config.
#[derive(Debug)]
pub struct Config {
    /// Config version. Always "v1".
    pub version: String,
    /// Master switch. When false, requests and responses pass untouched.
    pub enabled: bool,
    pub gate: ModelGate,
    pub injection: InjectionConfig,
    pub sanitize: SanitizeConfig,
    pub upstream: UpstreamConfig,
    /// Environment label (e.g. "local", "ci").
    pub environment: String,
    /// SHA256 of the raw YAML: "sha256:{hex}".
    pub config_hash: String,
}

// ---------------------------------------------------------------------------
// Model gate
// ---------------------------------------------------------------------------

/// Decides which requests are touched at all.
#[derive(Debug, Clone)]
pub struct ModelGate {
    pub enabled: bool,
    /// Provider label forming the first half of the gate key.
    pub provider: String,
    /// Lower-cased allow-list substrings. Empty allows every model.
    pub models: Vec<String>,
}

impl ModelGate {
    /// `"<provider>/<model>"`, the string the allow-list is matched against.
    pub fn key(&self, model: &str) -> String {
        format!("{}/{}", self.provider, model)
    }

    /// True iff the gate is enabled and the allow-list is empty or one of
    /// its entries occurs in `provider/model`, ignoring case.
    pub fn matches(&self, provider: &str, model: &str) -> bool {
        if !self.enabled {
            return false;
        }
        if self.models.is_empty() {
            return true;
        }
        let key = format!("{provider}/{model}").to_lowercase();
        self.models.iter().any(|entry| key.contains(entry.as_str()))
    }

    /// `matches` with the configured provider.
    pub fn allows(&self, model: &str) -> bool {
        self.matches(&self.provider, model)
    }
}

// ---------------------------------------------------------------------------
// Injection
// ---------------------------------------------------------------------------

/// Where the instruction goes in the outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionMode {
    /// Prefix the user's last message.
    Prefix,
    /// Add a system-level instruction.
    System,
    /// Leave requests alone; only sanitize responses.
    SanitizeOnly,
}

impl InjectionMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "prefix" => Some(Self::Prefix),
            "system" => Some(Self::System),
            "sanitize_only" => Some(Self::SanitizeOnly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prefix => "prefix",
            Self::System => "system",
            Self::SanitizeOnly => "sanitize_only",
        }
    }
}

#[derive(Debug)]
pub struct InjectionConfig {
    pub mode: InjectionMode,
    pub instruction: String,
    /// Appended after a blank line when the previous assistant turn looks
    /// like a failure.
    pub retry_instruction: Option<String>,
    pub failure_patterns: PatternSet,
}

// ---------------------------------------------------------------------------
// Sanitizer and upstream
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct SanitizeConfig {
    pub enabled: bool,
    /// Route every gated response through the SSE path.
    pub likely_sse: bool,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            likely_sse: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL without a trailing slash.
    pub base_url: String,
    pub timeout_ms: Option<u64>,
}
