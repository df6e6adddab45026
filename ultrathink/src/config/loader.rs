// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

use sha2::{Digest, Sha256};

use super::defaults::{
    default_failure_patterns, DEFAULT_INSTRUCTION, DEFAULT_PROVIDER, DEFAULT_UPSTREAM_BASE_URL,
};
use super::error::ConfigError;
use super::interpolation::resolve_variables;
use super::pattern::{CompiledPattern, PatternSet};
use super::raw;
use super::source::ConfigSource;
use super::types::*;

/// Load and validate an ultrathink config from the given source.
///
/// Steps:
/// 1. Read raw YAML from source
/// 2. Compute SHA256 config hash
/// 3. Parse YAML into raw deserialization types
/// 4. Validate version and mode
/// 5. Resolve `${VAR}` interpolation in instruction and URL fields
/// 6. Compile failure patterns (defaults first, then user patterns)
/// 7. Build typed Config struct
pub fn load_config(source: &dyn ConfigSource) -> Result<Config, ConfigError> {
    let raw_yaml = source.load()?;
    let config_hash = compute_hash(&raw_yaml);

    let raw: raw::RawConfig = serde_yaml::from_str(&raw_yaml)?;

    if raw.ultrathink != "v1" {
        return Err(ConfigError::Validation(format!(
            "unsupported config version \"{}\", expected \"v1\"",
            raw.ultrathink
        )));
    }

    let enabled = raw.enabled.unwrap_or(true);

    let gate = ModelGate {
        enabled,
        provider: raw
            .provider
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string()),
        models: raw
            .models
            .iter()
            .map(|m| m.trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect(),
    };

    let injection = build_injection_config(
        raw.mode.as_deref(),
        raw.instruction.as_deref(),
        raw.retry_instruction.as_deref(),
        &raw.failure_patterns,
        raw.use_default_failure_patterns != Some(false),
    )?;

    let sanitize = raw
        .sanitize
        .map(|s| SanitizeConfig {
            enabled: s.enabled.unwrap_or(true),
            likely_sse: s.likely_sse.unwrap_or(false),
        })
        .unwrap_or_default();

    let upstream = build_upstream_config(raw.upstream)?;

    Ok(Config {
        version: raw.ultrathink,
        enabled,
        gate,
        injection,
        sanitize,
        upstream,
        environment: raw.environment.unwrap_or_default(),
        config_hash,
    })
}

pub fn compute_hash(raw_yaml: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_yaml.as_bytes());
    let hash = hasher.finalize();
    format!("sha256:{:x}", hash)
}

fn build_injection_config(
    mode: Option<&str>,
    instruction: Option<&str>,
    retry_instruction: Option<&str>,
    user_patterns: &[String],
    use_defaults: bool,
) -> Result<InjectionConfig, ConfigError> {
    let mode = match mode {
        None => InjectionMode::Prefix,
        Some(value) => InjectionMode::parse(value).ok_or_else(|| {
            ConfigError::Validation(format!(
                "unknown mode \"{value}\", expected \"prefix\", \"system\", or \"sanitize_only\""
            ))
        })?,
    };

    let instruction = match instruction {
        Some(text) => resolve_variables(text)?.trim().to_string(),
        None => DEFAULT_INSTRUCTION.to_string(),
    };
    if instruction.is_empty() {
        return Err(ConfigError::Validation("instruction must not be empty".to_string()));
    }

    let retry_instruction = match retry_instruction {
        Some(text) => Some(resolve_variables(text)?.trim().to_string()).filter(|t| !t.is_empty()),
        None => None,
    };

    let mut patterns = if use_defaults {
        default_failure_patterns()
    } else {
        Vec::new()
    };
    let user = user_patterns
        .iter()
        .map(|p| CompiledPattern::compile(p))
        .collect::<Result<Vec<_>, _>>()?;
    patterns.extend(user);

    Ok(InjectionConfig {
        mode,
        instruction,
        retry_instruction,
        failure_patterns: PatternSet::new(patterns)?,
    })
}

fn build_upstream_config(raw: Option<raw::RawUpstreamConfig>) -> Result<UpstreamConfig, ConfigError> {
    let (base_url, timeout_ms) = match raw {
        Some(u) => (u.base_url, u.timeout_ms),
        None => (None, None),
    };

    let base_url = match base_url {
        Some(url) => resolve_variables(&url)?,
        None => DEFAULT_UPSTREAM_BASE_URL.to_string(),
    };
    let base_url = base_url.trim().trim_end_matches('/').to_string();
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(ConfigError::Validation(format!(
            "upstream.base_url must be an http(s) URL, got \"{base_url}\""
        )));
    }

    if timeout_ms == Some(0) {
        return Err(ConfigError::Validation(
            "upstream.timeout_ms must be greater than zero".to_string(),
        ));
    }

    Ok(UpstreamConfig {
        base_url,
        timeout_ms,
    })
}
