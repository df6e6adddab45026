// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

// Config loader and validator
//
// Loads ultrathink.yaml, validates structure, resolves variable
// interpolation, compiles the failure patterns and computes a config hash.

mod defaults;
mod error;
mod interpolation;
mod loader;
mod pattern;
mod raw;
mod source;
mod types;

pub use defaults::{default_failure_patterns, DEFAULT_INSTRUCTION, DEFAULT_UPSTREAM_BASE_URL};
pub use error::ConfigError;
pub use interpolation::resolve_variables;
pub use loader::{compute_hash, load_config};
pub use pattern::{CompiledPattern, PatternSet};
pub use source::{ConfigSource, FileSource, StringSource};
pub use types::{
    Config, InjectionConfig, InjectionMode, ModelGate, SanitizeConfig, UpstreamConfig,
};
