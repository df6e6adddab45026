// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod engine;
pub mod inject;
pub mod provider;
pub mod proxy;
pub mod sanitize;
