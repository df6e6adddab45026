// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

// Request-side collaborators: what to inject, and whether the previous
// assistant turn calls for the retry instruction.

pub mod heuristic;
pub mod instruction;

pub use heuristic::{FailureHeuristic, NoFailureHeuristic, PatternFailureHeuristic};
pub use instruction::{ConfiguredInstruction, InjectionContext, InstructionBuilder};
