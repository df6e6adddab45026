// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use super::heuristic::FailureHeuristic;

/// What the instruction builder gets to see about a request.
#[derive(Debug, Clone, Default)]
pub struct InjectionContext {
    /// `"<provider>/<model>"`.
    pub gate_key: String,
    /// Text of the most recent assistant message, if the history has one.
    pub last_assistant_text: Option<String>,
}

/// Produces the text to inject for a request. `None` means inject nothing.
pub trait InstructionBuilder: Send + Sync {
    fn build(&self, ctx: &InjectionContext) -> Option<String>;
}

/// The configured instruction, plus the retry instruction after a blank line
/// when the previous assistant turn looks like a failure.
pub struct ConfiguredInstruction {
    instruction: String,
    retry_instruction: Option<String>,
    heuristic: Arc<dyn FailureHeuristic>,
}

impl ConfiguredInstruction {
    pub fn new(
        instruction: impl Into<String>,
        retry_instruction: Option<String>,
        heuristic: Arc<dyn FailureHeuristic>,
    ) -> Self {
        Self {
            instruction: instruction.into(),
            retry_instruction,
            heuristic,
        }
    }
}

impl InstructionBuilder for ConfiguredInstruction {
    fn build(&self, ctx: &InjectionContext) -> Option<String> {
        if self.instruction.trim().is_empty() {
            return None;
        }
        let retry = self.retry_instruction.as_deref().filter(|retry| {
            !retry.trim().is_empty()
                && ctx
                    .last_assistant_text
                    .as_deref()
                    .is_some_and(|text| self.heuristic.looks_like_failure(text))
        });
        match retry {
            Some(retry) => {
                tracing::debug!(gate_key = %ctx.gate_key, "previous turn flagged, adding retry instruction");
                Some(format!("{}\n\n{}", self.instruction, retry))
            }
            None => Some(self.instruction.clone()),
        }
    }
}
