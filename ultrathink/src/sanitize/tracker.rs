// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

// Streaming boundary tracker
//
// Consumes text fragments as they arrive and separates user-visible text
// from tool-call blocks. Markers may be split across fragments at any
// byte, so a short suffix that could still grow into a marker is held
// back until the next fragment decides it.

use super::markers::{dangling_suffix_len, find_close, find_open, find_thinking};
use super::parser::parse_tool_call_block;
use super::types::TrackedText;

/// Per-stream marker state. One tracker per response; never shared.
#[derive(Debug, Default)]
pub struct BoundaryTracker {
    inside_tool_call: bool,
    /// Raw block text from its opening marker, while inside a block.
    accumulator: String,
    /// Held suffix that may be the start of a marker.
    dangling: String,
    /// Offset in `accumulator` from which to look for the closing marker.
    close_scan_from: usize,
}

enum NextMarker {
    Thinking { at: usize, len: usize },
    ToolCall { at: usize },
}

impl BoundaryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_inside_tool_call(&self) -> bool {
        self.inside_tool_call
    }

    /// Bytes currently held back (open block plus any dangling suffix).
    pub fn buffered_len(&self) -> usize {
        self.accumulator.len() + self.dangling.len()
    }

    /// Feed one text fragment.
    ///
    /// Returns the text that can be shown now and the tool calls whose
    /// closing marker arrived in this fragment. Blocks that close but do
    /// not parse are returned verbatim as visible text.
    pub fn feed(&mut self, fragment: &str) -> TrackedText {
        let mut out = TrackedText::default();
        let mut pending = std::mem::take(&mut self.dangling);
        pending.push_str(fragment);

        loop {
            if self.inside_tool_call {
                self.accumulator.push_str(&pending);
                pending.clear();

                let Some((_, end)) = find_close(&self.accumulator, self.close_scan_from) else {
                    // An unfinished closing marker has no `<` after its start.
                    self.close_scan_from = self.accumulator.rfind('<').unwrap_or(self.accumulator.len());
                    break;
                };

                pending = self.accumulator.split_off(end);
                let block = std::mem::take(&mut self.accumulator);
                self.inside_tool_call = false;
                self.close_scan_from = 0;

                match parse_tool_call_block(&block) {
                    Some(tool_call) => out.tool_calls.push(tool_call),
                    None => out.visible.push_str(&block),
                }
                continue;
            }

            match next_marker(&pending) {
                Some(NextMarker::Thinking { at, len }) => {
                    out.visible.push_str(&pending[..at]);
                    pending.replace_range(..at + len, "");
                }
                Some(NextMarker::ToolCall { at }) => {
                    out.visible.push_str(&pending[..at]);
                    pending.replace_range(..at, "");
                    self.inside_tool_call = true;
                    self.close_scan_from = 0;
                }
                None => {
                    let keep_from = pending.len() - dangling_suffix_len(&pending);
                    self.dangling = pending.split_off(keep_from);
                    out.visible.push_str(&pending);
                    break;
                }
            }
        }

        out
    }

    /// The text segment ended, so a held suffix can no longer grow into a
    /// marker. Returns it as visible text. An open block is kept.
    pub fn release_held(&mut self) -> Option<String> {
        if self.inside_tool_call || self.dangling.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.dangling))
    }

    /// End of stream. Drops any unterminated block and held suffix and
    /// returns how many bytes were discarded.
    pub fn finish(&mut self) -> usize {
        let discarded = self.buffered_len();
        *self = Self::default();
        discarded
    }
}

fn next_marker(text: &str) -> Option<NextMarker> {
    let open = find_open(text, 0);
    let thinking = find_thinking(text, 0);
    match (open, thinking) {
        (Some(at), Some((t_at, _))) if at < t_at => Some(NextMarker::ToolCall { at }),
        (_, Some((at, len))) => Some(NextMarker::Thinking { at, len }),
        (Some(at), None) => Some(NextMarker::ToolCall { at }),
        (None, None) => None,
    }
}
