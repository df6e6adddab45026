// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

// Marker scanning
//
// ASCII case-insensitive search for the textual tool-call and thinking
// markers. Every marker is pure ASCII, so any byte offset returned here
// is also a valid `char` boundary in the searched string.

/// Start sequence of an opening tool-call marker (`<tool_call>`,
/// `<tool_call name="bash">`, ...).
pub const TOOL_CALL_OPEN: &str = "<tool_call";

/// Start sequence of a closing tool-call marker.
pub const TOOL_CALL_CLOSE: &str = "</tool_call";

/// Thinking wrapper markers stripped from visible text. Longer spellings
/// come first so `<thinking>` wins over `<think>` at the same offset.
pub const THINKING_MARKERS: &[&str] = &[
    "<thinking>",
    "</thinking>",
    "[thinking]",
    "[/thinking]",
    "<think>",
    "</think>",
    "[think]",
    "[/think]",
];

/// Longest text the tracker may need to hold back while outside a block:
/// everything up to, but excluding, the final byte of `<tool_call>` or
/// the longest thinking marker.
const OPEN_MARKER_WITH_BOUNDARY: &str = "<tool_call>";

/// Find `needle` in `haystack` at or after byte offset `from`, ignoring
/// ASCII case.
pub fn find_ascii_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let hay = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() || from >= hay.len() || hay.len() - from < needle.len() {
        return None;
    }
    (from..=hay.len() - needle.len()).find(|&i| hay[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

/// Locate the next complete opening tool-call marker start at or after
/// `from`.
///
/// `<tool_call` only counts when the following byte ends the tag name
/// (`>`, whitespace, `=`, `/` and so on), which keeps `<tool_calls>` and
/// `<tool_caller>` out. A start sequence sitting at the very end of the
/// text is not reported; callers hold it back until more text arrives.
pub fn find_open(text: &str, from: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut cursor = from;
    while let Some(pos) = find_ascii_ci(text, TOOL_CALL_OPEN, cursor) {
        let after = pos + TOOL_CALL_OPEN.len();
        match bytes.get(after) {
            None => return None,
            Some(b) if is_name_byte(*b) => cursor = pos + 1,
            Some(_) => return Some(pos),
        }
    }
    None
}

/// Locate the next complete closing marker at or after `from`.
///
/// Returns `(start, end)` where `end` is the offset just past the `>`.
/// Whitespace between the tag name and `>` is tolerated. `None` means no
/// closing marker is complete yet.
pub fn find_close(text: &str, from: usize) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut cursor = from;
    while let Some(pos) = find_ascii_ci(text, TOOL_CALL_CLOSE, cursor) {
        let mut i = pos + TOOL_CALL_CLOSE.len();
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        match bytes.get(i) {
            None => return None,
            Some(b'>') => return Some((pos, i + 1)),
            Some(_) => cursor = pos + 1,
        }
    }
    None
}

/// Find the earliest thinking marker at or after `from`.
///
/// Returns `(offset, marker_len)`.
pub fn find_thinking(text: &str, from: usize) -> Option<(usize, usize)> {
    THINKING_MARKERS
        .iter()
        .filter_map(|m| find_ascii_ci(text, m, from).map(|pos| (pos, m.len())))
        .min_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
}

/// Length of the longest suffix of `text` that could still grow into a
/// marker the tracker reacts to while outside a tool-call block.
pub fn dangling_suffix_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    let longest = std::iter::once(OPEN_MARKER_WITH_BOUNDARY)
        .chain(THINKING_MARKERS.iter().copied())
        .map(str::len)
        .max()
        .unwrap_or(0);

    let max_hold = longest.saturating_sub(1).min(bytes.len());
    for len in (1..=max_hold).rev() {
        let suffix = &bytes[bytes.len() - len..];
        let is_prefix = std::iter::once(OPEN_MARKER_WITH_BOUNDARY)
            .chain(THINKING_MARKERS.iter().copied())
            .any(|m| m.len() > len && m.as_bytes()[..len].eq_ignore_ascii_case(suffix));
        if is_prefix {
            return len;
        }
    }
    0
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}
