// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

// SSE frame transformer
//
// Re-segments an arbitrarily chunked byte stream into whole SSE events,
// runs text deltas through the boundary tracker and re-emits either the
// original event bytes or a rewritten event followed by synthesized
// tool-call events. Anything it cannot understand is forwarded verbatim.

use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use serde_json::Value;

use super::events::{
    decode_payload, detect_protocol, render_event, responses_event_type, ChatChunk, Payload,
    ResponsesEvent, SseEvent,
};
use super::tracker::BoundaryTracker;
use super::types::{CallIds, ProtocolMode, SanitizeOptions, ToolCallMatch};

/// Mutable state for one response stream.
#[derive(Debug, Default)]
pub struct StreamState {
    pub tracker: BoundaryTracker,
    /// Highest output index (Responses) or tool-call index (Chat) seen or
    /// allocated so far. Never decreases.
    pub max_seen_output_index: Option<u64>,
    /// `None` until the first JSON payload has been inspected.
    pub mode: Option<ProtocolMode>,
    /// Most recent text-carrying event. Released text is emitted in its shape.
    pub last_text_event: Option<(SseEvent, Value)>,
}

impl StreamState {
    fn observe_index(&mut self, index: u64) {
        self.max_seen_output_index = Some(self.max_seen_output_index.map_or(index, |m| m.max(index)));
    }

    fn allocate_index(&mut self) -> u64 {
        let next = self.max_seen_output_index.map_or(0, |m| m + 1);
        self.max_seen_output_index = Some(next);
        next
    }
}

/// Stateful SSE rewriter. One instance per response body.
#[derive(Debug)]
pub struct SseSanitizer {
    buffer: Vec<u8>,
    /// Offset in `buffer` where the next boundary search starts.
    scan_from: usize,
    state: StreamState,
    options: SanitizeOptions,
    rewritten: usize,
}

impl SseSanitizer {
    pub fn new(options: SanitizeOptions) -> Self {
        Self {
            buffer: Vec::new(),
            scan_from: 0,
            state: StreamState::default(),
            options,
            rewritten: 0,
        }
    }

    /// Detected protocol, once known.
    pub fn mode(&self) -> Option<ProtocolMode> {
        self.state.mode
    }

    /// Number of tool calls rewritten so far.
    pub fn rewritten_count(&self) -> usize {
        self.rewritten
    }

    /// Feed one transport chunk. Returns the bytes that can be emitted now;
    /// an incomplete trailing event stays buffered.
    pub fn transform(&mut self, chunk: &[u8]) -> Bytes {
        self.buffer.extend_from_slice(chunk);

        let mut out = Vec::with_capacity(chunk.len());
        while let Some((at, len)) = find_boundary(&self.buffer, self.scan_from) {
            let event: Vec<u8> = self.buffer.drain(..at + len).collect();
            self.scan_from = 0;
            self.process_event(&event, &event[..at], &mut out);
        }
        // A boundary may straddle the next chunk; back up by its length - 1.
        self.scan_from = self.buffer.len().saturating_sub(3);

        Bytes::from(out)
    }

    /// End of stream. Emits a held suffix that turned out to be plain text,
    /// returns leftover bytes verbatim and discards an unterminated block.
    pub fn flush(&mut self) -> Bytes {
        let mut out = Vec::new();
        self.release_held(&mut out);

        let discarded = self.state.tracker.finish();
        if discarded > 0 {
            tracing::debug!(
                discarded_bytes = discarded,
                "unterminated tool-call or marker text dropped at end of stream"
            );
        }
        self.scan_from = 0;
        out.append(&mut self.buffer);
        Bytes::from(out)
    }

    fn process_event(&mut self, raw: &[u8], body: &[u8], out: &mut Vec<u8>) {
        let Ok(text) = std::str::from_utf8(body) else {
            out.extend_from_slice(raw);
            return;
        };

        let event = SseEvent::parse(text);
        let Some(data) = event.data.as_deref() else {
            out.extend_from_slice(raw);
            return;
        };

        let mut payload = match decode_payload(data) {
            Payload::Json(value) => value,
            Payload::Done => {
                self.release_held(out);
                out.extend_from_slice(raw);
                return;
            }
            Payload::Opaque => {
                tracing::debug!(bytes = data.len(), "unparseable SSE payload passed through");
                out.extend_from_slice(raw);
                return;
            }
        };

        let mode = match self.state.mode {
            Some(mode) => mode,
            None => {
                let detected = detect_protocol(&payload);
                if detected == ProtocolMode::Unknown {
                    tracing::debug!("unrecognized stream shape; sanitizer disabled for this stream");
                }
                self.state.mode = Some(detected);
                detected
            }
        };

        if !carries_text(mode, &payload) {
            self.release_held(out);
        }

        let rendered = match mode {
            ProtocolMode::Unknown => None,
            ProtocolMode::Responses => self.rewrite_responses(&event, &mut payload),
            ProtocolMode::Chat => self.rewrite_chat(&event, &mut payload),
        };

        match rendered {
            Some(text) => out.extend_from_slice(text.as_bytes()),
            None => out.extend_from_slice(raw),
        }
    }

    fn rewrite_responses(&mut self, event: &SseEvent, payload: &mut Value) -> Option<String> {
        if let Some(index) = ResponsesEvent::output_index(payload) {
            self.state.observe_index(index);
        }

        let ResponsesEvent::OutputTextDelta { delta } = ResponsesEvent::decode(payload) else {
            return None;
        };
        self.state.last_text_event = Some((event.clone(), payload.clone()));
        let tracked = self.state.tracker.feed(&delta);
        if tracked.is_unchanged(&delta) {
            return None;
        }

        ResponsesEvent::set_delta(payload, &tracked.visible);
        let mut out = event.render_with_data(&payload.to_string());

        for call in &tracked.tool_calls {
            let output_index = self.state.allocate_index();
            let ids = CallIds::generate();
            for synthesized in ResponsesEvent::function_call_events(call, output_index, &ids) {
                let name = event.event_name.as_ref().and(responses_event_type(&synthesized));
                out.push_str(&render_event(name, &synthesized));
            }
            self.record_rewrite(call, ProtocolMode::Responses, output_index);
        }

        Some(out)
    }

    fn rewrite_chat(&mut self, event: &SseEvent, payload: &mut Value) -> Option<String> {
        if let Some(index) = ChatChunk::max_tool_call_index(payload) {
            self.state.observe_index(index);
        }

        let ChatChunk::ContentDelta { content } = ChatChunk::decode(payload) else {
            return None;
        };
        self.state.last_text_event = Some((event.clone(), payload.clone()));
        let mut tracked = self.state.tracker.feed(&content);
        if ChatChunk::finish_reason(payload).is_some() {
            if let Some(held) = self.state.tracker.release_held() {
                tracked.visible.push_str(&held);
            }
        }
        if tracked.is_unchanged(&content) {
            return None;
        }

        ChatChunk::set_content(payload, &tracked.visible);
        let mut out = event.render_with_data(&payload.to_string());

        for call in &tracked.tool_calls {
            let tool_index = self.state.allocate_index();
            let ids = CallIds::generate();
            for synthesized in ChatChunk::tool_call_chunks(payload, call, tool_index, &ids.call_id) {
                out.push_str(&render_event(event.event_name.as_deref(), &synthesized));
            }
            self.record_rewrite(call, ProtocolMode::Chat, tool_index);
        }

        Some(out)
    }

    /// Emit a held suffix that can no longer become a marker, as a text
    /// event shaped like the last one the stream carried.
    fn release_held(&mut self, out: &mut Vec<u8>) {
        let Some((event, template)) = self.state.last_text_event.as_ref() else {
            return;
        };
        let Some(text) = self.state.tracker.release_held() else {
            return;
        };

        let mut payload = template.clone();
        match self.state.mode {
            Some(ProtocolMode::Responses) => ResponsesEvent::set_delta(&mut payload, &text),
            Some(ProtocolMode::Chat) => ChatChunk::set_content(&mut payload, &text),
            _ => return,
        }
        out.extend_from_slice(event.render_with_data(&payload.to_string()).as_bytes());
    }

    fn record_rewrite(&mut self, call: &ToolCallMatch, mode: ProtocolMode, index: u64) {
        self.rewritten += 1;
        tracing::info!(
            tool_name = %call.tool_name,
            protocol = mode.as_str(),
            index,
            "textual tool call rewritten"
        );
        self.options.notify(&call.tool_name);
    }
}

/// Whether `payload` is a text-carrying event for `mode`. Any other event
/// ends the current text segment.
fn carries_text(mode: ProtocolMode, payload: &Value) -> bool {
    match mode {
        ProtocolMode::Responses => ResponsesEvent::is_text_delta(payload),
        ProtocolMode::Chat => ChatChunk::has_content(payload),
        ProtocolMode::Unknown => false,
    }
}

/// Earliest event boundary at or after `from`: `(offset, terminator_len)`.
fn find_boundary(buffer: &[u8], from: usize) -> Option<(usize, usize)> {
    let from = from.min(buffer.len());
    buffer[from..].windows(2).enumerate().find_map(|(i, pair)| {
        let at = from + i;
        if pair == b"\n\n" {
            Some((at, 2))
        } else if buffer[at..].starts_with(b"\r\n\r\n") {
            Some((at, 4))
        } else {
            None
        }
    })
}

/// Wrap a byte stream with an SSE sanitizer.
///
/// Transport errors are forwarded in place; the sanitizer keeps its
/// state and continues with the next chunk. Leftover bytes are flushed
/// once the input ends.
pub fn sanitize_sse_stream<S, E>(input: S, options: SanitizeOptions) -> impl Stream<Item = Result<Bytes, E>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    let state = (Box::pin(input), Some(SseSanitizer::new(options)));

    futures_util::stream::unfold(state, |(mut input, mut sanitizer)| async move {
        let active = sanitizer.as_mut()?;
        match input.next().await {
            Some(Ok(chunk)) => {
                let out = active.transform(&chunk);
                Some((Ok(out), (input, sanitizer)))
            }
            Some(Err(err)) => Some((Err(err), (input, sanitizer))),
            None => {
                let out = active.flush();
                if active.rewritten_count() > 0 {
                    tracing::debug!(rewritten = active.rewritten_count(), "stream sanitized");
                }
                Some((Ok(out), (input, None)))
            }
        }
    })
    .filter(|item| futures_util::future::ready(!matches!(item, Ok(b) if b.is_empty())))
}
