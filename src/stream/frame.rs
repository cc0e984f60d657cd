//! Push-stream wire format: frame reassembly and payload classification.
//!
//! The wire format is a sequence of blank-line-delimited frames. Each frame
//! holds one or more lines, at least one of which carries a `data: ` payload
//! containing a UTF-8 JSON value or plain text.

use bytes::BytesMut;
use serde_json::Value;

/// Literal prefix marking the payload line of a frame.
const DATA_PREFIX: &str = "data: ";
/// Delimiter separating complete frames in the decoded text buffer.
const FRAME_DELIMITER: &str = "\n\n";

/// Decoded event produced by the stream receiver.
#[derive(Clone, Debug, PartialEq)]
pub enum DecodedEvent {
    /// Payload parsed as JSON and matched the message shape.
    StructuredMessage(Value),
    /// Payload that failed to parse as JSON or did not match the message
    /// shape, kept as opaque text.
    RawPayload(String),
}

/// Incremental reassembly buffer for the push-stream wire format.
///
/// Bytes are appended as they arrive from the network; complete frames drain
/// as soon as a blank-line delimiter makes them whole. A partial multi-byte
/// UTF-8 sequence at the end of a chunk is carried until the rest arrives.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    /// Undecoded tail of a UTF-8 sequence split across reads.
    partial: BytesMut,
    /// Decoded text not yet resolved into complete frames.
    text: String,
}

impl FrameBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk of raw bytes, decoding as much UTF-8 as possible.
    ///
    /// Invalid sequences become U+FFFD; an incomplete trailing sequence is
    /// held back until the next chunk completes it.
    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.partial.extend_from_slice(chunk);
        loop {
            match std::str::from_utf8(&self.partial) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    self.partial.clear();
                    return;
                }
                Err(err) => {
                    let error_len = err.error_len();
                    let valid = self.partial.split_to(err.valid_up_to());
                    if let Ok(decoded) = std::str::from_utf8(&valid) {
                        self.text.push_str(decoded);
                    }
                    match error_len {
                        None => return,
                        Some(len) => {
                            let _ = self.partial.split_to(len);
                            self.text.push(char::REPLACEMENT_CHARACTER);
                        }
                    }
                }
            }
        }
    }

    /// Drains and returns all complete frames currently buffered.
    ///
    /// The unresolved tail after the last delimiter stays buffered.
    pub fn take_frames(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(at) = self.text.find(FRAME_DELIMITER) {
            let rest = self.text.split_off(at + FRAME_DELIMITER.len());
            let mut frame = std::mem::replace(&mut self.text, rest);
            frame.truncate(at);
            frames.push(frame);
        }
        frames
    }
}

/// Extracts the raw payload from a complete frame.
///
/// Returns `None` for frames that are empty after trimming or that carry no
/// line starting with the `data: ` prefix.
pub fn frame_payload(frame: &str) -> Option<&str> {
    let trimmed = frame.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .lines()
        .find_map(|line| line.strip_prefix(DATA_PREFIX))
}

/// Classifies a raw payload into a [`DecodedEvent`].
///
/// A payload is message-shaped when it parses as JSON and either declares
/// `jsonrpc: "2.0"` or carries any of the `id`, `method`, `result`, or
/// `error` members. Everything else stays opaque text; a parse failure is
/// not an error condition.
pub fn classify_payload(payload: &str) -> DecodedEvent {
    match serde_json::from_str::<Value>(payload) {
        Ok(value) if is_message_shaped(&value) => DecodedEvent::StructuredMessage(value),
        _ => DecodedEvent::RawPayload(payload.to_string()),
    }
}

fn is_message_shaped(value: &Value) -> bool {
    value.get("jsonrpc").and_then(Value::as_str) == Some("2.0")
        || value.get("id").is_some()
        || value.get("method").is_some()
        || value.get("result").is_some()
        || value.get("error").is_some()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{classify_payload, frame_payload, DecodedEvent, FrameBuffer};

    fn collect(buffer: &mut FrameBuffer) -> Vec<DecodedEvent> {
        buffer
            .take_frames()
            .iter()
            .filter_map(|frame| frame_payload(frame))
            .map(classify_payload)
            .collect()
    }

    fn events_for_chunks(chunks: &[&[u8]]) -> Vec<DecodedEvent> {
        let mut buffer = FrameBuffer::new();
        let mut events = Vec::new();
        for chunk in chunks {
            buffer.push_chunk(chunk);
            events.extend(collect(&mut buffer));
        }
        events
    }

    #[test]
    fn single_frame_single_chunk() {
        let events = events_for_chunks(&[b"data: {\"jsonrpc\":\"2.0\",\"id\":1}\n\n"]);
        assert_eq!(
            events,
            vec![DecodedEvent::StructuredMessage(
                json!({"jsonrpc":"2.0","id":1})
            )]
        );
    }

    #[test]
    fn frame_split_inside_payload() {
        let events = events_for_chunks(&[
            b"data: {\"jsonrpc\":\"2.0\",\"id\":1,\"resul",
            b"t\":true}\n\n",
        ]);
        assert_eq!(
            events,
            vec![DecodedEvent::StructuredMessage(
                json!({"jsonrpc":"2.0","id":1,"result":true})
            )]
        );
    }

    #[test]
    fn frame_split_inside_data_prefix() {
        let events = events_for_chunks(&[b"dat", b"a: {\"id\":7}\n\n"]);
        assert_eq!(
            events,
            vec![DecodedEvent::StructuredMessage(json!({"id":7}))]
        );
    }

    #[test]
    fn frame_split_inside_delimiter() {
        let events = events_for_chunks(&[b"data: {\"id\":7}\n", b"\n"]);
        assert_eq!(
            events,
            vec![DecodedEvent::StructuredMessage(json!({"id":7}))]
        );
    }

    #[test]
    fn frame_split_inside_multibyte_char() {
        let wire = "data: {\"method\":\"caf\u{e9}\"}\n\n";
        let bytes = wire.as_bytes();
        let split = bytes
            .iter()
            .position(|&b| b == 0xC3)
            .expect("multibyte lead byte")
            + 1;
        let events = events_for_chunks(&[&bytes[..split], &bytes[split..]]);
        assert_eq!(
            events,
            vec![DecodedEvent::StructuredMessage(json!({"method":"café"}))]
        );
    }

    #[test]
    fn chunking_never_changes_the_event_sequence() {
        let wire = "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"caf\u{e9}\"}\n\n\
                    data: plain text\n\n\
                    event: ping\n\n\
                    data: {\"result\":{\"ok\":true}}\n\n";
        let bytes = wire.as_bytes();
        let unsplit = events_for_chunks(&[bytes]);
        assert_eq!(unsplit.len(), 3);
        for split in 1..bytes.len() {
            let events = events_for_chunks(&[&bytes[..split], &bytes[split..]]);
            assert_eq!(events, unsplit, "divergence at split {split}");
        }
    }

    #[test]
    fn many_frames_in_one_chunk_stay_ordered() {
        let events =
            events_for_chunks(&[b"data: {\"id\":1}\n\ndata: {\"id\":2}\n\ndata: {\"id\":3}\n\n"]);
        assert_eq!(
            events,
            vec![
                DecodedEvent::StructuredMessage(json!({"id":1})),
                DecodedEvent::StructuredMessage(json!({"id":2})),
                DecodedEvent::StructuredMessage(json!({"id":3})),
            ]
        );
    }

    #[test]
    fn trailing_partial_frame_stays_buffered() {
        let mut buffer = FrameBuffer::new();
        buffer.push_chunk(b"data: {\"id\":1}\n\ndata: {\"id\":2}");
        let events = collect(&mut buffer);
        assert_eq!(
            events,
            vec![DecodedEvent::StructuredMessage(json!({"id":1}))]
        );

        buffer.push_chunk(b"\n\n");
        let events = collect(&mut buffer);
        assert_eq!(
            events,
            vec![DecodedEvent::StructuredMessage(json!({"id":2}))]
        );
    }

    #[test]
    fn frame_without_data_line_is_discarded() {
        assert!(events_for_chunks(&[b"event: ping\nid: 3\n\n"]).is_empty());
    }

    #[test]
    fn blank_frames_are_discarded() {
        assert!(events_for_chunks(&[b"\n\n\n\n  \n\n"]).is_empty());
    }

    #[test]
    fn data_line_may_follow_other_fields() {
        let events = events_for_chunks(&[b"event: message\ndata: {\"id\":9}\n\n"]);
        assert_eq!(
            events,
            vec![DecodedEvent::StructuredMessage(json!({"id":9}))]
        );
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let events = events_for_chunks(&[b"data: bad \xFF byte\n\n"]);
        assert_eq!(
            events,
            vec![DecodedEvent::RawPayload("bad \u{fffd} byte".to_string())]
        );
    }

    #[test]
    fn classifies_message_shapes_as_structured() {
        for payload in [
            r#"{"jsonrpc":"2.0"}"#,
            r#"{"id":4}"#,
            r#"{"method":"ping"}"#,
            r#"{"result":null}"#,
            r#"{"error":{"code":-1}}"#,
        ] {
            assert!(
                matches!(
                    classify_payload(payload),
                    DecodedEvent::StructuredMessage(_)
                ),
                "payload {payload} must classify as structured"
            );
        }
    }

    #[test]
    fn json_without_message_shape_stays_raw() {
        assert_eq!(
            classify_payload(r#"{"status":"ok"}"#),
            DecodedEvent::RawPayload(r#"{"status":"ok"}"#.to_string())
        );
        assert_eq!(
            classify_payload("42"),
            DecodedEvent::RawPayload("42".to_string())
        );
    }

    #[test]
    fn unparseable_payload_stays_raw() {
        assert_eq!(
            classify_payload("not-json"),
            DecodedEvent::RawPayload("not-json".to_string())
        );
    }

    #[test]
    fn jsonrpc_version_must_match_exactly() {
        assert!(matches!(
            classify_payload(r#"{"jsonrpc":"1.0"}"#),
            DecodedEvent::RawPayload(_)
        ));
    }

    #[test]
    fn payload_requires_the_full_prefix() {
        assert_eq!(frame_payload("data:{\"id\":1}"), None);
        assert_eq!(frame_payload("data: {\"id\":1}"), Some("{\"id\":1}"));
    }
}
