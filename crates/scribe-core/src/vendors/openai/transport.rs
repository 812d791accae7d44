use crate::errors::GenerationError;
use crate::source::{GenerationEvent, SourceId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf) {
            let frame_bytes: Vec<u8> = self.buf.drain(..idx + delim_len).take(idx).collect();
            if let Some(frame) = parse_sse_frame(&frame_bytes) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Parses whatever is left once the byte stream ended without a trailing
    /// blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.buf);
        parse_sse_frame(&rest)
    }
}

fn find_frame_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len() && &buf[i..i + 4] == b"\r\n\r\n" {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

fn parse_sse_frame(bytes: &[u8]) -> Option<SseFrame> {
    if bytes.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    let mut event: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim_start().to_string());
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start());
        }
    }
    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data_lines.join("\n"),
    })
}

/// One decoded upstream signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OpenAiSignal {
    Event(GenerationEvent),
    Completed,
}

pub(crate) fn map_openai_frame(
    source: &SourceId,
    frame: &SseFrame,
) -> Result<Vec<OpenAiSignal>, GenerationError> {
    let data = frame.data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(Vec::new());
    }
    let value: serde_json::Value = serde_json::from_str(data).map_err(|e| {
        GenerationError::protocol(source.clone(), format!("invalid SSE JSON frame: {e}"))
    })?;
    map_openai_json(source, &value)
}

pub(crate) fn map_openai_json(
    source: &SourceId,
    value: &serde_json::Value,
) -> Result<Vec<OpenAiSignal>, GenerationError> {
    let Some(event_type) = value.get("type").and_then(|v| v.as_str()) else {
        return Ok(Vec::new());
    };
    let delta = || {
        value
            .get("delta")
            .and_then(|v| v.as_str())
            .filter(|d| !d.is_empty())
            .map(ToOwned::to_owned)
    };
    let signals = match event_type {
        "response.output_text.delta" => delta()
            .map(|d| vec![OpenAiSignal::Event(GenerationEvent::TextDelta(d))])
            .unwrap_or_default(),
        "response.reasoning_summary_part.added" => {
            vec![OpenAiSignal::Event(GenerationEvent::ReasoningStart)]
        }
        "response.reasoning_summary_text.delta" => delta()
            .map(|d| vec![OpenAiSignal::Event(GenerationEvent::ReasoningDelta(d))])
            .unwrap_or_default(),
        "response.reasoning_summary_part.done" => {
            vec![OpenAiSignal::Event(GenerationEvent::ReasoningEnd)]
        }
        "response.completed" => vec![OpenAiSignal::Completed],
        "response.incomplete" => {
            let reason = value
                .get("response")
                .and_then(|r| r.get("incomplete_details"))
                .and_then(|d| d.get("reason"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            return Err(GenerationError::provider(
                source.clone(),
                format!("OpenAI response incomplete: {reason}"),
                None,
            ));
        }
        "error" | "response.error" | "response.failed" => {
            let message = value
                .get("error")
                .and_then(|e| e.get("message"))
                .or_else(|| {
                    value
                        .get("response")
                        .and_then(|r| r.get("error"))
                        .and_then(|e| e.get("message"))
                })
                .and_then(|v| v.as_str())
                .or_else(|| value.get("message").and_then(|v| v.as_str()))
                .unwrap_or("OpenAI stream error");
            return Err(GenerationError::provider(source.clone(), message, None));
        }
        _ => Vec::new(),
    };
    Ok(signals)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn openai() -> SourceId {
        SourceId::new("openai")
    }

    #[test]
    fn sse_decoder_handles_partial_chunk_boundaries() {
        let mut decoder = SseDecoder::default();
        let part1 =
            b"event: message\ndata: {\"type\":\"response.output_text.delta\",\"delta\":\"hel";
        let part2 = b"lo\"}\n\n";
        assert!(decoder.push_chunk(part1).is_empty());
        let frames = decoder.push_chunk(part2);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("message"));
        assert!(frames[0].data.contains("response.output_text.delta"));
    }

    #[test]
    fn sse_decoder_accepts_crlf_and_leftover_frame() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.push_chunk(b"data: {\"a\":1}\r\n\r\ndata: {\"b\":2}");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"a\":1}");
        let tail = decoder.finish().expect("leftover frame");
        assert_eq!(tail.data, "{\"b\":2}");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn maps_text_and_reasoning_events() {
        let cases = [
            (
                serde_json::json!({"type":"response.output_text.delta","delta":"Hi"}),
                OpenAiSignal::Event(GenerationEvent::TextDelta("Hi".into())),
            ),
            (
                serde_json::json!({"type":"response.reasoning_summary_part.added","summary_index":0}),
                OpenAiSignal::Event(GenerationEvent::ReasoningStart),
            ),
            (
                serde_json::json!({"type":"response.reasoning_summary_text.delta","delta":"hmm"}),
                OpenAiSignal::Event(GenerationEvent::ReasoningDelta("hmm".into())),
            ),
            (
                serde_json::json!({"type":"response.reasoning_summary_part.done"}),
                OpenAiSignal::Event(GenerationEvent::ReasoningEnd),
            ),
            (
                serde_json::json!({"type":"response.completed","response":{"status":"completed"}}),
                OpenAiSignal::Completed,
            ),
        ];
        for (value, expected) in cases {
            let signals = map_openai_json(&openai(), &value).expect("map");
            assert_eq!(signals, vec![expected]);
        }
    }

    #[test]
    fn ignores_unknown_and_empty_events() {
        let unknown = serde_json::json!({"type":"response.created"});
        assert!(map_openai_json(&openai(), &unknown).expect("map").is_empty());
        let empty = serde_json::json!({"type":"response.output_text.delta","delta":""});
        assert!(map_openai_json(&openai(), &empty).expect("map").is_empty());
        let done = SseFrame {
            event: None,
            data: "[DONE]".into(),
        };
        assert!(map_openai_frame(&openai(), &done).expect("map").is_empty());
    }

    #[test]
    fn maps_response_failed_to_provider_error() {
        let failed = serde_json::json!({
            "type":"response.failed",
            "response": {"error": { "message": "quota exceeded" }}
        });
        let err = map_openai_json(&openai(), &failed).expect_err("should fail");
        assert!(matches!(err, GenerationError::Provider { ref message, .. } if message == "quota exceeded"));
    }

    #[test]
    fn invalid_json_is_a_protocol_error() {
        let frame = SseFrame {
            event: None,
            data: "{not json".into(),
        };
        let err = map_openai_frame(&openai(), &frame).expect_err("should fail");
        assert!(matches!(err, GenerationError::Protocol { .. }));
    }
}
