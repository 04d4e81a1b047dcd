use serde::Deserialize;

use parley_core::errors::AgentError;
use parley_core::fragments::{AgentFragment, TraceFragment};

/// Split raw SSE text into `(event, data)` pairs. Multi-line `data:` fields
/// are joined with `\n`; comment lines are skipped. A frame without an
/// `event:` line is reported as `message`.
pub fn parse_sse_lines(raw: &str) -> Vec<(String, String)> {
    let mut frames = Vec::new();
    let mut event = String::new();
    let mut data: Vec<&str> = Vec::new();

    for line in raw.lines() {
        if line.is_empty() {
            flush_frame(&mut frames, &mut event, &mut data);
        } else if line.starts_with(':') {
            continue;
        } else if let Some(rest) = line.strip_prefix("event:") {
            event = rest.trim_start().to_owned();
        } else if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    flush_frame(&mut frames, &mut event, &mut data);

    frames
}

fn flush_frame(frames: &mut Vec<(String, String)>, event: &mut String, data: &mut Vec<&str>) {
    if event.is_empty() && data.is_empty() {
        return;
    }
    let name = if event.is_empty() {
        "message".to_owned()
    } else {
        std::mem::take(event)
    };
    frames.push((name, data.join("\n")));
    data.clear();
}

#[derive(Deserialize)]
struct ChunkPayload {
    text: String,
}

#[derive(Deserialize)]
struct ErrorPayload {
    message: String,
}

/// Decode one gateway frame. `chunk` and `trace` become fragments, `error`
/// becomes a mid-stream failure, anything else (keep-alives, `done`) is
/// ignored.
pub fn decode_frame(event: &str, data: &str) -> Option<Result<AgentFragment, AgentError>> {
    match event {
        "chunk" => Some(
            serde_json::from_str::<ChunkPayload>(data)
                .map(|c| AgentFragment::Chunk(c.text))
                .map_err(|e| AgentError::StreamInterrupted(format!("malformed chunk: {e}"))),
        ),
        "trace" => Some(
            serde_json::from_str::<TraceFragment>(data)
                .map(AgentFragment::Trace)
                .map_err(|e| AgentError::StreamInterrupted(format!("malformed trace: {e}"))),
        ),
        "error" => {
            let message = serde_json::from_str::<ErrorPayload>(data)
                .map(|p| p.message)
                .unwrap_or_else(|_| data.to_owned());
            Some(Err(AgentError::Failure(message)))
        }
        _ => None,
    }
}
