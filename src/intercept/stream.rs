//! Incremental drain of streamed response bodies.
//!
//! Event-stream bodies are read chunk by chunk from the CDP body stream and
//! reassembled line-wise; the page may hold an exclusive read lock on its
//! own copy, so wholesale buffering on the page side is not an option.

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use chromiumoxide::cdp::browser_protocol::io;
use chromiumoxide::Page;

use crate::error::{WireError, WireResult};

/// Line-oriented reassembly of an incrementally transferred body.
///
/// Blank lines are skipped; the `data: [DONE]` marker ends the stream. The
/// aggregate is the JSON array of the content-carrying lines.
#[derive(Default)]
pub struct LineAssembler {
    buffer: String,
    lines: Vec<String>,
    done: bool,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, chunk: &str) {
        if self.done {
            return;
        }
        self.buffer.push_str(chunk);
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                continue;
            }
            if line == "data: [DONE]" {
                self.done = true;
                self.buffer.clear();
                return;
            }
            self.lines.push(line.to_string());
        }
    }

    /// Finish the stream and return the aggregate as a JSON string.
    pub fn finish(mut self) -> String {
        if !self.done && !self.buffer.trim().is_empty() {
            let tail = std::mem::take(&mut self.buffer);
            let tail = tail.trim_end_matches(['\n', '\r']);
            if tail != "data: [DONE]" {
                self.lines.push(tail.to_string());
            }
        }
        serde_json::to_string(&self.lines).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Drain a CDP body stream to completion.
///
/// Returns the raw bytes (for handing the body back to the page) and the
/// reassembled line aggregate.
pub async fn drain_body_stream(
    page: &Page,
    handle: io::StreamHandle,
) -> WireResult<(Vec<u8>, String)> {
    let mut raw = Vec::new();
    let mut assembler = LineAssembler::new();

    loop {
        let params = io::ReadParams::builder()
            .handle(handle.clone())
            .size(64 * 1024)
            .build()
            .map_err(WireError::Browser)?;
        let resp = page.execute(params).await.map_err(WireError::browser)?;

        let chunk: Vec<u8> = if resp.result.base64_encoded.unwrap_or(false) {
            BASE64_STANDARD
                .decode(resp.result.data.as_bytes())
                .map_err(WireError::browser)?
        } else {
            resp.result.data.clone().into_bytes()
        };
        assembler.push_chunk(&String::from_utf8_lossy(&chunk));
        raw.extend_from_slice(&chunk);

        if resp.result.eof {
            break;
        }
    }

    let _ = page
        .execute(io::CloseParams::new(handle))
        .await
        .map_err(WireError::browser);

    Ok((raw, assembler.finish()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_complete_lines_across_chunks() {
        let mut a = LineAssembler::new();
        a.push_chunk("data: {\"tok\":");
        a.push_chunk("\"hi\"}\ndata: {\"tok\":\"there\"}\n");
        let out = a.finish();
        let lines: Vec<String> = serde_json::from_str(&out).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "data: {\"tok\":\"hi\"}");
    }

    #[test]
    fn sentinel_terminates_the_stream() {
        let mut a = LineAssembler::new();
        a.push_chunk("data: one\ndata: [DONE]\ndata: after\n");
        let lines: Vec<String> = serde_json::from_str(&a.finish()).unwrap();
        assert_eq!(lines, vec!["data: one"]);
    }

    #[test]
    fn blank_lines_are_dropped() {
        let mut a = LineAssembler::new();
        a.push_chunk("\n\ndata: x\n\n");
        let lines: Vec<String> = serde_json::from_str(&a.finish()).unwrap();
        assert_eq!(lines, vec!["data: x"]);
    }

    #[test]
    fn unterminated_tail_is_kept() {
        let mut a = LineAssembler::new();
        a.push_chunk("data: partial");
        let lines: Vec<String> = serde_json::from_str(&a.finish()).unwrap();
        assert_eq!(lines, vec!["data: partial"]);
    }
}
