//! Server-sent event frames in the OpenAI `chat.completion.chunk` format.
//!
//! A finished answer becomes this frame sequence:
//!
//! | Frame | `delta` | `finish_reason` |
//! |-------|---------|-----------------|
//! | initial | `{"role":"assistant","content":""}` | `null` |
//! | content × N | `{"content":"<slice>"}` | `null` |
//! | final | `{}` plus `cited_urls` (when any) and `isRag` (when known) | `"stop"` |
//! | terminal | literal `data: [DONE]` | |
//!
//! Content is sliced on a UTF-8 byte budget. The splitter accumulates
//! whole characters and flushes before the next character would push the
//! slice over budget, so a multi-byte character is never cut. A character
//! wider than the budget is an error rather than a silent truncation.
//!
//! [`Frames`] yields frames lazily so they can be written to the socket as
//! they are produced; [`Frames::recovering`] turns a mid-stream failure
//! into an error frame followed by the terminal frame.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

pub const DEFAULT_CHUNK_BYTES: usize = 1024;

pub const DONE_FRAME: &str = "data: [DONE]\n\n";

#[derive(Debug, Error)]
pub enum SseError {
    #[error("chunk byte budget must be greater than zero")]
    ZeroBudget,

    #[error("a {ch_len}-byte character does not fit in a {budget}-byte frame")]
    CharWiderThanBudget { ch_len: usize, budget: usize },

    #[error("failed to encode frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Identity fields repeated on every frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMeta {
    pub id: String,
    pub model: String,
    /// Unix seconds; the current time when absent.
    pub created: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamOptions {
    pub include_done_message: bool,
    pub cited_urls: Vec<String>,
    pub is_rag: Option<bool>,
    pub chunk_bytes: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            include_done_message: true,
            cited_urls: Vec::new(),
            is_rag: None,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
        }
    }
}

#[derive(Serialize)]
struct ChunkPayload<'a> {
    id: &'a str,
    object: &'static str,
    created: i64,
    model: &'a str,
    choices: [ChoicePayload<'a>; 1],
}

#[derive(Serialize)]
struct ChoicePayload<'a> {
    index: u32,
    delta: Delta<'a>,
    finish_reason: Option<&'static str>,
}

#[derive(Serialize, Default)]
struct Delta<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cited_urls: Option<&'a [String]>,
    #[serde(rename = "isRag", skip_serializing_if = "Option::is_none")]
    is_rag: Option<bool>,
}

/// Encodes individual frames for one response.
#[derive(Debug, Clone)]
pub struct StreamEncoder {
    id: String,
    model: String,
    created: i64,
}

impl StreamEncoder {
    pub fn new(meta: StreamMeta) -> Self {
        Self {
            id: meta.id,
            model: meta.model,
            created: meta.created.unwrap_or_else(|| Utc::now().timestamp()),
        }
    }

    fn frame(&self, delta: Delta<'_>, finish_reason: Option<&'static str>) -> Result<String, SseError> {
        let payload = ChunkPayload {
            id: &self.id,
            object: "chat.completion.chunk",
            created: self.created,
            model: &self.model,
            choices: [ChoicePayload {
                index: 0,
                delta,
                finish_reason,
            }],
        };
        Ok(format!("data: {}\n\n", serde_json::to_string(&payload)?))
    }

    pub fn initial_frame(&self) -> Result<String, SseError> {
        self.frame(
            Delta {
                role: Some("assistant"),
                content: Some(""),
                ..Delta::default()
            },
            None,
        )
    }

    pub fn content_frame(&self, text: &str) -> Result<String, SseError> {
        self.frame(
            Delta {
                content: Some(text),
                ..Delta::default()
            },
            None,
        )
    }

    pub fn final_frame(&self, cited_urls: &[String], is_rag: Option<bool>) -> Result<String, SseError> {
        self.frame(
            Delta {
                cited_urls: (!cited_urls.is_empty()).then_some(cited_urls),
                is_rag,
                ..Delta::default()
            },
            Some("stop"),
        )
    }

    /// `data: {"error":{...}}` frame for failures after headers were sent.
    pub fn error_frame(&self, code: &str, message: &str) -> String {
        let body = json!({
            "error": {
                "code": code,
                "message": message,
                "id": self.id,
            }
        });
        format!("data: {}\n\n", body)
    }

    /// Lazily encode `content` as a full frame sequence.
    pub fn frames(&self, content: impl Into<String>, options: StreamOptions) -> Result<Frames, SseError> {
        if options.chunk_bytes == 0 {
            return Err(SseError::ZeroBudget);
        }
        Ok(Frames {
            encoder: self.clone(),
            content: content.into(),
            offset: 0,
            options,
            stage: Stage::Initial,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Initial,
    Content,
    Final,
    Done,
    Finished,
}

/// Iterator over the frames of one answer. Stops after the first error.
#[derive(Debug)]
pub struct Frames {
    encoder: StreamEncoder,
    content: String,
    offset: usize,
    options: StreamOptions,
    stage: Stage,
}

impl Frames {
    /// Convert the first error into an error frame plus the terminal frame.
    pub fn recovering(self) -> RecoveringFrames {
        RecoveringFrames {
            include_done: self.options.include_done_message,
            encoder: self.encoder.clone(),
            inner: self,
            pending_done: false,
            finished: false,
        }
    }

    fn advance(&mut self) -> Option<Result<String, SseError>> {
        loop {
            match self.stage {
                Stage::Initial => {
                    self.stage = Stage::Content;
                    return Some(self.encoder.initial_frame());
                }
                Stage::Content => {
                    if self.offset >= self.content.len() {
                        self.stage = Stage::Final;
                        continue;
                    }
                    let end = match piece_end(&self.content, self.offset, self.options.chunk_bytes) {
                        Ok(end) => end,
                        Err(e) => return Some(Err(e)),
                    };
                    let frame = self.encoder.content_frame(&self.content[self.offset..end]);
                    self.offset = end;
                    return Some(frame);
                }
                Stage::Final => {
                    self.stage = if self.options.include_done_message {
                        Stage::Done
                    } else {
                        Stage::Finished
                    };
                    return Some(
                        self.encoder
                            .final_frame(&self.options.cited_urls, self.options.is_rag),
                    );
                }
                Stage::Done => {
                    self.stage = Stage::Finished;
                    return Some(Ok(DONE_FRAME.to_string()));
                }
                Stage::Finished => return None,
            }
        }
    }
}

impl Iterator for Frames {
    type Item = Result<String, SseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.advance();
        if matches!(item, Some(Err(_))) {
            self.stage = Stage::Finished;
        }
        item
    }
}

/// Infallible view of [`Frames`] for writing straight to a response body.
#[derive(Debug)]
pub struct RecoveringFrames {
    inner: Frames,
    encoder: StreamEncoder,
    include_done: bool,
    pending_done: bool,
    finished: bool,
}

impl Iterator for RecoveringFrames {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.pending_done {
            self.pending_done = false;
            self.finished = true;
            return Some(DONE_FRAME.to_string());
        }
        if self.finished {
            return None;
        }
        match self.inner.next()? {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::error!(id = %self.encoder.id, error = %e, "stream encoding failed");
                self.pending_done = self.include_done;
                self.finished = true;
                Some(self.encoder.error_frame("stream_error", "failed to encode response stream"))
            }
        }
    }
}

/// End offset of the slice starting at `start` that fits in `budget` bytes.
fn piece_end(text: &str, start: usize, budget: usize) -> Result<usize, SseError> {
    let mut used = 0usize;
    for ch in text[start..].chars() {
        let ch_len = ch.len_utf8();
        if used + ch_len > budget {
            if used == 0 {
                return Err(SseError::CharWiderThanBudget { ch_len, budget });
            }
            break;
        }
        used += ch_len;
    }
    Ok(start + used)
}

/// Split `text` into slices of at most `budget` bytes on character boundaries.
pub fn split_by_bytes(text: &str, budget: usize) -> Result<Vec<&str>, SseError> {
    if budget == 0 {
        return Err(SseError::ZeroBudget);
    }
    let mut pieces = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let end = piece_end(text, start, budget)?;
        pieces.push(&text[start..end]);
        start = end;
    }
    Ok(pieces)
}

/// Encode a finished answer as its complete frame sequence.
pub fn generate_from_text(
    content: &str,
    meta: StreamMeta,
    options: StreamOptions,
) -> Result<Vec<String>, SseError> {
    StreamEncoder::new(meta).frames(content, options)?.collect()
}
