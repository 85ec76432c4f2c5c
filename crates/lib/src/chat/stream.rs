//! Chat stream decoding.
//!
//! The response body is newline-delimited text. Only lines starting with `data: ` carry a
//! payload: either a JSON [`ChatEvent`] or the `[DONE]` sentinel. Bytes are buffered across
//! reads so an event split between two chunks is reassembled before parsing.

use super::protocol::{AnswerContent, ChatEvent};
use crate::api::endpoints::{self, RunId};
use crate::api::{ApiClient, ApiError, ApiRequest};
use futures_util::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// Decoded chat events. Ends after `[DONE]` or when the body ends; an `Err` item is terminal.
pub type ChatEvents = Pin<Box<dyn Stream<Item = Result<ChatEvent, ApiError>> + Send>>;

/// Splits a byte stream into lines, keeping an unterminated tail until the next read.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed (without `\n` / `\r\n`).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(i) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=i).collect();
            lines.push(to_line(&line[..i]));
        }
        lines
    }

    /// Flush the unterminated tail at end of input.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(to_line(&rest))
    }
}

fn to_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Event(ChatEvent),
    Done,
}

/// Classify one line. Non-data lines and malformed payloads yield None; the latter are logged.
pub fn decode_line(line: &str) -> Option<StreamFrame> {
    let data = line.strip_prefix(DATA_PREFIX)?;
    if data == DONE_SENTINEL {
        return Some(StreamFrame::Done);
    }
    match serde_json::from_str::<ChatEvent>(data) {
        Ok(event) => Some(StreamFrame::Event(event)),
        Err(e) => {
            log::warn!("skipping malformed chat stream event: {} (payload: {})", e, data);
            None
        }
    }
}

struct EventReader<S> {
    body: Pin<Box<S>>,
    decoder: LineDecoder,
    ready: VecDeque<ChatEvent>,
    finished: bool,
}

impl<S> EventReader<S> {
    fn accept(&mut self, lines: Vec<String>) {
        for line in lines {
            match decode_line(&line) {
                Some(StreamFrame::Event(event)) => self.ready.push_back(event),
                Some(StreamFrame::Done) => {
                    self.finished = true;
                    return;
                }
                None => {}
            }
        }
    }
}

impl<S> Drop for EventReader<S> {
    fn drop(&mut self) {
        log::debug!("chat stream released");
    }
}

/// Turn a raw body into decoded events. The body is dropped as soon as the returned stream is.
pub fn decode_events<S, B, E>(body: S) -> ChatEvents
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    let reader = EventReader {
        body: Box::pin(body),
        decoder: LineDecoder::new(),
        ready: VecDeque::new(),
        finished: false,
    };
    stream::unfold(reader, |mut r| async move {
        loop {
            if let Some(event) = r.ready.pop_front() {
                return Some((Ok(event), r));
            }
            if r.finished {
                return None;
            }
            match r.body.next().await {
                Some(Ok(chunk)) => {
                    let lines = r.decoder.push(chunk.as_ref());
                    r.accept(lines);
                }
                Some(Err(e)) => {
                    r.finished = true;
                    return Some((Err(e.into()), r));
                }
                None => {
                    let tail: Vec<String> = r.decoder.finish().into_iter().collect();
                    r.accept(tail);
                    r.finished = true;
                }
            }
        }
    })
    .boxed()
}

/// POST /runs/{id}/chat/stream/ and decode the body.
pub async fn open_chat_stream(client: &ApiClient, run_id: RunId, question: &str) -> Result<ChatEvents, ApiError> {
    let req = ApiRequest::post(endpoints::chat_stream(run_id))
        .json(serde_json::json!({ "question": question }));
    let res = client.request_stream(&req).await?;
    log::debug!("chat stream opened for run {}", run_id);
    Ok(decode_events(res.bytes_stream()))
}

/// Receivers for [`stream_chat`]. Every method defaults to a no-op.
pub trait StreamCallbacks: Send {
    fn on_status(&mut self, _step: &str, _message: &str) {}
    fn on_answer(&mut self, _content: &AnswerContent) {}
    fn on_error(&mut self, _message: &str) {}
    fn on_message_id(&mut self, _id: i64) {}
    /// Fires after `[DONE]` or at end of body; not after a transport error.
    fn on_complete(&mut self) {}
}

/// Ask a question and feed each decoded event to `callbacks`, in order.
pub async fn stream_chat(
    client: &ApiClient,
    run_id: RunId,
    question: &str,
    callbacks: &mut dyn StreamCallbacks,
) -> Result<(), ApiError> {
    let events = open_chat_stream(client, run_id, question).await?;
    dispatch_events(events, callbacks).await
}

/// Drain `events` into `callbacks`.
pub async fn dispatch_events(mut events: ChatEvents, callbacks: &mut dyn StreamCallbacks) -> Result<(), ApiError> {
    while let Some(event) = events.next().await {
        match event? {
            ChatEvent::Status { step, message } => callbacks.on_status(&step, &message),
            ChatEvent::Answer { content } => callbacks.on_answer(&content),
            ChatEvent::Error { message } => callbacks.on_error(&message),
            ChatEvent::MessageId { id } => callbacks.on_message_id(id),
        }
    }
    callbacks.on_complete();
    Ok(())
}
