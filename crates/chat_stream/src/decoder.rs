//! Lazy byte-stream → event decoder.

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::error::DecodeError;
use crate::event::{parse_record, StreamEvent};
use crate::framing::{Format, FrameBuffer, Framing, LineEndings};
use crate::transform::StreamTransform;

/// Single-pass decoder over a pull-based byte source.
///
/// Yields `Ok(event)` per record. Record-level failures (bad UTF-8, bad JSON
/// line) are yielded as `Err` and decoding continues; a transform or source
/// failure is yielded once and ends the stream.
pub struct StreamDecoder<S> {
    source: S,
    framing: Framing,
    frames: FrameBuffer,
    line_endings: Option<LineEndings>,
    transform: Option<Box<dyn StreamTransform>>,
    ready: VecDeque<Result<StreamEvent, DecodeError>>,
    finished: bool,
}

impl<S, E> StreamDecoder<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    pub fn new(source: S, framing: Framing) -> Self {
        let frames = FrameBuffer::new(&framing.record_separator);
        // SSE allows CRLF, LF or CR line endings.
        let line_endings = (framing.format == Format::Sse).then(LineEndings::new);
        Self {
            source,
            framing,
            frames,
            line_endings,
            transform: None,
            ready: VecDeque::new(),
            finished: false,
        }
    }

    pub fn with_transform(mut self, transform: Box<dyn StreamTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn framing(&self) -> &Framing {
        &self.framing
    }

    fn fail(&mut self, err: DecodeError) {
        self.ready.push_back(Err(err));
        self.finished = true;
    }

    fn ingest(&mut self, chunk: Bytes) {
        let chunk = match self.transform.as_mut() {
            Some(transform) => match transform.transform(chunk) {
                Ok(chunk) => chunk,
                Err(err) => return self.fail(err),
            },
            None => chunk,
        };
        let chunk = match self.line_endings.as_mut() {
            Some(endings) => endings.normalize(chunk),
            None => chunk,
        };

        self.frames.push(&chunk);
        while let Some(record) = self.frames.next_record() {
            if let Some(item) = parse_record(&self.framing, &record) {
                self.ready.push_back(item);
            }
        }
    }

    fn end(&mut self) {
        if let Some(transform) = self.transform.as_mut() {
            match transform.finish() {
                Ok(tail) if !tail.is_empty() => {
                    self.transform = None;
                    self.ingest(tail);
                    if self.finished {
                        return;
                    }
                }
                Ok(_) => {}
                Err(err) => return self.fail(err),
            }
        }

        if let Some(record) = self.frames.finish() {
            if let Some(item) = parse_record(&self.framing, &record) {
                self.ready.push_back(item);
            }
        }
        self.finished = true;
    }
}

impl<S, E> Stream for StreamDecoder<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    type Item = Result<StreamEvent, DecodeError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(item) = this.ready.pop_front() {
                return Poll::Ready(Some(item));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            match this.source.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(chunk))) => this.ingest(chunk),
                Poll::Ready(Some(Err(err))) => this.fail(DecodeError::Source(err.to_string())),
                Poll::Ready(None) => this.end(),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
