use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use eventsource_stream::{EventStream, EventStreamError, Eventsource};
use futures_util::Stream;

use crate::error::{EngineError, EngineResult};
use crate::stream::events::ServerEvent;

/// Decodes a raw byte stream into [`ServerEvent`]s.
///
/// Framing is handled by `eventsource-stream`. Chunk boundaries may fall
/// anywhere, including inside a line or a multi-byte character. A data
/// block holding several `data:` lines yields one event per line, and a
/// final event without its terminating blank line is still delivered.
///
/// Malformed payloads surface as non-fatal framing errors; a failing
/// byte stream surfaces as a transport error.
pub struct EventDecoder<S> {
    inner: EventStream<Aligned<S>>,
    pending: VecDeque<EngineResult<ServerEvent>>,
}

impl<S, E> EventDecoder<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            inner: Aligned::new(stream).eventsource(),
            pending: VecDeque::new(),
        }
    }
}

impl<S, E> Stream for EventDecoder<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    type Item = EngineResult<ServerEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Poll::Ready(Some(item));
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    let decoded = decode_data(&event.data);
                    self.pending.extend(decoded);
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(classify(e)))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

fn decode_data(data: &str) -> Vec<EngineResult<ServerEvent>> {
    data.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ServerEvent::parse)
        .collect()
}

fn classify<E: std::error::Error>(err: EventStreamError<E>) -> EngineError {
    match err {
        EventStreamError::Transport(e) => {
            EngineError::transport(format!("Stream interrupted: {e}"))
        }
        other => EngineError::framing(format!("Malformed stream data: {other}")),
    }
}

/// Byte stream adapter that only releases whole UTF-8 characters and
/// appends a blank line once the source ends.
struct Aligned<S> {
    inner: S,
    carry: Vec<u8>,
    finished: bool,
}

impl<S> Aligned<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            carry: Vec::new(),
            finished: false,
        }
    }
}

impl<S, E> Stream for Aligned<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let this = &mut *self;
                    this.carry.extend_from_slice(&chunk);
                    let cut = char_boundary(&this.carry);
                    if cut == 0 {
                        continue;
                    }
                    let rest = this.carry.split_off(cut);
                    let ready = std::mem::replace(&mut this.carry, rest);
                    return Poll::Ready(Some(Ok(Bytes::from(ready))));
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    let this = &mut *self;
                    this.finished = true;
                    let mut tail = std::mem::take(&mut this.carry);
                    tail.extend_from_slice(b"\n\n");
                    return Poll::Ready(Some(Ok(Bytes::from(tail))));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Length of the longest prefix that does not end inside a character.
/// Invalid sequences are passed through whole so the parser reports them.
fn char_boundary(buf: &[u8]) -> usize {
    match std::str::from_utf8(buf) {
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        _ => buf.len(),
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use futures_util::stream;

    use super::*;
    use crate::error::ErrorKind;

    fn byte_stream(
        chunks: Vec<Vec<u8>>,
    ) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Unpin {
        stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))))
    }

    async fn decode(chunks: Vec<Vec<u8>>) -> Vec<EngineResult<ServerEvent>> {
        EventDecoder::new(byte_stream(chunks)).collect().await
    }

    const PAYLOAD: &str = concat!(
        "data: {\"type\":\"agent_start\",\"agent\":\"analyzer\",\"agent_info\":{\"name\":\"Analyzer\",\"description\":\"d\",\"avatar\":\"🔍\",\"color\":\"#1890ff\"}}\n\n",
        "data: {\"type\":\"chunk\",\"agent\":\"analyzer\",\"content\":\"分析结果 ✓\"}\n\n",
        "data: {\"type\":\"agent_end\",\"agent\":\"analyzer\"}\n\n",
        "data: {\"type\":\"complete\",\"message\":\"done\"}\n\n",
    );

    #[tokio::test]
    async fn test_decodes_events_in_order() {
        let events = decode(vec![PAYLOAD.as_bytes().to_vec()]).await;
        let kinds: Vec<_> = events.iter().map(|e| e.as_ref().unwrap().kind()).collect();
        assert_eq!(kinds, ["agent_start", "chunk", "agent_end", "complete"]);
    }

    #[tokio::test]
    async fn test_split_at_any_offset_decodes_identically() {
        let bytes = PAYLOAD.as_bytes();
        let expected = decode(vec![bytes.to_vec()]).await;

        for offset in 0..=bytes.len() {
            let (head, tail) = bytes.split_at(offset);
            let events = decode(vec![head.to_vec(), tail.to_vec()]).await;
            assert_eq!(events, expected, "split at byte {offset}");
        }
    }

    #[tokio::test]
    async fn test_small_chunks() {
        let chunks = PAYLOAD.as_bytes().chunks(7).map(<[u8]>::to_vec).collect();
        let events = decode(chunks).await;
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped() {
        let body = concat!(
            "data: {\"type\":\"chunk\",\"content\":\"a\"}\n\n",
            "data: {broken\n\n",
            "data: {\"type\":\"chunk\",\"content\":\"b\"}\n\n",
        );
        let events = decode(vec![body.as_bytes().to_vec()]).await;

        assert_eq!(events.len(), 3);
        assert!(events[0].is_ok());
        assert_eq!(events[1].as_ref().unwrap_err().kind, ErrorKind::Framing);
        assert_eq!(
            events[2].as_ref().unwrap(),
            &ServerEvent::Chunk {
                agent: None,
                content: "b".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unterminated_final_event_is_flushed() {
        let body = "data: {\"type\":\"chunk\",\"content\":\"a\"}\n\ndata: {\"type\":\"complete\"}";
        let events = decode(vec![body.as_bytes().to_vec()]).await;
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1].as_ref().unwrap(),
            &ServerEvent::Complete { message: None }
        );
    }

    #[tokio::test]
    async fn test_consecutive_data_lines_without_blank_separator() {
        let body = "data: {\"type\":\"chunk\",\"content\":\"a\"}\ndata: {\"type\":\"chunk\",\"content\":\"b\"}\n\n";
        let events = decode(vec![body.as_bytes().to_vec()]).await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn test_comments_and_blank_lines_ignored() {
        let body = ": keep-alive\n\n\n\ndata: {\"type\":\"complete\"}\n\n";
        let events = decode(vec![body.as_bytes().to_vec()]).await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_is_fatal() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: {\"type\":\"chunk\",\"content\":\"a\"}\n\n")),
            Err(std::io::Error::other("connection reset")),
        ];
        let events: Vec<_> = EventDecoder::new(stream::iter(chunks)).collect().await;

        assert!(events[0].is_ok());
        let err = events[1].as_ref().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transport);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_char_boundary_holds_back_partial_character() {
        let text = "ab✓".as_bytes();
        assert_eq!(char_boundary(&text[..3]), 2);
        assert_eq!(char_boundary(text), text.len());
    }
}
