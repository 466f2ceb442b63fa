//! Server-sent events decoding for streamed completions.

use futures_util::StreamExt;
use tl_domain::error::Result;
use tl_domain::stream::{BoxStream, StreamEvent};

use crate::util::from_reqwest;

/// Incremental decoder: feed raw body bytes, get back the `data:` payload
/// of every event block completed so far. Other fields (`event:`, `id:`,
/// `retry:`, comments) are dropped.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    /// Raw bytes of the block still being received. Kept undecoded so a
    /// character split across network chunks survives.
    pending: Vec<u8>,
}

impl SseDecoder {
    pub(crate) fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(end) = block_end(&self.pending) {
            let block: Vec<u8> = self.pending.drain(..end).collect();
            payloads.extend(data_of(&String::from_utf8_lossy(&block)));
        }
        payloads
    }

    /// Payload of a trailing block the server never terminated.
    pub(crate) fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        data_of(&String::from_utf8_lossy(&rest))
    }
}

/// End (exclusive, delimiter included) of the first complete block.
fn block_end(buf: &[u8]) -> Option<usize> {
    let lf = find(buf, b"\n\n").map(|i| i + 2);
    let crlf = find(buf, b"\r\n\r\n").map(|i| i + 4);
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Join the `data:` lines of one block. `None` for blocks without data.
fn data_of(block: &str) -> Option<String> {
    let lines: Vec<&str> = block
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty())
        .collect();
    (!lines.is_empty()).then(|| lines.join("\n"))
}

/// Turn an SSE response into provider events using `parse`, which sees each
/// payload in order and may keep state between calls.
///
/// A body that ends without the parser ever producing `Done` still ends
/// with one, so consumers can rely on it.
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    mut parse: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut body = Box::pin(response.bytes_stream());
        let mut decoder = SseDecoder::default();
        let mut saw_done = false;

        loop {
            let payloads = match body.next().await {
                Some(Ok(bytes)) => decoder.feed(&bytes),
                Some(Err(e)) => {
                    yield Err(from_reqwest(e));
                    break;
                }
                None => {
                    let tail = decoder.finish().into_iter().collect::<Vec<_>>();
                    for payload in tail {
                        for event in parse(&payload) {
                            saw_done |= matches!(event, Ok(StreamEvent::Done { .. }));
                            yield event;
                        }
                    }
                    break;
                }
            };
            for payload in payloads {
                for event in parse(&payload) {
                    saw_done |= matches!(event, Ok(StreamEvent::Done { .. }));
                    yield event;
                }
            }
        }

        if !saw_done {
            yield Ok(StreamEvent::Done { usage: None, finish_reason: Some("stop".into()) });
        }
    })
}
