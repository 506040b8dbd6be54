//! Line-oriented decoding of streamed generation responses (Ollama NDJSON,
//! OpenAI server-sent events).

use std::ops::ControlFlow;
use tracing::debug;

use super::LlmError;
use crate::streaming::FragmentSink;

/// Outcome of decoding one complete line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Fragment(String),
    Done,
    Skip,
}

/// Accumulates raw body bytes and hands out complete lines.
///
/// Bytes after the last newline stay buffered until more data arrives, so
/// neither lines nor multi-byte characters are split across network reads.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let Some(last_newline) = self.buf.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let complete: Vec<u8> = self.buf.drain(..=last_newline).collect();
        complete
            .split(|b| *b == b'\n')
            .filter_map(decode_line)
            .collect()
    }

    /// Whatever is left once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        decode_line(&rest)
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    (!line.is_empty()).then(|| line.to_string())
}

/// Couples a [`LineBuffer`] with a backend-specific line decoder and forwards
/// fragments to the sink.
pub struct StreamDecoder<F> {
    lines: LineBuffer,
    decode: F,
}

impl<F> StreamDecoder<F>
where
    F: Fn(&str) -> LineEvent,
{
    pub fn new(decode: F) -> Self {
        Self {
            lines: LineBuffer::default(),
            decode,
        }
    }

    /// Breaks on the done marker or when the consumer has gone away.
    pub fn feed(&mut self, chunk: &[u8], sink: &FragmentSink) -> ControlFlow<()> {
        if sink.is_closed() {
            debug!("Stream consumer went away, stopping generation");
            return ControlFlow::Break(());
        }
        for line in self.lines.push(chunk) {
            if self.dispatch(&line, sink).is_break() {
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    pub fn finish(&mut self, sink: &FragmentSink) {
        if let Some(line) = self.lines.finish() {
            let _ = self.dispatch(&line, sink);
        }
    }

    fn dispatch(&self, line: &str, sink: &FragmentSink) -> ControlFlow<()> {
        match (self.decode)(line) {
            LineEvent::Fragment(text) => {
                if !text.is_empty() && !sink.send(text) {
                    debug!("Stream consumer went away, stopping generation");
                    return ControlFlow::Break(());
                }
                ControlFlow::Continue(())
            }
            LineEvent::Done => ControlFlow::Break(()),
            LineEvent::Skip => ControlFlow::Continue(()),
        }
    }
}

/// Reads the response body chunk by chunk and pushes decoded fragments into
/// `sink` until the done marker, the end of the body, or cancellation.
pub async fn pump<F>(
    mut response: reqwest::Response,
    sink: &FragmentSink,
    decode: F,
) -> Result<(), LlmError>
where
    F: Fn(&str) -> LineEvent,
{
    let mut decoder = StreamDecoder::new(decode);

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| LlmError::Connection(format!("stream interrupted: {}", e)))?
    {
        if decoder.feed(&chunk, sink).is_break() {
            return Ok(());
        }
    }

    decoder.finish(sink);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::fragment_channel;
    use futures::StreamExt;

    fn ndjson(line: &str) -> LineEvent {
        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(_) => return LineEvent::Skip,
        };
        if value["done"] == true {
            return LineEvent::Done;
        }
        LineEvent::Fragment(value["response"].as_str().unwrap_or_default().to_string())
    }

    #[test]
    fn partial_lines_wait_for_their_newline() {
        let mut lines = LineBuffer::default();
        assert!(lines.push(b"{\"a\":").is_empty());
        assert_eq!(lines.push(b"1}\n{\"b\""), vec!["{\"a\":1}"]);
        assert_eq!(lines.push(b":2}\r\n\n"), vec!["{\"b\":2}"]);
        assert_eq!(lines.finish(), None);
    }

    #[test]
    fn multibyte_characters_survive_any_split() {
        let body = "{\"response\":\"ação\"}\n".as_bytes();
        for split in 0..body.len() {
            let mut lines = LineBuffer::default();
            let mut out = lines.push(&body[..split]);
            out.extend(lines.push(&body[split..]));
            assert_eq!(out, vec!["{\"response\":\"ação\"}"], "split at {}", split);
        }
    }

    #[test]
    fn unterminated_last_line_is_kept() {
        let mut lines = LineBuffer::default();
        assert!(lines.push(b"data: tail").is_empty());
        assert_eq!(lines.finish().as_deref(), Some("data: tail"));
    }

    #[tokio::test]
    async fn fragments_arrive_once_in_order_and_stop_at_done() {
        let body = concat!(
            "{\"response\":\"The \",\"done\":false}\n",
            "{\"response\":\"cat \",\"done\":false}\n",
            "{\"response\":\"sat.\",\"done\":false}\n",
            "{\"response\":\"\",\"done\":true}\n",
            "{\"response\":\"ignored\",\"done\":false}\n",
        )
        .as_bytes();

        for chunk_size in [1, 3, 7, 64, body.len()] {
            let (sink, stream) = fragment_channel();
            let mut decoder = StreamDecoder::new(ndjson);
            let mut stopped = false;
            for chunk in body.chunks(chunk_size) {
                if decoder.feed(chunk, &sink).is_break() {
                    stopped = true;
                    break;
                }
            }
            assert!(stopped);
            drop(sink);

            let text: Vec<u8> = stream.map(|c| c.unwrap()).collect::<Vec<_>>().await.concat();
            assert_eq!(String::from_utf8(text).unwrap(), "The cat sat.");
        }
    }

    #[test]
    fn closed_consumer_breaks_the_loop() {
        let (sink, stream) = fragment_channel();
        drop(stream);
        let mut decoder = StreamDecoder::new(ndjson);
        assert!(decoder.feed(b"{\"response\":\"x\"}\n", &sink).is_break());
    }

    #[test]
    fn closed_consumer_stops_even_without_fragments() {
        let (sink, stream) = fragment_channel();
        drop(stream);
        let mut decoder = StreamDecoder::new(ndjson);
        assert!(decoder.feed(b"not json\n", &sink).is_break());
    }
}
