//! Server-sent-events transport
//!
//! Posts the payload to the comparison endpoint and decodes the
//! `text/event-stream` body into stream messages.

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::core::config::TransportConfig;
use crate::core::errors::{CompareError, Result};
use crate::transport::channel::RunChannel;
use crate::transport::protocol::{decode_frame, ComparisonPayload, StreamMessage};
use crate::transport::ComparisonTransport;

/// Incremental `text/event-stream` decoder.
///
/// Lines end with `\n`, `\r\n` or a lone `\r`. A `\r\n` pair split across two
/// chunks still counts as one terminator.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    // Bytes of `buffer` already checked for a terminator.
    scanned: usize,
    // The last terminator was `\r`; a `\n` right after it belongs to it.
    skip_lf: bool,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every event completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<StreamMessage>> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();
        let mut start = 0;
        let mut i = self.scanned;
        while i < self.buffer.len() {
            let byte = self.buffer[i];
            if std::mem::take(&mut self.skip_lf) && byte == b'\n' {
                start = i + 1;
                i += 1;
                continue;
            }
            if byte == b'\n' || byte == b'\r' {
                let line = String::from_utf8(self.buffer[start..i].to_vec());
                self.skip_lf = byte == b'\r';
                self.accept_line(line, &mut out);
                start = i + 1;
            }
            i += 1;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        out
    }

    /// Flush whatever is pending once the body has ended
    pub fn finish(&mut self) -> Vec<Result<StreamMessage>> {
        let mut out = Vec::new();
        self.skip_lf = false;
        self.scanned = 0;
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.accept_line(String::from_utf8(rest), &mut out);
        }
        self.dispatch(&mut out);
        out
    }

    fn accept_line(
        &mut self,
        line: std::result::Result<String, std::string::FromUtf8Error>,
        out: &mut Vec<Result<StreamMessage>>,
    ) {
        match line {
            Ok(line) => self.process_line(&line, out),
            Err(_) => out.push(Err(CompareError::protocol("event stream is not valid UTF-8"))),
        }
    }

    fn process_line(&mut self, line: &str, out: &mut Vec<Result<StreamMessage>>) {
        if line.is_empty() {
            self.dispatch(out);
            return;
        }
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            // event/id/retry carry nothing the comparison protocol uses
            _ => debug!(field, "Ignoring event stream field"),
        }
    }

    fn dispatch(&mut self, out: &mut Vec<Result<StreamMessage>>) {
        if self.data.is_empty() {
            return;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        out.push(decode_frame(&payload));
    }
}

/// Decode a raw event-stream body into messages
pub fn decode_event_stream<S, B, E>(body: S) -> impl Stream<Item = Result<StreamMessage>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Unpin + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    struct State<S> {
        body: S,
        decoder: SseDecoder,
        pending: VecDeque<Result<StreamMessage>>,
        finished: bool,
    }

    let state = State {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => {
                    let decoded = st.decoder.push(chunk.as_ref());
                    st.pending.extend(decoded);
                }
                Some(Err(e)) => {
                    st.finished = true;
                    st.pending
                        .push_back(Err(CompareError::transport_with_source("stream", e)));
                }
                None => {
                    st.finished = true;
                    let decoded = st.decoder.finish();
                    st.pending.extend(decoded);
                }
            }
        }
    })
}

/// Transport posting to an HTTP endpoint that answers with server-sent events
#[derive(Clone)]
pub struct SseTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl SseTransport {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(CompareError::configuration_field(
                "endpoint cannot be empty",
                "transport.endpoint",
            ));
        }
        Ok(Self { client, endpoint })
    }

    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        let endpoint = config.endpoint.clone().ok_or_else(|| {
            CompareError::configuration_field("SSE transport needs an endpoint", "transport.endpoint")
        })?;
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.connect_timeout() {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| CompareError::transport_with_source("build client", e))?;
        Self::with_client(client, endpoint)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ComparisonTransport for SseTransport {
    async fn open(&self, payload: &ComparisonPayload) -> Result<RunChannel> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, "text/event-stream")
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                CompareError::transport_with_source("open", e).with_context("endpoint", self.endpoint.clone())
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CompareError::transport("open", format!("endpoint returned {}", status))
                .with_context("endpoint", self.endpoint.clone()));
        }
        if let Some(content_type) = response.headers().get(CONTENT_TYPE) {
            let content_type = content_type.to_str().unwrap_or_default();
            if !content_type.starts_with("text/event-stream") {
                debug!(content_type, "Endpoint did not declare an event stream");
            }
        }

        info!(endpoint = %self.endpoint, "Comparison stream opened");
        let body = Box::pin(response.bytes_stream());
        Ok(RunChannel::new(decode_event_stream(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use pretty_assertions::assert_eq;

    fn ok_messages(items: Vec<Result<StreamMessage>>) -> Vec<StreamMessage> {
        items.into_iter().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_decoder_handles_split_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder
            .push(b"data: {\"question_index\":0,\"version_id\":\"vA\",")
            .is_empty());
        let out = decoder.push(b"\"answer\":\"4\"}\r\n\r\n: keep-alive\n\ndata: {\"type\":\"end\"}\n\n");
        assert_eq!(
            ok_messages(out),
            vec![StreamMessage::answer(0, "vA", "4"), StreamMessage::End]
        );
    }

    #[test]
    fn test_decoder_joins_multiline_data() {
        let mut decoder = SseDecoder::new();
        let out = decoder.push(b"event: message\ndata: {\"type\":\ndata: \"end\"}\n\n");
        assert_eq!(ok_messages(out), vec![StreamMessage::End]);
    }

    #[test]
    fn test_decoder_accepts_lone_carriage_returns() {
        let mut decoder = SseDecoder::new();
        let out = decoder.push(b"data: {\"question_index\":1,\"version_id\":\"vB\",\"answer\":\"x\"}\r\rdata: {\"type\":\"end\"}\r\r");
        assert_eq!(
            ok_messages(out),
            vec![StreamMessage::answer(1, "vB", "x"), StreamMessage::End]
        );
    }

    #[test]
    fn test_decoder_keeps_crlf_split_across_chunks_as_one_terminator() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"type\":\r").is_empty());
        // A second blank line here would dispatch the half frame on its own.
        let out = decoder.push(b"\ndata: \"end\"}\r\n\r\n");
        assert_eq!(ok_messages(out), vec![StreamMessage::End]);
    }

    #[test]
    fn test_decoder_handles_many_lines_in_one_chunk() {
        let mut body = Vec::new();
        for i in 0..500 {
            body.extend_from_slice(
                format!("data: {{\"question_index\":{},\"version_id\":\"v\",\"answer\":\"a\"}}\n\n", i)
                    .as_bytes(),
            );
        }
        let mut decoder = SseDecoder::new();
        let out = ok_messages(decoder.push(&body));
        assert_eq!(out.len(), 500);
        assert_eq!(out[499], StreamMessage::answer(499, "v", "a"));
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_decoder_flushes_on_finish() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"type\":\"end\"}").is_empty());
        assert_eq!(ok_messages(decoder.finish()), vec![StreamMessage::End]);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_decoder_keeps_multibyte_characters_across_chunks() {
        let frame = "data: {\"question_index\":0,\"version_id\":\"v\",\"answer\":\"héllo\"}\n\n";
        let bytes = frame.as_bytes();
        let split = frame.find('é').unwrap() + 1; // inside the two-byte sequence
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&bytes[..split]).is_empty());
        assert_eq!(
            ok_messages(decoder.push(&bytes[split..])),
            vec![StreamMessage::answer(0, "v", "héllo")]
        );
    }

    #[tokio::test]
    async fn test_decode_event_stream_reports_body_errors() {
        let chunks: Vec<std::result::Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"data: {\"question_index\":0,\"version_id\":\"v\",\"answer\":\"a\"}\n\n".to_vec()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let messages: Vec<Result<StreamMessage>> =
            decode_event_stream(stream::iter(chunks)).collect().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].as_ref().unwrap(), &StreamMessage::answer(0, "v", "a"));
        assert_eq!(messages[1].as_ref().unwrap_err().category(), "transport");
    }

    #[test]
    fn test_transport_requires_endpoint() {
        assert!(SseTransport::from_config(&TransportConfig::default()).is_err());
        let config = TransportConfig {
            endpoint: Some("http://localhost:9/compare".into()),
            connect_timeout_ms: Some(100),
            ..TransportConfig::default()
        };
        let transport = SseTransport::from_config(&config).unwrap();
        assert_eq!(transport.endpoint(), "http://localhost:9/compare");
    }
}
