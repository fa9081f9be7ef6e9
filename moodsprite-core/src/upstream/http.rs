use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, FramedRead};
use tokio_util::io::StreamReader;

use super::{read_with_retry, CueSubscription, SpriteUpstream, UpstreamError, UpstreamEvent};
use crate::config::UpstreamConfig;
use crate::models::{CueError, HistoryQuery, LiveCue, SpriteCharacter, SpriteCharacterHistory};

/// Longest cue line accepted from upstream.
pub const MAX_CUE_LINE_BYTES: usize = 64 * 1024;

/// HTTP client for a JSON gateway in front of the sprite service.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    /// Client for bounded reads (whole-request timeout).
    client: Client,
    /// Client for the push stream (connect timeout only).
    stream_client: Client,
    config: UpstreamConfig,
    base_url: String,
}

impl HttpUpstream {
    pub fn new(config: UpstreamConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .build()?;

        let stream_client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .build()?;

        let base_url = config.base_url.trim_end_matches('/').to_string();

        Ok(Self {
            client,
            stream_client,
            config,
            base_url,
        })
    }

    /// GET a JSON document, retrying transient failures.
    async fn get_json<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T, UpstreamError>
    where
        T: serde::de::DeserializeOwned,
    {
        let what = format!("GET {}", path);
        read_with_retry(&self.config, &what, || self.get_json_once::<T>(path, query)).await
    }

    async fn get_json_once<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T, UpstreamError>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                code: status.as_u16(),
                message,
            });
        }
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

/// One newline-delimited frame of the session body.
#[derive(Debug)]
enum CueFrame {
    Line(Bytes),
    /// A line longer than [`MAX_CUE_LINE_BYTES`]; the rest of it is discarded.
    Oversized,
}

/// Splits the body on `\n` without UTF-8 validation. An oversized line is an
/// item rather than a codec error, since `FramedRead` stops after any error.
struct CueLineCodec {
    inner: AnyDelimiterCodec,
}

impl CueLineCodec {
    fn new() -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), MAX_CUE_LINE_BYTES),
        }
    }

    fn lift(result: Result<Option<Bytes>, AnyDelimiterCodecError>) -> io::Result<Option<CueFrame>> {
        match result {
            Ok(frame) => Ok(frame.map(CueFrame::Line)),
            Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => Ok(Some(CueFrame::Oversized)),
            Err(AnyDelimiterCodecError::Io(e)) => Err(e),
        }
    }
}

impl Decoder for CueLineCodec {
    type Item = CueFrame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<CueFrame>> {
        Self::lift(self.inner.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<CueFrame>> {
        Self::lift(self.inner.decode_eof(buf))
    }
}

/// Turn an NDJSON byte stream into subscription events.
///
/// Frames are split on raw bytes, so a line that is not valid UTF-8 or not a
/// cue object is one undecodable cue and the stream carries on. Only a failed
/// body read ends it with `Error`.
pub fn ndjson_events<S, E>(body: S) -> impl Stream<Item = UpstreamEvent> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let reader = StreamReader::new(body.map_err(|e| io::Error::other(e.to_string())));
    let frames = FramedRead::new(reader, CueLineCodec::new());

    let events = frames.filter_map(|frame| async move {
        match frame {
            Ok(CueFrame::Line(frame)) => {
                let line = frame.strip_suffix(b"\r").unwrap_or(&frame[..]);
                if line.iter().all(u8::is_ascii_whitespace) {
                    return None;
                }
                Some(UpstreamEvent::Cue(
                    serde_json::from_slice::<LiveCue>(line)
                        .map_err(|e| CueError::Undecodable(e.to_string())),
                ))
            }
            Ok(CueFrame::Oversized) => Some(UpstreamEvent::Cue(Err(CueError::Undecodable(
                format!("cue line exceeds {} bytes", MAX_CUE_LINE_BYTES),
            )))),
            Err(e) => Some(UpstreamEvent::Error(e.to_string())),
        }
    });

    events.chain(stream::once(async { UpstreamEvent::End }))
}

#[async_trait]
impl SpriteUpstream for HttpUpstream {
    async fn get_character(&self) -> Result<SpriteCharacter, UpstreamError> {
        self.get_json("/character", &[]).await
    }

    async fn get_character_history(
        &self,
        query: &HistoryQuery,
    ) -> Result<SpriteCharacterHistory, UpstreamError> {
        // `include_data` only applies when fetching every version.
        let params = match &query.version {
            Some(v) => vec![("version", v.clone())],
            None => vec![("include_data", query.include_data.to_string())],
        };
        self.get_json("/history", &params).await
    }

    async fn subscribe(&self) -> Result<CueSubscription, UpstreamError> {
        let url = format!("{}/session", self.base_url);
        let response = self
            .stream_client
            .get(&url)
            .header("accept", "application/x-ndjson")
            .send()
            .await
            .map_err(|e| UpstreamError::Unavailable(e.to_string()))?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND | StatusCode::SERVICE_UNAVAILABLE => {
                let message = response.text().await.unwrap_or_default();
                return Err(UpstreamError::Unavailable(message));
            }
            s => {
                let message = response.text().await.unwrap_or_default();
                return Err(UpstreamError::Status {
                    code: s.as_u16(),
                    message,
                });
            }
        }

        tracing::debug!("Opened upstream cue subscription at {}", url);
        Ok(CueSubscription::new(ndjson_events(response.bytes_stream())))
    }

    fn name(&self) -> &str {
        "http"
    }
}

// ============================================================================
// TESTS
// ============================================================================
