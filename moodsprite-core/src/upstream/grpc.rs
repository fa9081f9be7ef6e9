use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat};
use futures::stream::{self, Stream, StreamExt};
use tonic::transport::Endpoint;
use tonic::{Code, Status};

use super::{read_with_retry, CueSubscription, SpriteUpstream, UpstreamError, UpstreamEvent};
use crate::config::UpstreamConfig;
use crate::models::{
    CueError, HistoryQuery, LiveCue, SpriteCharacter, SpriteCharacterHistory,
    SpriteCharacterVersion, SpriteKeyframe, SpriteMood,
};
use crate::proto::{self, get_history_request, MoodspriteServiceClient};

/// gRPC client for `moodsprite.MoodspriteService`.
#[derive(Debug, Clone)]
pub struct GrpcUpstream {
    client: MoodspriteServiceClient,
    config: UpstreamConfig,
}

impl GrpcUpstream {
    /// Build the client without dialing; the channel connects on first use
    /// and reconnects after failures.
    pub fn connect_lazy(config: UpstreamConfig) -> Result<Self, UpstreamError> {
        let endpoint = Endpoint::from_shared(config.base_url.clone())
            .map_err(|_| UpstreamError::InvalidAddress(config.base_url.clone()))?
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds));

        Ok(Self {
            client: MoodspriteServiceClient::new(endpoint.connect_lazy()),
            config,
        })
    }

    /// Bound a call by the configured request timeout.
    async fn timed<T>(
        &self,
        call: impl Future<Output = Result<tonic::Response<T>, Status>>,
    ) -> Result<T, UpstreamError> {
        let limit = Duration::from_secs(self.config.request_timeout_seconds);
        match tokio::time::timeout(limit, call).await {
            Ok(Ok(response)) => Ok(response.into_inner()),
            Ok(Err(status)) => Err(status_error(status)),
            Err(_) => Err(UpstreamError::Rpc {
                code: Code::DeadlineExceeded,
                message: format!("no response within {:?}", limit),
            }),
        }
    }
}

fn status_message(status: &Status) -> String {
    if status.message().is_empty() {
        status.code().description().to_string()
    } else {
        status.message().to_string()
    }
}

fn status_error(status: Status) -> UpstreamError {
    match status.code() {
        Code::Unavailable => UpstreamError::Unavailable(status_message(&status)),
        code => UpstreamError::Rpc {
            code,
            message: status_message(&status),
        },
    }
}

// ============================================================================
// Wire → model conversions
// ============================================================================

impl From<proto::SpriteKeyframe> for SpriteKeyframe {
    fn from(kf: proto::SpriteKeyframe) -> Self {
        Self {
            uuid: kf.uuid,
            description: kf.description,
            image_data: (!kf.image_data.is_empty()).then(|| BASE64.encode(&kf.image_data)),
        }
    }
}

impl From<proto::SpriteMood> for SpriteMood {
    fn from(mood: proto::SpriteMood) -> Self {
        Self {
            uuid: mood.uuid,
            description: mood.description,
            notes: mood.notes,
            keyframes: mood.keyframes.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<proto::SpriteCharacterVersion> for SpriteCharacterVersion {
    fn from(v: proto::SpriteCharacterVersion) -> Self {
        Self {
            name: v.name,
            notes: v.notes,
            changelog: v.changelog,
            subject_image: v.subject_image.map(Into::into),
            moods: v.moods.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<proto::SpriteCharacterHistory> for SpriteCharacterHistory {
    fn from(h: proto::SpriteCharacterHistory) -> Self {
        Self {
            current_name: h.current_name,
            latest_version: h.latest_version,
            versions: h.versions.into_iter().map(Into::into).collect(),
        }
    }
}

fn character_from_proto(c: proto::SpriteCharacter) -> Result<SpriteCharacter, UpstreamError> {
    let character = c
        .character
        .ok_or_else(|| UpstreamError::Decode("SpriteCharacter has no character".to_string()))?;
    Ok(SpriteCharacter {
        semantic_version: c.semantic_version,
        character: character.into(),
    })
}

/// A specific version fetch carries no `include_data`; the flag only exists on `fetch_all`.
fn history_request(query: &HistoryQuery) -> proto::GetHistoryRequest {
    let selector = match &query.version {
        Some(v) => get_history_request::Selector::SpecificVersionToFetch(v.clone()),
        None => get_history_request::Selector::FetchAll(get_history_request::FetchAllVersions {
            include_data: query.include_data,
        }),
    };
    proto::GetHistoryRequest {
        selector: Some(selector),
    }
}

fn live_cue_from_proto(cue: proto::LiveSpriteKeyframeCue) -> Result<LiveCue, CueError> {
    let timestamp = match cue.timestamp {
        None => None,
        Some(ts) => {
            let dt = u32::try_from(ts.nanos)
                .ok()
                .and_then(|nanos| DateTime::from_timestamp(ts.seconds, nanos))
                .ok_or_else(|| {
                    CueError::InvalidTimestamp(format!("{}s {}ns", ts.seconds, ts.nanos))
                })?;
            Some(dt.to_rfc3339_opts(SecondsFormat::Nanos, true))
        }
    };

    Ok(LiveCue {
        timestamp,
        duration_valid_ms: Some(cue.duration_valid_ms),
        keyframe_uuid: Some(cue.keyframe_uuid),
        explanation: Some(cue.explanation),
        alt_cue_text: cue.alt_cue_text,
    })
}

/// Turn a `StartSession` response stream into subscription events. A status
/// error is the single terminal `Error`; a clean finish is `End`.
pub fn cue_events<S>(cues: S) -> impl Stream<Item = UpstreamEvent> + Send + 'static
where
    S: Stream<Item = Result<proto::LiveSpriteKeyframeCue, Status>> + Send + 'static,
{
    cues.map(|item| match item {
        Ok(cue) => UpstreamEvent::Cue(live_cue_from_proto(cue)),
        Err(status) => UpstreamEvent::Error(status_message(&status)),
    })
    .chain(stream::once(async { UpstreamEvent::End }))
}

#[async_trait]
impl SpriteUpstream for GrpcUpstream {
    async fn get_character(&self) -> Result<SpriteCharacter, UpstreamError> {
        let character = read_with_retry(&self.config, "GetCharacter", || {
            let mut client = self.client.clone();
            async move {
                self.timed(client.get_character(proto::GetCharacterRequest {}))
                    .await
            }
        })
        .await?;
        character_from_proto(character)
    }

    async fn get_character_history(
        &self,
        query: &HistoryQuery,
    ) -> Result<SpriteCharacterHistory, UpstreamError> {
        let request = history_request(query);
        let history = read_with_retry(&self.config, "GetCharacterHistory", || {
            let mut client = self.client.clone();
            let request = request.clone();
            async move { self.timed(client.get_character_history(request)).await }
        })
        .await?;
        Ok(history.into())
    }

    async fn subscribe(&self) -> Result<CueSubscription, UpstreamError> {
        let mut client = self.client.clone();
        let cues = self
            .timed(client.start_session(proto::StartSessionRequest {}))
            .await
            .map_err(|e| match e {
                // The service answers NOT_FOUND while no character is loaded.
                UpstreamError::Rpc {
                    code: Code::NotFound,
                    message,
                } => UpstreamError::Unavailable(message),
                other => other,
            })?;

        tracing::debug!("Opened upstream StartSession stream at {}", self.config.base_url);
        Ok(CueSubscription::new(cue_events(cues)))
    }

    fn name(&self) -> &str {
        "grpc"
    }
}
