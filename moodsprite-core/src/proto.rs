//! Wire types and client for `moodsprite.MoodspriteService` (`proto/moodsprite.proto`).
//!
//! Declared with the prost derives directly so the workspace builds without a
//! `protoc` install; field tags must stay in step with the `.proto` file.

use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;
use tonic::{IntoRequest, Response, Status, Streaming};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetCharacterRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartSessionRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetHistoryRequest {
    #[prost(oneof = "get_history_request::Selector", tags = "1, 2")]
    pub selector: Option<get_history_request::Selector>,
}

pub mod get_history_request {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct FetchAllVersions {
        #[prost(bool, tag = "1")]
        pub include_data: bool,
    }

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Selector {
        #[prost(message, tag = "1")]
        FetchAll(FetchAllVersions),
        #[prost(string, tag = "2")]
        SpecificVersionToFetch(String),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SpriteKeyframe {
    #[prost(string, tag = "1")]
    pub uuid: String,
    #[prost(string, tag = "2")]
    pub description: String,
    #[prost(bytes = "vec", tag = "3")]
    pub image_data: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SpriteMood {
    #[prost(string, tag = "1")]
    pub uuid: String,
    #[prost(string, tag = "2")]
    pub description: String,
    #[prost(string, tag = "3")]
    pub notes: String,
    #[prost(message, repeated, tag = "4")]
    pub keyframes: Vec<SpriteKeyframe>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SpriteCharacterVersion {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub notes: String,
    #[prost(string, tag = "3")]
    pub changelog: String,
    #[prost(message, optional, tag = "4")]
    pub subject_image: Option<SpriteKeyframe>,
    #[prost(message, repeated, tag = "5")]
    pub moods: Vec<SpriteMood>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SpriteCharacter {
    #[prost(string, tag = "1")]
    pub semantic_version: String,
    #[prost(message, optional, tag = "2")]
    pub character: Option<SpriteCharacterVersion>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SpriteCharacterHistory {
    #[prost(string, tag = "1")]
    pub current_name: String,
    #[prost(string, tag = "2")]
    pub latest_version: String,
    #[prost(message, repeated, tag = "3")]
    pub versions: Vec<SpriteCharacterVersion>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LiveSpriteKeyframeCue {
    #[prost(message, optional, tag = "1")]
    pub timestamp: Option<::prost_types::Timestamp>,
    #[prost(uint32, tag = "2")]
    pub duration_valid_ms: u32,
    #[prost(string, tag = "3")]
    pub keyframe_uuid: String,
    #[prost(string, tag = "4")]
    pub explanation: String,
    #[prost(string, optional, tag = "5")]
    pub alt_cue_text: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

const GET_CHARACTER: &str = "/moodsprite.MoodspriteService/GetCharacter";
const GET_CHARACTER_HISTORY: &str = "/moodsprite.MoodspriteService/GetCharacterHistory";
const START_SESSION: &str = "/moodsprite.MoodspriteService/StartSession";

/// Client for `moodsprite.MoodspriteService`. Cheap to clone; clones share
/// the underlying channel.
#[derive(Debug, Clone)]
pub struct MoodspriteServiceClient {
    inner: tonic::client::Grpc<Channel>,
}

impl MoodspriteServiceClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    async fn ready(&mut self) -> Result<(), Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unavailable(format!("Service was not ready: {}", e)))
    }

    pub async fn get_character(
        &mut self,
        request: impl IntoRequest<GetCharacterRequest>,
    ) -> Result<Response<SpriteCharacter>, Status> {
        self.ready().await?;
        let codec = tonic_prost::ProstCodec::default();
        self.inner
            .unary(
                request.into_request(),
                PathAndQuery::from_static(GET_CHARACTER),
                codec,
            )
            .await
    }

    pub async fn get_character_history(
        &mut self,
        request: impl IntoRequest<GetHistoryRequest>,
    ) -> Result<Response<SpriteCharacterHistory>, Status> {
        self.ready().await?;
        let codec = tonic_prost::ProstCodec::default();
        self.inner
            .unary(
                request.into_request(),
                PathAndQuery::from_static(GET_CHARACTER_HISTORY),
                codec,
            )
            .await
    }

    pub async fn start_session(
        &mut self,
        request: impl IntoRequest<StartSessionRequest>,
    ) -> Result<Response<Streaming<LiveSpriteKeyframeCue>>, Status> {
        self.ready().await?;
        let codec = tonic_prost::ProstCodec::default();
        self.inner
            .server_streaming(
                request.into_request(),
                PathAndQuery::from_static(START_SESSION),
                codec,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use get_history_request::{FetchAllVersions, Selector};
    use prost::Message;

    #[test]
    fn test_history_request_oneof_wire_tags() {
        let by_version = GetHistoryRequest {
            selector: Some(Selector::SpecificVersionToFetch("1.0.0".to_string())),
        };
        // field 2, length-delimited
        assert_eq!(by_version.encode_to_vec()[0], (2 << 3) | 2);

        let all = GetHistoryRequest {
            selector: Some(Selector::FetchAll(FetchAllVersions { include_data: true })),
        };
        let bytes = all.encode_to_vec();
        assert_eq!(bytes[0], (1 << 3) | 2);
        assert_eq!(GetHistoryRequest::decode(bytes.as_slice()).unwrap(), all);
    }

    #[test]
    fn test_cue_without_alt_text_decodes_as_none() {
        let cue = LiveSpriteKeyframeCue {
            timestamp: Some(::prost_types::Timestamp {
                seconds: 1_740_830_400,
                nanos: 0,
            }),
            duration_valid_ms: 1000,
            keyframe_uuid: "A".to_string(),
            explanation: "Streaming smiling from helpful".to_string(),
            alt_cue_text: None,
        };
        let decoded = LiveSpriteKeyframeCue::decode(cue.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.alt_cue_text, None);
        assert_eq!(decoded, cue);
    }
}
