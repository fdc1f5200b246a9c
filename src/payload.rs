//! Typed JSON payloads for the reserved cast namespaces.
//!
//! Every payload is a JSON object with a mandatory `type` string and an
//! optional `requestId`. Outbound payloads are wrapped in [`Payload`],
//! which injects the request id; inbound payloads are first skimmed as
//! a [`Header`] for dispatch and then decoded into the typed response
//! struct by whoever asked for them.

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::{
    fmt::{self, Debug, Display},
    sync::atomic::{AtomicU64, Ordering},
};

pub type MessageType = String;
pub type MessageTypeConst = &'static str;
pub type NamespaceConst = &'static str;

pub type AppId = String;
pub type AppIdConst = &'static str;
pub type AppSessionId = String;
pub type MediaSessionId = i32;
pub type Seconds = f64;

/// `userAgent` sent with CONNECT payloads.
pub const USER_AGENT: &str = "castbridge";

/// Identifier correlating a reply with its request.
///
/// Zero is only used in broadcast payloads with no corresponding
/// request.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    pub const BROADCAST: RequestId = RequestId(0);

    pub fn inner(self) -> u64 {
        self.0
    }

    pub fn is_broadcast(self) -> bool {
        self == RequestId::BROADCAST
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Per-channel request id source. Ids are strictly increasing; the
/// first id handed out is 1 (0 being reserved for broadcasts), and at
/// 64 bits the counter does not wrap in practice.
pub(crate) struct RequestIdGen(AtomicU64);

impl RequestIdGen {
    pub(crate) fn new() -> RequestIdGen {
        RequestIdGen(AtomicU64::new(0))
    }

    pub(crate) fn take_next(&self) -> RequestId {
        RequestId(self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// Serialization wrapper adding the common header fields to a payload
/// body.
#[skip_serializing_none]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload<T> {
    pub request_id: Option<RequestId>,

    #[serde(rename = "type")]
    pub typ: MessageType,

    #[serde(flatten)]
    pub inner: T,
}

/// The header fields shared by every payload, used to dispatch inbound
/// messages before (or instead of) a full typed decode.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    #[serde(default)]
    pub request_id: Option<RequestId>,

    #[serde(rename = "type")]
    pub typ: MessageType,
}

/// An outbound payload body, tied to its namespace and `type` string.
pub trait RequestInner: Debug + Serialize {
    const CHANNEL_NAMESPACE: NamespaceConst;
    const TYPE_NAME: MessageTypeConst;
}

/// Serializes a request body with its header, injecting `request_id`.
pub fn to_json<R>(req: &R, request_id: Option<RequestId>)
-> Result<String, serde_json::Error>
where R: RequestInner
{
    serde_json::to_string(&Payload {
        request_id,
        typ: R::TYPE_NAME.to_string(),
        inner: req,
    })
}

pub mod connection {
    use super::*;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.cast.tp.connection";

    pub const MESSAGE_TYPE_CONNECT: MessageTypeConst = "CONNECT";
    pub const MESSAGE_TYPE_CLOSE: MessageTypeConst = "CLOSE";

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Connect {
        pub user_agent: String,
    }

    impl Default for Connect {
        fn default() -> Connect {
            Connect {
                user_agent: USER_AGENT.to_string(),
            }
        }
    }

    impl RequestInner for Connect {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_TYPE_CONNECT;
    }

    #[derive(Debug, Default, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Close {}

    impl RequestInner for Close {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_TYPE_CLOSE;
    }
}

pub mod heartbeat {
    use super::*;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.cast.tp.heartbeat";

    pub const MESSAGE_TYPE_PING: MessageTypeConst = "PING";
    pub const MESSAGE_TYPE_PONG: MessageTypeConst = "PONG";

    #[derive(Debug, Default, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Ping {}

    impl RequestInner for Ping {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_TYPE_PING;
    }

    #[derive(Debug, Default, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Pong {}

    impl RequestInner for Pong {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_TYPE_PONG;
    }
}

pub mod receiver {
    use super::*;
    use crate::message::EndpointId;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.cast.receiver";

    pub const MESSAGE_REQUEST_TYPE_GET_STATUS: MessageTypeConst = "GET_STATUS";
    pub const MESSAGE_REQUEST_TYPE_LAUNCH: MessageTypeConst = "LAUNCH";
    pub const MESSAGE_REQUEST_TYPE_SET_VOLUME: MessageTypeConst = "SET_VOLUME";

    pub const MESSAGE_RESPONSE_TYPE_RECEIVER_STATUS: MessageTypeConst = "RECEIVER_STATUS";

    /// One running receiver application instance.
    #[derive(Clone, Debug, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Application {
        pub app_id: AppId,

        pub session_id: AppSessionId,

        /// Endpoint to address for this application's own namespaces.
        pub transport_id: EndpointId,

        #[serde(default)]
        pub display_name: String,

        #[serde(default)]
        pub status_text: String,

        #[serde(default)]
        pub is_idle_screen: bool,

        #[serde(default)]
        pub namespaces: Vec<AppNamespace>,
    }

    #[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AppNamespace {
        pub name: String,
    }

    /// Volume of the receiver device.
    #[skip_serializing_none]
    #[derive(Clone, Debug, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Volume {
        pub level: Option<f32>,
        pub muted: Option<bool>,

        pub control_type: Option<String>,
        pub step_interval: Option<f32>,
    }

    #[derive(Clone, Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Status {
        #[serde(default)]
        pub applications: Vec<Application>,

        #[serde(default)]
        pub volume: Option<Volume>,
    }

    /// Body of a `RECEIVER_STATUS` payload.
    #[derive(Clone, Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct StatusResponse {
        pub status: Status,
    }

    #[derive(Debug, Default, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GetStatusRequest {}

    impl RequestInner for GetStatusRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_GET_STATUS;
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LaunchRequest {
        pub app_id: AppId,
    }

    impl RequestInner for LaunchRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_LAUNCH;
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SetVolumeRequest {
        pub volume: Volume,
    }

    impl RequestInner for SetVolumeRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_SET_VOLUME;
    }
}

/// Messages and types for the media namespace, as spoken by the
/// Default Media Receiver app.
///
/// Reference: <https://developers.google.com/cast/docs/media/messages>
pub mod media {
    use super::*;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.cast.media";

    pub const MESSAGE_REQUEST_TYPE_GET_STATUS: MessageTypeConst = "GET_STATUS";
    pub const MESSAGE_REQUEST_TYPE_LOAD: MessageTypeConst = "LOAD";
    pub const MESSAGE_REQUEST_TYPE_PLAY: MessageTypeConst = "PLAY";
    pub const MESSAGE_REQUEST_TYPE_PAUSE: MessageTypeConst = "PAUSE";
    pub const MESSAGE_REQUEST_TYPE_STOP: MessageTypeConst = "STOP";
    pub const MESSAGE_REQUEST_TYPE_SEEK: MessageTypeConst = "SEEK";

    pub const MESSAGE_RESPONSE_TYPE_MEDIA_STATUS: MessageTypeConst = "MEDIA_STATUS";

    #[skip_serializing_none]
    #[derive(Clone, Debug, Deserialize, Serialize)]
    pub struct Image {
        pub url: String,
        pub width: Option<u32>,
        pub height: Option<u32>,
    }

    /// Description of one media stream.
    #[skip_serializing_none]
    #[derive(Clone, Debug, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Media {
        /// Typically a URL for the content.
        pub content_id: String,
        pub content_type: String,

        pub stream_type: Option<StreamType>,
        pub metadata: Option<Metadata>,
        pub duration: Option<Seconds>,
    }

    /// Generic media metadata.
    ///
    /// `metadata_type` 0 is the generic type; richer types exist but the
    /// bridge only ever produces generic metadata.
    #[skip_serializing_none]
    #[derive(Clone, Debug, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Metadata {
        #[serde(rename = "type", alias = "metadataType", default)]
        pub metadata_type: u32,

        pub title: Option<String>,
        pub subtitle: Option<String>,

        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub images: Vec<Image>,
    }

    impl Metadata {
        pub fn generic() -> Metadata {
            Metadata {
                metadata_type: 0,
                title: None,
                subtitle: None,
                images: Vec::new(),
            }
        }
    }

    #[derive(Clone, Debug, Deserialize, Serialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum StreamType {
        Buffered,
        Live,
        Other,

        #[serde(untagged, skip_serializing)]
        Unknown(String),
    }

    #[derive(Clone, Debug, Deserialize, Serialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum PlayerState {
        Idle,
        Playing,
        Paused,
        Buffering,

        #[serde(untagged, skip_serializing)]
        Unknown(String),
    }

    #[derive(Clone, Debug, Deserialize, Serialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum IdleReason {
        Cancelled,
        Interrupted,
        Finished,

        #[serde(untagged, skip_serializing)]
        Unknown(String),
    }

    /// One entry of a `MEDIA_STATUS` payload: the externally observable
    /// state of a media session.
    ///
    /// `media` is only present when it changed since the previous
    /// status; consumers carry the prior value forward.
    #[derive(Clone, Debug, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MediaSession {
        pub media_session_id: MediaSessionId,

        #[serde(default)]
        pub media: Option<Media>,

        pub player_state: PlayerState,

        #[serde(default)]
        pub idle_reason: Option<IdleReason>,

        #[serde(default)]
        pub current_time: Seconds,

        #[serde(default)]
        pub playback_rate: f32,

        /// Bit field of the commands the session accepts.
        #[serde(default)]
        pub supported_media_commands: u32,
    }

    /// Body of a `MEDIA_STATUS` payload.
    #[derive(Clone, Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct StatusResponse {
        #[serde(default)]
        pub status: Vec<MediaSession>,
    }

    #[skip_serializing_none]
    #[derive(Debug, Default, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GetStatusRequest {
        pub media_session_id: Option<MediaSessionId>,
    }

    impl RequestInner for GetStatusRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_GET_STATUS;
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LoadRequest {
        pub media: Media,
    }

    impl RequestInner for LoadRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_LOAD;
    }

    macro_rules! simple_media_request {
        ($name: ident, $msg_type_name: path) => {
            #[derive(Debug, Serialize)]
            #[serde(rename_all = "camelCase")]
            pub struct $name {
                pub media_session_id: MediaSessionId,
            }

            impl RequestInner for $name {
                const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
                const TYPE_NAME: MessageTypeConst = $msg_type_name;
            }
        };
    }

    simple_media_request!(PlayRequest, MESSAGE_REQUEST_TYPE_PLAY);
    simple_media_request!(PauseRequest, MESSAGE_REQUEST_TYPE_PAUSE);
    simple_media_request!(StopRequest, MESSAGE_REQUEST_TYPE_STOP);

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SeekRequest {
        pub media_session_id: MediaSessionId,
        pub current_time: Seconds,
    }

    impl RequestInner for SeekRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_SEEK;
    }
}

/// Well known cast receiver app ids.
pub mod app {
    use super::AppIdConst;

    pub const DEFAULT_MEDIA_RECEIVER: AppIdConst = "CC1AD845";
    pub const BACKDROP: AppIdConst = "E8C28D3C";
    pub const YOUTUBE: AppIdConst = "233637DE";
}
