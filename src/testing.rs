//! Mock cast device for the test suite: the far end of an in-memory
//! pipe, speaking real frames through the production codec.

use crate::{
    channel::Channel,
    codec::CastMessageCodec,
    message::CastMessage,
    payload::Header,
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;

const PIPE_CAPACITY: usize = 64 * 1024;

/// A [`Channel`] and the device side of its transport.
pub(crate) fn channel_pair() -> (Channel, MockDevice) {
    let (near, far) = tokio::io::duplex(PIPE_CAPACITY);
    (Channel::from_stream(near), MockDevice::new(far))
}

pub(crate) fn header(msg: &CastMessage) -> Header {
    serde_json::from_str(&msg.payload).expect("payload header")
}

pub(crate) struct MockDevice {
    framed: Framed<DuplexStream, CastMessageCodec>,
}

impl MockDevice {
    pub(crate) fn new(stream: DuplexStream) -> MockDevice {
        MockDevice {
            framed: Framed::new(stream, CastMessageCodec),
        }
    }

    /// Next frame from the channel under test.
    pub(crate) async fn recv(&mut self) -> CastMessage {
        self.framed.next().await
            .expect("stream ended")
            .expect("frame decode")
    }

    /// Next frame whose payload `type` is `typ`, skipping anything
    /// else (typically CONNECTs and PINGs).
    pub(crate) async fn recv_type(&mut self, typ: &str) -> CastMessage {
        loop {
            let msg = self.recv().await;
            if header(&msg).typ == typ {
                return msg;
            }
        }
    }

    pub(crate) async fn send(&mut self, msg: CastMessage) {
        self.framed.send(msg).await.expect("mock send");
    }

    pub(crate) async fn send_json(&mut self,
                                  source: &str,
                                  destination: &str,
                                  namespace: &str,
                                  payload: Value) {
        self.send(CastMessage {
            namespace: namespace.into(),
            source: source.into(),
            destination: destination.into(),
            payload: payload.to_string(),
        }).await;
    }

    /// Answers `request` on the reverse path with `payload`, copying
    /// over its request id.
    pub(crate) async fn reply(&mut self, request: &CastMessage, mut payload: Value) {
        payload["requestId"] = json!(header(request).request_id.map(|id| id.inner()));
        self.send(CastMessage {
            namespace: request.namespace.clone(),
            source: request.destination.clone(),
            destination: request.source.clone(),
            payload: payload.to_string(),
        }).await;
    }
}

/// Receiver application descriptions used across the tests.
pub(crate) struct MockApp {
    pub(crate) app_id: &'static str,
    pub(crate) session_id: &'static str,
    pub(crate) transport_id: &'static str,
    pub(crate) is_idle_screen: bool,
}

impl MockApp {
    pub(crate) fn default_receiver() -> MockApp {
        MockApp {
            app_id: "CC1AD845",
            session_id: "sess-1",
            transport_id: "transport-1",
            is_idle_screen: false,
        }
    }

    pub(crate) fn idle_screen() -> MockApp {
        MockApp {
            app_id: "E8C28D3C",
            session_id: "sess-0",
            transport_id: "transport-0",
            is_idle_screen: true,
        }
    }

    pub(crate) fn youtube() -> MockApp {
        MockApp {
            app_id: "233637DE",
            session_id: "sess-yt",
            transport_id: "transport-yt",
            is_idle_screen: false,
        }
    }
}

pub(crate) fn receiver_status_payload(app: Option<&MockApp>, volume_level: Option<f32>)
-> Value {
    let mut status = json!({"applications": []});

    if let Some(app) = app {
        status["applications"] = json!([{
            "appId": app.app_id,
            "displayName": "Mock App",
            "sessionId": app.session_id,
            "transportId": app.transport_id,
            "isIdleScreen": app.is_idle_screen,
            "namespaces": [{"name": "urn:x-cast:com.google.cast.media"}],
        }]);
    }

    if let Some(level) = volume_level {
        status["volume"] = json!({
            "level": level,
            "muted": false,
            "controlType": "attenuation",
            "stepInterval": 0.05,
        });
    }

    json!({"type": "RECEIVER_STATUS", "requestId": 0, "status": status})
}

/// Polls `condition` under the paused test clock until it holds.
pub(crate) async fn eventually<F>(mut condition: F)
where F: FnMut() -> bool
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }).await.expect("condition not reached in time");
}

/// Advances the paused test clock by `total`, in steps, keeping the
/// channel's idle timer fed from the device side the way a real device
/// keeps a quiet channel alive.
pub(crate) async fn advance_with_traffic(device: &mut MockDevice, total: Duration) {
    let step = Duration::from_secs(5);

    let mut remaining = total;
    while remaining > Duration::ZERO {
        let d = remaining.min(step);
        tokio::time::advance(d).await;
        remaining -= d;

        device.send_json("receiver-0", "sender-0",
                         crate::payload::heartbeat::CHANNEL_NAMESPACE,
                         json!({"type": "PING"})).await;
        device.recv_type("PONG").await;
    }
}

pub(crate) fn media_status_payload(media_session_id: i32,
                                   player_state: &str,
                                   current_time: f64,
                                   playback_rate: f32,
                                   media: Option<(&str, &str)>)
-> Value {
    let mut entry = json!({
        "mediaSessionId": media_session_id,
        "playerState": player_state,
        "currentTime": current_time,
        "playbackRate": playback_rate,
        "supportedMediaCommands": 15,
    });

    if let Some((content_id, content_type)) = media {
        entry["media"] = json!({
            "contentId": content_id,
            "contentType": content_type,
            "streamType": "BUFFERED",
        });
    }

    json!({"type": "MEDIA_STATUS", "requestId": 0, "status": [entry]})
}
