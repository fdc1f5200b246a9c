//! A sender app instance: the [`MediaPlayer`] facade over a
//! [`Receiver`], converting between neutral player types (URL,
//! `Duration`, volume level) and cast payloads.

use crate::{
    message::EndpointId,
    payload::{app, media, receiver},
    player::{
        BoxError, MediaInfoReporter, MediaLoader, MediaMetadata,
        PlaybackController, PlaybackStateReporter, VolumeController,
        VolumeReporter,
    },
    receiver::{Receiver, ReceiverError, SESSION_MAX_AGE},
    util::named,
};
use async_trait::async_trait;
use std::{net::SocketAddr, time::Duration};
use thiserror::Error;
use url::Url;

/// How long a freshly launched receiver app may take to appear in the
/// receiver status before a load fails.
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(2);

const LAUNCH_POLL_INTERVAL: Duration = Duration::from_millis(50);

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Failure of a sender operation.
#[derive(Debug, Error)]
pub enum SenderError {
    /// The media URL is not an absolute URL.
    #[error("invalid media url")]
    InvalidMedia,

    /// The expected receiver app did not come to the foreground in
    /// time. Retryable.
    #[error("receiver not ready")]
    ReceiverNotReady,

    #[error(transparent)]
    Receiver(#[from] ReceiverError),
}

/// A sender app instance controlling media playback on one device.
///
/// The id identifies this sender on the wire and stays stable for the
/// sender's lifetime.
pub struct Sender {
    id: EndpointId,
    receiver: Receiver,
}

impl Sender {
    pub fn new(id: impl Into<EndpointId>, receiver: Receiver) -> Sender {
        Sender {
            id: id.into(),
            receiver,
        }
    }

    /// Builds a sender for the device at `addr` and connects to it.
    pub async fn connect_to(id: impl Into<EndpointId>, addr: SocketAddr)
    -> Result<Sender, SenderError> {
        let receiver = Receiver::new(addr);
        receiver.connect().await?;
        Ok(Sender::new(id, receiver))
    }

    /// Connects the underlying receiver. Idempotent.
    pub async fn connect(&self) -> Result<(), ReceiverError> {
        self.receiver.connect().await
    }

    /// Closes the connected receiver, if any.
    pub async fn close(&self) {
        self.receiver.close().await;
    }

    /// Casts `media_url` to the device and starts playback.
    ///
    /// Launches the default media receiver app when it is not already
    /// in the foreground, waiting up to 2 seconds for it to appear.
    #[named]
    pub async fn load_media(&self,
                            media_url: &str,
                            metadata: Option<&dyn MediaMetadata>)
    -> Result<(), SenderError> {
        // `Url` values are absolute by construction, so a relative or
        // otherwise unusable URI surfaces here as a parse failure.
        let media_url = Url::parse(media_url).map_err(|_| SenderError::InvalidMedia)?;

        let content_type = mime_guess::from_path(media_url.path())
            .first_raw()
            .unwrap_or(FALLBACK_CONTENT_TYPE);

        self.ensure_app_launched(app::DEFAULT_MEDIA_RECEIVER).await?;

        let mut media_metadata = media::Metadata::generic();
        if let Some(metadata) = metadata {
            let title = metadata.title();
            if !title.is_empty() {
                media_metadata.title = Some(title);
            }

            let subtitle = metadata.subtitle();
            if !subtitle.is_empty() {
                media_metadata.subtitle = Some(subtitle);
            }

            if let Some(image_url) = metadata.image_url() {
                media_metadata.images.push(media::Image {
                    url: image_url.to_string(),
                    width: None,
                    height: None,
                });
            }
        }

        let media = media::Media {
            content_id: media_url.to_string(),
            content_type: content_type.to_string(),
            stream_type: Some(media::StreamType::Buffered),
            metadata: Some(media_metadata),
            duration: None,
        };

        tracing::info!(target: method_path!("Sender"),
                       content_id = %media.content_id,
                       content_type = %media.content_type,
                       "loading media");

        self.receiver.load(&self.id, media).await?;
        Ok(())
    }

    /// Makes sure `app_id` is the foreground application, launching it
    /// if needed and polling until it reports in.
    async fn ensure_app_launched(&self, app_id: &str) -> Result<(), SenderError> {
        let running = self.receiver.application().await
                          .is_some_and(|app| app.app_id == app_id);
        if !running {
            self.receiver.launch(app_id).await?;
        }

        // The launch is acknowledged by a RECEIVER_STATUS broadcast;
        // wait for the projection to pick it up.
        let launched = async {
            loop {
                let running = self.receiver.application().await
                                  .is_some_and(|app| app.app_id == app_id);
                if running {
                    return;
                }
                tokio::time::sleep(LAUNCH_POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(LAUNCH_TIMEOUT, launched)
            .await
            .map_err(|_| SenderError::ReceiverNotReady)
    }

    /// The cached media session, gated by the foreground application:
    /// no session is reported while no app is running or the idle
    /// screen is showing.
    async fn cached_session(&self) -> Option<media::MediaSession> {
        let app = self.receiver.application().await?;
        if app.is_idle_screen {
            return None;
        }

        self.receiver.media_session_cache().0
    }
}

#[async_trait]
impl MediaLoader for Sender {
    async fn load(&self,
                  media_url: &str,
                  metadata: Option<&dyn MediaMetadata>)
    -> Result<(), BoxError> {
        self.load_media(media_url, metadata).await.map_err(Into::into)
    }
}

#[async_trait]
impl MediaInfoReporter for Sender {
    /// URL of the loaded media. The YouTube receiver stores a video id
    /// as content id, from which the watch URL is rebuilt.
    async fn media_url(&self) -> Option<Url> {
        let app = self.receiver.application().await?;
        let media = self.cached_session().await?.media?;

        match app.app_id.as_str() {
            app::YOUTUBE => Url::parse(&format!("https://youtu.be/{}", media.content_id)).ok(),
            _ => Url::parse(&media.content_id).ok(),
        }
    }

    async fn media_metadata(&self) -> Option<Box<dyn MediaMetadata>> {
        let metadata = self.cached_session().await?.media?.metadata?;
        Some(Box::new(metadata) as Box<dyn MediaMetadata>)
    }

    async fn media_duration(&self) -> Duration {
        self.cached_session().await
            .and_then(|session| session.media)
            .and_then(|media| media.duration)
            .filter(|duration| *duration > 0.0)
            .map_or(Duration::ZERO, Duration::from_secs_f64)
    }
}

#[async_trait]
impl PlaybackStateReporter for Sender {
    /// Idle also covers "nothing sensibly playable": no foreground
    /// app, the idle screen, or no cached media session.
    async fn is_idle(&self) -> bool {
        match self.cached_session().await {
            None => true,
            Some(session) => matches!(session.player_state, media::PlayerState::Idle),
        }
    }

    async fn is_playing(&self) -> bool {
        self.cached_session().await
            .is_some_and(|s| matches!(s.player_state, media::PlayerState::Playing))
    }

    async fn is_paused(&self) -> bool {
        self.cached_session().await
            .is_some_and(|s| matches!(s.player_state, media::PlayerState::Paused))
    }

    async fn is_buffering(&self) -> bool {
        self.cached_session().await
            .is_some_and(|s| matches!(s.player_state, media::PlayerState::Buffering))
    }

    async fn playback_position(&self) -> Duration {
        if self.is_idle().await {
            return Duration::ZERO;
        }

        let (mut session, mut last_update) = self.receiver.media_session_cache();

        // A stale cache is refreshed through the receiver before the
        // position is extrapolated.
        if last_update.map_or(true, |at| at.elapsed() > SESSION_MAX_AGE) {
            (session, last_update) = self.receiver.session(&self.id).await;
        }

        let (Some(session), Some(last_update)) = (session, last_update) else {
            return Duration::ZERO;
        };

        let mut pos = session.current_time;
        if matches!(session.player_state, media::PlayerState::Playing) {
            pos += last_update.elapsed().as_secs_f64() * f64::from(session.playback_rate);
        }

        if pos <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(pos)
    }

    async fn playback_rate(&self) -> f32 {
        self.cached_session().await
            .map_or(0.0, |session| session.playback_rate)
    }
}

#[async_trait]
impl PlaybackController for Sender {
    /// UPnP clients issue transport commands speculatively; without a
    /// media session they are silent no-ops.
    async fn play(&self) {
        let Some(session) = self.cached_session().await else {
            return;
        };
        if let Err(err) = self.receiver.play(&self.id, session.media_session_id).await {
            tracing::warn!(%err, "play failed");
        }
    }

    async fn pause(&self) {
        let Some(session) = self.cached_session().await else {
            return;
        };
        if let Err(err) = self.receiver.pause(&self.id, session.media_session_id).await {
            tracing::warn!(%err, "pause failed");
        }
    }

    async fn stop(&self) {
        let Some(session) = self.cached_session().await else {
            return;
        };
        if let Err(err) = self.receiver.stop(&self.id, session.media_session_id).await {
            tracing::warn!(%err, "stop failed");
        }
    }

    async fn seek_to(&self, pos: Duration) {
        let Some(session) = self.cached_session().await else {
            return;
        };
        let res = self.receiver
                      .seek(&self.id, session.media_session_id, pos.as_secs_f64())
                      .await;
        if let Err(err) = res {
            tracing::warn!(%err, "seek failed");
        }
    }
}

#[async_trait]
impl VolumeReporter for Sender {
    async fn volume_level(&self) -> f32 {
        self.receiver.volume().await
            .and_then(|volume| volume.level)
            .unwrap_or(0.0)
    }

    async fn is_muted(&self) -> bool {
        self.receiver.volume().await
            .and_then(|volume| volume.muted)
            .unwrap_or(false)
    }
}

#[async_trait]
impl VolumeController for Sender {
    async fn set_volume_level(&self, level: f32) {
        let volume = receiver::Volume {
            level: Some(level),
            ..receiver::Volume::default()
        };
        if let Err(err) = self.receiver.set_volume(volume).await {
            tracing::warn!(%err, "set volume failed");
        }
    }

    async fn mute(&self) {
        self.set_muted(true).await;
    }

    async fn unmute(&self) {
        self.set_muted(false).await;
    }
}

impl Sender {
    async fn set_muted(&self, muted: bool) {
        let volume = receiver::Volume {
            muted: Some(muted),
            ..receiver::Volume::default()
        };
        if let Err(err) = self.receiver.set_volume(volume).await {
            tracing::warn!(%err, "set mute failed");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{self, MockApp, MockDevice};

    const SENDER_ID: &str = "sender-omnicast";

    async fn connected_sender(app: Option<&MockApp>) -> (Sender, MockDevice) {
        let (channel, mut device) = testing::channel_pair();
        let receiver = Receiver::new(([127, 0, 0, 1], 8009).into());

        let serve = async {
            let status = device.recv_type("GET_STATUS").await;
            device.reply(&status, testing::receiver_status_payload(app, Some(1.0))).await;
            device
        };

        let (connected, device) = tokio::join!(receiver.connect_with(channel), serve);
        connected.unwrap();

        (Sender::new(SENDER_ID, receiver), device)
    }

    /// Seeds the device-side media session and waits for the
    /// projection to pick it up.
    async fn seed_media(sender: &Sender,
                        device: &mut MockDevice,
                        transport_id: &str,
                        payload: serde_json::Value) {
        device.send_json(transport_id, "*", media::CHANNEL_NAMESPACE, payload).await;
        testing::eventually(|| sender.receiver.media_session_cache().0.is_some()).await;
    }

    struct TestMetadata;

    impl MediaMetadata for TestMetadata {
        fn title(&self) -> String {
            "Big Buck Bunny".to_string()
        }

        fn subtitle(&self) -> String {
            String::new()
        }

        fn image_url(&self) -> Option<Url> {
            Some(Url::parse("http://example.com/cover.png").unwrap())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn load_launches_default_receiver_then_loads() {
        let (sender, mut device) = connected_sender(None).await;

        let serve = async {
            let launch = device.recv_type("LAUNCH").await;
            assert_eq!(launch.namespace.as_str(), receiver::CHANNEL_NAMESPACE);
            assert_eq!(launch.source, EndpointId::PLATFORM_SENDER);
            assert_eq!(launch.destination, EndpointId::PLATFORM_RECEIVER);
            let launch_payload: serde_json::Value =
                serde_json::from_str(&launch.payload).unwrap();
            assert_eq!(launch_payload["appId"], "CC1AD845");

            device.send_json(
                "receiver-0", "*", receiver::CHANNEL_NAMESPACE,
                testing::receiver_status_payload(
                    Some(&MockApp::default_receiver()), Some(1.0))).await;

            // A second vconn is opened towards the app transport...
            let connect = device.recv_type("CONNECT").await;
            assert_eq!(connect.source.as_str(), SENDER_ID);
            assert_eq!(connect.destination.as_str(), "transport-1");

            // ...and the LOAD goes to it on the media namespace.
            let load = device.recv_type("LOAD").await;
            assert_eq!(load.namespace.as_str(), media::CHANNEL_NAMESPACE);
            assert_eq!(load.destination.as_str(), "transport-1");

            let load_payload: serde_json::Value =
                serde_json::from_str(&load.payload).unwrap();
            assert_eq!(load_payload["media"]["contentId"], "http://example.com/movie.mp4");
            assert_eq!(load_payload["media"]["contentType"], "video/mp4");
            assert_eq!(load_payload["media"]["streamType"], "BUFFERED");
            assert_eq!(load_payload["media"]["metadata"]["type"], 0);
        };

        let (loaded, ()) = tokio::join!(
            sender.load_media("http://example.com/movie.mp4", None), serve);
        loaded.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn load_overlays_provided_metadata() {
        let (sender, mut device) =
            connected_sender(Some(&MockApp::default_receiver())).await;

        let serve = async {
            let load = device.recv_type("LOAD").await;
            let payload: serde_json::Value = serde_json::from_str(&load.payload).unwrap();

            let metadata = &payload["media"]["metadata"];
            assert_eq!(metadata["type"], 0);
            assert_eq!(metadata["title"], "Big Buck Bunny");
            assert!(metadata.get("subtitle").is_none(), "empty subtitle was sent");
            assert_eq!(metadata["images"][0]["url"], "http://example.com/cover.png");
        };

        let (loaded, ()) = tokio::join!(
            sender.load_media("http://example.com/movie.mp4", Some(&TestMetadata)),
            serve);
        loaded.unwrap();
    }

    #[tokio::test]
    async fn load_rejects_relative_url() {
        let sender = Sender::new(SENDER_ID, Receiver::new(([127, 0, 0, 1], 1).into()));

        let err = sender.load_media("movie.mp4", None).await.unwrap_err();
        assert!(matches!(err, SenderError::InvalidMedia));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_extension_falls_back_to_octet_stream() {
        let (sender, mut device) =
            connected_sender(Some(&MockApp::default_receiver())).await;

        let serve = async {
            let load = device.recv_type("LOAD").await;
            let payload: serde_json::Value = serde_json::from_str(&load.payload).unwrap();
            assert_eq!(payload["media"]["contentType"], "application/octet-stream");
        };

        let (loaded, ()) = tokio::join!(
            sender.load_media("http://example.com/file.xyz", None), serve);
        loaded.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn load_times_out_when_app_never_appears() {
        let (sender, mut device) = connected_sender(None).await;

        let serve = async {
            device.recv_type("LAUNCH").await;
            // Never announce the app.
        };

        let (loaded, ()) = tokio::join!(
            sender.load_media("http://example.com/movie.mp4", None), serve);

        assert!(matches!(loaded.unwrap_err(), SenderError::ReceiverNotReady));
    }

    #[tokio::test(start_paused = true)]
    async fn youtube_content_id_rebuilds_watch_url() {
        let (sender, mut device) = connected_sender(Some(&MockApp::youtube())).await;

        seed_media(&sender, &mut device, "transport-yt",
                   testing::media_status_payload(
                       1, "PLAYING", 0.0, 1.0,
                       Some(("dQw4w9WgXcQ", "video/mp4")))).await;

        let url = sender.media_url().await.unwrap();
        assert_eq!(url.as_str(), "https://youtu.be/dQw4w9WgXcQ");
    }

    #[tokio::test(start_paused = true)]
    async fn seek_without_session_issues_no_frame() {
        let (sender, mut device) =
            connected_sender(Some(&MockApp::default_receiver())).await;

        sender.seek_to(Duration::from_secs(10)).await;

        // Barrier: everything the sender wrote arrives before the
        // pong, and none of it may be a SEEK.
        device.send_json("receiver-0", "sender-0",
                         crate::payload::heartbeat::CHANNEL_NAMESPACE,
                         serde_json::json!({"type": "PING"})).await;
        loop {
            let msg = device.recv().await;
            let typ = testing::header(&msg).typ;
            assert_ne!(typ, "SEEK", "seek was sent without a media session");
            if typ == "PONG" {
                break;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn position_extrapolates_while_playing() {
        let (sender, mut device) =
            connected_sender(Some(&MockApp::default_receiver())).await;

        seed_media(&sender, &mut device, "transport-1",
                   testing::media_status_payload(
                       1, "PLAYING", 30.0, 1.0,
                       Some(("http://example.com/movie.mp4", "video/mp4")))).await;

        tokio::time::advance(Duration::from_secs(5)).await;

        let pos = sender.playback_position().await.as_secs_f64();
        assert!((pos - 35.0).abs() < 0.05, "extrapolated position was {pos}");

        // A paused session does not extrapolate.
        device.send_json("transport-1", "*", media::CHANNEL_NAMESPACE,
                         testing::media_status_payload(1, "PAUSED", 35.0, 1.0, None)).await;
        testing::eventually(|| {
            matches!(sender.receiver.media_session_cache().0,
                     Some(ref s) if matches!(s.player_state, media::PlayerState::Paused))
        }).await;
        tokio::time::advance(Duration::from_secs(5)).await;

        let pos = sender.playback_position().await.as_secs_f64();
        assert!((pos - 35.0).abs() < 0.05, "paused position drifted to {pos}");
    }

    #[tokio::test(start_paused = true)]
    async fn stale_position_refreshes_first() {
        let (sender, mut device) =
            connected_sender(Some(&MockApp::default_receiver())).await;

        seed_media(&sender, &mut device, "transport-1",
                   testing::media_status_payload(
                       1, "PLAYING", 30.0, 1.0,
                       Some(("http://example.com/movie.mp4", "video/mp4")))).await;

        testing::advance_with_traffic(&mut device,
                                      SESSION_MAX_AGE + Duration::from_secs(1)).await;

        let serve = async {
            let req = device.recv_type("GET_STATUS").await;
            assert_eq!(req.namespace.as_str(), media::CHANNEL_NAMESPACE);
            assert_eq!(req.destination.as_str(), "transport-1");
            device.reply(&req,
                         testing::media_status_payload(1, "PLAYING", 50.0, 1.0, None)).await;
        };

        let (pos, ()) = tokio::join!(sender.playback_position(), serve);
        let pos = pos.as_secs_f64();
        assert!((pos - 50.0).abs() < 0.05, "refreshed position was {pos}");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_screen_forces_idle_predicates() {
        let (sender, mut device) = connected_sender(Some(&MockApp::idle_screen())).await;

        seed_media(&sender, &mut device, "transport-0",
                   testing::media_status_payload(1, "PLAYING", 5.0, 1.0, None)).await;

        assert!(sender.is_idle().await);
        assert!(!sender.is_playing().await);
        assert_eq!(sender.playback_position().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn volume_round_trips_through_receiver_status() {
        let (sender, mut device) =
            connected_sender(Some(&MockApp::default_receiver())).await;
        assert_eq!(sender.volume_level().await, 1.0);

        sender.set_volume_level(0.5).await;

        let set = device.recv_type("SET_VOLUME").await;
        assert_eq!(set.destination, EndpointId::PLATFORM_RECEIVER);
        let payload: serde_json::Value = serde_json::from_str(&set.payload).unwrap();
        assert_eq!(payload["volume"], serde_json::json!({"level": 0.5}));

        device.send_json(
            "receiver-0", "*", receiver::CHANNEL_NAMESPACE,
            testing::receiver_status_payload(
                Some(&MockApp::default_receiver()), Some(0.5))).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while sender.volume_level().await != 0.5 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }).await.unwrap();

        assert!(!sender.is_muted().await);
    }

    #[tokio::test(start_paused = true)]
    async fn mute_and_unmute_send_sparse_volume() {
        let (sender, mut device) =
            connected_sender(Some(&MockApp::default_receiver())).await;

        sender.mute().await;
        let set = device.recv_type("SET_VOLUME").await;
        let payload: serde_json::Value = serde_json::from_str(&set.payload).unwrap();
        assert_eq!(payload["volume"], serde_json::json!({"muted": true}));

        sender.unmute().await;
        let set = device.recv_type("SET_VOLUME").await;
        let payload: serde_json::Value = serde_json::from_str(&set.payload).unwrap();
        assert_eq!(payload["volume"], serde_json::json!({"muted": false}));
    }
}
