//! A stateful projection of one cast device: the foreground receiver
//! application, the device volume and the most recent media session,
//! kept current from `RECEIVER_STATUS` / `MEDIA_STATUS` broadcasts.
//!
//! The projection is fed by a drain task consuming a channel
//! subscription; the channel itself holds no reference back to the
//! receiver, so tearing the channel down simply ends the subscription
//! stream and the drain task exits.

use crate::{
    channel::{Channel, ChannelError, ConnectError},
    message::{CastMessage, EndpointId},
    payload::{media, receiver, Header, MediaSessionId, RequestInner},
    util::named,
};
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};

/// A cached media session older than this is re-requested on demand.
pub(crate) const SESSION_MAX_AGE: Duration = Duration::from_secs(30);

const EVENT_QUEUE_LEN: usize = 16;

/// Failure of a receiver operation.
#[derive(Debug, Error)]
pub enum ReceiverError {
    /// A media command was issued while no receiver application is in
    /// the foreground.
    #[error("no foreground receiver application")]
    NoApplication,

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// The cached view of the device. Shared between the drain task and
/// callers; guarded by one mutex with no awaits inside.
#[derive(Default)]
struct Projection {
    application: Option<receiver::Application>,
    volume: Option<receiver::Volume>,
    session: Option<media::MediaSession>,
    last_update: Option<Instant>,
}

impl Projection {
    fn apply_receiver_status(&mut self, status: receiver::Status) {
        // The first entry of the applications array is the canonical
        // foreground application.
        let next = status.applications.into_iter().next();

        // A change of foreground application invalidates the cached
        // media session. Identity is the app id: a fresh status record
        // for the same application must not wipe the session.
        let app_changed = match (&self.application, &next) {
            (Some(prev), Some(new)) => prev.app_id != new.app_id,
            (None, None) => false,
            _ => true,
        };
        if app_changed {
            self.session = None;
        }

        self.application = next;

        if let Some(volume) = status.volume {
            self.volume = Some(volume);
        }
    }

    fn apply_media_status(&mut self, status: media::StatusResponse) {
        self.last_update = Some(Instant::now());

        for mut entry in status.status {
            // The media element is only sent when it has changed;
            // carry the cached value forward.
            if entry.media.is_none() {
                entry.media = self.session.as_ref().and_then(|s| s.media.clone());
            }

            self.session = Some(entry);
        }
    }
}

/// One cast device, addressed by its resolved socket address.
pub struct Receiver {
    addr: SocketAddr,
    channel: tokio::sync::Mutex<Option<Arc<Channel>>>,
    state: Arc<Mutex<Projection>>,
}

impl Receiver {
    pub fn new(addr: SocketAddr) -> Receiver {
        Receiver {
            addr,
            channel: tokio::sync::Mutex::new(None),
            state: Arc::new(Mutex::new(Projection::default())),
        }
    }

    /// Connects to the device. Idempotent: an already-live channel is
    /// left alone. On a fresh connection the projection is seeded with
    /// a platform `GET_STATUS` round trip before this returns.
    pub async fn connect(&self) -> Result<(), ReceiverError> {
        let mut slot = self.channel.lock().await;
        if slot.as_ref().is_some_and(|ch| !ch.is_closed()) {
            return Ok(());
        }

        let channel = Arc::new(Channel::open(self.addr).await?);
        self.install(&mut slot, channel).await
    }

    /// Like [`Receiver::connect`], over an already-built channel.
    #[cfg(test)]
    pub(crate) async fn connect_with(&self, channel: Channel) -> Result<(), ReceiverError> {
        let mut slot = self.channel.lock().await;
        self.install(&mut slot, Arc::new(channel)).await
    }

    async fn install(&self,
                     slot: &mut Option<Arc<Channel>>,
                     channel: Arc<Channel>)
    -> Result<(), ReceiverError> {
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_QUEUE_LEN);
        channel.subscribe(events_tx).await?;

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            while let Some(msg) = events_rx.recv().await {
                apply_event(&state, &msg);
            }
            tracing::debug!("status subscription ended");
        });

        // Seed application and volume before callers can observe the
        // new channel.
        let (reply_tx, reply_rx) = oneshot::channel();
        channel.request(EndpointId::PLATFORM_SENDER,
                        EndpointId::PLATFORM_RECEIVER,
                        &receiver::GetStatusRequest {},
                        Some(reply_tx)).await?;
        let reply = reply_rx.await.map_err(|_| ChannelError::Closed)?;
        apply_event(&self.state, &reply);

        *slot = Some(channel);
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.channel.lock().await
            .as_ref()
            .is_some_and(|ch| !ch.is_closed())
    }

    /// The current foreground receiver application, if any. `None`
    /// while not connected.
    pub async fn application(&self) -> Option<receiver::Application> {
        if !self.is_connected().await {
            return None;
        }
        self.state.lock().unwrap().application.clone()
    }

    /// The device volume, if known. `None` while not connected.
    pub async fn volume(&self) -> Option<receiver::Volume> {
        if !self.is_connected().await {
            return None;
        }
        self.state.lock().unwrap().volume.clone()
    }

    /// The last known media session and when it was captured.
    ///
    /// Re-requests `MEDIA_STATUS` through the foreground application
    /// when the cache is empty or stale. On channel loss one reconnect
    /// is attempted transparently; a second failure yields `None` with
    /// the stale timestamp. There is no session to report while no
    /// application is in the foreground or the idle screen is showing.
    #[named]
    pub async fn session(&self, sender_id: &EndpointId)
    -> (Option<media::MediaSession>, Option<Instant>) {
        const METHOD_PATH: &str = method_path!("Receiver");

        if !self.is_connected().await {
            tracing::info!(target: METHOD_PATH, "connection lost, reconnecting");
            if let Err(err) = self.connect().await {
                tracing::warn!(target: METHOD_PATH, %err, "reconnect failed");
                return (None, self.last_update());
            }
        }

        let (app, needs_refresh, last_update) = {
            let state = self.state.lock().unwrap();
            let needs_refresh = state.session.is_none()
                || state.last_update.map_or(true, |at| at.elapsed() > SESSION_MAX_AGE);
            (state.application.clone(), needs_refresh, state.last_update)
        };

        let Some(app) = app.filter(|app| !app.is_idle_screen) else {
            return (None, last_update);
        };

        if needs_refresh {
            if let Err(err) = self.refresh_media_status(sender_id, &app).await {
                tracing::warn!(target: METHOD_PATH, %err, "media status refresh failed");
                return (None, self.last_update());
            }
        }

        let state = self.state.lock().unwrap();
        (state.session.clone(), state.last_update)
    }

    async fn refresh_media_status(&self,
                                  sender_id: &EndpointId,
                                  app: &receiver::Application)
    -> Result<(), ReceiverError> {
        let channel = self.current_channel().await.ok_or(ChannelError::Closed)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        channel.request(sender_id.clone(),
                        app.transport_id.clone(),
                        &media::GetStatusRequest::default(),
                        Some(reply_tx)).await?;

        let reply = reply_rx.await.map_err(|_| ChannelError::Closed)?;
        apply_event(&self.state, &reply);

        Ok(())
    }

    /// Asks the platform to start the receiver application `app_id`.
    /// The effect arrives as a `RECEIVER_STATUS` broadcast.
    pub async fn launch(&self, app_id: &str) -> Result<(), ReceiverError> {
        self.platform_request(&receiver::LaunchRequest {
            app_id: app_id.to_string(),
        }).await
    }

    /// Sets device volume or mute state.
    pub async fn set_volume(&self, volume: receiver::Volume) -> Result<(), ReceiverError> {
        self.platform_request(&receiver::SetVolumeRequest { volume }).await
    }

    /// Loads media into the foreground application.
    pub async fn load(&self, sender_id: &EndpointId, media: media::Media)
    -> Result<(), ReceiverError> {
        self.media_request(sender_id, &media::LoadRequest { media }).await
    }

    pub async fn play(&self, sender_id: &EndpointId, media_session_id: MediaSessionId)
    -> Result<(), ReceiverError> {
        self.media_request(sender_id, &media::PlayRequest { media_session_id }).await
    }

    pub async fn pause(&self, sender_id: &EndpointId, media_session_id: MediaSessionId)
    -> Result<(), ReceiverError> {
        self.media_request(sender_id, &media::PauseRequest { media_session_id }).await
    }

    pub async fn stop(&self, sender_id: &EndpointId, media_session_id: MediaSessionId)
    -> Result<(), ReceiverError> {
        self.media_request(sender_id, &media::StopRequest { media_session_id }).await
    }

    /// Moves the playback position to `pos_seconds` from the start of
    /// the content.
    pub async fn seek(&self,
                      sender_id: &EndpointId,
                      media_session_id: MediaSessionId,
                      pos_seconds: f64)
    -> Result<(), ReceiverError> {
        self.media_request(sender_id, &media::SeekRequest {
            media_session_id,
            current_time: pos_seconds,
        }).await
    }

    /// Closes the channel if one is open. Idempotent.
    pub async fn close(&self) {
        if let Some(channel) = self.channel.lock().await.take() {
            channel.close().await;
        }
    }

    /// Fire-and-forget request to the platform receiver.
    async fn platform_request<R>(&self, req: &R) -> Result<(), ReceiverError>
    where R: RequestInner
    {
        let channel = self.current_channel().await.ok_or(ChannelError::Closed)?;
        channel.request(EndpointId::PLATFORM_SENDER,
                        EndpointId::PLATFORM_RECEIVER,
                        req,
                        None).await?;
        Ok(())
    }

    /// Fire-and-forget request to the foreground application's
    /// transport endpoint, from the caller's sender id.
    async fn media_request<R>(&self, sender_id: &EndpointId, req: &R)
    -> Result<(), ReceiverError>
    where R: RequestInner
    {
        let app = self.state.lock().unwrap()
                      .application.clone()
                      .ok_or(ReceiverError::NoApplication)?;

        let channel = self.current_channel().await.ok_or(ChannelError::Closed)?;
        channel.request(sender_id.clone(), app.transport_id, req, None).await?;
        Ok(())
    }

    async fn current_channel(&self) -> Option<Arc<Channel>> {
        self.channel.lock().await
            .clone()
            .filter(|ch| !ch.is_closed())
    }

    /// Cached media session and capture time, without any refresh.
    pub(crate) fn media_session_cache(&self)
    -> (Option<media::MediaSession>, Option<Instant>) {
        let state = self.state.lock().unwrap();
        (state.session.clone(), state.last_update)
    }

    fn last_update(&self) -> Option<Instant> {
        self.state.lock().unwrap().last_update
    }
}

/// Applies one status message to the projection. Anything that fails
/// to parse is logged and dropped; bad payloads never tear down the
/// channel.
fn apply_event(state: &Mutex<Projection>, msg: &CastMessage) {
    let header = match serde_json::from_str::<Header>(&msg.payload) {
        Ok(header) => header,
        Err(err) => {
            tracing::debug!(%err, %msg, "undecodable status payload, dropping");
            return;
        },
    };

    match header.typ.as_str() {
        receiver::MESSAGE_RESPONSE_TYPE_RECEIVER_STATUS => {
            match serde_json::from_str::<receiver::StatusResponse>(&msg.payload) {
                Ok(resp) => state.lock().unwrap().apply_receiver_status(resp.status),
                Err(err) => tracing::warn!(%err, "bad RECEIVER_STATUS payload"),
            }
        },
        media::MESSAGE_RESPONSE_TYPE_MEDIA_STATUS => {
            match serde_json::from_str::<media::StatusResponse>(&msg.payload) {
                Ok(resp) => state.lock().unwrap().apply_media_status(resp),
                Err(err) => tracing::warn!(%err, "bad MEDIA_STATUS payload"),
            }
        },
        typ => tracing::trace!(typ, "unhandled status message"),
    }
}
