//! The capability surface a media player exposes to its control
//! services. The UPnP AVTransport and RenderingControl services bind
//! against these traits, holding the player as a trait object.

use async_trait::async_trait;
use std::time::Duration;
use url::Url;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Descriptive metadata for a media artefact.
pub trait MediaMetadata: Send + Sync {
    /// Descriptive title of the content, or `""`.
    fn title(&self) -> String;

    /// Descriptive subtitle of the content, or `""`.
    fn subtitle(&self) -> String;

    /// Artwork for the content.
    fn image_url(&self) -> Option<Url>;
}

/// Loads media for playback.
#[async_trait]
pub trait MediaLoader: Send + Sync {
    async fn load(&self,
                  media_url: &str,
                  metadata: Option<&dyn MediaMetadata>)
    -> Result<(), BoxError>;
}

/// Reports information about the loaded media.
#[async_trait]
pub trait MediaInfoReporter: Send + Sync {
    async fn media_url(&self) -> Option<Url>;
    async fn media_metadata(&self) -> Option<Box<dyn MediaMetadata>>;
    async fn media_duration(&self) -> Duration;
}

/// Reports the state of media playback.
#[async_trait]
pub trait PlaybackStateReporter: Send + Sync {
    async fn is_idle(&self) -> bool;
    async fn is_playing(&self) -> bool;
    async fn is_paused(&self) -> bool;
    async fn is_buffering(&self) -> bool;

    /// Position of playback from the beginning of the content. For
    /// live streams, the time since playback started.
    async fn playback_position(&self) -> Duration;

    /// Ratio of the speed the media is played at.
    async fn playback_rate(&self) -> f32;
}

/// Controls media playback.
#[async_trait]
pub trait PlaybackController: Send + Sync {
    async fn play(&self);
    async fn pause(&self);
    async fn stop(&self);
    async fn seek_to(&self, pos: Duration);
}

/// Reports volume settings of the audio output.
#[async_trait]
pub trait VolumeReporter: Send + Sync {
    async fn volume_level(&self) -> f32;
    async fn is_muted(&self) -> bool;
}

/// Adjusts volume settings.
#[async_trait]
pub trait VolumeController: Send + Sync {
    async fn set_volume_level(&self, level: f32);
    async fn mute(&self);
    async fn unmute(&self);
}

/// A generic media player.
pub trait MediaPlayer:
    MediaLoader
    + MediaInfoReporter
    + PlaybackStateReporter
    + PlaybackController
    + VolumeReporter
    + VolumeController
{}

impl<T> MediaPlayer for T
where T: MediaLoader
        + MediaInfoReporter
        + PlaybackStateReporter
        + PlaybackController
        + VolumeReporter
        + VolumeController
{}

impl MediaMetadata for crate::payload::media::Metadata {
    fn title(&self) -> String {
        self.title.clone().unwrap_or_default()
    }

    fn subtitle(&self) -> String {
        self.subtitle.clone().unwrap_or_default()
    }

    fn image_url(&self) -> Option<Url> {
        self.images.first().and_then(|image| Url::parse(&image.url).ok())
    }
}
