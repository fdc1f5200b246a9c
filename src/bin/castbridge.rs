//! Demo CLI driving a cast device directly by socket address.
//!
//! ```text
//! castbridge --ip 192.168.1.12 load --url http://example.com/movie.mp4
//! castbridge --ip 192.168.1.12 status
//! ```

use anyhow::Result;
use castbridge::{
    args::TargetArgs,
    player::{
        MediaInfoReporter, PlaybackController, PlaybackStateReporter,
        VolumeController, VolumeReporter,
    },
    sender::Sender,
};
use clap::Parser;
use std::time::Duration;

const SENDER_ID: &str = "sender-castbridge";

#[derive(clap::Parser, Clone, Debug)]
#[command(about = "Control a Google Cast device from the command line")]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[clap(flatten)]
    target: TargetArgs,
}

#[derive(clap::Subcommand, Clone, Debug)]
enum Command {
    /// Show playback and volume state.
    Status,

    /// Cast a media URL and start playback.
    Load(LoadArgs),

    Play,
    Pause,
    Stop,

    /// Seek to a position from the start of the content.
    Seek(SeekArgs),

    /// Set the volume level (0.0 to 1.0).
    SetVolume(SetVolumeArgs),

    Mute,
    Unmute,
}

#[derive(clap::Args, Clone, Debug)]
struct LoadArgs {
    #[arg(long)]
    url: String,
}

#[derive(clap::Args, Clone, Debug)]
struct SeekArgs {
    #[arg(long)]
    seconds: f64,
}

#[derive(clap::Args, Clone, Debug)]
struct SetVolumeArgs {
    #[arg(long)]
    level: f32,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let args = Args::parse();
    tracing::debug!(?args, "args");

    let Some(addr) = args.target.to_socket_addr() else {
        anyhow::bail!("no target address given");
    };

    let sender = Sender::connect_to(SENDER_ID, addr).await?;

    match args.command {
        Command::Status => {
            let state = if sender.is_playing().await {
                "playing"
            } else if sender.is_paused().await {
                "paused"
            } else if sender.is_buffering().await {
                "buffering"
            } else {
                "idle"
            };

            match sender.media_url().await {
                Some(url) => println!("{state}: {url} at {pos:?}",
                                      pos = sender.playback_position().await),
                None => println!("{state}"),
            }

            let muted = if sender.is_muted().await { " (muted)" } else { "" };
            println!("volume: {level:.2}{muted}",
                     level = sender.volume_level().await);
        },

        Command::Load(load) => sender.load_media(&load.url, None).await?,

        Command::Play => sender.play().await,
        Command::Pause => sender.pause().await,
        Command::Stop => sender.stop().await,

        Command::Seek(seek) => {
            sender.seek_to(Duration::from_secs_f64(seek.seconds.max(0.0))).await
        },

        Command::SetVolume(volume) => sender.set_volume_level(volume.level).await,
        Command::Mute => sender.mute().await,
        Command::Unmute => sender.unmute().await,
    }

    sender.close().await;

    Ok(())
}

fn init_logging() -> Result<()> {
    use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(EnvFilter::builder()
                  .with_default_directive(LevelFilter::INFO.into())
                  .from_env_lossy())
        .try_init()?;

    Ok(())
}
