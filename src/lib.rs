//! Cross-protocol media-player control bridge, cast side: the Cast V2
//! protobuf channel, a cached projection of the receiver device, and
//! the [`player::MediaPlayer`] facade the UPnP AV services bind to.

#[macro_use]
mod util;
pub use util::named;

#[cfg(feature = "clap")]
pub mod args;
pub mod cast;
pub mod channel;
pub mod codec;
pub mod device;
pub mod message;
pub mod payload;
pub mod player;
pub mod receiver;
pub mod sender;

#[cfg(test)]
pub(crate) mod testing;
