//! Identity and capabilities of a cast device, as advertised in its
//! mDNS TXT records and on the setup HTTP endpoint.

use crate::channel::DEFAULT_PORT;
use serde::Deserialize;
use std::{
    fmt::{self, Display},
    net::{IpAddr, SocketAddr},
};
use thiserror::Error;
use uuid::Uuid;

/// Port of the device's HTTP setup endpoint.
const SETUP_PORT: u16 = 8008;

/// One capability bit from the `ca` TXT record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum DeviceCapability {
    VideoOut = 1 << 0,
    VideoIn = 1 << 1,
    AudioOut = 1 << 2,
    AudioIn = 1 << 3,
    DevMode = 1 << 4,
    MultizoneGroup = 1 << 5,
}

impl DeviceCapability {
    const ALL: [DeviceCapability; 6] = [
        DeviceCapability::VideoOut,
        DeviceCapability::VideoIn,
        DeviceCapability::AudioOut,
        DeviceCapability::AudioIn,
        DeviceCapability::DevMode,
        DeviceCapability::MultizoneGroup,
    ];
}

impl Display for DeviceCapability {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            DeviceCapability::VideoOut => "video_out",
            DeviceCapability::VideoIn => "video_in",
            DeviceCapability::AudioOut => "audio_out",
            DeviceCapability::AudioIn => "audio_in",
            DeviceCapability::DevMode => "dev_mode",
            DeviceCapability::MultizoneGroup => "multizone_group",
        })
    }
}

/// A cast device as seen by the discovery collaborator.
#[derive(Clone, Debug, Default)]
pub struct DeviceInfo {
    pub uuid: Option<Uuid>,
    pub name: String,
    pub model: String,

    pub address: Option<IpAddr>,
    pub port: u16,

    capabilities: u32,
}

impl DeviceInfo {
    /// Builds device info from mDNS TXT records (`id`, `fn`, `md`,
    /// `ca`). Unknown keys are ignored.
    pub fn from_txt_records<'a, I>(records: I) -> DeviceInfo
    where I: IntoIterator<Item = (&'a str, &'a str)>
    {
        let mut info = DeviceInfo {
            port: DEFAULT_PORT,
            ..DeviceInfo::default()
        };

        for (key, value) in records {
            match key {
                "id" => info.uuid = Uuid::parse_str(value).ok(),
                "fn" => info.name = value.to_string(),
                "md" => info.model = value.to_string(),
                "ca" => info.capabilities = value.parse().unwrap_or(0),
                _ => {},
            }
        }

        info
    }

    /// The resolved control endpoint, once an address is known.
    pub fn addr(&self) -> Option<SocketAddr> {
        self.address.map(|ip| SocketAddr::from((ip, self.port)))
    }

    pub fn capabilities(&self) -> Vec<DeviceCapability> {
        DeviceCapability::ALL
            .into_iter()
            .filter(|c| self.capabilities & *c as u32 != 0)
            .collect()
    }

    /// True when the device has every one of the given capabilities.
    pub fn capable_of(&self, capabilities: &[DeviceCapability]) -> bool {
        let mask = capabilities.iter().fold(0u32, |acc, c| acc | *c as u32);
        self.capabilities & mask == mask
    }

    /// Only devices with both video and audio output are usable as a
    /// playback endpoint.
    pub fn is_selectable(&self) -> bool {
        self.capable_of(&[DeviceCapability::VideoOut, DeviceCapability::AudioOut])
    }

    /// True when `hint` names this device by friendly name or UUID.
    pub fn matches_hint(&self, hint: &str) -> bool {
        hint == self.name
            || self.uuid.is_some_and(|uuid| uuid.to_string() == hint)
    }
}

/// Failure probing the device's setup endpoint.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("setup endpoint: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct EurekaInfo {
    name: String,
}

/// Fetches the device name from `http://<ip>:8008/setup/eureka_info`.
pub async fn eureka_info(ip: IpAddr) -> Result<String, DeviceError> {
    let endpoint = format!("http://{addr}/setup/eureka_info",
                           addr = SocketAddr::from((ip, SETUP_PORT)));

    let info: EurekaInfo = reqwest::get(&endpoint)
        .await?
        .error_for_status()?
        .json()
        .await?;

    Ok(info.name)
}
