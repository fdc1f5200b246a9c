use std::net::{IpAddr, SocketAddr};

/// Configuration of the bridge surface as recognized on the command
/// line. The core consumes only the resolved downstream endpoint; the
/// rest parameterizes the UPnP collaborators.
#[derive(clap::Args, Clone, Debug)]
pub struct BridgeArgs {
    /// Bind address for the HTTP/SSDP surface.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port for the HTTP/SSDP surface.
    #[arg(long, default_value_t = 2278)]
    pub port: u16,

    /// Name or UUID of the Google Cast device to bridge to.
    #[arg(long, value_name = "NAME_OR_UUID")]
    pub gcast_hint: Option<String>,

    /// MPRIS D-Bus destination name of a local player to bridge to.
    #[arg(long, value_name = "DEST")]
    pub mpris_hint: Option<String>,
}

#[derive(clap::Args, Clone, Debug)]
#[group(id = "target_args", multiple = false, required = true)]
pub struct TargetArgs {
    /// Cast device IP address (IPv4 or IPv6).
    ///
    /// Uses the default TCP port 8009; use `--addr` to override it.
    #[arg(long, value_name = "TARGET_IP")]
    pub ip: Option<IpAddr>,

    /// Cast device IP address (IPv4 or IPv6) and TCP port.
    #[arg(long, value_name = "TARGET_IP:PORT")]
    pub addr: Option<SocketAddr>,
}

impl TargetArgs {
    /// The resolved downstream endpoint.
    ///
    /// Returns `None` only when constructed programmatically with no
    /// target set; on the command line clap enforces exactly one.
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        if let Some(addr) = self.addr {
            Some(addr)
        } else {
            self.ip.map(|ip| SocketAddr::from((ip, crate::channel::DEFAULT_PORT)))
        }
    }
}
