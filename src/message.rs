use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    fmt::{self, Display},
};

/// Unique identifier of a message endpoint, such as a sender or a
/// receiver application instance.
#[derive(Clone, Debug, Hash,
         Eq, PartialEq, Ord, PartialOrd,
         Deserialize, Serialize)]
#[serde(transparent)]
pub struct EndpointId(Cow<'static, str>);

/// A namespace is a labeled protocol: messages exchanged over a cast
/// channel carry the namespace of the protocol they belong to.
#[derive(Clone, Debug, Hash,
         Eq, PartialEq, Ord, PartialOrd,
         Deserialize, Serialize)]
#[serde(transparent)]
pub struct Namespace(Cow<'static, str>);

/// A Cast V2 protocol data unit with textual payload.
///
/// The payload is UTF-8 JSON text; binary payloads are rejected at the
/// codec layer.
#[derive(Clone, Debug)]
pub struct CastMessage {
    pub namespace: Namespace,

    /// Endpoint that sent the message.
    pub source: EndpointId,

    /// Endpoint the message is addressed to, or `"*"` for a broadcast.
    pub destination: EndpointId,

    /// JSON text payload.
    pub payload: String,
}

impl CastMessage {
    pub fn is_broadcast(&self) -> bool {
        self.destination.is_broadcast()
    }
}

impl Display for CastMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{src} -> {dst} [{ns}] {payload}",
               src = self.source,
               dst = self.destination,
               ns = self.namespace,
               payload = self.payload)
    }
}

impl EndpointId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == Self::BROADCAST.0
    }

    pub const fn from_const(s: &'static str) -> EndpointId {
        Self(Cow::Borrowed(s))
    }

    /// Destination of broadcast messages.
    pub const BROADCAST: EndpointId = EndpointId::from_const("*");

    /// Well-known sender endpoint for platform messages.
    pub const PLATFORM_SENDER: EndpointId = EndpointId::from_const("sender-0");

    /// Well-known receiver endpoint that accepts device-wide commands.
    pub const PLATFORM_RECEIVER: EndpointId = EndpointId::from_const("receiver-0");
}

impl From<&str> for EndpointId {
    fn from(s: &str) -> Self {
        Self(Cow::Owned(s.to_string()))
    }
}

impl From<String> for EndpointId {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

impl From<EndpointId> for String {
    fn from(id: EndpointId) -> String {
        id.0.into()
    }
}

impl Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Namespace {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub const fn from_const(s: &'static str) -> Namespace {
        Self(Cow::Borrowed(s))
    }
}

impl From<&str> for Namespace {
    fn from(s: &str) -> Self {
        Self(Cow::Owned(s.to_string()))
    }
}

impl From<String> for Namespace {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> String {
        ns.0.into()
    }
}

impl Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}
