//! The `CastMessage` envelope from Google's `cast_channel.proto`
//! (proto2), declared with prost field attributes.

/// One frame on a cast channel. On the wire each encoded message is
/// preceded by its length as a big-endian u32.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CastMessage {
    #[prost(enumeration = "cast_message::ProtocolVersion", required, tag = "1")]
    pub protocol_version: i32,

    #[prost(string, required, tag = "2")]
    pub source_id: ::prost::alloc::string::String,

    #[prost(string, required, tag = "3")]
    pub destination_id: ::prost::alloc::string::String,

    #[prost(string, required, tag = "4")]
    pub namespace: ::prost::alloc::string::String,

    #[prost(enumeration = "cast_message::PayloadType", required, tag = "5")]
    pub payload_type: i32,

    /// Set iff `payload_type == STRING`.
    #[prost(string, optional, tag = "6")]
    pub payload_utf8: ::core::option::Option<::prost::alloc::string::String>,

    /// Set iff `payload_type == BINARY`.
    #[prost(bytes = "vec", optional, tag = "7")]
    pub payload_binary: ::core::option::Option<::prost::alloc::vec::Vec<u8>>,
}

pub mod cast_message {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
             ::prost::Enumeration)]
    #[repr(i32)]
    pub enum ProtocolVersion {
        Castv210 = 0,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
             ::prost::Enumeration)]
    #[repr(i32)]
    pub enum PayloadType {
        String = 0,
        Binary = 1,
    }
}
