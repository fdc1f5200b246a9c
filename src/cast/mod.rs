//! Protobuf envelope for the Cast V2 wire protocol.

pub mod cast_channel;
