//! Length-prefixed framing for the `CastMessage` protobuf envelope.
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes
//! of serialized protobuf. Only `STRING` payloads are accepted.

use bytes::{Buf, BufMut, BytesMut};
use crate::{
    cast::cast_channel::{self, cast_message::{PayloadType, ProtocolVersion}},
    message::CastMessage,
};
use prost::Message as _;
use std::io;
use thiserror::Error;
use tokio_util::codec;

/// Frames larger than this are not legitimate Cast traffic.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

const SIZE_OF_U32: usize = 4;

/// Error decoding or encoding a frame.
///
/// `is_fatal` distinguishes errors that leave the stream position
/// unusable from per-frame errors the reader can skip past.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o: {0}")]
    Io(#[from] io::Error),

    #[error("frame length {0} exceeds the {MAX_FRAME_LEN} byte limit")]
    FrameTooLarge(usize),

    #[error("malformed protobuf frame: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("protobuf encode: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("unsupported payload type {0}")]
    UnsupportedPayloadType(i32),
}

impl ProtocolError {
    /// True when the stream can no longer be trusted to be aligned on a
    /// frame boundary and must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::Io(_) | ProtocolError::FrameTooLarge(_))
    }
}

pub struct CastMessageCodec;

impl codec::Encoder<CastMessage> for CastMessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: CastMessage, dst: &mut BytesMut)
    -> Result<(), ProtocolError>
    {
        let proto_msg = cast_channel::CastMessage {
            protocol_version: ProtocolVersion::Castv210 as i32,
            source_id: msg.source.into(),
            destination_id: msg.destination.into(),
            namespace: msg.namespace.into(),
            payload_type: PayloadType::String as i32,
            payload_utf8: Some(msg.payload),
            payload_binary: None,
        };

        let proto_len = proto_msg.encoded_len();
        if proto_len > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge(proto_len));
        }

        dst.reserve(SIZE_OF_U32 + proto_len);

        // Big-endian length prefix.
        dst.put_u32(proto_len as u32);
        proto_msg.encode(dst)?;

        Ok(())
    }
}

impl codec::Decoder for CastMessageCodec {
    type Item = CastMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut)
    -> Result<Option<CastMessage>, ProtocolError>
    {
        if src.len() < SIZE_OF_U32 {
            return Ok(None);
        }

        let proto_len_bytes = <[u8; SIZE_OF_U32]>::try_from(&src[0..SIZE_OF_U32]).unwrap();
        let proto_len = u32::from_be_bytes(proto_len_bytes) as usize;

        if proto_len > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge(proto_len));
        }

        let total_len = SIZE_OF_U32 + proto_len;
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        // Take the whole frame off the buffer before parsing: a bad
        // body must not leave the stream misaligned.
        let mut frame = src.split_to(total_len);
        frame.advance(SIZE_OF_U32);

        let mut proto_msg = cast_channel::CastMessage::decode(frame.freeze())?;

        match PayloadType::try_from(proto_msg.payload_type) {
            Ok(PayloadType::String) => {},
            _ => return Err(ProtocolError::UnsupportedPayloadType(proto_msg.payload_type)),
        }

        Ok(Some(CastMessage {
            namespace: proto_msg.namespace.into(),
            source: proto_msg.source_id.into(),
            destination: proto_msg.destination_id.into(),
            payload: proto_msg.payload_utf8.take().unwrap_or_default(),
        }))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio_util::codec::{Decoder, Encoder};

    fn msg(payload: &str) -> CastMessage {
        CastMessage {
            namespace: "urn:x-cast:com.google.cast.receiver".into(),
            source: "sender-0".into(),
            destination: "receiver-0".into(),
            payload: payload.to_string(),
        }
    }

    #[test]
    fn round_trip() {
        let original = msg(r#"{"type":"GET_STATUS","requestId":1}"#);

        let mut buf = BytesMut::new();
        CastMessageCodec.encode(original.clone(), &mut buf).unwrap();

        let decoded = CastMessageCodec.decode(&mut buf).unwrap().unwrap();

        assert_eq!(decoded.namespace, original.namespace);
        assert_eq!(decoded.source, original.source);
        assert_eq!(decoded.destination, original.destination);
        assert_eq!(decoded.payload, original.payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn length_prefix_is_big_endian_protobuf_length() {
        let mut buf = BytesMut::new();
        CastMessageCodec.encode(msg("{}"), &mut buf).unwrap();

        let proto_len = buf.len() - SIZE_OF_U32;
        assert_eq!(&buf[0..4], &(proto_len as u32).to_be_bytes()[..]);
    }

    #[test]
    fn every_prefix_needs_more() {
        let mut buf = BytesMut::new();
        CastMessageCodec.encode(msg(r#"{"type":"PING"}"#), &mut buf).unwrap();

        for cut in 0..buf.len() {
            let mut partial = BytesMut::from(&buf[..cut]);
            assert!(CastMessageCodec.decode(&mut partial).unwrap().is_none(),
                    "prefix of {cut} bytes decoded to a frame");
        }
    }

    #[test]
    fn binary_payload_type_is_rejected() {
        let proto_msg = cast_channel::CastMessage {
            protocol_version: ProtocolVersion::Castv210 as i32,
            source_id: "receiver-0".to_string(),
            destination_id: "sender-0".to_string(),
            namespace: "urn:x-cast:test".to_string(),
            payload_type: PayloadType::Binary as i32,
            payload_utf8: None,
            payload_binary: Some(vec![1, 2, 3]),
        };

        let mut buf = BytesMut::new();
        buf.put_u32(proto_msg.encoded_len() as u32);
        proto_msg.encode(&mut buf).unwrap();

        let err = CastMessageCodec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedPayloadType(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn oversized_frame_is_fatal() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_LEN + 1) as u32);

        let err = CastMessageCodec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn bad_body_does_not_misalign_the_stream() {
        let mut buf = BytesMut::new();

        // A well-delimited frame whose body is not valid protobuf...
        buf.put_u32(3);
        buf.extend_from_slice(&[0xff, 0xff, 0xff]);

        // ...followed by a valid frame.
        CastMessageCodec.encode(msg(r#"{"type":"PONG"}"#), &mut buf).unwrap();

        let err = CastMessageCodec.decode(&mut buf).unwrap_err();
        assert!(!err.is_fatal());

        let decoded = CastMessageCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.payload, r#"{"type":"PONG"}"#);
    }
}
