use std::cell::Cell;

use ntex_bytes::{Buf, BytesMut};
use ntex_codec::{Decoder, Encoder};

use super::packet::{Packet, Publish};
use super::{decode, encode};
use crate::error::{DecodeError, EncodeError};
use crate::types::{FixedHeader, QoS};

#[derive(Debug, Clone)]
/// Mqtt v3.1.1 protocol codec
pub struct Codec {
    state: Cell<DecodeState>,
    max_size: Cell<u32>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum DecodeState {
    FrameHeader,
    Frame(FixedHeader),
}

impl Codec {
    /// Create `Codec` instance
    pub fn new() -> Self {
        Codec { state: Cell::new(DecodeState::FrameHeader), max_size: Cell::new(0) }
    }

    /// Set max inbound frame size.
    ///
    /// If max size is set to `0`, size is unlimited.
    /// By default max size is set to `0`
    pub fn set_max_size(&self, size: u32) {
        self.max_size.set(size);
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for Codec {
    type Item = Packet;
    type Error = DecodeError;

    fn decode(&self, src: &mut BytesMut) -> Result<Option<Self::Item>, DecodeError> {
        loop {
            match self.state.get() {
                DecodeState::FrameHeader => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    let first_byte = src[0];
                    match decode::decode_variable_length(&src[1..])? {
                        Some((remaining_length, consumed)) => {
                            // check max message size
                            let max_size = self.max_size.get();
                            if max_size != 0 && (max_size as usize) < remaining_length {
                                return Err(DecodeError::MaxSizeExceeded);
                            }
                            src.advance(consumed + 1);
                            self.state.set(DecodeState::Frame(FixedHeader {
                                first_byte,
                                remaining_length: remaining_length as u32,
                            }));
                            if src.len() < remaining_length {
                                // extend receiving buffer to fit the whole frame
                                src.reserve(remaining_length);
                                return Ok(None);
                            }
                        }
                        None => {
                            return Ok(None);
                        }
                    }
                }
                DecodeState::Frame(fixed) => {
                    if src.len() < fixed.remaining_length as usize {
                        return Ok(None);
                    }
                    let packet_buf = src.split_to(fixed.remaining_length as usize);
                    let packet = decode::decode_packet(packet_buf.freeze(), fixed.first_byte)?;
                    self.state.set(DecodeState::FrameHeader);
                    src.reserve(2);
                    return Ok(Some(packet));
                }
            }
        }
    }
}

impl Encoder for Codec {
    type Item = Packet;
    type Error = EncodeError;

    fn encode(&self, item: Packet, dst: &mut BytesMut) -> Result<(), EncodeError> {
        if let Packet::Publish(Publish { qos, packet_id, .. }) = &item {
            if *qos != QoS::AtMostOnce && packet_id.is_none() {
                return Err(EncodeError::PacketIdRequired);
            }
        }
        let content_size = encode::get_encoded_size(&item);
        dst.reserve(content_size + 5);
        encode::encode(&item, dst, content_size as u32)
    }
}

#[cfg(test)]
mod tests {
    use ntex_bytes::{ByteString, Bytes};

    use super::*;

    #[test]
    fn test_max_size() {
        let codec = Codec::new();
        codec.set_max_size(5);

        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"\0\x09");
        assert_eq!(codec.decode(&mut buf), Err(DecodeError::MaxSizeExceeded));
    }

    #[test]
    fn test_publish_round_trip() {
        let codec = Codec::new();
        let mut buf = BytesMut::new();

        let pkt = Publish {
            dup: false,
            retain: false,
            qos: QoS::AtLeastOnce,
            topic: ByteString::from_static("t"),
            packet_id: std::num::NonZeroU16::new(1),
            payload: Bytes::from_static(b"hello"),
        };
        codec.encode(Packet::Publish(pkt.clone()), &mut buf).unwrap();

        match codec.decode(&mut buf) {
            Ok(Some(Packet::Publish(decoded))) => assert_eq!(decoded, pkt),
            other => panic!("unexpected decode result: {:?}", other),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_back_to_back_frames() {
        // a CONNACK immediately followed by a PUBLISH, delivered in one read
        let codec = Codec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"\x20\x02\x00\x00");
        buf.extend_from_slice(b"\x32\x0a\x00\x01t\x00\x01hello");

        assert_eq!(
            codec.decode(&mut buf),
            Ok(Some(Packet::ConnectAck {
                session_present: false,
                return_code: super::super::packet::ConnectAckReason::ConnectionAccepted,
            }))
        );
        match codec.decode(&mut buf) {
            Ok(Some(Packet::Publish(publish))) => {
                assert_eq!(&publish.topic[..], "t");
                assert_eq!(&publish.payload[..], b"hello");
                assert_eq!(publish.qos, QoS::AtLeastOnce);
                assert_eq!(publish.packet_id, std::num::NonZeroU16::new(1));
            }
            other => panic!("unexpected decode result: {:?}", other),
        }
        assert_eq!(codec.decode(&mut buf), Ok(None));
    }

    #[test]
    fn test_partial_frame_is_not_surfaced() {
        let codec = Codec::new();
        let mut buf = BytesMut::new();

        // fixed header of a 10-byte PUBLISH, body still in flight
        buf.extend_from_slice(b"\x32\x0a\x00\x01t");
        assert_eq!(codec.decode(&mut buf), Ok(None));

        buf.extend_from_slice(b"\x00\x01hello");
        assert!(matches!(codec.decode(&mut buf), Ok(Some(Packet::Publish(_)))));
    }
}
