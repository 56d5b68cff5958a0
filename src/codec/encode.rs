use std::convert::TryFrom;
use std::num::NonZeroU16;

use ntex_bytes::{BufMut, ByteString, Bytes, BytesMut};

use super::packet::{Connect, LastWill, Packet, Publish, SubscribeReturnCode};
use crate::error::EncodeError;
use crate::types::{packet_type, ConnectFlags, QoS, MQTT, MQTT_LEVEL_3, WILL_QOS_SHIFT};

/// Computes the remaining length of a packet ahead of writing it.
pub(crate) fn get_encoded_size(packet: &Packet) -> usize {
    match packet {
        Packet::Connect(connect) => {
            let Connect { last_will, client_id, username, password, .. } = connect.as_ref();

            // Protocol Name + Protocol Level + Connect Flags + Keep Alive
            let mut n = 2 + 4 + 1 + 1 + 2;

            // Client Id
            n += 2 + client_id.len();

            // Will Topic + Will Message
            if let Some(LastWill { topic, message, .. }) = last_will {
                n += 2 + topic.len() + 2 + message.len();
            }

            if let Some(s) = username {
                n += 2 + s.len();
            }

            if let Some(s) = password {
                n += 2 + s.len();
            }

            n
        }

        Packet::Publish(Publish { topic, packet_id, payload, .. }) => {
            // Topic + Packet Id + Payload
            2 + topic.len() + packet_id.map_or(0, |_| 2) + payload.len()
        }

        Packet::ConnectAck { .. } // Flags + Return Code
        | Packet::PublishAck { .. } // Packet Id
        | Packet::PublishReceived { .. } // Packet Id
        | Packet::PublishRelease { .. } // Packet Id
        | Packet::PublishComplete { .. } // Packet Id
        | Packet::UnsubscribeAck { .. } => 2, // Packet Id

        Packet::Subscribe { topic_filters, .. } => {
            2 + topic_filters
                .iter()
                .fold(0, |acc, (filter, _)| acc + 2 + filter.len() + 1)
        }

        Packet::SubscribeAck { status, .. } => 2 + status.len(),

        Packet::Unsubscribe { topic_filters, .. } => {
            2 + topic_filters.iter().fold(0, |acc, filter| acc + 2 + filter.len())
        }

        Packet::PingRequest | Packet::PingResponse | Packet::Disconnect => 0,
    }
}

/// Writes the fixed header and the packet content.
///
/// `content_size` must be the value returned by [`get_encoded_size`] for
/// the same packet.
pub(crate) fn encode(
    packet: &Packet,
    dst: &mut BytesMut,
    content_size: u32,
) -> Result<(), EncodeError> {
    match packet {
        Packet::Connect(connect) => {
            dst.put_u8(packet_type::CONNECT);
            write_variable_length(content_size, dst);
            encode_connect(connect, dst)?;
        }

        Packet::ConnectAck { session_present, return_code } => {
            dst.put_u8(packet_type::CONNACK);
            write_variable_length(content_size, dst);
            dst.put_slice(&[u8::from(*session_present), (*return_code).into()]);
        }

        Packet::Publish(publish) => {
            let Publish { dup, qos, retain, topic, packet_id, payload } = publish;
            let mut first_byte = packet_type::PUBLISH_START | (u8::from(*qos) << 1);
            if *dup {
                first_byte |= 0b0000_1000;
            }
            if *retain {
                first_byte |= 0b0000_0001;
            }
            dst.put_u8(first_byte);
            write_variable_length(content_size, dst);
            write_string(topic, dst)?;
            if *qos != QoS::AtMostOnce {
                let packet_id = packet_id.ok_or(EncodeError::PacketIdRequired)?;
                dst.put_u16(packet_id.get());
            }
            dst.put_slice(payload);
        }

        Packet::PublishAck { packet_id } => {
            encode_ack(packet_type::PUBACK, *packet_id, content_size, dst)
        }
        Packet::PublishReceived { packet_id } => {
            encode_ack(packet_type::PUBREC, *packet_id, content_size, dst)
        }
        Packet::PublishRelease { packet_id } => {
            encode_ack(packet_type::PUBREL, *packet_id, content_size, dst)
        }
        Packet::PublishComplete { packet_id } => {
            encode_ack(packet_type::PUBCOMP, *packet_id, content_size, dst)
        }
        Packet::UnsubscribeAck { packet_id } => {
            encode_ack(packet_type::UNSUBACK, *packet_id, content_size, dst)
        }

        Packet::Subscribe { packet_id, topic_filters } => {
            dst.put_u8(packet_type::SUBSCRIBE);
            write_variable_length(content_size, dst);
            dst.put_u16(packet_id.get());

            for (filter, qos) in topic_filters {
                write_string(filter, dst)?;
                dst.put_u8((*qos).into());
            }
        }

        Packet::SubscribeAck { packet_id, status } => {
            dst.put_u8(packet_type::SUBACK);
            write_variable_length(content_size, dst);
            dst.put_u16(packet_id.get());

            for code in status {
                dst.put_u8(match code {
                    SubscribeReturnCode::Success(qos) => (*qos).into(),
                    SubscribeReturnCode::Failure => 0x80,
                });
            }
        }

        Packet::Unsubscribe { packet_id, topic_filters } => {
            dst.put_u8(packet_type::UNSUBSCRIBE);
            write_variable_length(content_size, dst);
            dst.put_u16(packet_id.get());

            for filter in topic_filters {
                write_string(filter, dst)?;
            }
        }

        Packet::PingRequest => {
            dst.put_slice(&[packet_type::PINGREQ, 0]);
        }
        Packet::PingResponse => {
            dst.put_slice(&[packet_type::PINGRESP, 0]);
        }
        Packet::Disconnect => {
            dst.put_slice(&[packet_type::DISCONNECT, 0]);
        }
    }

    Ok(())
}

fn encode_connect(connect: &Connect, dst: &mut BytesMut) -> Result<(), EncodeError> {
    let Connect { clean_session, keep_alive, last_will, client_id, username, password } = connect;

    write_bytes(&Bytes::from_static(MQTT), dst)?;

    let mut flags = ConnectFlags::empty();

    if username.is_some() {
        flags |= ConnectFlags::USERNAME;
    }
    if password.is_some() {
        flags |= ConnectFlags::PASSWORD;
    }

    if let Some(LastWill { qos, retain, .. }) = last_will {
        flags |= ConnectFlags::WILL;

        if *retain {
            flags |= ConnectFlags::WILL_RETAIN;
        }

        flags |= ConnectFlags::from_bits_truncate(u8::from(*qos) << WILL_QOS_SHIFT);
    }

    if *clean_session {
        flags |= ConnectFlags::CLEAN_START;
    }

    dst.put_slice(&[MQTT_LEVEL_3, flags.bits()]);
    dst.put_u16(*keep_alive);
    write_string(client_id, dst)?;

    if let Some(LastWill { topic, message, .. }) = last_will {
        write_string(topic, dst)?;
        write_bytes(message, dst)?;
    }

    if let Some(s) = username {
        write_string(s, dst)?;
    }

    if let Some(s) = password {
        write_bytes(s, dst)?;
    }

    Ok(())
}

#[inline]
fn encode_ack(first_byte: u8, packet_id: NonZeroU16, content_size: u32, dst: &mut BytesMut) {
    dst.put_u8(first_byte);
    write_variable_length(content_size, dst);
    dst.put_u16(packet_id.get());
}

#[inline]
fn write_string(s: &ByteString, dst: &mut BytesMut) -> Result<(), EncodeError> {
    let len = u16::try_from(s.len()).map_err(|_| EncodeError::InvalidLength)?;
    dst.put_u16(len);
    dst.put_slice(s.as_bytes());
    Ok(())
}

#[inline]
fn write_bytes(s: &Bytes, dst: &mut BytesMut) -> Result<(), EncodeError> {
    let len = u16::try_from(s.len()).map_err(|_| EncodeError::InvalidLength)?;
    dst.put_u16(len);
    dst.put_slice(s);
    Ok(())
}

#[inline]
pub(crate) fn write_variable_length(size: u32, dst: &mut BytesMut) {
    if size <= 127 {
        dst.put_u8(size as u8);
    } else if size <= 16383 {
        // 127 + 127 << 7
        dst.put_slice(&[((size % 128) | 0x80) as u8, (size >> 7) as u8]);
    } else if size <= 2097151 {
        // 127 + 127 << 7 + 127 << 14
        dst.put_slice(&[
            ((size % 128) | 0x80) as u8,
            (((size >> 7) % 128) | 0x80) as u8,
            (size >> 14) as u8,
        ]);
    } else {
        dst.put_slice(&[
            ((size % 128) | 0x80) as u8,
            (((size >> 7) % 128) | 0x80) as u8,
            (((size >> 14) % 128) | 0x80) as u8,
            (size >> 21) as u8,
        ]);
    }
}

#[cfg(test)]
mod tests {
    use ntex_bytes::ByteString;

    use super::super::decode::{decode_packet, decode_variable_length};
    use super::*;
    use crate::types::QoS;

    fn encode_to_vec(packet: &Packet) -> BytesMut {
        let mut buf = BytesMut::with_capacity(64);
        let content_size = get_encoded_size(packet);
        encode(packet, &mut buf, content_size as u32).unwrap();
        buf
    }

    macro_rules! assert_packet (
        ($p:expr, $data:expr) => {{
            let buf = encode_to_vec(&$p);
            assert_eq!(&buf[..], &$data[..]);

            // the encoded frame decodes back to the same packet
            let first_byte = buf[0];
            let (_, consumed) = decode_variable_length(&buf[1..]).unwrap().unwrap();
            let body = buf.freeze().split_off(consumed + 1);
            assert_eq!(decode_packet(body, first_byte), Ok($p));
        }};
    );

    #[test]
    fn test_encode_variable_length() {
        let mut v = BytesMut::new();

        write_variable_length(123, &mut v);
        assert_eq!(&v[..], &[123]);
        v.clear();

        write_variable_length(129, &mut v);
        assert_eq!(&v[..], b"\x81\x01");
        v.clear();

        write_variable_length(16383, &mut v);
        assert_eq!(&v[..], b"\xff\x7f");
        v.clear();

        write_variable_length(2097151, &mut v);
        assert_eq!(&v[..], b"\xff\xff\x7f");
        v.clear();

        write_variable_length(268435455, &mut v);
        assert_eq!(&v[..], b"\xff\xff\xff\x7f");
    }

    #[test]
    fn test_encode_connect_packets() {
        assert_packet!(
            Packet::Connect(Box::new(Connect {
                clean_session: false,
                keep_alive: 60,
                client_id: ByteString::from_static("12345"),
                last_will: None,
                username: Some(ByteString::from_static("user")),
                password: Some(Bytes::from_static(b"pass")),
            })),
            &b"\x10\x1D\x00\x04MQTT\x04\xC0\x00\x3C\x00\
\x0512345\x00\x04user\x00\x04pass"[..]
        );

        assert_packet!(
            Packet::Connect(Box::new(Connect {
                clean_session: false,
                keep_alive: 60,
                client_id: ByteString::from_static("12345"),
                last_will: Some(LastWill {
                    qos: QoS::ExactlyOnce,
                    retain: false,
                    topic: ByteString::from_static("topic"),
                    message: Bytes::from_static(b"message"),
                }),
                username: None,
                password: None,
            })),
            &b"\x10\x21\x00\x04MQTT\x04\x14\x00\x3C\x00\
\x0512345\x00\x05topic\x00\x07message"[..]
        );

        assert_packet!(Packet::Disconnect, b"\xe0\x00");
    }

    #[test]
    fn test_encode_publish_packets() {
        assert_packet!(
            Packet::Publish(Publish {
                dup: true,
                retain: true,
                qos: QoS::ExactlyOnce,
                topic: ByteString::from_static("topic"),
                packet_id: NonZeroU16::new(0x4321),
                payload: Bytes::from_static(b"data"),
            }),
            b"\x3d\x0D\x00\x05topic\x43\x21data"
        );

        assert_packet!(
            Packet::Publish(Publish {
                dup: false,
                retain: false,
                qos: QoS::AtMostOnce,
                topic: ByteString::from_static("topic"),
                packet_id: None,
                payload: Bytes::from_static(b"data"),
            }),
            b"\x30\x0b\x00\x05topicdata"
        );
    }

    #[test]
    fn test_encode_subscribe_packets() {
        assert_packet!(
            Packet::Subscribe {
                packet_id: NonZeroU16::new(0x1234).unwrap(),
                topic_filters: vec![
                    (ByteString::from_static("test"), QoS::AtLeastOnce),
                    (ByteString::from_static("filter"), QoS::ExactlyOnce)
                ],
            },
            b"\x82\x12\x12\x34\x00\x04test\x01\x00\x06filter\x02"
        );

        assert_packet!(
            Packet::SubscribeAck {
                packet_id: NonZeroU16::new(0x1234).unwrap(),
                status: vec![
                    SubscribeReturnCode::Success(QoS::AtLeastOnce),
                    SubscribeReturnCode::Failure,
                    SubscribeReturnCode::Success(QoS::ExactlyOnce)
                ],
            },
            b"\x90\x05\x12\x34\x01\x80\x02"
        );

        assert_packet!(
            Packet::Unsubscribe {
                packet_id: NonZeroU16::new(0x1234).unwrap(),
                topic_filters: vec![
                    ByteString::from_static("test"),
                    ByteString::from_static("filter"),
                ],
            },
            b"\xa2\x10\x12\x34\x00\x04test\x00\x06filter"
        );

        assert_packet!(
            Packet::UnsubscribeAck { packet_id: NonZeroU16::new(0x4321).unwrap() },
            b"\xb0\x02\x43\x21"
        );
    }

    #[test]
    fn test_encode_ping_packets() {
        assert_packet!(Packet::PingRequest, b"\xc0\x00");
        assert_packet!(Packet::PingResponse, b"\xd0\x00");
    }
}
