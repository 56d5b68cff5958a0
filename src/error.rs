use std::io;

use crate::codec::ConnectAckReason;

/// Errors which can occur when decoding an MQTT frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum DecodeError {
    #[error("Invalid protocol")]
    InvalidProtocol,
    #[error("Invalid length")]
    InvalidLength,
    #[error("Malformed packet")]
    MalformedPacket,
    #[error("Unsupported protocol level")]
    UnsupportedProtocolLevel,
    #[error("Connect frame's reserved flag is set")]
    ConnectReservedFlagSet,
    #[error("ConnectAck frame's reserved flag is set")]
    ConnAckReservedFlagSet,
    #[error("Unsupported packet type")]
    UnsupportedPacketType,
    #[error("Max size exceeded")]
    MaxSizeExceeded,
    #[error("utf8 error")]
    Utf8Error,
}

/// Errors which can occur when encoding an MQTT frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum EncodeError {
    #[error("Invalid length")]
    InvalidLength,
    #[error("Packet id is required")]
    PacketIdRequired,
}

/// Errors surfaced by client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Client has no active session
    #[error("Client is not connected")]
    NotConnected,
    /// Broker refused the connection
    #[error("{}", _0.reason())]
    ConnectionRefused(ConnectAckReason),
    /// Broker rejected the subscription
    #[error("Subscription rejected by broker")]
    SubscribeRejected,
    /// No matching acknowledgement arrived within the wait window
    #[error("Timed out waiting for acknowledgement")]
    AckTimeout,
    /// MQTT encoding error
    #[error("Encoding error: {}", _0)]
    Encode(#[from] EncodeError),
    /// Peer disconnect
    #[error("Peer is disconnected, error: {:?}", _0)]
    Disconnected(Option<io::Error>),
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        ClientError::Disconnected(Some(err))
    }
}

/// Fatal liveness failure reported by the keep-alive monitor.
///
/// The owning system is expected to restart the connection; the client
/// does not attempt in-place recovery.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeepAliveFailure {
    #[error("no ping response")]
    PingTimeout,
}
