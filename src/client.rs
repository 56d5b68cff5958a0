//! MQTT client facade.

use std::sync::Arc;
use std::time::Duration;

use ntex_bytes::{ByteString, Bytes};
use serde::{Deserialize, Serialize};

use crate::codec::{Connect, ConnectAckReason, Packet, Publish, QoS, SubscribeReturnCode};
use crate::connection::Connection;
use crate::error::{ClientError, KeepAliveFailure};
use crate::shared::{with_attempts, AckType, Handlers, MqttShared, ACK_ATTEMPTS};
use crate::worker::Worker;
use crate::{dispatcher, keepalive, reader};

/// Session options carried in the CONNECT handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// Client identifier, unique per broker.
    pub client_id: String,
    /// Liveness probe period in seconds; zero disables the probe. The
    /// broker is asked to allow twice this before expiring the session,
    /// so a single late probe is not fatal on the broker side.
    pub keep_alive: u16,
    /// Ask the broker to discard any previous session state.
    pub clean_session: bool,
    /// How long one request waits for its acknowledgement before the
    /// correlation engine retries it.
    pub ack_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions {
            client_id: String::new(),
            keep_alive: 60,
            clean_session: false,
            ack_timeout: Duration::from_secs(5),
        }
    }
}

impl ConnectOptions {
    pub fn new<T: Into<String>>(client_id: T) -> Self {
        ConnectOptions { client_id: client_id.into(), ..Default::default() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Counters for conditions the client survives but must not hide.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Inbound packets dropped because the shared queue was full.
    pub dropped_packets: u64,
    /// Frame decode failures; each one stops that session's reader,
    /// and pending operations fail by timeout.
    pub decode_failures: u64,
}

struct Session {
    shared: Arc<MqttShared>,
    reader: Worker,
    keepalive: Option<Worker>,
    dispatcher: Worker,
}

/// MQTT v3.1.1 client.
///
/// `connect` owns the lifecycle of three background threads (transport
/// reader, keep-alive monitor, delivery dispatcher) sharing one
/// connection. `publish` and `subscribe` may be called from the owning
/// thread while the workers run; the client does not serialize calls
/// from several caller threads beyond framing, that coordination stays
/// with the caller.
pub struct Client {
    options: ConnectOptions,
    state: ConnectionState,
    session: Option<Session>,
    handlers: Arc<Handlers>,
}

impl Client {
    pub fn new(options: ConnectOptions) -> Self {
        Client {
            options,
            state: ConnectionState::Disconnected,
            session: None,
            handlers: Arc::new(Handlers::default()),
        }
    }

    /// Register the callback invoked, on the dispatcher thread, for
    /// every message received on a subscribed topic.
    ///
    /// The callback must not block indefinitely; message delivery and
    /// acknowledgements stall while it runs.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&str, &[u8]) + Send + 'static,
    {
        *self.handlers.on_message.lock().unwrap() = Some(Box::new(handler));
    }

    /// Register the callback invoked when the keep-alive monitor
    /// declares the connection dead. The surrounding system decides how
    /// to restart; the client does not reconnect on its own.
    pub fn on_keepalive_failure<F>(&self, handler: F)
    where
        F: Fn(KeepAliveFailure) + Send + 'static,
    {
        *self.handlers.on_failure.lock().unwrap() = Some(Box::new(handler));
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
            && self.session.as_ref().is_some_and(|s| s.shared.is_connected())
    }

    /// Counters of the current session; zeroes when disconnected.
    pub fn stats(&self) -> ClientStats {
        match &self.session {
            Some(session) => ClientStats {
                dropped_packets: session.shared.dropped_packets(),
                decode_failures: session.shared.decode_failures(),
            },
            None => ClientStats::default(),
        }
    }

    /// Establish an MQTT session over `conn`.
    ///
    /// Any previous session is torn down first; its queue and workers
    /// are never reused. On any failure along the way the transport is
    /// closed again and the error returned, restart policy is the
    /// caller's.
    pub fn connect(&mut self, conn: Box<dyn Connection>) -> Result<(), ClientError> {
        self.teardown();
        self.state = ConnectionState::Connecting;
        match self.establish(conn) {
            Ok(session) => {
                self.session = Some(session);
                self.state = ConnectionState::Connected;
                log::debug!("Connection established");
                Ok(())
            }
            Err(err) => {
                self.state = ConnectionState::Disconnected;
                Err(err)
            }
        }
    }

    fn establish(&mut self, conn: Box<dyn Connection>) -> Result<Session, ClientError> {
        let (read_half, write_half) = conn.split()?;
        let shared = Arc::new(MqttShared::new(
            write_half,
            self.handlers.clone(),
            self.options.ack_timeout,
        ));
        let reader = reader::spawn(read_half, shared.clone());

        if let Err(err) = self.handshake(&shared) {
            reader.stop();
            shared.close();
            return Err(err);
        }
        shared.set_connected(true);

        let keepalive = if self.options.keep_alive > 0 {
            let period = Duration::from_secs(u64::from(self.options.keep_alive));
            Some(keepalive::spawn(shared.clone(), period))
        } else {
            None
        };
        let dispatcher = dispatcher::spawn(shared.clone());

        Ok(Session { shared, reader, keepalive, dispatcher })
    }

    fn handshake(&self, shared: &MqttShared) -> Result<(), ClientError> {
        let connect = Connect {
            clean_session: self.options.clean_session,
            keep_alive: self.options.keep_alive.saturating_mul(2),
            last_will: None,
            client_id: ByteString::from(self.options.client_id.clone()),
            username: None,
            password: None,
        };

        let ack = with_attempts("Connect", || {
            shared.send_packet(Packet::Connect(Box::new(connect.clone())))?;
            shared.await_ack(AckType::Connect)
        })?;

        if let Packet::ConnectAck { session_present, return_code } = ack {
            log::debug!(
                "Connection acknowledged: {} (session present: {})",
                return_code.reason(),
                session_present
            );
            if return_code != ConnectAckReason::ConnectionAccepted {
                return Err(ClientError::ConnectionRefused(return_code));
            }
        }
        Ok(())
    }

    /// Publish `payload` to `topic` at QoS 1.
    ///
    /// Retried up to 3 times, each attempt under a fresh packet
    /// identifier; a failure is local to this operation and does not
    /// tear the connection down.
    pub fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), ClientError> {
        let shared = self.shared()?;
        with_attempts("Publish", || {
            let packet_id = shared.alloc_packet_id();
            let publish = Publish {
                dup: false,
                retain,
                qos: QoS::AtLeastOnce,
                topic: ByteString::from(topic),
                packet_id: Some(packet_id),
                payload: Bytes::from(payload.to_vec()),
            };
            let result = shared
                .send_packet(Packet::Publish(publish))
                .and_then(|_| shared.await_ack(AckType::Publish(packet_id)));
            shared.release_packet_id(packet_id);
            result?;
            log::debug!("Message published to {} with id {:#06x}", topic, packet_id);
            Ok(())
        })
    }

    /// Subscribe to `topic` at QoS 1. Messages arrive through the
    /// callback registered with [`Client::on_message`].
    pub fn subscribe(&self, topic: &str) -> Result<(), ClientError> {
        let shared = self.shared()?;
        let ack = with_attempts("Subscribe", || {
            let packet_id = shared.alloc_packet_id();
            let subscribe = Packet::Subscribe {
                packet_id,
                topic_filters: vec![(ByteString::from(topic), QoS::AtLeastOnce)],
            };
            let result = shared
                .send_packet(subscribe)
                .and_then(|_| shared.await_ack(AckType::Subscribe(packet_id)));
            shared.release_packet_id(packet_id);
            if result.is_ok() {
                log::debug!("Subscribed to {} with id {:#06x}", topic, packet_id);
            }
            result
        })?;

        // a definitive rejection is not worth retrying
        if let Packet::SubscribeAck { status, .. } = ack {
            if status.iter().any(|code| *code == SubscribeReturnCode::Failure) {
                return Err(ClientError::SubscribeRejected);
            }
        }
        Ok(())
    }

    /// Send DISCONNECT on a best-effort basis, then unconditionally
    /// stop the workers, drop the queue and close the socket.
    ///
    /// Safe to call on an already-disconnected client.
    pub fn disconnect(&mut self) {
        if let Some(session) = &self.session {
            let mut attempts = 0;
            loop {
                attempts += 1;
                match session.shared.send_packet(Packet::Disconnect) {
                    Ok(()) => {
                        log::debug!("Disconnection requested");
                        break;
                    }
                    Err(err) if attempts < ACK_ATTEMPTS => {
                        log::debug!("Disconnect attempt {} failed: {}", attempts, err);
                    }
                    Err(err) => {
                        log::warn!("Failed to send DISCONNECT, cleaning up anyway: {}", err);
                        break;
                    }
                }
            }
        }
        self.teardown();
        self.state = ConnectionState::Disconnected;
    }

    /// Stop workers before releasing the queue and socket, so no worker
    /// touches a torn-down resource.
    fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            // signal the monitor before dropping the connected flag, so
            // an in-flight probe reads as teardown, not as a dead peer
            if let Some(keepalive) = session.keepalive.as_mut() {
                keepalive.signal();
            }
            session.shared.set_connected(false);
            if let Some(keepalive) = session.keepalive {
                keepalive.stop();
            }
            session.dispatcher.stop();
            session.reader.stop();
            session.shared.close();
        }
    }

    fn shared(&self) -> Result<&Arc<MqttShared>, ClientError> {
        match &self.session {
            Some(session) if self.state == ConnectionState::Connected => Ok(&session.shared),
            _ => Err(ClientError::NotConnected),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults() {
        let options = ConnectOptions::new("dev-1");
        assert_eq!(options.client_id, "dev-1");
        assert_eq!(options.keep_alive, 60);
        assert!(!options.clean_session);
        assert_eq!(options.ack_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_options_from_stored_config() {
        let options: ConnectOptions =
            serde_json::from_str(r#"{"client_id": "dev-2", "keep_alive": 30}"#).unwrap();
        assert_eq!(options.client_id, "dev-2");
        assert_eq!(options.keep_alive, 30);
        // unspecified fields fall back to defaults
        assert!(!options.clean_session);
        assert_eq!(options.ack_timeout, Duration::from_secs(5));
    }
}
