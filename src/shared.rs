//! Connection state shared between the client facade and its workers.

use std::num::NonZeroU16;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use ntex_bytes::BytesMut;
use ntex_codec::Encoder;

use crate::codec::{Codec, Packet};
use crate::connection::ConnectionWrite;
use crate::error::{ClientError, KeepAliveFailure};
use crate::inflight::PacketIdAllocator;
use crate::queue::InboundQueue;

/// Total send+await attempts per request before it is a hard failure.
pub(crate) const ACK_ATTEMPTS: u32 = 3;

/// Slice of the wait budget spent blocked on the queue at a time, so a
/// waiter notices a torn-down connection promptly.
const WAIT_SLICE: Duration = Duration::from_millis(250);

pub(crate) type MessageHandler = Box<dyn Fn(&str, &[u8]) + Send>;
pub(crate) type FailureHandler = Box<dyn Fn(KeepAliveFailure) + Send>;

/// Callbacks registered by the application. They outlive any single
/// session, so a handler registered after `connect` still applies.
#[derive(Default)]
pub(crate) struct Handlers {
    pub(crate) on_message: Mutex<Option<MessageHandler>>,
    pub(crate) on_failure: Mutex<Option<FailureHandler>>,
}

/// Expected acknowledgement for an in-flight request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum AckType {
    Connect,
    Publish(NonZeroU16),
    Subscribe(NonZeroU16),
    Ping,
}

impl AckType {
    fn is_match(&self, pkt: &Packet) -> bool {
        match (self, pkt) {
            (AckType::Connect, Packet::ConnectAck { .. }) => true,
            (AckType::Publish(id), Packet::PublishAck { packet_id }) => packet_id == id,
            (AckType::Subscribe(id), Packet::SubscribeAck { packet_id, .. }) => packet_id == id,
            (AckType::Ping, Packet::PingResponse) => true,
            _ => false,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            AckType::Connect => "CONNACK",
            AckType::Publish(_) => "PUBACK",
            AckType::Subscribe(_) => "SUBACK",
            AckType::Ping => "PINGRESP",
        }
    }
}

struct WriteState {
    io: Box<dyn ConnectionWrite>,
    codec: Codec,
    buf: BytesMut,
}

/// State shared by the client facade and the three background workers.
///
/// Workers hold a non-owning `Arc` back-reference; they are spawned
/// with and stopped alongside the session that created them.
pub(crate) struct MqttShared {
    write: Mutex<WriteState>,
    queue: InboundQueue,
    ids: PacketIdAllocator,
    handlers: Arc<Handlers>,
    connected: AtomicBool,
    decode_failures: AtomicU64,
    ack_timeout: Duration,
}

impl MqttShared {
    pub(crate) fn new(
        io: Box<dyn ConnectionWrite>,
        handlers: Arc<Handlers>,
        ack_timeout: Duration,
    ) -> Self {
        MqttShared {
            write: Mutex::new(WriteState {
                io,
                codec: Codec::new(),
                buf: BytesMut::with_capacity(512),
            }),
            queue: InboundQueue::new(),
            ids: PacketIdAllocator::new(),
            handlers,
            connected: AtomicBool::new(false),
            decode_failures: AtomicU64::new(0),
            ack_timeout,
        }
    }

    pub(crate) fn queue(&self) -> &InboundQueue {
        &self.queue
    }

    pub(crate) fn alloc_packet_id(&self) -> NonZeroU16 {
        self.ids.alloc()
    }

    pub(crate) fn release_packet_id(&self, id: NonZeroU16) {
        self.ids.release(id);
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub(crate) fn note_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    pub(crate) fn dropped_packets(&self) -> u64 {
        self.queue.dropped()
    }

    /// Encode a packet and write the whole frame to the transport.
    ///
    /// Frame writes from different threads are serialized here; a short
    /// write surfaces as an `io::Error` from `write_all`.
    pub(crate) fn send_packet(&self, packet: Packet) -> Result<(), ClientError> {
        let mut write = self.write.lock().unwrap();
        let WriteState { io, codec, buf } = &mut *write;

        log::trace!("Sending packet type {:#04x}", packet.packet_type());
        if let Err(err) = codec.encode(packet, buf) {
            buf.clear();
            return Err(ClientError::Encode(err));
        }
        let len = buf.len();
        let frame = buf.split_to(len);
        io.write_all(&frame).map_err(|err| ClientError::Disconnected(Some(err)))
    }

    /// Wait for the acknowledgement matching `ack`, within the
    /// configured timeout.
    ///
    /// Every packet dequeued meanwhile that is not the expected one is
    /// put back at the tail, so the waiter it belongs to (or the
    /// delivery dispatcher, for unsolicited PUBLISH traffic) eventually
    /// sees it.
    pub(crate) fn await_ack(&self, ack: AckType) -> Result<Packet, ClientError> {
        let deadline = Instant::now() + self.ack_timeout;
        loop {
            if ack != AckType::Connect && !self.is_connected() {
                return Err(ClientError::Disconnected(None));
            }
            let now = Instant::now();
            if now >= deadline {
                log::debug!("Timed out waiting for {}", ack.name());
                return Err(ClientError::AckTimeout);
            }
            let wait = std::cmp::min(deadline - now, WAIT_SLICE);
            match self.queue.recv_timeout(wait) {
                Ok(pkt) if ack.is_match(&pkt) => {
                    log::trace!("Matched {}", ack.name());
                    return Ok(pkt);
                }
                Ok(pkt) => {
                    // not ours, hand it back for another waiter
                    self.queue.push(pkt);
                    thread::yield_now();
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ClientError::Disconnected(None));
                }
            }
        }
    }

    /// One full liveness probe: PINGREQ, then the correlated PINGRESP,
    /// with the engine's usual attempt budget.
    pub(crate) fn ping(&self) -> Result<(), ClientError> {
        with_attempts("Ping", || {
            if !self.is_connected() {
                return Err(ClientError::Disconnected(None));
            }
            self.send_packet(Packet::PingRequest)?;
            self.await_ack(AckType::Ping).map(|_| ())
        })
    }

    pub(crate) fn dispatch_message(&self, topic: &str, payload: &[u8]) {
        if let Some(handler) = self.handlers.on_message.lock().unwrap().as_ref() {
            handler(topic, payload);
        }
    }

    pub(crate) fn notify_failure(&self, failure: KeepAliveFailure) {
        if let Some(handler) = self.handlers.on_failure.lock().unwrap().as_ref() {
            handler(failure);
        }
    }

    /// Close the transport write half (and, for stream sockets, the
    /// read half with it).
    pub(crate) fn close(&self) {
        self.write.lock().unwrap().io.close();
    }
}

/// Run `op` up to [`ACK_ATTEMPTS`] times, returning the first success
/// or the last error.
pub(crate) fn with_attempts<T>(
    what: &str,
    mut op: impl FnMut() -> Result<T, ClientError>,
) -> Result<T, ClientError> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempts < ACK_ATTEMPTS => {
                log::debug!("{} attempt {} failed: {}", what, attempts, err);
            }
            Err(err) => return Err(err),
        }
    }
}
