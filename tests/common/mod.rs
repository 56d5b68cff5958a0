//! In-memory duplex transport and a broker-side endpoint, so the
//! client can be exercised against real wire bytes without a network.

use std::cmp;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use ntex_bytes::BytesMut;
use ntex_codec::{Decoder, Encoder};
use tinymq::codec::{Codec, Packet};
use tinymq::{Connection, ConnectionRead, ConnectionWrite};

const CLIENT_READ_TIMEOUT: Duration = Duration::from_millis(20);
const BROKER_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// One direction of the duplex pair.
struct Pipe {
    state: Mutex<PipeState>,
    cond: Condvar,
}

#[derive(Default)]
struct PipeState {
    buf: VecDeque<u8>,
    closed: bool,
}

impl Pipe {
    fn new() -> Arc<Self> {
        Arc::new(Pipe { state: Mutex::new(PipeState::default()), cond: Condvar::new() })
    }

    fn write(&self, bytes: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.buf.extend(bytes);
        self.cond.notify_all();
    }

    fn read(&self, out: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        while state.buf.is_empty() {
            if state.closed {
                return Ok(0);
            }
            let (guard, wait) = self.cond.wait_timeout(state, timeout).unwrap();
            state = guard;
            if wait.timed_out() && state.buf.is_empty() {
                if state.closed {
                    return Ok(0);
                }
                return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
            }
        }
        let n = cmp::min(out.len(), state.buf.len());
        for slot in out.iter_mut().take(n) {
            *slot = state.buf.pop_front().unwrap();
        }
        Ok(n)
    }

    fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.cond.notify_all();
    }
}

/// Client-side endpoint of the duplex pair.
pub struct DuplexConnection {
    inbound: Arc<Pipe>,
    outbound: Arc<Pipe>,
}

struct DuplexRead(Arc<Pipe>);

impl ConnectionRead for DuplexRead {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf, CLIENT_READ_TIMEOUT)
    }
}

struct DuplexWrite(Arc<Pipe>);

impl ConnectionWrite for DuplexWrite {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.0.write(buf);
        Ok(())
    }

    fn close(&mut self) {
        self.0.close();
    }
}

impl Connection for DuplexConnection {
    fn split(self: Box<Self>) -> io::Result<(Box<dyn ConnectionRead>, Box<dyn ConnectionWrite>)> {
        Ok((Box::new(DuplexRead(self.inbound)), Box::new(DuplexWrite(self.outbound))))
    }
}

/// Broker-side endpoint: reads the client's frames and answers with
/// scripted packets, through the same codec the client uses.
pub struct BrokerEnd {
    inbound: Arc<Pipe>,
    outbound: Arc<Pipe>,
    codec: Codec,
    buf: BytesMut,
}

impl BrokerEnd {
    /// Next frame sent by the client. Panics if none arrives in time.
    pub fn recv(&mut self) -> Packet {
        self.try_recv().expect("timed out waiting for a client packet")
    }

    /// Next frame sent by the client, or `None` on timeout.
    pub fn try_recv(&mut self) -> Option<Packet> {
        let mut scratch = [0u8; 1024];
        loop {
            if let Some(packet) = self.codec.decode(&mut self.buf).unwrap() {
                return Some(packet);
            }
            match self.inbound.read(&mut scratch, BROKER_READ_TIMEOUT) {
                Ok(0) => return None,
                Ok(n) => self.buf.extend_from_slice(&scratch[..n]),
                Err(_) => return None,
            }
        }
    }

    pub fn send(&self, packet: Packet) {
        let mut buf = BytesMut::new();
        self.codec.encode(packet, &mut buf).unwrap();
        self.outbound.write(&buf);
    }

    /// Deliver raw bytes in one batch, e.g. two back-to-back frames.
    pub fn send_raw(&self, bytes: &[u8]) {
        self.outbound.write(bytes);
    }
}

/// Build a connected client/broker endpoint pair.
pub fn duplex() -> (DuplexConnection, BrokerEnd) {
    let client_to_broker = Pipe::new();
    let broker_to_client = Pipe::new();

    let conn = DuplexConnection {
        inbound: broker_to_client.clone(),
        outbound: client_to_broker.clone(),
    };
    let broker = BrokerEnd {
        inbound: client_to_broker,
        outbound: broker_to_client,
        codec: Codec::new(),
        buf: BytesMut::new(),
    };
    (conn, broker)
}

/// Route worker logs through the test harness when `RUST_LOG` is set.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Answer the CONNECT handshake with an accepting CONNACK.
pub fn accept_connect(broker: &mut BrokerEnd) {
    match broker.recv() {
        Packet::Connect(_) => {}
        other => panic!("expected CONNECT, got {:?}", other),
    }
    broker.send(Packet::ConnectAck {
        session_present: false,
        return_code: tinymq::codec::ConnectAckReason::ConnectionAccepted,
    });
}
