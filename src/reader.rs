//! Transport reader worker.

use std::io;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, TryRecvError};
use ntex_bytes::BytesMut;
use ntex_codec::Decoder;

use crate::codec::Codec;
use crate::connection::ConnectionRead;
use crate::shared::MqttShared;
use crate::worker::Worker;

const SCRATCH_SIZE: usize = 4096;

/// Start the thread that drains the transport for the lifetime of the
/// connection, slicing arriving bytes into packets for the queue.
pub(crate) fn spawn(io: Box<dyn ConnectionRead>, shared: Arc<MqttShared>) -> Worker {
    let (tx, rx) = Worker::channel();
    let handle = thread::Builder::new()
        .name("mqtt-reader".into())
        .spawn(move || run(io, shared, rx))
        .expect("failed to spawn transport reader");
    Worker::new(tx, handle)
}

fn run(mut io: Box<dyn ConnectionRead>, shared: Arc<MqttShared>, stop: Receiver<()>) {
    let codec = Codec::new();
    let mut buf = BytesMut::with_capacity(SCRATCH_SIZE);
    let mut scratch = [0u8; SCRATCH_SIZE];

    log::debug!("Transport reader started");
    loop {
        if !matches!(stop.try_recv(), Err(TryRecvError::Empty)) {
            break;
        }
        match io.read(&mut scratch) {
            Ok(0) => {
                log::debug!("Connection closed by peer");
                shared.set_connected(false);
                break;
            }
            Ok(n) => {
                buf.extend_from_slice(&scratch[..n]);
                // a single read may carry several back-to-back frames
                loop {
                    match codec.decode(&mut buf) {
                        Ok(Some(packet)) => shared.queue().push(packet),
                        Ok(None) => break,
                        Err(err) => {
                            // framing has drifted and cannot resync;
                            // pending waiters fail by timeout and the
                            // keep-alive monitor escalates
                            log::error!("Frame decode failed, stopping reader: {}", err);
                            shared.note_decode_failure();
                            shared.set_connected(false);
                            return;
                        }
                    }
                }
            }
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut
                    || err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                log::error!("Transport read failed: {}", err);
                shared.set_connected(false);
                break;
            }
        }
    }
    log::debug!("Transport reader stopped");
}
