//! Delivery dispatcher worker.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{select, Receiver};

use crate::codec::{Packet, Publish};
use crate::shared::MqttShared;
use crate::worker::Worker;

/// Pause after handing a packet back, so the correlation waiter it
/// belongs to can claim it instead of the dispatcher spinning.
const RING_PACE: Duration = Duration::from_millis(10);

/// Start the thread that owns all unsolicited inbound PUBLISH traffic.
pub(crate) fn spawn(shared: Arc<MqttShared>) -> Worker {
    let (tx, rx) = Worker::channel();
    let handle = thread::Builder::new()
        .name("mqtt-dispatcher".into())
        .spawn(move || run(shared, rx))
        .expect("failed to spawn delivery dispatcher");
    Worker::new(tx, handle)
}

fn run(shared: Arc<MqttShared>, stop: Receiver<()>) {
    log::debug!("Delivery dispatcher started");
    loop {
        let packet = select! {
            recv(shared.queue().receiver()) -> packet => match packet {
                Ok(packet) => packet,
                Err(_) => break,
            },
            recv(stop) -> _ => break,
        };

        match packet {
            Packet::Publish(publish) => deliver(&shared, publish),
            packet @ (Packet::ConnectAck { .. }
            | Packet::PublishAck { .. }
            | Packet::SubscribeAck { .. }
            | Packet::PingResponse) => {
                // an acknowledgement some correlation waiter expects
                shared.queue().push(packet);
                thread::sleep(RING_PACE);
            }
            packet => {
                // nothing on a client will ever claim these
                log::warn!(
                    "Discarding unexpected packet type {:#04x}",
                    packet.packet_type()
                );
            }
        }
    }
    log::debug!("Delivery dispatcher stopped");
}

/// Consume a PUBLISH: run the registered callback, then acknowledge.
fn deliver(shared: &MqttShared, publish: Publish) {
    let Publish { topic, payload, packet_id, .. } = publish;

    log::trace!("Received message on {:?} ({} bytes)", topic, payload.len());
    shared.dispatch_message(&topic, &payload);

    if let Some(packet_id) = packet_id {
        if let Err(err) = shared.send_packet(Packet::PublishAck { packet_id }) {
            log::error!("Failed to acknowledge publish {}: {}", packet_id, err);
        }
    }
}
