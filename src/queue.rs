//! Shared inbound packet queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::codec::Packet;

pub(crate) const QUEUE_CAPACITY: usize = 100;

/// Bounded FIFO the transport reader feeds and every waiter drains.
///
/// A packet lives in exactly one place at a time: the queue, or the
/// consumer that dequeued it. A consumer either drops the packet or
/// puts it back at the tail unchanged, never both.
#[derive(Clone)]
pub(crate) struct InboundQueue {
    tx: Sender<Packet>,
    rx: Receiver<Packet>,
    dropped: Arc<AtomicU64>,
}

impl InboundQueue {
    pub(crate) fn new() -> Self {
        let (tx, rx) = bounded(QUEUE_CAPACITY);
        InboundQueue { tx, rx, dropped: Arc::new(AtomicU64::new(0)) }
    }

    /// Non-blocking enqueue at the tail, used both for fresh packets
    /// from the transport reader and for re-enqueued mismatches.
    ///
    /// Overflow drops the packet; a pending correlation that loses its
    /// acknowledgement this way recovers through its own timeout/retry.
    /// The drop is counted and logged, never silent.
    pub(crate) fn push(&self, packet: Packet) {
        if let Err(TrySendError::Full(packet)) = self.tx.try_send(packet) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "Inbound queue full, dropping packet type {:#04x}",
                packet.packet_type()
            );
        }
    }

    /// Blocking dequeue with a bounded wait.
    pub(crate) fn recv_timeout(&self, timeout: Duration) -> Result<Packet, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Raw receiver handle, for selecting against a shutdown channel.
    pub(crate) fn receiver(&self) -> &Receiver<Packet> {
        &self.rx
    }

    /// Number of packets discarded because the queue was full.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
