//! Packet identifier allocation.

use std::collections::HashSet;
use std::num::NonZeroU16;
use std::sync::Mutex;

/// Allocates identifiers for QoS 1 requests.
///
/// A wrapping counter that skips zero and any identifier still awaiting
/// its acknowledgement, so concurrent in-flight requests can never
/// share an id.
pub(crate) struct PacketIdAllocator {
    inner: Mutex<Inner>,
}

struct Inner {
    next: u16,
    in_flight: HashSet<NonZeroU16>,
}

impl PacketIdAllocator {
    pub(crate) fn new() -> Self {
        PacketIdAllocator { inner: Mutex::new(Inner { next: 0, in_flight: HashSet::new() }) }
    }

    /// Take the next free identifier and mark it in flight.
    pub(crate) fn alloc(&self) -> NonZeroU16 {
        let mut inner = self.inner.lock().unwrap();
        loop {
            inner.next = inner.next.wrapping_add(1);
            if let Some(id) = NonZeroU16::new(inner.next) {
                if inner.in_flight.insert(id) {
                    return id;
                }
            }
        }
    }

    /// Return an identifier once its request completed or gave up.
    pub(crate) fn release(&self, id: NonZeroU16) {
        self.inner.lock().unwrap().in_flight.remove(&id);
    }
}
