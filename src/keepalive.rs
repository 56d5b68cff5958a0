//! Keep-alive monitor worker.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::error::KeepAliveFailure;
use crate::shared::MqttShared;
use crate::worker::Worker;

/// Start the thread that probes broker liveness every `period`.
pub(crate) fn spawn(shared: Arc<MqttShared>, period: Duration) -> Worker {
    let (tx, rx) = Worker::channel();
    let handle = thread::Builder::new()
        .name("mqtt-keepalive".into())
        .spawn(move || run(shared, period, rx))
        .expect("failed to spawn keep-alive monitor");
    Worker::new(tx, handle)
}

fn run(shared: Arc<MqttShared>, period: Duration, stop: Receiver<()>) {
    log::debug!("Keep-alive monitor started, period {:?}", period);
    loop {
        match stop.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => break,
        }
        if let Err(err) = shared.ping() {
            // a probe aborted by teardown is not a liveness verdict
            if !matches!(stop.try_recv(), Err(TryRecvError::Empty)) {
                break;
            }
            // fatal for the connection; the monitor itself never
            // retries beyond the correlation engine's attempt budget
            log::error!("Keep-alive probe failed: {}", err);
            shared.set_connected(false);
            shared.notify_failure(KeepAliveFailure::PingTimeout);
        }
    }
    log::debug!("Keep-alive monitor stopped");
}
