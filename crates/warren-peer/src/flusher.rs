//! # Session Flusher
//!
//! Emits otherwise-empty control packets when a queued ack or resend request
//! turns urgent. One worker per session. The outbound data path is expected
//! to drain control items as piggyback first — the flusher only fires on
//! links with nothing else to say.
//!
//! Modeled as a handle owning a background thread; dropping the handle shuts
//! the worker down.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use crate::clock::UrgencyClock;
use crate::session::{ControlBatch, PeerAddress, PeerSession};

/// An otherwise-empty packet carrying only control payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    pub address: PeerAddress,
    pub batch: ControlBatch,
}

/// Handle to a per-session flusher thread.
pub struct SessionFlusher {
    shutdown: Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SessionFlusher {
    /// Spawn the flusher worker. Urgent control batches are emitted on `out`;
    /// the worker polls at `poll_interval` granularity.
    pub fn spawn(
        session: Arc<Mutex<PeerSession>>,
        clock: Arc<dyn UrgencyClock>,
        out: Sender<ControlPacket>,
        poll_interval: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name("warren-flusher".into())
            .spawn(move || flusher_worker(session, clock, out, shutdown_rx, poll_interval))
            .expect("failed to spawn session flusher");
        SessionFlusher {
            shutdown: shutdown_tx,
            handle: Some(handle),
        }
    }
}

impl Drop for SessionFlusher {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn flusher_worker(
    session: Arc<Mutex<PeerSession>>,
    clock: Arc<dyn UrgencyClock>,
    out: Sender<ControlPacket>,
    shutdown: Receiver<()>,
    poll_interval: Duration,
) {
    loop {
        match shutdown.recv_timeout(poll_interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = clock.now_ms();
        let packet = {
            let Ok(mut session) = session.lock() else {
                break;
            };
            match session.next_urgent_at() {
                Some(urgent_at) if urgent_at <= now => {
                    let batch = session.control_batch(now);
                    let address = session.address();
                    (!batch.is_empty()).then_some(ControlPacket { address, batch })
                }
                _ => None,
            }
        };

        if let Some(packet) = packet {
            debug!(
                address = %packet.address,
                acks = packet.batch.acks.len(),
                resends = packet.batch.resend_requests.len(),
                "flushing urgent control packet"
            );
            if out.send(packet).is_err() {
                break; // consumer gone
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::Location;
    use bytes::Bytes;

    fn shared_session() -> Arc<Mutex<PeerSession>> {
        // First call per binary installs the test-writer subscriber.
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        Arc::new(Mutex::new(PeerSession::new(
            Location::new(0.5).unwrap(),
            "127.0.0.1:9100".parse().unwrap(),
        )))
    }

    #[test]
    fn flusher_emits_once_deadline_passes() {
        let session = shared_session();
        let clock = Arc::new(ManualClock::new());
        let (tx, rx) = bounded(8);

        let _flusher = SessionFlusher::spawn(
            Arc::clone(&session),
            Arc::clone(&clock) as Arc<dyn UrgencyClock>,
            tx,
            Duration::from_millis(1),
        );

        // In-order packet: one owed ack, no gaps.
        session.lock().unwrap().packet_received(0, 0);

        // Deadline (200 ms) not reached yet — nothing flushes.
        clock.set(150);
        assert!(rx.recv_timeout(Duration::from_millis(30)).is_err());

        clock.set(200);
        let packet = rx
            .recv_timeout(Duration::from_millis(500))
            .expect("flusher should emit at the deadline");
        assert_eq!(packet.batch.acks, vec![0]);
        assert!(packet.batch.resend_requests.is_empty());
        assert!(session.lock().unwrap().next_urgent_at().is_none());
    }

    #[test]
    fn flusher_stays_quiet_without_pending_items() {
        let session = shared_session();
        let clock = Arc::new(ManualClock::at(10_000));
        let (tx, rx) = bounded(8);

        let _flusher = SessionFlusher::spawn(
            Arc::clone(&session),
            clock as Arc<dyn UrgencyClock>,
            tx,
            Duration::from_millis(1),
        );

        assert!(rx.recv_timeout(Duration::from_millis(30)).is_err());
        // Sends alone queue nothing urgent.
        session
            .lock()
            .unwrap()
            .sent(0, Bytes::from_static(b"x"))
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(30)).is_err());
    }
}
