//! Active client set.
//!
//! Each registered client owns an unbounded outbound queue. Broadcasting only
//! enqueues, so a client whose socket is stalled never holds up the others.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::frame::{CloseNotice, Frame, Outbound};

pub type ClientId = Uuid;

/// Outcome of one broadcast pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
pub(crate) struct ClientRegistry {
    clients: HashMap<ClientId, mpsc::UnboundedSender<Outbound>>,
}

impl ClientRegistry {
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients.contains_key(id)
    }

    pub fn insert(&mut self, id: ClientId, tx: mpsc::UnboundedSender<Outbound>) {
        self.clients.insert(id, tx);
    }

    pub fn remove(&mut self, id: &ClientId) -> bool {
        self.clients.remove(id).is_some()
    }

    /// Enqueue `frame` for every member. A failed enqueue means the client is
    /// already on its way out; its own close handler will remove it.
    pub fn broadcast(&self, frame: &Frame) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for (id, tx) in &self.clients {
            if tx.send(Outbound::Frame(frame.clone())).is_ok() {
                report.delivered += 1;
            } else {
                debug!(client = %id, "Client queue closed, skipping broadcast");
                report.failed += 1;
            }
        }
        report
    }

    /// Send `notice` to every member and empty the set. Returns how many
    /// clients were registered.
    pub fn close_all(&mut self, notice: &CloseNotice) -> usize {
        let count = self.clients.len();
        for (id, tx) in self.clients.drain() {
            if tx.send(Outbound::Close(notice.clone())).is_err() {
                debug!(client = %id, "Client already gone during teardown");
            }
        }
        count
    }
}

/// A registered client, as seen by the code driving its socket.
///
/// Pull from [`ClientSession::recv`] and write each item to the socket; feed
/// everything read from the socket to `Multiplexer::forward`. When the socket
/// closes, call `Multiplexer::remove_client`.
///
/// The queue behind it is unbounded. A client that stops reading but keeps
/// its socket open grows it without limit until the socket finally closes,
/// so keep draining even when the socket write is slow.
#[derive(Debug)]
pub struct ClientSession {
    id: ClientId,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl ClientSession {
    pub(crate) fn new(id: ClientId, outbound: mpsc::UnboundedReceiver<Outbound>) -> Self {
        Self { id, outbound }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Next item for this client. `None` once the relay dropped the client.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.outbound.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(registry: &mut ClientRegistry) -> (ClientId, mpsc::UnboundedReceiver<Outbound>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.insert(id, tx);
        (id, rx)
    }

    #[test]
    fn broadcast_reaches_every_member() {
        let mut registry = ClientRegistry::default();
        let (_, mut a) = member(&mut registry);
        let (_, mut b) = member(&mut registry);

        let report = registry.broadcast(&Frame::text("ping"));
        assert_eq!(
            report,
            BroadcastReport {
                delivered: 2,
                failed: 0
            }
        );
        assert_eq!(a.try_recv().unwrap(), Outbound::Frame(Frame::text("ping")));
        assert_eq!(b.try_recv().unwrap(), Outbound::Frame(Frame::text("ping")));
    }

    #[test]
    fn failed_send_does_not_remove_member() {
        let mut registry = ClientRegistry::default();
        let (closed_id, closed_rx) = member(&mut registry);
        let (_, mut open_rx) = member(&mut registry);
        drop(closed_rx);

        let report = registry.broadcast(&Frame::text("state_changed"));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert!(registry.contains(&closed_id));
        assert_eq!(registry.len(), 2);
        assert!(open_rx.try_recv().is_ok());
    }

    #[test]
    fn close_all_notifies_and_empties() {
        let mut registry = ClientRegistry::default();
        let (_, mut a) = member(&mut registry);
        let (_, mut b) = member(&mut registry);

        assert_eq!(registry.close_all(&CloseNotice::upstream_lost()), 2);
        assert_eq!(registry.len(), 0);
        assert_eq!(
            a.try_recv().unwrap(),
            Outbound::Close(CloseNotice::upstream_lost())
        );
        assert_eq!(
            b.try_recv().unwrap(),
            Outbound::Close(CloseNotice::upstream_lost())
        );
        // Senders are dropped with the entries
        assert!(a.try_recv().is_err());
    }

    #[test]
    fn remove_is_idempotent() {
        let mut registry = ClientRegistry::default();
        let (id, _rx) = member(&mut registry);
        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));
        assert_eq!(registry.len(), 0);
    }
}
