// src/distribution/router.rs — Audience membership and fan-out
//
// The membership table is the only state shared across sessions. Fan-out
// clones the target senders under a read lock and sends after releasing it,
// so registrations never wait behind a broadcast and vice versa.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::protocol::OutboundMessage;
use crate::db::DataSink;

pub type ConnectionId = u64;

/// Per-connection state. `closed` is represented by removal from the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Membership {
    Unregistered,
    Unit { unit_id: String },
    ControlCenter { operator_id: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudienceCounts {
    pub units: usize,
    pub control_centers: usize,
    pub unregistered: usize,
}

struct Peer {
    membership: Membership,
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

pub struct DistributionRouter {
    next_id: AtomicU64,
    peers: RwLock<HashMap<ConnectionId, Peer>>,
    /// unit id → connection currently registered as that unit.
    units: RwLock<HashMap<String, ConnectionId>>,
    sink: Arc<dyn DataSink>,
}

impl DistributionRouter {
    pub fn new(sink: Arc<dyn DataSink>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            peers: RwLock::new(HashMap::new()),
            units: RwLock::new(HashMap::new()),
            sink,
        }
    }

    /// Add an unregistered connection. The receiver yields everything routed to it.
    pub fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<OutboundMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.write().insert(
            id,
            Peer {
                membership: Membership::Unregistered,
                tx,
            },
        );
        tracing::debug!(conn_id = id, "Connection opened");
        (id, rx)
    }

    /// Returns false if the connection is already closed.
    pub fn register_unit(&self, conn: ConnectionId, unit_id: &str) -> bool {
        let membership = Membership::Unit {
            unit_id: unit_id.to_string(),
        };
        if !self.set_membership(conn, membership) {
            return false;
        }
        let previous = self.units.write().insert(unit_id.to_string(), conn);
        if let Some(previous) = previous.filter(|p| *p != conn) {
            tracing::info!(unit_id, conn_id = conn, replaced = previous, "Unit moved to new connection");
            self.demote(previous, unit_id);
        }
        tracing::info!(unit_id, conn_id = conn, "Unit registered");
        true
    }

    /// Strip a stale connection of the unit identity another connection took over.
    fn demote(&self, conn: ConnectionId, unit_id: &str) {
        let tx = {
            let mut peers = self.peers.write();
            let Some(peer) = peers.get_mut(&conn) else {
                return;
            };
            if !matches!(&peer.membership, Membership::Unit { unit_id: held } if held == unit_id) {
                return;
            }
            peer.membership = Membership::Unregistered;
            peer.tx.clone()
        };
        let _ = tx.send(OutboundMessage::error(format!(
            "unit {unit_id} registered on another connection"
        )));
    }

    pub fn register_control_center(&self, conn: ConnectionId, operator_id: &str) -> bool {
        let membership = Membership::ControlCenter {
            operator_id: operator_id.to_string(),
        };
        if !self.set_membership(conn, membership) {
            return false;
        }
        tracing::info!(operator_id, conn_id = conn, "Control center registered");
        true
    }

    /// Replace a connection's membership, dropping any unit index it held.
    fn set_membership(&self, conn: ConnectionId, membership: Membership) -> bool {
        let previous = {
            let mut peers = self.peers.write();
            let Some(peer) = peers.get_mut(&conn) else {
                return false;
            };
            std::mem::replace(&mut peer.membership, membership)
        };
        if let Membership::Unit { unit_id } = previous {
            self.release_unit(&unit_id, conn);
        }
        true
    }

    /// Drop the unit index entry if it still points at `conn`.
    fn release_unit(&self, unit_id: &str, conn: ConnectionId) -> bool {
        let mut units = self.units.write();
        if units.get(unit_id) == Some(&conn) {
            units.remove(unit_id);
            true
        } else {
            false
        }
    }

    pub fn membership(&self, conn: ConnectionId) -> Option<Membership> {
        self.peers.read().get(&conn).map(|p| p.membership.clone())
    }

    /// The unit id a connection is registered as, if any.
    pub fn unit_of(&self, conn: ConnectionId) -> Option<String> {
        match self.membership(conn)? {
            Membership::Unit { unit_id } => Some(unit_id),
            _ => None,
        }
    }

    pub fn is_unit_connected(&self, unit_id: &str) -> bool {
        self.units.read().contains_key(unit_id)
    }

    /// Deliver to every current control center. Returns how many accepted it.
    pub fn broadcast_to_control_centers(&self, msg: OutboundMessage) -> usize {
        let targets: Vec<(ConnectionId, mpsc::UnboundedSender<OutboundMessage>)> = self
            .peers
            .read()
            .iter()
            .filter(|(_, p)| matches!(p.membership, Membership::ControlCenter { .. }))
            .map(|(id, p)| (*id, p.tx.clone()))
            .collect();

        let kind = msg.type_name();
        let mut delivered = 0;
        for (id, tx) in targets {
            if tx.send(msg.clone()).is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(conn_id = id, kind, "Control center went away mid-broadcast");
            }
        }
        tracing::debug!(kind, delivered, "Broadcast to control centers");
        delivered
    }

    /// Point-to-point delivery. Silently false if the unit is not connected.
    pub fn send_to_unit(&self, unit_id: &str, msg: OutboundMessage) -> bool {
        let Some(conn) = self.units.read().get(unit_id).copied() else {
            tracing::debug!(unit_id, kind = msg.type_name(), "Unit not connected, dropping");
            return false;
        };
        self.send_to_connection(conn, msg)
    }

    pub fn send_to_connection(&self, conn: ConnectionId, msg: OutboundMessage) -> bool {
        let tx = self.peers.read().get(&conn).map(|p| p.tx.clone());
        tx.is_some_and(|tx| tx.send(msg).is_ok())
    }

    /// Close a connection. A unit that has no other live connection is marked
    /// inactive in the store. Returns the membership it held.
    pub fn disconnect(&self, conn: ConnectionId) -> Option<Membership> {
        let peer = self.peers.write().remove(&conn)?;
        tracing::debug!(conn_id = conn, membership = ?peer.membership, "Connection closed");

        if let Membership::Unit { unit_id } = &peer.membership {
            if self.release_unit(unit_id, conn) {
                tracing::info!(unit_id = %unit_id, conn_id = conn, "Unit disconnected");
                let unit_id = unit_id.clone();
                self.persist("mark unit inactive", move |sink| async move {
                    sink.mark_unit_inactive(unit_id).await
                });
            }
        }
        Some(peer.membership)
    }

    pub fn counts(&self) -> AudienceCounts {
        let mut counts = AudienceCounts::default();
        for peer in self.peers.read().values() {
            match peer.membership {
                Membership::Unregistered => counts.unregistered += 1,
                Membership::Unit { .. } => counts.units += 1,
                Membership::ControlCenter { .. } => counts.control_centers += 1,
            }
        }
        counts
    }

    /// Best-effort write on a background task. Failures are logged and dropped.
    pub fn persist<F, Fut>(&self, what: &'static str, write: F)
    where
        F: FnOnce(Arc<dyn DataSink>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let fut = write(self.sink.clone());
        tokio::spawn(async move {
            if let Err(e) = fut.await {
                tracing::warn!("Store write failed ({what}): {e}");
            }
        });
    }
}
