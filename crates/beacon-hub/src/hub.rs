use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;

use beacon_core::{ClientId, HubError, ServerResponse};

/// Per-client record: the sending half of the client's outbound mailbox plus
/// the channels it currently belongs to.
struct ClientHandle {
    tx: mpsc::Sender<String>,
    channels: HashSet<String>,
}

/// Registry state behind a single lock. The per-client channel sets and the
/// channel → members index are redundant views of the same memberships and
/// must always agree, so every change to either goes through one critical
/// section.
#[derive(Default)]
struct HubState {
    clients: HashMap<ClientId, ClientHandle>,
    // Invariant: a channel entry never holds an empty member set.
    channels: HashMap<String, HashSet<ClientId>>,
}

/// The connection hub: authoritative registry of live connections and channel
/// subscriptions, and the fan-out engine.
///
/// Mutations are serialized by the write lock; fan-out snapshots membership
/// under the read lock and delivers after releasing it, so a slow or stalled
/// connection never blocks subscribe/unsubscribe/admit/retire. The lock is
/// never held across an await point.
pub struct Hub {
    state: RwLock<HubState>,
    mailbox_capacity: usize,
}

impl Hub {
    pub fn new(mailbox_capacity: usize) -> Self {
        Self {
            state: RwLock::new(HubState::default()),
            mailbox_capacity,
        }
    }

    /// Register a new connection: assigns its identity and creates its
    /// bounded outbound mailbox. The hub keeps the sending half; the caller
    /// hands the receiving half to the connection's writer.
    pub fn admit(&self) -> (ClientId, mpsc::Receiver<String>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.mailbox_capacity);
        let mut state = self.state.write();
        state.clients.insert(
            id.clone(),
            ClientHandle {
                tx,
                channels: HashSet::new(),
            },
        );
        let count = state.clients.len();
        drop(state);
        tracing::info!(client_id = %id, clients = count, "client admitted");
        (id, rx)
    }

    /// Remove a connection from the registry and from every channel it
    /// belonged to, deleting channels whose membership becomes empty.
    ///
    /// Idempotent: retiring an unknown client is a no-op, so the reader-side
    /// and saturation-side triggers may race freely. Dropping the handle
    /// drops the hub's sender, which closes the mailbox and lets the writer
    /// drain and terminate.
    pub fn retire(&self, id: &ClientId) {
        let mut state = self.state.write();
        let Some(handle) = state.clients.remove(id) else {
            return;
        };
        for channel in &handle.channels {
            let emptied = match state.channels.get_mut(channel) {
                Some(members) => {
                    members.remove(id);
                    members.is_empty()
                }
                None => false,
            };
            if emptied {
                state.channels.remove(channel);
            }
        }
        let count = state.clients.len();
        drop(state);
        tracing::info!(client_id = %id, clients = count, "client retired");
    }

    /// Add `id` to `channel`, creating the channel entry if absent.
    /// Idempotent; fails only if the client is not registered.
    pub fn subscribe(&self, id: &ClientId, channel: &str) -> Result<(), HubError> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let handle = state
            .clients
            .get_mut(id)
            .ok_or_else(|| HubError::NotRegistered { client: id.clone() })?;
        let added = handle.channels.insert(channel.to_owned());
        state
            .channels
            .entry(channel.to_owned())
            .or_default()
            .insert(id.clone());
        drop(guard);
        if added {
            tracing::info!(client_id = %id, channel = %channel, "subscribed");
        }
        Ok(())
    }

    /// Remove `id` from `channel`, deleting the channel entry if its
    /// membership becomes empty. Idempotent; unsubscribing from a channel the
    /// client never joined is a no-op success.
    pub fn unsubscribe(&self, id: &ClientId, channel: &str) -> Result<(), HubError> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let handle = state
            .clients
            .get_mut(id)
            .ok_or_else(|| HubError::NotRegistered { client: id.clone() })?;
        let removed = handle.channels.remove(channel);
        let emptied = match state.channels.get_mut(channel) {
            Some(members) => {
                members.remove(id);
                members.is_empty()
            }
            None => false,
        };
        if emptied {
            state.channels.remove(channel);
        }
        drop(guard);
        if removed {
            tracing::info!(client_id = %id, channel = %channel, "unsubscribed");
        }
        Ok(())
    }

    /// Deliver one `message` frame to every current member of `channel`.
    /// Returns the number of mailboxes the frame was enqueued into.
    ///
    /// Membership is snapshotted under the read lock and the lock released
    /// before any delivery attempt, so this never blocks on a slow consumer
    /// and never stalls concurrent registry operations. A member whose
    /// mailbox is full (or already closed) is retired; the retire call takes
    /// the lock fresh, nothing is held here.
    pub fn fanout(&self, channel: &str, data: Option<Value>) -> usize {
        let targets: Vec<(ClientId, mpsc::Sender<String>)> = {
            let state = self.state.read();
            let Some(members) = state.channels.get(channel) else {
                tracing::debug!(channel = %channel, "fanout to channel with no subscribers");
                return 0;
            };
            members
                .iter()
                .filter_map(|id| {
                    state
                        .clients
                        .get(id)
                        .map(|handle| (id.clone(), handle.tx.clone()))
                })
                .collect()
        };

        let frame = match serde_json::to_string(&ServerResponse::broadcast(channel, data)) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(channel = %channel, error = %err, "failed to serialize broadcast");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut stalled = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(client_id = %id, channel = %channel, "mailbox full, retiring client");
                    stalled.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => stalled.push(id),
            }
        }
        for id in stalled {
            self.retire(&id);
        }

        tracing::debug!(channel = %channel, delivered, "fanout complete");
        delivered
    }

    /// Enqueue a serialized frame into one client's mailbox, under the same
    /// backpressure policy as fan-out: a full mailbox is fatal for the
    /// client, which is retired before the error is returned.
    pub fn send_to(&self, id: &ClientId, frame: String) -> Result<(), HubError> {
        let tx = {
            let state = self.state.read();
            let handle = state
                .clients
                .get(id)
                .ok_or_else(|| HubError::NotRegistered { client: id.clone() })?;
            handle.tx.clone()
        };
        match tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(client_id = %id, "mailbox full, retiring client");
                self.retire(id);
                Err(HubError::MailboxFull { client: id.clone() })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(HubError::MailboxClosed { client: id.clone() })
            }
        }
    }

    pub fn is_registered(&self, id: &ClientId) -> bool {
        self.state.read().clients.contains_key(id)
    }

    pub fn client_count(&self) -> usize {
        self.state.read().clients.len()
    }

    pub fn channel_count(&self) -> usize {
        self.state.read().channels.len()
    }

    /// Current member count for a channel; 0 if the channel does not exist.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state
            .read()
            .channels
            .get(channel)
            .map_or(0, HashSet::len)
    }

    /// Channels a client currently belongs to, sorted. Empty if unknown.
    pub fn channels_of(&self, id: &ClientId) -> Vec<String> {
        let state = self.state.read();
        let mut channels: Vec<String> = state
            .clients
            .get(id)
            .map(|handle| handle.channels.iter().cloned().collect())
            .unwrap_or_default();
        channels.sort();
        channels
    }

    /// Checks that the two membership views agree in both directions and
    /// that no channel entry holds an empty member set.
    #[cfg(test)]
    fn views_consistent(&self) -> bool {
        let state = self.state.read();
        for (id, handle) in &state.clients {
            for channel in &handle.channels {
                let Some(members) = state.channels.get(channel) else {
                    return false;
                };
                if !members.contains(id) {
                    return false;
                }
            }
        }
        for (channel, members) in &state.channels {
            if members.is_empty() {
                return false;
            }
            for id in members {
                let Some(handle) = state.clients.get(id) else {
                    return false;
                };
                if !handle.channels.contains(channel) {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn hub() -> Hub {
        Hub::new(32)
    }

    #[test]
    fn admit_assigns_unique_ids() {
        let hub = hub();
        let (a, _rx_a) = hub.admit();
        let (b, _rx_b) = hub.admit();
        assert_ne!(a, b);
        assert_eq!(hub.client_count(), 2);
        assert!(hub.is_registered(&a));
    }

    #[test]
    fn retire_removes_client_and_closes_mailbox() {
        let hub = hub();
        let (id, mut rx) = hub.admit();
        hub.subscribe(&id, "alerts").unwrap();

        hub.retire(&id);

        assert_eq!(hub.client_count(), 0);
        assert_eq!(hub.channel_count(), 0);
        assert!(!hub.is_registered(&id));
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn retire_is_idempotent() {
        let hub = hub();
        let (id, _rx) = hub.admit();
        hub.retire(&id);
        hub.retire(&id);
        assert_eq!(hub.client_count(), 0);

        // Retiring something that never existed is also a no-op.
        hub.retire(&ClientId::new());
    }

    #[test]
    fn retire_keeps_channel_alive_for_remaining_members() {
        let hub = hub();
        let (a, _rx_a) = hub.admit();
        let (b, _rx_b) = hub.admit();
        hub.subscribe(&a, "alerts").unwrap();
        hub.subscribe(&b, "alerts").unwrap();

        hub.retire(&a);

        assert_eq!(hub.subscriber_count("alerts"), 1);
        assert!(hub.views_consistent());
    }

    #[test]
    fn subscribe_requires_registration() {
        let hub = hub();
        let ghost = ClientId::new();
        let err = hub.subscribe(&ghost, "alerts").unwrap_err();
        assert!(matches!(err, HubError::NotRegistered { .. }));
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn subscribe_is_idempotent() {
        let hub = hub();
        let (id, _rx) = hub.admit();
        hub.subscribe(&id, "alerts").unwrap();
        hub.subscribe(&id, "alerts").unwrap();

        assert_eq!(hub.subscriber_count("alerts"), 1);
        assert_eq!(hub.channels_of(&id), vec!["alerts".to_string()]);
        assert!(hub.views_consistent());
    }

    #[test]
    fn unsubscribe_is_idempotent_and_deletes_empty_channel() {
        let hub = hub();
        let (id, _rx) = hub.admit();
        hub.subscribe(&id, "alerts").unwrap();

        hub.unsubscribe(&id, "alerts").unwrap();
        assert_eq!(hub.channel_count(), 0);
        assert!(hub.channels_of(&id).is_empty());

        // Repeating, and leaving a channel never joined, are no-op successes.
        hub.unsubscribe(&id, "alerts").unwrap();
        hub.unsubscribe(&id, "never-joined").unwrap();
        assert!(hub.views_consistent());
    }

    #[test]
    fn views_stay_consistent_over_mixed_sequence() {
        let hub = hub();
        let (a, _rx_a) = hub.admit();
        let (b, _rx_b) = hub.admit();
        let (c, _rx_c) = hub.admit();

        hub.subscribe(&a, "alerts").unwrap();
        hub.subscribe(&a, "metrics").unwrap();
        hub.subscribe(&b, "alerts").unwrap();
        hub.subscribe(&c, "logs").unwrap();
        hub.unsubscribe(&a, "alerts").unwrap();
        hub.subscribe(&b, "logs").unwrap();
        hub.unsubscribe(&c, "logs").unwrap();
        hub.retire(&b);

        assert!(hub.views_consistent());
        assert_eq!(hub.channels_of(&a), vec!["metrics".to_string()]);
        assert_eq!(hub.subscriber_count("alerts"), 0);
        assert_eq!(hub.subscriber_count("logs"), 0);
        assert_eq!(hub.subscriber_count("metrics"), 1);
        assert_eq!(hub.channel_count(), 1);
    }

    #[test]
    fn fanout_delivers_one_message_per_member() {
        let hub = hub();
        let (a, mut rx_a) = hub.admit();
        let (b, mut rx_b) = hub.admit();
        let (_c, mut rx_c) = hub.admit();
        hub.subscribe(&a, "alerts").unwrap();
        hub.subscribe(&b, "alerts").unwrap();

        let delivered = hub.fanout("alerts", Some(serde_json::json!({"x": 1})));
        assert_eq!(delivered, 2);

        let frame = rx_a.try_recv().unwrap();
        assert!(frame.contains("\"action\":\"message\""));
        assert!(frame.contains("\"channel\":\"alerts\""));
        assert!(frame.contains("\"x\":1"));
        assert!(rx_a.try_recv().is_err(), "exactly one frame per member");

        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err(), "non-member got a frame");
    }

    #[test]
    fn fanout_to_empty_channel_is_noop() {
        let hub = hub();
        let (_id, _rx) = hub.admit();
        assert_eq!(hub.fanout("nobody-home", None), 0);
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn fanout_retires_saturated_member_but_delivers_to_the_rest() {
        let hub = Hub::new(1);
        let (slow, _rx_slow) = hub.admit();
        let (fast, mut rx_fast) = hub.admit();
        hub.subscribe(&slow, "alerts").unwrap();
        hub.subscribe(&fast, "alerts").unwrap();

        // Fill the slow client's single-slot mailbox.
        hub.fanout("alerts", None);
        rx_fast.try_recv().unwrap();

        let delivered = hub.fanout("alerts", None);
        assert_eq!(delivered, 1);
        assert!(rx_fast.try_recv().is_ok());

        assert!(!hub.is_registered(&slow));
        assert_eq!(hub.subscriber_count("alerts"), 1);
        assert!(hub.views_consistent());
    }

    #[test]
    fn send_to_full_mailbox_retires_client() {
        let hub = Hub::new(1);
        let (id, _rx) = hub.admit();
        hub.subscribe(&id, "alerts").unwrap();

        hub.send_to(&id, "first".into()).unwrap();
        let err = hub.send_to(&id, "second".into()).unwrap_err();

        assert!(matches!(err, HubError::MailboxFull { .. }));
        assert!(err.is_fatal_for_connection());
        assert!(!hub.is_registered(&id));
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn send_to_unknown_client() {
        let hub = hub();
        let err = hub.send_to(&ClientId::new(), "frame".into()).unwrap_err();
        assert!(matches!(err, HubError::NotRegistered { .. }));
    }

    #[tokio::test]
    async fn concurrent_retire_converges_on_one_removal() {
        let hub = Arc::new(Hub::new(32));
        let (id, _rx) = hub.admit();
        hub.subscribe(&id, "alerts").unwrap();

        let h1 = {
            let hub = Arc::clone(&hub);
            let id = id.clone();
            tokio::spawn(async move { hub.retire(&id) })
        };
        let h2 = {
            let hub = Arc::clone(&hub);
            let id = id.clone();
            tokio::spawn(async move { hub.retire(&id) })
        };
        let (r1, r2) = tokio::join!(h1, h2);
        r1.unwrap();
        r2.unwrap();

        assert_eq!(hub.client_count(), 0);
        assert_eq!(hub.channel_count(), 0);
        assert!(hub.views_consistent());
    }
}
