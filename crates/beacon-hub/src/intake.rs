use std::sync::Arc;

use tokio::sync::mpsc;

use beacon_core::BroadcastRequest;
use serde_json::Value;

use crate::Hub;

/// Sending side of the broadcast intake. Cheap to clone; hand one to every
/// producer that wants to trigger a fan-out.
///
/// Publishing is fire-and-forget: it never blocks, and the caller gets no
/// delivery confirmation. A full intake queue drops the request with a warn.
#[derive(Clone)]
pub struct Publisher {
    tx: mpsc::Sender<BroadcastRequest>,
}

impl Publisher {
    pub fn publish(&self, channel: impl Into<String>, data: Option<Value>) {
        let request = BroadcastRequest {
            channel: channel.into(),
            data,
        };
        match self.tx.try_send(request) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(request)) => {
                tracing::warn!(channel = %request.channel, "broadcast intake full, dropping request");
            }
            Err(mpsc::error::TrySendError::Closed(request)) => {
                tracing::warn!(channel = %request.channel, "broadcast intake closed, dropping request");
            }
        }
    }
}

/// Create the bounded intake queue.
pub fn intake_channel(capacity: usize) -> (Publisher, mpsc::Receiver<BroadcastRequest>) {
    let (tx, rx) = mpsc::channel(capacity);
    (Publisher { tx }, rx)
}

/// Spawn the pump task that applies queued fan-out requests to the hub, one
/// at a time. Exits when every `Publisher` has been dropped.
pub fn spawn_intake(
    hub: Arc<Hub>,
    mut rx: mpsc::Receiver<BroadcastRequest>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let delivered = hub.fanout(&request.channel, request.data);
            tracing::debug!(channel = %request.channel, delivered, "broadcast applied");
        }
        tracing::info!("broadcast intake closed");
    })
}

/// Convenience: create the intake queue and start its pump.
pub fn start_intake(hub: Arc<Hub>, capacity: usize) -> (Publisher, tokio::task::JoinHandle<()>) {
    let (publisher, rx) = intake_channel(capacity);
    let handle = spawn_intake(hub, rx);
    (publisher, handle)
}
