use futures_util::StreamExt;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::pipeline::types::PushEvent;

const PUSH_BUFFER: usize = 32;

/// Push events for one job. Dropping it closes the socket.
pub struct PushSubscription {
    rx: mpsc::Receiver<PushEvent>,
    task: Option<JoinHandle<()>>,
}

impl PushSubscription {
    /// Wraps an existing channel; used by scripted backends.
    #[cfg(test)]
    pub fn from_channel(rx: mpsc::Receiver<PushEvent>) -> Self {
        Self { rx, task: None }
    }

    /// `None` once the source has gone away.
    pub async fn recv(&mut self) -> Option<PushEvent> {
        self.rx.recv().await
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Connects to the pipeline's WebSocket and forwards events for `job_id`.
/// Connection failures end the subscription; the tracker keeps polling.
pub fn subscribe_ws(url: String, job_id: String) -> PushSubscription {
    let (tx, rx) = mpsc::channel(PUSH_BUFFER);
    let task = tokio::spawn(async move {
        let (mut socket, _) = match connect_async(url.as_str()).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(%url, error = %e, "pipeline websocket unavailable; polling only");
                return;
            }
        };
        info!(%url, %job_id, "pipeline websocket connected");

        while let Some(msg) = socket.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, "pipeline websocket error");
                    break;
                }
            };
            let event: PushEvent = match serde_json::from_str(&text) {
                Ok(ev) => ev,
                Err(e) => {
                    debug!(error = %e, "ignoring malformed push message");
                    continue;
                }
            };
            if !event.is_for(&job_id) {
                continue;
            }
            debug!(kind = %event.kind, %job_id, timestamp = ?event.timestamp, "push event");
            if tx.send(event).await.is_err() {
                break;
            }
        }
        debug!(%job_id, "pipeline websocket closed");
    });
    PushSubscription {
        rx,
        task: Some(task),
    }
}
