use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::schedule::callback::JobEvent;
use crate::schedule::scheduler::JobManager;

/// `GET /events`: every job event as a JSON text frame.
pub async fn events(
    ws: WebSocketUpgrade,
    State(job_manager): State<Arc<JobManager>>,
) -> impl IntoResponse {
    // subscribe before the upgrade so nothing published in between is missed
    let rx = job_manager.subscribe();
    debug!(
        subscribers = job_manager.broadcaster().subscriber_count(),
        "Event subscriber connected"
    );
    ws.on_upgrade(move |socket| forward_events(socket, rx))
}

async fn forward_events(mut socket: WebSocket, mut rx: broadcast::Receiver<JobEvent>) {
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode job event: {}", e);
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged, dropping events");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("Event subscriber disconnected");
}
