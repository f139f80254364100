//! WebSocket subscriber for the push channel.
//!
//! Push events are hints. The subscriber forwards them into an mpsc channel;
//! the sync client renders them optimistically and polls sooner.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{HandoffError, Result};
use crate::wire::{ClientFrame, PushEvent, ServerFrame};

/// Connect to `ws_url`, join `session_id`, and forward events until `cancel`
/// fires or the socket closes. Leaves the room before returning.
pub async fn subscribe(
    ws_url: &str,
    session_id: Uuid,
    events: mpsc::Sender<PushEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    let (stream, _) = tokio_tungstenite::connect_async(ws_url)
        .await
        .map_err(|e| HandoffError::Transport(format!("push connect failed: {}", e)))?;
    let (mut write, mut read) = stream.split();

    send_frame(&mut write, &ClientFrame::JoinSession { session_id }).await?;
    tracing::debug!(session_id = %session_id, "Joined push topic");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = send_frame(&mut write, &ClientFrame::LeaveSession { session_id }).await;
                let _ = write.send(Message::Close(None)).await;
                tracing::debug!(session_id = %session_id, "Left push topic");
                break;
            }
            frame = read.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(t))) => t,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        return Err(HandoffError::Transport(format!("push socket error: {}", e)));
                    }
                };
                match serde_json::from_str::<ServerFrame>(&text) {
                    Ok(ServerFrame::Event(event)) => {
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(ServerFrame::Control(_)) => {}
                    Err(e) => tracing::debug!(error = %e, "Ignoring unrecognized push frame"),
                }
            }
        }
    }

    Ok(())
}

async fn send_frame<S>(write: &mut S, frame: &ClientFrame) -> Result<()>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = serde_json::to_string(frame).map_err(|e| HandoffError::Other(e.to_string()))?;
    write
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| HandoffError::Transport(format!("push send failed: {}", e)))
}
