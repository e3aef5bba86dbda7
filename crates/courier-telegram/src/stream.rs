//! Streaming answer rendering.
//!
//! While a prompt is in flight the agent streams text deltas. The
//! renderer turns those into one Telegram message that is edited in
//! place: the first delta sends the message, later deltas edit it, and
//! edits are throttled so long answers do not hammer the API. The final
//! text is always rendered last; identical re-renders are skipped.

use std::sync::Arc;
use std::time::Duration;

use teloxide::types::{ChatId, MessageId, ThreadId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use courier_runtime::TextUpdateFn;

use crate::outbound::Outbound;

/// Renders a live-updating answer message for one prompt.
pub struct StreamRenderer {
    tx: Arc<watch::Sender<String>>,
    handle: JoinHandle<Option<MessageId>>,
}

impl StreamRenderer {
    /// Spawns the render task for one prompt.
    pub fn spawn(
        outbound: Outbound,
        chat_id: ChatId,
        thread_id: Option<ThreadId>,
        throttle: Duration,
    ) -> Self {
        let (tx, mut rx) = watch::channel(String::new());

        let handle = tokio::spawn(async move {
            let mut message_id: Option<MessageId> = None;
            let mut last_rendered = String::new();

            loop {
                let closed = rx.changed().await.is_err();
                let text = rx.borrow_and_update().clone();
                render_once(
                    &outbound,
                    chat_id,
                    thread_id,
                    &mut message_id,
                    &mut last_rendered,
                    &text,
                )
                .await;

                if closed {
                    break;
                }
                if !throttle.is_zero() {
                    // Updates arriving during the pause coalesce into the
                    // next render.
                    tokio::time::sleep(throttle).await;
                }
            }

            message_id
        });

        Self {
            tx: Arc::new(tx),
            handle,
        }
    }

    /// The callback to hand to the runtime; each call publishes the
    /// accumulated text to the render task.
    pub fn update_fn(&self) -> TextUpdateFn {
        let tx = Arc::clone(&self.tx);
        Arc::new(move |text: &str| {
            tx.send(text.to_string())
                .map_err(|_| "stream renderer closed".to_string())
        })
    }

    /// Publishes the final text, waits for the last render, and returns
    /// the rendered message id (if anything was ever sent).
    pub async fn finish(self, final_text: &str) -> Option<MessageId> {
        let _ = self.tx.send(final_text.to_string());
        drop(self.tx);

        match self.handle.await {
            Ok(message_id) => message_id,
            Err(join_error) => {
                warn!(error = %join_error, "stream renderer task failed");
                None
            }
        }
    }
}

async fn render_once(
    outbound: &Outbound,
    chat_id: ChatId,
    thread_id: Option<ThreadId>,
    message_id: &mut Option<MessageId>,
    last_rendered: &mut String,
    text: &str,
) {
    let normalized = normalize_text(text);
    if normalized == *last_rendered {
        return;
    }

    let result = match *message_id {
        None => outbound
            .send_text(chat_id, thread_id, &normalized)
            .await
            .map(|id| *message_id = Some(id)),
        Some(id) => outbound.edit_text(chat_id, id, &normalized).await,
    };

    match result {
        Ok(()) => *last_rendered = normalized,
        Err(error) => {
            warn!(chat_id = chat_id.0, error = %error, "stream render failed");
        }
    }
}

/// Telegram rejects empty message text; stand in with an ellipsis.
fn normalize_text(text: &str) -> String {
    if text.trim().is_empty() {
        "...".to_string()
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("hello"), "hello");
        assert_eq!(normalize_text("  hello  "), "  hello  ");
        assert_eq!(normalize_text(""), "...");
        assert_eq!(normalize_text("   \n"), "...");
    }
}
