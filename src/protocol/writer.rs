//! Script stdin writer task.
//!
//! Receives host-originated [`Message`]s from an [`mpsc`] channel, encodes
//! each as one JSON line and writes it to the child's stdin. Messages are
//! written in the order they were queued.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol::message::Message;
use crate::{AppError, Result};

/// Writer task: encodes queued messages onto `stdin`.
///
/// Exits cleanly when `cancel` fires or every sender is dropped. Dropping
/// `stdin` on exit closes the child's input stream.
///
/// # Errors
///
/// Returns [`AppError::Io`]`("write failed: …")` if the child's stdin is
/// closed (typically because the script already exited). The receiver is
/// dropped with the task, so the session sees subsequent sends fail.
pub async fn run_writer<W>(
    session_id: String,
    mut stdin: W,
    mut msg_rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, "fscp writer: cancellation received, stopping");
                break;
            }

            msg = msg_rx.recv() => {
                let Some(message) = msg else {
                    debug!(session_id, "fscp writer: message channel closed, stopping");
                    break;
                };

                let mut bytes = message.encode().into_bytes();
                bytes.push(b'\n');

                let written = async {
                    stdin.write_all(&bytes).await?;
                    stdin.flush().await
                }
                .await;

                if let Err(e) = written {
                    warn!(session_id, error = %e, kind = message.kind().as_str(), "fscp writer: write to stdin failed");
                    return Err(AppError::Io(format!("write failed: {e}")));
                }
            }
        }
    }

    Ok(())
}
