//! Script stdout reader task.
//!
//! Drives a [`FramedRead`] over the child's stdout with [`FscpCodec`],
//! decodes every line into a [`Message`] and forwards it, in stream order,
//! to the owning session through an [`mpsc`] channel.
//!
//! Decoding is strict. The first malformed line, including one that is not
//! valid UTF-8, is forwarded as [`Inbound::Malformed`] and the reader stops:
//! nothing the child writes afterwards is processed. Blank lines are skipped.
//! End of stream closes the channel, which the session observes as
//! `recv() == None`.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol::codec::FscpCodec;
use crate::protocol::message::Message;
use crate::{AppError, Result};

/// Decoder error reported for a record that is not UTF-8.
pub const INVALID_UTF8: &str = "malformed record: invalid utf-8";

/// One unit of child output as seen by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A well-formed message.
    Message(Message),
    /// A record that could not be decoded; the reader has stopped.
    Malformed {
        /// The offending line (empty when it exceeded the length limit).
        raw: String,
        /// Decoder error description.
        error: String,
    },
    /// The stream failed at the I/O level; the reader has stopped.
    Failed(String),
}

/// Parse one line of child output.
///
/// Returns `Ok(None)` for blank lines.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] when the line is not a valid FSCP message.
pub fn parse_inbound_line(line: &str) -> Result<Option<Message>> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    Message::decode(line).map(Some)
}

/// Reader task: forwards decoded child output to `inbound_tx` until EOF,
/// the first malformed record, an I/O failure, or cancellation.
///
/// # Errors
///
/// Always returns `Ok(())`; failures are reported through the channel.
pub async fn run_reader<R>(
    session_id: String,
    stdout: R,
    inbound_tx: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, FscpCodec::new());

    loop {
        let item = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, "fscp reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => item,
        };

        let inbound = match item {
            None => {
                debug!(session_id, "fscp reader: EOF detected");
                break;
            }
            Some(Err(AppError::Protocol(error))) => Inbound::Malformed {
                raw: String::new(),
                error,
            },
            Some(Err(e)) => {
                warn!(session_id, error = %e, "fscp reader: IO error, stopping");
                Inbound::Failed(e.to_string())
            }
            Some(Ok(frame)) => match std::str::from_utf8(&frame) {
                Err(_) => {
                    let raw = String::from_utf8_lossy(&frame).into_owned();
                    warn!(session_id, raw_line = %raw, "fscp reader: record is not valid utf-8");
                    Inbound::Malformed {
                        raw,
                        error: INVALID_UTF8.to_owned(),
                    }
                }
                Ok(line) => match parse_inbound_line(line) {
                    Ok(Some(message)) => Inbound::Message(message),
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(session_id, error = %e, raw_line = %line, "fscp reader: malformed record");
                        let error = match e {
                            AppError::Protocol(msg) => msg,
                            other => other.to_string(),
                        };
                        Inbound::Malformed {
                            raw: line.to_owned(),
                            error,
                        }
                    }
                },
            },
        };

        let terminal = !matches!(inbound, Inbound::Message(_));
        if inbound_tx.send(inbound).await.is_err() {
            debug!(session_id, "fscp reader: session channel closed, stopping");
            break;
        }
        if terminal {
            break;
        }
    }

    Ok(())
}
