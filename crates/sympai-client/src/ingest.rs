//! Stream ingestor — drains one chunked analysis reply into tagged events.

use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sympai_core::types::RequestId;
use sympai_providers::ChunkStream;

use crate::decode::ChunkDecoder;

/// Events produced while draining one analysis stream. Each carries the
/// handle of the request it belongs to; the coordinator drops events whose
/// handle no longer matches the active request.
#[derive(Debug)]
pub enum IngestEvent {
    /// A decoded text fragment, in arrival order.
    Chunk { request: RequestId, text: String },
    /// End-of-stream: the response buffer is complete and frozen.
    Done { request: RequestId },
    /// Transport error or failed dispatch: the buffer is abandoned.
    Failed { request: RequestId, message: String },
}

impl IngestEvent {
    pub fn request(&self) -> RequestId {
        match self {
            Self::Chunk { request, .. } | Self::Done { request } | Self::Failed { request, .. } => {
                *request
            }
        }
    }
}

/// Drain `stream` until end-of-stream, error, or cancellation.
///
/// Chunks are decoded with cross-boundary UTF-8 state and forwarded in
/// arrival order. Cancellation (the abandon policy for superseded requests)
/// stops reading and sends nothing further.
pub async fn run(
    request: RequestId,
    mut stream: ChunkStream,
    event_tx: mpsc::UnboundedSender<IngestEvent>,
    cancel: CancellationToken,
) {
    let mut decoder = ChunkDecoder::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%request, "Stream abandoned");
                return;
            }
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    let text = decoder.decode(&bytes);
                    if !text.is_empty() {
                        let _ = event_tx.send(IngestEvent::Chunk { request, text });
                    }
                }
                Some(Err(e)) => {
                    warn!(%request, %e, "Stream failed");
                    let _ = event_tx.send(IngestEvent::Failed {
                        request,
                        message: e.to_string(),
                    });
                    return;
                }
                None => {
                    let tail = decoder.finish();
                    if !tail.is_empty() {
                        let _ = event_tx.send(IngestEvent::Chunk { request, text: tail });
                    }
                    let _ = event_tx.send(IngestEvent::Done { request });
                    return;
                }
            }
        }
    }
}
