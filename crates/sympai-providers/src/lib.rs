//! Provider abstraction for SympAI's external collaborators.
//!
//! Three capabilities are consumed as black boxes: the remote analysis
//! service (chunked text reply), a speech-recognition provider (one
//! transcript per activation), and a speech-synthesis provider (start/end
//! events per utterance, cancellable, no resumable pause). Each trait here
//! is the seam the coordinator tests against with scripted implementations.

use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sympai_core::types::{AnalyzeRequest, UtteranceId};

pub mod analysis;
pub mod recognition;
pub mod synthesis;

/// A chunked response body: opaque text fragments in arrival order.
pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send>>;

/// The remote analysis service.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Dispatch the request and return the chunked reply body.
    async fn stream(&self, request: &AnalyzeRequest) -> anyhow::Result<ChunkStream>;
}

/// Lifecycle notification for one synthesis utterance, tagged with the
/// handle of the utterance that produced it.
#[derive(Debug, Clone)]
pub enum UtteranceEvent {
    Started(UtteranceId),
    Ended(UtteranceId),
    Failed(UtteranceId, String),
}

impl UtteranceEvent {
    /// Handle of the utterance this event originated from.
    pub fn utterance(&self) -> UtteranceId {
        match self {
            Self::Started(id) | Self::Ended(id) | Self::Failed(id, _) => *id,
        }
    }
}

/// The speech-synthesis provider.
#[async_trait]
pub trait SynthesisProvider: Send + Sync {
    /// Speak `text` as one utterance.
    ///
    /// Lifecycle events are tagged with `id` and sent on `event_tx`; raw
    /// audio bytes go to `audio_tx`. Cancelling `cancel` stops the job
    /// mid-utterance, after which the job must emit no further events.
    async fn speak(
        &self,
        id: UtteranceId,
        text: String,
        event_tx: mpsc::UnboundedSender<UtteranceEvent>,
        audio_tx: mpsc::UnboundedSender<Vec<u8>>,
        cancel: CancellationToken,
    );
}

/// The speech-recognition provider.
#[async_trait]
pub trait RecognitionProvider: Send + Sync {
    /// Capture exactly one transcript.
    ///
    /// `audio` points at a recorded clip for providers that transcribe
    /// files; providers that capture live audio ignore it. Returns the
    /// transcript text, or an error when the provider yields no result.
    async fn transcribe(
        &self,
        audio: Option<&Path>,
        cancel: CancellationToken,
    ) -> anyhow::Result<String>;
}
