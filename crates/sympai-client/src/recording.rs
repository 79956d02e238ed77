//! Recording session — single-shot transcript capture.
//!
//! One activation produces at most one transcript. Activating while a
//! capture is already running is rejected; the provider does not support
//! concurrent sessions.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sympai_core::types::CaptureId;
use sympai_providers::RecognitionProvider;

/// Result of one capture activation, tagged with its handle.
#[derive(Debug)]
pub struct CaptureResult {
    pub capture: CaptureId,
    pub transcript: Result<String, String>,
}

struct ActiveCapture {
    id: CaptureId,
    cancel: CancellationToken,
}

pub struct RecordingSession {
    provider: Arc<dyn RecognitionProvider>,
    result_tx: mpsc::UnboundedSender<CaptureResult>,
    active: Option<ActiveCapture>,
}

impl RecordingSession {
    pub fn new(
        provider: Arc<dyn RecognitionProvider>,
        result_tx: mpsc::UnboundedSender<CaptureResult>,
    ) -> Self {
        Self {
            provider,
            result_tx,
            active: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Activate the provider. Returns false (and does nothing) when a
    /// capture is already running.
    pub fn begin(&mut self, audio: Option<PathBuf>) -> bool {
        if self.active.is_some() {
            debug!("Capture already active, activation rejected");
            return false;
        }

        let id = CaptureId::new();
        let cancel = CancellationToken::new();
        debug!(%id, "Starting capture");

        let provider = self.provider.clone();
        let result_tx = self.result_tx.clone();
        let child = cancel.clone();
        tokio::spawn(async move {
            let transcript = provider
                .transcribe(audio.as_deref(), child)
                .await
                .map_err(|e| e.to_string());
            let _ = result_tx.send(CaptureResult {
                capture: id,
                transcript,
            });
        });

        self.active = Some(ActiveCapture { id, cancel });
        true
    }

    /// Close the session for `capture`. Returns false when the result is
    /// stale (from a superseded activation) and must be ignored.
    pub fn finish(&mut self, capture: CaptureId) -> bool {
        match &self.active {
            Some(active) if active.id == capture => {
                self.active = None;
                true
            }
            _ => {
                debug!(%capture, "Dropping stale capture result");
                false
            }
        }
    }

    /// Abort any in-flight capture.
    pub fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            debug!(id = %active.id, "Cancelling capture");
            active.cancel.cancel();
        }
    }
}
