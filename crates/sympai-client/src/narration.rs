//! Narration controller — owns the speech-synthesis lifecycle.
//!
//! Idle → Speaking → Idle. There is no resumable pause: the UI's "pause" is
//! a full stop, and a later play starts a brand-new utterance from the
//! first character of the stored snapshot. At most one utterance is active
//! at a time; events from cancelled utterances fail the handle check and
//! are dropped.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sympai_core::types::UtteranceId;
use sympai_providers::{SynthesisProvider, UtteranceEvent};

struct ActiveUtterance {
    id: UtteranceId,
    cancel: CancellationToken,
}

pub struct NarrationController {
    provider: Arc<dyn SynthesisProvider>,
    event_tx: mpsc::UnboundedSender<UtteranceEvent>,
    audio_tx: mpsc::UnboundedSender<Vec<u8>>,
    active: Option<ActiveUtterance>,
    speaking: bool,
}

impl NarrationController {
    pub fn new(
        provider: Arc<dyn SynthesisProvider>,
        event_tx: mpsc::UnboundedSender<UtteranceEvent>,
        audio_tx: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Self {
        Self {
            provider,
            event_tx,
            audio_tx,
            active: None,
            speaking: false,
        }
    }

    /// True iff an utterance is currently in the Started state.
    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Begin narrating `text`, cancelling any utterance already underway.
    ///
    /// `text` is an owned snapshot: later buffer mutation cannot change
    /// what is spoken. `speaking` flips on the provider's start event, not
    /// here.
    pub fn start(&mut self, text: String) {
        self.stop();

        let id = UtteranceId::new();
        let cancel = CancellationToken::new();
        debug!(%id, text_len = text.len(), "Starting narration");

        let provider = self.provider.clone();
        let event_tx = self.event_tx.clone();
        let audio_tx = self.audio_tx.clone();
        let child = cancel.clone();
        tokio::spawn(async move {
            provider.speak(id, text, event_tx, audio_tx, child).await;
        });

        self.active = Some(ActiveUtterance { id, cancel });
    }

    /// Cancel the active utterance, if any. Safe to call when idle.
    ///
    /// Effective immediately: `speaking` clears here even though the
    /// provider's teardown finishes later. Late events from the cancelled
    /// utterance fail the handle check in [`Self::handle_event`].
    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            debug!(id = %active.id, "Stopping narration");
            active.cancel.cancel();
        }
        self.speaking = false;
    }

    /// Stop and restart from the first character of `text`.
    pub fn replay(&mut self, text: String) {
        self.stop();
        self.start(text);
    }

    /// Apply a provider event. Events from any utterance other than the
    /// active one are stale and dropped.
    pub fn handle_event(&mut self, event: UtteranceEvent) {
        let Some(active) = &self.active else {
            debug!(id = %event.utterance(), "Dropping event from superseded utterance");
            return;
        };
        if event.utterance() != active.id {
            debug!(id = %event.utterance(), active = %active.id, "Dropping stale utterance event");
            return;
        }

        match event {
            UtteranceEvent::Started(_) => {
                self.speaking = true;
            }
            UtteranceEvent::Ended(_) => {
                self.speaking = false;
                self.active = None;
            }
            UtteranceEvent::Failed(_, message) => {
                warn!(%message, "Synthesis failed");
                self.speaking = false;
                self.active = None;
            }
        }
    }
}
