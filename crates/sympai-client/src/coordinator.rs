//! Coordinator actor — serializes every state mutation behind one task.
//!
//! Commands from the view and events from the three async sources (analysis
//! stream, recognition capture, synthesis playback) interleave on one event
//! loop, so each mutation is atomic and every invariant is checked at a
//! single point. Events carry the handle of the operation that produced
//! them; events from superseded operations are dropped.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sympai_core::types::{AnalyzeRequest, RequestId};
use sympai_providers::{AnalysisProvider, RecognitionProvider, SynthesisProvider, UtteranceEvent};

use crate::guard;
use crate::ingest::{self, IngestEvent};
use crate::narration::NarrationController;
use crate::recording::{CaptureResult, RecordingSession};

/// Commands accepted from the view layer.
#[derive(Debug)]
pub enum Command {
    /// Overwrite the input text.
    SetInput(String),
    /// Send the current input through the topic guard and, when it passes,
    /// dispatch it to the analysis service.
    Dispatch,
    /// Activate the recognition provider. Inert while already recording.
    StartRecording { audio: Option<PathBuf> },
    /// Toggle voice output. Disabling stops any active narration.
    SetVoiceEnabled(bool),
    /// Narrate the completed reply from its first character.
    Play,
    /// Stop narration. No resumable pause exists; a later Play restarts
    /// from the beginning.
    Pause,
}

/// Lifecycle phase of the current reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyPhase {
    #[default]
    Idle,
    /// A stream is open and the buffer is accepting appends.
    Streaming,
    /// End-of-stream reached; the buffer is frozen.
    Complete,
    /// The stream failed; the reply shows a terminal message instead of
    /// partial content.
    Failed,
    /// The topic guard declined the input; the reply shows the advisory.
    Rejected,
}

/// Snapshot of observable state, republished on every mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UiState {
    pub input: String,
    pub reply: String,
    pub phase: ReplyPhase,
    pub recording: bool,
    pub voice_enabled: bool,
    pub speaking: bool,
    /// Transient user-facing notice (e.g. a failed voice capture).
    pub notice: Option<String>,
}

/// Handle for driving a coordinator from outside.
pub struct CoordinatorHandle {
    pub commands: mpsc::UnboundedSender<Command>,
    pub state: watch::Receiver<UiState>,
    /// Cancellation token to stop the coordinator task.
    pub cancel: CancellationToken,
}

struct ActiveRequest {
    id: RequestId,
    cancel: CancellationToken,
}

pub struct Coordinator {
    analysis: Arc<dyn AnalysisProvider>,
    narration: NarrationController,
    recording: RecordingSession,
    state: UiState,
    state_tx: watch::Sender<UiState>,
    ingest_tx: mpsc::UnboundedSender<IngestEvent>,
    active_request: Option<ActiveRequest>,
}

impl Coordinator {
    /// Start the coordinator task, returning a handle for commands and a
    /// watch receiver the view re-renders from.
    ///
    /// Synthesized audio bytes are forwarded to `audio_tx`.
    pub fn start(
        analysis: Arc<dyn AnalysisProvider>,
        recognition: Arc<dyn RecognitionProvider>,
        synthesis: Arc<dyn SynthesisProvider>,
        audio_tx: mpsc::UnboundedSender<Vec<u8>>,
    ) -> CoordinatorHandle {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
        let (ingest_tx, mut ingest_rx) = mpsc::unbounded_channel::<IngestEvent>();
        let (synth_tx, mut synth_rx) = mpsc::unbounded_channel::<UtteranceEvent>();
        let (capture_tx, mut capture_rx) = mpsc::unbounded_channel::<CaptureResult>();
        let (state_tx, state_rx) = watch::channel(UiState::default());
        let cancel = CancellationToken::new();

        let mut coordinator = Self {
            analysis,
            narration: NarrationController::new(synthesis, synth_tx, audio_tx),
            recording: RecordingSession::new(recognition, capture_tx),
            state: UiState::default(),
            state_tx,
            ingest_tx,
            active_request: None,
        };

        let loop_cancel = cancel.clone();
        tokio::spawn(async move {
            info!("Coordinator started");
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    Some(cmd) = cmd_rx.recv() => coordinator.apply_command(cmd),
                    Some(event) = ingest_rx.recv() => coordinator.apply_ingest(event),
                    Some(event) = synth_rx.recv() => coordinator.apply_synthesis(event),
                    Some(result) = capture_rx.recv() => coordinator.apply_capture(result),
                    else => break,
                }
                coordinator.check_invariants();
                coordinator.publish();
            }
            info!("Coordinator stopped");
        });

        CoordinatorHandle {
            commands: cmd_tx,
            state: state_rx,
            cancel,
        }
    }

    fn publish(&self) {
        self.state_tx.send_if_modified(|current| {
            if *current == self.state {
                false
            } else {
                *current = self.state.clone();
                true
            }
        });
    }

    fn check_invariants(&self) {
        debug_assert_eq!(self.state.speaking, self.narration.is_speaking());
        debug_assert_eq!(self.state.recording, self.recording.is_recording());
    }

    fn apply_command(&mut self, command: Command) {
        match command {
            Command::SetInput(text) => {
                self.state.input = text;
            }
            Command::Dispatch => self.dispatch(),
            Command::StartRecording { audio } => {
                if self.recording.begin(audio) {
                    self.state.recording = true;
                }
            }
            Command::SetVoiceEnabled(enabled) => {
                let was_enabled = self.state.voice_enabled;
                self.state.voice_enabled = enabled;
                if !enabled {
                    // Opting out stops the active utterance in the same step.
                    self.narration.stop();
                } else if !was_enabled
                    && self.state.phase == ReplyPhase::Complete
                    && !self.state.reply.is_empty()
                {
                    // Switching voice on with a completed reply narrates it.
                    self.narration.start(self.state.reply.clone());
                }
                self.state.speaking = self.narration.is_speaking();
            }
            Command::Play => {
                if self.state.voice_enabled
                    && self.state.phase == ReplyPhase::Complete
                    && !self.state.reply.is_empty()
                {
                    self.narration.replay(self.state.reply.clone());
                    self.state.speaking = self.narration.is_speaking();
                }
            }
            Command::Pause => {
                self.narration.stop();
                self.state.speaking = false;
            }
        }
    }

    fn dispatch(&mut self) {
        let text = self.state.input.clone();

        if !guard::is_symptom_related(&text) {
            debug!("Input declined by topic guard");
            self.abandon_request();
            self.narration.stop();
            self.state.speaking = false;
            self.state.reply = guard::OFF_TOPIC_ADVISORY.to_string();
            self.state.phase = ReplyPhase::Rejected;
            return;
        }

        // A new request revokes the old buffer's append authority, and a
        // stale utterance must never play over the new reply.
        self.abandon_request();
        self.narration.stop();
        self.state.speaking = false;

        let request = RequestId::new();
        let cancel = CancellationToken::new();
        info!(%request, "Dispatching analysis request");

        self.state.reply.clear();
        self.state.phase = ReplyPhase::Streaming;
        self.state.notice = None;

        let provider = self.analysis.clone();
        let event_tx = self.ingest_tx.clone();
        let child = cancel.clone();
        tokio::spawn(async move {
            let payload = AnalyzeRequest { text };
            let stream = tokio::select! {
                _ = child.cancelled() => return,
                result = provider.stream(&payload) => result,
            };
            match stream {
                Ok(stream) => ingest::run(request, stream, event_tx, child).await,
                Err(e) => {
                    let _ = event_tx.send(IngestEvent::Failed {
                        request,
                        message: e.to_string(),
                    });
                }
            }
        });

        self.active_request = Some(ActiveRequest {
            id: request,
            cancel,
        });
    }

    fn abandon_request(&mut self) {
        if let Some(active) = self.active_request.take() {
            debug!(request = %active.id, "Abandoning open response stream");
            active.cancel.cancel();
        }
    }

    fn apply_ingest(&mut self, event: IngestEvent) {
        let Some(active) = &self.active_request else {
            debug!(request = %event.request(), "Dropping event from abandoned stream");
            return;
        };
        if event.request() != active.id {
            debug!(request = %event.request(), "Dropping stale stream event");
            return;
        }

        match event {
            IngestEvent::Chunk { text, .. } => {
                self.state.reply.push_str(&text);
            }
            IngestEvent::Done { .. } => {
                self.active_request = None;
                self.state.phase = ReplyPhase::Complete;
                if self.state.voice_enabled && !self.state.reply.is_empty() {
                    self.narration.start(self.state.reply.clone());
                }
            }
            IngestEvent::Failed { message, .. } => {
                self.active_request = None;
                self.state.phase = ReplyPhase::Failed;
                warn!(%message, "Analysis stream failed");
                // Shown in place of partial content, never appended to it,
                // and never narrated.
                self.state.reply = format!("Request failed: {message}");
            }
        }
    }

    fn apply_synthesis(&mut self, event: UtteranceEvent) {
        self.narration.handle_event(event);
        self.state.speaking = self.narration.is_speaking();
    }

    fn apply_capture(&mut self, result: CaptureResult) {
        if !self.recording.finish(result.capture) {
            return;
        }
        self.state.recording = false;
        match result.transcript {
            Ok(text) => {
                debug!("Transcript captured");
                self.state.input = text;
            }
            Err(message) => {
                warn!(%message, "Recognition failed");
                self.state.notice = Some(format!("Voice capture failed: {message}"));
            }
        }
    }
}
