//! Coordinator integration tests — scripted providers drive the three async
//! sources in controlled interleavings.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use sympai_client::guard::OFF_TOPIC_ADVISORY;
use sympai_client::{Command, Coordinator, CoordinatorHandle, ReplyPhase};
use sympai_core::types::{AnalyzeRequest, UtteranceId};
use sympai_providers::{
    AnalysisProvider, ChunkStream, RecognitionProvider, SynthesisProvider, UtteranceEvent,
};

/// Analysis provider backed by pre-registered chunk channels, popped in
/// dispatch order. The test keeps the senders and feeds chunks by hand.
struct ScriptedAnalysis {
    streams: StdMutex<VecDeque<mpsc::UnboundedReceiver<anyhow::Result<Bytes>>>>,
    dispatched: AtomicUsize,
}

impl ScriptedAnalysis {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            streams: StdMutex::new(VecDeque::new()),
            dispatched: AtomicUsize::new(0),
        })
    }

    fn push_stream(&self) -> mpsc::UnboundedSender<anyhow::Result<Bytes>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().unwrap().push_back(rx);
        tx
    }

    fn dispatch_count(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisProvider for ScriptedAnalysis {
    async fn stream(&self, _request: &AnalyzeRequest) -> anyhow::Result<ChunkStream> {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        let rx = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .expect("no scripted stream registered");
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

/// Synthesis provider that reports Started immediately and holds the
/// utterance open until the test ends it or the coordinator cancels it.
struct ManualSynthesis {
    spoken: StdMutex<Vec<String>>,
    end_rx: Mutex<mpsc::UnboundedReceiver<()>>,
}

struct SynthDriver {
    end_tx: mpsc::UnboundedSender<()>,
}

impl SynthDriver {
    fn finish_utterance(&self) {
        let _ = self.end_tx.send(());
    }
}

fn manual_synthesis() -> (Arc<ManualSynthesis>, SynthDriver) {
    let (end_tx, end_rx) = mpsc::unbounded_channel();
    (
        Arc::new(ManualSynthesis {
            spoken: StdMutex::new(Vec::new()),
            end_rx: Mutex::new(end_rx),
        }),
        SynthDriver { end_tx },
    )
}

impl ManualSynthesis {
    fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SynthesisProvider for ManualSynthesis {
    async fn speak(
        &self,
        id: UtteranceId,
        text: String,
        event_tx: mpsc::UnboundedSender<UtteranceEvent>,
        _audio_tx: mpsc::UnboundedSender<Vec<u8>>,
        cancel: CancellationToken,
    ) {
        self.spoken.lock().unwrap().push(text);
        let _ = event_tx.send(UtteranceEvent::Started(id));
        let mut end_rx = self.end_rx.lock().await;
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = end_rx.recv() => {
                let _ = event_tx.send(UtteranceEvent::Ended(id));
            }
        }
    }
}

/// Recognition provider with scripted results. When gated, the capture
/// stays open until the test releases it.
struct ManualRecognition {
    activations: AtomicUsize,
    script: StdMutex<VecDeque<Result<String, String>>>,
    gate_rx: Option<Mutex<mpsc::UnboundedReceiver<()>>>,
}

struct RecognitionDriver {
    gate_tx: mpsc::UnboundedSender<()>,
}

impl RecognitionDriver {
    fn release(&self) {
        let _ = self.gate_tx.send(());
    }
}

fn scripted_recognition(script: Vec<Result<String, String>>) -> Arc<ManualRecognition> {
    Arc::new(ManualRecognition {
        activations: AtomicUsize::new(0),
        script: StdMutex::new(script.into()),
        gate_rx: None,
    })
}

fn gated_recognition(
    script: Vec<Result<String, String>>,
) -> (Arc<ManualRecognition>, RecognitionDriver) {
    let (gate_tx, gate_rx) = mpsc::unbounded_channel();
    (
        Arc::new(ManualRecognition {
            activations: AtomicUsize::new(0),
            script: StdMutex::new(script.into()),
            gate_rx: Some(Mutex::new(gate_rx)),
        }),
        RecognitionDriver { gate_tx },
    )
}

#[async_trait]
impl RecognitionProvider for ManualRecognition {
    async fn transcribe(
        &self,
        _audio: Option<&Path>,
        cancel: CancellationToken,
    ) -> anyhow::Result<String> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate_rx {
            let mut rx = gate.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => anyhow::bail!("capture cancelled"),
                _ = rx.recv() => {}
            }
        }
        match self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .expect("no scripted transcript")
        {
            Ok(text) => Ok(text),
            Err(message) => Err(anyhow::anyhow!(message)),
        }
    }
}

fn boot(
    analysis: Arc<ScriptedAnalysis>,
    synthesis: Arc<ManualSynthesis>,
    recognition: Arc<ManualRecognition>,
) -> CoordinatorHandle {
    let (audio_tx, _audio_rx) = mpsc::unbounded_channel();
    Coordinator::start(analysis, recognition, synthesis, audio_tx)
}

fn send(handle: &CoordinatorHandle, command: Command) {
    handle.commands.send(command).unwrap();
}

#[tokio::test]
async fn test_guard_blocks_offtopic_dispatch() {
    let analysis = ScriptedAnalysis::new();
    let (synthesis, _driver) = manual_synthesis();
    let handle = boot(analysis.clone(), synthesis, scripted_recognition(vec![]));
    let mut state = handle.state.clone();

    send(&handle, Command::SetInput("tell me a joke".into()));
    send(&handle, Command::Dispatch);

    let observed = state
        .wait_for(|s| s.phase == ReplyPhase::Rejected)
        .await
        .unwrap()
        .clone();
    assert_eq!(observed.reply, OFF_TOPIC_ADVISORY);
    assert_eq!(analysis.dispatch_count(), 0);
}

#[tokio::test]
async fn test_chunks_publish_in_arrival_order() {
    let analysis = ScriptedAnalysis::new();
    let chunks = analysis.push_stream();
    let (synthesis, _driver) = manual_synthesis();
    let handle = boot(analysis, synthesis, scripted_recognition(vec![]));
    let mut state = handle.state.clone();

    send(&handle, Command::SetInput("I have a fever".into()));
    send(&handle, Command::Dispatch);
    state
        .wait_for(|s| s.phase == ReplyPhase::Streaming)
        .await
        .unwrap();

    // Lockstep: each chunk is observed before the next is sent, so the
    // published sequence is exactly "Fe", "Fever is ", "Fever is common."
    chunks.send(Ok(Bytes::from_static(b"Fe"))).unwrap();
    state.wait_for(|s| s.reply == "Fe").await.unwrap();

    chunks.send(Ok(Bytes::from_static(b"ver is "))).unwrap();
    state.wait_for(|s| s.reply == "Fever is ").await.unwrap();

    chunks.send(Ok(Bytes::from_static(b"common."))).unwrap();
    state
        .wait_for(|s| s.reply == "Fever is common.")
        .await
        .unwrap();

    drop(chunks);
    let done = state
        .wait_for(|s| s.phase == ReplyPhase::Complete)
        .await
        .unwrap()
        .clone();
    assert_eq!(done.reply, "Fever is common.");
}

#[tokio::test]
async fn test_multibyte_char_split_at_chunk_boundary() {
    let analysis = ScriptedAnalysis::new();
    let chunks = analysis.push_stream();
    let (synthesis, _driver) = manual_synthesis();
    let handle = boot(analysis, synthesis, scripted_recognition(vec![]));
    let mut state = handle.state.clone();

    send(&handle, Command::SetInput("fever of 38 degrees".into()));
    send(&handle, Command::Dispatch);

    // "38°C" with "°" (0xC2 0xB0) split across the chunk boundary
    chunks.send(Ok(Bytes::from(vec![b'3', b'8', 0xC2]))).unwrap();
    chunks.send(Ok(Bytes::from(vec![0xB0, b'C']))).unwrap();
    drop(chunks);

    let done = state
        .wait_for(|s| s.phase == ReplyPhase::Complete)
        .await
        .unwrap()
        .clone();
    assert_eq!(done.reply, "38°C");
    assert!(!done.reply.contains(char::REPLACEMENT_CHARACTER));
}

#[tokio::test]
async fn test_new_dispatch_abandons_open_stream() {
    let analysis = ScriptedAnalysis::new();
    let stream_a = analysis.push_stream();
    let stream_b = analysis.push_stream();
    let (synthesis, _driver) = manual_synthesis();
    let handle = boot(analysis.clone(), synthesis, scripted_recognition(vec![]));
    let mut state = handle.state.clone();

    send(&handle, Command::SetInput("I have a fever".into()));
    send(&handle, Command::Dispatch);
    stream_a.send(Ok(Bytes::from_static(b"first reply"))).unwrap();
    state.wait_for(|s| s.reply == "first reply").await.unwrap();

    // Request B lands while A's stream is still open.
    send(&handle, Command::Dispatch);
    state
        .wait_for(|s| s.phase == ReplyPhase::Streaming && s.reply.is_empty())
        .await
        .unwrap();

    // A's late chunk must never reach B's buffer.
    let _ = stream_a.send(Ok(Bytes::from_static(b"STALE")));
    stream_b.send(Ok(Bytes::from_static(b"second reply"))).unwrap();
    drop(stream_b);

    let done = state
        .wait_for(|s| s.phase == ReplyPhase::Complete)
        .await
        .unwrap()
        .clone();
    assert_eq!(done.reply, "second reply");
    assert_eq!(analysis.dispatch_count(), 2);
}

#[tokio::test]
async fn test_pause_when_idle_is_noop() {
    let analysis = ScriptedAnalysis::new();
    let (synthesis, _driver) = manual_synthesis();
    let handle = boot(analysis, synthesis, scripted_recognition(vec![]));
    let mut state = handle.state.clone();

    send(&handle, Command::Pause);
    // A later command confirms the loop digested the Pause without effect.
    send(&handle, Command::SetInput("checkpoint".into()));
    let observed = state
        .wait_for(|s| s.input == "checkpoint")
        .await
        .unwrap()
        .clone();
    assert!(!observed.speaking);
}

#[tokio::test]
async fn test_completion_narrates_when_voice_enabled() {
    let analysis = ScriptedAnalysis::new();
    let chunks = analysis.push_stream();
    let (synthesis, driver) = manual_synthesis();
    let handle = boot(analysis, synthesis.clone(), scripted_recognition(vec![]));
    let mut state = handle.state.clone();

    send(&handle, Command::SetVoiceEnabled(true));
    send(&handle, Command::SetInput("I have a fever and sore throat".into()));
    send(&handle, Command::Dispatch);

    chunks
        .send(Ok(Bytes::from_static(b"You may have a viral infection.")))
        .unwrap();
    drop(chunks);

    state.wait_for(|s| s.speaking).await.unwrap();
    assert_eq!(synthesis.spoken(), vec!["You may have a viral infection."]);

    driver.finish_utterance();
    state.wait_for(|s| !s.speaking).await.unwrap();
    // Exactly one utterance was spoken, with the full text.
    assert_eq!(synthesis.spoken().len(), 1);
}

#[tokio::test]
async fn test_disabling_voice_stops_speaking() {
    let analysis = ScriptedAnalysis::new();
    let chunks = analysis.push_stream();
    let (synthesis, _driver) = manual_synthesis();
    let handle = boot(analysis, synthesis, scripted_recognition(vec![]));
    let mut state = handle.state.clone();

    send(&handle, Command::SetVoiceEnabled(true));
    send(&handle, Command::SetInput("constant headache".into()));
    send(&handle, Command::Dispatch);
    chunks.send(Ok(Bytes::from_static(b"Try resting."))).unwrap();
    drop(chunks);
    state.wait_for(|s| s.speaking).await.unwrap();

    send(&handle, Command::SetVoiceEnabled(false));
    let observed = state.wait_for(|s| !s.speaking).await.unwrap().clone();
    assert!(!observed.voice_enabled);
}

#[tokio::test]
async fn test_replay_restarts_from_first_character() {
    let analysis = ScriptedAnalysis::new();
    let chunks = analysis.push_stream();
    let (synthesis, driver) = manual_synthesis();
    let handle = boot(analysis, synthesis.clone(), scripted_recognition(vec![]));
    let mut state = handle.state.clone();

    send(&handle, Command::SetVoiceEnabled(true));
    send(&handle, Command::SetInput("skin rash on my arm".into()));
    send(&handle, Command::Dispatch);
    chunks.send(Ok(Bytes::from_static(b"It could be eczema."))).unwrap();
    drop(chunks);

    state.wait_for(|s| s.speaking).await.unwrap();
    driver.finish_utterance();
    state.wait_for(|s| !s.speaking).await.unwrap();

    send(&handle, Command::Play);
    state.wait_for(|s| s.speaking).await.unwrap();
    driver.finish_utterance();
    state.wait_for(|s| !s.speaking).await.unwrap();

    // Both utterances received the full snapshot, never a suffix.
    assert_eq!(
        synthesis.spoken(),
        vec!["It could be eczema.", "It could be eczema."]
    );
}

#[tokio::test]
async fn test_enabling_voice_after_completion_narrates() {
    let analysis = ScriptedAnalysis::new();
    let chunks = analysis.push_stream();
    let (synthesis, _driver) = manual_synthesis();
    let handle = boot(analysis, synthesis.clone(), scripted_recognition(vec![]));
    let mut state = handle.state.clone();

    send(&handle, Command::SetInput("I feel nausea".into()));
    send(&handle, Command::Dispatch);
    chunks.send(Ok(Bytes::from_static(b"Stay hydrated."))).unwrap();
    drop(chunks);
    state
        .wait_for(|s| s.phase == ReplyPhase::Complete)
        .await
        .unwrap();
    assert!(synthesis.spoken().is_empty());

    send(&handle, Command::SetVoiceEnabled(true));
    state.wait_for(|s| s.speaking).await.unwrap();
    assert_eq!(synthesis.spoken(), vec!["Stay hydrated."]);
}

#[tokio::test]
async fn test_stream_failure_replaces_partial_content() {
    let analysis = ScriptedAnalysis::new();
    let chunks = analysis.push_stream();
    let (synthesis, _driver) = manual_synthesis();
    let handle = boot(analysis, synthesis.clone(), scripted_recognition(vec![]));
    let mut state = handle.state.clone();

    send(&handle, Command::SetVoiceEnabled(true));
    send(&handle, Command::SetInput("sudden chest pain".into()));
    send(&handle, Command::Dispatch);

    chunks.send(Ok(Bytes::from_static(b"You may"))).unwrap();
    state.wait_for(|s| s.reply == "You may").await.unwrap();
    chunks.send(Err(anyhow::anyhow!("connection reset"))).unwrap();

    let failed = state
        .wait_for(|s| s.phase == ReplyPhase::Failed)
        .await
        .unwrap()
        .clone();
    assert!(failed.reply.starts_with("Request failed:"));
    assert!(!failed.reply.contains("You may"));
    // A truncated buffer is never narrated.
    assert!(synthesis.spoken().is_empty());
    assert!(!failed.speaking);
}

#[tokio::test]
async fn test_recognition_failure_resets_recording() {
    let analysis = ScriptedAnalysis::new();
    let recognition = scripted_recognition(vec![
        Err("microphone unavailable".into()),
        Ok("I have a migraine headache".into()),
    ]);
    let (synthesis, _driver) = manual_synthesis();
    let handle = boot(analysis, synthesis, recognition);
    let mut state = handle.state.clone();

    send(&handle, Command::StartRecording { audio: None });
    let failed = state
        .wait_for(|s| s.notice.is_some())
        .await
        .unwrap()
        .clone();
    assert!(!failed.recording);
    assert!(failed.notice.unwrap().contains("microphone unavailable"));

    // The user can retry immediately.
    send(&handle, Command::StartRecording { audio: None });
    let retried = state
        .wait_for(|s| s.input == "I have a migraine headache")
        .await
        .unwrap()
        .clone();
    assert!(!retried.recording);
}

#[tokio::test]
async fn test_concurrent_recording_is_rejected() {
    let analysis = ScriptedAnalysis::new();
    let (recognition, driver) = gated_recognition(vec![Ok("I have a cough".into())]);
    let (synthesis, _sdriver) = manual_synthesis();
    let handle = boot(analysis, synthesis, recognition.clone());
    let mut state = handle.state.clone();

    send(&handle, Command::StartRecording { audio: None });
    state.wait_for(|s| s.recording).await.unwrap();

    // Second activation while recording must be inert.
    send(&handle, Command::StartRecording { audio: None });

    driver.release();
    let observed = state
        .wait_for(|s| s.input == "I have a cough")
        .await
        .unwrap()
        .clone();
    assert!(!observed.recording);
    assert_eq!(recognition.activations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dispatch_stops_stale_narration() {
    let analysis = ScriptedAnalysis::new();
    let first = analysis.push_stream();
    let second = analysis.push_stream();
    let (synthesis, _driver) = manual_synthesis();
    let handle = boot(analysis, synthesis.clone(), scripted_recognition(vec![]));
    let mut state = handle.state.clone();

    send(&handle, Command::SetVoiceEnabled(true));
    send(&handle, Command::SetInput("fatigue all day".into()));
    send(&handle, Command::Dispatch);
    first.send(Ok(Bytes::from_static(b"Get more sleep."))).unwrap();
    drop(first);
    state.wait_for(|s| s.speaking).await.unwrap();

    // Narration of the old reply must not continue over the new request.
    send(&handle, Command::Dispatch);
    let observed = state
        .wait_for(|s| !s.speaking && s.phase == ReplyPhase::Streaming)
        .await
        .unwrap()
        .clone();
    assert!(observed.reply.is_empty());
    drop(second);
}
