//! Streaming speech synthesis via the ElevenLabs HTTP API.
//!
//! One `speak` call is one utterance. Started is reported when the first
//! audio chunk arrives, Ended at end-of-stream. A cancelled utterance stops
//! forwarding audio and reports nothing further; the caller's handle check
//! makes its remaining in-flight events no-ops anyway.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sympai_core::config::TtsConfig;
use sympai_core::types::UtteranceId;

use crate::{SynthesisProvider, UtteranceEvent};

/// Build the ElevenLabs streaming TTS request URL for a given voice.
pub fn build_tts_url(voice: &str) -> String {
    format!("https://api.elevenlabs.io/v1/text-to-speech/{voice}/stream")
}

pub struct ElevenLabsSynthesis {
    config: TtsConfig,
    client: reqwest::Client,
}

impl ElevenLabsSynthesis {
    pub fn new(config: TtsConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    async fn run(
        &self,
        id: UtteranceId,
        text: &str,
        event_tx: &mpsc::UnboundedSender<UtteranceEvent>,
        audio_tx: &mpsc::UnboundedSender<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let api_key = self
            .config
            .resolve_api_key()
            .ok_or_else(|| anyhow::anyhow!("No TTS API key configured"))?;

        let voice = self.config.default_voice.as_deref().unwrap_or("Rachel");
        let model = self
            .config
            .default_model
            .as_deref()
            .unwrap_or("eleven_turbo_v2");
        let url = build_tts_url(voice);

        debug!(%id, voice, model, text_len = text.len(), "Starting synthesis stream");

        let resp = self
            .client
            .post(&url)
            .header("xi-api-key", &api_key)
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({
                "text": text,
                "model_id": model,
                "output_format": "pcm_16000",
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("TTS API error {status}: {body}");
        }

        let mut stream = resp.bytes_stream();
        let mut started = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(%id, "Utterance cancelled mid-stream");
                    return Ok(());
                }
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        if !started {
                            started = true;
                            let _ = event_tx.send(UtteranceEvent::Started(id));
                        }
                        if audio_tx.send(bytes.to_vec()).is_err() {
                            debug!(%id, "Audio receiver dropped, stopping stream");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        anyhow::bail!("TTS stream error: {e}");
                    }
                    None => break,
                }
            }
        }

        let _ = event_tx.send(UtteranceEvent::Ended(id));
        Ok(())
    }
}

#[async_trait]
impl SynthesisProvider for ElevenLabsSynthesis {
    async fn speak(
        &self,
        id: UtteranceId,
        text: String,
        event_tx: mpsc::UnboundedSender<UtteranceEvent>,
        audio_tx: mpsc::UnboundedSender<Vec<u8>>,
        cancel: CancellationToken,
    ) {
        if let Err(e) = self.run(id, &text, &event_tx, &audio_tx, &cancel).await {
            if !cancel.is_cancelled() {
                let _ = event_tx.send(UtteranceEvent::Failed(id, e.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_construction() {
        let url = build_tts_url("Rachel");
        assert!(url.contains("Rachel"));
        assert!(url.contains("stream"));
        assert!(url.starts_with("https://api.elevenlabs.io"));
    }

    #[tokio::test]
    async fn test_missing_api_key_reports_failure() {
        let provider = ElevenLabsSynthesis::new(TtsConfig {
            provider: "elevenlabs".into(),
            api_key: None,
            api_key_env: None,
            default_voice: None,
            default_model: None,
            audio_out: None,
        });

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (audio_tx, _audio_rx) = mpsc::unbounded_channel();
        let id = UtteranceId::new();

        provider
            .speak(id, "hello".into(), event_tx, audio_tx, CancellationToken::new())
            .await;

        match event_rx.recv().await {
            Some(UtteranceEvent::Failed(failed_id, msg)) => {
                assert_eq!(failed_id, id);
                assert!(msg.contains("No TTS API key"));
            }
            other => panic!("expected Failed event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_utterance_emits_nothing() {
        let provider = ElevenLabsSynthesis::new(TtsConfig {
            provider: "elevenlabs".into(),
            api_key: None,
            api_key_env: None,
            default_voice: None,
            default_model: None,
            audio_out: None,
        });

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (audio_tx, _audio_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        provider
            .speak(UtteranceId::new(), "hello".into(), event_tx, audio_tx, cancel)
            .await;

        // Even the missing-key failure is suppressed once cancelled.
        assert!(event_rx.try_recv().is_err());
    }
}
