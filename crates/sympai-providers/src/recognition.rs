//! Speech-to-text over the Whisper-style transcription APIs.

use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sympai_core::config::TranscriptionConfig;

use crate::RecognitionProvider;

/// Get the transcription API URL for a given provider.
pub fn provider_url(config: &TranscriptionConfig) -> &str {
    match config.provider.as_str() {
        "openai" => "https://api.openai.com/v1/audio/transcriptions",
        "groq" => "https://api.groq.com/openai/v1/audio/transcriptions",
        _ => "https://api.groq.com/openai/v1/audio/transcriptions",
    }
}

/// Transcribes recorded WAV clips through the configured STT provider.
pub struct WhisperRecognition {
    config: TranscriptionConfig,
    client: reqwest::Client,
}

impl WhisperRecognition {
    pub fn new(config: TranscriptionConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    async fn request(&self, wav_data: Vec<u8>) -> anyhow::Result<String> {
        let api_key = self
            .config
            .resolve_api_key()
            .ok_or_else(|| anyhow::anyhow!("No transcription API key configured"))?;

        let url = provider_url(&self.config);
        let model = self
            .config
            .model
            .as_deref()
            .unwrap_or("whisper-large-v3-turbo");

        debug!(url, model, wav_bytes = wav_data.len(), "Sending audio for transcription");

        let part = reqwest::multipart::Part::bytes(wav_data)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;

        let form = reqwest::multipart::Form::new()
            .text("model", model.to_string())
            .text("response_format", "text")
            .part("file", part);

        let resp = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {api_key}"))
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Transcription API error {status}: {body}");
        }

        let text = resp.text().await?;
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl RecognitionProvider for WhisperRecognition {
    async fn transcribe(
        &self,
        audio: Option<&Path>,
        cancel: CancellationToken,
    ) -> anyhow::Result<String> {
        let path = audio.ok_or_else(|| anyhow::anyhow!("No audio clip provided"))?;
        let wav_data = tokio::fs::read(path).await?;

        tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("Recognition cancelled"),
            result = self.request(wav_data) => result,
        }
    }
}
