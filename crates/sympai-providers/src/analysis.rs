//! HTTP analysis provider — POSTs the symptom text, returns the chunked reply.

use async_trait::async_trait;
use futures::StreamExt;
use tracing::debug;

use sympai_core::config::Config;
use sympai_core::types::AnalyzeRequest;

use crate::{AnalysisProvider, ChunkStream};

pub struct HttpAnalysisProvider {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpAnalysisProvider {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.analyze_endpoint())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AnalysisProvider for HttpAnalysisProvider {
    async fn stream(&self, request: &AnalyzeRequest) -> anyhow::Result<ChunkStream> {
        debug!(
            endpoint = %self.endpoint,
            text_len = request.text.len(),
            "Dispatching analysis request"
        );

        let resp = self.client.post(&self.endpoint).json(request).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Analysis API error {status}: {body}");
        }

        let stream = resp
            .bytes_stream()
            .map(|r| r.map_err(|e| anyhow::anyhow!("analysis stream error: {e}")));

        Ok(Box::pin(stream))
    }
}
