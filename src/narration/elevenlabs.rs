//! `ElevenLabs` text-to-speech provider
//!
//! `POST {endpoint}/v1/text-to-speech/{voice_id}` with the API key in
//! `xi-api-key`; the response body is raw MP3. Duration is measured by
//! probing the returned audio, never estimated from text length.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, instrument};

use super::{Narration, NarrationProvider, VoiceProfile};
use crate::error::{ProviderError, ProviderErrorKind};
use crate::probe::MediaProbe;

const PROVIDER: &str = "elevenlabs";

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    style: f32,
}

/// HTTP narration provider
pub struct ElevenLabsProvider {
    client: Client,
    endpoint: String,
    api_key: String,
    probe: Arc<dyn MediaProbe>,
    scratch_dir: PathBuf,
}

impl ElevenLabsProvider {
    /// Create a provider; `scratch_dir` receives short-lived audio files for probing
    pub fn new(
        endpoint: &str,
        api_key: &str,
        timeout: Duration,
        probe: Arc<dyn MediaProbe>,
        scratch_dir: PathBuf,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .use_rustls_tls()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::new(PROVIDER, ProviderErrorKind::Transport, e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            probe,
            scratch_dir,
        })
    }

    fn speech_url(&self, voice_id: &str) -> String {
        format!("{}/v1/text-to-speech/{voice_id}", self.endpoint)
    }

    async fn measure(&self, audio: &[u8]) -> Result<f64, ProviderError> {
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| invalid(format!("scratch dir: {e}")))?;
        let path = self
            .scratch_dir
            .join(format!("narration-{}.mp3", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, audio)
            .await
            .map_err(|e| invalid(format!("scratch write: {e}")))?;

        let duration = self.probe.duration(&path).await;
        let _ = tokio::fs::remove_file(&path).await;

        duration.map_err(|e| invalid(format!("audio did not probe: {e}")))
    }
}

fn invalid(message: String) -> ProviderError {
    ProviderError::new(PROVIDER, ProviderErrorKind::InvalidResponse, message)
}

fn transport(err: &reqwest::Error) -> ProviderError {
    let kind = if err.is_timeout() {
        ProviderErrorKind::Timeout
    } else {
        ProviderErrorKind::Transport
    };
    ProviderError::new(PROVIDER, kind, err.to_string())
}

#[async_trait]
impl NarrationProvider for ElevenLabsProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    #[instrument(skip(self, script, voice), fields(voice = %voice.voice_id))]
    async fn synthesize(&self, script: &str, voice: &VoiceProfile) -> Result<Narration, ProviderError> {
        let body = SpeechRequest {
            text: script,
            model_id: &voice.model_id,
            voice_settings: VoiceSettings {
                stability: voice.stability,
                similarity_boost: voice.similarity_boost,
                style: voice.style,
            },
        };

        let response = self
            .client
            .post(self.speech_url(&voice.voice_id))
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(500).collect();
            return Err(ProviderError::new(
                PROVIDER,
                ProviderError::kind_for_status(status.as_u16()),
                detail,
            ));
        }

        let audio = response.bytes().await.map_err(|e| transport(&e))?;
        if audio.is_empty() {
            return Err(invalid("empty audio body".to_string()));
        }
        debug!(bytes = audio.len(), "narration audio received");

        let duration = self.measure(&audio).await?;
        Ok(Narration {
            audio,
            duration,
            extension: "mp3".to_string(),
        })
    }
}
