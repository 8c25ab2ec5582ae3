//! Narration synthesis: provider trait, per-run session and cache
//!
//! A [`NarrationProvider`] turns a script into audio. The
//! [`NarrationSession`] wraps one provider for the lifetime of a run:
//!
//! - each distinct `(script, voice)` pair is synthesized at most once
//! - consecutive provider calls are spaced by a fixed cooldown
//! - failures are memoized too, so nothing is silently retried
//! - an optional [`DiskCache`] short-circuits requests seen in earlier runs

pub mod cache;
pub mod elevenlabs;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ProviderError;

pub use cache::DiskCache;
pub use elevenlabs::ElevenLabsProvider;

/// Voice selection and synthesis settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceProfile {
    pub voice_id: String,
    pub model_id: String,
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
}

impl Default for VoiceProfile {
    fn default() -> Self {
        Self {
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
            model_id: "eleven_multilingual_v2".to_string(),
            stability: 0.5,
            similarity_boost: 0.75,
            style: 0.0,
        }
    }
}

impl VoiceProfile {
    #[must_use]
    pub fn with_voice(mut self, voice_id: &str) -> Self {
        self.voice_id = voice_id.to_string();
        self
    }
}

/// What to synthesize
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrationRequest {
    pub script: String,
    pub voice: VoiceProfile,
}

impl NarrationRequest {
    pub fn new(script: impl Into<String>, voice: VoiceProfile) -> Self {
        Self {
            script: script.into(),
            voice,
        }
    }

    /// Content hash identifying this request across runs
    #[must_use]
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.voice.voice_id.as_bytes());
        hasher.update([0]);
        hasher.update(self.voice.model_id.as_bytes());
        hasher.update([0]);
        for setting in [self.voice.stability, self.voice.similarity_boost, self.voice.style] {
            hasher.update(setting.to_bits().to_le_bytes());
        }
        hasher.update(self.script.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Synthesized audio and its measured duration
#[derive(Debug, Clone, PartialEq)]
pub struct Narration {
    pub audio: Bytes,
    /// Seconds, as measured by probing the audio; never an estimate
    pub duration: f64,
    /// File extension matching the audio encoding (e.g. `mp3`)
    pub extension: String,
}

/// Text-to-speech backend
#[async_trait]
pub trait NarrationProvider: Send + Sync {
    /// Short name used in logs and errors
    fn name(&self) -> &str;

    async fn synthesize(&self, script: &str, voice: &VoiceProfile) -> Result<Narration, ProviderError>;
}

#[derive(Default)]
struct SessionState {
    results: HashMap<String, Result<Arc<Narration>, ProviderError>>,
    last_call: Option<Instant>,
    provider_calls: usize,
}

/// Per-run memoizing, throttled front for a provider
pub struct NarrationSession {
    provider: Arc<dyn NarrationProvider>,
    cooldown: Duration,
    cache: Option<DiskCache>,
    state: Mutex<SessionState>,
}

impl NarrationSession {
    pub fn new(provider: Arc<dyn NarrationProvider>, cooldown: Duration) -> Self {
        Self {
            provider,
            cooldown,
            cache: None,
            state: Mutex::new(SessionState::default()),
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: DiskCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Narrate a request, reusing any earlier result from this run.
    ///
    /// The session lock is held across the provider call, so calls are
    /// serialized even if several resolutions run at once.
    pub async fn narrate(&self, request: &NarrationRequest) -> Result<Arc<Narration>, ProviderError> {
        let key = request.cache_key();
        let mut state = self.state.lock().await;

        if let Some(previous) = state.results.get(&key) {
            debug!(key = %&key[..12], "narration reused from this run");
            return previous.clone();
        }

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.load(&key).await {
                debug!(key = %&key[..12], "narration cache hit");
                let hit = Arc::new(hit);
                state.results.insert(key, Ok(Arc::clone(&hit)));
                return Ok(hit);
            }
        }

        if let Some(last) = state.last_call {
            let ready_at = last + self.cooldown;
            if Instant::now() < ready_at {
                debug!("narration cooldown {:?}", ready_at - Instant::now());
                tokio::time::sleep_until(ready_at).await;
            }
        }

        info!(
            provider = self.provider.name(),
            chars = request.script.chars().count(),
            "synthesizing narration"
        );
        let result = self
            .provider
            .synthesize(&request.script, &request.voice)
            .await
            .map(Arc::new);
        state.last_call = Some(Instant::now());
        state.provider_calls += 1;

        match &result {
            Ok(narration) => {
                info!(duration = narration.duration, "narration ready");
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.store(&key, narration).await {
                        warn!("failed to cache narration: {e}");
                    }
                }
            }
            Err(e) => warn!("narration failed: {e}"),
        }

        state.results.insert(key, result.clone());
        result
    }

    /// Number of requests that actually reached the provider
    pub async fn provider_calls(&self) -> usize {
        self.state.lock().await.provider_calls
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted provider for tests across the crate

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::error::ProviderErrorKind;

    /// Returns fixed durations per script; unknown scripts fail
    #[derive(Default)]
    pub struct ScriptedProvider {
        durations: HashMap<String, f64>,
        failures: HashMap<String, ProviderErrorKind>,
        pub calls: AtomicUsize,
        pub call_log: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(mut self, script: &str, duration: f64) -> Self {
            self.durations.insert(script.to_string(), duration);
            self
        }

        pub fn failing(mut self, script: &str, kind: ProviderErrorKind) -> Self {
            self.failures.insert(script.to_string(), kind);
            self
        }
    }

    #[async_trait]
    impl NarrationProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn synthesize(&self, script: &str, _voice: &VoiceProfile) -> Result<Narration, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.call_log.lock().unwrap().push(script.to_string());
            if let Some(kind) = self.failures.get(script) {
                return Err(ProviderError::new("scripted", *kind, "scripted failure"));
            }
            let duration = self.durations.get(script).copied().ok_or_else(|| {
                ProviderError::new("scripted", ProviderErrorKind::InvalidResponse, "unknown script")
            })?;
            Ok(Narration {
                audio: Bytes::from(format!("audio:{script}")),
                duration,
                extension: "mp3".to_string(),
            })
        }
    }
}
