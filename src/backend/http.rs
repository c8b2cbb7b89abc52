//! HTTP implementation of the backend contract

use std::time::Duration;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use url::Url;

use super::lookup::SuggestionCache;
use super::{
    ConversationBackend, MessageRequest, MessageResponse, StartRequest, StartResponse,
    VoiceOptions, error_says_session_missing, is_session_missing,
};
use crate::config::Config;
use crate::language::Language;
use crate::{Error, Result};

/// Response from the transcription endpoint
#[derive(serde::Deserialize)]
struct TranscribeResponse {
    text: String,
}

/// Client for the diagnosis backend
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<SecretString>,
    pub(super) suggestions: SuggestionCache,
}

impl HttpBackend {
    /// Create a backend client
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is invalid or the HTTP client cannot be built
    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        timeout: Duration,
        suggestion_ttl: Duration,
    ) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid backend url {base_url}: {e}")))?;

        // Url::join replaces the last path segment unless the base ends in '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: base,
            api_key,
            suggestions: SuggestionCache::new(suggestion_ttl),
        })
    }

    /// Create a backend client from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the configured URL is invalid
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.backend.url,
            config
                .backend
                .api_key
                .as_ref()
                .map(|key| SecretString::from(key.expose_secret().to_owned())),
            Duration::from_secs(config.backend.timeout_secs),
            Duration::from_secs(config.backend.suggestion_ttl_secs),
        )
    }

    /// Base URL requests are resolved against
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(super) fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::Config(format!("invalid endpoint {path}: {e}")))
    }

    pub(super) fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        }
    }

    pub(super) fn post(&self, path: &str) -> Result<RequestBuilder> {
        Ok(self.authorize(self.client.post(self.endpoint(path)?)))
    }

    pub(super) fn get(&self, path: &str) -> Result<RequestBuilder> {
        Ok(self.get_url(self.endpoint(path)?))
    }

    pub(super) fn get_url(&self, url: Url) -> RequestBuilder {
        self.authorize(self.client.get(url))
    }

    /// Send a request and decode its JSON reply
    ///
    /// Non-success statuses become [`Error::Backend`], and any reply carrying
    /// a missing-session indicator becomes [`Error::SessionExpired`].
    pub(super) async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &'static str,
    ) -> Result<T> {
        let response = request.send().await.map_err(|e| {
            tracing::warn!(error = %e, endpoint = what, "backend request failed");
            e
        })?;

        let status = response.status();
        let body = response.text().await?;
        tracing::debug!(status = %status, endpoint = what, bytes = body.len(), "received response");

        if !status.is_success() {
            if is_session_missing(status.as_u16(), &body) {
                return Err(Error::SessionExpired);
            }
            tracing::warn!(status = %status, endpoint = what, body = %body, "backend error");
            return Err(Error::Backend {
                status: status.as_u16(),
                body,
            });
        }

        let value: serde_json::Value = serde_json::from_str(&body)?;
        if error_says_session_missing(&value) {
            return Err(Error::SessionExpired);
        }
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl ConversationBackend for HttpBackend {
    async fn start_session(&self, user_id: &str, language: Language) -> Result<StartResponse> {
        let request = self
            .post("conversation/start")?
            .json(&StartRequest { user_id, language });
        let started: StartResponse = self.send_json(request, "conversation/start").await?;
        tracing::info!(session_id = %started.session_id, language = %language, "session started");
        Ok(started)
    }

    async fn send_message(
        &self,
        session_id: &str,
        message: &str,
        language: Language,
    ) -> Result<MessageResponse> {
        let request = self.post("conversation/message")?.json(&MessageRequest {
            session_id,
            message,
            language,
        });
        self.send_json(request, "conversation/message").await
    }

    async fn synthesize(
        &self,
        text: &str,
        language: Language,
        voice: &VoiceOptions,
    ) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct SpeakRequest<'a> {
            text: &'a str,
            language: Language,
            #[serde(rename = "voiceOptions")]
            voice_options: &'a VoiceOptions,
        }

        let response = self
            .post("tts/speak")?
            .json(&SpeakRequest {
                text,
                language,
                voice_options: voice,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("backend TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        tracing::debug!(bytes = audio.len(), "synthesized speech");
        Ok(audio.to_vec())
    }

    async fn transcribe(&self, wav: Vec<u8>, language: Language) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "starting transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav)
                    .file_name("speech.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("language", language.code());

        let request = self.post("stt/transcribe")?.multipart(form);
        let result: TranscribeResponse = self.send_json(request, "stt/transcribe").await?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(url: &str) -> HttpBackend {
        HttpBackend::new(url, None, Duration::from_secs(5), Duration::from_secs(60)).unwrap()
    }

    #[test]
    fn endpoints_resolve_under_base_path() {
        let b = backend("https://triage.example.com/api/v1");
        assert_eq!(
            b.endpoint("conversation/message").unwrap().as_str(),
            "https://triage.example.com/api/v1/conversation/message"
        );
        assert_eq!(
            b.endpoint("/tts/speak").unwrap().as_str(),
            "https://triage.example.com/api/v1/tts/speak"
        );
    }

    #[test]
    fn invalid_base_url_is_config_error() {
        let err = HttpBackend::new("not a url", None, Duration::from_secs(1), Duration::ZERO);
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn unreachable_backend_is_network_failure() {
        // Port 9 (discard) on localhost is expected to refuse connections
        let b = backend("http://127.0.0.1:9");
        let err = b
            .send_message("s1", "hello", Language::English)
            .await
            .unwrap_err();
        assert!(err.is_network_failure());
    }
}
