//! Stateless lookups: symptom autocomplete, image analysis, user profile
//!
//! These carry no session state; autocomplete results are cached briefly
//! since they are requested on every keystroke.

use std::time::Duration;

use base64::Engine as _;
use mini_moka::sync::Cache;
use serde::{Deserialize, Serialize};

use reqwest::RequestBuilder;

use super::HttpBackend;
use crate::language::Language;
use crate::{Error, Result};

/// Shortest prefix worth sending to the backend
const MIN_PREFIX_CHARS: usize = 2;

/// Cache key for autocomplete lookups
#[derive(Debug, Hash, Eq, PartialEq, Clone)]
struct SuggestionKey {
    language: Language,
    prefix: String,
}

/// TTL cache for autocomplete suggestions
#[derive(Clone, Debug)]
pub struct SuggestionCache {
    entries: Cache<SuggestionKey, Vec<String>>,
}

impl SuggestionCache {
    /// Create a new cache with the given TTL
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Cache::builder().max_capacity(512).time_to_live(ttl).build(),
        }
    }

    /// Look up cached suggestions
    #[must_use]
    pub fn get(&self, language: Language, prefix: &str) -> Option<Vec<String>> {
        self.entries.get(&SuggestionKey {
            language,
            prefix: normalize_prefix(prefix),
        })
    }

    /// Store suggestions for a prefix
    pub fn put(&self, language: Language, prefix: &str, suggestions: Vec<String>) {
        self.entries.insert(
            SuggestionKey {
                language,
                prefix: normalize_prefix(prefix),
            },
            suggestions,
        );
    }
}

fn normalize_prefix(prefix: &str) -> String {
    prefix.trim().to_lowercase()
}

#[derive(Deserialize)]
struct SuggestionResponse {
    #[serde(default)]
    suggestions: Vec<String>,
}

/// A finding from image analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFinding {
    pub label: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// Result of `POST /image/analyze`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAnalysis {
    #[serde(default)]
    pub findings: Vec<ImageFinding>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// User profile held by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub age: Option<u8>,
    #[serde(default)]
    pub preferred_language: Option<Language>,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
}

impl HttpBackend {
    /// Symptom suggestions for a typed prefix
    ///
    /// Prefixes shorter than two characters return nothing without a request.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be reached
    pub async fn autocomplete(&self, prefix: &str, language: Language) -> Result<Vec<String>> {
        if prefix.trim().chars().count() < MIN_PREFIX_CHARS {
            return Ok(Vec::new());
        }
        if let Some(hit) = self.suggestions.get(language, prefix) {
            return Ok(hit);
        }

        let request = self
            .get("symptoms/autocomplete")?
            .query(&[("q", prefix.trim()), ("language", language.code())]);
        let reply: SuggestionResponse = self.send_json(request, "symptoms/autocomplete").await?;

        self.suggestions
            .put(language, prefix, reply.suggestions.clone());
        Ok(reply.suggestions)
    }

    /// Analyze a photo of an affected body area
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be reached or rejects the image
    pub async fn analyze_image(
        &self,
        image: &[u8],
        mime_type: &str,
        language: Language,
    ) -> Result<ImageAnalysis> {
        let request = self.analyze_request(image, mime_type, language)?;
        self.send_json(request, "image/analyze").await
    }

    /// Fetch a user profile
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be reached or has no such profile
    pub async fn fetch_profile(&self, user_id: &str) -> Result<Profile> {
        let request = self.profile_request(user_id)?;
        self.send_json(request, "profile").await
    }

    fn analyze_request(
        &self,
        image: &[u8],
        mime_type: &str,
        language: Language,
    ) -> Result<RequestBuilder> {
        Ok(self.post("image/analyze")?.json(&AnalyzeRequest {
            image: base64::engine::general_purpose::STANDARD.encode(image),
            mime_type,
            language,
        }))
    }

    fn profile_request(&self, user_id: &str) -> Result<RequestBuilder> {
        let mut url = self.endpoint("profile")?;
        let path_error = format!("backend url cannot hold a path: {url}");
        url.path_segments_mut()
            .map_err(|()| Error::Config(path_error))?
            .push(user_id);
        Ok(self.get_url(url))
    }
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    image: String,
    mime_type: &'a str,
    language: Language,
}

/// Guess an image MIME type from its leading bytes
#[must_use]
pub fn sniff_image_type(image: &[u8]) -> Option<&'static str> {
    match image {
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [0x89, b'P', b'N', b'G', ..] => Some("image/png"),
        [b'G', b'I', b'F', b'8', ..] => Some("image/gif"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("image/webp"),
        _ => None,
    }
}
