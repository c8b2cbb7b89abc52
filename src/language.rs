//! Language negotiation for conversation turns
//!
//! Decides which language a turn is sent and answered in from three signals:
//! the user's explicit selection, the script the input was written in, and
//! the language of the previous session. Pure and synchronous.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Languages the assistant can converse in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "en")]
    English,
    #[serde(rename = "hi")]
    Hindi,
    #[serde(rename = "bn")]
    Bengali,
    #[serde(rename = "ta")]
    Tamil,
    #[serde(rename = "te")]
    Telugu,
    #[serde(rename = "kn")]
    Kannada,
    #[serde(rename = "ml")]
    Malayalam,
    #[serde(rename = "mr")]
    Marathi,
    #[serde(rename = "gu")]
    Gujarati,
    #[serde(rename = "pa")]
    Punjabi,
    #[serde(rename = "or")]
    Odia,
    #[serde(rename = "ur")]
    Urdu,
    #[serde(rename = "es")]
    Spanish,
    #[serde(rename = "fr")]
    French,
}

/// Writing system of a run of letters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Script {
    Latin,
    Devanagari,
    Bengali,
    Gurmukhi,
    Gujarati,
    Oriya,
    Tamil,
    Telugu,
    Kannada,
    Malayalam,
    Arabic,
}

impl Language {
    /// All supported languages, default first
    pub const ALL: [Self; 14] = [
        Self::English,
        Self::Hindi,
        Self::Bengali,
        Self::Tamil,
        Self::Telugu,
        Self::Kannada,
        Self::Malayalam,
        Self::Marathi,
        Self::Gujarati,
        Self::Punjabi,
        Self::Odia,
        Self::Urdu,
        Self::Spanish,
        Self::French,
    ];

    /// ISO 639-1 code used on the wire
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::English => "en",
            Self::Hindi => "hi",
            Self::Bengali => "bn",
            Self::Tamil => "ta",
            Self::Telugu => "te",
            Self::Kannada => "kn",
            Self::Malayalam => "ml",
            Self::Marathi => "mr",
            Self::Gujarati => "gu",
            Self::Punjabi => "pa",
            Self::Odia => "or",
            Self::Urdu => "ur",
            Self::Spanish => "es",
            Self::French => "fr",
        }
    }

    /// BCP 47 tag handed to speech engines
    #[must_use]
    pub const fn speech_tag(self) -> &'static str {
        match self {
            Self::English => "en-IN",
            Self::Hindi => "hi-IN",
            Self::Bengali => "bn-IN",
            Self::Tamil => "ta-IN",
            Self::Telugu => "te-IN",
            Self::Kannada => "kn-IN",
            Self::Malayalam => "ml-IN",
            Self::Marathi => "mr-IN",
            Self::Gujarati => "gu-IN",
            Self::Punjabi => "pa-IN",
            Self::Odia => "or-IN",
            Self::Urdu => "ur-IN",
            Self::Spanish => "es-ES",
            Self::French => "fr-FR",
        }
    }

    /// Script the language is normally written in
    #[must_use]
    pub const fn script(self) -> Script {
        match self {
            Self::English | Self::Spanish | Self::French => Script::Latin,
            Self::Hindi | Self::Marathi => Script::Devanagari,
            Self::Bengali => Script::Bengali,
            Self::Tamil => Script::Tamil,
            Self::Telugu => Script::Telugu,
            Self::Kannada => Script::Kannada,
            Self::Malayalam => Script::Malayalam,
            Self::Gujarati => Script::Gujarati,
            Self::Punjabi => Script::Gurmukhi,
            Self::Odia => Script::Oriya,
            Self::Urdu => Script::Arabic,
        }
    }

    /// Whether this is the system default language
    #[must_use]
    pub fn is_default(self) -> bool {
        self == Self::default()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        let primary = wanted.split(['-', '_']).next().unwrap_or_default();
        Self::ALL
            .into_iter()
            .find(|lang| lang.code() == primary)
            .ok_or_else(|| Error::Config(format!("unsupported language: {s}")))
    }
}

impl Script {
    /// Classify a single character, `None` for non-letters and unknown blocks
    #[must_use]
    pub fn of(c: char) -> Option<Self> {
        if !c.is_alphabetic() {
            return None;
        }
        let script = match u32::from(c) {
            0x0041..=0x024F => Self::Latin,
            0x0600..=0x06FF | 0x0750..=0x077F | 0xFB50..=0xFDFF | 0xFE70..=0xFEFF => Self::Arabic,
            0x0900..=0x097F => Self::Devanagari,
            0x0980..=0x09FF => Self::Bengali,
            0x0A00..=0x0A7F => Self::Gurmukhi,
            0x0A80..=0x0AFF => Self::Gujarati,
            0x0B00..=0x0B7F => Self::Oriya,
            0x0B80..=0x0BFF => Self::Tamil,
            0x0C00..=0x0C7F => Self::Telugu,
            0x0C80..=0x0CFF => Self::Kannada,
            0x0D00..=0x0D7F => Self::Malayalam,
            _ => return None,
        };
        Some(script)
    }

    /// Language a detected script is attributed to
    #[must_use]
    pub const fn language(self) -> Language {
        match self {
            Self::Latin => Language::English,
            Self::Devanagari => Language::Hindi,
            Self::Bengali => Language::Bengali,
            Self::Gurmukhi => Language::Punjabi,
            Self::Gujarati => Language::Gujarati,
            Self::Oriya => Language::Odia,
            Self::Tamil => Language::Tamil,
            Self::Telugu => Language::Telugu,
            Self::Kannada => Language::Kannada,
            Self::Malayalam => Language::Malayalam,
            Self::Arabic => Language::Urdu,
        }
    }
}

/// Detect the language of a piece of user input from its dominant script
///
/// Returns `None` when the input has no classifiable letters. Latin text is
/// attributed to the default language since scripts cannot tell Latin-script
/// languages apart.
#[must_use]
pub fn detect_language(text: &str) -> Option<Language> {
    let mut counts: Vec<(Script, usize)> = Vec::new();
    for script in text.chars().filter_map(Script::of) {
        match counts.iter_mut().find(|(s, _)| *s == script) {
            Some((_, n)) => *n += 1,
            None => counts.push((script, 1)),
        }
    }

    // Ties go to the non-Latin script: a native word inside English filler
    // is the stronger signal
    counts
        .into_iter()
        .max_by_key(|(script, n)| (*n, *script != Script::Latin))
        .map(|(script, _)| script.language())
}

/// Choose the language for one turn
///
/// 1. Input written in a non-default script that differs from the selection wins.
/// 2. Otherwise the explicit selection.
/// 3. Otherwise the last session language, then the system default.
///
/// Typing in the default language never resets a non-default selection.
#[must_use]
pub fn choose_output_language(
    selection: Option<Language>,
    detected: Option<Language>,
    last_session: Option<Language>,
) -> Language {
    if let Some(switched) = script_switch(selection, detected) {
        return switched;
    }

    selection.or(last_session).unwrap_or_default()
}

/// Detected language when its script differs from the selection's
///
/// Languages sharing a script (Hindi and Marathi) cannot be told apart from
/// the input, so a selection in the detected script stands.
fn script_switch(selection: Option<Language>, detected: Option<Language>) -> Option<Language> {
    detected.filter(|d| {
        !d.is_default() && selection.is_none_or(|s| s.script() != d.script())
    })
}

/// Outcome of negotiating one turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiation {
    /// Language the turn is sent and answered in
    pub language: Language,
    /// Language detected from the input, if any
    pub detected: Option<Language>,
    /// Whether the standing selection should be replaced by `language`
    pub adopt: bool,
}

/// Negotiate a turn's language from raw input text
#[must_use]
pub fn negotiate(
    text: &str,
    selection: Option<Language>,
    last_session: Option<Language>,
) -> Negotiation {
    let detected = detect_language(text);
    let language = choose_output_language(selection, detected, last_session);
    Negotiation {
        language,
        detected,
        adopt: script_switch(selection, detected).is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_language_everywhere_is_idempotent() {
        for lang in Language::ALL {
            assert_eq!(
                choose_output_language(Some(lang), Some(lang), Some(lang)),
                lang
            );
        }
    }

    #[test]
    fn detects_indic_scripts() {
        assert_eq!(detect_language("मुझे बुखार है"), Some(Language::Hindi));
        assert_eq!(detect_language("எனக்கு காய்ச்சல்"), Some(Language::Tamil));
        assert_eq!(detect_language("నాకు జ్వరం ఉంది"), Some(Language::Telugu));
        assert_eq!(detect_language("আমার জ্বর"), Some(Language::Bengali));
        assert_eq!(detect_language("I have a fever"), Some(Language::English));
    }

    #[test]
    fn no_letters_means_no_detection() {
        assert_eq!(detect_language(""), None);
        assert_eq!(detect_language("  123 !? "), None);
    }

    #[test]
    fn dominant_script_wins_in_mixed_input() {
        assert_eq!(
            detect_language("fever बुखार सिरदर्द"),
            Some(Language::Hindi)
        );
        assert_eq!(
            detect_language("I have had a headache since बुखार"),
            Some(Language::English)
        );
    }

    #[test]
    fn detected_non_default_script_overrides_selection() {
        assert_eq!(
            choose_output_language(Some(Language::English), Some(Language::Tamil), None),
            Language::Tamil
        );
        assert_eq!(
            choose_output_language(Some(Language::Hindi), Some(Language::Tamil), None),
            Language::Tamil
        );
    }

    #[test]
    fn default_language_input_keeps_non_default_selection() {
        assert_eq!(
            choose_output_language(Some(Language::Hindi), Some(Language::English), None),
            Language::Hindi
        );
    }

    #[test]
    fn falls_back_to_last_session_then_default() {
        assert_eq!(
            choose_output_language(None, None, Some(Language::Kannada)),
            Language::Kannada
        );
        assert_eq!(choose_output_language(None, None, None), Language::English);
        assert_eq!(
            choose_output_language(None, Some(Language::English), Some(Language::Urdu)),
            Language::Urdu
        );
    }

    #[test]
    fn negotiate_marks_sticky_adoption() {
        let n = negotiate("मुझे बुखार है", Some(Language::English), None);
        assert_eq!(n.language, Language::Hindi);
        assert!(n.adopt);

        let n = negotiate("मुझे बुखार है", Some(Language::Hindi), None);
        assert!(!n.adopt);

        let n = negotiate("still coughing", Some(Language::Hindi), None);
        assert_eq!(n.language, Language::Hindi);
        assert!(!n.adopt);
    }

    #[test]
    fn shared_script_keeps_selection() {
        let n = negotiate("मला ताप आहे", Some(Language::Marathi), None);
        assert_eq!(n.language, Language::Marathi);
        assert_eq!(n.detected, Some(Language::Hindi));
        assert!(!n.adopt);

        let n = negotiate("मुझे बुखार है", Some(Language::Hindi), None);
        assert_eq!(n.language, Language::Hindi);
        assert!(!n.adopt);

        assert_eq!(
            choose_output_language(Some(Language::Marathi), Some(Language::Hindi), None),
            Language::Marathi
        );
    }

    #[test]
    fn devanagari_input_switches_other_scripts() {
        let n = negotiate("मला ताप आहे", Some(Language::Tamil), None);
        assert_eq!(n.language, Language::Hindi);
        assert!(n.adopt);
    }

    #[test]
    fn parses_codes_and_tags() {
        assert_eq!("hi".parse::<Language>().unwrap(), Language::Hindi);
        assert_eq!("ta-IN".parse::<Language>().unwrap(), Language::Tamil);
        assert_eq!(" EN ".parse::<Language>().unwrap(), Language::English);
        assert!("xx".parse::<Language>().is_err());
    }

    #[test]
    fn serde_uses_wire_codes() {
        let json = serde_json::to_string(&Language::Malayalam).unwrap();
        assert_eq!(json, "\"ml\"");
        let back: Language = serde_json::from_str("\"or\"").unwrap();
        assert_eq!(back, Language::Odia);
    }
}
