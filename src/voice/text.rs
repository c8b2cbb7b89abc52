//! Text cleanup before synthesis

use std::sync::LazyLock;

use regex::Regex;

static MARKDOWN_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").expect("valid link regex"));

static DECORATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[*_`#>~|]+").expect("valid decoration regex"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Strip markdown decoration and emoji so a synthesizer reads only words
#[must_use]
pub fn strip_for_speech(text: &str) -> String {
    let text = MARKDOWN_LINK.replace_all(text, "$1");
    let text = DECORATION.replace_all(&text, " ");
    let text: String = text.chars().filter(|c| !is_pictograph(*c)).collect();
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

fn is_pictograph(c: char) -> bool {
    matches!(
        u32::from(c),
        0x1F000..=0x1FAFF   // emoji, symbols, flags
            | 0x2600..=0x27BF // misc symbols, dingbats
            | 0x2B00..=0x2BFF // arrows, stars
            | 0xFE00..=0xFE0F // variation selectors
            | 0x200D          // zero width joiner
            | 0x20E3          // keycap
    )
}
