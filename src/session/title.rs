//! Session titles derived from the first user utterance.

use std::sync::LazyLock;

use regex::Regex;

/// Maximum title length in characters, ellipsis excluded.
pub const MAX_TITLE_CHARS: usize = 50;

/// Title used when the utterance has no printable content.
pub const UNTITLED: &str = "Untitled conversation";

static WHITESPACE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\s+").ok());

/// Derive a one-line title: control characters dropped, whitespace runs
/// collapsed, then truncated on a character boundary with `...`.
#[must_use]
pub fn derive_title(utterance: &str) -> String {
    let printable: String = utterance
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();

    let collapsed = match WHITESPACE.as_ref() {
        Some(re) => re.replace_all(printable.trim(), " ").into_owned(),
        None => printable.split_whitespace().collect::<Vec<_>>().join(" "),
    };

    if collapsed.is_empty() {
        return UNTITLED.to_string();
    }

    match collapsed.char_indices().nth(MAX_TITLE_CHARS) {
        Some((cut, _)) => format!("{}...", collapsed[..cut].trim_end()),
        None => collapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_utterance_kept_verbatim() {
        assert_eq!(derive_title("concerts ce weekend"), "concerts ce weekend");
    }

    #[test]
    fn test_control_chars_and_whitespace() {
        assert_eq!(
            derive_title("  expos\tà\u{0007}Nice\n\n demain "),
            "expos à Nice demain"
        );
        assert_eq!(derive_title("\u{0000}\n\t"), UNTITLED);
    }

    #[test]
    fn test_truncates_on_char_boundary() {
        let long = "é".repeat(80);
        let title = derive_title(&long);
        assert!(title.ends_with("..."));
        assert_eq!(title.chars().count(), MAX_TITLE_CHARS + 3);

        let exact = "a".repeat(MAX_TITLE_CHARS);
        assert_eq!(derive_title(&exact), exact);
    }
}
