use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Strip LaTeX markup from a BibTeX field value.
///
/// Accent macros (`\"o`, `\'{e}`) keep their base letter, other control words
/// (`\emph`, `\textbf`) are dropped, braces and `~` become nothing or spaces.
pub fn strip_latex(value: &str) -> String {
    static ACCENT_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r#"\\(?:[`'^"~=.]\s*\{?([A-Za-z])\}?|[uvHckr]\{([A-Za-z])\})"#).unwrap()
    });
    static COMMAND_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\[A-Za-z]+\*?\s*").unwrap());
    static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

    let s = ACCENT_RE.replace_all(value, "${1}${2}");
    let s = COMMAND_RE.replace_all(&s, "");
    let s = s.replace(['{', '}', '$'], "").replace('~', " ");
    WS_RE.replace_all(s.trim(), " ").into_owned()
}

/// Normalize a title for comparison: LaTeX stripped, NFKD, ASCII alphanumeric, lowercase.
pub fn normalize_title(title: &str) -> String {
    static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9]").unwrap());

    let title = strip_latex(&title.replace("&amp;", "&"));
    let ascii: String = title.nfkd().filter(|c| c.is_ascii()).collect();
    NON_ALNUM.replace_all(&ascii, "").to_lowercase()
}

/// Check if two titles match using fuzzy comparison (95% threshold).
pub fn titles_match(title_a: &str, title_b: &str) -> bool {
    let norm_a = normalize_title(title_a);
    let norm_b = normalize_title(title_b);

    if norm_a.is_empty() || norm_b.is_empty() {
        return false;
    }

    rapidfuzz::fuzz::ratio(norm_a.chars(), norm_b.chars()) >= 0.95
}

/// Up to `max` significant words of a title, for building search queries.
pub fn query_words(title: &str, max: usize) -> Vec<String> {
    const STOP_WORDS: &[&str] = &[
        "a", "an", "the", "of", "and", "or", "for", "to", "in", "on", "with", "by", "via", "from",
        "is", "are", "at", "as",
    ];
    strip_latex(title)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1)
        .filter(|w| !STOP_WORDS.contains(&w.to_lowercase().as_str()))
        .take(max)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_latex_markup() {
        assert_eq!(strip_latex(r"{BERT}: Pre-training of Deep"), "BERT: Pre-training of Deep");
        assert_eq!(strip_latex(r#"Sch\"{o}lkopf and Sch\'olkopf"#), "Scholkopf and Scholkopf");
        assert_eq!(strip_latex(r"\emph{Very} deep~nets"), "Very deep nets");
        assert_eq!(strip_latex(r"Learning $\alpha$ values"), "Learning values");
    }

    #[test]
    fn normalize_drops_case_and_punctuation() {
        assert_eq!(
            normalize_title("{Attention} Is All You Need!"),
            "attentionisallyouneed"
        );
        assert_eq!(normalize_title("Über Größe"), "ubergroe");
    }

    #[test]
    fn fuzzy_title_match() {
        assert!(titles_match(
            "Attention is all you need",
            "{A}ttention {I}s {A}ll {Y}ou {N}eed"
        ));
        assert!(!titles_match("Attention is all you need", "Deep residual learning"));
        assert!(!titles_match("", "anything"));
    }

    #[test]
    fn query_words_skip_stop_words() {
        assert_eq!(
            query_words("The Design of an {Efficient} Cache for the Web", 4),
            vec!["Design", "Efficient", "Cache", "Web"]
        );
    }
}
