use std::collections::BTreeSet;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::discovery::find_files_by_extension;

/// Distinct citation keys referenced by a document.
pub type CitationKeySet = BTreeSet<String>;

/// Citation keys used in one chunk of LaTeX source.
///
/// Recognizes `\cite` and `\nocite`, the natbib forms (`\citep`, `\citet`,
/// `\citealp`, `\citeauthor`, `\citeyearpar`, ...) and the biblatex forms
/// (`\parencite`, `\textcite`, `\autocite`, `\footcite`, ...), capitalized or
/// starred, with up to two optional `[...]` arguments before the braced key
/// list. Other macros that merely start with `\cite` are not citations.
pub fn extract_citation_keys(text: &str) -> Vec<String> {
    static CITE_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(concat!(
            r"\\(?:[nN]o|[pP]aren|[tT]ext|[aA]uto|[fF]oot|[sS]mart|[sS]uper|[fF]ull)?[cC]ite",
            r"(?:yearpar|year|author|title|date|url|num|alp|alt|NP|p|t|A|N|s)?",
            r"\*?(?:\s*\[[^\]]*\]){0,2}\s*\{([^}]*)\}",
        ))
        .unwrap()
    });

    CITE_RE
        .captures_iter(text)
        .flat_map(|caps| {
            caps.get(1)
                .map(|m| m.as_str())
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Harvest every citation key from the `.tex` files under `root`.
///
/// Files are read as bytes and decoded lossily; unreadable files are skipped.
pub fn harvest_citation_keys(root: &Path) -> CitationKeySet {
    let mut keys = CitationKeySet::new();
    for path in find_files_by_extension(root, "tex") {
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not read tex file");
                continue;
            }
        };
        let text = String::from_utf8_lossy(&bytes);
        let before = keys.len();
        keys.extend(extract_citation_keys(&text));
        tracing::debug!(
            path = %path.display(),
            new_keys = keys.len() - before,
            "harvested citation keys"
        );
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_and_natbib_variants() {
        let text = r"As shown in \cite{vaswani2017} and \citep{he2016, devlin2019}.
            \citet*{brown2020} argue otherwise; see also \citeauthor{lecun1998}.
            \nocite{extra}";
        assert_eq!(
            extract_citation_keys(text),
            vec!["vaswani2017", "he2016", "devlin2019", "brown2020", "lecun1998", "extra"]
        );
    }

    #[test]
    fn optional_arguments() {
        let text = r"\cite[p.~4]{knuth84} \citep[see][chap.~2]{lamport94} \cite [e.g.] {x}";
        assert_eq!(extract_citation_keys(text), vec!["knuth84", "lamport94", "x"]);
    }

    #[test]
    fn empty_and_whitespace_keys_dropped() {
        let text = "\\cite{a,, b ,\n c,}";
        assert_eq!(extract_citation_keys(text), vec!["a", "b", "c"]);
        assert!(extract_citation_keys(r"\cite{}").is_empty());
    }

    #[test]
    fn other_macros_ignored() {
        assert!(extract_citation_keys(r"\ref{fig1} \label{sec:intro} \citation").is_empty());
        let text = r"\citation{x} \citeindexfalse{y} \citestyle{plain} \excite{z} \cited{w}";
        assert!(extract_citation_keys(text).is_empty());
    }

    #[test]
    fn biblatex_and_capitalized_variants() {
        let text = r"\parencite{p1} \textcite[see][]{t1} \Citet{c1} \citealp{a1}
            \citeyearpar{y1} \autocite*{s1} \footcite[12]{f1} \citeA{apa1}";
        assert_eq!(
            extract_citation_keys(text),
            vec!["p1", "t1", "c1", "a1", "y1", "s1", "f1", "apa1"]
        );
    }

    #[test]
    fn harvest_walks_tree_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sec")).unwrap();
        std::fs::write(dir.path().join("main.tex"), r"\cite{a,b} \input{sec/one}").unwrap();
        std::fs::write(dir.path().join("sec/one.tex"), r"\citep{b,c}").unwrap();
        std::fs::write(dir.path().join("refs.bib"), r"\cite{not_tex}").unwrap();

        let keys = harvest_citation_keys(dir.path());
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn harvest_tolerates_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = b"caf\xe9 \\cite{latin1key}".to_vec();
        bytes.extend_from_slice(b" \xff\xfe");
        std::fs::write(dir.path().join("paper.tex"), bytes).unwrap();

        let keys = harvest_citation_keys(dir.path());
        assert!(keys.contains("latin1key"));
    }
}
