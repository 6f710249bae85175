//! Keyword tokenizer used both at index time and at query time.
//!
//! Text is lowercased and split on anything that is not alphanumeric.
//! CJK ideographs are emitted one character per token since those scripts
//! do not separate words with spaces. Common English stop words and
//! single-character Latin tokens are dropped.

use std::collections::BTreeMap;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do", "does", "did",
    "will", "would", "could", "should", "may", "might", "must", "can", "shall", "this", "that",
    "these", "those", "i", "you", "he", "she", "it", "we", "they",
];

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{3040}'..='\u{30FF}'
        | '\u{AC00}'..='\u{D7AF}')
}

/// Split `text` into normalized keyword tokens, in order of appearance.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        if is_cjk(c) {
            flush(&mut current, &mut tokens);
            tokens.push(c.to_string());
        } else if c.is_alphanumeric() {
            current.extend(c.to_lowercase());
        } else {
            flush(&mut current, &mut tokens);
        }
    }
    flush(&mut current, &mut tokens);

    tokens
}

fn flush(buf: &mut String, out: &mut Vec<String>) {
    if buf.chars().count() > 1 && !is_stop_word(buf) {
        out.push(std::mem::take(buf));
    } else {
        buf.clear();
    }
}

/// Count term frequencies, sorted by term.
pub fn term_frequencies(tokens: &[String]) -> Vec<(String, u32)> {
    let mut counts: BTreeMap<&str, u32> = BTreeMap::new();
    for t in tokens {
        *counts.entry(t.as_str()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(t, n)| (t.to_string(), n))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_splits_on_punctuation() {
        assert_eq!(
            tokenize("Rust's borrow-checker, explained!"),
            vec!["rust", "borrow", "checker", "explained"]
        );
    }

    #[test]
    fn drops_stop_words_and_single_letters() {
        assert_eq!(tokenize("The cat and a x dog"), vec!["cat", "dog"]);
    }

    #[test]
    fn cjk_characters_become_tokens() {
        assert_eq!(tokenize("搜索 engine"), vec!["搜", "索", "engine"]);
    }

    #[test]
    fn numbers_are_kept() {
        assert_eq!(tokenize("error 404 in v2"), vec!["error", "404", "v2"]);
    }

    #[test]
    fn term_frequencies_are_sorted_and_counted() {
        let tokens = tokenize("beta alpha beta gamma beta");
        assert_eq!(
            term_frequencies(&tokens),
            vec![
                ("alpha".to_string(), 1),
                ("beta".to_string(), 3),
                ("gamma".to_string(), 1)
            ]
        );
    }
}
