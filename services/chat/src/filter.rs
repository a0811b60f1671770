//! Profanity filtering applied to every relayed message

use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;
use thiserror::Error;

/// Filter failure; the message is refused rather than sent unfiltered
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct FilterError(pub String);

/// Pure text transform run inline before a message is persisted
pub trait ContentFilter: Send + Sync {
    fn clean(&self, text: &str) -> Result<String, FilterError>;
}

const DEFAULT_WORDS: &[&str] = &[
    "arse", "asshole", "bastard", "bitch", "bollocks", "bullshit", "crap", "cunt", "damn",
    "dick", "fuck", "fucker", "fucking", "motherfucker", "piss", "prick", "shit", "slut",
    "twat", "wanker", "whore",
];

/// Masks whole words from a list, case-insensitively, with `*`
#[derive(Debug, Clone)]
pub struct WordListFilter {
    pattern: Option<Regex>,
}

impl WordListFilter {
    pub fn new<I, S>(words: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let alternatives: Vec<String> = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_string())
            .filter(|w| !w.is_empty())
            .map(|w| regex::escape(&w))
            .collect();

        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }

        let pattern = RegexBuilder::new(&format!(r"\b(?:{})\b", alternatives.join("|")))
            .case_insensitive(true)
            .build()
            .map_err(|e| FilterError(format!("invalid word list: {}", e)))?;

        Ok(Self {
            pattern: Some(pattern),
        })
    }
}

impl Default for WordListFilter {
    fn default() -> Self {
        static DEFAULT_PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = DEFAULT_PATTERN.get_or_init(|| {
            RegexBuilder::new(&format!(r"\b(?:{})\b", DEFAULT_WORDS.join("|")))
                .case_insensitive(true)
                .build()
                .expect("Failed to compile default profanity regex")
        });
        Self {
            pattern: Some(pattern.clone()),
        }
    }
}

impl ContentFilter for WordListFilter {
    fn clean(&self, text: &str) -> Result<String, FilterError> {
        let Some(pattern) = &self.pattern else {
            return Ok(text.to_string());
        };

        let cleaned = pattern.replace_all(text, |caps: &regex::Captures| {
            "*".repeat(caps[0].chars().count())
        });
        Ok(cleaned.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks_listed_words() {
        let filter = WordListFilter::default();
        assert_eq!(filter.clean("well damn that").unwrap(), "well **** that");
    }

    #[test]
    fn test_matching_is_case_insensitive_and_whole_word() {
        let filter = WordListFilter::new(["heck"]).unwrap();
        assert_eq!(filter.clean("HECK no").unwrap(), "**** no");
        assert_eq!(filter.clean("checkers").unwrap(), "checkers");
    }

    #[test]
    fn test_clean_text_is_untouched() {
        let filter = WordListFilter::default();
        assert_eq!(filter.clean("hello there").unwrap(), "hello there");
    }

    #[test]
    fn test_empty_word_list_is_identity() {
        let filter = WordListFilter::new(Vec::<String>::new()).unwrap();
        assert_eq!(filter.clean("anything goes").unwrap(), "anything goes");
    }

    #[test]
    fn test_special_characters_are_escaped() {
        let filter = WordListFilter::new(["a.b"]).unwrap();
        assert_eq!(filter.clean("a.b axb").unwrap(), "*** axb");
    }
}
