//! Phrase scanning over transcripts.

use regex::{Regex, RegexBuilder};
use vscan_models::{ScanStats, SegmentHits};

use crate::error::{MediaError, MediaResult};

/// Transcript text of one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptUnit {
    pub name: String,
    pub text: String,
}

impl TranscriptUnit {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// Counts whole-word, case-insensitive occurrences of a phrase.
#[derive(Debug, Clone)]
pub struct PhraseScanner {
    phrase: String,
    pattern: Regex,
}

impl PhraseScanner {
    pub fn new(phrase: &str) -> MediaResult<Self> {
        let phrase = phrase.trim();
        if phrase.is_empty() {
            return Err(MediaError::InvalidPhrase("phrase is empty".to_string()));
        }

        // Any run of whitespace in the phrase matches any run in the text.
        let escaped: Vec<String> = phrase.split_whitespace().map(regex::escape).collect();
        let pattern = RegexBuilder::new(&escaped.join(r"\s+"))
            .case_insensitive(true)
            .build()
            .map_err(|e| MediaError::InvalidPhrase(e.to_string()))?;

        Ok(Self {
            phrase: phrase.to_string(),
            pattern,
        })
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    /// Occurrences of the phrase in `text` that are not part of a longer word.
    pub fn count(&self, text: &str) -> u32 {
        self.pattern
            .find_iter(text)
            .filter(|m| {
                let before = text[..m.start()].chars().next_back();
                let after = text[m.end()..].chars().next();
                !before.map_or(false, is_word_char) && !after.map_or(false, is_word_char)
            })
            .count() as u32
    }

    /// Aggregate statistics across every unit.
    pub fn scan(&self, units: &[TranscriptUnit]) -> ScanStats {
        let mut stats = ScanStats {
            total_segments: units.len() as u32,
            ..ScanStats::default()
        };

        for unit in units {
            stats.total_words += unit.text.split_whitespace().count() as u64;
            let occurrences = self.count(&unit.text);
            if occurrences > 0 {
                stats.segments_with_phrase += 1;
                stats.total_occurrences += occurrences;
                stats.segment_hits.push(SegmentHits {
                    segment: unit.name.clone(),
                    occurrences,
                });
            }
        }

        if stats.total_words > 0 {
            stats.occurrences_per_1000_words =
                stats.total_occurrences as f64 * 1000.0 / stats.total_words as f64;
        }
        stats
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
