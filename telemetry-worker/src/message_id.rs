//! Human-readable correlation ids: three words from a fixed corpus.
//!
//! Ids are unique with high probability only. With a corpus of `n` words
//! there are `n^3` ids, and the usual birthday bound applies: expect a
//! collision around `sqrt(n^3)` messages, about a million for the shipped
//! corpus. Nothing here checks or enforces uniqueness; ids correlate
//! artifacts across sinks, they are not keys.
use std::fmt;
use std::hash::Hasher;
use std::path::Path;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Serialize, Serializer};
use siphasher::sip::SipHasher13;
use thiserror::Error;

pub const SEPARATOR: char = '-';
const WORDS_PER_ID: usize = 3;

#[derive(Error, Debug)]
pub enum WordListError {
    #[error("failed to read word list {path}: {error}")]
    Read {
        path: String,
        error: std::io::Error,
    },
    #[error("word list {0} contains no words")]
    Empty(String),
    #[error("word {word:?} on line {line} contains the id separator")]
    InvalidWord { word: String, line: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    pub fn from_words(words: [&str; WORDS_PER_ID]) -> Self {
        let [first, second, third] = words;
        MessageId(format!("{first}{SEPARATOR}{second}{SEPARATOR}{third}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for MessageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// The word corpus, loaded once at startup and shared read-only by every
/// pipeline run.
#[derive(Debug, Clone)]
pub struct WordList {
    words: Arc<[String]>,
}

impl WordList {
    /// Load one word per line, skipping blank lines and `#` comments.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WordListError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|error| WordListError::Read {
            path: path.display().to_string(),
            error,
        })?;

        Self::parse(&contents).map_err(|error| match error {
            WordListError::Empty(_) => WordListError::Empty(path.display().to_string()),
            other => other,
        })
    }

    pub fn parse(contents: &str) -> Result<Self, WordListError> {
        let mut words = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            let word = line.trim();
            if word.is_empty() || word.starts_with('#') {
                continue;
            }
            if word.contains(SEPARATOR) {
                return Err(WordListError::InvalidWord {
                    word: word.to_owned(),
                    line: index + 1,
                });
            }
            words.push(word.to_owned());
        }

        if words.is_empty() {
            return Err(WordListError::Empty("<inline>".to_owned()));
        }

        Ok(Self {
            words: words.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// A fresh id from the given entropy source.
    pub fn random_id<R: Rng + ?Sized>(&self, rng: &mut R) -> MessageId {
        let mut pick = || {
            self.words
                .choose(&mut *rng)
                .map(String::as_str)
                .unwrap_or_default()
        };
        MessageId::from_words([pick(), pick(), pick()])
    }

    /// An id derived from `key` alone, so the same key always maps to the
    /// same id. Each position hashes the key with its own salt.
    pub fn derived_id(&self, key: &str) -> MessageId {
        let pick = |position: u8| {
            let mut hasher = SipHasher13::new_with_keys(0, u64::from(position));
            hasher.write(key.as_bytes());
            // len() is never zero: parse rejects empty corpora
            let index = (hasher.finish() % self.words.len() as u64) as usize;
            self.words[index].as_str()
        };
        MessageId::from_words([pick(0), pick(1), pick(2)])
    }
}

/// Where the pipeline takes a delivery's id from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageIdSource {
    /// Derived from the feed's message id, stable across redeliveries.
    Delivery,
    /// Random for every processing attempt.
    Random,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseMessageIdSourceError(pub String);

impl fmt::Display for ParseMessageIdSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is not a valid message id source", self.0)
    }
}

impl std::str::FromStr for MessageIdSource {
    type Err = ParseMessageIdSourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "delivery" => Ok(MessageIdSource::Delivery),
            "random" => Ok(MessageIdSource::Random),
            invalid => Err(ParseMessageIdSourceError(invalid.to_owned())),
        }
    }
}

/// Hands out ids for pipeline runs.
#[derive(Debug, Clone)]
pub struct MessageIdGenerator {
    words: WordList,
    source: MessageIdSource,
}

impl MessageIdGenerator {
    pub fn new(words: WordList, source: MessageIdSource) -> Self {
        Self { words, source }
    }

    /// Id for one run. `delivery_key` is the feed's stable id for the
    /// delivery, if it has one; without it every source falls back to random.
    pub fn generate(&self, delivery_key: Option<&str>) -> MessageId {
        match (self.source, delivery_key.filter(|key| !key.is_empty())) {
            (MessageIdSource::Delivery, Some(key)) => self.words.derived_id(key),
            _ => self.words.random_id(&mut rand::thread_rng()),
        }
    }
}
