//! Word-level vocabulary with reserved special tokens.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{GroundGenError, Result};

pub const PAD_ID: usize = 0;
pub const UNK_ID: usize = 1;
pub const START_ID: usize = 2;
pub const STOP_ID: usize = 3;
pub const NUM_RESERVED: usize = 4;

pub const PAD_TOKEN: &str = "[PAD]";
pub const UNK_TOKEN: &str = "[UNK]";
pub const START_TOKEN: &str = "[START]";
pub const STOP_TOKEN: &str = "[STOP]";

#[derive(Serialize, Deserialize)]
struct VocabFile {
    id_to_token: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Vocab {
    id_to_token: Vec<String>,
    token_to_id: HashMap<String, usize>,
}

impl Vocab {
    fn from_tokens(id_to_token: Vec<String>) -> Self {
        let token_to_id = id_to_token
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();
        Self {
            id_to_token,
            token_to_id,
        }
    }

    fn reserved() -> Vec<String> {
        [PAD_TOKEN, UNK_TOKEN, START_TOKEN, STOP_TOKEN]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Counts corpus tokens and keeps the `max_size - 4` most frequent,
    /// ties broken alphabetically.
    pub fn build<'a, I, S>(corpus: I, max_size: usize) -> Self
    where
        I: IntoIterator<Item = &'a S>,
        S: AsRef<[String]> + 'a + ?Sized,
    {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for seq in corpus {
            for token in seq.as_ref() {
                *counts.entry(token.as_str()).or_insert(0) += 1;
            }
        }
        let reserved = Self::reserved();
        let mut ranked: Vec<(&str, usize)> = counts
            .into_iter()
            .filter(|(t, _)| !reserved.iter().any(|r| r == t))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let keep = max_size.saturating_sub(NUM_RESERVED);
        let mut tokens = reserved;
        tokens.extend(ranked.into_iter().take(keep).map(|(t, _)| t.to_string()));

        tracing::debug!(size = tokens.len(), cap = max_size, "vocabulary built");
        Self::from_tokens(tokens)
    }

    /// Tokens in id order, after the reserved ones.
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tokens = Self::reserved();
        for w in words {
            let w = w.into();
            if !tokens.contains(&w) {
                tokens.push(w);
            }
        }
        Self::from_tokens(tokens)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| GroundGenError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed: VocabFile = serde_json::from_reader(BufReader::new(file))?;
        let reserved = Self::reserved();
        if parsed.id_to_token.len() < NUM_RESERVED
            || parsed.id_to_token[..NUM_RESERVED] != reserved[..]
        {
            return Err(GroundGenError::config(format!(
                "{} does not start with the reserved tokens",
                path.display()
            )));
        }
        Ok(Self::from_tokens(parsed.id_to_token))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| GroundGenError::FileWrite {
            path: path.to_path_buf(),
            source,
        })?;
        let out = VocabFile {
            id_to_token: self.id_to_token.clone(),
        };
        serde_json::to_writer_pretty(BufWriter::new(file), &out)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }

    pub fn get(&self, token: &str) -> Option<usize> {
        self.token_to_id.get(token).copied()
    }

    /// Unknown tokens map to [`UNK_ID`].
    pub fn id(&self, token: &str) -> usize {
        self.get(token).unwrap_or(UNK_ID)
    }

    pub fn token(&self, id: usize) -> Option<&str> {
        self.id_to_token.get(id).map(|s| s.as_str())
    }

    pub fn tokens(&self) -> &[String] {
        &self.id_to_token
    }
}
