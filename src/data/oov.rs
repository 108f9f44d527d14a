//! Per-example extended vocabulary for copying source OOV words.

use std::collections::HashMap;

use super::vocab::{Vocab, UNK_ID};

/// Base vocabulary plus the source tokens it does not know, appended in
/// order of first occurrence. Owned by one example.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtendedVocab {
    base_size: usize,
    oovs: Vec<String>,
    index: HashMap<String, usize>,
}

impl ExtendedVocab {
    /// Returns the mapping and the extended ids of `source`.
    pub fn from_source(vocab: &Vocab, source: &[String]) -> (Self, Vec<usize>) {
        let mut ext = Self {
            base_size: vocab.len(),
            oovs: Vec::new(),
            index: HashMap::new(),
        };
        let ids = source
            .iter()
            .map(|token| match vocab.get(token) {
                Some(id) => id,
                None => ext.intern(token),
            })
            .collect();
        (ext, ids)
    }

    fn intern(&mut self, token: &str) -> usize {
        if let Some(&id) = self.index.get(token) {
            return id;
        }
        let id = self.base_size + self.oovs.len();
        self.oovs.push(token.to_string());
        self.index.insert(token.to_string(), id);
        id
    }

    /// Size of the base vocabulary this mapping was built against.
    pub fn base_size(&self) -> usize {
        self.base_size
    }

    pub fn num_oovs(&self) -> usize {
        self.oovs.len()
    }

    pub fn oovs(&self) -> &[String] {
        &self.oovs
    }

    /// Total size of the extended distribution.
    pub fn len(&self) -> usize {
        self.base_size + self.oovs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Target-side id: base id, else the copy id when the token occurs in the
    /// source and copying is on, else [`UNK_ID`].
    pub fn target_id(&self, vocab: &Vocab, token: &str, pointer_gen: bool) -> usize {
        if let Some(id) = vocab.get(token) {
            return id;
        }
        if pointer_gen {
            if let Some(&id) = self.index.get(token) {
                return id;
            }
        }
        UNK_ID
    }

    /// Surface form of any id of the extended distribution.
    pub fn resolve<'a>(&'a self, vocab: &'a Vocab, id: usize) -> Option<&'a str> {
        if id < self.base_size {
            vocab.token(id)
        } else {
            self.oovs.get(id - self.base_size).map(|s| s.as_str())
        }
    }

    pub fn resolve_all(&self, vocab: &Vocab, ids: &[usize]) -> Vec<String> {
        ids.iter()
            .map(|&id| {
                self.resolve(vocab, id)
                    .unwrap_or(super::vocab::UNK_TOKEN)
                    .to_string()
            })
            .collect()
    }
}
