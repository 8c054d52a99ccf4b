// Full-text inverted index. Conjunctive (AND) search only: no TF-IDF
// scoring, no phrase search — the source interface's search surface is
// token-set intersection, nothing more. Grounded in the teacher's
// `FullTextIndex`/inverted-index shape, minus the relevance scoring that
// shape doesn't need here, plus a reverse row-id → token-set map the teacher
// never built, which is what makes `delete` a real operation instead of a
// stub.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::index::btree::RowId;

/// Lowercases and splits on any whitespace (space, tab, newline).
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(|t| t.to_lowercase()).collect()
}

#[derive(Default)]
struct Inner {
    postings: HashMap<String, HashSet<RowId>>,
    /// Reverse index: without this, `delete` would have no way to find
    /// which postings lists mention a given row.
    doc_tokens: HashMap<RowId, HashSet<String>>,
}

pub struct FullTextIndex {
    inner: RwLock<Inner>,
}

impl FullTextIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn index_document(&self, row_id: RowId, text: &str) {
        let tokens: HashSet<String> = tokenize(text).into_iter().collect();
        let mut inner = self.inner.write();
        for token in &tokens {
            inner.postings.entry(token.clone()).or_default().insert(row_id);
        }
        inner.doc_tokens.insert(row_id, tokens);
    }

    pub fn delete_document(&self, row_id: RowId) {
        let mut inner = self.inner.write();
        let Some(tokens) = inner.doc_tokens.remove(&row_id) else {
            return;
        };
        for token in tokens {
            if let Some(postings) = inner.postings.get_mut(&token) {
                postings.remove(&row_id);
                if postings.is_empty() {
                    inner.postings.remove(&token);
                }
            }
        }
    }

    /// Conjunctive AND across every query token's posting list.
    pub fn search(&self, query: &str) -> Vec<RowId> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Vec::new();
        }
        let inner = self.inner.read();
        let mut candidates: Option<HashSet<RowId>> = None;
        for token in &tokens {
            let postings = inner.postings.get(token).cloned().unwrap_or_default();
            candidates = Some(match candidates {
                None => postings,
                Some(existing) => existing.intersection(&postings).copied().collect(),
            });
            if candidates.as_ref().is_some_and(HashSet::is_empty) {
                break;
            }
        }
        let mut out: Vec<RowId> = candidates.unwrap_or_default().into_iter().collect();
        out.sort_unstable();
        out
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.postings.clear();
        inner.doc_tokens.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().doc_tokens.is_empty()
    }
}

impl Default for FullTextIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_and_splits_on_whitespace() {
        assert_eq!(tokenize("Hello\tWorld\nFoo"), vec!["hello", "world", "foo"]);
    }

    #[test]
    fn conjunctive_search_intersects_postings() {
        let idx = FullTextIndex::new();
        idx.index_document(0, "the quick brown fox");
        idx.index_document(1, "the lazy dog");
        idx.index_document(2, "quick lazy cat");

        assert_eq!(idx.search("quick"), vec![0, 2]);
        assert_eq!(idx.search("quick lazy"), vec![2]);
        assert_eq!(idx.search("quick missing"), Vec::<RowId>::new());
    }

    #[test]
    fn delete_removes_document_from_every_posting_list() {
        let idx = FullTextIndex::new();
        idx.index_document(0, "alpha beta");
        idx.index_document(1, "beta gamma");
        idx.delete_document(0);
        assert_eq!(idx.search("beta"), vec![1]);
        assert_eq!(idx.search("alpha"), Vec::<RowId>::new());
    }
}
