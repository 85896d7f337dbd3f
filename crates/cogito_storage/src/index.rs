//! The abstruse index: a trie of tries keyed by successive structural
//! layers of a term.
//!
//! Each depth of the indexed terms gets its own trie level. A trie walks one
//! key slice; its leaves point at the abstruse nodes for the next depth,
//! which own the next trie, and so on. Retrieval reports every stored object
//! whose key is unifiable with the query's key — over-approximation is fine
//! (callers re-check with the real unifier), missing a candidate is not.
//!
//! All traversal is written once against [`NodeStore`], so the in-memory
//! index and the persistent ones share every line of this logic.

use log::debug;

use crate::error::{StorageError, StorageResult};
use crate::keys::{project_key, AbstruseKey, KeyElement, KeySlice};
use crate::node::{NodeId, NodeStore};

/// An abstruse index over some node store.
#[derive(Debug)]
pub struct AbstruseIndex<S: NodeStore> {
    store: S,
}

impl<S: NodeStore> AbstruseIndex<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Number of distinct objects in the index.
    pub fn len(&self) -> StorageResult<usize> {
        self.store.object_count()
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Inserts an object under its abstruse key.
    pub fn add(&mut self, key: &AbstruseKey<S::Leaf>, payload: S::Object) -> StorageResult<()> {
        self.add_at(self.store.root(), key, 0, payload)
    }

    fn add_at(
        &mut self,
        abstruse: NodeId,
        key: &AbstruseKey<S::Leaf>,
        level: usize,
        payload: S::Object,
    ) -> StorageResult<()> {
        let slice = match key.get(level) {
            Some(slice) if !slice.is_empty() => slice,
            _ => {
                let object = self.store.store_object(payload)?;
                return self.store.attach_object(abstruse, object);
            }
        };

        let subtrie = self.store.subtrie_of(abstruse)?;

        // With wildcards disabled the trie walk follows the one exact path
        // for this slice, so at most one pre-existing next-depth node can
        // come back.
        let mut existing = Vec::new();
        self.trie_retrieve(subtrie, Some(slice), 0, false, &mut Vec::new(), &mut existing)?;

        if existing.len() > 1 {
            return Err(StorageError::CorruptIndex {
                detail: format!(
                    "{} sibling nodes found for one exact key at trie {}",
                    existing.len(),
                    subtrie
                ),
            });
        }

        let destination = match existing.first() {
            Some((node, _)) => *node,
            None => {
                let node = self.store.next_id()?;
                self.trie_add(subtrie, slice, 0, node)?;
                node
            }
        };

        self.add_at(destination, key, level + 1, payload)
    }

    fn trie_add(
        &mut self,
        trie: NodeId,
        key: &KeySlice<S::Leaf>,
        level: usize,
        abstruse: NodeId,
    ) -> StorageResult<()> {
        match key.get(level) {
            None => self.store.attach_abstruse(trie, abstruse),
            Some(element) => {
                let child = match self.store.child_by_key(trie, element)? {
                    Some(child) => child,
                    None => {
                        let child = self.store.next_id()?;
                        self.store.attach_child(trie, element.clone(), child)?;
                        child
                    }
                };
                self.trie_add(child, key, level + 1, abstruse)
            }
        }
    }

    /// Retrieves every object whose stored key could unify with the query
    /// key.
    pub fn retrieve(&self, key: &AbstruseKey<S::Leaf>) -> StorageResult<Vec<S::Object>> {
        let mut out = Vec::new();
        self.retrieve_at(self.store.root(), key, None, None, 0, &mut out)?;
        debug!("abstruse retrieval found {} candidate(s)", out.len());
        Ok(out)
    }

    fn retrieve_at(
        &self,
        abstruse: NodeId,
        full_key: &AbstruseKey<S::Leaf>,
        previous_key: Option<&KeySlice<S::Leaf>>,
        projection_key: Option<&KeySlice<S::Leaf>>,
        level: usize,
        out: &mut Vec<S::Object>,
    ) -> StorageResult<()> {
        // Terms stored at this depth are candidates no matter how much of
        // the query key is left.
        out.extend(self.store.objects_of(abstruse)?);

        let Some(subtrie) = self.store.subtrie_lookup(abstruse)? else {
            return Ok(());
        };

        match full_key.get(level) {
            None => {
                // Query key exhausted but deeper terms exist: everything
                // below is a candidate.
                let mut matches = Vec::new();
                self.trie_retrieve(subtrie, None, 0, true, &mut Vec::new(), &mut matches)?;
                for (node, found) in matches {
                    self.retrieve_at(node, full_key, previous_key, Some(&found), level + 1, out)?;
                }
                Ok(())
            }
            Some(slice) => {
                let projected = match projection_key {
                    Some(projection) => project_key(
                        previous_key.map(Vec::as_slice).unwrap_or(&[]),
                        projection,
                        slice,
                    ),
                    None => slice.clone(),
                };

                if projected.is_empty() {
                    return Ok(());
                }

                let mut matches = Vec::new();
                self.trie_retrieve(subtrie, Some(&projected), 0, true, &mut Vec::new(), &mut matches)?;
                for (node, found) in matches {
                    self.retrieve_at(node, full_key, Some(&projected), Some(&found), level + 1, out)?;
                }
                Ok(())
            }
        }
    }

    /// One trie level: walks `key` (or everything, when `key` is `None`)
    /// and collects the abstruse nodes at the reached leaves together with
    /// the path actually matched.
    fn trie_retrieve(
        &self,
        trie: NodeId,
        key: Option<&[KeyElement<S::Leaf>]>,
        level: usize,
        use_wildcard: bool,
        found: &mut Vec<KeyElement<S::Leaf>>,
        out: &mut Vec<(NodeId, KeySlice<S::Leaf>)>,
    ) -> StorageResult<()> {
        let Some(key) = key else {
            for node in self.store.abstruses_of(trie)? {
                out.push((node, found.clone()));
            }
            for (_, child) in self.store.children_of(trie)? {
                self.trie_retrieve(child, None, level + 1, use_wildcard, found, out)?;
            }
            return Ok(());
        };

        let Some(element) = key.get(level) else {
            for node in self.store.abstruses_of(trie)? {
                out.push((node, found.clone()));
            }
            return Ok(());
        };

        if !element.is_wildcard() || !use_wildcard {
            // Exact descent for the element itself.
            if let Some(child) = self.store.child_by_key(trie, element)? {
                found.push(element.clone());
                self.trie_retrieve(child, Some(key), level + 1, use_wildcard, found, out)?;
                found.pop();
            }
            // A stored variable matches a concrete query element.
            if !element.is_wildcard() && use_wildcard {
                if let Some(child) = self.store.child_by_key(trie, &KeyElement::Wildcard)? {
                    found.push(KeyElement::Wildcard);
                    self.trie_retrieve(child, Some(key), level + 1, use_wildcard, found, out)?;
                    found.pop();
                }
            }
        } else {
            // A query variable matches every stored path.
            for (edge, child) in self.store.children_of(trie)? {
                found.push(edge);
                self.trie_retrieve(child, Some(key), level + 1, use_wildcard, found, out)?;
                found.pop();
            }
        }
        Ok(())
    }
}
