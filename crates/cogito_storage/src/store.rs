//! Term storages: sets of formulas with unification-based search.
//!
//! Three implementations share the [`TermStorage`] contract: a plain
//! scanning set, an abstruse-indexed store that deduplicates isomorphic
//! formulas by canonical renaming, and a serializing store that keeps terms
//! as opaque blobs inside any [`NodeStore`] backend.

use std::ops::{Deref, DerefMut};

use log::info;
use rustc_hash::FxHashSet;

use cogito_logic::{
    normalize_variables, Language, NormalizationMode, Substitution, Term, VariableSource,
};

use crate::error::{StorageError, StorageResult};
use crate::index::AbstruseIndex;
use crate::keys::{make_key, make_token_key};
use crate::node::{MemoryNodeStore, NodeStore};

/// A set of terms searchable by unifiability.
///
/// `search_unifiable` hands back candidates renamed into fresh variables, so
/// a stored formula never shares variables with the query; the returned
/// unifier extends `previous`.
pub trait TermStorage: Send {
    fn add(&mut self, terms: &[Term]) -> StorageResult<()>;

    fn search_unifiable(
        &self,
        query: &Term,
        previous: &Substitution,
    ) -> StorageResult<Vec<(Term, Substitution)>>;

    fn len(&self) -> StorageResult<usize>;

    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    fn supports_transactions(&self) -> bool {
        false
    }

    fn begin_transaction(&mut self) -> StorageResult<()> {
        Err(StorageError::TransactionsUnsupported)
    }

    fn commit_transaction(&mut self) -> StorageResult<()> {
        Err(StorageError::TransactionsUnsupported)
    }

    fn rollback_transaction(&mut self) -> StorageResult<()> {
        Err(StorageError::TransactionsUnsupported)
    }

    /// Opens a transaction scope. The guard rolls back on drop unless
    /// [`Transaction::commit`] is called.
    fn transaction(&mut self) -> StorageResult<Transaction<'_, Self>>
    where
        Self: Sized,
    {
        self.begin_transaction()?;
        Ok(Transaction {
            storage: self,
            finished: false,
        })
    }
}

impl<S: TermStorage + ?Sized> TermStorage for Box<S> {
    fn add(&mut self, terms: &[Term]) -> StorageResult<()> {
        (**self).add(terms)
    }

    fn search_unifiable(
        &self,
        query: &Term,
        previous: &Substitution,
    ) -> StorageResult<Vec<(Term, Substitution)>> {
        (**self).search_unifiable(query, previous)
    }

    fn len(&self) -> StorageResult<usize> {
        (**self).len()
    }

    fn supports_transactions(&self) -> bool {
        (**self).supports_transactions()
    }

    fn begin_transaction(&mut self) -> StorageResult<()> {
        (**self).begin_transaction()
    }

    fn commit_transaction(&mut self) -> StorageResult<()> {
        (**self).commit_transaction()
    }

    fn rollback_transaction(&mut self) -> StorageResult<()> {
        (**self).rollback_transaction()
    }
}

/// RAII transaction scope over a [`TermStorage`].
pub struct Transaction<'a, S: TermStorage> {
    storage: &'a mut S,
    finished: bool,
}

impl<S: TermStorage> Transaction<'_, S> {
    pub fn commit(mut self) -> StorageResult<()> {
        self.finished = true;
        self.storage.commit_transaction()
    }

    pub fn rollback(mut self) -> StorageResult<()> {
        self.finished = true;
        self.storage.rollback_transaction()
    }
}

impl<S: TermStorage> Deref for Transaction<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.storage
    }
}

impl<S: TermStorage> DerefMut for Transaction<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.storage
    }
}

impl<S: TermStorage> Drop for Transaction<'_, S> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.storage.rollback_transaction();
        }
    }
}

fn unify_candidate(
    stored: &Term,
    query: &Term,
    previous: &Substitution,
    rename_language: &Language,
) -> StorageResult<Option<(Term, Substitution)>> {
    let (renamed, _) = normalize_variables(stored, NormalizationMode::Fresh(rename_language))?;
    Ok(Substitution::unify(&renamed, query, Some(previous)).map(|unifier| (renamed, unifier)))
}

/// The simplest storage: a hash set plus a full scan.
#[derive(Debug)]
pub struct UnindexedStorage {
    objects: FxHashSet<Term>,
    rename_language: Language,
}

impl UnindexedStorage {
    pub fn new() -> Self {
        Self {
            objects: FxHashSet::default(),
            rename_language: Language::new(),
        }
    }
}

impl Default for UnindexedStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl TermStorage for UnindexedStorage {
    fn add(&mut self, terms: &[Term]) -> StorageResult<()> {
        for term in terms {
            self.objects.insert(term.clone());
        }
        Ok(())
    }

    fn search_unifiable(
        &self,
        query: &Term,
        previous: &Substitution,
    ) -> StorageResult<Vec<(Term, Substitution)>> {
        let mut results = Vec::new();
        for stored in &self.objects {
            if let Some(hit) = unify_candidate(stored, query, previous, &self.rename_language)? {
                results.push(hit);
            }
        }
        Ok(results)
    }

    fn len(&self) -> StorageResult<usize> {
        Ok(self.objects.len())
    }
}

/// Abstruse-indexed storage over in-memory nodes.
///
/// Terms are canonically renormalized before insertion, so formulas equal up
/// to variable renaming collapse into one entry, and retrieval only unifies
/// against the candidates the index reports.
#[derive(Debug)]
pub struct IndexedTermStorage {
    index: AbstruseIndex<MemoryNodeStore<Term, Term>>,
    canonical_source: VariableSource,
    rename_language: Language,
}

impl IndexedTermStorage {
    pub fn new() -> Self {
        let canonical_language = Language::new();
        Self {
            index: AbstruseIndex::new(MemoryNodeStore::new()),
            canonical_source: VariableSource::new(&canonical_language),
            rename_language: Language::new(),
        }
    }
}

impl Default for IndexedTermStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl TermStorage for IndexedTermStorage {
    fn add(&mut self, terms: &[Term]) -> StorageResult<()> {
        for term in terms {
            let (canonical, _) =
                normalize_variables(term, NormalizationMode::Canonical(&self.canonical_source))?;
            info!("storing formula {}", canonical);
            self.index.add(&make_key(&canonical), canonical)?;
        }
        Ok(())
    }

    fn search_unifiable(
        &self,
        query: &Term,
        previous: &Substitution,
    ) -> StorageResult<Vec<(Term, Substitution)>> {
        let mut results = Vec::new();
        for stored in self.index.retrieve(&make_key(query))? {
            if let Some(hit) = unify_candidate(&stored, query, previous, &self.rename_language)? {
                results.push(hit);
            }
        }
        Ok(results)
    }

    fn len(&self) -> StorageResult<usize> {
        self.index.len()
    }

    fn supports_transactions(&self) -> bool {
        self.index.store().supports_transactions()
    }

    fn begin_transaction(&mut self) -> StorageResult<()> {
        self.index.store_mut().begin()
    }

    fn commit_transaction(&mut self) -> StorageResult<()> {
        self.index.store_mut().commit()
    }

    fn rollback_transaction(&mut self) -> StorageResult<()> {
        self.index.store_mut().rollback()
    }
}

/// Storage keeping terms as opaque serialized blobs inside any node store
/// with `Vec<u8>` payloads and textual key tokens.
///
/// Canonical renormalization happens before serialization, so within one
/// storage lifetime isomorphic formulas produce identical blobs and the
/// payload-uniqueness of the node store deduplicates them. Transactionality
/// is whatever the underlying node store provides.
#[derive(Debug)]
pub struct SerializingStorage<N>
where
    N: NodeStore<Leaf = String, Object = Vec<u8>>,
{
    index: AbstruseIndex<N>,
    canonical_source: VariableSource,
    rename_language: Language,
}

impl<N> SerializingStorage<N>
where
    N: NodeStore<Leaf = String, Object = Vec<u8>>,
{
    pub fn new(store: N) -> Self {
        let canonical_language = Language::new();
        Self {
            index: AbstruseIndex::new(store),
            canonical_source: VariableSource::new(&canonical_language),
            rename_language: Language::new(),
        }
    }

    pub fn into_store(self) -> N {
        self.index.into_store()
    }
}

impl<N> TermStorage for SerializingStorage<N>
where
    N: NodeStore<Leaf = String, Object = Vec<u8>>,
{
    fn add(&mut self, terms: &[Term]) -> StorageResult<()> {
        for term in terms {
            let (canonical, _) =
                normalize_variables(term, NormalizationMode::Canonical(&self.canonical_source))?;
            let blob = bincode::serialize(&canonical)?;
            self.index.add(&make_token_key(&canonical), blob)?;
        }
        Ok(())
    }

    fn search_unifiable(
        &self,
        query: &Term,
        previous: &Substitution,
    ) -> StorageResult<Vec<(Term, Substitution)>> {
        let mut results = Vec::new();
        for blob in self.index.retrieve(&make_token_key(query))? {
            let stored: Term = bincode::deserialize(&blob)?;
            if let Some(hit) = unify_candidate(&stored, query, previous, &self.rename_language)? {
                results.push(hit);
            }
        }
        Ok(results)
    }

    fn len(&self) -> StorageResult<usize> {
        self.index.len()
    }

    fn supports_transactions(&self) -> bool {
        self.index.store().supports_transactions()
    }

    fn begin_transaction(&mut self) -> StorageResult<()> {
        self.index.store_mut().begin()
    }

    fn commit_transaction(&mut self) -> StorageResult<()> {
        self.index.store_mut().commit()
    }

    fn rollback_transaction(&mut self) -> StorageResult<()> {
        self.index.store_mut().rollback()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cogito_logic::wrap;

    fn all_storages() -> Vec<Box<dyn TermStorage>> {
        vec![
            Box::new(UnindexedStorage::new()),
            Box::new(IndexedTermStorage::new()),
            Box::new(SerializingStorage::new(
                MemoryNodeStore::<String, Vec<u8>>::new(),
            )),
        ]
    }

    #[test]
    fn round_trip_search() {
        let language = Language::new();
        let is_a = Term::constant(&language, "IsA").unwrap();
        let dylan = Term::constant(&language, "dylan").unwrap();
        let cat = Term::constant(&language, "cat").unwrap();
        let fact = is_a.apply([dylan, cat]);

        for mut storage in all_storages() {
            storage.add(std::slice::from_ref(&fact)).unwrap();
            let results = storage
                .search_unifiable(&fact, &Substitution::empty())
                .unwrap();
            assert_eq!(results.len(), 1, "round trip failed");
            let (stored, unifier) = &results[0];
            assert_eq!(unifier.apply_to(stored), unifier.apply_to(&fact));
        }
    }

    #[test]
    fn open_formulas_round_trip_with_renamed_variables() {
        let language = Language::new();
        let is_a = Term::constant(&language, "IsA").unwrap();
        let cat = Term::constant(&language, "cat").unwrap();
        let x = Term::variable(&language, "x").unwrap();
        let open = is_a.apply([x.clone(), cat.clone()]);

        for mut storage in all_storages() {
            storage.add(std::slice::from_ref(&open)).unwrap();
            let results = storage
                .search_unifiable(&open, &Substitution::empty())
                .unwrap();
            assert_eq!(results.len(), 1);
            let (stored, unifier) = &results[0];
            // The candidate came back with fresh variables.
            assert_ne!(stored, &open);
            assert_eq!(unifier.apply_to(stored), unifier.apply_to(&open));
        }
    }

    #[test]
    fn search_respects_previous_substitution() {
        let language = Language::new();
        let is_a = Term::constant(&language, "IsA").unwrap();
        let cat = Term::constant(&language, "cat").unwrap();
        let dylan = Term::constant(&language, "dylan").unwrap();
        let hugo = Term::constant(&language, "hugo").unwrap();
        let x = Term::variable(&language, "x").unwrap();

        for mut storage in all_storages() {
            storage
                .add(&[
                    is_a.apply([dylan.clone(), cat.clone()]),
                    is_a.apply([hugo.clone(), cat.clone()]),
                ])
                .unwrap();

            // With ?x already pinned to dylan, only one fact fits.
            let previous = Substitution::unify(&x, &dylan, None).unwrap();
            let query = is_a.apply([x.clone(), cat.clone()]);
            let results = storage.search_unifiable(&query, &previous).unwrap();
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].1.apply_to(&x), dylan);
        }
    }

    #[test]
    fn canonicalising_storages_deduplicate() {
        let language = Language::new();
        let foo = Term::constant(&language, "Foo").unwrap();
        let a = Term::constant(&language, "a").unwrap();
        let b = Term::constant(&language, "b").unwrap();
        let var = |name: &str| Term::variable(&language, name).unwrap();

        let deduplicating: Vec<Box<dyn TermStorage>> = vec![
            Box::new(IndexedTermStorage::new()),
            Box::new(SerializingStorage::new(
                MemoryNodeStore::<String, Vec<u8>>::new(),
            )),
        ];

        for mut storage in deduplicating {
            let x = var("x");
            storage
                .add(&[
                    foo.apply([a.clone(), b.clone()]),
                    foo.apply([var("x1"), var("y1")]),
                    foo.apply([x.clone(), x.clone()]),
                    foo.apply([var("w"), var("z")]),
                ])
                .unwrap();
            // Foo(x, y) and Foo(w, z) are the same formula up to renaming.
            assert_eq!(storage.len().unwrap(), 3);
        }
    }

    #[test]
    fn transaction_rollback_discards_additions() {
        let language = Language::new();
        let is_a = Term::constant(&language, "IsA").unwrap();
        let dylan = Term::constant(&language, "dylan").unwrap();
        let cat = Term::constant(&language, "cat").unwrap();
        let fact = is_a.apply([dylan, cat]);

        let mut storage = IndexedTermStorage::new();
        assert!(storage.supports_transactions());

        {
            let mut txn = storage.transaction().unwrap();
            txn.add(std::slice::from_ref(&fact)).unwrap();
            assert_eq!(txn.len().unwrap(), 1);
            // Dropped without commit: rolls back.
        }

        assert_eq!(storage.len().unwrap(), 0);
        assert!(storage
            .search_unifiable(&fact, &Substitution::empty())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn transaction_commit_keeps_additions() {
        let language = Language::new();
        let fact = Term::constant(&language, "Go").unwrap();

        let mut storage = IndexedTermStorage::new();
        let mut txn = storage.transaction().unwrap();
        txn.add(std::slice::from_ref(&fact)).unwrap();
        txn.commit().unwrap();

        assert_eq!(storage.len().unwrap(), 1);
    }

    #[test]
    fn unindexed_storage_refuses_transactions() {
        let mut storage = UnindexedStorage::new();
        assert!(!storage.supports_transactions());
        assert!(matches!(
            storage.transaction(),
            Err(StorageError::TransactionsUnsupported)
        ));
    }

    #[test]
    fn wrapped_values_survive_serialization() {
        let language = Language::new();
        let weighs = Term::constant(&language, "Weighs").unwrap();
        let dylan = Term::constant(&language, "dylan").unwrap();
        let fact = weighs.apply([dylan, wrap(42i64)]);

        let mut storage = SerializingStorage::new(MemoryNodeStore::<String, Vec<u8>>::new());
        storage.add(std::slice::from_ref(&fact)).unwrap();

        let results = storage
            .search_unifiable(&fact, &Substitution::empty())
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, fact);
    }
}
