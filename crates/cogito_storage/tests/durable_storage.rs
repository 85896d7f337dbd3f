//! End-to-end checks of the serializing storage over the journaled node
//! store: durability across reopen, rollback on error, and index-assisted
//! retrieval of persisted formulas.

use cogito_logic::{wrap, Language, Substitution, Term};
use cogito_storage::{JournalNodeStore, SerializingStorage, TermStorage};

struct World {
    language: Language,
    is_a: Term,
    dylan: Term,
    hugo: Term,
    cat: Term,
}

fn world() -> World {
    let language = Language::new();
    World {
        is_a: Term::constant(&language, "IsA").unwrap(),
        dylan: Term::constant(&language, "dylan").unwrap(),
        hugo: Term::constant(&language, "hugo").unwrap(),
        cat: Term::constant(&language, "cat").unwrap(),
        language,
    }
}

fn open_storage(path: &std::path::Path) -> SerializingStorage<JournalNodeStore> {
    SerializingStorage::new(JournalNodeStore::open(path).unwrap())
}

#[test]
fn formulas_survive_a_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("kb.journal");
    let w = world();

    let fact = w.is_a.apply([w.dylan.clone(), w.cat.clone()]);
    {
        let mut storage = open_storage(&path);
        storage.add(std::slice::from_ref(&fact)).unwrap();
        assert_eq!(storage.len().unwrap(), 1);
    }

    let storage = open_storage(&path);
    assert_eq!(storage.len().unwrap(), 1);
    let results = storage
        .search_unifiable(&fact, &Substitution::empty())
        .unwrap();
    assert_eq!(results.len(), 1);
    let (stored, unifier) = &results[0];
    assert_eq!(unifier.apply_to(stored), unifier.apply_to(&fact));
}

#[test]
fn open_queries_work_against_persisted_facts() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("kb.journal");
    let w = world();

    {
        let mut storage = open_storage(&path);
        storage
            .add(&[
                w.is_a.apply([w.dylan.clone(), w.cat.clone()]),
                w.is_a.apply([w.hugo.clone(), w.cat.clone()]),
            ])
            .unwrap();
    }

    let storage = open_storage(&path);
    let x = Term::variable(&w.language, "x").unwrap();
    let query = w.is_a.apply([x.clone(), w.cat.clone()]);
    let results = storage
        .search_unifiable(&query, &Substitution::empty())
        .unwrap();

    assert_eq!(results.len(), 2);
    let answers: Vec<Term> = results
        .iter()
        .map(|(_, unifier)| unifier.apply_to(&x))
        .collect();
    assert!(answers.contains(&w.dylan));
    assert!(answers.contains(&w.hugo));
}

#[test]
fn rollback_leaves_the_journal_clean() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("kb.journal");
    let w = world();
    let fact = w.is_a.apply([w.dylan.clone(), w.cat.clone()]);

    // An error escaping the transaction scope must leave nothing behind,
    // in memory or on disk.
    let mut storage = open_storage(&path);
    assert!(storage.supports_transactions());
    let failed: Result<(), &str> = (|| {
        let mut txn = storage.transaction().unwrap();
        txn.add(std::slice::from_ref(&fact)).unwrap();
        Err("simulated failure")
    })();
    assert!(failed.is_err());

    assert!(storage
        .search_unifiable(&fact, &Substitution::empty())
        .unwrap()
        .is_empty());
    drop(storage);

    let reopened = open_storage(&path);
    assert_eq!(reopened.len().unwrap(), 0);
}

#[test]
fn wrapped_values_round_trip_through_the_journal() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("kb.journal");
    let w = world();

    let weighs = Term::constant(&w.language, "Weighs").unwrap();
    let fact = weighs.apply([w.dylan.clone(), wrap(4i64), wrap("kg".to_string())]);

    {
        let mut storage = open_storage(&path);
        storage.add(std::slice::from_ref(&fact)).unwrap();
    }

    let storage = open_storage(&path);
    let results = storage
        .search_unifiable(&fact, &Substitution::empty())
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, fact);
}
