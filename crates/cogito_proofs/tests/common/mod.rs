//! Shared fixtures for the engine scenario tests.
#![allow(dead_code)]

use cogito_logic::{Language, Term};

/// A tiny vocabulary most scenarios share.
pub struct World {
    pub language: Language,
    pub is_a: Term,
    pub dylan: Term,
    pub hugo: Term,
    pub cat: Term,
    pub mammal: Term,
    pub animal: Term,
}

pub fn world() -> World {
    let language = Language::new();
    World {
        is_a: constant(&language, "IsA"),
        dylan: constant(&language, "dylan"),
        hugo: constant(&language, "hugo"),
        cat: constant(&language, "cat"),
        mammal: constant(&language, "mammal"),
        animal: constant(&language, "animal"),
        language,
    }
}

pub fn constant(language: &Language, name: &str) -> Term {
    Term::constant(language, name).unwrap()
}

pub fn variable(language: &Language, name: &str) -> Term {
    Term::variable(language, name).unwrap()
}
