//! Term algebra and most-general unification for cogito.
//!
//! This crate is the foundation of the knowledge base: symbolic terms over
//! per-process [`Language`]s, structural equality and hashing, Robinson
//! unification with shared bindings, and the variable normalization used by
//! storages and the proof engine. It performs no IO and spawns no tasks.

pub mod error;
pub mod language;
pub mod normalize;
pub mod term;
pub mod unification;

pub use error::{LogicError, LogicResult};
pub use language::{Identifier, Language};
pub use normalize::{
    map_variables_by_name, normalize_variables, normalize_variables_with, unique_variables_in,
    variables_in, NormalizationMode, VariableSource,
};
pub use term::{wrap, Expression, HostValue, Symbol, SymbolKind, Term, Value, ValuePayload};
pub use unification::{Binding, Substitution};
