//! The cogito proof engine.
//!
//! A client asserts facts and rules over symbolic terms and asks the engine
//! to prove goal formulas; the engine returns a lazy stream of proofs, each
//! carrying the variable bindings satisfying the goal. Proof search is
//! backward chaining over a pluggable set of prover components multiplexed
//! with the always-present knowledge retriever; `ponder` runs the listener
//! side, feeding deduced conclusions back into the stream they came from.
//!
//! ```no_run
//! use cogito_logic::{Language, Term};
//! use cogito_proofs::{KnowledgeBase, restricted_modus_ponens};
//! use cogito_storage::IndexedTermStorage;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let language = Language::new();
//! let is_a = Term::constant(&language, "IsA")?;
//! let dylan = Term::constant(&language, "dylan")?;
//! let cat = Term::constant(&language, "cat")?;
//!
//! let kb = KnowledgeBase::new(IndexedTermStorage::new())?;
//! kb.add_prover(restricted_modus_ponens())?;
//! kb.add_formulas([is_a.apply([dylan.clone(), cat.clone()])])?;
//!
//! for proof in kb.prove(&is_a.apply([dylan, cat]))? {
//!     println!("{}", proof?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod components;
pub mod engine;
pub mod error;
pub mod operators;
pub mod proof;
pub mod provers;

pub use components::{
    ArgumentValue, Component, ComponentBuilder, Handler, HandlerArgumentMode, HandlerInput,
    HandlerSafety, HandlerValue, InvocationContext, ProofSink,
};
pub use engine::{
    KnowledgeBase, PonderIterator, PonderMode, ProofIterator, ProofStream, ProveOptions,
};
pub use error::{EngineError, EngineResult};
pub use proof::{InferenceRule, Proof};
pub use provers::{closed_world_assumption, restricted_modus_ponens};
