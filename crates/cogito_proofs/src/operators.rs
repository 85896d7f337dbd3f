//! The well-known logical operators.
//!
//! Connectives live in a language with a fixed opaque id, minted in a fixed
//! order, so their identities are stable across processes and serialized
//! rules keep meaning what they meant.

use once_cell::sync::Lazy;
use uuid::Uuid;

use cogito_logic::{Language, Term};

struct Operators {
    language: Language,
    and: Term,
    or: Term,
    implies: Term,
    co_implies: Term,
    not: Term,
}

static OPERATORS: Lazy<Operators> = Lazy::new(|| {
    let language = Language::with_id(Uuid::from_u128(42));
    let mint = |name: &str| {
        Term::constant(&language, name).expect("the operator language is never sealed")
    };
    // Minting order is part of the stable identities; do not reorder.
    Operators {
        and: mint("And"),
        or: mint("Or"),
        implies: mint("Implies"),
        co_implies: mint("CoImplies"),
        not: mint("Not"),
        language,
    }
});

/// The language owning the connectives.
pub fn operator_language() -> &'static Language {
    &OPERATORS.language
}

pub fn and_operator() -> Term {
    OPERATORS.and.clone()
}

pub fn or_operator() -> Term {
    OPERATORS.or.clone()
}

pub fn implies_operator() -> Term {
    OPERATORS.implies.clone()
}

pub fn co_implies_operator() -> Term {
    OPERATORS.co_implies.clone()
}

pub fn not_operator() -> Term {
    OPERATORS.not.clone()
}

/// Builds the implication `premise ⇒ conclusion`.
pub fn implies(premise: Term, conclusion: Term) -> Term {
    implies_operator().apply([premise, conclusion])
}

/// Builds the negation `Not(formula)`.
pub fn not(formula: Term) -> Term {
    not_operator().apply([formula])
}

/// Whether a formula is an implication, i.e. an expression whose functor is
/// the `Implies` connective.
pub fn is_implication(term: &Term) -> bool {
    term.as_expression()
        .map_or(false, |expr| expr.arity() == 3 && expr.children()[0] == implies_operator())
}
