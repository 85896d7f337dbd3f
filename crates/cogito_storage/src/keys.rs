//! Abstruse keys: per-depth structural descriptors of a term.
//!
//! The abstruse key of a term is a list of levels; level `k` holds one
//! descriptor per sub-term sitting at depth `k`, in left-to-right order. An
//! expression contributes its arity and pushes its children one level down,
//! a variable collapses to the wildcard, and any other leaf contributes its
//! own identity. `IsA(dylan, ?x)` therefore keys as `[[3], [IsA, dylan, *]]`.

use std::collections::VecDeque;
use std::fmt;
use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use cogito_logic::Term;

use crate::error::{StorageError, StorageResult};

/// One structural descriptor inside a key slice.
///
/// Generic over the leaf representation: in-memory indexes keep the leaf
/// term itself, serializing backends use textual tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyElement<L> {
    /// An expression of the given arity at this position.
    Arity(usize),
    /// A variable at this position: matches anything.
    Wildcard,
    /// A non-variable leaf.
    Leaf(L),
}

impl<L> KeyElement<L> {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, KeyElement::Wildcard)
    }

    pub fn arity(&self) -> Option<usize> {
        match self {
            KeyElement::Arity(n) => Some(*n),
            _ => None,
        }
    }
}

impl<L: fmt::Display> fmt::Display for KeyElement<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyElement::Arity(n) => write!(f, "{}", n),
            KeyElement::Wildcard => write!(f, "*"),
            KeyElement::Leaf(leaf) => write!(f, "{}", leaf),
        }
    }
}

/// One level of descriptors.
pub type KeySlice<L> = Vec<KeyElement<L>>;

/// The full abstruse key: one slice per depth.
pub type AbstruseKey<L> = Vec<KeySlice<L>>;

fn build_key<L>(term: &Term, leaf: &impl Fn(&Term) -> L) -> AbstruseKey<L> {
    fn inner<L>(term: &Term, level: usize, out: &mut AbstruseKey<L>, leaf: &impl Fn(&Term) -> L) {
        if out.len() == level {
            out.push(Vec::new());
        }
        match term {
            Term::Expr(expr) => {
                out[level].push(KeyElement::Arity(expr.arity()));
                for child in expr.children() {
                    inner(child, level + 1, out, leaf);
                }
            }
            _ if term.is_variable() => out[level].push(KeyElement::Wildcard),
            _ => out[level].push(KeyElement::Leaf(leaf(term))),
        }
    }

    let mut out = Vec::new();
    inner(term, 0, &mut out, leaf);
    out
}

/// The abstruse key of a term, leaves kept as terms.
pub fn make_key(term: &Term) -> AbstruseKey<Term> {
    build_key(term, &|leaf| leaf.clone())
}

/// The abstruse key of a term with leaves hashed into textual tokens, the
/// form used by node-backed storages (`#<hash>` per leaf).
pub fn make_token_key(term: &Term) -> AbstruseKey<String> {
    build_key(term, &|leaf| {
        let mut hasher = FxHasher::default();
        leaf.hash(&mut hasher);
        format!("#{:016x}", hasher.finish())
    })
}

/// The key that matches every stored term: a single wildcard.
pub fn universal_key<L>() -> AbstruseKey<L> {
    vec![vec![KeyElement::Wildcard]]
}

impl KeyElement<String> {
    /// The persisted textual form: `*` for the wildcard, a decimal arity,
    /// or the `#`-prefixed leaf token.
    pub fn encode(&self) -> String {
        match self {
            KeyElement::Arity(n) => n.to_string(),
            KeyElement::Wildcard => "*".to_string(),
            KeyElement::Leaf(token) => token.clone(),
        }
    }

    /// Inverse of [`KeyElement::encode`]; loses nothing.
    pub fn decode(text: &str) -> StorageResult<Self> {
        if text == "*" {
            return Ok(KeyElement::Wildcard);
        }
        if text.starts_with('#') {
            return Ok(KeyElement::Leaf(text.to_string()));
        }
        text.parse::<usize>()
            .map(KeyElement::Arity)
            .map_err(|_| StorageError::Corrupt {
                detail: format!("unreadable key element '{}'", text),
            })
    }
}

/// Aligns a next-level query slice against the path actually matched at the
/// previous level.
///
/// Whenever the previous query element was a wildcard matched against a
/// stored arity `k`, the stored term has `k` descriptors at this level that
/// the query has no counterpart for, so `k` wildcards are inserted. Whenever
/// the projector is an arity matched by a concrete previous element, the
/// next `k` query elements belong to that position and are consumed. Any
/// query tail survives unchanged.
pub fn project_key<L: Clone>(
    previous_key: &[KeyElement<L>],
    projection_key: &[KeyElement<L>],
    current_key: &[KeyElement<L>],
) -> KeySlice<L> {
    let mut queue: VecDeque<KeyElement<L>> = current_key.iter().cloned().collect();
    let mut result = Vec::new();

    for (previous, projector) in previous_key.iter().zip(projection_key) {
        if let Some(k) = projector.arity() {
            if previous.is_wildcard() {
                result.extend(std::iter::repeat(KeyElement::Wildcard).take(k));
            } else {
                for _ in 0..k {
                    match queue.pop_front() {
                        Some(element) => result.push(element),
                        None => break,
                    }
                }
            }
        }
    }

    result.extend(queue);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use cogito_logic::{wrap, Language};

    #[test]
    fn key_of_a_leaf_is_one_slice() {
        let language = Language::new();
        let a = Term::constant(&language, "a").unwrap();
        let key = make_key(&a);
        assert_eq!(key, vec![vec![KeyElement::Leaf(a)]]);
    }

    #[test]
    fn key_of_a_variable_is_a_wildcard() {
        let language = Language::new();
        let x = Term::variable(&language, "x").unwrap();
        assert_eq!(make_key(&x), vec![vec![KeyElement::Wildcard]]);
    }

    #[test]
    fn key_levels_follow_depth() {
        let language = Language::new();
        let is_a = Term::constant(&language, "IsA").unwrap();
        let dylan = Term::constant(&language, "dylan").unwrap();
        let x = Term::variable(&language, "x").unwrap();

        let term = is_a.apply([dylan.clone(), x]);
        let key = make_key(&term);

        assert_eq!(key.len(), 2);
        assert_eq!(key[0], vec![KeyElement::Arity(3)]);
        assert_eq!(
            key[1],
            vec![
                KeyElement::Leaf(is_a),
                KeyElement::Leaf(dylan),
                KeyElement::Wildcard
            ]
        );
    }

    #[test]
    fn nested_expressions_spread_over_levels() {
        let language = Language::new();
        let f = Term::constant(&language, "f").unwrap();
        let g = Term::constant(&language, "g").unwrap();
        let a = Term::constant(&language, "a").unwrap();

        // f(g(a), a)
        let term = f.apply([g.apply([a.clone()]), a.clone()]);
        let key = make_key(&term);

        assert_eq!(key.len(), 3);
        assert_eq!(key[0], vec![KeyElement::Arity(3)]);
        assert_eq!(
            key[1],
            vec![
                KeyElement::Leaf(f),
                KeyElement::Arity(2),
                KeyElement::Leaf(a.clone())
            ]
        );
        assert_eq!(key[2], vec![KeyElement::Leaf(g), KeyElement::Leaf(a)]);
    }

    #[test]
    fn token_keys_hash_leaves_and_wrap_values() {
        let language = Language::new();
        let f = Term::constant(&language, "f").unwrap();
        let term = f.apply([wrap(42i64)]);
        let key = make_token_key(&term);

        assert_eq!(key[0], vec![KeyElement::Arity(2)]);
        assert_eq!(key[1].len(), 2);
        for element in &key[1] {
            match element {
                KeyElement::Leaf(token) => assert!(token.starts_with('#')),
                other => panic!("expected a leaf token, got {:?}", other),
            }
        }
        // Equal leaves map to equal tokens.
        assert_eq!(make_token_key(&term), key);
    }

    #[test]
    fn textual_encoding_round_trips() {
        for element in [
            KeyElement::Arity(7),
            KeyElement::Wildcard,
            KeyElement::Leaf("#00ff".to_string()),
        ] {
            let encoded = element.encode();
            assert_eq!(KeyElement::decode(&encoded).unwrap(), element);
        }
        assert!(KeyElement::decode("nonsense").is_err());
    }

    #[test]
    fn projection_inserts_wildcards_for_wildcard_matches() {
        // Query had [*, 2]; the store matched [3, 2]: the wildcard swallowed
        // an arity-3 expression, so three wildcards are inserted before the
        // two elements belonging to the concrete arity.
        let previous: Vec<KeyElement<i32>> = vec![KeyElement::Wildcard, KeyElement::Arity(2)];
        let projector = vec![KeyElement::Arity(3), KeyElement::Arity(2)];
        let current = vec![KeyElement::Leaf(1), KeyElement::Leaf(2)];

        let projected = project_key(&previous, &projector, &current);
        assert_eq!(
            projected,
            vec![
                KeyElement::Wildcard,
                KeyElement::Wildcard,
                KeyElement::Wildcard,
                KeyElement::Leaf(1),
                KeyElement::Leaf(2),
            ]
        );
    }

    #[test]
    fn projection_keeps_the_tail() {
        let previous: Vec<KeyElement<i32>> = vec![KeyElement::Arity(1), KeyElement::Wildcard];
        let projector = vec![KeyElement::Arity(1), KeyElement::Wildcard];
        let current = vec![KeyElement::Leaf(1), KeyElement::Leaf(9)];

        // The wildcard projector consumes nothing; the unconsumed tail
        // survives.
        let projected = project_key(&previous, &projector, &current);
        assert_eq!(projected, vec![KeyElement::Leaf(1), KeyElement::Leaf(9)]);
    }
}
