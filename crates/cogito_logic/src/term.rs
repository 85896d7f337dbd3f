//! The term algebra: symbols, wrapped host values and expressions.
//!
//! A [`Term`] is a tagged sum over the three kinds of logic object. All
//! terms are immutable once constructed; expressions keep their children
//! behind an `Arc` slice so terms can be shared and cloned freely during
//! unification and proof search.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::error::{LogicError, LogicResult};
use crate::language::{Identifier, Language};

/// Whether a symbol is ground or may be bound by a substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    Constant,
    Variable,
}

/// A uniquely identified atom. Equality and hashing go through the
/// identifier alone: two symbols with the same identity *are* the same
/// symbol, and a variable is never equal to anything but itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    id: Identifier,
    name: Option<Arc<str>>,
    kind: SymbolKind,
}

impl Symbol {
    fn mint(language: &Language, name: Option<&str>, kind: SymbolKind) -> LogicResult<Self> {
        if let Some(name) = name {
            if name.is_empty() {
                return Err(LogicError::EmptyName);
            }
        }
        Ok(Self {
            id: Identifier {
                language: language.clone(),
                sequential_id: language.next_id()?,
            },
            name: name.map(Arc::from),
            kind,
        })
    }

    /// Mints a new constant in the given language.
    pub fn new_constant(language: &Language, name: Option<&str>) -> LogicResult<Self> {
        Self::mint(language, name, SymbolKind::Constant)
    }

    /// Mints a new variable in the given language.
    pub fn new_variable(language: &Language, name: Option<&str>) -> LogicResult<Self> {
        Self::mint(language, name, SymbolKind::Variable)
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> SymbolKind {
        self.kind
    }

    pub fn is_variable(&self) -> bool {
        self.kind == SymbolKind::Variable
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Symbol {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.name.as_deref()) {
            (SymbolKind::Constant, Some(name)) => write!(f, "{}{}", name, self.id.sequential_id),
            (SymbolKind::Constant, None) => write!(f, "o{}", self.id.sequential_id),
            (SymbolKind::Variable, Some(name)) => write!(f, "?{}{}", name, self.id.sequential_id),
            (SymbolKind::Variable, None) => write!(f, "?v{}", self.id.sequential_id),
        }
    }
}

/// A host value embeddable as an opaque leaf term.
///
/// Implementors bring their own equality and hashing; the algebra only needs
/// them to be consistent. [`HostValue::payload`] exposes a closed primitive
/// representation for values that should survive a serializing storage;
/// values without one still work everywhere in memory.
pub trait HostValue: fmt::Debug + fmt::Display + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;

    fn dyn_eq(&self, other: &dyn HostValue) -> bool;

    fn dyn_hash(&self, state: &mut dyn Hasher);

    fn payload(&self) -> Option<ValuePayload> {
        None
    }
}

/// Closed serialization form for primitive host values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValuePayload {
    Int(i64),
    Bool(bool),
    Text(String),
    /// IEEE-754 bits; equality of the wrapped f64 is bit equality.
    FloatBits(u64),
    Bytes(Vec<u8>),
}

impl ValuePayload {
    /// Reconstructs the wrapped value this payload was extracted from.
    pub fn into_value(self) -> Value {
        match self {
            ValuePayload::Int(v) => Value::new(v),
            ValuePayload::Bool(v) => Value::new(v),
            ValuePayload::Text(v) => Value::new(v),
            ValuePayload::FloatBits(bits) => Value::new(f64::from_bits(bits)),
            ValuePayload::Bytes(v) => Value::new(v),
        }
    }
}

macro_rules! primitive_host_value {
    ($ty:ty, $payload:expr) => {
        impl HostValue for $ty {
            fn as_any(&self) -> &dyn Any {
                self
            }

            fn dyn_eq(&self, other: &dyn HostValue) -> bool {
                other
                    .as_any()
                    .downcast_ref::<$ty>()
                    .map_or(false, |other| other == self)
            }

            fn dyn_hash(&self, mut state: &mut dyn Hasher) {
                self.hash(&mut state);
            }

            fn payload(&self) -> Option<ValuePayload> {
                let convert: fn(&$ty) -> ValuePayload = $payload;
                Some(convert(self))
            }
        }
    };
}

primitive_host_value!(i64, |v| ValuePayload::Int(*v));
primitive_host_value!(bool, |v| ValuePayload::Bool(*v));
primitive_host_value!(String, |v| ValuePayload::Text(v.clone()));
primitive_host_value!(Vec<u8>, |v| ValuePayload::Bytes(v.clone()));

// f64 is not Hash/Eq; wrapped floats compare and hash by bit pattern.
impl HostValue for f64 {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn HostValue) -> bool {
        other
            .as_any()
            .downcast_ref::<f64>()
            .map_or(false, |other| other.to_bits() == self.to_bits())
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        self.to_bits().hash(&mut state);
    }

    fn payload(&self) -> Option<ValuePayload> {
        Some(ValuePayload::FloatBits(self.to_bits()))
    }
}

/// A wrapped host value embedded as a leaf term.
#[derive(Debug, Clone)]
pub struct Value(Arc<dyn HostValue>);

impl Value {
    pub fn new<T: HostValue>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Borrows the wrapped value if it is a `T`.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    /// Compares the wrapped value against a raw host value.
    pub fn equals_host<T: PartialEq + 'static>(&self, other: &T) -> bool {
        self.downcast_ref::<T>().map_or(false, |inner| inner == other)
    }

    pub fn payload(&self) -> Option<ValuePayload> {
        self.0.payload()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.0.dyn_eq(other.0.as_ref())
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.dyn_hash(state);
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0)
    }
}

/// A non-empty ordered sequence of child terms.
///
/// By convention the first child plays the functor role, but the algebra is
/// flat: nothing here privileges that reading. The structural hash is
/// computed once at construction.
#[derive(Debug, Clone)]
pub struct Expression {
    children: Arc<[Term]>,
    hash: u64,
}

impl Expression {
    pub fn new(children: Vec<Term>) -> LogicResult<Self> {
        if children.is_empty() {
            return Err(LogicError::EmptyExpression);
        }
        let mut hasher = FxHasher::default();
        for child in &children {
            child.hash(&mut hasher);
        }
        Ok(Self {
            children: children.into(),
            hash: hasher.finish(),
        })
    }

    pub fn children(&self) -> &[Term] {
        &self.children
    }

    pub fn arity(&self) -> usize {
        self.children.len()
    }
}

impl PartialEq for Expression {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.children == other.children
    }
}

impl Eq for Expression {}

impl Hash for Expression {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, child) in self.children.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", child)?;
        }
        write!(f, ")")
    }
}

/// A term: symbol, wrapped value or expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Symbol(Symbol),
    Value(Value),
    Expr(Expression),
}

impl Term {
    /// Mints a constant term.
    pub fn constant(language: &Language, name: &str) -> LogicResult<Term> {
        Ok(Term::Symbol(Symbol::new_constant(language, Some(name))?))
    }

    /// Mints an anonymous constant term.
    pub fn anonymous_constant(language: &Language) -> LogicResult<Term> {
        Ok(Term::Symbol(Symbol::new_constant(language, None)?))
    }

    /// Mints a variable term.
    pub fn variable(language: &Language, name: &str) -> LogicResult<Term> {
        Ok(Term::Symbol(Symbol::new_variable(language, Some(name))?))
    }

    /// Mints an anonymous variable term.
    pub fn anonymous_variable(language: &Language) -> LogicResult<Term> {
        Ok(Term::Symbol(Symbol::new_variable(language, None)?))
    }

    /// Builds an expression from a non-empty child list.
    pub fn expression(children: Vec<Term>) -> LogicResult<Term> {
        Ok(Term::Expr(Expression::new(children)?))
    }

    /// Builds the functor-first expression `(self, args...)`.
    ///
    /// Infallible: the result always has at least one child.
    pub fn apply<I: IntoIterator<Item = Term>>(&self, args: I) -> Term {
        let mut children = vec![self.clone()];
        children.extend(args);
        Term::Expr(Expression::new(children).expect("non-empty by construction"))
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Term::Symbol(symbol) => Some(symbol),
            _ => None,
        }
    }

    pub fn as_expression(&self) -> Option<&Expression> {
        match self {
            Term::Expr(expr) => Some(expr),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Term::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, Term::Symbol(symbol) if symbol.is_variable())
    }

    /// Whether `other` occurs syntactically inside this term. Leaves contain
    /// nothing but themselves, and a term does not contain itself.
    pub fn contains(&self, other: &Term) -> bool {
        match self {
            Term::Expr(expr) => expr
                .children()
                .iter()
                .any(|child| child == other || child.contains(other)),
            _ => false,
        }
    }

    /// Number of nodes in the term tree.
    pub fn size(&self) -> usize {
        match self {
            Term::Expr(expr) => 1 + expr.children().iter().map(Term::size).sum::<usize>(),
            _ => 1,
        }
    }
}

impl Hash for Term {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Term::Symbol(symbol) => {
                state.write_u8(0);
                symbol.hash(state);
            }
            Term::Value(value) => {
                state.write_u8(1);
                value.hash(state);
            }
            Term::Expr(expr) => {
                state.write_u8(2);
                expr.hash(state);
            }
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Symbol(symbol) => write!(f, "{}", symbol),
            Term::Value(value) => write!(f, "{}", value),
            Term::Expr(expr) => write!(f, "{}", expr),
        }
    }
}

impl From<Symbol> for Term {
    fn from(symbol: Symbol) -> Self {
        Term::Symbol(symbol)
    }
}

impl From<Value> for Term {
    fn from(value: Value) -> Self {
        Term::Value(value)
    }
}

/// Lifts a host value into a leaf term.
pub fn wrap<T: HostValue>(value: T) -> Term {
    Term::Value(Value::new(value))
}

// --- serde -----------------------------------------------------------------
//
// Terms are serialized through a closed mirror type: values go through their
// primitive payload, expressions drop the cached hash (recomputed on the way
// back in). A value with no payload cannot cross the boundary.

#[derive(Serialize, Deserialize)]
enum TermRepr {
    Symbol(Symbol),
    Value(ValuePayload),
    Expr(Vec<TermRepr>),
}

impl TermRepr {
    fn from_term(term: &Term) -> Result<Self, String> {
        match term {
            Term::Symbol(symbol) => Ok(TermRepr::Symbol(symbol.clone())),
            Term::Value(value) => value
                .payload()
                .map(TermRepr::Value)
                .ok_or_else(|| format!("value {} has no serializable payload", value)),
            Term::Expr(expr) => Ok(TermRepr::Expr(
                expr.children()
                    .iter()
                    .map(TermRepr::from_term)
                    .collect::<Result<_, _>>()?,
            )),
        }
    }

    fn into_term(self) -> Term {
        match self {
            TermRepr::Symbol(symbol) => Term::Symbol(symbol),
            TermRepr::Value(payload) => Term::Value(payload.into_value()),
            TermRepr::Expr(children) => {
                let children: Vec<Term> = children.into_iter().map(TermRepr::into_term).collect();
                Term::Expr(Expression::new(children).expect("serialized expression was non-empty"))
            }
        }
    }
}

impl Serialize for Term {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        TermRepr::from_term(self)
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Term {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(TermRepr::deserialize(deserializer)?.into_term())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = FxHasher::default();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn symbols_are_equal_by_identity_only() {
        let language = Language::new();
        let a = Symbol::new_constant(&language, Some("a")).unwrap();
        let also_a = a.clone();
        let other = Symbol::new_constant(&language, Some("a")).unwrap();

        assert_eq!(a, also_a);
        assert_ne!(a, other, "same name, different identity");
    }

    #[test]
    fn variable_is_only_equal_to_itself() {
        let language = Language::new();
        let x = Term::variable(&language, "x").unwrap();
        let y = Term::variable(&language, "x").unwrap();
        assert_eq!(x, x.clone());
        assert_ne!(x, y);
    }

    #[test]
    fn empty_symbol_name_is_rejected() {
        let language = Language::new();
        assert!(matches!(
            Symbol::new_constant(&language, Some("")),
            Err(LogicError::EmptyName)
        ));
    }

    #[test]
    fn empty_expression_is_rejected() {
        assert!(matches!(Expression::new(vec![]), Err(LogicError::EmptyExpression)));
    }

    #[test]
    fn expression_structural_equality() {
        let language = Language::new();
        let foo = Term::constant(&language, "Foo").unwrap();
        let a = Term::constant(&language, "a").unwrap();
        let b = Term::constant(&language, "b").unwrap();

        let left = foo.apply([a.clone(), b.clone()]);
        let right = foo.apply([a.clone(), b.clone()]);
        assert_eq!(left, right);
        assert_eq!(hash_of(&left), hash_of(&right));

        let different = foo.apply([b, a]);
        assert_ne!(left, different);
    }

    #[test]
    fn containment_is_structural() {
        let language = Language::new();
        let f = Term::constant(&language, "f").unwrap();
        let x = Term::variable(&language, "x").unwrap();
        let inner = f.apply([x.clone()]);
        let outer = f.apply([inner.clone()]);

        assert!(outer.contains(&x));
        assert!(outer.contains(&inner));
        assert!(!x.contains(&x), "leaves contain nothing");
        assert!(!outer.contains(&outer), "a term does not contain itself");
    }

    #[test]
    fn size_counts_nodes() {
        let language = Language::new();
        let f = Term::constant(&language, "f").unwrap();
        let a = Term::constant(&language, "a").unwrap();
        assert_eq!(a.size(), 1);
        assert_eq!(f.apply([a.clone(), a.clone()]).size(), 4);
    }

    #[test]
    fn wrapped_values_compare_by_content() {
        assert_eq!(wrap(42i64), wrap(42i64));
        assert_ne!(wrap(42i64), wrap(43i64));
        assert_ne!(wrap(42i64), wrap(true), "different types never compare equal");
        assert_eq!(hash_of(&wrap(42i64)), hash_of(&wrap(42i64)));
    }

    #[test]
    fn wrapped_value_compares_against_raw_host_value() {
        let value = Value::new(42i64);
        assert!(value.equals_host(&42i64));
        assert!(!value.equals_host(&7i64));
        assert!(!value.equals_host(&"42".to_string()));
    }

    #[test]
    fn term_serde_round_trip_preserves_equality_and_hash() {
        let language = Language::new();
        let is_a = Term::constant(&language, "IsA").unwrap();
        let dylan = Term::constant(&language, "dylan").unwrap();
        let term = is_a.apply([dylan, wrap(9i64)]);

        let bytes = bincode::serialize(&term).unwrap();
        let back: Term = bincode::deserialize(&bytes).unwrap();

        assert_eq!(term, back);
        assert_eq!(hash_of(&term), hash_of(&back));
    }

    #[test]
    fn deserialized_symbols_carry_sealed_languages() {
        let language = Language::new();
        let term = Term::constant(&language, "c").unwrap();
        let bytes = bincode::serialize(&term).unwrap();
        let back: Term = bincode::deserialize(&bytes).unwrap();

        let symbol = back.as_symbol().unwrap();
        assert!(symbol.id().language.is_sealed());
        assert_eq!(symbol.id().language, language);
    }

    #[test]
    fn unserializable_value_fails_to_serialize() {
        #[derive(Debug, PartialEq, Eq, Hash)]
        struct Opaque(u8);

        impl fmt::Display for Opaque {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "opaque({})", self.0)
            }
        }

        impl HostValue for Opaque {
            fn as_any(&self) -> &dyn Any {
                self
            }

            fn dyn_eq(&self, other: &dyn HostValue) -> bool {
                other.as_any().downcast_ref::<Opaque>().map_or(false, |o| o == self)
            }

            fn dyn_hash(&self, mut state: &mut dyn Hasher) {
                self.hash(&mut state);
            }
        }

        let term = wrap(Opaque(3));
        assert!(bincode::serialize(&term).is_err());
    }
}
