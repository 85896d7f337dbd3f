//! Bindings, substitutions and most-general unification.
//!
//! A [`Binding`] groups variables that have been identified with each other,
//! optionally anchored to a head term. A [`Substitution`] maps every
//! variable of a binding to the *same* shared binding object, so that
//! merging groups is a join rather than a rewrite. [`Substitution::unify`]
//! is Robinson's algorithm with the classical occurs-check on top of that
//! shared-binding representation.
//!
//! Failure comes in two distinct flavors: `unify` returning `None` is the
//! ordinary no-unifier outcome, while [`LogicError::UnificationConflict`]
//! escapes from [`Substitution::with_bindings`] when a merge *forces* two
//! incompatible heads together.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHasher};

use crate::error::{LogicError, LogicResult};
use crate::term::{Symbol, Term};

/// A set of variables identified with each other, optionally bound to a
/// head term.
///
/// Invariants, enforced at construction:
/// - at least one variable, all of them actual variables;
/// - without a head, at least two variables (the binding then means "these
///   variables are equal");
/// - the head never contains (nor is) one of the binding's own variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    variables: BTreeSet<Symbol>,
    head: Option<Term>,
}

impl Binding {
    pub fn new(variables: BTreeSet<Symbol>, head: Option<Term>) -> LogicResult<Self> {
        if variables.is_empty() {
            return Err(LogicError::BindingWithoutVariables);
        }
        if head.is_none() && variables.len() < 2 {
            return Err(LogicError::SingletonBindingWithoutHead);
        }
        for variable in &variables {
            if !variable.is_variable() {
                return Err(LogicError::NotAVariable {
                    symbol: variable.to_string(),
                });
            }
            if let Some(head) = &head {
                let as_term = Term::Symbol(variable.clone());
                if *head == as_term || head.contains(&as_term) {
                    return Err(LogicError::HeadContainsVariable {
                        variable: variable.to_string(),
                    });
                }
            }
        }
        Ok(Self { variables, head })
    }

    /// A binding stating that all the given variables are equal.
    pub fn headless<I: IntoIterator<Item = Symbol>>(variables: I) -> LogicResult<Self> {
        Self::new(variables.into_iter().collect(), None)
    }

    /// A binding anchoring the given variables to a head term.
    pub fn with_head<I: IntoIterator<Item = Symbol>>(variables: I, head: Term) -> LogicResult<Self> {
        Self::new(variables.into_iter().collect(), Some(head))
    }

    pub fn variables(&self) -> impl Iterator<Item = &Symbol> {
        self.variables.iter()
    }

    pub fn head(&self) -> Option<&Term> {
        self.head.as_ref()
    }

    /// The deterministic representative of a head-less group: the smallest
    /// variable in identifier order. Canonical substitution equality leans
    /// on this being stable.
    pub fn representative(&self) -> &Symbol {
        self.variables
            .iter()
            .next()
            .expect("bindings always hold at least one variable")
    }

    /// The head if present, otherwise the representative variable.
    pub fn bound_object(&self) -> Term {
        match &self.head {
            Some(head) => head.clone(),
            None => Term::Symbol(self.representative().clone()),
        }
    }

    /// Joins two bindings that must agree: variable sets unite and heads
    /// combine. When both heads are present they are unified under the
    /// current substitution; if that fails the merge is a hard error, not a
    /// no-unifier outcome.
    pub fn join(a: &Binding, b: &Binding, context: &Substitution) -> LogicResult<Binding> {
        let head = match (&a.head, &b.head) {
            (None, None) => None,
            (Some(head), None) | (None, Some(head)) => Some(head.clone()),
            (Some(left), Some(right)) => {
                let unifier = Substitution::unify(left, right, Some(context)).ok_or_else(|| {
                    LogicError::UnificationConflict {
                        left: left.to_string(),
                        right: right.to_string(),
                    }
                })?;
                Some(unifier.apply_to(left))
            }
        };
        let variables: BTreeSet<Symbol> = a.variables.union(&b.variables).cloned().collect();
        Binding::new(variables, head)
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, variable) in self.variables.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", variable)?;
        }
        write!(f, "}} -> ")?;
        match &self.head {
            Some(head) => write!(f, "{}", head),
            None => write!(f, "_"),
        }
    }
}

/// A mapping from variables to shared bindings.
///
/// Every variable in a binding's variable set maps to that same binding
/// object. Substitutions are cheap to clone and extension never mutates the
/// original.
#[derive(Debug, Clone, Default)]
pub struct Substitution {
    bindings: FxHashMap<Symbol, Arc<Binding>>,
}

impl Substitution {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Builds a substitution from scratch, merging as needed.
    pub fn from_bindings<I: IntoIterator<Item = Binding>>(bindings: I) -> LogicResult<Self> {
        Self::empty().with_bindings(bindings)
    }

    /// Returns a new substitution extended with the given bindings.
    ///
    /// Bindings that share variables with existing groups are joined; a
    /// failed forced unification of two heads surfaces as
    /// [`LogicError::UnificationConflict`].
    pub fn with_bindings<I: IntoIterator<Item = Binding>>(&self, bindings: I) -> LogicResult<Self> {
        let mut result = self.clone();
        for binding in bindings {
            result.declare_binding(binding)?;
        }
        Ok(result)
    }

    fn declare_binding(&mut self, binding: Binding) -> LogicResult<()> {
        // Collect the distinct groups already covering this binding's
        // variables, then join them all into one.
        let mut existing: Vec<Arc<Binding>> = Vec::new();
        for variable in binding.variables() {
            if let Some(other) = self.bindings.get(variable) {
                if !existing.iter().any(|seen| Arc::ptr_eq(seen, other)) {
                    existing.push(other.clone());
                }
            }
        }

        let mut merged = binding;
        for other in existing {
            merged = Binding::join(&merged, &other, self)?;
        }

        let merged = Arc::new(merged);
        for variable in merged.variables() {
            self.bindings.insert(variable.clone(), merged.clone());
        }
        Ok(())
    }

    /// Rewrites every bound variable in the term, following binding chains.
    /// Head-less groups resolve to their representative variable.
    pub fn apply_to(&self, term: &Term) -> Term {
        match term {
            Term::Symbol(symbol) if symbol.is_variable() => match self.bindings.get(symbol) {
                Some(binding) => match binding.head() {
                    Some(head) => self.apply_to(head),
                    None => Term::Symbol(binding.representative().clone()),
                },
                None => term.clone(),
            },
            Term::Expr(expr) => {
                let children = expr.children().iter().map(|child| self.apply_to(child)).collect();
                Term::expression(children).expect("expressions keep their arity under substitution")
            }
            _ => term.clone(),
        }
    }

    /// The canonical value of a variable: its group's head, or the group
    /// representative when the group has no head.
    pub fn get_bound_object_for(&self, variable: &Symbol) -> LogicResult<Term> {
        if !variable.is_variable() {
            return Err(LogicError::NotAVariable {
                symbol: variable.to_string(),
            });
        }
        match self.bindings.get(variable) {
            Some(binding) => Ok(binding.bound_object()),
            None => Err(LogicError::UnboundVariable {
                variable: variable.to_string(),
            }),
        }
    }

    /// Variables in the domain of this substitution.
    pub fn domain(&self) -> impl Iterator<Item = &Symbol> {
        self.bindings.keys()
    }

    /// Computes the most general unifier of `a` and `b` extending
    /// `previous`, or `None` when the terms do not unify.
    pub fn unify(a: &Term, b: &Term, previous: Option<&Substitution>) -> Option<Substitution> {
        let subst = previous.cloned().unwrap_or_default();
        Self::unify_under(a, b, subst)
    }

    fn unify_under(a: &Term, b: &Term, subst: Substitution) -> Option<Substitution> {
        let a = subst.apply_to(a);
        let b = subst.apply_to(b);

        if a == b {
            return Some(subst);
        }

        match (&a, &b) {
            (Term::Symbol(x), Term::Symbol(y)) if x.is_variable() && y.is_variable() => {
                let binding = Binding::headless([x.clone(), y.clone()]).ok()?;
                // After application neither side carries a head, so the
                // merge below cannot hit a head conflict.
                subst.with_bindings([binding]).ok()
            }
            (Term::Symbol(x), _) if x.is_variable() && !b.contains(&a) => {
                let binding = Binding::with_head([x.clone()], b.clone()).ok()?;
                subst.with_bindings([binding]).ok()
            }
            (_, Term::Symbol(y)) if y.is_variable() && !a.contains(&b) => {
                let binding = Binding::with_head([y.clone()], a.clone()).ok()?;
                subst.with_bindings([binding]).ok()
            }
            (Term::Expr(ea), Term::Expr(eb)) if ea.arity() == eb.arity() => {
                let mut subst = subst;
                for (child_a, child_b) in ea.children().iter().zip(eb.children()) {
                    subst = Self::unify_under(child_a, child_b, subst)?;
                }
                Some(subst)
            }
            _ => None,
        }
    }

    // Canonical resolution of a single variable, used by equality/hash:
    // fully applies the substitution to the variable.
    fn resolve(&self, variable: &Symbol) -> Term {
        self.apply_to(&Term::Symbol(variable.clone()))
    }
}

/// Equality by canonical bound objects: two substitutions are equal when
/// every variable in either domain resolves to the same value under both,
/// regardless of how bindings are grouped internally.
impl PartialEq for Substitution {
    fn eq(&self, other: &Self) -> bool {
        self.bindings
            .keys()
            .chain(other.bindings.keys())
            .all(|variable| self.resolve(variable) == other.resolve(variable))
    }
}

impl Eq for Substitution {}

/// Hash consistent with canonical equality: combines (variable, resolved
/// value) pairs for every variable whose resolution is not the identity,
/// order-independently.
impl Hash for Substitution {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut combined: u64 = 0;
        for variable in self.bindings.keys() {
            let resolved = self.resolve(variable);
            if resolved == Term::Symbol(variable.clone()) {
                continue;
            }
            let mut hasher = FxHasher::default();
            variable.hash(&mut hasher);
            resolved.hash(&mut hasher);
            combined ^= hasher.finish();
        }
        state.write_u64(combined);
    }
}

impl fmt::Display for Substitution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut groups: Vec<&Arc<Binding>> = Vec::new();
        for binding in self.bindings.values() {
            if !groups.iter().any(|seen| Arc::ptr_eq(seen, binding)) {
                groups.push(binding);
            }
        }
        write!(f, "[")?;
        for (i, binding) in groups.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", binding)?;
        }
        write!(f, "]")
    }
}
