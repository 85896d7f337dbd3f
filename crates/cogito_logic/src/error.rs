//! Error types for the term algebra and the unifier.

use std::fmt;

/// Errors raised while constructing or combining logic objects.
#[derive(Debug, Clone)]
pub enum LogicError {
    /// An expression was built with no children.
    EmptyExpression,

    /// A symbol was given an empty display name.
    EmptyName,

    /// A binding was declared with no variables.
    BindingWithoutVariables,

    /// A head-less binding needs at least two variables to mean anything.
    SingletonBindingWithoutHead,

    /// The head of a binding contains one of the binding's own variables.
    HeadContainsVariable { variable: String },

    /// Forced unification inside a binding merge found no unifier.
    ///
    /// This is distinct from `unify` returning `None`, which is the normal
    /// no-unifier outcome. This error only escapes from `with_bindings` when
    /// two bindings over shared variables carry incompatible heads.
    UnificationConflict { left: String, right: String },

    /// A bound object was requested for a symbol that is not a variable.
    NotAVariable { symbol: String },

    /// A bound object was requested for a variable outside the domain.
    UnboundVariable { variable: String },

    /// Two distinct variables with the same display name in one term.
    HomonymousVariables { name: String },

    /// The language was sealed and can no longer allocate identifiers.
    SealedLanguage,
}

impl fmt::Display for LogicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicError::EmptyExpression => {
                write!(f, "an expression must have at least one child")
            }
            LogicError::EmptyName => {
                write!(f, "a symbol name must be a non-empty string")
            }
            LogicError::BindingWithoutVariables => {
                write!(f, "a binding must contain at least one variable")
            }
            LogicError::SingletonBindingWithoutHead => {
                write!(f, "a binding without a head needs at least two variables")
            }
            LogicError::HeadContainsVariable { variable } => {
                write!(f, "the head of a binding cannot contain its own variable '{}'", variable)
            }
            LogicError::UnificationConflict { left, right } => {
                write!(f, "unable to unify the heads '{}' and '{}' of two merged bindings", left, right)
            }
            LogicError::NotAVariable { symbol } => {
                write!(f, "only variables can be bound, '{}' is not one", symbol)
            }
            LogicError::UnboundVariable { variable } => {
                write!(f, "variable '{}' is not bound by this substitution", variable)
            }
            LogicError::HomonymousVariables { name } => {
                write!(f, "found two distinct variables named '{}' in the same term", name)
            }
            LogicError::SealedLanguage => {
                write!(f, "this language is sealed and cannot allocate new identifiers")
            }
        }
    }
}

impl std::error::Error for LogicError {}

/// Alias for `std::result::Result<T, LogicError>`.
pub type LogicResult<T> = std::result::Result<T, LogicError>;
