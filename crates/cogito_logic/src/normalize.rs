//! Variable normalization.
//!
//! Stored formulas and queried formulas must never share variables, so terms
//! are renamed on the way into a knowledge base and again on the way out.
//! Two modes exist:
//!
//! - **fresh**: every variable becomes a brand-new variable of the given
//!   language, names preserved. Distinct normalizations never collide.
//! - **canonical**: variables are renamed by ordinal appearance using a
//!   shared [`VariableSource`], so isomorphic terms normalize to the *same*
//!   term. This is what deduplicating storages key on.

use std::sync::Mutex;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{LogicError, LogicResult};
use crate::language::Language;
use crate::term::{Symbol, Term};

/// A memoized factory of named variables over one language.
///
/// Asking twice for the same name yields the same variable, which is what
/// makes canonical normalization stable across calls.
#[derive(Debug)]
pub struct VariableSource {
    language: Language,
    variables: Mutex<FxHashMap<String, Symbol>>,
}

impl VariableSource {
    pub fn new(language: &Language) -> Self {
        Self {
            language: language.clone(),
            variables: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn language(&self) -> &Language {
        &self.language
    }

    /// The variable registered under `name`, minting it on first use.
    pub fn get(&self, name: &str) -> LogicResult<Symbol> {
        let mut variables = self.variables.lock().expect("variable source poisoned");
        if let Some(existing) = variables.get(name) {
            return Ok(existing.clone());
        }
        let minted = Symbol::new_variable(&self.language, Some(name))?;
        variables.insert(name.to_string(), minted.clone());
        Ok(minted)
    }

    /// Like [`VariableSource::get`], as a term.
    pub fn term(&self, name: &str) -> LogicResult<Term> {
        Ok(Term::Symbol(self.get(name)?))
    }
}

/// How [`normalize_variables`] should rename.
#[derive(Debug, Clone, Copy)]
pub enum NormalizationMode<'a> {
    /// Allocate completely new variables from this language.
    Fresh(&'a Language),
    /// Rename by ordinal appearance inside this shared source.
    Canonical(&'a VariableSource),
}

/// Renames all variables of a term, returning the rewritten term and the
/// mapping that was used.
pub fn normalize_variables(
    term: &Term,
    mode: NormalizationMode<'_>,
) -> LogicResult<(Term, FxHashMap<Symbol, Symbol>)> {
    let mut mapping = FxHashMap::default();
    let normalized = normalize_variables_with(term, mode, &mut mapping)?;
    Ok((normalized, mapping))
}

/// Renames under an existing mapping, so several terms can be normalized
/// consistently under one renaming (rule premises with their conclusions).
pub fn normalize_variables_with(
    term: &Term,
    mode: NormalizationMode<'_>,
    mapping: &mut FxHashMap<Symbol, Symbol>,
) -> LogicResult<Term> {
    match term {
        Term::Symbol(symbol) if symbol.is_variable() => {
            if let Some(renamed) = mapping.get(symbol) {
                return Ok(Term::Symbol(renamed.clone()));
            }
            let renamed = match mode {
                NormalizationMode::Fresh(language) => {
                    Symbol::new_variable(language, symbol.name())?
                }
                NormalizationMode::Canonical(source) => {
                    source.get(&mapping.len().to_string())?
                }
            };
            mapping.insert(symbol.clone(), renamed.clone());
            Ok(Term::Symbol(renamed))
        }
        Term::Expr(expr) => {
            let children = expr
                .children()
                .iter()
                .map(|child| normalize_variables_with(child, mode, mapping))
                .collect::<LogicResult<Vec<_>>>()?;
            Term::expression(children)
        }
        _ => Ok(term.clone()),
    }
}

/// All variables of a term in depth-first order, repetitions included.
pub fn variables_in(term: &Term) -> Vec<Symbol> {
    fn inner(term: &Term, out: &mut Vec<Symbol>) {
        match term {
            Term::Symbol(symbol) if symbol.is_variable() => out.push(symbol.clone()),
            Term::Expr(expr) => {
                for child in expr.children() {
                    inner(child, out);
                }
            }
            _ => {}
        }
    }
    let mut out = Vec::new();
    inner(term, &mut out);
    out
}

/// The distinct variables of a term.
pub fn unique_variables_in(term: &Term) -> FxHashSet<Symbol> {
    variables_in(term).into_iter().collect()
}

/// Maps display names to variables, for handlers that receive arguments by
/// name. Fails when two *distinct* variables share a display name, which
/// would make the mapping ambiguous. Unnamed variables are skipped.
pub fn map_variables_by_name(term: &Term) -> LogicResult<FxHashMap<String, Symbol>> {
    let mut result: FxHashMap<String, Symbol> = FxHashMap::default();
    for variable in variables_in(term) {
        let Some(name) = variable.name() else {
            continue;
        };
        match result.get(name) {
            None => {
                result.insert(name.to_string(), variable);
            }
            Some(existing) if *existing == variable => {}
            Some(_) => {
                return Err(LogicError::HomonymousVariables {
                    name: name.to_string(),
                })
            }
        }
    }
    Ok(result)
}
