//! Builtin provers.
//!
//! Both are ordinary [`Component`]s in `Raw` mode listening on a lone
//! variable, registered explicitly by the client: neither is part of a
//! fresh engine. The knowledge retriever, by contrast, is built into the
//! engine and always present.

use futures::StreamExt;

use cogito_logic::{Language, Symbol, Term};

use crate::components::{Component, HandlerArgumentMode, HandlerSafety, HandlerValue};
use crate::engine::ProveOptions;
use crate::operators;

fn any_formula() -> Term {
    let language = Language::new();
    Term::anonymous_variable(&language).expect("a fresh language always allocates")
}

/// Restricted backward modus ponens.
///
/// For a non-implication goal `g`, proves `Implies(p, g)` in the knowledge
/// base and then recursively proves the instantiated premise `p`. The
/// restriction: implications themselves are never proved by chaining, which
/// keeps the search from trivially not terminating.
pub fn restricted_modus_ponens() -> Component {
    Component::builder()
        .name("restricted-modus-ponens")
        .listened_formula(any_formula())
        .argument_mode(HandlerArgumentMode::Raw)
        .pass_knowledge_base_as("kb")
        .pure(true)
        .safety(HandlerSafety::Safe)
        .handler(|input, sink| {
            Box::pin(async move {
                let formula = input.formula()?.clone();
                let substitution = input.substitution("substitution")?.clone();
                let kb = input.knowledge_base("kb")?.clone();

                if operators::is_implication(&formula) {
                    return Ok(());
                }

                let language = Language::new();
                let premise_symbol = Symbol::new_variable(&language, Some("premise"))?;
                let premise_variable = Term::Symbol(premise_symbol.clone());
                let pattern = operators::implies(premise_variable, formula);

                let mut rules = kb.async_prove_with(
                    &pattern,
                    ProveOptions {
                        retrieve_only: false,
                        previous: substitution,
                    },
                )?;
                while let Some(rule_proof) = rules.next().await {
                    let rule_proof = rule_proof?;
                    let premise = rule_proof
                        .substitution()
                        .get_bound_object_for(&premise_symbol)?;

                    let mut premise_proofs = kb.async_prove_with(
                        &premise,
                        ProveOptions {
                            retrieve_only: false,
                            previous: rule_proof.substitution().clone(),
                        },
                    )?;
                    while let Some(premise_proof) = premise_proofs.next().await {
                        let premise_proof = premise_proof?;
                        sink.emit(HandlerValue::derived(
                            premise_proof.substitution().clone(),
                            vec![rule_proof.clone(), premise_proof],
                        ))
                        .await?;
                    }
                }
                Ok(())
            })
        })
        .build()
        .expect("the modus ponens configuration is valid")
}

/// Closed-world assumption.
///
/// Concludes `Not(p)` from a single failed attempt to prove `p`. Goals that
/// are not negations are ignored.
pub fn closed_world_assumption() -> Component {
    Component::builder()
        .name("closed-world-assumption")
        .listened_formula(any_formula())
        .argument_mode(HandlerArgumentMode::Raw)
        .pass_knowledge_base_as("kb")
        .pure(true)
        .safety(HandlerSafety::Safe)
        .handler(|input, sink| {
            Box::pin(async move {
                let formula = input.formula()?.clone();
                let substitution = input.substitution("substitution")?.clone();
                let kb = input.knowledge_base("kb")?.clone();

                let language = Language::new();
                let negated_symbol = Symbol::new_variable(&language, Some("p"))?;
                let pattern = operators::not(Term::Symbol(negated_symbol.clone()));

                let Some(matched) =
                    cogito_logic::Substitution::unify(&formula, &pattern, None)
                else {
                    return Ok(());
                };
                let target = matched.get_bound_object_for(&negated_symbol)?;

                let mut attempt = kb.async_prove_with(&target, ProveOptions::default())?;
                match attempt.next().await {
                    // Silence is assent: nothing proves the positive form.
                    None => sink.emit(HandlerValue::substituted(substitution)).await,
                    Some(Ok(_)) => Ok(()),
                    Some(Err(error)) => Err(error),
                }
            })
        })
        .build()
        .expect("the closed world assumption configuration is valid")
}
