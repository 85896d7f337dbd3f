//! Listener dispatch and loopback scenarios.

mod common;

use common::{constant, variable, world};

use cogito_logic::{Language, Term};
use cogito_proofs::{
    operators, restricted_modus_ponens, Component, HandlerArgumentMode, HandlerSafety,
    HandlerValue, InferenceRule, KnowledgeBase, PonderMode, Proof,
};
use cogito_storage::IndexedTermStorage;

fn engine() -> KnowledgeBase {
    KnowledgeBase::new(IndexedTermStorage::new()).unwrap()
}

/// A listener on `head(?x)` concluding `conclusion(?x)`.
fn forwarding_listener(language: &Language, head: &Term, conclusion: &Term) -> Component {
    let x = variable(language, "x");
    let conclusion = conclusion.clone();
    Component::builder()
        .name(format!("forward[{}]", conclusion))
        .listened_formula(head.apply([x]))
        .argument_mode(HandlerArgumentMode::Map)
        .parameters(["x"])
        .pure(true)
        .safety(HandlerSafety::Safe)
        .handler_fn(move |input| {
            let x = input.term("x")?.clone();
            Ok(Some(HandlerValue::Conclusion(conclusion.apply([x]))))
        })
        .build()
        .unwrap()
}

fn ponder_all(kb: &KnowledgeBase, goals: Vec<Term>, mode: PonderMode) -> Vec<Proof> {
    kb.ponder(goals, mode).unwrap().map(Result::unwrap).collect()
}

#[test]
fn a_listener_fires_on_a_known_formula() {
    let kb = engine();
    let w = world();
    let is = constant(&w.language, "Is");
    let meows = constant(&w.language, "Meows");

    let c = variable(&w.language, "c");
    let listener = Component::builder()
        .name("deduce-meow")
        .listened_formula(is.apply([c.clone(), w.cat.clone()]))
        .argument_mode(HandlerArgumentMode::Map)
        .parameters(["c"])
        .pure(true)
        .safety(HandlerSafety::Safe)
        .handler_fn({
            let meows = meows.clone();
            move |input| {
                let c = input.term("c")?.clone();
                Ok(Some(HandlerValue::Conclusion(meows.apply([c]))))
            }
        })
        .build()
        .unwrap();
    kb.add_listener(listener).unwrap();

    let fact = is.apply([w.dylan.clone(), w.cat.clone()]);
    kb.add_formulas([fact.clone()]).unwrap();

    let proofs = ponder_all(&kb, vec![fact.clone()], PonderMode::Known);
    assert_eq!(proofs.len(), 1);

    let proof = &proofs[0];
    assert_eq!(proof.conclusion(), &meows.apply([w.dylan.clone()]));
    assert!(matches!(proof.rule(), InferenceRule::Pondering { .. }));
    // The triggering proof is the first premise.
    assert_eq!(proof.premises()[0].conclusion(), &fact);
    assert!(proof.premises()[0].is_retrieval());
}

#[test]
fn known_mode_does_not_fire_on_unknown_formulas() {
    let kb = engine();
    let w = world();
    let is = constant(&w.language, "Is");
    let meows = constant(&w.language, "Meows");

    kb.add_listener(forwarding_listener(&w.language, &is, &meows))
        .unwrap();

    // Nothing stored: the trigger has no proof, the listener never runs.
    let proofs = ponder_all(
        &kb,
        vec![is.apply([w.dylan.clone()])],
        PonderMode::Known,
    );
    assert!(proofs.is_empty());
}

#[test]
fn prove_mode_fires_on_derived_conclusions() {
    let kb = engine();
    kb.add_prover(restricted_modus_ponens()).unwrap();

    let w = world();
    let a = constant(&w.language, "A");
    let b = constant(&w.language, "B");
    let c = constant(&w.language, "C");
    let foo = constant(&w.language, "foo");
    let x = variable(&w.language, "x");

    kb.add_formulas([
        operators::implies(a.apply([x.clone()]), b.apply([x.clone()])),
        a.apply([foo.clone()]),
    ])
    .unwrap();
    kb.add_listener(forwarding_listener(&w.language, &b, &c)).unwrap();

    // B(foo) is not stored, only derivable; Known stays silent while
    // Prove fires the listener.
    let goal = b.apply([foo.clone()]);
    assert!(ponder_all(&kb, vec![goal.clone()], PonderMode::Known).is_empty());

    let proofs = ponder_all(&kb, vec![goal.clone()], PonderMode::Prove);
    assert_eq!(proofs.len(), 1);
    assert_eq!(proofs[0].conclusion(), &c.apply([foo.clone()]));
    assert_eq!(proofs[0].premises()[0].conclusion(), &goal);
}

#[test]
fn listener_results_loop_back_into_the_stream() {
    let kb = engine();
    let w = world();
    let a = constant(&w.language, "A");
    let b = constant(&w.language, "B");
    let c = constant(&w.language, "C");
    let d = constant(&w.language, "D");
    let foo = constant(&w.language, "foo");

    // A ⇒ B ⇒ C ⇒ D as a listener chain: each deduction re-enters the
    // stream and triggers the next listener.
    kb.add_listener(forwarding_listener(&w.language, &a, &b)).unwrap();
    kb.add_listener(forwarding_listener(&w.language, &b, &c)).unwrap();
    kb.add_listener(forwarding_listener(&w.language, &c, &d)).unwrap();

    let fact = a.apply([foo.clone()]);
    kb.add_formulas([fact.clone()]).unwrap();

    let proofs = ponder_all(&kb, vec![fact], PonderMode::Known);
    let conclusions: Vec<&Term> = proofs.iter().map(Proof::conclusion).collect();
    assert_eq!(proofs.len(), 3);
    assert!(conclusions.contains(&&b.apply([foo.clone()])));
    assert!(conclusions.contains(&&c.apply([foo.clone()])));
    assert!(conclusions.contains(&&d.apply([foo.clone()])));

    // The D proof carries the whole deduction chain in its premises.
    let d_proof = proofs
        .iter()
        .find(|proof| proof.conclusion() == &d.apply([foo.clone()]))
        .unwrap();
    let c_premise = &d_proof.premises()[0];
    assert_eq!(c_premise.conclusion(), &c.apply([foo.clone()]));
    assert_eq!(
        c_premise.premises()[0].conclusion(),
        &b.apply([foo.clone()])
    );
}

#[test]
fn one_trigger_can_fire_many_listeners() {
    let kb = engine();
    let w = world();
    let is = constant(&w.language, "Is");
    let meows = constant(&w.language, "Meows");
    let purrs = constant(&w.language, "Purrs");

    let x = variable(&w.language, "x");
    let listener = Component::builder()
        .name("deduce-meow-and-purr")
        .listened_formula(is.apply([x.clone(), w.cat.clone()]))
        .argument_mode(HandlerArgumentMode::Map)
        .parameters(["x"])
        .pure(true)
        .safety(HandlerSafety::Safe)
        .handler_iter({
            let meows = meows.clone();
            let purrs = purrs.clone();
            move |input| {
                let x = input.term("x")?.clone();
                Ok(vec![
                    HandlerValue::Conclusion(meows.apply([x.clone()])),
                    HandlerValue::Conclusion(purrs.apply([x])),
                ])
            }
        })
        .build()
        .unwrap();
    kb.add_listener(listener).unwrap();

    let fact = is.apply([w.dylan.clone(), w.cat.clone()]);
    kb.add_formulas([fact.clone()]).unwrap();

    let proofs = ponder_all(&kb, vec![fact], PonderMode::Known);
    let conclusions: Vec<&Term> = proofs.iter().map(Proof::conclusion).collect();
    assert_eq!(proofs.len(), 2);
    assert!(conclusions.contains(&&meows.apply([w.dylan.clone()])));
    assert!(conclusions.contains(&&purrs.apply([w.dylan.clone()])));
}

#[test]
fn several_goals_ponder_through_one_stream() {
    let kb = engine();
    let w = world();
    let is = constant(&w.language, "Is");
    let meows = constant(&w.language, "Meows");

    kb.add_listener(forwarding_listener(&w.language, &is, &meows))
        .unwrap();

    let dylan_fact = is.apply([w.dylan.clone()]);
    let hugo_fact = is.apply([w.hugo.clone()]);
    kb.add_formulas([dylan_fact.clone(), hugo_fact.clone()]).unwrap();

    let proofs = ponder_all(
        &kb,
        vec![dylan_fact, hugo_fact],
        PonderMode::Known,
    );
    let conclusions: Vec<&Term> = proofs.iter().map(Proof::conclusion).collect();
    assert_eq!(proofs.len(), 2);
    assert!(conclusions.contains(&&meows.apply([w.dylan.clone()])));
    assert!(conclusions.contains(&&meows.apply([w.hugo.clone()])));
}
