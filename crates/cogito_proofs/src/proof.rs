//! Proof trees.
//!
//! A [`Proof`] is an immutable node tagged with the inference rule that
//! produced it, the concluded formula (always substitution-applied), the
//! substitution satisfying the goal, and the premise proofs it rests on.
//! Proofs share structure freely: premises are reference-counted, so a
//! proof DAG costs one allocation per node.

use std::fmt;
use std::sync::Arc;

use cogito_logic::{Substitution, Term};

use crate::components::Component;

/// What produced a proof node.
#[derive(Debug, Clone)]
pub enum InferenceRule {
    /// The always-present prover that proves a goal iff it is unifiable
    /// with a stored formula.
    KnowledgeRetrieval,

    /// A registered prover component.
    Prover(Arc<Component>),

    /// A listener fired on a proven formula during pondering.
    Pondering {
        listener: Arc<Component>,
        trigger: Term,
    },
}

impl fmt::Display for InferenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferenceRule::KnowledgeRetrieval => write!(f, "knowledge-retrieval"),
            InferenceRule::Prover(component) => write!(f, "prover({})", component.name()),
            InferenceRule::Pondering { listener, trigger } => {
                write!(f, "pondering({} on {})", listener.name(), trigger)
            }
        }
    }
}

#[derive(Debug)]
struct ProofInner {
    rule: InferenceRule,
    conclusion: Term,
    substitution: Substitution,
    premises: Vec<Proof>,
}

/// An immutable proof node; cheap to clone.
#[derive(Debug, Clone)]
pub struct Proof {
    inner: Arc<ProofInner>,
}

impl Proof {
    pub fn new(
        rule: InferenceRule,
        conclusion: Term,
        substitution: Substitution,
        premises: Vec<Proof>,
    ) -> Self {
        Self {
            inner: Arc::new(ProofInner {
                rule,
                conclusion,
                substitution,
                premises,
            }),
        }
    }

    pub fn rule(&self) -> &InferenceRule {
        &self.inner.rule
    }

    pub fn conclusion(&self) -> &Term {
        &self.inner.conclusion
    }

    pub fn substitution(&self) -> &Substitution {
        &self.inner.substitution
    }

    pub fn premises(&self) -> &[Proof] {
        &self.inner.premises
    }

    /// Whether this node was produced by the knowledge retriever.
    pub fn is_retrieval(&self) -> bool {
        matches!(self.inner.rule, InferenceRule::KnowledgeRetrieval)
    }
}

impl fmt::Display for Proof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn render(proof: &Proof, depth: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            writeln!(
                f,
                "{}{}  [{}]",
                "  ".repeat(depth),
                proof.conclusion(),
                proof.rule()
            )?;
            for premise in proof.premises() {
                render(premise, depth + 1, f)?;
            }
            Ok(())
        }
        render(self, 0, f)
    }
}
