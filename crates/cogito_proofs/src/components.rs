//! Handler components: the common contract behind provers and listeners.
//!
//! A component binds a *listened formula* to a host handler plus the
//! configuration governing how arguments reach it, whether it receives the
//! current substitution and the engine handle, and whether it may run in
//! hypothetical contexts. At dispatch time the component renames its
//! listened formula into fresh variables, unifies it with the query and
//! extracts the declared arguments; the handler then emits zero or more
//! results as an asynchronous stream.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use rustc_hash::FxHashMap;

use cogito_logic::{
    map_variables_by_name, normalize_variables, NormalizationMode, Substitution, Symbol, Term,
    Value,
};
use cogito_runtime::{spawn_emitter, EmitterSink, EmitterStream};

use crate::engine::KnowledgeBase;
use crate::error::{EngineError, EngineResult};
use crate::proof::{InferenceRule, Proof};

/// How the handler receives its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerArgumentMode {
    /// The literal query term plus the substitution.
    Raw,
    /// The term bound to each named variable of the listened formula.
    Map,
    /// Like `Map`, with wrapped values unwrapped to host values.
    MapUnwrapped,
    /// Like `MapUnwrapped`; the handler is skipped unless every argument is
    /// a wrapped value.
    MapUnwrappedRequired,
    /// Like `MapUnwrapped`; the handler is skipped if any argument is a
    /// variable.
    MapUnwrappedNoVariables,
    /// Like `Map`, with the same variable-skipping rule.
    MapNoVariables,
}

/// Whether a component may run while exploring a hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerSafety {
    Safe,
    SafeForHypotheses,
    TotallyUnsafe,
}

/// One argument as delivered to a handler.
#[derive(Debug, Clone)]
pub enum ArgumentValue {
    Term(Term),
    /// An unwrapped host value.
    Host(Value),
    Substitution(Substitution),
    KnowledgeBase(KnowledgeBase),
}

/// The named arguments of one handler invocation.
#[derive(Debug, Clone)]
pub struct HandlerInput {
    args: FxHashMap<String, ArgumentValue>,
}

impl HandlerInput {
    pub fn get(&self, name: &str) -> Option<&ArgumentValue> {
        self.args.get(name)
    }

    fn missing(&self, name: &str, kind: &str) -> EngineError {
        EngineError::HandlerContract {
            detail: format!("no {} argument named '{}' was passed to this handler", kind, name),
        }
    }

    pub fn term(&self, name: &str) -> EngineResult<&Term> {
        match self.args.get(name) {
            Some(ArgumentValue::Term(term)) => Ok(term),
            _ => Err(self.missing(name, "term")),
        }
    }

    pub fn host_value(&self, name: &str) -> EngineResult<&Value> {
        match self.args.get(name) {
            Some(ArgumentValue::Host(value)) => Ok(value),
            _ => Err(self.missing(name, "host value")),
        }
    }

    pub fn substitution(&self, name: &str) -> EngineResult<&Substitution> {
        match self.args.get(name) {
            Some(ArgumentValue::Substitution(substitution)) => Ok(substitution),
            _ => Err(self.missing(name, "substitution")),
        }
    }

    pub fn knowledge_base(&self, name: &str) -> EngineResult<&KnowledgeBase> {
        match self.args.get(name) {
            Some(ArgumentValue::KnowledgeBase(kb)) => Ok(kb),
            _ => Err(self.missing(name, "knowledge base")),
        }
    }

    /// The literal query term of a `Raw` handler.
    pub fn formula(&self) -> EngineResult<&Term> {
        self.term(RAW_FORMULA_ARG)
    }
}

/// One result emitted by a handler.
#[derive(Debug, Clone)]
pub enum HandlerValue {
    /// A fully formed proof.
    Proof(Proof),
    /// Conclusion, substitution and premises. A missing conclusion means
    /// "the goal being proved"; only prover contexts have one.
    ConclusionSubstitutionPremises {
        conclusion: Option<Term>,
        substitution: Substitution,
        premises: Vec<Proof>,
    },
    /// Conclusion and substitution, no premises.
    ConclusionSubstitution {
        conclusion: Option<Term>,
        substitution: Substitution,
    },
    /// A bare conclusion; the substitution defaults to the dispatch
    /// unifier.
    Conclusion(Term),
}

impl HandlerValue {
    /// A proof of the current goal under `substitution`, resting on
    /// `premises`.
    pub fn derived(substitution: Substitution, premises: Vec<Proof>) -> Self {
        HandlerValue::ConclusionSubstitutionPremises {
            conclusion: None,
            substitution,
            premises,
        }
    }

    /// A proof of the current goal under `substitution`.
    pub fn substituted(substitution: Substitution) -> Self {
        HandlerValue::ConclusionSubstitution {
            conclusion: None,
            substitution,
        }
    }
}

/// Where a dispatch came from, which decides how handler values become
/// proofs.
#[derive(Debug, Clone)]
pub enum InvocationContext {
    /// Backward chaining: proofs conclude the goal.
    Prove { goal: Term },
    /// Listener dispatch: proofs conclude whatever the handler returned,
    /// with the triggering proof as first premise.
    Ponder { trigger: Proof },
}

/// The handler-side sink of a dispatch: converts handler values into proof
/// nodes and pushes them onto the source's bounded stream.
#[derive(Debug)]
pub struct ProofSink {
    sink: EmitterSink<Proof, EngineError>,
    rule: InferenceRule,
    context: InvocationContext,
    unifier: Substitution,
}

impl ProofSink {
    /// Emits one handler result, suspending while the buffer is full.
    pub async fn emit(&self, value: HandlerValue) -> EngineResult<()> {
        let proof = self.convert(value)?;
        self.sink.emit(proof).await?;
        Ok(())
    }

    fn convert(&self, value: HandlerValue) -> EngineResult<Proof> {
        let (conclusion, substitution, premises) = match value {
            HandlerValue::Proof(proof) => return Ok(proof),
            HandlerValue::ConclusionSubstitutionPremises {
                conclusion,
                substitution,
                premises,
            } => (conclusion, substitution, premises),
            HandlerValue::ConclusionSubstitution {
                conclusion,
                substitution,
            } => (conclusion, substitution, vec![]),
            HandlerValue::Conclusion(term) => (Some(term), self.unifier.clone(), vec![]),
        };

        match &self.context {
            InvocationContext::Prove { goal } => {
                let concluded = substitution.apply_to(conclusion.as_ref().unwrap_or(goal));
                Ok(Proof::new(self.rule.clone(), concluded, substitution, premises))
            }
            InvocationContext::Ponder { trigger } => {
                let Some(conclusion) = conclusion else {
                    return Err(EngineError::HandlerContract {
                        detail: "a listener result must carry a conclusion formula".to_string(),
                    });
                };
                let concluded = substitution.apply_to(&conclusion);
                let mut all_premises = Vec::with_capacity(premises.len() + 1);
                all_premises.push(trigger.clone());
                all_premises.extend(premises);
                Ok(Proof::new(self.rule.clone(), concluded, substitution, all_premises))
            }
        }
    }
}

/// The async, sink-based handler shape every other shape is normalized to.
pub type Handler =
    Arc<dyn Fn(HandlerInput, ProofSink) -> BoxFuture<'static, EngineResult<()>> + Send + Sync>;

const RAW_FORMULA_ARG: &str = "formula";
const DEFAULT_SUBSTITUTION_ARG: &str = "substitution";

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Tri-state configuration of the substitution argument.
#[derive(Debug, Clone, Default)]
enum SubstitutionParam {
    /// Mode-dependent: `Raw` handlers get it as `substitution`, map
    /// handlers do not get it at all.
    #[default]
    ModeDefault,
    Named(String),
    Omitted,
}

/// A prover or listener: a listened formula bound to a handler.
pub struct Component {
    name: String,
    listened_formula: Term,
    handler: Handler,
    argument_mode: HandlerArgumentMode,
    parameters: Vec<String>,
    variables_by_name: FxHashMap<String, Symbol>,
    pass_substitution_as: Option<String>,
    pass_knowledge_base_as: Option<String>,
    pure: bool,
    safety: HandlerSafety,
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name)
            .field("listened_formula", &self.listened_formula.to_string())
            .field("argument_mode", &self.argument_mode)
            .field("parameters", &self.parameters)
            .field("pure", &self.pure)
            .field("safety", &self.safety)
            .finish()
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.listened_formula)
    }
}

impl Component {
    pub fn builder() -> ComponentBuilder {
        ComponentBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn listened_formula(&self) -> &Term {
        &self.listened_formula
    }

    pub fn argument_mode(&self) -> HandlerArgumentMode {
        self.argument_mode
    }

    pub fn is_pure(&self) -> bool {
        self.pure
    }

    pub fn safety(&self) -> HandlerSafety {
        self.safety
    }

    /// Dispatches the component against a query.
    ///
    /// Returns `Ok(None)` when the component silently does not apply: the
    /// query does not unify with the listened formula, or an argument-mode
    /// skipping rule fired. Unsafe components refuse hypothetical scopes
    /// loudly instead.
    pub(crate) fn invoke(
        self: &Arc<Self>,
        query: &Term,
        previous: &Substitution,
        kb: &KnowledgeBase,
        context: InvocationContext,
        hypothetical: bool,
    ) -> EngineResult<Option<EmitterStream<Proof, EngineError>>> {
        if hypothetical && self.safety == HandlerSafety::TotallyUnsafe {
            return Err(EngineError::UnsafeOperation {
                component: self.name.clone(),
            });
        }

        // Fresh variables per invocation: stored formulas, queries and
        // other invocations can never collide through the listened formula.
        let (normalized, mapping) =
            normalize_variables(&self.listened_formula, NormalizationMode::Fresh(kb.language()))?;

        let Some(unifier) = Substitution::unify(query, &normalized, Some(previous)) else {
            return Ok(None);
        };

        let Some(mut args) = self.extract_args(&unifier, &mapping, query)? else {
            return Ok(None);
        };

        if let Some(name) = &self.pass_substitution_as {
            args.insert(name.clone(), ArgumentValue::Substitution(unifier.clone()));
        }
        if let Some(name) = &self.pass_knowledge_base_as {
            args.insert(name.clone(), ArgumentValue::KnowledgeBase(kb.clone()));
        }

        let rule = match &context {
            InvocationContext::Prove { .. } => InferenceRule::Prover(self.clone()),
            InvocationContext::Ponder { trigger } => InferenceRule::Pondering {
                listener: self.clone(),
                trigger: trigger.conclusion().clone(),
            },
        };

        let handler = self.handler.clone();
        let input = HandlerInput { args };
        let stream = spawn_emitter(kb.scheduler(), kb.buffer_size(), move |sink| {
            let sink = ProofSink {
                sink,
                rule,
                context,
                unifier,
            };
            async move {
                match handler(input, sink).await {
                    // A consumer walking away is normal cancellation, not a
                    // source failure.
                    Err(EngineError::Canceled) | Ok(()) => Ok(()),
                    Err(error) => Err(error),
                }
            }
        });
        Ok(Some(stream))
    }

    fn extract_args(
        &self,
        unifier: &Substitution,
        mapping: &FxHashMap<Symbol, Symbol>,
        query: &Term,
    ) -> EngineResult<Option<FxHashMap<String, ArgumentValue>>> {
        let mut args = FxHashMap::default();

        if self.argument_mode == HandlerArgumentMode::Raw {
            args.insert(RAW_FORMULA_ARG.to_string(), ArgumentValue::Term(query.clone()));
            return Ok(Some(args));
        }

        let reserved = [&self.pass_substitution_as, &self.pass_knowledge_base_as];
        for parameter in &self.parameters {
            if reserved.iter().any(|r| r.as_deref() == Some(parameter.as_str())) {
                continue;
            }
            let listened_variable =
                self.variables_by_name
                    .get(parameter)
                    .ok_or_else(|| EngineError::HandlerContract {
                        detail: format!(
                            "parameter '{}' has no matching variable in {}",
                            parameter, self.listened_formula
                        ),
                    })?;
            let fresh = mapping
                .get(listened_variable)
                .ok_or_else(|| EngineError::HandlerContract {
                    detail: format!("variable '{}' vanished during renaming", parameter),
                })?;
            let bound = unifier.get_bound_object_for(fresh)?;
            args.insert(parameter.clone(), ArgumentValue::Term(bound));
        }

        let any_variable = args
            .values()
            .any(|value| matches!(value, ArgumentValue::Term(term) if term.is_variable()));
        let unwrap = |args: FxHashMap<String, ArgumentValue>| {
            args.into_iter()
                .map(|(name, value)| match value {
                    ArgumentValue::Term(Term::Value(host)) => (name, ArgumentValue::Host(host)),
                    other => (name, other),
                })
                .collect::<FxHashMap<_, _>>()
        };

        let args = match self.argument_mode {
            HandlerArgumentMode::Raw => unreachable!("handled above"),
            HandlerArgumentMode::Map => args,
            HandlerArgumentMode::MapNoVariables => {
                if any_variable {
                    return Ok(None);
                }
                args
            }
            HandlerArgumentMode::MapUnwrapped => unwrap(args),
            HandlerArgumentMode::MapUnwrappedRequired => {
                let all_wrapped = args
                    .values()
                    .all(|value| matches!(value, ArgumentValue::Term(Term::Value(_))));
                if !all_wrapped {
                    return Ok(None);
                }
                unwrap(args)
            }
            HandlerArgumentMode::MapUnwrappedNoVariables => {
                if any_variable {
                    return Ok(None);
                }
                unwrap(args)
            }
        };

        Ok(Some(args))
    }
}

/// Validating builder for [`Component`].
#[derive(Default)]
pub struct ComponentBuilder {
    name: Option<String>,
    listened_formula: Option<Term>,
    handler: Option<Handler>,
    argument_mode: Option<HandlerArgumentMode>,
    parameters: Vec<String>,
    pass_substitution_as: SubstitutionParam,
    pass_knowledge_base_as: Option<String>,
    pure: bool,
    safety: Option<HandlerSafety>,
}

impl ComponentBuilder {
    /// A diagnostic name for the component.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn listened_formula(mut self, formula: Term) -> Self {
        self.listened_formula = Some(formula);
        self
    }

    pub fn argument_mode(mut self, mode: HandlerArgumentMode) -> Self {
        self.argument_mode = Some(mode);
        self
    }

    /// The handler parameters bound from the listened formula's named
    /// variables (map modes only).
    pub fn parameters<I, S>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters = parameters.into_iter().map(Into::into).collect();
        self
    }

    pub fn pass_substitution_as(mut self, name: impl Into<String>) -> Self {
        self.pass_substitution_as = SubstitutionParam::Named(name.into());
        self
    }

    pub fn no_substitution(mut self) -> Self {
        self.pass_substitution_as = SubstitutionParam::Omitted;
        self
    }

    pub fn pass_knowledge_base_as(mut self, name: impl Into<String>) -> Self {
        self.pass_knowledge_base_as = Some(name.into());
        self
    }

    pub fn pure(mut self, pure: bool) -> Self {
        self.pure = pure;
        self
    }

    pub fn safety(mut self, safety: HandlerSafety) -> Self {
        self.safety = Some(safety);
        self
    }

    /// The full sink-based async handler.
    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(HandlerInput, ProofSink) -> BoxFuture<'static, EngineResult<()>>
            + Send
            + Sync
            + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// A plain function producing at most one result.
    pub fn handler_fn<F>(self, handler: F) -> Self
    where
        F: Fn(&HandlerInput) -> EngineResult<Option<HandlerValue>> + Send + Sync + 'static,
    {
        self.handler(move |input, sink| {
            let result = handler(&input);
            Box::pin(async move {
                if let Some(value) = result? {
                    sink.emit(value).await?;
                }
                Ok(())
            })
        })
    }

    /// A producer of several results at once.
    pub fn handler_iter<F, I>(self, handler: F) -> Self
    where
        F: Fn(&HandlerInput) -> EngineResult<I> + Send + Sync + 'static,
        I: IntoIterator<Item = HandlerValue>,
        I::IntoIter: Send + 'static,
    {
        self.handler(move |input, sink| {
            let results = handler(&input).map(IntoIterator::into_iter);
            Box::pin(async move {
                for value in results? {
                    sink.emit(value).await?;
                }
                Ok(())
            })
        })
    }

    fn effective_substitution_param(
        &self,
        mode: HandlerArgumentMode,
    ) -> EngineResult<Option<String>> {
        let resolved = match (&self.pass_substitution_as, mode) {
            (SubstitutionParam::ModeDefault, HandlerArgumentMode::Raw) => {
                Some(DEFAULT_SUBSTITUTION_ARG.to_string())
            }
            (SubstitutionParam::ModeDefault, _) => None,
            (SubstitutionParam::Omitted, HandlerArgumentMode::Raw) => {
                return Err(EngineError::HandlerContract {
                    detail: "a raw handler must receive the substitution".to_string(),
                })
            }
            (SubstitutionParam::Omitted, _) => None,
            (SubstitutionParam::Named(name), _) => Some(name.clone()),
        };
        Ok(resolved)
    }

    pub fn build(self) -> EngineResult<Component> {
        let listened_formula = self.listened_formula.ok_or_else(|| EngineError::HandlerContract {
            detail: "a component needs a listened formula".to_string(),
        })?;
        let handler = self.handler.ok_or_else(|| EngineError::HandlerContract {
            detail: "a component needs a handler".to_string(),
        })?;
        let argument_mode = self.argument_mode.ok_or_else(|| EngineError::HandlerContract {
            detail: "a component needs an argument mode".to_string(),
        })?;
        let safety = self.safety.ok_or_else(|| EngineError::HandlerContract {
            detail: "a component needs a declared safety".to_string(),
        })?;

        let pass_substitution_as = self.effective_substitution_param(argument_mode)?;
        let pass_knowledge_base_as = self.pass_knowledge_base_as;

        for reserved in [&pass_substitution_as, &pass_knowledge_base_as]
            .into_iter()
            .flatten()
        {
            if !is_identifier(reserved) {
                return Err(EngineError::HandlerContract {
                    detail: format!("'{}' is not a valid argument identifier", reserved),
                });
            }
        }
        if pass_substitution_as.is_some() && pass_substitution_as == pass_knowledge_base_as {
            return Err(EngineError::HandlerContract {
                detail: "the substitution and knowledge base arguments cannot share a name"
                    .to_string(),
            });
        }

        let variables_by_name = map_variables_by_name(&listened_formula)?;

        let parameters = if argument_mode == HandlerArgumentMode::Raw {
            let mut expected = vec![RAW_FORMULA_ARG.to_string()];
            expected.extend(pass_substitution_as.clone());
            expected.extend(pass_knowledge_base_as.clone());
            if !self.parameters.is_empty() && self.parameters != expected {
                return Err(EngineError::HandlerContract {
                    detail: format!(
                        "a raw handler takes exactly {:?}, not {:?}",
                        expected, self.parameters
                    ),
                });
            }
            expected
        } else {
            for parameter in &self.parameters {
                if !is_identifier(parameter) {
                    return Err(EngineError::HandlerContract {
                        detail: format!("'{}' is not a valid parameter identifier", parameter),
                    });
                }
                let reserved = Some(parameter.as_str()) == pass_substitution_as.as_deref()
                    || Some(parameter.as_str()) == pass_knowledge_base_as.as_deref();
                if !reserved && !variables_by_name.contains_key(parameter) {
                    return Err(EngineError::HandlerContract {
                        detail: format!(
                            "parameter '{}' is not a named variable of {}",
                            parameter, listened_formula
                        ),
                    });
                }
            }
            self.parameters
        };

        let name = self
            .name
            .unwrap_or_else(|| format!("component[{}]", listened_formula));

        Ok(Component {
            name,
            listened_formula,
            handler,
            argument_mode,
            parameters,
            variables_by_name,
            pass_substitution_as,
            pass_knowledge_base_as,
            pure: self.pure,
            safety,
        })
    }
}
