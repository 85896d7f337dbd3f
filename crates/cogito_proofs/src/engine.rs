//! The knowledge base: storage, registered components and the
//! backward-chaining proof search.
//!
//! A [`KnowledgeBase`] owns a term storage, an abstruse index of provers,
//! an abstruse index of listeners and one cooperative scheduler. `prove`
//! multiplexes the knowledge retriever with every prover listening on the
//! goal; `ponder` pushes proven conclusions through the listener index and
//! loops listener output back into the same stream.
//!
//! Call-site discipline is enforced, not documented away: `prove` and
//! `ponder` refuse to run on the scheduler thread, `async_prove` refuses to
//! run anywhere else.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::stream::BoxStream;
use futures::StreamExt;
use log::{debug, info};

use cogito_logic::{
    normalize_variables, Language, NormalizationMode, Substitution, Term,
};
use cogito_runtime::{
    multiplex, process_with_loopback, schedule_generator, BlockingStream, Loopback, Multiplexed,
    Processor, Scheduler, DEFAULT_BUFFER_SIZE,
};
use cogito_storage::{make_key, AbstruseIndex, MemoryNodeStore, TermStorage};

use crate::components::{Component, InvocationContext};
use crate::error::{EngineError, EngineResult};
use crate::proof::{InferenceRule, Proof};

/// Which proofs fire listeners during [`KnowledgeBase::ponder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PonderMode {
    /// Only formulas already in the knowledge base fire.
    Known,
    /// Any derivable proof fires.
    Prove,
    /// Reserved for hypothesis scopes; fails explicitly.
    Hypothetically,
}

/// Options for `prove` / `async_prove`.
#[derive(Debug, Clone, Default)]
pub struct ProveOptions {
    /// Restrict the search to the knowledge retriever.
    pub retrieve_only: bool,
    /// Substitution the returned proofs must extend.
    pub previous: Substitution,
}

/// Components keyed by the abstruse key of their listened formula.
struct ComponentRegistry {
    index: AbstruseIndex<MemoryNodeStore<Term, usize>>,
    components: Vec<Arc<Component>>,
}

impl ComponentRegistry {
    fn new() -> Self {
        Self {
            index: AbstruseIndex::new(MemoryNodeStore::new()),
            components: Vec::new(),
        }
    }

    fn add(&mut self, component: Component) -> EngineResult<()> {
        let slot = self.components.len();
        self.index
            .add(&make_key(component.listened_formula()), slot)?;
        self.components.push(Arc::new(component));
        Ok(())
    }

    /// Components whose listened formula might unify with the query. The
    /// index over-approximates; dispatch re-checks with the real unifier.
    fn matching(&self, query: &Term) -> EngineResult<Vec<Arc<Component>>> {
        let mut slots = self.index.retrieve(&make_key(query))?;
        slots.sort_unstable();
        slots.dedup();
        Ok(slots
            .into_iter()
            .map(|slot| self.components[slot].clone())
            .collect())
    }
}

struct KnowledgeBaseInner {
    storage: Mutex<Box<dyn TermStorage>>,
    provers: Mutex<ComponentRegistry>,
    listeners: Mutex<ComponentRegistry>,
    language: Language,
    scheduler: Scheduler,
    buffer_size: usize,
}

/// A first-order-logic knowledge base with a backward-chaining proof
/// engine. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct KnowledgeBase {
    inner: Arc<KnowledgeBaseInner>,
}

impl std::fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("language", &self.inner.language)
            .field("buffer_size", &self.inner.buffer_size)
            .finish_non_exhaustive()
    }
}

/// The lazy stream of proofs used inside handlers.
pub type ProofStream = Multiplexed<Proof, EngineError>;

/// The blocking proof iterator returned to ordinary callers. Dropping it
/// cancels the whole search promptly.
pub struct ProofIterator {
    inner: BlockingStream<Proof, EngineError>,
}

impl Iterator for ProofIterator {
    type Item = EngineResult<Proof>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl KnowledgeBase {
    /// Creates an engine over the given storage with the default stream
    /// buffer size.
    pub fn new(storage: impl TermStorage + 'static) -> EngineResult<Self> {
        Self::with_buffer_size(storage, DEFAULT_BUFFER_SIZE)
    }

    /// Creates an engine with an explicit bound for every internal proof
    /// buffer.
    pub fn with_buffer_size(
        storage: impl TermStorage + 'static,
        buffer_size: usize,
    ) -> EngineResult<Self> {
        Ok(Self {
            inner: Arc::new(KnowledgeBaseInner {
                storage: Mutex::new(Box::new(storage)),
                provers: Mutex::new(ComponentRegistry::new()),
                listeners: Mutex::new(ComponentRegistry::new()),
                language: Language::new(),
                scheduler: Scheduler::new()?,
                buffer_size,
            }),
        })
    }

    /// The language the engine normalizes stored formulas into.
    pub fn language(&self) -> &Language {
        &self.inner.language
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    fn storage(&self) -> MutexGuard<'_, Box<dyn TermStorage>> {
        self.inner.storage.lock().expect("storage mutex poisoned")
    }

    /// Normalizes each formula into fresh variables and stores it.
    pub fn add_formulas<I: IntoIterator<Item = Term>>(&self, formulas: I) -> EngineResult<()> {
        let mut normalized = Vec::new();
        for formula in formulas {
            let (renamed, _) =
                normalize_variables(&formula, NormalizationMode::Fresh(&self.inner.language))?;
            normalized.push(renamed);
        }
        info!("adding {} formula(s) to the knowledge base", normalized.len());
        self.storage().add(&normalized)?;
        Ok(())
    }

    /// Number of stored formulas.
    pub fn len(&self) -> EngineResult<usize> {
        Ok(self.storage().len()?)
    }

    pub fn is_empty(&self) -> EngineResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Registers a prover under its listened formula.
    pub fn add_prover(&self, prover: Component) -> EngineResult<()> {
        self.inner
            .provers
            .lock()
            .expect("prover registry poisoned")
            .add(prover)
    }

    /// Registers a listener under its listened formula.
    pub fn add_listener(&self, listener: Component) -> EngineResult<()> {
        self.inner
            .listeners
            .lock()
            .expect("listener registry poisoned")
            .add(listener)
    }

    // --- proving -----------------------------------------------------------

    /// Proves a goal, returning a lazy blocking iterator of proofs.
    ///
    /// Must be called from outside the scheduler; handlers use
    /// [`KnowledgeBase::async_prove`] instead.
    pub fn prove(&self, goal: &Term) -> EngineResult<ProofIterator> {
        self.prove_with(goal, ProveOptions::default())
    }

    pub fn prove_with(&self, goal: &Term, options: ProveOptions) -> EngineResult<ProofIterator> {
        if self.inner.scheduler.on_scheduler_thread() {
            return Err(EngineError::ConcurrencyMisuse {
                detail: "prove called from inside the scheduler; use async_prove in handlers"
                    .to_string(),
            });
        }
        let stream = self.proof_stream(goal, options, false)?;
        Ok(ProofIterator {
            inner: schedule_generator(stream, self.inner.buffer_size, &self.inner.scheduler),
        })
    }

    /// The in-scheduler variant of [`KnowledgeBase::prove`], for handlers.
    pub fn async_prove(&self, goal: &Term) -> EngineResult<ProofStream> {
        self.async_prove_with(goal, ProveOptions::default())
    }

    pub fn async_prove_with(
        &self,
        goal: &Term,
        options: ProveOptions,
    ) -> EngineResult<ProofStream> {
        if !self.inner.scheduler.on_scheduler_thread() {
            return Err(EngineError::ConcurrencyMisuse {
                detail: "async_prove called from outside the scheduler; use prove".to_string(),
            });
        }
        self.proof_stream(goal, options, false)
    }

    /// Assembles the multiplexed stream of proof sources for a goal: the
    /// knowledge retriever, plus every matching prover unless restricted.
    fn proof_stream(
        &self,
        goal: &Term,
        options: ProveOptions,
        hypothetical: bool,
    ) -> EngineResult<ProofStream> {
        debug!("proving {} (retrieve_only: {})", goal, options.retrieve_only);

        let mut sources: Vec<BoxStream<'static, EngineResult<Proof>>> = Vec::new();
        sources.push(self.knowledge_retriever(goal, &options.previous));

        if !options.retrieve_only {
            let provers = self
                .inner
                .provers
                .lock()
                .expect("prover registry poisoned")
                .matching(goal)?;
            for prover in provers {
                let context = InvocationContext::Prove { goal: goal.clone() };
                match prover.invoke(goal, &options.previous, self, context, hypothetical) {
                    Ok(Some(stream)) => sources.push(stream.boxed()),
                    Ok(None) => {}
                    // Fatal to this source alone: surfaced through the
                    // stream so the consumer sees it exactly once.
                    Err(error) => sources.push(futures::stream::iter([Err(error)]).boxed()),
                }
            }
        }

        Ok(multiplex(sources, self.inner.buffer_size, &self.inner.scheduler))
    }

    /// The always-present proof source: a goal is proven iff it unifies
    /// with a stored formula.
    fn knowledge_retriever(
        &self,
        goal: &Term,
        previous: &Substitution,
    ) -> BoxStream<'static, EngineResult<Proof>> {
        let kb = self.clone();
        let goal = goal.clone();
        let previous = previous.clone();
        cogito_runtime::spawn_emitter(
            &self.inner.scheduler,
            self.inner.buffer_size,
            move |sink| async move {
                // Collect under the lock, emit outside it: emission
                // suspends on the bounded buffer.
                let candidates = kb.storage().search_unifiable(&goal, &previous)?;
                for (_, unifier) in candidates {
                    let conclusion = unifier.apply_to(&goal);
                    let proof = Proof::new(
                        InferenceRule::KnowledgeRetrieval,
                        conclusion,
                        unifier,
                        vec![],
                    );
                    if sink.emit(proof).await.is_err() {
                        return Ok(());
                    }
                }
                Ok(())
            },
        )
        .boxed()
    }

    // --- pondering ---------------------------------------------------------

    /// Fires listeners on the proofs of the given goals and feeds each
    /// listener result back into the same stream.
    ///
    /// Only listener-produced proofs are yielded; the triggering proofs
    /// are consumed silently.
    pub fn ponder<I>(&self, goals: I, mode: PonderMode) -> EngineResult<PonderIterator>
    where
        I: IntoIterator<Item = Term>,
    {
        if self.inner.scheduler.on_scheduler_thread() {
            return Err(EngineError::ConcurrencyMisuse {
                detail: "ponder called from inside the scheduler".to_string(),
            });
        }
        let stream = self.ponder_stream(goals, mode)?;
        Ok(PonderIterator {
            inner: schedule_generator(stream, self.inner.buffer_size, &self.inner.scheduler),
        })
    }

    fn ponder_stream<I>(
        &self,
        goals: I,
        mode: PonderMode,
    ) -> EngineResult<Loopback<Proof, EngineError>>
    where
        I: IntoIterator<Item = Term>,
    {
        let retrieve_only = match mode {
            PonderMode::Known => true,
            PonderMode::Prove => false,
            PonderMode::Hypothetically => {
                return Err(EngineError::Unsupported {
                    detail: "pondering hypothetically is not implemented".to_string(),
                })
            }
        };

        let mut trigger_sources: Vec<BoxStream<'static, EngineResult<Proof>>> = Vec::new();
        for goal in goals {
            let options = ProveOptions {
                retrieve_only,
                previous: Substitution::empty(),
            };
            trigger_sources.push(self.proof_stream(&goal, options, false)?.boxed());
        }
        let input = multiplex(trigger_sources, self.inner.buffer_size, &self.inner.scheduler);

        let kb = self.clone();
        let processor: Processor<Proof, EngineError> = Arc::new(move |proof, sink| {
            let kb = kb.clone();
            Box::pin(async move { kb.fire_listeners(proof, sink).await })
        });

        Ok(process_with_loopback(
            input.boxed(),
            processor,
            self.inner.buffer_size,
            &self.inner.scheduler,
        ))
    }

    /// Dispatches every listener matching a proof's conclusion and forwards
    /// listener results into the loopback queue.
    async fn fire_listeners(
        &self,
        trigger: Proof,
        sink: cogito_runtime::LoopbackSink<Proof, EngineError>,
    ) -> EngineResult<()> {
        let listeners = self
            .inner
            .listeners
            .lock()
            .expect("listener registry poisoned")
            .matching(trigger.conclusion())?;
        debug!(
            "{} listener(s) match proven formula {}",
            listeners.len(),
            trigger.conclusion()
        );

        for listener in listeners {
            let context = InvocationContext::Ponder {
                trigger: trigger.clone(),
            };
            let invoked = listener.invoke(
                trigger.conclusion(),
                &Substitution::empty(),
                self,
                context,
                false,
            )?;
            let Some(mut stream) = invoked else {
                continue;
            };
            while let Some(item) = stream.next().await {
                if sink.emit(item?).await.is_err() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

/// Blocking iterator over the proofs produced by pondering.
pub struct PonderIterator {
    inner: BlockingStream<Proof, EngineError>,
}

impl Iterator for PonderIterator {
    type Item = EngineResult<Proof>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}
