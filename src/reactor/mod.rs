//! The phase reactor: drives every registered source through the fixed
//! phase sequence `INIT → SOURCE_LINKAGE → STATEMENT_DEFINITION →
//! FULL_DECLARATION → EFFECTIVE_MODEL`.
//!
//! Per phase, every source is re-walked (at the write level that phase
//! unlocks), newly visible statements extend the context tree, the hooks
//! for that phase run, and the inference-action queue is driven to a
//! fixpoint. Only when every source has been walked *and* every due action
//! has resolved may the next phase start; phases are never re-entered.
//! A failure anywhere aborts the whole build: partial trees are discarded,
//! there is no partial-success output.
//!
//! The build is single-threaded and synchronous; the phase barrier is what
//! makes cross-source reads safe, not locks. The only scratch state is the
//! explicit per-build [`ScratchCache`], cleared when the build finishes.

mod hooks;

use std::collections::{BTreeSet, HashMap};

use crate::context::{Arena, ContextId};
use crate::effective::{freeze, ResolvedModels};
use crate::name::QName;
use crate::namespace::{NamespaceKey, NamespaceKind, Scope};
use crate::registry::{default_registry, ModelPhase, StatementRegistry};
use crate::scheduler::ActionQueue;
use crate::source::{SourceRef, StatementSource, StatementWriter};
use crate::{err_at, err_msg, YantraError};

/// Per-build scratch memo, passed by reference through the call chain.
///
/// Replaces ambient thread-local caches: its lifetime is one build
/// invocation and [`ScratchCache::clear`] runs before the build returns, so
/// nothing leaks across reused worker threads.
#[derive(Debug, Default)]
pub struct ScratchCache {
    /// `(root, prefix)` → resolved module root.
    prefixes: HashMap<(ContextId, String), ContextId>,
}

impl ScratchCache {
    pub fn clear(&mut self) {
        self.prefixes.clear();
    }
}

/// Reusable entry point: holds the statement definition catalogue and
/// manufactures [`ModelBuild`]s.
#[derive(Debug, Clone, Copy)]
pub struct StatementReactor {
    registry: &'static StatementRegistry,
}

impl Default for StatementReactor {
    fn default() -> Self {
        Self {
            registry: default_registry(),
        }
    }
}

impl StatementReactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reactor over a caller-supplied definition catalogue. The registry
    /// must be fully populated before any build starts; the engine only
    /// reads it.
    pub fn with_registry(registry: &'static StatementRegistry) -> Self {
        Self { registry }
    }

    pub fn new_build(&self) -> ModelBuild {
        ModelBuild {
            registry: self.registry,
            arena: Arena::new(),
            queue: ActionQueue::new(),
            scratch: ScratchCache::default(),
            sources: Vec::new(),
            roots: Vec::new(),
            supported_features: None,
        }
    }
}

/// One batch compilation: a fixed set of sources processed to completion.
pub struct ModelBuild {
    pub(crate) registry: &'static StatementRegistry,
    pub(crate) arena: Arena,
    pub(crate) queue: ActionQueue,
    pub(crate) scratch: ScratchCache,
    sources: Vec<Box<dyn StatementSource>>,
    pub(crate) roots: Vec<Option<ContextId>>,
    supported_features: Option<BTreeSet<QName>>,
}

impl ModelBuild {
    /// Registers a source. Registration order fixes walk order, action
    /// order and therefore diagnostic order.
    pub fn add_source(&mut self, source: impl StatementSource + 'static) {
        self.sources.push(Box::new(source));
        self.roots.push(None);
    }

    /// Restricts the build to a set of supported features; `if-feature`
    /// guarded nodes outside the set are pruned from effective views.
    /// Without this call every feature is supported.
    pub fn with_supported_features(&mut self, features: impl IntoIterator<Item = QName>) {
        self.supported_features = Some(features.into_iter().collect());
    }

    pub(crate) fn feature_supported(&self, feature: &QName) -> bool {
        match &self.supported_features {
            None => true,
            Some(set) => set.contains(feature),
        }
    }

    /// Read access to the context arena (diagnostic and test use).
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Resolves a reference prefix from a statement in `root`'s source:
    /// no prefix means the source itself, otherwise the prefix must be
    /// bound (own `prefix` statement or an `import`). Memoized per build.
    pub(crate) fn resolve_prefix(
        &mut self,
        root: ContextId,
        prefix: Option<&str>,
        sref: &SourceRef,
    ) -> Result<ContextId, YantraError> {
        let Some(prefix) = prefix else {
            return Ok(root);
        };
        if let Some(&hit) = self.scratch.prefixes.get(&(root, prefix.to_string())) {
            return Ok(hit);
        }
        let binding = self
            .arena
            .ns_get(
                root,
                Scope::SourceLocal,
                NamespaceKind::Prefix,
                &NamespaceKey::name(prefix),
            )
            .ok_or_else(|| {
                err_at!(
                    Reference,
                    format!("prefix '{prefix}' is not bound in this source"),
                    sref,
                    "declare it with an import or the module's own prefix statement"
                )
            })?;
        self.scratch
            .prefixes
            .insert((root, prefix.to_string()), binding.value);
        Ok(binding.value)
    }

    /// Runs pending actions to a fixpoint; applied actions may enqueue
    /// further actions, which the next iteration of the scan picks up.
    pub(crate) fn run_fixpoint(&mut self, phase: ModelPhase) -> Result<(), YantraError> {
        while let Some(idx) = self.queue.next_ready(&self.arena, phase) {
            let apply = self.queue.take_apply(idx);
            apply(self)?;
        }
        Ok(())
    }

    /// Sets every context's effective sequence to its declared children,
    /// in declared order. Runs exactly once per root, at the start of
    /// `FULL_DECLARATION`; grafting appends to these sequences afterwards.
    fn populate_effective(&mut self, root: ContextId) {
        for ctx in self.arena.declared_pre_order(root) {
            for child in self.arena.declared_children(ctx) {
                self.arena.add_effective_child(ctx, child);
            }
        }
    }

    fn run_pipeline(&mut self) -> Result<(), YantraError> {
        let sources = std::mem::take(&mut self.sources);
        if sources.is_empty() {
            return Err(err_msg!(Structural, "build has no registered sources"));
        }

        for phase in ModelPhase::EXECUTION_ORDER {
            for (i, source) in sources.iter().enumerate() {
                if phase != ModelPhase::EffectiveModel {
                    let mut writer = TreeWriter {
                        arena: &mut self.arena,
                        registry: self.registry,
                        root_slot: &mut self.roots[i],
                        stack: Vec::new(),
                    };
                    match phase {
                        ModelPhase::SourceLinkage => source.write_linkage(&mut writer)?,
                        ModelPhase::StatementDefinition => {
                            source.write_linkage_and_definitions(&mut writer)?
                        }
                        _ => source.write_full(&mut writer)?,
                    }
                }
                let root = self.roots[i].ok_or_else(|| {
                    err_msg!(
                        Structural,
                        "source '{}' produced no root statement",
                        source.name()
                    )
                })?;
                if phase == ModelPhase::FullDeclaration {
                    self.populate_effective(root);
                }
                self.arena.advance_subtree(root, phase)?;
                hooks::run_phase(self, root, phase)?;
                // Mutation prerequisites hold for the whole phase, so the
                // final phase defers its fixpoint until every root's hooks
                // have run; otherwise an action could edit a tree whose
                // own hooks (implicit rpc bodies) are still pending.
                if phase != ModelPhase::EffectiveModel {
                    self.run_fixpoint(phase)?;
                }
            }
            // Phase barrier: everything due must have resolved.
            self.run_fixpoint(phase)?;
            self.queue.fail_due(&self.arena, phase)?;
        }
        self.queue.assert_drained()?;
        // Feature pruning runs last: grafted copies only exist once every
        // action has fired.
        let roots: Vec<ContextId> = self.roots.iter().copied().flatten().collect();
        for root in roots {
            hooks::prune_unsupported(self, root)?;
        }
        Ok(())
    }

    /// Runs the build to completion and freezes the produced model.
    pub fn build(mut self) -> Result<ResolvedModels, YantraError> {
        self.run_pipeline()?;
        // Every slot is Some once run_pipeline succeeded.
        let roots: Vec<ContextId> = self.roots.iter().copied().flatten().collect();
        let models = freeze(&self.arena, &roots)?;
        self.scratch.clear();
        Ok(models)
    }

    /// Runs the build to completion but keeps the raw context arena.
    ///
    /// Intended for tooling and tests that need build-time details the
    /// frozen model intentionally hides (copy histories, namespace
    /// contents, context identity).
    pub fn build_contexts(mut self) -> Result<(Arena, Vec<ContextId>), YantraError> {
        self.run_pipeline()?;
        let roots = self.roots.iter().copied().flatten().collect();
        self.scratch.clear();
        Ok((self.arena, roots))
    }
}

/// Arena-side statement writer: builds or extends the declared tree as a
/// source replays itself. Statements already created by a coarser walk are
/// recognized by their full-tree child index and simply descended into.
struct TreeWriter<'a> {
    arena: &'a mut Arena,
    registry: &'static StatementRegistry,
    root_slot: &'a mut Option<ContextId>,
    stack: Vec<ContextId>,
}

impl StatementWriter for TreeWriter<'_> {
    fn start_statement(
        &mut self,
        child_index: usize,
        keyword: &str,
        raw_argument: Option<&str>,
        sref: SourceRef,
    ) -> Result<(), YantraError> {
        let def = self.registry.lookup(keyword, &sref)?;
        let id = match self.stack.last().copied() {
            None => match *self.root_slot {
                Some(existing) => existing,
                None => {
                    let root = self.arena.create_root(def, raw_argument, sref)?;
                    *self.root_slot = Some(root);
                    root
                }
            },
            Some(parent) => match self.arena.declared_child_at(parent, child_index) {
                Some(existing) => existing,
                None => self
                    .arena
                    .create_child(parent, child_index, def, raw_argument, sref)?,
            },
        };
        self.stack.push(id);
        Ok(())
    }

    fn end_statement(&mut self) -> Result<(), YantraError> {
        if self.stack.pop().is_none() {
            return Err(err_msg!(
                SchedulerInvariant,
                "statement writer underflow: end without start"
            ));
        }
        Ok(())
    }
}
