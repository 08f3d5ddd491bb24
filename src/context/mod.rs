//! The statement context tree: the mutable build-time representation of
//! every statement in the build.
//!
//! Contexts live in one [`Arena`] per build and address each other through
//! stable [`ContextId`]s: parent links, namespace bindings and deferred
//! inference actions all hold ids, never references, so the naturally
//! cyclic context graph (parent/child plus namespace cross-links) carries
//! no aliasing hazards. Ownership flows root → children; a parent link is
//! just an id a child happens to know.
//!
//! Every context keeps two child sequences: the *declared* children exactly
//! as written (immutable order, extended only by source walks) and the
//! *effective* children (mutated by grafting, pruning and deviation). The
//! effective view is only readable once the context has reached
//! `EFFECTIVE_MODEL`; earlier reads are rejected as engine bugs rather than
//! silently tolerated.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::name::QName;
use crate::namespace::{Binding, NamespaceKey, NamespaceKind, NamespaceStore, Scope};
use crate::registry::{Argument, ModelPhase, StatementDefinition, StatementKind};
use crate::source::{ModuleId, SourceRef};
use crate::{err_msg, YantraError};

/// Stable, opaque handle to a statement context within one build's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(u32);

impl ContextId {
    pub fn from_raw(raw: u32) -> Self {
        ContextId(raw)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Provenance tag of one copy step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CopyTag {
    Original,
    AddedByUses,
    AddedByAugmentation,
    AddedByUsesAugmentation,
}

/// Append-only provenance record explaining why an effective child exists.
///
/// Used to decide whether a grafted node may itself be re-grafted, and to
/// attribute provenance in diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyHistory(Vec<CopyTag>);

impl CopyHistory {
    pub fn original() -> Self {
        CopyHistory(vec![CopyTag::Original])
    }

    /// This history with `tag` appended (no-op when `tag` already last).
    pub fn appended(&self, tag: CopyTag) -> Self {
        let mut tags = self.0.clone();
        if tags.last() != Some(&tag) {
            tags.push(tag);
        }
        CopyHistory(tags)
    }

    /// The most recent provenance step.
    pub fn last(&self) -> CopyTag {
        *self.0.last().unwrap_or(&CopyTag::Original)
    }

    pub fn is_original(&self) -> bool {
        self.last() == CopyTag::Original
    }

    pub fn tags(&self) -> &[CopyTag] {
        &self.0
    }
}

/// One statement's build-time state.
#[derive(Debug)]
pub struct StatementContext {
    pub(crate) def: &'static StatementDefinition,
    pub(crate) raw_argument: Option<String>,
    pub(crate) argument: Argument,
    parent: Option<ContextId>,
    root: ContextId,
    /// Declared children keyed by their full-tree child index; iteration
    /// order is therefore source order even when phased walks interleave.
    declared: BTreeMap<usize, ContextId>,
    effective: Vec<ContextId>,
    phase: ModelPhase,
    /// Highest phase whose hooks already ran for this context; late-created
    /// contexts (statements only visible to finer walks, grafted copies)
    /// catch up without re-firing earlier hooks.
    hooked_through: ModelPhase,
    history: CopyHistory,
    sref: SourceRef,
    /// Module identity; roots only, set by the linkage hooks.
    module: Option<ModuleId>,
    local_ns: NamespaceStore,
    tree_ns: NamespaceStore,
    /// Source-local storage; only ever populated on roots.
    source_ns: NamespaceStore,
}

impl StatementContext {
    fn new(
        def: &'static StatementDefinition,
        raw_argument: Option<String>,
        argument: Argument,
        parent: Option<ContextId>,
        root: ContextId,
        history: CopyHistory,
        sref: SourceRef,
    ) -> Self {
        Self {
            def,
            raw_argument,
            argument,
            parent,
            root,
            declared: BTreeMap::new(),
            effective: Vec::new(),
            phase: ModelPhase::Init,
            hooked_through: ModelPhase::Init,
            history,
            sref,
            module: None,
            local_ns: NamespaceStore::new(),
            tree_ns: NamespaceStore::new(),
            source_ns: NamespaceStore::new(),
        }
    }
}

/// Arena of statement contexts plus the build-global namespace storage.
#[derive(Debug, Default)]
pub struct Arena {
    contexts: Vec<StatementContext>,
    global_ns: NamespaceStore,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    fn ctx(&self, id: ContextId) -> &StatementContext {
        &self.contexts[id.index()]
    }

    fn ctx_mut(&mut self, id: ContextId) -> &mut StatementContext {
        &mut self.contexts[id.index()]
    }

    fn push(&mut self, build: impl FnOnce(ContextId) -> StatementContext) -> ContextId {
        let id = ContextId(self.contexts.len() as u32);
        self.contexts.push(build(id));
        id
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Creates a root context for a `module`/`submodule` statement.
    pub fn create_root(
        &mut self,
        def: &'static StatementDefinition,
        raw_argument: Option<&str>,
        sref: SourceRef,
    ) -> Result<ContextId, YantraError> {
        let argument = def.parse_argument(raw_argument, raw_argument.unwrap_or(""), &sref)?;
        Ok(self.push(|id| {
            StatementContext::new(
                def,
                raw_argument.map(str::to_string),
                argument,
                None,
                id,
                CopyHistory::original(),
                sref,
            )
        }))
    }

    /// Creates a declared child at `child_index` under `parent`, parsing
    /// the argument via the definition's shape. Argument-shape failures
    /// abort the build.
    pub fn create_child(
        &mut self,
        parent: ContextId,
        child_index: usize,
        def: &'static StatementDefinition,
        raw_argument: Option<&str>,
        sref: SourceRef,
    ) -> Result<ContextId, YantraError> {
        let root = self.ctx(parent).root;
        let module = self.defining_module_name(root).to_string();
        let argument = def.parse_argument(raw_argument, &module, &sref)?;
        let id = self.push(|_| {
            StatementContext::new(
                def,
                raw_argument.map(str::to_string),
                argument,
                Some(parent),
                root,
                CopyHistory::original(),
                sref,
            )
        });
        self.ctx_mut(parent).declared.insert(child_index, id);
        Ok(id)
    }

    /// Creates a context that belongs to no declared sequence: the grafting
    /// engine builds copies this way, with a pre-computed argument and
    /// inherited copy history, then attaches them as effective children.
    pub fn create_detached(
        &mut self,
        parent: ContextId,
        def: &'static StatementDefinition,
        raw_argument: Option<String>,
        argument: Argument,
        history: CopyHistory,
        sref: SourceRef,
    ) -> ContextId {
        let root = self.ctx(parent).root;
        let phase = self.ctx(parent).phase;
        let id = self.push(|_| {
            StatementContext::new(def, raw_argument, argument, Some(parent), root, history, sref)
        });
        self.ctx_mut(id).phase = phase;
        self.ctx_mut(id).hooked_through = self.ctx(parent).hooked_through;
        id
    }

    // ------------------------------------------------------------------
    // Navigation and attributes
    // ------------------------------------------------------------------

    pub fn parent(&self, id: ContextId) -> Option<ContextId> {
        self.ctx(id).parent
    }

    pub fn root(&self, id: ContextId) -> ContextId {
        self.ctx(id).root
    }

    pub fn kind(&self, id: ContextId) -> StatementKind {
        self.ctx(id).def.kind
    }

    pub fn keyword(&self, id: ContextId) -> &'static str {
        self.ctx(id).def.keyword
    }

    pub fn definition(&self, id: ContextId) -> &'static StatementDefinition {
        self.ctx(id).def
    }

    pub fn argument(&self, id: ContextId) -> &Argument {
        &self.ctx(id).argument
    }

    pub fn raw_argument(&self, id: ContextId) -> Option<&str> {
        self.ctx(id).raw_argument.as_deref()
    }

    pub fn source_ref(&self, id: ContextId) -> &SourceRef {
        &self.ctx(id).sref
    }

    pub fn history(&self, id: ContextId) -> &CopyHistory {
        &self.ctx(id).history
    }

    pub fn phase(&self, id: ContextId) -> ModelPhase {
        self.ctx(id).phase
    }

    pub(crate) fn hooked_through(&self, id: ContextId) -> ModelPhase {
        self.ctx(id).hooked_through
    }

    pub(crate) fn set_hooked_through(&mut self, id: ContextId, phase: ModelPhase) {
        let slot = &mut self.ctx_mut(id).hooked_through;
        if phase > *slot {
            *slot = phase;
        }
    }

    /// The statement's qualified name, when its argument carries one.
    pub fn qname(&self, id: ContextId) -> Option<&QName> {
        match &self.ctx(id).argument {
            Argument::QName(q) => Some(q),
            _ => None,
        }
    }

    /// Module identity of a root; `None` until the linkage hooks ran.
    pub fn module_id(&self, root: ContextId) -> Option<&ModuleId> {
        self.ctx(root).module.as_ref()
    }

    pub fn set_module_id(&mut self, root: ContextId, module: ModuleId) {
        self.ctx_mut(root).module = Some(module);
    }

    /// The module name that qualifies identifiers defined under `root`.
    /// Falls back to the root statement's own argument until linkage has
    /// resolved the identity (submodules pick up their parent module here).
    pub fn defining_module_name(&self, root: ContextId) -> &str {
        let root_ctx = self.ctx(root);
        if let Some(module) = &root_ctx.module {
            return &module.name;
        }
        match &root_ctx.argument {
            Argument::Identifier(name) => name,
            _ => "",
        }
    }

    // ------------------------------------------------------------------
    // Child sequences
    // ------------------------------------------------------------------

    /// Declared children in source order. Grafting never touches this.
    pub fn declared_children(&self, id: ContextId) -> Vec<ContextId> {
        self.ctx(id).declared.values().copied().collect()
    }

    /// Looks up the declared child at a specific full-tree index.
    pub fn declared_child_at(&self, id: ContextId, child_index: usize) -> Option<ContextId> {
        self.ctx(id).declared.get(&child_index).copied()
    }

    /// The finished effective view. Reading before the context has reached
    /// `EFFECTIVE_MODEL` is an engine bug and is rejected.
    pub fn effective_children(&self, id: ContextId) -> Result<&[ContextId], YantraError> {
        let ctx = self.ctx(id);
        if ctx.phase < ModelPhase::EffectiveModel {
            return Err(err_msg!(
                SchedulerInvariant,
                "effective view of '{}' read at phase {} (requires EFFECTIVE_MODEL)",
                ctx.def.keyword,
                ctx.phase
            ));
        }
        Ok(&ctx.effective)
    }

    /// The in-progress effective sequence; engine-internal, unguarded.
    pub(crate) fn effective_in_progress(&self, id: ContextId) -> &[ContextId] {
        &self.ctx(id).effective
    }

    pub fn add_effective_child(&mut self, parent: ContextId, child: ContextId) {
        self.ctx_mut(parent).effective.push(child);
    }

    /// Removes `child` from `parent`'s effective sequence. Only legal
    /// during `EFFECTIVE_MODEL` (feature pruning, deviate not-supported);
    /// the declared sequence is never touched.
    pub fn drop_effective_child(
        &mut self,
        parent: ContextId,
        child: ContextId,
    ) -> Result<(), YantraError> {
        if self.ctx(parent).phase < ModelPhase::EffectiveModel {
            return Err(err_msg!(
                SchedulerInvariant,
                "effective child removed outside EFFECTIVE_MODEL phase"
            ));
        }
        self.ctx_mut(parent).effective.retain(|&c| c != child);
        Ok(())
    }

    /// Removes effective children matching `pred`, returning how many were
    /// dropped. Engine-internal: the grafting engine edits copies it just
    /// built, which the phase-guarded removal above would reject.
    pub(crate) fn remove_effective_where(
        &mut self,
        parent: ContextId,
        pred: impl Fn(&Arena, ContextId) -> bool,
    ) -> usize {
        let doomed: Vec<ContextId> = self
            .ctx(parent)
            .effective
            .iter()
            .copied()
            .filter(|&c| pred(self, c))
            .collect();
        self.ctx_mut(parent)
            .effective
            .retain(|c| !doomed.contains(c));
        doomed.len()
    }

    // ------------------------------------------------------------------
    // Phase bookkeeping
    // ------------------------------------------------------------------

    /// Advances `id` and its whole subtree (declared and effective) to
    /// `phase`. Phase counters are monotonic; re-entering an earlier phase
    /// is an engine bug.
    pub fn advance_subtree(&mut self, id: ContextId, phase: ModelPhase) -> Result<(), YantraError> {
        let current = self.ctx(id).phase;
        if phase < current {
            return Err(err_msg!(
                SchedulerInvariant,
                "phase regression on '{}': {} after {}",
                self.ctx(id).def.keyword,
                phase,
                current
            ));
        }
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let ctx = self.ctx_mut(next);
            ctx.phase = phase;
            stack.extend(ctx.declared.values().copied());
            stack.extend(ctx.effective.iter().copied());
        }
        Ok(())
    }

    /// All context ids of a subtree in declared pre-order; the deterministic
    /// walk order hooks run in.
    pub fn declared_pre_order(&self, id: ContextId) -> Vec<ContextId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            let children = self.declared_children(next);
            stack.extend(children.into_iter().rev());
        }
        out
    }

    /// Like [`Arena::declared_pre_order`] but over the effective view,
    /// which by the final phase also covers grafted copies.
    pub(crate) fn effective_pre_order(&self, id: ContextId) -> Vec<ContextId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.ctx(next).effective.iter().rev().copied());
        }
        out
    }

    // ------------------------------------------------------------------
    // Scoped namespace access
    // ------------------------------------------------------------------

    fn store(&self, id: ContextId, scope: Scope) -> &NamespaceStore {
        match scope {
            Scope::StatementLocal => &self.ctx(id).local_ns,
            Scope::TreeScoped => &self.ctx(id).tree_ns,
            Scope::SourceLocal => &self.ctx(self.ctx(id).root).source_ns,
            Scope::Global => &self.global_ns,
        }
    }

    fn store_mut(&mut self, id: ContextId, scope: Scope) -> &mut NamespaceStore {
        match scope {
            Scope::StatementLocal => &mut self.ctx_mut(id).local_ns,
            Scope::TreeScoped => &mut self.ctx_mut(id).tree_ns,
            Scope::SourceLocal => {
                let root = self.ctx(id).root;
                &mut self.ctx_mut(root).source_ns
            }
            Scope::Global => &mut self.global_ns,
        }
    }

    /// Binds `(kind, key)` at `scope` relative to `id`, returning the
    /// previous binding on a duplicate (and leaving it in place).
    pub fn ns_put_if_absent(
        &mut self,
        id: ContextId,
        scope: Scope,
        kind: NamespaceKind,
        key: NamespaceKey,
        value: ContextId,
        sref: SourceRef,
    ) -> Option<Binding> {
        self.store_mut(id, scope)
            .put_if_absent(kind, key, value, sref)
            .cloned()
    }

    /// Binds and converts a duplicate into a Structural collision error
    /// naming both locations.
    pub fn ns_bind_unique(
        &mut self,
        id: ContextId,
        scope: Scope,
        kind: NamespaceKind,
        key: NamespaceKey,
        value: ContextId,
        sref: SourceRef,
    ) -> Result<(), YantraError> {
        let display = key.to_string();
        if let Some(prev) = self.ns_put_if_absent(id, scope, kind, key, value, sref.clone()) {
            return Err(crate::err_related!(
                Structural,
                format!("duplicate name '{display}'"),
                sref,
                prev.sref,
                "previously bound here"
            ));
        }
        Ok(())
    }

    /// Scoped lookup. `TreeScoped` walks ancestors from `id` toward the
    /// root; the other scopes resolve to a single store. There is no
    /// implicit key inheritance between scopes.
    pub fn ns_get(
        &self,
        id: ContextId,
        scope: Scope,
        kind: NamespaceKind,
        key: &NamespaceKey,
    ) -> Option<Binding> {
        match scope {
            Scope::TreeScoped => {
                let mut cursor = Some(id);
                while let Some(at) = cursor {
                    if let Some(found) = self.ctx(at).tree_ns.get(kind, key) {
                        return Some(found.clone());
                    }
                    cursor = self.ctx(at).parent;
                }
                None
            }
            other => self.store(id, other).get(kind, key).cloned(),
        }
    }

    /// Deterministic snapshot of one scope's bindings of `kind`. For
    /// `TreeScoped` this merges the ancestor chain, nearest binding wins.
    pub fn ns_get_all(
        &self,
        id: ContextId,
        scope: Scope,
        kind: NamespaceKind,
    ) -> BTreeMap<NamespaceKey, Binding> {
        match scope {
            Scope::TreeScoped => {
                let mut out = BTreeMap::new();
                let mut chain = Vec::new();
                let mut cursor = Some(id);
                while let Some(at) = cursor {
                    chain.push(at);
                    cursor = self.ctx(at).parent;
                }
                // Outermost first, so nearer bindings overwrite.
                for at in chain.into_iter().rev() {
                    for (key, binding) in self.ctx(at).tree_ns.get_all(kind) {
                        out.insert(key.clone(), binding.clone());
                    }
                }
                out
            }
            other => self
                .store(id, other)
                .get_all(kind)
                .into_iter()
                .map(|(k, b)| (k.clone(), b.clone()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}
