//! The frozen output model.
//!
//! [`freeze`] converts a finished build's context arena into immutable,
//! shareable statement trees. Each node carries two views: the *declared*
//! statement exactly as written and the *effective* statement after
//! grafting, refinement and pruning. Effective nodes that grafting
//! manufactured have no declared counterpart of their own; their copy
//! history says where they came from.
//!
//! The frozen trees hold no [`ContextId`]s and no arena reference, so they
//! outlive the build and can cross threads freely.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::context::{Arena, ContextId, CopyHistory};
use crate::name::QName;
use crate::namespace::{NamespaceKey, NamespaceKind, Scope};
use crate::registry::{Argument, StatementKind};
use crate::source::ModuleId;
use crate::{err_msg, YantraError};

/// One statement as written in its source, substatements in source order.
#[derive(Debug, Serialize)]
pub struct DeclaredStatement {
    pub kind: StatementKind,
    pub keyword: &'static str,
    pub argument: Argument,
    pub substatements: Vec<Arc<DeclaredStatement>>,
}

impl DeclaredStatement {
    pub fn argument_text(&self) -> Option<String> {
        self.argument.text()
    }

    /// First substatement of `kind`, if any.
    pub fn find(&self, kind: StatementKind) -> Option<&Arc<DeclaredStatement>> {
        self.substatements.iter().find(|s| s.kind == kind)
    }
}

/// One statement of the resolved model.
#[derive(Debug, Serialize)]
pub struct EffectiveStatement {
    pub kind: StatementKind,
    pub keyword: &'static str,
    pub argument: Argument,
    pub history: CopyHistory,
    pub substatements: Vec<Arc<EffectiveStatement>>,
    /// The statement as written, absent for grafted copies.
    pub declared: Option<Arc<DeclaredStatement>>,
    /// For `identity` statements: every identity derived from this one,
    /// across all sources of the build.
    pub derived_identities: Vec<QName>,
}

impl EffectiveStatement {
    pub fn qname(&self) -> Option<&QName> {
        match &self.argument {
            Argument::QName(q) => Some(q),
            _ => None,
        }
    }

    pub fn argument_text(&self) -> Option<String> {
        self.argument.text()
    }

    /// First substatement of `kind`, if any.
    pub fn find(&self, kind: StatementKind) -> Option<&Arc<EffectiveStatement>> {
        self.substatements.iter().find(|s| s.kind == kind)
    }

    /// All substatements of `kind`, in effective order.
    pub fn all(&self, kind: StatementKind) -> Vec<&Arc<EffectiveStatement>> {
        self.substatements.iter().filter(|s| s.kind == kind).collect()
    }

    /// Child schema node by its unqualified name.
    pub fn schema_child(&self, name: &str) -> Option<&Arc<EffectiveStatement>> {
        self.substatements.iter().find(|s| {
            s.kind.is_schema_node() && s.qname().map(|q| q.name == name).unwrap_or(false)
        })
    }
}

/// One source's frozen tree plus its resolved identity.
#[derive(Debug, Serialize)]
pub struct EffectiveModule {
    name: String,
    id: ModuleId,
    submodule: bool,
    root: Arc<EffectiveStatement>,
}

impl EffectiveModule {
    /// The source's own name (for a submodule, the submodule name, not the
    /// module it belongs to).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved identity: name, namespace URI and latest revision. A
    /// submodule reports its parent module's identity here.
    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    pub fn is_submodule(&self) -> bool {
        self.submodule
    }

    /// The module statement itself.
    pub fn root(&self) -> &Arc<EffectiveStatement> {
        &self.root
    }

    /// Top-level schema nodes of the resolved model, in effective order.
    pub fn schema_nodes(&self) -> Vec<&Arc<EffectiveStatement>> {
        self.root
            .substatements
            .iter()
            .filter(|s| s.kind.is_schema_node())
            .collect()
    }

    pub fn groupings(&self) -> BTreeMap<String, &Arc<EffectiveStatement>> {
        self.named_of_kind(StatementKind::Grouping)
    }

    pub fn grouping(&self, name: &str) -> Option<&Arc<EffectiveStatement>> {
        self.groupings().get(name).copied()
    }

    pub fn typedefs(&self) -> BTreeMap<String, &Arc<EffectiveStatement>> {
        self.named_of_kind(StatementKind::Typedef)
    }

    pub fn typedef(&self, name: &str) -> Option<&Arc<EffectiveStatement>> {
        self.typedefs().get(name).copied()
    }

    pub fn identities(&self) -> BTreeMap<String, &Arc<EffectiveStatement>> {
        self.named_of_kind(StatementKind::Identity)
    }

    pub fn identity(&self, name: &str) -> Option<&Arc<EffectiveStatement>> {
        self.identities().get(name).copied()
    }

    pub fn features(&self) -> BTreeMap<String, &Arc<EffectiveStatement>> {
        self.named_of_kind(StatementKind::Feature)
    }

    pub fn feature(&self, name: &str) -> Option<&Arc<EffectiveStatement>> {
        self.features().get(name).copied()
    }

    fn named_of_kind(&self, kind: StatementKind) -> BTreeMap<String, &Arc<EffectiveStatement>> {
        self.root
            .substatements
            .iter()
            .filter(|s| s.kind == kind)
            .filter_map(|s| s.argument_text().map(|n| (n, s)))
            .collect()
    }
}

/// The complete output of one build, one entry per registered source.
#[derive(Debug, Serialize)]
pub struct ResolvedModels {
    modules: Vec<EffectiveModule>,
}

impl ResolvedModels {
    /// Modules in source-registration order.
    pub fn modules(&self) -> &[EffectiveModule] {
        &self.modules
    }

    /// Lookup by source name.
    pub fn module(&self, name: &str) -> Option<&EffectiveModule> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Freezes the finished arena into [`ResolvedModels`].
pub(crate) fn freeze(arena: &Arena, roots: &[ContextId]) -> Result<ResolvedModels, YantraError> {
    let mut modules = Vec::with_capacity(roots.len());
    for &root in roots {
        let mut declared = BTreeMap::new();
        build_declared(arena, root, &mut declared);
        let tree = build_effective(arena, root, &declared)?;
        let name = match arena.argument(root) {
            Argument::Identifier(n) => n.clone(),
            _ => String::new(),
        };
        let id = arena.module_id(root).cloned().ok_or_else(|| {
            err_msg!(
                SchedulerInvariant,
                "root '{}' finished the build without a resolved identity",
                name
            )
        })?;
        modules.push(EffectiveModule {
            name,
            id,
            submodule: arena.kind(root) == StatementKind::Submodule,
            root: tree,
        });
    }
    Ok(ResolvedModels { modules })
}

fn build_declared(
    arena: &Arena,
    ctx: ContextId,
    map: &mut BTreeMap<ContextId, Arc<DeclaredStatement>>,
) -> Arc<DeclaredStatement> {
    let substatements = arena
        .declared_children(ctx)
        .into_iter()
        .map(|c| build_declared(arena, c, map))
        .collect();
    let stmt = Arc::new(DeclaredStatement {
        kind: arena.kind(ctx),
        keyword: arena.keyword(ctx),
        argument: arena.argument(ctx).clone(),
        substatements,
    });
    map.insert(ctx, Arc::clone(&stmt));
    stmt
}

fn build_effective(
    arena: &Arena,
    ctx: ContextId,
    declared: &BTreeMap<ContextId, Arc<DeclaredStatement>>,
) -> Result<Arc<EffectiveStatement>, YantraError> {
    let mut substatements = Vec::new();
    for &child in arena.effective_children(ctx)? {
        substatements.push(build_effective(arena, child, declared)?);
    }
    let derived_identities = if arena.kind(ctx) == StatementKind::Identity {
        arena
            .ns_get_all(ctx, Scope::StatementLocal, NamespaceKind::DerivedIdentities)
            .into_keys()
            .filter_map(|key| match key {
                NamespaceKey::QName(q) => Some(q),
                _ => None,
            })
            .collect()
    } else {
        Vec::new()
    };
    Ok(Arc::new(EffectiveStatement {
        kind: arena.kind(ctx),
        keyword: arena.keyword(ctx),
        argument: arena.argument(ctx).clone(),
        history: arena.history(ctx).clone(),
        substatements,
        declared: declared.get(&ctx).cloned(),
        derived_identities,
    }))
}
