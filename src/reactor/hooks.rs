//! Per-kind phase hooks.
//!
//! Dispatch is a closed match on [`StatementKind`]: no per-keyword
//! behavior objects, the registry only says *which* phases a kind cares
//! about and this module says *what* happens. Hooks either bind namespace
//! entries immediately or submit inference actions whose prerequisites the
//! scheduler checks; a hook never reaches into another source directly.
//!
//! Each context runs a given phase hook at most once. Statements only
//! visible to a finer walk (a typedef inside a container surfaces in
//! `FULL_DECLARATION`) catch up on the earlier-phase hooks they missed;
//! grafted copies inherit their creation point's hook progress so copied
//! subtrees are not re-bound.

use crate::context::{Arena, ContextId, CopyHistory};
use crate::name::QName;
use crate::namespace::{NamespaceKey, NamespaceKind, Scope};
use crate::registry::{Argument, ModelPhase, StatementKind};
use crate::scheduler::ActionQueue;
use crate::source::{ModuleId, SourceRef};
use crate::{err_at, err_msg, graft, YantraError};

use super::ModelBuild;

/// Runs the hooks `phase` unlocks, over `root`'s subtree in walk order.
pub(super) fn run_phase(
    build: &mut ModelBuild,
    root: ContextId,
    phase: ModelPhase,
) -> Result<(), YantraError> {
    // The final phase walks the effective view so grafted copies are seen;
    // earlier phases only have the declared tree.
    let walk = if phase == ModelPhase::EffectiveModel {
        build.arena.effective_pre_order(root)
    } else {
        build.arena.declared_pre_order(root)
    };
    for ctx in walk {
        let done = build.arena.hooked_through(ctx);
        let pending: Vec<ModelPhase> = build
            .arena
            .definition(ctx)
            .hook_phases
            .iter()
            .copied()
            .filter(|p| *p > done && *p <= phase)
            .collect();
        for hook_phase in pending {
            dispatch(build, ctx, hook_phase)?;
        }
        build.arena.set_hooked_through(ctx, phase);
    }
    Ok(())
}

fn dispatch(build: &mut ModelBuild, ctx: ContextId, phase: ModelPhase) -> Result<(), YantraError> {
    use StatementKind as K;
    match (phase, build.arena.kind(ctx)) {
        (ModelPhase::SourceLinkage, K::Module) => module_linkage(build, ctx),
        (ModelPhase::SourceLinkage, K::Submodule) => submodule_linkage(build, ctx),
        (ModelPhase::SourceLinkage, K::Import) => import_linkage(build, ctx),
        (ModelPhase::SourceLinkage, K::Include) => include_linkage(build, ctx),
        (ModelPhase::StatementDefinition, K::Typedef) => {
            bind_tree_scoped(build, ctx, NamespaceKind::Typedef)
        }
        (ModelPhase::StatementDefinition, K::Grouping) => {
            bind_tree_scoped(build, ctx, NamespaceKind::Grouping)
        }
        (ModelPhase::StatementDefinition, K::Extension) => {
            bind_source_local(build, ctx, NamespaceKind::Extension)
        }
        (ModelPhase::StatementDefinition, K::Feature) => {
            bind_source_local(build, ctx, NamespaceKind::Feature)
        }
        (ModelPhase::StatementDefinition, K::Identity) => {
            bind_source_local(build, ctx, NamespaceKind::Identity)
        }
        (ModelPhase::StatementDefinition, K::Base) => base_definition(build, ctx),
        (ModelPhase::FullDeclaration, K::Uses) => uses_declaration(build, ctx),
        (ModelPhase::FullDeclaration, K::Augment) => augment_declaration(build, ctx),
        (ModelPhase::FullDeclaration, k) if k.is_schema_node() => claim_child_name(build, ctx),
        (ModelPhase::EffectiveModel, K::Rpc) => rpc_effective(build, ctx),
        (ModelPhase::EffectiveModel, K::Deviation) => deviation_effective(build, ctx),
        _ => Ok(()),
    }
}

// ----------------------------------------------------------------------
// Shared lookups
// ----------------------------------------------------------------------

fn child_of_kind(arena: &Arena, parent: ContextId, kind: StatementKind) -> Option<ContextId> {
    arena
        .declared_children(parent)
        .into_iter()
        .find(|&c| arena.kind(c) == kind)
}

fn child_text(arena: &Arena, parent: ContextId, kind: StatementKind) -> Option<String> {
    child_of_kind(arena, parent, kind).and_then(|c| arena.argument(c).text())
}

fn ident_argument(arena: &Arena, ctx: ContextId) -> Result<String, YantraError> {
    match arena.argument(ctx) {
        Argument::Identifier(name) => Ok(name.clone()),
        other => Err(err_msg!(
            SchedulerInvariant,
            "'{}' hook expected an identifier argument, found {:?}",
            arena.keyword(ctx),
            other
        )),
    }
}

fn inside_grouping(arena: &Arena, ctx: ContextId) -> bool {
    let mut cursor = arena.parent(ctx);
    while let Some(at) = cursor {
        if arena.kind(at) == StatementKind::Grouping {
            return true;
        }
        cursor = arena.parent(at);
    }
    false
}

// ----------------------------------------------------------------------
// SOURCE_LINKAGE
// ----------------------------------------------------------------------

fn module_linkage(build: &mut ModelBuild, module: ContextId) -> Result<(), YantraError> {
    let name = ident_argument(&build.arena, module)?;
    let sref = build.arena.source_ref(module).clone();
    let namespace =
        child_text(&build.arena, module, StatementKind::NamespaceDecl).ok_or_else(|| {
            err_at!(
                Structural,
                format!("module '{name}' has no namespace statement"),
                sref
            )
        })?;
    let prefix = child_text(&build.arena, module, StatementKind::Prefix).ok_or_else(|| {
        err_at!(
            Structural,
            format!("module '{name}' has no prefix statement"),
            sref
        )
    })?;
    let revision = build
        .arena
        .declared_children(module)
        .into_iter()
        .filter(|&c| build.arena.kind(c) == StatementKind::Revision)
        .filter_map(|c| build.arena.argument(c).text())
        .max();

    build.arena.set_module_id(
        module,
        ModuleId {
            name: name.clone(),
            namespace: namespace.clone(),
            revision,
        },
    );
    build.arena.ns_bind_unique(
        module,
        Scope::Global,
        NamespaceKind::Module,
        NamespaceKey::name(name.as_str()),
        module,
        sref.clone(),
    )?;
    build.arena.ns_bind_unique(
        module,
        Scope::Global,
        NamespaceKind::ModuleNamespace,
        NamespaceKey::name(namespace.as_str()),
        module,
        sref.clone(),
    )?;
    // A module's own prefix participates in the same namespace imports
    // bind into, so a clashing import is caught as a collision.
    build.arena.ns_bind_unique(
        module,
        Scope::SourceLocal,
        NamespaceKind::Prefix,
        NamespaceKey::name(prefix.as_str()),
        module,
        sref,
    )
}

fn submodule_linkage(build: &mut ModelBuild, sub: ContextId) -> Result<(), YantraError> {
    let name = ident_argument(&build.arena, sub)?;
    let sref = build.arena.source_ref(sub).clone();
    let belongs = child_of_kind(&build.arena, sub, StatementKind::BelongsTo).ok_or_else(|| {
        err_at!(
            Structural,
            format!("submodule '{name}' has no belongs-to statement"),
            sref
        )
    })?;
    let parent_name = ident_argument(&build.arena, belongs)?;
    let belongs_sref = build.arena.source_ref(belongs).clone();
    let prefix = child_text(&build.arena, belongs, StatementKind::Prefix).ok_or_else(|| {
        err_at!(
            Structural,
            "belongs-to has no prefix statement".to_string(),
            belongs_sref
        )
    })?;
    build.arena.ns_bind_unique(
        sub,
        Scope::Global,
        NamespaceKind::Submodule,
        NamespaceKey::name(name.as_str()),
        sub,
        sref,
    )?;

    // The parent module may be registered later in the batch; defer the
    // prefix binding and module-identity adoption until it appears.
    let key = NamespaceKey::name(parent_name.as_str());
    let fail_sref = belongs_sref.clone();
    let apply_key = key.clone();
    ActionQueue::new_action(ModelPhase::SourceLinkage)
        .require_namespace_item(
            sub,
            Scope::Global,
            NamespaceKind::Module,
            key,
            ModelPhase::SourceLinkage,
        )
        .apply(move |build| {
            let binding = build
                .arena
                .ns_get(sub, Scope::Global, NamespaceKind::Module, &apply_key)
                .ok_or_else(|| {
                    err_msg!(SchedulerInvariant, "satisfied module binding disappeared")
                })?;
            let parent_root = binding.value;
            let parent_id = build.arena.module_id(parent_root).cloned().ok_or_else(|| {
                err_msg!(SchedulerInvariant, "linked module has no resolved identity")
            })?;
            // Definitions in a submodule qualify under the parent module's
            // name, and its prefix addresses the parent.
            build.arena.set_module_id(sub, parent_id);
            build.arena.ns_bind_unique(
                sub,
                Scope::SourceLocal,
                NamespaceKind::Prefix,
                NamespaceKey::name(prefix.as_str()),
                parent_root,
                belongs_sref,
            )
        })
        .on_failure(move |_| {
            err_at!(
                Reference,
                format!("submodule belongs to unknown module '{parent_name}'"),
                fail_sref
            )
        })
        .submit(&mut build.queue);
    Ok(())
}

fn import_linkage(build: &mut ModelBuild, import: ContextId) -> Result<(), YantraError> {
    let imported = ident_argument(&build.arena, import)?;
    let sref = build.arena.source_ref(import).clone();
    let prefix = child_text(&build.arena, import, StatementKind::Prefix).ok_or_else(|| {
        err_at!(
            Structural,
            format!("import of '{imported}' has no prefix statement"),
            sref
        )
    })?;
    let root = build.arena.root(import);

    let key = NamespaceKey::name(imported.as_str());
    let apply_key = key.clone();
    let fail_sref = sref.clone();
    let fail_name = imported.clone();
    ActionQueue::new_action(ModelPhase::SourceLinkage)
        .require_namespace_item(
            import,
            Scope::Global,
            NamespaceKind::Module,
            key,
            ModelPhase::SourceLinkage,
        )
        .apply(move |build| {
            let binding = build
                .arena
                .ns_get(import, Scope::Global, NamespaceKind::Module, &apply_key)
                .ok_or_else(|| {
                    err_msg!(SchedulerInvariant, "satisfied module binding disappeared")
                })?;
            build.arena.ns_bind_unique(
                root,
                Scope::SourceLocal,
                NamespaceKind::Prefix,
                NamespaceKey::name(prefix.as_str()),
                binding.value,
                sref,
            )
        })
        .on_failure(move |_| {
            err_at!(
                Reference,
                format!("imported module '{fail_name}' is not part of this build"),
                fail_sref,
                "add the module to the build or remove the import"
            )
        })
        .submit(&mut build.queue);
    Ok(())
}

fn include_linkage(build: &mut ModelBuild, include: ContextId) -> Result<(), YantraError> {
    let included = ident_argument(&build.arena, include)?;
    let sref = build.arena.source_ref(include).clone();
    let root = build.arena.root(include);
    // A submodule including a sibling shares its parent; otherwise the
    // including module itself must be the one the submodule names.
    let expected = match child_of_kind(&build.arena, root, StatementKind::BelongsTo) {
        Some(belongs) => ident_argument(&build.arena, belongs)?,
        None => ident_argument(&build.arena, root)?,
    };

    let key = NamespaceKey::name(included.as_str());
    let apply_key = key.clone();
    let apply_name = included.clone();
    let fail_name = included.clone();
    let fail_sref = sref.clone();
    ActionQueue::new_action(ModelPhase::SourceLinkage)
        .require_namespace_item(
            include,
            Scope::Global,
            NamespaceKind::Submodule,
            key,
            ModelPhase::SourceLinkage,
        )
        .apply(move |build| {
            let binding = build
                .arena
                .ns_get(include, Scope::Global, NamespaceKind::Submodule, &apply_key)
                .ok_or_else(|| {
                    err_msg!(SchedulerInvariant, "satisfied submodule binding disappeared")
                })?;
            let belongs = child_of_kind(&build.arena, binding.value, StatementKind::BelongsTo)
                .ok_or_else(|| {
                    err_msg!(SchedulerInvariant, "bound submodule lacks a belongs-to")
                })?;
            let parent = ident_argument(&build.arena, belongs)?;
            if parent != expected {
                return Err(err_at!(
                    Structural,
                    format!(
                        "included submodule '{apply_name}' belongs to module \
                         '{parent}', not '{expected}'"
                    ),
                    sref
                ));
            }
            Ok(())
        })
        .on_failure(move |_| {
            err_at!(
                Reference,
                format!("included submodule '{fail_name}' is not part of this build"),
                fail_sref
            )
        })
        .submit(&mut build.queue);
    Ok(())
}

// ----------------------------------------------------------------------
// STATEMENT_DEFINITION
// ----------------------------------------------------------------------

fn bind_tree_scoped(
    build: &mut ModelBuild,
    ctx: ContextId,
    kind: NamespaceKind,
) -> Result<(), YantraError> {
    let name = ident_argument(&build.arena, ctx)?;
    let sref = build.arena.source_ref(ctx).clone();
    let Some(parent) = build.arena.parent(ctx) else {
        return Ok(());
    };
    build.arena.ns_bind_unique(
        parent,
        Scope::TreeScoped,
        kind,
        NamespaceKey::name(name.as_str()),
        ctx,
        sref,
    )
}

fn bind_source_local(
    build: &mut ModelBuild,
    ctx: ContextId,
    kind: NamespaceKind,
) -> Result<(), YantraError> {
    let name = ident_argument(&build.arena, ctx)?;
    let sref = build.arena.source_ref(ctx).clone();
    let root = build.arena.root(ctx);
    build.arena.ns_bind_unique(
        root,
        Scope::SourceLocal,
        kind,
        NamespaceKey::name(name.as_str()),
        ctx,
        sref,
    )
}

/// `base` under an `identity`: records the derived identity on its base
/// once the base exists, possibly in another source. `base` under a
/// `type` is type information and stays untouched here.
fn base_definition(build: &mut ModelBuild, base: ContextId) -> Result<(), YantraError> {
    let Some(identity) = build.arena.parent(base) else {
        return Ok(());
    };
    if build.arena.kind(identity) != StatementKind::Identity {
        return Ok(());
    }
    let (prefix, name) = match build.arena.argument(base) {
        Argument::Reference { prefix, name } => (prefix.clone(), name.clone()),
        _ => return Ok(()),
    };
    let sref = build.arena.source_ref(base).clone();
    let root = build.arena.root(base);
    let target_root = build.resolve_prefix(root, prefix.as_deref(), &sref)?;
    let derived = QName::new(
        build.arena.defining_module_name(root),
        ident_argument(&build.arena, identity)?,
    );
    let shown = build.arena.raw_argument(base).unwrap_or("").to_string();

    let key = NamespaceKey::name(name.as_str());
    let apply_key = key.clone();
    let fail_sref = sref.clone();
    ActionQueue::new_action(ModelPhase::StatementDefinition)
        .require_namespace_item(
            target_root,
            Scope::SourceLocal,
            NamespaceKind::Identity,
            key,
            ModelPhase::StatementDefinition,
        )
        .apply(move |build| {
            let binding = build
                .arena
                .ns_get(
                    target_root,
                    Scope::SourceLocal,
                    NamespaceKind::Identity,
                    &apply_key,
                )
                .ok_or_else(|| {
                    err_msg!(SchedulerInvariant, "satisfied identity binding disappeared")
                })?;
            build.arena.ns_put_if_absent(
                binding.value,
                Scope::StatementLocal,
                NamespaceKind::DerivedIdentities,
                NamespaceKey::QName(derived),
                identity,
                sref,
            );
            Ok(())
        })
        .on_failure(move |_| {
            err_at!(
                Reference,
                format!("base identity '{shown}' not found"),
                fail_sref
            )
        })
        .submit(&mut build.queue);
    Ok(())
}

// ----------------------------------------------------------------------
// FULL_DECLARATION
// ----------------------------------------------------------------------

/// Claims the node's qualified name among its siblings. Grafted copies
/// make the same claim at their new parent when the grafting engine
/// attaches them.
fn claim_child_name(build: &mut ModelBuild, ctx: ContextId) -> Result<(), YantraError> {
    let Some(q) = build.arena.qname(ctx).cloned() else {
        return Ok(());
    };
    let Some(parent) = build.arena.parent(ctx) else {
        return Ok(());
    };
    let sref = build.arena.source_ref(ctx).clone();
    build.arena.ns_bind_unique(
        parent,
        Scope::TreeScoped,
        NamespaceKind::ChildSchemaNodes,
        NamespaceKey::QName(q),
        ctx,
        sref,
    )
}

fn uses_declaration(build: &mut ModelBuild, uses: ContextId) -> Result<(), YantraError> {
    // A uses inside a grouping body expands at each instantiation site,
    // never in the body itself.
    if inside_grouping(&build.arena, uses) {
        return Ok(());
    }
    let (prefix, name) = match build.arena.argument(uses) {
        Argument::Reference { prefix, name } => (prefix.clone(), name.clone()),
        _ => return Ok(()),
    };
    let Some(parent) = build.arena.parent(uses) else {
        return Ok(());
    };
    let sref = build.arena.source_ref(uses).clone();
    let root = build.arena.root(uses);
    // Unprefixed references search outward from the uses site; prefixed
    // ones from the addressed module's root.
    let lookup = match prefix.as_deref() {
        None => uses,
        some => build.resolve_prefix(root, some, &sref)?,
    };
    let shown = build.arena.raw_argument(uses).unwrap_or("").to_string();

    let key = NamespaceKey::name(name.as_str());
    let apply_key = key.clone();
    let fail_sref = sref.clone();
    ActionQueue::new_action(ModelPhase::FullDeclaration)
        .require_namespace_item(
            lookup,
            Scope::TreeScoped,
            NamespaceKind::Grouping,
            key,
            ModelPhase::StatementDefinition,
        )
        .mutates(parent, ModelPhase::FullDeclaration)
        .apply(move |build| {
            let binding = build
                .arena
                .ns_get(lookup, Scope::TreeScoped, NamespaceKind::Grouping, &apply_key)
                .ok_or_else(|| {
                    err_msg!(SchedulerInvariant, "satisfied grouping binding disappeared")
                })?;
            graft::instantiate_uses(build, uses, binding.value)
        })
        .on_failure(move |_| {
            err_at!(
                Reference,
                format!("grouping '{shown}' not found"),
                fail_sref
            )
        })
        .submit(&mut build.queue);
    Ok(())
}

fn augment_declaration(build: &mut ModelBuild, augment: ContextId) -> Result<(), YantraError> {
    let Some(parent) = build.arena.parent(augment) else {
        return Ok(());
    };
    // uses/augment is applied by the grafting engine when the uses fires.
    if build.arena.kind(parent) == StatementKind::Uses || inside_grouping(&build.arena, augment) {
        return Ok(());
    }
    let path = match build.arena.argument(augment) {
        Argument::Path(p) => p.clone(),
        _ => return Ok(()),
    };
    let sref = build.arena.source_ref(augment).clone();
    if !path.absolute {
        return Err(err_at!(
            Structural,
            format!("augment '{path}' at module level must use an absolute path"),
            sref
        ));
    }
    let first_prefix = match path.steps.first() {
        Some(step) => step.prefix.clone(),
        None => {
            return Err(err_at!(
                Structural,
                format!("augment '{path}' names no schema node"),
                sref
            ));
        }
    };
    let root = build.arena.root(augment);
    let target_root = build.resolve_prefix(root, first_prefix.as_deref(), &sref)?;

    // Augments fire after every source finished FULL_DECLARATION, so a
    // target grafted into place by someone else's uses is still found.
    let shown = path.to_string();
    let fail_sref = sref.clone();
    ActionQueue::new_action(ModelPhase::EffectiveModel)
        .require_phase(target_root, ModelPhase::FullDeclaration)
        .mutates(target_root, ModelPhase::EffectiveModel)
        .apply(move |build| graft::apply_augment(build, augment, target_root))
        .on_failure(move |_| {
            err_at!(
                Reference,
                format!("augment target '{shown}' is unreachable"),
                fail_sref
            )
        })
        .submit(&mut build.queue);
    Ok(())
}

// ----------------------------------------------------------------------
// EFFECTIVE_MODEL
// ----------------------------------------------------------------------

fn deviation_effective(build: &mut ModelBuild, deviation: ContextId) -> Result<(), YantraError> {
    let path = match build.arena.argument(deviation) {
        Argument::Path(p) => p.clone(),
        _ => return Ok(()),
    };
    let sref = build.arena.source_ref(deviation).clone();
    if !path.absolute {
        return Err(err_at!(
            Structural,
            format!("deviation '{path}' must use an absolute path"),
            sref
        ));
    }
    let first_prefix = match path.steps.first() {
        Some(step) => step.prefix.clone(),
        None => {
            return Err(err_at!(
                Structural,
                format!("deviation '{path}' names no schema node"),
                sref
            ));
        }
    };
    let root = build.arena.root(deviation);
    let target_root = build.resolve_prefix(root, first_prefix.as_deref(), &sref)?;

    let shown = path.to_string();
    let fail_sref = sref.clone();
    ActionQueue::new_action(ModelPhase::EffectiveModel)
        .require_phase(target_root, ModelPhase::FullDeclaration)
        .mutates(target_root, ModelPhase::EffectiveModel)
        .apply(move |build| graft::apply_deviation(build, deviation, target_root))
        .on_failure(move |_| {
            err_at!(
                Reference,
                format!("deviation target '{shown}' is unreachable"),
                fail_sref
            )
        })
        .submit(&mut build.queue);
    Ok(())
}

/// Manufactures the implicit `input` and `output` children of an `rpc`
/// that declares neither. They exist only in the effective view, under a
/// synthetic source reference; augments targeting an rpc's `input` or
/// `output` then resolve whether or not the body was written out.
fn rpc_effective(build: &mut ModelBuild, rpc: ContextId) -> Result<(), YantraError> {
    let present: Vec<StatementKind> = build
        .arena
        .effective_children(rpc)?
        .iter()
        .map(|&c| build.arena.kind(c))
        .collect();
    let sref = build.arena.source_ref(rpc).clone();
    for keyword in ["input", "output"] {
        let def = build.registry.lookup(keyword, &sref)?;
        if present.contains(&def.kind) {
            continue;
        }
        let implicit = build.arena.create_detached(
            rpc,
            def,
            None,
            Argument::None,
            CopyHistory::original(),
            SourceRef::synthetic(format!("implicit {keyword} statement")),
        );
        build.arena.add_effective_child(rpc, implicit);
    }
    Ok(())
}

/// Final feature sweep: removes every `if-feature`-guarded node whose
/// feature is outside the supported set. Runs on the finished effective
/// trees so guards inside grafted copies are honored too.
pub(super) fn prune_unsupported(
    build: &mut ModelBuild,
    root: ContextId,
) -> Result<(), YantraError> {
    for ctx in build.arena.effective_pre_order(root) {
        if build.arena.kind(ctx) != StatementKind::IfFeature {
            continue;
        }
        let sref = build.arena.source_ref(ctx).clone();
        let feature = match build.arena.argument(ctx).clone() {
            // Copies arrive with their reference already resolved to a
            // qualified name by the grafting engine.
            Argument::QName(q) => q,
            Argument::Reference { prefix, name } => {
                let own_root = build.arena.root(ctx);
                let feature_root = build.resolve_prefix(own_root, prefix.as_deref(), &sref)?;
                if build
                    .arena
                    .ns_get(
                        feature_root,
                        Scope::SourceLocal,
                        NamespaceKind::Feature,
                        &NamespaceKey::name(name.as_str()),
                    )
                    .is_none()
                {
                    return Err(err_at!(
                        Reference,
                        format!("feature '{name}' is not defined"),
                        sref
                    ));
                }
                QName::new(build.arena.defining_module_name(feature_root), name)
            }
            _ => continue,
        };
        if build.feature_supported(&feature) {
            continue;
        }
        let Some(guarded) = build.arena.parent(ctx) else {
            continue;
        };
        // A guard directly under the module root disables nothing here;
        // whole-module conditionals stay in the tree.
        let Some(guarded_parent) = build.arena.parent(guarded) else {
            continue;
        };
        build.arena.drop_effective_child(guarded_parent, guarded)?;
    }
    Ok(())
}
