//! The copy/grafting engine: `uses` instantiation, `augment` application
//! and `deviation` rewriting.
//!
//! Grafting only ever touches *effective* child sequences. The declared
//! tree, including every grouping body, is immutable once written, so a
//! grouping used from ten places yields ten independent copies and the
//! body itself never changes. Each copy records its provenance in its
//! copy history.
//!
//! Copies are deep: a grafted container brings its substatements along.
//! Two child kinds are not copied at all. Typedefs and nested groupings
//! are *definitions*, not schema nodes; instantiation re-exposes them at
//! the target by binding the original context under the target's scope, so
//! every instantiation shares one definition.

use crate::context::{ContextId, CopyTag};
use crate::name::{QName, SchemaNodePath};
use crate::namespace::{NamespaceKey, NamespaceKind, Scope};
use crate::reactor::ModelBuild;
use crate::registry::{Argument, DeviateKind, StatementKind};
use crate::source::SourceRef;
use crate::{err_at, err_msg, YantraError};

// ----------------------------------------------------------------------
// uses
// ----------------------------------------------------------------------

/// Grafts `grouping`'s body under the parent of `uses` and applies the
/// uses' own `refine` and `augment` substatements to the fresh copies.
pub(crate) fn instantiate_uses(
    build: &mut ModelBuild,
    uses: ContextId,
    grouping: ContextId,
) -> Result<(), YantraError> {
    let parent = build
        .arena
        .parent(uses)
        .ok_or_else(|| err_msg!(SchedulerInvariant, "uses statement without a parent"))?;
    let using_module = build
        .arena
        .defining_module_name(build.arena.root(uses))
        .to_string();

    instantiate_into(
        build,
        uses,
        grouping,
        parent,
        Some(&using_module),
        CopyTag::AddedByUses,
    )?;
    Ok(())
}

/// Expands `grouping` at `attach` and applies the `refine` and `augment`
/// substatements of the `uses` that asked for it. Nested uses inside the
/// body route through here too, so their refinements are honored at every
/// instantiation depth.
fn instantiate_into(
    build: &mut ModelBuild,
    uses: ContextId,
    grouping: ContextId,
    attach: ContextId,
    rebind_to: Option<&str>,
    tag: CopyTag,
) -> Result<Vec<ContextId>, YantraError> {
    let defining_root = build.arena.root(grouping);
    let grafted = expand_grouping(build, grouping, attach, defining_root, rebind_to, tag)?;
    for refine in kind_children(build, uses, StatementKind::Refine) {
        apply_refine(build, refine, &grafted)?;
    }
    for augment in kind_children(build, uses, StatementKind::Augment) {
        apply_uses_augment(build, augment, &grafted)?;
    }
    Ok(grafted)
}

/// Copies a grouping body under `attach`: schema-node children become
/// tagged copies, definition children are re-exposed by reference, and
/// nested `uses` expand recursively in their *defining* scope. Returns the
/// top-level copies, in body order.
fn expand_grouping(
    build: &mut ModelBuild,
    grouping: ContextId,
    attach: ContextId,
    defining_root: ContextId,
    rebind_to: Option<&str>,
    tag: CopyTag,
) -> Result<Vec<ContextId>, YantraError> {
    let mut grafted = Vec::new();
    for child in build.arena.declared_children(grouping) {
        match build.arena.kind(child) {
            StatementKind::Typedef => expose_definition(build, child, attach, NamespaceKind::Typedef),
            StatementKind::Grouping => {
                expose_definition(build, child, attach, NamespaceKind::Grouping)
            }
            StatementKind::Uses => {
                let inner = resolve_grouping_reference(build, child, defining_root)?;
                let mut nested = instantiate_into(build, child, inner, attach, rebind_to, tag)?;
                grafted.append(&mut nested);
            }
            kind if kind.is_schema_node() => {
                let copy = copy_tree(build, child, attach, defining_root, rebind_to, tag)?;
                build.arena.add_effective_child(attach, copy);
                grafted.push(copy);
            }
            // description/reference/status document the grouping itself.
            _ => {}
        }
    }
    Ok(grafted)
}

/// Re-exposes a typedef or grouping definition at `attach` without
/// copying it. A definition of the same name already visible at the
/// target wins; this is sharing, not collision.
fn expose_definition(
    build: &mut ModelBuild,
    definition: ContextId,
    attach: ContextId,
    kind: NamespaceKind,
) {
    let Some(name) = build.arena.argument(definition).text() else {
        return;
    };
    let sref = build.arena.source_ref(definition).clone();
    build.arena.ns_put_if_absent(
        attach,
        Scope::TreeScoped,
        kind,
        NamespaceKey::name(name.as_str()),
        definition,
        sref,
    );
}

/// Resolves the grouping a nested `uses` names, in the scope where the
/// uses was written. All definition bindings exist by the time grafting
/// runs, so an absent binding is final.
fn resolve_grouping_reference(
    build: &mut ModelBuild,
    uses: ContextId,
    defining_root: ContextId,
) -> Result<ContextId, YantraError> {
    let sref = build.arena.source_ref(uses).clone();
    let (prefix, name) = match build.arena.argument(uses) {
        Argument::Reference { prefix, name } => (prefix.clone(), name.clone()),
        other => {
            return Err(err_msg!(
                SchedulerInvariant,
                "uses statement carries a non-reference argument {:?}",
                other
            ));
        }
    };
    let lookup = match prefix.as_deref() {
        None => uses,
        some => build.resolve_prefix(defining_root, some, &sref)?,
    };
    build
        .arena
        .ns_get(
            lookup,
            Scope::TreeScoped,
            NamespaceKind::Grouping,
            &NamespaceKey::name(name.as_str()),
        )
        .map(|binding| binding.value)
        .ok_or_else(|| err_at!(Reference, format!("grouping '{name}' not found"), sref))
}

/// Deep-copies `node` as a detached effective subtree under `new_parent`.
///
/// Schema-node copies claim their name among the new siblings, qualified
/// names are rebound to `rebind_to` when given, and `if-feature` guards
/// are resolved to full feature names now, while the defining source's
/// prefixes are still in reach.
fn copy_tree(
    build: &mut ModelBuild,
    node: ContextId,
    new_parent: ContextId,
    defining_root: ContextId,
    rebind_to: Option<&str>,
    tag: CopyTag,
) -> Result<ContextId, YantraError> {
    let def = build.arena.definition(node);
    let raw = build.arena.raw_argument(node).map(str::to_string);
    let sref = build.arena.source_ref(node).clone();
    let history = build.arena.history(node).appended(tag);
    let argument = match build.arena.argument(node).clone() {
        Argument::QName(q) => Argument::QName(match rebind_to {
            Some(module) => q.rebound(module),
            None => q,
        }),
        Argument::Reference { prefix, name } if def.kind == StatementKind::IfFeature => {
            let feature_root = build.resolve_prefix(defining_root, prefix.as_deref(), &sref)?;
            Argument::QName(QName::new(
                build.arena.defining_module_name(feature_root),
                name,
            ))
        }
        other => other,
    };

    let copy = build
        .arena
        .create_detached(new_parent, def, raw, argument, history, sref.clone());
    if def.kind.is_schema_node() {
        if let Some(q) = build.arena.qname(copy).cloned() {
            build.arena.ns_bind_unique(
                new_parent,
                Scope::TreeScoped,
                NamespaceKind::ChildSchemaNodes,
                NamespaceKey::QName(q),
                copy,
                sref,
            )?;
        }
    }

    for child in build.arena.declared_children(node) {
        match build.arena.kind(child) {
            StatementKind::Typedef => expose_definition(build, child, copy, NamespaceKind::Typedef),
            StatementKind::Grouping => {
                expose_definition(build, child, copy, NamespaceKind::Grouping)
            }
            StatementKind::Uses => {
                let inner = resolve_grouping_reference(build, child, defining_root)?;
                instantiate_into(build, child, inner, copy, rebind_to, tag)?;
            }
            _ => {
                let child_copy = copy_tree(build, child, copy, defining_root, rebind_to, tag)?;
                build.arena.add_effective_child(copy, child_copy);
            }
        }
    }
    Ok(copy)
}

// ----------------------------------------------------------------------
// refine
// ----------------------------------------------------------------------

/// Compatibility of one refinement property with its target kind.
fn refine_applies(property: StatementKind, target: StatementKind) -> bool {
    use StatementKind as K;
    match property {
        K::Default => matches!(target, K::Leaf | K::Choice),
        K::Mandatory => matches!(target, K::Leaf | K::Choice | K::Anydata),
        K::Presence => target == K::Container,
        K::Units => matches!(target, K::Leaf | K::LeafList),
        K::Must => matches!(target, K::Container | K::Leaf | K::LeafList | K::List),
        K::Config | K::Description | K::Reference => target.is_schema_node(),
        _ => false,
    }
}

fn apply_refine(
    build: &mut ModelBuild,
    refine: ContextId,
    grafted: &[ContextId],
) -> Result<(), YantraError> {
    let sref = build.arena.source_ref(refine).clone();
    let path = descendant_path(build, refine, "refine")?;
    let target = resolve_in_grafted(build, grafted, &path, &sref)?;
    let target_kind = build.arena.kind(target);

    for prop in build.arena.declared_children(refine) {
        let prop_kind = build.arena.kind(prop);
        if !prop_kind.is_property() {
            continue;
        }
        if !refine_applies(prop_kind, target_kind) {
            return Err(err_at!(
                Grafting,
                format!(
                    "'{}' cannot be refined on a {}",
                    build.arena.keyword(prop),
                    build.arena.keyword(target)
                ),
                build.arena.source_ref(prop).clone()
            ));
        }
        // must accumulates; everything else replaces the copy's value.
        if prop_kind != StatementKind::Must {
            build
                .arena
                .remove_effective_where(target, |a, c| a.kind(c) == prop_kind);
        }
        attach_property_copy(build, target, prop);
    }
    Ok(())
}

/// Copies one property statement under `target` as an effective child.
fn attach_property_copy(build: &mut ModelBuild, target: ContextId, prop: ContextId) {
    let def = build.arena.definition(prop);
    let raw = build.arena.raw_argument(prop).map(str::to_string);
    let argument = build.arena.argument(prop).clone();
    let history = build.arena.history(prop).clone();
    let sref = build.arena.source_ref(prop).clone();
    let copy = build
        .arena
        .create_detached(target, def, raw, argument, history, sref);
    build.arena.add_effective_child(target, copy);
}

// ----------------------------------------------------------------------
// augment
// ----------------------------------------------------------------------

/// Applies a module-level `augment` to its target node, which may live in
/// another source or have been grafted there by someone else's `uses`.
pub(crate) fn apply_augment(
    build: &mut ModelBuild,
    augment: ContextId,
    target_root: ContextId,
) -> Result<(), YantraError> {
    let sref = build.arena.source_ref(augment).clone();
    let path = match build.arena.argument(augment) {
        Argument::Path(p) => p.clone(),
        _ => return Ok(()),
    };
    if augment_disabled_by_feature(build, augment)? {
        return Ok(());
    }
    let target = resolve_absolute_path(build, augment, target_root, &path, &sref)?;
    let target_kind = build.arena.kind(target);
    if !target_kind.is_augment_target() {
        return Err(err_at!(
            Grafting,
            format!(
                "augment target '{path}' is a {}, which cannot be augmented",
                build.arena.keyword(target)
            ),
            sref
        ));
    }

    let augmenting_root = build.arena.root(augment);
    let augmenting = build.arena.defining_module_name(augmenting_root).to_string();
    let target_module = build
        .arena
        .defining_module_name(build.arena.root(target))
        .to_string();
    if augmenting != target_module {
        reject_mandatory_nodes(build, augment, &augmenting, &target_module)?;
    }

    graft_augment_children(build, augment, target, CopyTag::AddedByAugmentation)
}

/// An `augment` guarded by an unsupported feature is skipped whole.
fn augment_disabled_by_feature(
    build: &mut ModelBuild,
    augment: ContextId,
) -> Result<bool, YantraError> {
    for guard in kind_children(build, augment, StatementKind::IfFeature) {
        let (prefix, name) = match build.arena.argument(guard) {
            Argument::Reference { prefix, name } => (prefix.clone(), name.clone()),
            _ => continue,
        };
        let sref = build.arena.source_ref(guard).clone();
        let root = build.arena.root(guard);
        let feature_root = build.resolve_prefix(root, prefix.as_deref(), &sref)?;
        let feature = QName::new(build.arena.defining_module_name(feature_root), name);
        if !build.feature_supported(&feature) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Cross-module augments may not introduce mandatory nodes: the target
/// module's consumers never agreed to them.
fn reject_mandatory_nodes(
    build: &ModelBuild,
    augment: ContextId,
    augmenting: &str,
    target_module: &str,
) -> Result<(), YantraError> {
    for child in build.arena.declared_children(augment) {
        if !build.arena.kind(child).is_schema_node() {
            continue;
        }
        for node in build.arena.declared_pre_order(child) {
            let mandatory = build.arena.kind(node) == StatementKind::Mandatory
                && build.arena.argument(node) == &Argument::Boolean(true);
            if mandatory {
                return Err(err_at!(
                    Grafting,
                    format!(
                        "augment from module '{augmenting}' adds a mandatory node \
                         to module '{target_module}'"
                    ),
                    build.arena.source_ref(node).clone(),
                    "mandatory nodes may only be augmented within the defining module"
                ));
            }
        }
    }
    Ok(())
}

fn graft_augment_children(
    build: &mut ModelBuild,
    augment: ContextId,
    target: ContextId,
    tag: CopyTag,
) -> Result<(), YantraError> {
    let augmenting_root = build.arena.root(augment);
    for child in build.arena.declared_children(augment) {
        match build.arena.kind(child) {
            StatementKind::Uses => {
                let grouping = resolve_grouping_reference(build, child, augmenting_root)?;
                instantiate_into(build, child, grouping, target, None, tag)?;
            }
            kind if kind.is_schema_node() => {
                let copy = copy_tree(build, child, target, augmenting_root, None, tag)?;
                build.arena.add_effective_child(target, copy);
            }
            _ => {}
        }
    }
    Ok(())
}

/// `augment` under a `uses`: a descendant path into the copies this very
/// instantiation produced, never into the grouping body.
fn apply_uses_augment(
    build: &mut ModelBuild,
    augment: ContextId,
    grafted: &[ContextId],
) -> Result<(), YantraError> {
    let sref = build.arena.source_ref(augment).clone();
    let path = descendant_path(build, augment, "augment under uses")?;
    let target = resolve_in_grafted(build, grafted, &path, &sref)?;
    if !build.arena.kind(target).is_augment_target() {
        return Err(err_at!(
            Grafting,
            format!(
                "augment target '{path}' is a {}, which cannot be augmented",
                build.arena.keyword(target)
            ),
            sref
        ));
    }
    graft_augment_children(build, augment, target, CopyTag::AddedByUsesAugmentation)
}

// ----------------------------------------------------------------------
// deviation
// ----------------------------------------------------------------------

/// Applies each `deviate` of a `deviation` to the resolved target node.
pub(crate) fn apply_deviation(
    build: &mut ModelBuild,
    deviation: ContextId,
    target_root: ContextId,
) -> Result<(), YantraError> {
    let sref = build.arena.source_ref(deviation).clone();
    let path = match build.arena.argument(deviation) {
        Argument::Path(p) => p.clone(),
        _ => return Ok(()),
    };
    let target = resolve_absolute_path(build, deviation, target_root, &path, &sref)?;

    for deviate in kind_children(build, deviation, StatementKind::Deviate) {
        let mode = match build.arena.argument(deviate) {
            Argument::Deviate(k) => *k,
            _ => continue,
        };
        match mode {
            DeviateKind::NotSupported => {
                let Some(parent) = build.arena.parent(target) else {
                    continue;
                };
                build
                    .arena
                    .remove_effective_where(parent, |_, c| c == target);
                // The node is gone; later deviates of this deviation have
                // nothing left to touch.
                return Ok(());
            }
            DeviateKind::Add => deviate_add(build, deviate, target)?,
            DeviateKind::Replace => deviate_replace(build, deviate, target),
            DeviateKind::Delete => deviate_delete(build, deviate, target)?,
        }
    }
    Ok(())
}

fn deviate_add(
    build: &mut ModelBuild,
    deviate: ContextId,
    target: ContextId,
) -> Result<(), YantraError> {
    for prop in build.arena.declared_children(deviate) {
        let kind = build.arena.kind(prop);
        if !kind.is_property() {
            continue;
        }
        let single_valued = kind != StatementKind::Must;
        let already = single_valued
            && build
                .arena
                .effective_in_progress(target)
                .iter()
                .any(|&c| build.arena.kind(c) == kind);
        if already {
            return Err(err_at!(
                Grafting,
                format!(
                    "deviate add: the target already has a '{}' substatement",
                    build.arena.keyword(prop)
                ),
                build.arena.source_ref(prop).clone(),
                "use 'deviate replace' to change an existing value"
            ));
        }
        attach_property_copy(build, target, prop);
    }
    Ok(())
}

fn deviate_replace(build: &mut ModelBuild, deviate: ContextId, target: ContextId) {
    for prop in build.arena.declared_children(deviate) {
        let kind = build.arena.kind(prop);
        if !kind.is_property() {
            continue;
        }
        build
            .arena
            .remove_effective_where(target, |a, c| a.kind(c) == kind);
        attach_property_copy(build, target, prop);
    }
}

fn deviate_delete(
    build: &mut ModelBuild,
    deviate: ContextId,
    target: ContextId,
) -> Result<(), YantraError> {
    for prop in build.arena.declared_children(deviate) {
        let kind = build.arena.kind(prop);
        if !kind.is_property() {
            continue;
        }
        let wanted = build.arena.argument(prop).text();
        let removed = build.arena.remove_effective_where(target, |a, c| {
            a.kind(c) == kind && a.argument(c).text() == wanted
        });
        if removed == 0 {
            return Err(err_at!(
                Grafting,
                format!(
                    "deviate delete: the target has no matching '{}' substatement",
                    build.arena.keyword(prop)
                ),
                build.arena.source_ref(prop).clone()
            ));
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Path resolution
// ----------------------------------------------------------------------

fn kind_children(build: &ModelBuild, parent: ContextId, kind: StatementKind) -> Vec<ContextId> {
    build
        .arena
        .declared_children(parent)
        .into_iter()
        .filter(|&c| build.arena.kind(c) == kind)
        .collect()
}

fn descendant_path(
    build: &ModelBuild,
    ctx: ContextId,
    what: &str,
) -> Result<SchemaNodePath, YantraError> {
    let sref = build.arena.source_ref(ctx).clone();
    match build.arena.argument(ctx) {
        Argument::Path(p) if !p.absolute => Ok(p.clone()),
        Argument::Path(p) => Err(err_at!(
            Structural,
            format!("{what} requires a descendant path, got absolute '{p}'"),
            sref
        )),
        other => Err(err_msg!(
            SchedulerInvariant,
            "{} carries a non-path argument {:?}",
            what,
            other
        )),
    }
}

/// Walks an absolute schema-node path from `target_root` through effective
/// children. Step prefixes resolve in the *referencing* source.
fn resolve_absolute_path(
    build: &mut ModelBuild,
    from: ContextId,
    target_root: ContextId,
    path: &SchemaNodePath,
    sref: &SourceRef,
) -> Result<ContextId, YantraError> {
    let from_root = build.arena.root(from);
    let mut cursor = target_root;
    for step in &path.steps {
        let module_root = build.resolve_prefix(from_root, step.prefix.as_deref(), sref)?;
        let module = build.arena.defining_module_name(module_root).to_string();
        let want = QName::new(module, step.name.clone());
        cursor = step_into(build, cursor, &want, &step.name).ok_or_else(|| {
            err_at!(
                Reference,
                format!("'{step}' not found while resolving '{path}'"),
                sref
            )
        })?;
    }
    Ok(cursor)
}

/// Walks a descendant path starting from the copies one instantiation
/// produced. Step names match the copies' (already rebound) names.
fn resolve_in_grafted(
    build: &ModelBuild,
    grafted: &[ContextId],
    path: &SchemaNodePath,
    sref: &SourceRef,
) -> Result<ContextId, YantraError> {
    let mut steps = path.steps.iter();
    let first = steps.next().ok_or_else(|| {
        err_msg!(SchedulerInvariant, "descendant path without steps")
    })?;
    let mut cursor = grafted
        .iter()
        .copied()
        .find(|&c| names_step(build, c, &first.name))
        .ok_or_else(|| {
            err_at!(
                Reference,
                format!("'{first}' is not a node of the used grouping"),
                sref
            )
        })?;
    for step in steps {
        cursor = build
            .arena
            .effective_in_progress(cursor)
            .iter()
            .copied()
            .find(|&c| names_step(build, c, &step.name))
            .ok_or_else(|| {
                err_at!(
                    Reference,
                    format!("'{step}' not found while resolving '{path}'"),
                    sref
                )
            })?;
    }
    Ok(cursor)
}

/// One path-walk step: a qualified-name child, or `input`/`output` by
/// keyword since those carry no argument.
fn step_into(
    build: &ModelBuild,
    cursor: ContextId,
    want: &QName,
    raw_name: &str,
) -> Option<ContextId> {
    build
        .arena
        .effective_in_progress(cursor)
        .iter()
        .copied()
        .find(|&c| match build.arena.qname(c) {
            Some(q) => q == want,
            None => {
                matches!(
                    build.arena.kind(c),
                    StatementKind::Input | StatementKind::Output
                ) && build.arena.keyword(c) == raw_name
            }
        })
}

fn names_step(build: &ModelBuild, ctx: ContextId, name: &str) -> bool {
    match build.arena.qname(ctx) {
        Some(q) => q.name == name,
        None => {
            matches!(
                build.arena.kind(ctx),
                StatementKind::Input | StatementKind::Output
            ) && build.arena.keyword(ctx) == name
        }
    }
}
