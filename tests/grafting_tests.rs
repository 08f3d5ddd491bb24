//! Grafting behavior: `uses` instantiation, `refine`, `augment` (module
//! level and under `uses`), `deviation`, and `if-feature` pruning.

mod common;

use common::*;
use yantra::context::CopyTag;
use yantra::diagnostics::ErrorClass;
use yantra::name::QName;
use yantra::namespace::{NamespaceKey, NamespaceKind, Scope};
use yantra::registry::StatementKind;
use yantra::source::ModuleSource;

fn grouping_module() -> ModuleSource {
    // module m1 { grouping g { leaf x { type string; default "a"; } } }
    module("m1")
        .open("grouping", Some("g"))
        .open("leaf", Some("x"))
        .stmt("type", Some("string"))
        .stmt("default", Some("a"))
        .close()
        .close()
        .into_source()
}

#[test]
fn uses_grafts_a_rebound_copy_into_the_using_module() {
    let m2 = module_importing("m2", "m1", "p1")
        .open("container", Some("c"))
        .stmt("uses", Some("p1:g"))
        .close()
        .into_source();

    let models = build(vec![grouping_module(), m2]).unwrap();
    let c = models.module("m2").unwrap().root().schema_child("c").unwrap();
    let x = c.schema_child("x").unwrap();

    // Copied, tagged, and requalified to the using module.
    assert_eq!(x.qname().unwrap(), &QName::new("m2", "x"));
    assert_eq!(x.history.last(), CopyTag::AddedByUses);
    assert!(x.declared.is_none());
    // Substatements came along.
    assert!(x.find(StatementKind::Type).is_some());
    assert_eq!(
        x.find(StatementKind::Default).unwrap().argument_text(),
        Some("a".to_string())
    );
}

#[test]
fn uses_in_the_defining_module_keeps_names_and_still_copies() {
    let m1 = module("m1")
        .open("grouping", Some("g"))
        .open("leaf", Some("x"))
        .stmt("type", Some("string"))
        .close()
        .close()
        .open("container", Some("c"))
        .stmt("uses", Some("g"))
        .close()
        .into_source();

    let models = build(vec![m1]).unwrap();
    let m1 = models.module("m1").unwrap();
    let x = m1.root().schema_child("c").unwrap().schema_child("x").unwrap();
    assert_eq!(x.qname().unwrap(), &QName::new("m1", "x"));
    assert_eq!(x.history.last(), CopyTag::AddedByUses);
    // The grouping body is untouched and still original.
    let gx = m1.grouping("g").unwrap().schema_child("x").unwrap();
    assert!(gx.history.is_original());
}

#[test]
fn unknown_grouping_fails_at_the_declaration_barrier() {
    let m1 = module("m1")
        .open("container", Some("c"))
        .stmt("uses", Some("g"))
        .close()
        .into_source();
    let err = build(vec![m1]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Reference);
    assert!(err.message().contains("grouping 'g'"), "{}", err.message());
}

#[test]
fn grafted_copy_collides_with_an_existing_sibling() {
    let m1 = module("m1")
        .open("grouping", Some("g"))
        .open("leaf", Some("x"))
        .stmt("type", Some("string"))
        .close()
        .close()
        .open("container", Some("c"))
        .open("leaf", Some("x"))
        .stmt("type", Some("string"))
        .close()
        .stmt("uses", Some("g"))
        .close()
        .into_source();
    let err = build(vec![m1]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Structural);
    assert!(err.message().contains("duplicate name 'm1:x'"), "{}", err.message());
}

#[test]
fn two_instantiations_are_independent_copies() {
    let m2 = module_importing("m2", "m1", "p1")
        .open("container", Some("a"))
        .stmt("uses", Some("p1:g"))
        .close()
        .open("container", Some("b"))
        .open("uses", Some("p1:g"))
        .open("refine", Some("x"))
        .stmt("default", Some("b-default"))
        .close()
        .close()
        .close()
        .into_source();

    let models = build(vec![grouping_module(), m2]).unwrap();
    let m2 = models.module("m2").unwrap();
    let ax = m2.root().schema_child("a").unwrap().schema_child("x").unwrap();
    let bx = m2.root().schema_child("b").unwrap().schema_child("x").unwrap();
    // Refining one copy leaves the sibling instantiation alone.
    assert_eq!(
        ax.find(StatementKind::Default).unwrap().argument_text(),
        Some("a".to_string())
    );
    assert_eq!(
        bx.find(StatementKind::Default).unwrap().argument_text(),
        Some("b-default".to_string())
    );
    // And the grouping body still carries the original default.
    let models_m1 = models.module("m1").unwrap();
    let gx = models_m1.grouping("g").unwrap().schema_child("x").unwrap();
    assert_eq!(
        gx.find(StatementKind::Default).unwrap().argument_text(),
        Some("a".to_string())
    );
}

#[test]
fn refine_replaces_single_valued_properties_without_duplicates() {
    let m2 = module_importing("m2", "m1", "p1")
        .open("container", Some("c"))
        .open("uses", Some("p1:g"))
        .open("refine", Some("x"))
        .stmt("default", Some("refined"))
        .close()
        .close()
        .close()
        .into_source();

    let models = build(vec![grouping_module(), m2]).unwrap();
    let x = models
        .module("m2")
        .unwrap()
        .root()
        .schema_child("c")
        .unwrap()
        .schema_child("x")
        .unwrap();
    let defaults = x.all(StatementKind::Default);
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].argument_text(), Some("refined".to_string()));
}

#[test]
fn refine_must_accumulates() {
    let m1 = module("m1")
        .open("grouping", Some("g"))
        .open("leaf", Some("x"))
        .stmt("type", Some("string"))
        .stmt("must", Some("base-rule"))
        .close()
        .close()
        .open("container", Some("c"))
        .open("uses", Some("g"))
        .open("refine", Some("x"))
        .stmt("must", Some("extra-rule"))
        .close()
        .close()
        .close()
        .into_source();

    let models = build(vec![m1]).unwrap();
    let x = models
        .module("m1")
        .unwrap()
        .root()
        .schema_child("c")
        .unwrap()
        .schema_child("x")
        .unwrap();
    assert_eq!(x.all(StatementKind::Must).len(), 2);
}

#[test]
fn incompatible_refine_is_a_grafting_error() {
    let m2 = module_importing("m2", "m1", "p1")
        .open("container", Some("c"))
        .open("uses", Some("p1:g"))
        .open("refine", Some("x"))
        .stmt("presence", Some("p"))
        .close()
        .close()
        .close()
        .into_source();
    let err = build(vec![grouping_module(), m2]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Grafting);
    assert!(err.message().contains("presence"), "{}", err.message());
}

#[test]
fn refine_of_a_node_the_grouping_lacks_is_a_reference_error() {
    let m2 = module_importing("m2", "m1", "p1")
        .open("container", Some("c"))
        .open("uses", Some("p1:g"))
        .open("refine", Some("missing"))
        .stmt("default", Some("v"))
        .close()
        .close()
        .close()
        .into_source();
    let err = build(vec![grouping_module(), m2]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Reference);
    assert!(err.message().contains("missing"), "{}", err.message());
}

#[test]
fn nested_uses_expands_at_every_instantiation_depth() {
    let m1 = module("m1")
        .open("grouping", Some("inner"))
        .open("leaf", Some("deep"))
        .stmt("type", Some("string"))
        .close()
        .close()
        .open("grouping", Some("outer"))
        .open("container", Some("box"))
        .stmt("uses", Some("inner"))
        .close()
        .close()
        .open("container", Some("c"))
        .stmt("uses", Some("outer"))
        .close()
        .into_source();

    let models = build(vec![m1]).unwrap();
    let deep = models
        .module("m1")
        .unwrap()
        .root()
        .schema_child("c")
        .unwrap()
        .schema_child("box")
        .unwrap()
        .schema_child("deep")
        .unwrap();
    assert_eq!(deep.history.last(), CopyTag::AddedByUses);
}

#[test]
fn typedefs_are_shared_by_reference_not_copied() {
    let m1 = module("m1")
        .open("grouping", Some("g"))
        .stmt("typedef", Some("shared-t"))
        .open("leaf", Some("x"))
        .stmt("type", Some("shared-t"))
        .close()
        .close()
        .into_source();
    let m2 = module_importing("m2", "m1", "p1")
        .open("container", Some("c"))
        .stmt("uses", Some("p1:g"))
        .close()
        .into_source();

    let (arena, roots) = build_arena(vec![m1, m2]).unwrap();
    let g = declared_child(&arena, roots[0], "grouping", "g");
    let original_typedef = declared_child(&arena, g, "typedef", "shared-t");
    let c = declared_child(&arena, roots[1], "container", "c");

    // The uses site sees the grouping's typedef as the same context.
    let binding = arena
        .ns_get(
            c,
            Scope::TreeScoped,
            NamespaceKind::Typedef,
            &NamespaceKey::name("shared-t"),
        )
        .expect("typedef re-exposed at the instantiation site");
    assert_eq!(binding.value, original_typedef);

    // And no typedef copy appears among c's effective children.
    let copied_typedefs = arena
        .effective_children(c)
        .unwrap()
        .iter()
        .filter(|&&ch| arena.kind(ch) == StatementKind::Typedef)
        .count();
    assert_eq!(copied_typedefs, 0);
}

#[test]
fn uses_augment_tags_grafted_nodes() {
    let m1 = module("m1")
        .open("grouping", Some("g"))
        .open("container", Some("inner"))
        .open("leaf", Some("x"))
        .stmt("type", Some("string"))
        .close()
        .close()
        .close()
        .into_source();
    let m2 = module_importing("m2", "m1", "p1")
        .open("container", Some("c"))
        .open("uses", Some("p1:g"))
        .open("augment", Some("inner"))
        .open("leaf", Some("extra"))
        .stmt("type", Some("string"))
        .close()
        .close()
        .close()
        .close()
        .into_source();

    let models = build(vec![m1, m2]).unwrap();
    let inner = models
        .module("m2")
        .unwrap()
        .root()
        .schema_child("c")
        .unwrap()
        .schema_child("inner")
        .unwrap();
    assert_eq!(inner.history.last(), CopyTag::AddedByUses);
    let extra = inner.schema_child("extra").unwrap();
    assert_eq!(extra.history.last(), CopyTag::AddedByUsesAugmentation);
    assert_eq!(extra.qname().unwrap(), &QName::new("m2", "extra"));
}

#[test]
fn module_level_augment_grafts_into_another_source() {
    let m1 = module("m1")
        .open("container", Some("c"))
        .open("leaf", Some("x"))
        .stmt("type", Some("string"))
        .close()
        .close()
        .into_source();
    let m2 = module_importing("m2", "m1", "p1")
        .open("augment", Some("/p1:c"))
        .open("leaf", Some("y"))
        .stmt("type", Some("string"))
        .close()
        .close()
        .into_source();

    let models = build(vec![m1, m2]).unwrap();
    let c = models.module("m1").unwrap().root().schema_child("c").unwrap();
    let y = c.schema_child("y").unwrap();
    // Augmented nodes keep the augmenting module's name.
    assert_eq!(y.qname().unwrap(), &QName::new("m2", "y"));
    assert_eq!(y.history.last(), CopyTag::AddedByAugmentation);
    // The target's own child is untouched.
    assert!(c.schema_child("x").unwrap().history.is_original());
}

#[test]
fn augment_applies_to_nodes_grafted_by_someone_elses_uses() {
    let m1 = module("m1")
        .open("grouping", Some("g"))
        .open("container", Some("slot"))
        .close()
        .close()
        .open("container", Some("c"))
        .stmt("uses", Some("g"))
        .close()
        .into_source();
    let m2 = module_importing("m2", "m1", "p1")
        .open("augment", Some("/p1:c/p1:slot"))
        .open("leaf", Some("y"))
        .stmt("type", Some("string"))
        .close()
        .close()
        .into_source();

    let models = build(vec![m1, m2]).unwrap();
    let slot = models
        .module("m1")
        .unwrap()
        .root()
        .schema_child("c")
        .unwrap()
        .schema_child("slot")
        .unwrap();
    assert!(slot.schema_child("y").is_some());
}

#[test]
fn duplicate_augment_application_collides() {
    let m1 = module("m1").open("container", Some("c")).close().into_source();
    let m2 = module_importing("m2", "m1", "p1")
        .open("augment", Some("/p1:c"))
        .open("leaf", Some("y"))
        .stmt("type", Some("string"))
        .close()
        .close()
        .open("augment", Some("/p1:c"))
        .open("leaf", Some("y"))
        .stmt("type", Some("string"))
        .close()
        .close()
        .into_source();
    let err = build(vec![m1, m2]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Structural);
    assert!(err.message().contains("duplicate name 'm2:y'"), "{}", err.message());
}

#[test]
fn cross_module_mandatory_augment_is_rejected() {
    let m1 = module("m1").open("container", Some("c")).close().into_source();
    let m2 = module_importing("m2", "m1", "p1")
        .open("augment", Some("/p1:c"))
        .open("leaf", Some("z"))
        .stmt("type", Some("string"))
        .stmt("mandatory", Some("true"))
        .close()
        .close()
        .into_source();
    let err = build(vec![m1, m2]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Grafting);
    assert!(err.message().contains("mandatory"), "{}", err.message());
}

#[test]
fn same_module_mandatory_augment_is_allowed() {
    let m1 = module("m1")
        .open("container", Some("c"))
        .close()
        .open("augment", Some("/m1:c"))
        .open("leaf", Some("z"))
        .stmt("type", Some("string"))
        .stmt("mandatory", Some("true"))
        .close()
        .close()
        .into_source();
    let models = build(vec![m1]).unwrap();
    let c = models.module("m1").unwrap().root().schema_child("c").unwrap();
    assert!(c.schema_child("z").is_some());
}

#[test]
fn augmenting_a_leaf_is_a_grafting_error() {
    let m1 = module("m1")
        .open("container", Some("c"))
        .open("leaf", Some("x"))
        .stmt("type", Some("string"))
        .close()
        .close()
        .into_source();
    let m2 = module_importing("m2", "m1", "p1")
        .open("augment", Some("/p1:c/p1:x"))
        .open("leaf", Some("y"))
        .stmt("type", Some("string"))
        .close()
        .close()
        .into_source();
    let err = build(vec![m1, m2]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Grafting);
    assert!(err.message().contains("cannot be augmented"), "{}", err.message());
}

#[test]
fn unreachable_augment_target_is_a_reference_error() {
    let m1 = module("m1").open("container", Some("c")).close().into_source();
    let m2 = module_importing("m2", "m1", "p1")
        .open("augment", Some("/p1:c/p1:missing"))
        .open("leaf", Some("y"))
        .stmt("type", Some("string"))
        .close()
        .close()
        .into_source();
    let err = build(vec![m1, m2]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Reference);
    assert!(err.message().contains("missing"), "{}", err.message());
}

#[test]
fn deviate_not_supported_removes_the_target() {
    let m1 = module("m1")
        .open("container", Some("c"))
        .open("leaf", Some("x"))
        .stmt("type", Some("string"))
        .close()
        .close()
        .into_source();
    let m2 = module_importing("m2", "m1", "p1")
        .open("deviation", Some("/p1:c/p1:x"))
        .stmt("deviate", Some("not-supported"))
        .close()
        .into_source();

    let models = build(vec![m1, m2]).unwrap();
    let c = models.module("m1").unwrap().root().schema_child("c").unwrap();
    assert!(c.schema_child("x").is_none());
}

#[test]
fn deviate_replace_swaps_a_property() {
    let m1 = module("m1")
        .open("leaf", Some("x"))
        .stmt("type", Some("string"))
        .stmt("default", Some("old"))
        .close()
        .into_source();
    let m2 = module_importing("m2", "m1", "p1")
        .open("deviation", Some("/p1:x"))
        .open("deviate", Some("replace"))
        .stmt("default", Some("new"))
        .close()
        .close()
        .into_source();

    let models = build(vec![m1, m2]).unwrap();
    let x = models.module("m1").unwrap().root().schema_child("x").unwrap();
    let defaults = x.all(StatementKind::Default);
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].argument_text(), Some("new".to_string()));
}

#[test]
fn deviate_add_of_a_present_property_fails() {
    let m1 = module("m1")
        .open("leaf", Some("x"))
        .stmt("type", Some("string"))
        .stmt("default", Some("old"))
        .close()
        .into_source();
    let m2 = module_importing("m2", "m1", "p1")
        .open("deviation", Some("/p1:x"))
        .open("deviate", Some("add"))
        .stmt("default", Some("new"))
        .close()
        .close()
        .into_source();
    let err = build(vec![m1, m2]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Grafting);
    assert!(err.message().contains("already has"), "{}", err.message());
}

#[test]
fn deviate_delete_of_a_missing_property_fails() {
    let m1 = module("m1")
        .open("leaf", Some("x"))
        .stmt("type", Some("string"))
        .close()
        .into_source();
    let m2 = module_importing("m2", "m1", "p1")
        .open("deviation", Some("/p1:x"))
        .open("deviate", Some("delete"))
        .stmt("must", Some("nonexistent"))
        .close()
        .close()
        .into_source();
    let err = build(vec![m1, m2]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Grafting);
    assert!(err.message().contains("no matching"), "{}", err.message());
}

#[test]
fn unsupported_feature_prunes_the_guarded_node() {
    let m1 = module("m1")
        .stmt("feature", Some("f1"))
        .open("container", Some("c"))
        .stmt("if-feature", Some("f1"))
        .close()
        .into_source();

    let models = build_with_features(vec![m1.clone()], vec![]).unwrap();
    assert!(models.module("m1").unwrap().root().schema_child("c").is_none());

    let models = build_with_features(vec![m1.clone()], vec![QName::new("m1", "f1")]).unwrap();
    assert!(models.module("m1").unwrap().root().schema_child("c").is_some());

    // No feature set at all means everything is supported.
    let models = build(vec![m1]).unwrap();
    assert!(models.module("m1").unwrap().root().schema_child("c").is_some());
}

#[test]
fn undefined_feature_is_a_reference_error() {
    let m1 = module("m1")
        .open("container", Some("c"))
        .stmt("if-feature", Some("ghost"))
        .close()
        .into_source();
    let err = build(vec![m1]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Reference);
    assert!(err.message().contains("ghost"), "{}", err.message());
}

#[test]
fn feature_guards_inside_copied_subtrees_resolve_in_the_defining_module() {
    let m1 = module("m1")
        .stmt("feature", Some("f1"))
        .open("grouping", Some("g"))
        .open("leaf", Some("x"))
        .stmt("if-feature", Some("f1"))
        .stmt("type", Some("string"))
        .close()
        .close()
        .into_source();
    let m2 = module_importing("m2", "m1", "p1")
        .open("container", Some("c"))
        .stmt("uses", Some("p1:g"))
        .close()
        .into_source();

    // The unprefixed guard names m1's feature even though the copy lives
    // in m2.
    let models =
        build_with_features(vec![m1.clone(), m2.clone()], vec![QName::new("m1", "f1")]).unwrap();
    let c = models.module("m2").unwrap().root().schema_child("c").unwrap();
    assert!(c.schema_child("x").is_some());

    let models = build_with_features(vec![m1, m2], vec![]).unwrap();
    let c = models.module("m2").unwrap().root().schema_child("c").unwrap();
    assert!(c.schema_child("x").is_none());
}
