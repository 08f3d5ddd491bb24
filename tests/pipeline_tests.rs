//! Phase pipeline and linkage behavior: lockstep phases, registration-order
//! determinism, import/include resolution, collision detection.

mod common;

use common::*;
use yantra::diagnostics::ErrorClass;
use yantra::name::QName;
use yantra::registry::{ModelPhase, StatementKind};

#[test]
fn single_module_builds_to_effective_model() {
    let m1 = module("m1")
        .open("container", Some("c"))
        .open("leaf", Some("x"))
        .stmt("type", Some("string"))
        .close()
        .close()
        .into_source();

    let models = build(vec![m1]).unwrap();
    assert_eq!(models.len(), 1);
    let m1 = models.module("m1").unwrap();
    assert_eq!(m1.id().name, "m1");
    assert_eq!(m1.id().namespace, "urn:test:m1");

    let c = m1.root().schema_child("c").unwrap();
    let x = c.schema_child("x").unwrap();
    assert_eq!(x.qname().unwrap(), &QName::new("m1", "x"));
    assert!(x.find(StatementKind::Type).is_some());
    assert!(x.history.is_original());
    assert!(x.declared.is_some());
}

#[test]
fn build_without_sources_is_rejected() {
    let err = build(vec![]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Structural);
}

#[test]
fn module_missing_namespace_fails_linkage() {
    let m1 = yantra::source::ModuleBuilder::module("m1")
        .stmt("prefix", Some("m1"))
        .into_source();
    let err = build(vec![m1]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Structural);
    assert!(err.message().contains("namespace"), "{}", err.message());
}

#[test]
fn duplicate_module_names_collide() {
    let a = module("m1").into_source();
    let b = yantra::source::ModuleBuilder::module("m1")
        .stmt("namespace", Some("urn:test:other"))
        .stmt("prefix", Some("other"))
        .into_source();
    let err = build(vec![a, b]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Structural);
    assert!(err.message().contains("duplicate name 'm1'"), "{}", err.message());
}

#[test]
fn import_resolves_regardless_of_registration_order() {
    // m2 names m1 before m1 has been walked; the action defers and fires
    // once m1's linkage completes, still within SOURCE_LINKAGE.
    let m2 = module_importing("m2", "m1", "p1").into_source();
    let m1 = module("m1").into_source();
    let models = build(vec![m2, m1]).unwrap();
    assert_eq!(models.len(), 2);
}

#[test]
fn missing_import_fails_at_the_phase_barrier() {
    let m2 = module_importing("m2", "m1", "p1").into_source();
    let err = build(vec![m2]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Reference);
    assert!(err.message().contains("'m1'"), "{}", err.message());
}

#[test]
fn missing_include_fails_at_the_phase_barrier() {
    let m1 = module("m1").stmt("include", Some("s1")).into_source();
    let err = build(vec![m1]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Reference);
    assert!(err.message().contains("'s1'"), "{}", err.message());
}

#[test]
fn submodule_adopts_parent_module_identity() {
    let m1 = module("m1").stmt("include", Some("s1")).into_source();
    let s1 = yantra::source::ModuleBuilder::submodule("s1")
        .open("belongs-to", Some("m1"))
        .stmt("prefix", Some("m1"))
        .close()
        .open("container", Some("sc"))
        .open("leaf", Some("y"))
        .stmt("type", Some("string"))
        .close()
        .close()
        .into_source();

    let models = build(vec![m1, s1]).unwrap();
    let sub = models.module("s1").unwrap();
    assert!(sub.is_submodule());
    assert_eq!(sub.id().name, "m1");
    assert_eq!(sub.id().namespace, "urn:test:m1");
    // Definitions in the submodule qualify under the parent module.
    let sc = sub.root().schema_child("sc").unwrap();
    let y = sc.schema_child("y").unwrap();
    assert_eq!(y.qname().unwrap(), &QName::new("m1", "y"));
}

#[test]
fn submodule_without_parent_module_fails() {
    let s1 = yantra::source::ModuleBuilder::submodule("s1")
        .open("belongs-to", Some("m9"))
        .stmt("prefix", Some("m9"))
        .close()
        .into_source();
    let err = build(vec![s1]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Reference);
    assert!(err.message().contains("'m9'"), "{}", err.message());
}

#[test]
fn include_of_a_foreign_submodule_is_rejected() {
    let a = module("a").stmt("include", Some("s1")).into_source();
    let b = module("b").stmt("include", Some("s1")).into_source();
    let s1 = yantra::source::ModuleBuilder::submodule("s1")
        .open("belongs-to", Some("b"))
        .stmt("prefix", Some("b"))
        .close()
        .into_source();

    let err = build(vec![a, b, s1]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Structural);
    assert!(
        err.message().contains("belongs to module 'b', not 'a'"),
        "{}",
        err.message()
    );
}

#[test]
fn unknown_keyword_is_rejected_by_the_default_registry() {
    let m1 = module("m1").stmt("fancy-extension", Some("v")).into_source();
    let err = build(vec![m1]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Structural);
    assert!(err.message().contains("fancy-extension"), "{}", err.message());
}

#[test]
fn sibling_name_collision_reports_both_sites() {
    let m1 = module("m1")
        .open("container", Some("c"))
        .open("leaf", Some("x"))
        .stmt("type", Some("string"))
        .close()
        .open("leaf-list", Some("x"))
        .stmt("type", Some("string"))
        .close()
        .close()
        .into_source();
    let err = build(vec![m1]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Structural);
    assert!(err.message().contains("duplicate name 'm1:x'"), "{}", err.message());
}

#[test]
fn same_name_under_different_parents_is_fine() {
    let m1 = module("m1")
        .open("container", Some("a"))
        .open("leaf", Some("x"))
        .stmt("type", Some("string"))
        .close()
        .close()
        .open("container", Some("b"))
        .open("leaf", Some("x"))
        .stmt("type", Some("string"))
        .close()
        .close()
        .into_source();
    assert!(build(vec![m1]).is_ok());
}

#[test]
fn declared_order_is_stable_across_incremental_walks() {
    // Linkage statements are written three times, definition statements
    // twice, body statements once; child indexes must keep source order.
    let m1 = module("m1")
        .open("grouping", Some("g"))
        .open("leaf", Some("gx"))
        .stmt("type", Some("string"))
        .close()
        .close()
        .open("container", Some("c"))
        .open("leaf", Some("x"))
        .stmt("type", Some("string"))
        .close()
        .close()
        .into_source();

    let (arena, roots) = build_arena(vec![m1]).unwrap();
    let root = roots[0];
    let keywords: Vec<&str> = arena
        .declared_children(root)
        .into_iter()
        .map(|c| arena.keyword(c))
        .collect();
    assert_eq!(
        keywords,
        vec!["namespace", "prefix", "grouping", "container"]
    );
    // No duplicated contexts from the re-walks.
    assert_eq!(arena.declared_children(root).len(), 4);
}

#[test]
fn every_context_finishes_in_the_final_phase() {
    let m1 = module("m1")
        .open("container", Some("c"))
        .open("leaf", Some("x"))
        .stmt("type", Some("string"))
        .close()
        .close()
        .into_source();
    let (arena, roots) = build_arena(vec![m1]).unwrap();
    for ctx in arena.declared_pre_order(roots[0]) {
        assert_eq!(arena.phase(ctx), ModelPhase::EffectiveModel);
    }
}

#[test]
fn unbound_prefix_in_uses_is_a_reference_error() {
    let m1 = module("m1")
        .open("container", Some("c"))
        .stmt("uses", Some("nope:g"))
        .close()
        .into_source();
    let err = build(vec![m1]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Reference);
    assert!(err.message().contains("prefix 'nope'"), "{}", err.message());
}

#[test]
fn cross_module_identity_derivation() {
    let m1 = module("m1").open("identity", Some("animal")).close().into_source();
    let m2 = module_importing("m2", "m1", "p1")
        .open("identity", Some("cat"))
        .stmt("base", Some("p1:animal"))
        .close()
        .into_source();

    let models = build(vec![m1, m2]).unwrap();
    let animal = models.module("m1").unwrap().identity("animal").unwrap();
    assert_eq!(animal.derived_identities, vec![QName::new("m2", "cat")]);
}

#[test]
fn unknown_base_identity_fails_after_definitions_complete() {
    let m1 = module("m1")
        .open("identity", Some("cat"))
        .stmt("base", Some("animal"))
        .close()
        .into_source();
    let err = build(vec![m1]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Reference);
    assert!(err.message().contains("'animal'"), "{}", err.message());
}
