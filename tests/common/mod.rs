//! Shared helpers for the integration suite: fluent module sources and
//! one-call builds.

#![allow(dead_code)]

use yantra::context::{Arena, ContextId};
use yantra::effective::ResolvedModels;
use yantra::reactor::StatementReactor;
use yantra::source::{ModuleBuilder, ModuleSource};
use yantra::YantraError;

/// A module source with the usual preamble: `namespace urn:test:<name>`
/// and a prefix equal to the module name.
pub fn module(name: &str) -> ModuleBuilder {
    ModuleBuilder::module(name)
        .stmt("namespace", Some(&format!("urn:test:{name}")))
        .stmt("prefix", Some(name))
}

/// A module that imports another under the given prefix.
pub fn module_importing(name: &str, imported: &str, prefix: &str) -> ModuleBuilder {
    module(name)
        .open("import", Some(imported))
        .stmt("prefix", Some(prefix))
        .close()
}

pub fn build(sources: Vec<ModuleSource>) -> Result<ResolvedModels, YantraError> {
    let reactor = StatementReactor::new();
    let mut build = reactor.new_build();
    for source in sources {
        build.add_source(source);
    }
    build.build()
}

pub fn build_with_features(
    sources: Vec<ModuleSource>,
    features: Vec<yantra::name::QName>,
) -> Result<ResolvedModels, YantraError> {
    let reactor = StatementReactor::new();
    let mut build = reactor.new_build();
    for source in sources {
        build.add_source(source);
    }
    build.with_supported_features(features);
    build.build()
}

/// Runs the build but keeps the raw arena, for assertions on context
/// identity, namespaces and copy histories.
pub fn build_arena(sources: Vec<ModuleSource>) -> Result<(Arena, Vec<ContextId>), YantraError> {
    let reactor = StatementReactor::new();
    let mut build = reactor.new_build();
    for source in sources {
        build.add_source(source);
    }
    build.build_contexts()
}

/// Finds a declared child by keyword and raw argument, panicking with a
/// readable message when absent.
pub fn declared_child(arena: &Arena, parent: ContextId, keyword: &str, argument: &str) -> ContextId {
    arena
        .declared_children(parent)
        .into_iter()
        .find(|&c| arena.keyword(c) == keyword && arena.raw_argument(c) == Some(argument))
        .unwrap_or_else(|| panic!("no declared '{keyword} {argument}' under {parent:?}"))
}

/// The error's rendered message, for containment asserts.
pub fn message_of(err: YantraError) -> String {
    err.to_string()
}
