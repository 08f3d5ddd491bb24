//! Build-time namespaces: visibility-scoped key/value stores used for
//! cross-statement addressing during the build.
//!
//! Distinct from the XML/URI namespace of the modeled language. A binding
//! lives at one of four scopes:
//!
//! - **`StatementLocal`**: only the owning context sees it.
//! - **`TreeScoped`**: visible to the whole subtree rooted where it was
//!   inserted.
//! - **`SourceLocal`**: stored on the owning context's root, visible to
//!   that file only.
//! - **`Global`**: stored on the build, visible to every source.
//!
//! A key may be bound at most once per store: [`NamespaceStore::put_if_absent`]
//! reports the previous binding instead of overwriting. Duplicate sibling
//! schema-node names are detected *solely* through this: a duplicate insert
//! into the tree-scoped `ChildSchemaNodes` namespace is the naming-collision
//! signal, and the surviving binding's [`SourceRef`] supplies the
//! "previously bound here" label of the resulting diagnostic.
//!
//! Scope *resolution* (walking the storage-parent chain) needs the context
//! arena and lives on [`Arena`](crate::context::Arena); this module owns the
//! store itself.

use std::collections::BTreeMap;

use crate::context::ContextId;
use crate::name::QName;
use crate::source::{ModuleId, SourceRef};

/// Visibility scope of a namespace binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    StatementLocal,
    TreeScoped,
    SourceLocal,
    Global,
}

/// The namespaces the engine populates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NamespaceKind {
    /// Module name → root context (global).
    Module,
    /// Namespace URI → root context (global).
    ModuleNamespace,
    /// Submodule name → root context (global).
    Submodule,
    /// Prefix → imported (or own) module root context (source-local).
    Prefix,
    /// Extension name → extension context (source-local).
    Extension,
    /// Feature name → feature context (source-local).
    Feature,
    /// Identity name → identity context (source-local).
    Identity,
    /// Derived identity QName → identity context (statement-local on the
    /// base identity).
    DerivedIdentities,
    /// Typedef name → typedef context (tree-scoped at the defining parent).
    Typedef,
    /// Grouping name → grouping context (tree-scoped at the defining parent).
    Grouping,
    /// Child schema-node QName → child context (tree-scoped at the parent);
    /// the collision-detection namespace.
    ChildSchemaNodes,
}

/// Namespace keys. Which variant a namespace uses is fixed per
/// [`NamespaceKind`]; the store itself does not care.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NamespaceKey {
    Name(String),
    QName(QName),
    Module(ModuleId),
}

impl NamespaceKey {
    pub fn name(s: impl Into<String>) -> Self {
        NamespaceKey::Name(s.into())
    }
}

impl std::fmt::Display for NamespaceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NamespaceKey::Name(s) => write!(f, "{s}"),
            NamespaceKey::QName(q) => write!(f, "{q}"),
            NamespaceKey::Module(m) => write!(f, "{}", m.name),
        }
    }
}

/// One namespace binding: the bound context and where it was bound from.
#[derive(Debug, Clone)]
pub struct Binding {
    pub value: ContextId,
    pub sref: SourceRef,
}

/// A single-scope `(kind, key) → binding` store with bind-once semantics.
#[derive(Debug, Default)]
pub struct NamespaceStore {
    entries: BTreeMap<(NamespaceKind, NamespaceKey), Binding>,
}

impl NamespaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `key` unless already bound; on a duplicate, returns the
    /// existing binding and leaves the store unchanged.
    pub fn put_if_absent(
        &mut self,
        kind: NamespaceKind,
        key: NamespaceKey,
        value: ContextId,
        sref: SourceRef,
    ) -> Option<&Binding> {
        use std::collections::btree_map::Entry;
        match self.entries.entry((kind, key)) {
            Entry::Occupied(prev) => Some(prev.into_mut()),
            Entry::Vacant(slot) => {
                slot.insert(Binding { value, sref });
                None
            }
        }
    }

    pub fn get(&self, kind: NamespaceKind, key: &NamespaceKey) -> Option<&Binding> {
        // BTreeMap cannot borrow a pair key; clone is confined to lookups.
        self.entries.get(&(kind, key.clone()))
    }

    /// Snapshot of every binding of `kind`, in deterministic key order.
    pub fn get_all(&self, kind: NamespaceKind) -> BTreeMap<&NamespaceKey, &Binding> {
        self.entries
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|((_, key), binding)| (key, binding))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod namespace_tests {
    use super::*;

    fn sref(tag: &str) -> SourceRef {
        SourceRef::synthetic(tag)
    }

    #[test]
    fn put_if_absent_binds_once() {
        let mut store = NamespaceStore::new();
        let first = store.put_if_absent(
            NamespaceKind::Grouping,
            NamespaceKey::name("g"),
            ContextId::from_raw(1),
            sref("first"),
        );
        assert!(first.is_none());

        let prev = store
            .put_if_absent(
                NamespaceKind::Grouping,
                NamespaceKey::name("g"),
                ContextId::from_raw(2),
                sref("second"),
            )
            .expect("duplicate must surface the previous binding");
        // The store kept the original binding untouched.
        assert_eq!(prev.value, ContextId::from_raw(1));
        let current = store
            .get(NamespaceKind::Grouping, &NamespaceKey::name("g"))
            .unwrap();
        assert_eq!(current.value, ContextId::from_raw(1));
    }

    #[test]
    fn kinds_do_not_collide() {
        let mut store = NamespaceStore::new();
        store.put_if_absent(
            NamespaceKind::Grouping,
            NamespaceKey::name("x"),
            ContextId::from_raw(1),
            sref("grouping"),
        );
        let other = store.put_if_absent(
            NamespaceKind::Typedef,
            NamespaceKey::name("x"),
            ContextId::from_raw(2),
            sref("typedef"),
        );
        assert!(other.is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn get_all_is_ordered_and_filtered() {
        let mut store = NamespaceStore::new();
        for name in ["zeta", "alpha", "mid"] {
            store.put_if_absent(
                NamespaceKind::Feature,
                NamespaceKey::name(name),
                ContextId::from_raw(0),
                sref(name),
            );
        }
        store.put_if_absent(
            NamespaceKind::Typedef,
            NamespaceKey::name("other"),
            ContextId::from_raw(0),
            sref("other"),
        );
        let all: Vec<String> = store
            .get_all(NamespaceKind::Feature)
            .keys()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(all, ["alpha", "mid", "zeta"]);
    }
}
