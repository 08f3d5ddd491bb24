//! Statement definition registry.
//!
//! The registry is the single source of truth for what a keyword *is*: its
//! [`StatementKind`], the shape of its argument, and the phases whose hooks
//! it participates in. It is fully populated before the build starts and the
//! engine never mutates it; definitions are pure data.
//!
//! Per-keyword behavior is not an open class hierarchy here: `StatementKind`
//! is a closed enum and the phase hooks dispatch on it (see
//! `reactor::hooks`). Capability queries (`is_data_definition`,
//! `is_augment_target`, ...) are predicates on the enum.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::name::{is_identifier, split_prefixed, QName, SchemaNodePath};
use crate::source::SourceRef;
use crate::{err_at, YantraError};

/// Global build phases, strictly ordered. Every source advances through
/// them in lockstep; a context's phase counter only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ModelPhase {
    Init,
    SourceLinkage,
    StatementDefinition,
    FullDeclaration,
    EffectiveModel,
}

impl ModelPhase {
    /// The phase sequence the reactor executes, `Init` excluded.
    pub const EXECUTION_ORDER: [ModelPhase; 4] = [
        ModelPhase::SourceLinkage,
        ModelPhase::StatementDefinition,
        ModelPhase::FullDeclaration,
        ModelPhase::EffectiveModel,
    ];
}

impl std::fmt::Display for ModelPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelPhase::Init => "INIT",
            ModelPhase::SourceLinkage => "SOURCE_LINKAGE",
            ModelPhase::StatementDefinition => "STATEMENT_DEFINITION",
            ModelPhase::FullDeclaration => "FULL_DECLARATION",
            ModelPhase::EffectiveModel => "EFFECTIVE_MODEL",
        };
        write!(f, "{name}")
    }
}

/// Closed set of statement kinds the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatementKind {
    Module,
    Submodule,
    YangVersion,
    NamespaceDecl,
    Prefix,
    Import,
    Include,
    RevisionDate,
    Revision,
    BelongsTo,
    Extension,
    ExtensionArgument,
    YinElement,
    Feature,
    IfFeature,
    Identity,
    Base,
    Typedef,
    Type,
    Units,
    Grouping,
    Uses,
    Augment,
    Refine,
    Container,
    Leaf,
    LeafList,
    List,
    Key,
    Choice,
    Case,
    Anydata,
    Rpc,
    Input,
    Output,
    Notification,
    Must,
    When,
    Default,
    Mandatory,
    Config,
    Presence,
    Status,
    Description,
    Reference,
    Deviation,
    Deviate,
    Unrecognized,
}

impl StatementKind {
    /// Data-definition statements: the kinds whose names claim a slot among
    /// sibling schema nodes.
    pub fn is_data_definition(self) -> bool {
        matches!(
            self,
            StatementKind::Container
                | StatementKind::Leaf
                | StatementKind::LeafList
                | StatementKind::List
                | StatementKind::Choice
                | StatementKind::Case
                | StatementKind::Anydata
        )
    }

    /// Schema-node statements: data definitions plus operation-shaped nodes,
    /// addressable by schema-node-identifier paths.
    pub fn is_schema_node(self) -> bool {
        self.is_data_definition()
            || matches!(
                self,
                StatementKind::Rpc
                    | StatementKind::Input
                    | StatementKind::Output
                    | StatementKind::Notification
            )
    }

    /// Kinds an `augment` may legally target.
    pub fn is_augment_target(self) -> bool {
        matches!(
            self,
            StatementKind::Container
                | StatementKind::List
                | StatementKind::Case
                | StatementKind::Input
                | StatementKind::Output
                | StatementKind::Notification
                | StatementKind::Choice
                | StatementKind::Rpc
        )
    }

    /// Property statements a `deviate`/`refine` may add, replace or delete.
    pub fn is_property(self) -> bool {
        matches!(
            self,
            StatementKind::Must
                | StatementKind::Default
                | StatementKind::Mandatory
                | StatementKind::Config
                | StatementKind::Presence
                | StatementKind::Units
                | StatementKind::Description
                | StatementKind::Reference
        )
    }
}

/// Declared shape of a statement's argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgumentShape {
    /// No argument allowed (`input`, `output`).
    None,
    /// A bare identifier (`grouping g`, `typedef t`).
    Identifier,
    /// An identifier that becomes module-qualified (`leaf x` in module `m`
    /// is `m:x`). These are the arguments the grafting engine rebinds when
    /// copying across a module boundary.
    QualifiedName,
    /// An optionally prefixed reference to something defined elsewhere
    /// (`uses p:g`, `type string`, `base idy`).
    PrefixedReference,
    /// A schema-node-identifier path (`augment /m:c/x`, `refine c/x`).
    SchemaPath,
    /// `true` or `false`.
    Boolean,
    /// One of the four deviate modes.
    DeviateMode,
    /// Free text (descriptions, musts, defaults, URIs, dates).
    Text,
}

/// The four `deviate` modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviateKind {
    NotSupported,
    Add,
    Replace,
    Delete,
}

/// A parsed statement argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Argument {
    None,
    Identifier(String),
    QName(QName),
    Reference { prefix: Option<String>, name: String },
    Path(SchemaNodePath),
    Boolean(bool),
    Deviate(DeviateKind),
    Text(String),
}

impl Argument {
    /// The raw text of this argument, when it has one.
    pub fn text(&self) -> Option<String> {
        match self {
            Argument::None => None,
            Argument::Identifier(s) | Argument::Text(s) => Some(s.clone()),
            Argument::QName(q) => Some(q.name.clone()),
            Argument::Reference { prefix, name } => Some(match prefix {
                Some(p) => format!("{p}:{name}"),
                None => name.clone(),
            }),
            Argument::Path(p) => Some(p.to_string()),
            Argument::Boolean(b) => Some(b.to_string()),
            Argument::Deviate(k) => Some(
                match k {
                    DeviateKind::NotSupported => "not-supported",
                    DeviateKind::Add => "add",
                    DeviateKind::Replace => "replace",
                    DeviateKind::Delete => "delete",
                }
                .to_string(),
            ),
        }
    }
}

/// Immutable definition of one statement keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementDefinition {
    pub kind: StatementKind,
    pub keyword: &'static str,
    pub shape: ArgumentShape,
    /// Phases this kind wants hook notifications for. The reactor skips
    /// kinds with no hook in the current phase.
    pub hook_phases: &'static [ModelPhase],
}

impl StatementDefinition {
    /// Parses a raw argument against this definition's shape.
    ///
    /// `module` is the defining module of the statement's root; it supplies
    /// the module part of `QualifiedName` arguments.
    pub fn parse_argument(
        &self,
        raw: Option<&str>,
        module: &str,
        sref: &SourceRef,
    ) -> Result<Argument, YantraError> {
        let arg = match (self.shape, raw) {
            (ArgumentShape::None, None) => Argument::None,
            (ArgumentShape::None, Some(_)) => {
                return Err(err_at!(
                    Argument,
                    format!("statement '{}' takes no argument", self.keyword),
                    sref
                ));
            }
            (_, None) => {
                return Err(err_at!(
                    Argument,
                    format!("statement '{}' requires an argument", self.keyword),
                    sref
                ));
            }
            (ArgumentShape::Identifier, Some(raw)) => {
                if !is_identifier(raw) {
                    return Err(err_at!(
                        Argument,
                        format!("'{raw}' is not a valid identifier for '{}'", self.keyword),
                        sref
                    ));
                }
                Argument::Identifier(raw.to_string())
            }
            (ArgumentShape::QualifiedName, Some(raw)) => {
                if !is_identifier(raw) {
                    return Err(err_at!(
                        Argument,
                        format!("'{raw}' is not a valid node name for '{}'", self.keyword),
                        sref
                    ));
                }
                Argument::QName(QName::new(module, raw))
            }
            (ArgumentShape::PrefixedReference, Some(raw)) => {
                let Some((prefix, name)) = split_prefixed(raw) else {
                    return Err(err_at!(
                        Argument,
                        format!("'{raw}' is not a valid reference for '{}'", self.keyword),
                        sref
                    ));
                };
                Argument::Reference {
                    prefix: prefix.map(str::to_string),
                    name: name.to_string(),
                }
            }
            (ArgumentShape::SchemaPath, Some(raw)) => match SchemaNodePath::parse(raw) {
                Ok(path) => Argument::Path(path),
                Err(why) => return Err(err_at!(Argument, why, sref)),
            },
            (ArgumentShape::Boolean, Some(raw)) => match raw {
                "true" => Argument::Boolean(true),
                "false" => Argument::Boolean(false),
                other => {
                    return Err(err_at!(
                        Argument,
                        format!("'{other}' is not a boolean (expected 'true' or 'false')"),
                        sref
                    ));
                }
            },
            (ArgumentShape::DeviateMode, Some(raw)) => match raw {
                "not-supported" => Argument::Deviate(DeviateKind::NotSupported),
                "add" => Argument::Deviate(DeviateKind::Add),
                "replace" => Argument::Deviate(DeviateKind::Replace),
                "delete" => Argument::Deviate(DeviateKind::Delete),
                other => {
                    return Err(err_at!(
                        Argument,
                        format!("'{other}' is not a deviate mode"),
                        sref
                    ));
                }
            },
            (ArgumentShape::Text, Some(raw)) => Argument::Text(raw.to_string()),
        };
        Ok(arg)
    }
}

// ============================================================================
// DEFAULT DEFINITION TABLE
// ============================================================================

use ModelPhase::{EffectiveModel, FullDeclaration, SourceLinkage, StatementDefinition as DefPhase};

const LINKAGE: &[ModelPhase] = &[SourceLinkage];
const DEFINITION: &[ModelPhase] = &[DefPhase];
const DECLARATION: &[ModelPhase] = &[FullDeclaration];
const EFFECTIVE: &[ModelPhase] = &[EffectiveModel];
const DECLARATION_EFFECTIVE: &[ModelPhase] = &[FullDeclaration, EffectiveModel];
const NO_HOOKS: &[ModelPhase] = &[];

#[rustfmt::skip]
const DEFINITIONS: &[StatementDefinition] = &[
    StatementDefinition { kind: StatementKind::Module,        keyword: "module",        shape: ArgumentShape::Identifier,        hook_phases: LINKAGE },
    StatementDefinition { kind: StatementKind::Submodule,     keyword: "submodule",     shape: ArgumentShape::Identifier,        hook_phases: LINKAGE },
    StatementDefinition { kind: StatementKind::YangVersion,   keyword: "yang-version",  shape: ArgumentShape::Text,              hook_phases: NO_HOOKS },
    StatementDefinition { kind: StatementKind::NamespaceDecl, keyword: "namespace",     shape: ArgumentShape::Text,              hook_phases: NO_HOOKS },
    StatementDefinition { kind: StatementKind::Prefix,        keyword: "prefix",        shape: ArgumentShape::Identifier,        hook_phases: NO_HOOKS },
    StatementDefinition { kind: StatementKind::Import,        keyword: "import",        shape: ArgumentShape::Identifier,        hook_phases: LINKAGE },
    StatementDefinition { kind: StatementKind::Include,       keyword: "include",       shape: ArgumentShape::Identifier,        hook_phases: LINKAGE },
    StatementDefinition { kind: StatementKind::RevisionDate,  keyword: "revision-date", shape: ArgumentShape::Text,              hook_phases: NO_HOOKS },
    StatementDefinition { kind: StatementKind::Revision,      keyword: "revision",      shape: ArgumentShape::Text,              hook_phases: NO_HOOKS },
    StatementDefinition { kind: StatementKind::BelongsTo,     keyword: "belongs-to",    shape: ArgumentShape::Identifier,        hook_phases: NO_HOOKS },
    StatementDefinition { kind: StatementKind::Extension,     keyword: "extension",     shape: ArgumentShape::Identifier,        hook_phases: DEFINITION },
    StatementDefinition { kind: StatementKind::ExtensionArgument, keyword: "argument",  shape: ArgumentShape::Identifier,        hook_phases: NO_HOOKS },
    StatementDefinition { kind: StatementKind::YinElement,    keyword: "yin-element",   shape: ArgumentShape::Boolean,           hook_phases: NO_HOOKS },
    StatementDefinition { kind: StatementKind::Feature,       keyword: "feature",       shape: ArgumentShape::Identifier,        hook_phases: DEFINITION },
    StatementDefinition { kind: StatementKind::IfFeature,     keyword: "if-feature",    shape: ArgumentShape::PrefixedReference, hook_phases: NO_HOOKS },
    StatementDefinition { kind: StatementKind::Identity,      keyword: "identity",      shape: ArgumentShape::Identifier,        hook_phases: DEFINITION },
    StatementDefinition { kind: StatementKind::Base,          keyword: "base",          shape: ArgumentShape::PrefixedReference, hook_phases: DEFINITION },
    StatementDefinition { kind: StatementKind::Typedef,       keyword: "typedef",       shape: ArgumentShape::Identifier,        hook_phases: DEFINITION },
    StatementDefinition { kind: StatementKind::Type,          keyword: "type",          shape: ArgumentShape::PrefixedReference, hook_phases: NO_HOOKS },
    StatementDefinition { kind: StatementKind::Units,         keyword: "units",         shape: ArgumentShape::Text,              hook_phases: NO_HOOKS },
    StatementDefinition { kind: StatementKind::Grouping,      keyword: "grouping",      shape: ArgumentShape::Identifier,        hook_phases: DEFINITION },
    StatementDefinition { kind: StatementKind::Uses,          keyword: "uses",          shape: ArgumentShape::PrefixedReference, hook_phases: DECLARATION },
    StatementDefinition { kind: StatementKind::Augment,       keyword: "augment",       shape: ArgumentShape::SchemaPath,        hook_phases: DECLARATION },
    StatementDefinition { kind: StatementKind::Refine,        keyword: "refine",        shape: ArgumentShape::SchemaPath,        hook_phases: NO_HOOKS },
    StatementDefinition { kind: StatementKind::Container,     keyword: "container",     shape: ArgumentShape::QualifiedName,     hook_phases: DECLARATION },
    StatementDefinition { kind: StatementKind::Leaf,          keyword: "leaf",          shape: ArgumentShape::QualifiedName,     hook_phases: DECLARATION },
    StatementDefinition { kind: StatementKind::LeafList,      keyword: "leaf-list",     shape: ArgumentShape::QualifiedName,     hook_phases: DECLARATION },
    StatementDefinition { kind: StatementKind::List,          keyword: "list",          shape: ArgumentShape::QualifiedName,     hook_phases: DECLARATION },
    StatementDefinition { kind: StatementKind::Key,           keyword: "key",           shape: ArgumentShape::Text,              hook_phases: NO_HOOKS },
    StatementDefinition { kind: StatementKind::Choice,        keyword: "choice",        shape: ArgumentShape::QualifiedName,     hook_phases: DECLARATION },
    StatementDefinition { kind: StatementKind::Case,          keyword: "case",          shape: ArgumentShape::QualifiedName,     hook_phases: DECLARATION },
    StatementDefinition { kind: StatementKind::Anydata,       keyword: "anydata",       shape: ArgumentShape::QualifiedName,     hook_phases: DECLARATION },
    StatementDefinition { kind: StatementKind::Rpc,           keyword: "rpc",           shape: ArgumentShape::QualifiedName,     hook_phases: DECLARATION_EFFECTIVE },
    StatementDefinition { kind: StatementKind::Input,         keyword: "input",         shape: ArgumentShape::None,              hook_phases: NO_HOOKS },
    StatementDefinition { kind: StatementKind::Output,        keyword: "output",        shape: ArgumentShape::None,              hook_phases: NO_HOOKS },
    StatementDefinition { kind: StatementKind::Notification,  keyword: "notification",  shape: ArgumentShape::QualifiedName,     hook_phases: DECLARATION },
    StatementDefinition { kind: StatementKind::Must,          keyword: "must",          shape: ArgumentShape::Text,              hook_phases: NO_HOOKS },
    StatementDefinition { kind: StatementKind::When,          keyword: "when",          shape: ArgumentShape::Text,              hook_phases: NO_HOOKS },
    StatementDefinition { kind: StatementKind::Default,       keyword: "default",       shape: ArgumentShape::Text,              hook_phases: NO_HOOKS },
    StatementDefinition { kind: StatementKind::Mandatory,     keyword: "mandatory",     shape: ArgumentShape::Boolean,           hook_phases: NO_HOOKS },
    StatementDefinition { kind: StatementKind::Config,        keyword: "config",        shape: ArgumentShape::Boolean,           hook_phases: NO_HOOKS },
    StatementDefinition { kind: StatementKind::Presence,      keyword: "presence",      shape: ArgumentShape::Text,              hook_phases: NO_HOOKS },
    StatementDefinition { kind: StatementKind::Status,        keyword: "status",        shape: ArgumentShape::Text,              hook_phases: NO_HOOKS },
    StatementDefinition { kind: StatementKind::Description,   keyword: "description",   shape: ArgumentShape::Text,              hook_phases: NO_HOOKS },
    StatementDefinition { kind: StatementKind::Reference,     keyword: "reference",     shape: ArgumentShape::Text,              hook_phases: NO_HOOKS },
    StatementDefinition { kind: StatementKind::Deviation,     keyword: "deviation",     shape: ArgumentShape::SchemaPath,        hook_phases: EFFECTIVE },
    StatementDefinition { kind: StatementKind::Deviate,       keyword: "deviate",       shape: ArgumentShape::DeviateMode,       hook_phases: NO_HOOKS },
];

const UNRECOGNIZED: StatementDefinition = StatementDefinition {
    kind: StatementKind::Unrecognized,
    keyword: "<unrecognized>",
    shape: ArgumentShape::Text,
    hook_phases: NO_HOOKS,
};

/// Immutable keyword → definition catalogue, supplied before the build.
#[derive(Debug, Clone)]
pub struct StatementRegistry {
    by_keyword: HashMap<&'static str, &'static StatementDefinition>,
    /// When set, unknown keywords resolve to the generic `Unrecognized`
    /// definition instead of failing; this is the extension escape hatch.
    tolerate_unknown: bool,
}

impl StatementRegistry {
    /// Builds a registry over the given definitions.
    pub fn new(defs: &'static [StatementDefinition], tolerate_unknown: bool) -> Self {
        let mut by_keyword = HashMap::with_capacity(defs.len());
        for def in defs {
            let prev = by_keyword.insert(def.keyword, def);
            assert!(prev.is_none(), "duplicate keyword '{}'", def.keyword);
        }
        Self {
            by_keyword,
            tolerate_unknown,
        }
    }

    /// Looks up a keyword; unknown keywords are a structural error unless
    /// the registry tolerates extensions.
    pub fn lookup(&self, keyword: &str, sref: &SourceRef) -> Result<&'static StatementDefinition, YantraError> {
        if let Some(def) = self.by_keyword.get(keyword) {
            return Ok(def);
        }
        if self.tolerate_unknown {
            return Ok(&UNRECOGNIZED);
        }
        Err(err_at!(
            Structural,
            format!("unknown statement keyword '{keyword}'"),
            sref,
            "register an extension-tolerant registry to accept unrecognized statements"
        ))
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.by_keyword.contains_key(keyword)
    }

    pub fn len(&self) -> usize {
        self.by_keyword.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_keyword.is_empty()
    }
}

static DEFAULT_REGISTRY: Lazy<StatementRegistry> =
    Lazy::new(|| StatementRegistry::new(DEFINITIONS, false));

static TOLERANT_REGISTRY: Lazy<StatementRegistry> =
    Lazy::new(|| StatementRegistry::new(DEFINITIONS, true));

/// The default statement catalogue: every keyword the engine knows, unknown
/// keywords rejected.
pub fn default_registry() -> &'static StatementRegistry {
    &DEFAULT_REGISTRY
}

/// Like [`default_registry`], but unknown keywords resolve to the generic
/// unrecognized-statement definition.
pub fn extension_tolerant_registry() -> &'static StatementRegistry {
    &TOLERANT_REGISTRY
}
