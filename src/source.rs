//! Source positions and the statement-stream interface.
//!
//! The lexer that turns concrete text into statements lives outside this
//! crate. What the reactor consumes is a [`StatementSource`]: something able
//! to replay its statement tree into a [`StatementWriter`] at three levels
//! of detail, so the reactor can incrementally unlock more of a source as
//! global phases allow more semantics to be known.
//!
//! [`ModuleBuilder`] is the in-crate source implementation. It accepts raw
//! `keyword / argument / substatements` tuples and, as a side effect,
//! renders them into a canonical text form, so every diagnostic raised
//! against a built module carries a real, underlineable span even though no
//! file was ever parsed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::diagnostics::{to_error_source, ErrorContext, RelatedLabel, SourceArc};
use crate::YantraError;

/// A half-open byte range in a source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Where a statement came from: a span in a named text, or a synthetic
/// origin for statements the engine manufactures (implicit `input`/`output`,
/// for instance). Grafted copies keep the ref of the statement they were
/// copied from.
#[derive(Debug, Clone)]
pub enum SourceRef {
    Text { source: SourceArc, span: Span },
    Synthetic { origin: Arc<str> },
}

impl SourceRef {
    pub fn text(source: SourceArc, span: Span) -> Self {
        SourceRef::Text { source, span }
    }

    pub fn synthetic(origin: impl AsRef<str>) -> Self {
        SourceRef::Synthetic {
            origin: Arc::from(origin.as_ref()),
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            SourceRef::Text { span, .. } => Some(*span),
            SourceRef::Synthetic { .. } => None,
        }
    }

    /// Converts this reference into a diagnostic context. Synthetic refs
    /// have no text to underline; their origin becomes a help line.
    pub fn error_context(&self) -> ErrorContext {
        match self {
            SourceRef::Text { source, span } => {
                ErrorContext::with_source_and_span(source.clone(), *span)
            }
            SourceRef::Synthetic { origin } => {
                ErrorContext::none().help(format!("origin: {origin}"))
            }
        }
    }

    /// A secondary label pointing at this reference, when it has backing
    /// text to label.
    pub fn related_label(&self, label: impl Into<String>) -> Option<RelatedLabel> {
        match self {
            SourceRef::Text { source, span } => Some(RelatedLabel {
                source: source.clone(),
                span: *span,
                label: label.into(),
            }),
            SourceRef::Synthetic { .. } => None,
        }
    }
}

impl std::fmt::Display for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceRef::Text { source, span } => {
                write!(f, "{}@{}..{}", source.name(), span.start, span.end)
            }
            SourceRef::Synthetic { origin } => write!(f, "synthetic({origin})"),
        }
    }
}

/// Identity of a root source: module (or submodule) name, its namespace URI
/// and latest revision. This is the addressing key other sources use for
/// `import`/`include`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId {
    pub name: String,
    pub namespace: String,
    pub revision: Option<String>,
}

/// How much of a source the reactor is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteLevel {
    /// Module/submodule identity, imports/includes, namespace/prefix.
    Linkage,
    /// Linkage plus typedefs, groupings, extensions, identities, features.
    Definitions,
    /// The complete statement tree.
    Full,
}

/// Sink the reactor hands to a source during each phase walk.
///
/// `child_index` is the statement's position among its parent's children in
/// the *full* tree, stable across write levels; the reactor uses it to
/// extend the declared tree instead of duplicating statements already
/// written during an earlier, coarser walk.
pub trait StatementWriter {
    fn start_statement(
        &mut self,
        child_index: usize,
        keyword: &str,
        raw_argument: Option<&str>,
        sref: SourceRef,
    ) -> Result<(), YantraError>;

    fn end_statement(&mut self) -> Result<(), YantraError>;
}

/// One registered source file, replayable at three levels of detail.
pub trait StatementSource {
    /// Stable name used in diagnostics and registration-order reporting.
    fn name(&self) -> &str;

    fn write_linkage(&self, writer: &mut dyn StatementWriter) -> Result<(), YantraError>;

    fn write_linkage_and_definitions(
        &self,
        writer: &mut dyn StatementWriter,
    ) -> Result<(), YantraError>;

    fn write_full(&self, writer: &mut dyn StatementWriter) -> Result<(), YantraError>;
}

// ============================================================================
// RAW STATEMENTS AND THE MODULE BUILDER
// ============================================================================

/// One as-written statement tuple.
#[derive(Debug, Clone)]
pub struct RawStatement {
    pub keyword: String,
    pub argument: Option<String>,
    pub span: Span,
    pub children: Vec<RawStatement>,
}

const LINKAGE_KEYWORDS: &[&str] = &[
    "module",
    "submodule",
    "namespace",
    "prefix",
    "yang-version",
    "import",
    "include",
    "revision",
    "revision-date",
    "belongs-to",
];

const DEFINITION_KEYWORDS: &[&str] = &[
    "extension",
    "argument",
    "yin-element",
    "feature",
    "identity",
    "typedef",
    "grouping",
    "base",
    "type",
    "units",
    "default",
    "status",
    "description",
    "reference",
    "if-feature",
];

fn relevant_at(keyword: &str, level: WriteLevel, depth_in_grouping: bool) -> bool {
    match level {
        WriteLevel::Full => true,
        WriteLevel::Linkage => LINKAGE_KEYWORDS.contains(&keyword),
        WriteLevel::Definitions => {
            // Grouping bodies are replayed in full so nested typedefs and
            // groupings become addressable before any grafting starts.
            depth_in_grouping
                || LINKAGE_KEYWORDS.contains(&keyword)
                || DEFINITION_KEYWORDS.contains(&keyword)
        }
    }
}

/// Fluent builder for an in-memory module source.
///
/// Statements are appended in source order; `open`/`close` manage nesting.
/// The builder renders each statement into the module's canonical text as it
/// goes, assigning the span later used for diagnostics.
///
/// # Example
///
/// ```rust
/// use yantra::source::{ModuleBuilder, StatementSource};
/// let source = ModuleBuilder::module("m1")
///     .stmt("namespace", Some("urn:m1"))
///     .stmt("prefix", Some("m1"))
///     .open("container", Some("c"))
///     .stmt("leaf", Some("x"))
///     .close()
///     .into_source();
/// assert_eq!(source.name(), "m1");
/// ```
#[derive(Debug)]
pub struct ModuleBuilder {
    name: String,
    text: String,
    root: RawStatement,
    /// Indices into the raw tree, innermost open statement last.
    open_path: Vec<usize>,
}

impl ModuleBuilder {
    /// Starts a `module <name>` source.
    pub fn module(name: &str) -> Self {
        Self::new_root("module", name)
    }

    /// Starts a `submodule <name>` source.
    pub fn submodule(name: &str) -> Self {
        Self::new_root("submodule", name)
    }

    fn new_root(keyword: &str, name: &str) -> Self {
        let mut text = String::new();
        let span = render(&mut text, 0, keyword, Some(name), true);
        Self {
            name: name.to_string(),
            text,
            root: RawStatement {
                keyword: keyword.to_string(),
                argument: Some(name.to_string()),
                span,
                children: vec![],
            },
            open_path: vec![],
        }
    }

    fn current(&mut self) -> &mut RawStatement {
        let mut stmt = &mut self.root;
        for &i in &self.open_path {
            stmt = &mut stmt.children[i];
        }
        stmt
    }

    fn depth(&self) -> usize {
        self.open_path.len() + 1
    }

    /// Appends a childless statement (`keyword arg;`).
    pub fn stmt(mut self, keyword: &str, argument: Option<&str>) -> Self {
        let depth = self.depth();
        let span = render(&mut self.text, depth, keyword, argument, false);
        self.current().children.push(RawStatement {
            keyword: keyword.to_string(),
            argument: argument.map(str::to_string),
            span,
            children: vec![],
        });
        self
    }

    /// Appends a statement and makes it the insertion point (`keyword arg {`).
    pub fn open(mut self, keyword: &str, argument: Option<&str>) -> Self {
        let depth = self.depth();
        let span = render(&mut self.text, depth, keyword, argument, true);
        let cur = self.current();
        cur.children.push(RawStatement {
            keyword: keyword.to_string(),
            argument: argument.map(str::to_string),
            span,
            children: vec![],
        });
        let idx = cur.children.len() - 1;
        self.open_path.push(idx);
        self
    }

    /// Closes the innermost open statement.
    ///
    /// Underflow is a builder usage bug and panics; builders only run in
    /// test and setup code.
    pub fn close(mut self) -> Self {
        assert!(
            self.open_path.pop().is_some(),
            "ModuleBuilder::close() without matching open()"
        );
        let indent = "  ".repeat(self.depth());
        self.text.push_str(&indent);
        self.text.push_str("}\n");
        self
    }

    /// Finishes the build, closing any statements still open.
    pub fn into_source(mut self) -> ModuleSource {
        while !self.open_path.is_empty() {
            self = self.close();
        }
        self.text.push_str("}\n");
        let file = format!("{}.yang", self.name);
        ModuleSource {
            name: self.name,
            source: to_error_source(file, self.text),
            root: self.root,
        }
    }
}

/// Appends one rendered statement line to `text`, returning the span of its
/// `keyword argument` head.
fn render(
    text: &mut String,
    depth: usize,
    keyword: &str,
    argument: Option<&str>,
    opens: bool,
) -> Span {
    text.push_str(&"  ".repeat(depth));
    let start = text.len();
    text.push_str(keyword);
    if let Some(arg) = argument {
        text.push(' ');
        if arg.chars().any(|c| c.is_whitespace() || c == ';') {
            text.push('"');
            text.push_str(arg);
            text.push('"');
        } else {
            text.push_str(arg);
        }
    }
    let end = text.len();
    text.push_str(if opens { " {\n" } else { ";\n" });
    Span { start, end }
}

/// An immutable, replayable in-memory source produced by [`ModuleBuilder`].
#[derive(Debug, Clone)]
pub struct ModuleSource {
    name: String,
    source: SourceArc,
    root: RawStatement,
}

impl ModuleSource {
    pub fn source_text(&self) -> &SourceArc {
        &self.source
    }

    fn write_at(&self, writer: &mut dyn StatementWriter, level: WriteLevel) -> Result<(), YantraError> {
        self.write_stmt(writer, &self.root, 0, level, false)
    }

    fn write_stmt(
        &self,
        writer: &mut dyn StatementWriter,
        stmt: &RawStatement,
        child_index: usize,
        level: WriteLevel,
        in_grouping: bool,
    ) -> Result<(), YantraError> {
        writer.start_statement(
            child_index,
            &stmt.keyword,
            stmt.argument.as_deref(),
            SourceRef::text(self.source.clone(), stmt.span),
        )?;
        let inside = in_grouping || stmt.keyword == "grouping";
        for (i, child) in stmt.children.iter().enumerate() {
            if relevant_at(&child.keyword, level, inside) {
                self.write_stmt(writer, child, i, level, inside)?;
            }
        }
        writer.end_statement()
    }
}

impl StatementSource for ModuleSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_linkage(&self, writer: &mut dyn StatementWriter) -> Result<(), YantraError> {
        self.write_at(writer, WriteLevel::Linkage)
    }

    fn write_linkage_and_definitions(
        &self,
        writer: &mut dyn StatementWriter,
    ) -> Result<(), YantraError> {
        self.write_at(writer, WriteLevel::Definitions)
    }

    fn write_full(&self, writer: &mut dyn StatementWriter) -> Result<(), YantraError> {
        self.write_at(writer, WriteLevel::Full)
    }
}
