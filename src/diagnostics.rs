//! Unified, `miette`-based diagnostic system for the Yantra engine.
//!
//! Every failure mode of the build pipeline is represented by one variant of
//! [`YantraError`], matching the engine's error taxonomy:
//!
//! - **`Argument`**: malformed statement argument, raised at parse time.
//! - **`Structural`**: cardinality violations, disallowed substatements,
//!   naming collisions; raised at phase-completion validation.
//! - **`Reference`**: an `import`, `include`, `uses`, `base` or path-valued
//!   statement whose target never appeared; only raised once the relevant
//!   phase has fully completed, so forward references are never mistaken
//!   for errors.
//! - **`Grafting`**: disallowed augment target, cross-module mandatory
//!   augmentation, incompatible refine.
//! - **`SchedulerInvariant`**: internal engine errors (an action neither
//!   applied nor failed by phase end). Statement-definition authors should
//!   never see these.
//!
//! # Error Construction Macros
//!
//! - **Use `err_msg!` for message-only errors.**
//!   - `err_msg!(Reference, "module '{}' not found", name)`
//!
//! - **Use `err_at!` for errors anchored at a [`SourceRef`].**
//!   - `err_at!(Structural, msg, source_ref)`
//!   - `err_at!(Structural, msg, source_ref, help)`
//!
//! - **Use `err_related!` when a second location must be named** (e.g. a
//!   naming collision reporting both the new and the previously-bound
//!   definition).
//!
//! Pass a `SourceRef` directly; the macros handle the conversion into an
//! [`ErrorContext`], including the synthetic-origin case where no backing
//! text exists. Never construct `ErrorContext` by hand outside this module.
//!
//! [`SourceRef`]: crate::source::SourceRef

use std::sync::Arc;

use miette::{Diagnostic, LabeledSpan, NamedSource, SourceCode};
use thiserror::Error;

use crate::source::Span;

/// Shared handle to a named source text, cheap to clone into error contexts.
pub type SourceArc = Arc<NamedSource<String>>;

/// Type-safe classification of [`YantraError`] variants, used by tests and
/// callers that dispatch on error class without string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Argument,
    Structural,
    Reference,
    Grafting,
    SchedulerInvariant,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Argument => "Argument",
            ErrorClass::Structural => "Structural",
            ErrorClass::Reference => "Reference",
            ErrorClass::Grafting => "Grafting",
            ErrorClass::SchedulerInvariant => "SchedulerInvariant",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single additional label for multi-span diagnostics (e.g. the
/// previously-bound location in a naming collision).
#[derive(Debug)]
pub struct RelatedLabel {
    pub source: SourceArc,
    pub span: Span,
    pub label: String,
}

/// Minimal, composable error context for diagnostics.
#[derive(Debug, Default)]
pub struct ErrorContext {
    /// The primary source for this error (if any).
    pub source: Option<SourceArc>,
    /// The primary span for this error (if any).
    pub span: Option<Span>,
    /// An optional help message.
    pub help: Option<String>,
    /// Additional labeled spans for multi-label diagnostics.
    pub related: Vec<RelatedLabel>,
}

impl ErrorContext {
    /// Returns an empty error context (no source, span, or help).
    pub fn none() -> Self {
        Self::default()
    }

    /// Creates a context with both source and span.
    pub fn with_source_and_span(source: SourceArc, span: Span) -> Self {
        Self {
            source: Some(source),
            span: Some(span),
            help: None,
            related: vec![],
        }
    }

    /// Attaches a help message, consuming and returning the context.
    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Attaches an additional labeled span.
    pub fn related(mut self, label: RelatedLabel) -> Self {
        self.related.push(label);
        self
    }
}

/// Unified error type for all Yantra engine failure modes.
#[derive(Debug, Error)]
pub enum YantraError {
    #[error("Argument error: {message}")]
    Argument { message: String, ctx: ErrorContext },
    #[error("Structural error: {message}")]
    Structural { message: String, ctx: ErrorContext },
    #[error("Reference error: {message}")]
    Reference { message: String, ctx: ErrorContext },
    #[error("Grafting error: {message}")]
    Grafting { message: String, ctx: ErrorContext },
    #[error("Scheduler invariant violated: {message}")]
    SchedulerInvariant { message: String, ctx: ErrorContext },
}

impl YantraError {
    fn parts(&self) -> (&str, &ErrorContext) {
        match self {
            YantraError::Argument { message, ctx }
            | YantraError::Structural { message, ctx }
            | YantraError::Reference { message, ctx }
            | YantraError::Grafting { message, ctx }
            | YantraError::SchedulerInvariant { message, ctx } => (message, ctx),
        }
    }

    /// Returns the type-safe classification for this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            YantraError::Argument { .. } => ErrorClass::Argument,
            YantraError::Structural { .. } => ErrorClass::Structural,
            YantraError::Reference { .. } => ErrorClass::Reference,
            YantraError::Grafting { .. } => ErrorClass::Grafting,
            YantraError::SchedulerInvariant { .. } => ErrorClass::SchedulerInvariant,
        }
    }

    /// The bare message, without the class prefix.
    pub fn message(&self) -> &str {
        self.parts().0
    }
}

impl Diagnostic for YantraError {
    fn code<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        Some(Box::new(format!(
            "yantra::{}",
            self.class().as_str().to_lowercase()
        )))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        self.parts()
            .1
            .help
            .as_ref()
            .map(|h| Box::new(h) as Box<dyn std::fmt::Display + 'a>)
    }

    fn source_code(&self) -> Option<&dyn SourceCode> {
        self.parts()
            .1
            .source
            .as_ref()
            .map(|s| s.as_ref() as &dyn SourceCode)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        let (message, ctx) = self.parts();
        let mut labels = Vec::new();
        if let Some(span) = ctx.span {
            let len = if span.end > span.start {
                span.end - span.start
            } else {
                1
            };
            labels.push(LabeledSpan::new(Some(message.to_string()), span.start, len));
        }
        for rel in &ctx.related {
            let len = if rel.span.end > rel.span.start {
                rel.span.end - rel.span.start
            } else {
                1
            };
            labels.push(LabeledSpan::new(
                Some(rel.label.clone()),
                rel.span.start,
                len,
            ));
        }
        if labels.is_empty() {
            None
        } else {
            Some(Box::new(labels.into_iter()))
        }
    }
}

/// Converts a name and text into a [`SourceArc`] for use in error contexts.
pub fn to_error_source(name: impl AsRef<str>, text: impl Into<String>) -> SourceArc {
    Arc::new(NamedSource::new(name.as_ref(), text.into()))
}

/// Constructs a [`YantraError`] variant with a formatted message and no
/// positional context.
#[macro_export]
macro_rules! err_msg {
    ($variant:ident, $msg:expr) => {
        $crate::YantraError::$variant {
            message: format!("{}", $msg),
            ctx: $crate::diagnostics::ErrorContext::none(),
        }
    };
    ($variant:ident, $msg:expr, $($arg:expr),+) => {
        $crate::YantraError::$variant {
            message: format!($msg, $($arg),+),
            ctx: $crate::diagnostics::ErrorContext::none(),
        }
    };
}

/// Constructs a [`YantraError`] variant anchored at a `SourceRef`.
///
/// The reference is converted into an [`ErrorContext`]; synthetic references
/// contribute their origin description as a help line instead of a span.
#[macro_export]
macro_rules! err_at {
    ($variant:ident, $msg:expr, $sref:expr) => {
        $crate::YantraError::$variant {
            message: $msg.to_string(),
            ctx: $sref.error_context(),
        }
    };
    ($variant:ident, $msg:expr, $sref:expr, $help:expr) => {
        $crate::YantraError::$variant {
            message: $msg.to_string(),
            ctx: $sref.error_context().help(format!("{}", $help)),
        }
    };
}

/// Constructs a [`YantraError`] with a primary location and one related
/// location, used for collision diagnostics that must name both sites.
#[macro_export]
macro_rules! err_related {
    ($variant:ident, $msg:expr, $sref:expr, $other:expr, $label:expr) => {{
        let ctx = match $other.related_label($label) {
            Some(rel) => $sref.error_context().related(rel),
            None => $sref.error_context().help(format!("{}: {}", $label, $other)),
        };
        $crate::YantraError::$variant {
            message: $msg.to_string(),
            ctx,
        }
    }};
}

#[cfg(test)]
mod diagnostics_tests {
    use miette::Report;

    use super::*;
    use crate::source::SourceRef;

    fn sample_source() -> SourceArc {
        to_error_source("m1.yang", "module m1 { leaf x; leaf x; }")
    }

    #[test]
    fn collision_error_carries_both_labels() {
        let src = sample_source();
        let here = SourceRef::text(src.clone(), Span { start: 20, end: 26 });
        let there = SourceRef::text(src, Span { start: 12, end: 18 });
        let err = err_related!(
            Structural,
            "duplicate child name 'x'",
            here,
            there,
            "previously bound here"
        );
        let output = format!("{:?}", Report::new(err));
        assert!(output.contains("duplicate child name 'x'"));
        assert!(output.contains("previously bound here"));
    }

    #[test]
    fn synthetic_ref_degrades_to_help_text() {
        let here = SourceRef::synthetic("implicit input statement");
        let err = err_at!(Grafting, "cannot refine here", here);
        let output = format!("{:?}", Report::new(err));
        assert!(output.contains("cannot refine here"));
        assert!(output.contains("implicit input statement"));
    }

    #[test]
    fn class_matches_variant() {
        let err = err_msg!(Reference, "module '{}' not found", "m9");
        assert_eq!(err.class(), ErrorClass::Reference);
        assert_eq!(err.message(), "module 'm9' not found");
    }
}
