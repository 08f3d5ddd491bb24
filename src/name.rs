//! Qualified names and schema-node-identifier paths.
//!
//! A build-time [`QName`] pairs the defining module's name with a local
//! identifier. Grafting across module boundaries rebinds the module part so
//! identifiers introduced by a reused grouping resolve in the using module;
//! see [`QName::rebound`].

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    /// YANG identifier shape: leading letter or underscore, then letters,
    /// digits, underscores, hyphens and dots.
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").unwrap();
}

/// Returns true if `s` is a well-formed identifier.
pub fn is_identifier(s: &str) -> bool {
    IDENTIFIER.is_match(s)
}

/// Splits a possibly prefixed name (`p:x` or `x`) into its parts.
///
/// Returns `None` when either part is not a well-formed identifier or when
/// more than one colon is present.
pub fn split_prefixed(s: &str) -> Option<(Option<&str>, &str)> {
    let mut parts = s.splitn(3, ':');
    let first = parts.next()?;
    match (parts.next(), parts.next()) {
        (None, _) => is_identifier(first).then_some((None, first)),
        (Some(second), None) => {
            (is_identifier(first) && is_identifier(second)).then_some((Some(first), second))
        }
        _ => None,
    }
}

/// A module-qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QName {
    pub module: String,
    pub name: String,
}

impl QName {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }

    /// The same local name, qualified in a different module. Used by the
    /// grafting engine when a grouping is instantiated across a module
    /// boundary.
    pub fn rebound(&self, module: &str) -> Self {
        Self {
            module: module.to_string(),
            name: self.name.clone(),
        }
    }
}

impl std::fmt::Display for QName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.module, self.name)
    }
}

/// One step of a schema-node-identifier: an optionally prefixed node name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStep {
    pub prefix: Option<String>,
    pub name: String,
}

impl std::fmt::Display for PathStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.prefix {
            Some(p) => write!(f, "{}:{}", p, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A parsed schema-node-identifier (`/a:b/c` absolute, `b/c` descendant).
///
/// `augment` arguments at module level must be absolute; `augment` under a
/// `uses` and `refine` arguments must be descendant paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaNodePath {
    pub absolute: bool,
    pub steps: Vec<PathStep>,
}

impl SchemaNodePath {
    /// Parses a schema-node-identifier, reporting malformed steps by text.
    pub fn parse(text: &str) -> Result<Self, String> {
        let (absolute, rest) = match text.strip_prefix('/') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        if rest.is_empty() {
            return Err(format!("empty schema node identifier '{text}'"));
        }
        let mut steps = Vec::new();
        for part in rest.split('/') {
            let Some((prefix, name)) = split_prefixed(part) else {
                return Err(format!("malformed path step '{part}' in '{text}'"));
            };
            steps.push(PathStep {
                prefix: prefix.map(str::to_string),
                name: name.to_string(),
            });
        }
        Ok(Self { absolute, steps })
    }
}

impl std::fmt::Display for SchemaNodePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if self.absolute || i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{step}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod name_tests {
    use super::*;

    #[test]
    fn identifier_shapes() {
        assert!(is_identifier("leaf-x"));
        assert!(is_identifier("_a.b"));
        assert!(!is_identifier("9x"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a b"));
    }

    #[test]
    fn prefixed_split() {
        assert_eq!(split_prefixed("p:x"), Some((Some("p"), "x")));
        assert_eq!(split_prefixed("x"), Some((None, "x")));
        assert_eq!(split_prefixed("a:b:c"), None);
        assert_eq!(split_prefixed(":x"), None);
    }

    #[test]
    fn path_parse_round_trip() {
        let p = SchemaNodePath::parse("/m:c/leaf-x").unwrap();
        assert!(p.absolute);
        assert_eq!(p.steps.len(), 2);
        assert_eq!(p.to_string(), "/m:c/leaf-x");

        let d = SchemaNodePath::parse("c/x").unwrap();
        assert!(!d.absolute);
        assert_eq!(d.to_string(), "c/x");
    }

    #[test]
    fn path_parse_rejects_malformed() {
        assert!(SchemaNodePath::parse("/").is_err());
        assert!(SchemaNodePath::parse("/m::x").is_err());
        assert!(SchemaNodePath::parse("").is_err());
    }

    #[test]
    fn rebound_changes_only_module() {
        let q = QName::new("m1", "x");
        let r = q.rebound("m2");
        assert_eq!(r, QName::new("m2", "x"));
        assert_eq!(q.name, r.name);
    }
}
