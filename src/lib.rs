pub use crate::diagnostics::{to_error_source, ErrorClass, ErrorContext, SourceArc, YantraError};
pub use crate::reactor::{ModelBuild, StatementReactor};

pub mod context;
pub mod diagnostics;
pub mod effective;
mod graft;
pub mod name;
pub mod namespace;
pub mod reactor;
pub mod registry;
pub mod scheduler;
pub mod source;
