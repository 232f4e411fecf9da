mod decode;

pub use decode::load_document;

use std::fmt;

pub use skein_runtime::document::{CURRENT_VERSION, MIN_COMPAT_VERSION};

// ── LoadError ───────────────────────────────────────────────────

/// Fatal errors produced while materializing a compiled document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The document's version predates the oldest supported format.
    VersionTooOld { found: u64 },
    /// The document was produced by a newer toolchain than this runtime.
    VersionTooNew { found: u64 },
    /// No `root` field.
    MissingRoot,
    /// Anything else structurally wrong with the document.
    Malformed(String),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::VersionTooOld { found } => write!(
                f,
                "document version {} is too old (minimum supported is {})",
                found, MIN_COMPAT_VERSION
            ),
            LoadError::VersionTooNew { found } => write!(
                f,
                "document version {} is newer than this runtime supports (maximum is {})",
                found, CURRENT_VERSION
            ),
            LoadError::MissingRoot => f.write_str("document has no root container"),
            LoadError::Malformed(msg) => write!(f, "malformed document: {}", msg),
        }
    }
}

impl std::error::Error for LoadError {}
