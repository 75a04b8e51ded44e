//! Manifest format
//!
//! A manifest describes fault-producing operations for the static pass:
//! the kinds a program uses, and for every operation the kinds it declares
//! and a skeleton of its body (raises, calls and protected regions).
//!
//! ```toml
//! [[kinds]]
//! name = "QuotaExceeded"
//! family = "fault"
//!
//! [[operations]]
//! name = "upload"
//! declares = ["IOFailure"]
//! body = [
//!   { t = "Raise", kind = "IOFailure" },
//!   { t = "Protect", handlers = [
//!       { catch = { t = "Kind", kind = "QuotaExceeded" } },
//!     ], body = [{ t = "Call", operation = "reserve" }] },
//! ]
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::condition::Family;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub kinds: Vec<KindDecl>,
    #[serde(default)]
    pub operations: Vec<OperationDecl>,
}

/// A program-specific kind, added to the built-in ones
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindDecl {
    pub name: String,
    pub family: Family,
    /// Unchecked even though it is a fault
    #[serde(default)]
    pub exempt: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDecl {
    pub name: String,
    /// Kinds this operation lets escape to its callers
    #[serde(default)]
    pub declares: Vec<String>,
    #[serde(default)]
    pub body: Vec<Site>,
}

/// One fault-relevant point in an operation body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Site {
    Raise {
        kind: String,
    },
    Call {
        operation: String,
    },
    Protect {
        #[serde(default)]
        handlers: Vec<HandlerDecl>,
        #[serde(default)]
        body: Vec<Site>,
        #[serde(default)]
        cleanup: Vec<Site>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerDecl {
    pub catch: CatchDecl,
    /// What the handler itself raises or calls
    #[serde(default)]
    pub body: Vec<Site>,
}

/// Declared handler predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum CatchDecl {
    Kind { kind: String },
    OneOf { kinds: Vec<String> },
    Family { family: Family },
}

impl CatchDecl {
    /// Kind names this predicate refers to
    pub fn kind_names(&self) -> Vec<&str> {
        match self {
            CatchDecl::Kind { kind } => vec![kind.as_str()],
            CatchDecl::OneOf { kinds } => kinds.iter().map(String::as_str).collect(),
            CatchDecl::Family { .. } => Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid TOML manifest: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("unsupported manifest extension: {} (expected .json or .toml)", .0.display())]
    UnsupportedFormat(PathBuf),
}

impl Manifest {
    pub fn from_json_str(source: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ManifestError> {
        Ok(toml::from_str(source)?)
    }

    /// Load a manifest, choosing the format from the file extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let format = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);

        let parse: fn(&str) -> Result<Self, ManifestError> = match format.as_deref() {
            Some("json") => Self::from_json_str,
            Some("toml") => Self::from_toml_str,
            _ => return Err(ManifestError::UnsupportedFormat(path.to_path_buf())),
        };

        let source = fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        parse(&source)
    }

    pub fn operation(&self, name: &str) -> Option<&OperationDecl> {
        self.operations.iter().find(|op| op.name == name)
    }
}
