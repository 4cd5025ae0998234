//! Source references and their canonical identity.
//!
//! Breakpoints are keyed by [`SourceIdentity`], the normalized name of a client source reference.
//! Every lookup into the breakpoint map goes through a [`SourceNormalizer`] exactly once.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw source reference as the client sends it (DAP `Source`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl SourceRef {
    pub fn from_path(path: impl Into<String>) -> Self {
        Self {
            name: None,
            path: Some(path.into()),
        }
    }

    pub fn from_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            path: None,
        }
    }
}

/// Normalized source name, the reconciliation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceIdentity(String);

impl SourceIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait SourceNormalizer: Send + Sync {
    /// Return canonical identity of a source, [`None`] if reference has nothing to identify by.
    fn normalize(&self, source: &SourceRef) -> Option<SourceIdentity>;
}

/// Identify sources by file name.
///
/// External debuggers address programs by the bare file name (`SRIM00.CBL`), so a client path
/// like `F:\SIGER\src\SRIM00.CBL` and a name `SRIM00.CBL` are the same source.
#[derive(Debug, Clone, Default)]
pub struct FileNameNormalizer {
    ignore_case: bool,
}

impl FileNameNormalizer {
    pub fn new(ignore_case: bool) -> Self {
        Self { ignore_case }
    }
}

impl SourceNormalizer for FileNameNormalizer {
    fn normalize(&self, source: &SourceRef) -> Option<SourceIdentity> {
        let raw = source
            .path
            .as_deref()
            .or(source.name.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())?;

        let unified = raw.replace('\\', "/");
        let file_name = unified
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())?;

        let name = if self.ignore_case {
            file_name.to_uppercase()
        } else {
            file_name.to_string()
        };
        Some(SourceIdentity::new(name))
    }
}
