//! Source breakpoints and their reconciliation with the external debugger.

mod control;
mod reconcile;

pub use control::DebuggerControl;
pub use reconcile::BreakpointRegistry;

use crate::source::SourceIdentity;
use serde::{Deserialize, Serialize};

/// Client breakpoint request (DAP `SourceBreakpoint`). Line is optional on the wire, a request
/// without a positive line is malformed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointRequest {
    #[serde(default)]
    pub line: Option<i64>,
    #[serde(default)]
    pub column: Option<i64>,
}

impl BreakpointRequest {
    pub fn at_line(line: i64) -> Self {
        Self {
            line: Some(line),
            column: None,
        }
    }
}

/// Validated breakpoint request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedBreakpoint {
    pub source: SourceIdentity,
    pub line: u64,
    /// Carried through to the client, never part of breakpoint identity.
    pub column: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointState {
    /// Breakpoint is known to the debugger, `verified` is false when the debugger rejected it or
    /// did not confirm it.
    Tracked { verified: bool },
}

/// Breakpoint believed to be active on the external debugger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedBreakpoint {
    /// Identity inside a registry, stable across re-adds.
    pub id: u64,
    pub source: SourceIdentity,
    pub line: u64,
    pub column: Option<u64>,
    pub state: BreakpointState,
}

impl TrackedBreakpoint {
    pub fn is_verified(&self) -> bool {
        matches!(self.state, BreakpointState::Tracked { verified: true })
    }

    pub fn position(&self) -> BreakpointPosition {
        BreakpointPosition {
            line: self.line,
            source: self.source.as_str().to_string(),
        }
    }
}

/// Breakpoint location as the external debugger addresses it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BreakpointPosition {
    pub line: u64,
    pub source: String,
}
