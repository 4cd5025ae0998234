use crate::breakpoint::BreakpointPosition;
use crate::error::Error;

/// Breakpoint commands of an external debugger.
///
/// Calls come from several threads at once while a reconciliation phase is in flight.
pub trait DebuggerControl: Send + Sync {
    /// Set a breakpoint. Return `true` if the debugger confirmed it, `false` if it refused or
    /// said nothing. An error means the command didn't get through.
    fn add_breakpoint(&self, position: &BreakpointPosition) -> Result<bool, Error>;

    /// Remove a breakpoint.
    fn remove_breakpoint(&self, position: &BreakpointPosition) -> Result<(), Error>;
}
