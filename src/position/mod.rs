//! Execution position extraction from raw debugger output.

mod grammar;
pub mod registry;

pub use grammar::{CommandGrammar, LINE_NUMBER_CAPTURE, PATH_CAPTURE};
pub use registry::{CommandRegistry, CommandTemplates, Dialect};

/// Place where the external debugger stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugPosition {
    /// Path as the debugger printed it.
    pub file: String,
    pub line: u64,
    /// Whole output chunk the position was found in.
    pub raw_output: String,
}

/// Find execution position in a chunk of debugger output.
///
/// Grammar is applied to every physical line of `text`, lines that don't match (variable dumps,
/// monitor traces, source echo) are skipped. If several lines announce a position the last one
/// wins, it is the most recent. Return [`None`] if there is no position in the chunk, caller
/// should keep buffering output in that case.
pub fn match_position(grammar: &CommandGrammar, text: &str) -> Option<DebugPosition> {
    text.lines()
        .filter_map(|line| {
            let captures = grammar.pattern().captures(line)?;
            let file = captures.name(PATH_CAPTURE)?.as_str();
            if file.is_empty() {
                return None;
            }
            let line = captures
                .name(LINE_NUMBER_CAPTURE)?
                .as_str()
                .parse::<u64>()
                .ok()?;
            Some((file, line))
        })
        .last()
        .map(|(file, line)| DebugPosition {
            file: file.to_string(),
            line,
            raw_output: text.to_string(),
        })
}
