use crate::breakpoint::{BreakpointRequest, TrackedBreakpoint};
use crate::source::SourceRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use strum_macros::Display;

/// DAP request envelope.
#[derive(Debug, Deserialize)]
pub struct DapRequest {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: String,
    pub command: String,
    #[serde(default)]
    pub arguments: Value,
}

/// DAP response envelope.
///
/// Note: DAP allows responses with no `body` field at all.
/// Using a `serde_json::Value` keeps the envelope stable and avoids type
/// inference issues around `None` bodies.
#[derive(Debug, Serialize)]
pub struct DapResponse {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// DAP event envelope.
#[derive(Debug, Serialize)]
pub struct DapEvent {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum StopReason {
    #[strum(serialize = "entry")]
    Entry,
    #[strum(serialize = "breakpoint")]
    Breakpoint,
    #[strum(serialize = "step")]
    Step,
}

#[derive(Debug, Clone)]
pub enum InternalEvent {
    Stopped {
        reason: StopReason,
        description: Option<String>,
    },
    Exited {
        code: i32,
    },
    Output {
        category: &'static str,
        output: String,
    },
}

/// Arguments of a `launch` request.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchArguments {
    pub program: String,
    /// Debugger executable, configured one is used if absent.
    #[serde(default)]
    pub debugger: Option<String>,
    #[serde(default)]
    pub debugger_args: Option<Vec<String>>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub dialect: Option<String>,
    #[serde(default)]
    pub stop_on_entry: bool,
    /// Target path prefix to client path prefix.
    #[serde(default)]
    pub source_map: HashMap<String, String>,
}

/// Arguments of a `setBreakpoints` request.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct SetBreakpointsArguments {
    #[serde(default)]
    pub source: SourceRef,
    #[serde(default)]
    pub breakpoints: Option<Vec<BreakpointRequest>>,
    /// Deprecated form, used only if `breakpoints` is absent.
    #[serde(default)]
    pub lines: Option<Vec<i64>>,
}

impl SetBreakpointsArguments {
    pub fn requests(&self) -> Vec<BreakpointRequest> {
        match (&self.breakpoints, &self.lines) {
            (Some(breakpoints), _) => breakpoints.clone(),
            (None, Some(lines)) => lines.iter().map(|&l| BreakpointRequest::at_line(l)).collect(),
            (None, None) => vec![],
        }
    }
}

/// DAP `Breakpoint` of a `setBreakpoints` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointBody {
    pub id: u64,
    pub verified: bool,
    pub line: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub source: SourceRef,
}

impl BreakpointBody {
    pub fn new(bp: &TrackedBreakpoint, source: &SourceRef) -> Self {
        Self {
            id: bp.id,
            verified: bp.is_verified(),
            line: bp.line,
            column: bp.column,
            message: (!bp.is_verified()).then(|| "breakpoint not confirmed by debugger".to_string()),
            source: source.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_breakpoints_arguments() {
        let args: SetBreakpointsArguments = serde_json::from_value(json!({
            "source": {"path": "/src/PROG.CBL"},
            "breakpoints": [{"line": 10}, {"line": 20, "column": 8}, {}],
            "lines": [1, 2, 3],
        }))
        .unwrap();
        let requests = args.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].column, Some(8));
        assert_eq!(requests[2].line, None);

        let args: SetBreakpointsArguments = serde_json::from_value(json!({
            "source": {"name": "PROG.CBL"},
            "lines": [5],
        }))
        .unwrap();
        assert_eq!(args.requests(), vec![BreakpointRequest::at_line(5)]);
    }

    #[test]
    fn test_launch_arguments() {
        let args: LaunchArguments = serde_json::from_value(json!({
            "program": "PROG",
            "debuggerArgs": ["-d"],
            "stopOnEntry": true,
            "sourceMap": {"/remote": "/local"},
        }))
        .unwrap();
        assert_eq!(args.program, "PROG");
        assert_eq!(args.debugger_args, Some(vec!["-d".to_string()]));
        assert!(args.stop_on_entry);
        assert_eq!(args.source_map["/remote"], "/local");

        assert!(serde_json::from_value::<LaunchArguments>(json!({"cwd": "/tmp"})).is_err());
    }
}
