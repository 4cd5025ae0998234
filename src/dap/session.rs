use crate::breakpoint::{BreakpointRegistry, BreakpointRequest};
use crate::config::Settings;
use crate::dap::io::DapTransport;
use crate::dap::protocol::{
    BreakpointBody, DapEvent, DapRequest, DapResponse, InternalEvent, LaunchArguments,
    SetBreakpointsArguments, StopReason,
};
use crate::dap::sourcemap::SourceMap;
use crate::debugger::{Child, ExternalDebugger, Reply, RunCommand};
use crate::error::Error;
use crate::source::{FileNameNormalizer, SourceIdentity, SourceNormalizer, SourceRef};
use crate::weak_error;
use anyhow::{anyhow, Context};
use indexmap::IndexMap;
use itertools::Itertools;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// The only thread of an external debugger.
const THREAD_ID: i64 = 1;

/// Debugger started by a `launch` request.
struct Launched {
    debugger: Arc<ExternalDebugger>,
    breakpoints: BreakpointRegistry,
    stop_on_entry: bool,
}

/// Debug session state for a single client.
pub struct DebugSession<T: DapTransport> {
    io: T,
    server_seq: i64,
    settings: Arc<Settings>,
    normalizer: Arc<FileNameNormalizer>,
    source_map: SourceMap,
    /// Breakpoints requested before launch, replayed when the debugger starts.
    pending: IndexMap<SourceIdentity, (SourceRef, Vec<BreakpointRequest>)>,
    /// Source reference as the client sent it, echoed back in breakpoint bodies.
    client_sources: HashMap<SourceIdentity, SourceRef>,
    launched: Option<Launched>,
    configuration_done: bool,
    started: bool,
    events: Vec<InternalEvent>,
    terminated: bool,
    /// Sequence number of the last request a response was sent for.
    answered: Option<i64>,
}

impl<T: DapTransport> DebugSession<T> {
    pub fn new(io: T, settings: Arc<Settings>) -> Self {
        let normalizer = Arc::new(FileNameNormalizer::new(settings.ignore_case));
        Self {
            io,
            server_seq: 1,
            settings,
            normalizer,
            source_map: SourceMap::default(),
            pending: IndexMap::new(),
            client_sources: HashMap::new(),
            launched: None,
            configuration_done: false,
            started: false,
            events: Vec::new(),
            terminated: false,
            answered: None,
        }
    }

    fn next_seq(&mut self) -> i64 {
        let s = self.server_seq;
        self.server_seq += 1;
        s
    }

    fn enqueue_event(&mut self, ev: InternalEvent) {
        self.events.push(ev);
    }

    fn drain_events(&mut self) -> anyhow::Result<()> {
        for ev in std::mem::take(&mut self.events) {
            match ev {
                InternalEvent::Stopped {
                    reason,
                    description,
                } => {
                    let body = json!({
                        "reason": reason.to_string(),
                        "threadId": THREAD_ID,
                        "allThreadsStopped": true,
                        "description": description,
                    });
                    self.send_event_raw("stopped", Some(body))?;
                }
                InternalEvent::Exited { code } => {
                    if !self.terminated {
                        self.terminated = true;
                        self.send_event_body("exited", json!({"exitCode": code}))?;
                        self.send_event("terminated")?;
                    }
                }
                InternalEvent::Output { category, output } => {
                    self.send_event_body(
                        "output",
                        json!({"category": category, "output": output}),
                    )?;
                }
            }
        }
        Ok(())
    }

    fn send_success(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        self.send_response_raw(req, true, None, None)
    }

    fn send_success_body<B: Serialize>(&mut self, req: &DapRequest, body: B) -> anyhow::Result<()> {
        let body = serde_json::to_value(body)?;
        self.send_response_raw(req, true, None, Some(body))
    }

    fn send_err(&mut self, req: &DapRequest, message: impl ToString) -> anyhow::Result<()> {
        self.send_response_raw(req, false, Some(message.to_string()), None)
    }

    fn send_response_raw(
        &mut self,
        req: &DapRequest,
        success: bool,
        message: Option<String>,
        body: Option<Value>,
    ) -> anyhow::Result<()> {
        let rsp = DapResponse {
            seq: self.next_seq(),
            r#type: "response",
            request_seq: req.seq,
            success,
            command: req.command.clone(),
            message,
            body,
        };
        self.answered = Some(req.seq);
        self.io.write_message(&serde_json::to_value(rsp)?)
    }

    fn send_event(&mut self, name: &'static str) -> anyhow::Result<()> {
        self.send_event_raw(name, None)
    }

    fn send_event_body<B: Serialize>(&mut self, name: &'static str, body: B) -> anyhow::Result<()> {
        let body = serde_json::to_value(body)?;
        self.send_event_raw(name, Some(body))
    }

    fn send_event_raw(&mut self, name: &'static str, body: Option<Value>) -> anyhow::Result<()> {
        let ev = DapEvent {
            seq: self.next_seq(),
            r#type: "event",
            event: name,
            body,
        };
        self.io.write_message(&serde_json::to_value(ev)?)
    }

    fn launched(&self) -> anyhow::Result<&Launched> {
        self.launched
            .as_ref()
            .ok_or_else(|| anyhow!("debugger is not launched"))
    }

    fn handle_initialize(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let body = json!({
            "supportsConfigurationDoneRequest": true,
            "supportsTerminateRequest": true,
            "supportsRestartRequest": false,
            "supportsSetVariable": false,
            "supportsStepBack": false,
            "supportsEvaluateForHovers": false,
        });
        self.send_success_body(req, body)?;
        self.send_event("initialized")
    }

    fn handle_launch(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        if self.launched.is_some() {
            return self.send_err(req, "debugger is already launched");
        }

        let args: LaunchArguments =
            serde_json::from_value(req.arguments.clone()).context("launch arguments")?;

        let dialect_name = args.dialect.as_deref().unwrap_or(&self.settings.dialect);
        let dialect = self.settings.registry.dialect(dialect_name)?;
        let program = args
            .debugger
            .clone()
            .or_else(|| self.settings.debugger.program.clone())
            .ok_or_else(|| anyhow!("launch: no debugger program configured"))?;
        let mut debugger_args = args
            .debugger_args
            .clone()
            .unwrap_or_else(|| self.settings.debugger.args.clone());
        debugger_args.push(args.program.clone());

        self.source_map = SourceMap::new(&args.source_map);
        self.terminated = false;

        let template = Child::new(program, debugger_args, args.cwd.as_deref().map(Path::new));
        let (debugger, startup) =
            ExternalDebugger::launch(template, dialect, self.settings.options)
                .context("start debugger")?;
        let debugger = Arc::new(debugger);
        self.forward_output(&debugger, &startup);
        if startup.exited {
            return Err(Error::ProcessExited).context("debugger exited during startup");
        }

        let breakpoints = BreakpointRegistry::new(debugger.clone(), self.normalizer.clone());
        for (identity, (source, requests)) in std::mem::take(&mut self.pending) {
            debug!(
                target: "dap",
                "replay breakpoints of `{identity}`: {}",
                requests.iter().filter_map(|r| r.line).join(", ")
            );
            weak_error!(
                breakpoints.reconcile(&source, &requests),
                "replay breakpoints:"
            );
        }

        self.launched = Some(Launched {
            debugger,
            breakpoints,
            stop_on_entry: args.stop_on_entry,
        });
        self.send_success(req)?;
        self.start_if_ready()
    }

    fn handle_configuration_done(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        self.configuration_done = true;
        self.send_success(req)?;
        self.start_if_ready()
    }

    /// Let the program run once it is both launched and configured.
    fn start_if_ready(&mut self) -> anyhow::Result<()> {
        if self.started || !self.configuration_done {
            return Ok(());
        }
        let Some(launched) = &self.launched else {
            return Ok(());
        };
        self.started = true;

        if launched.stop_on_entry {
            let description = launched
                .debugger
                .position()
                .map(|p| format!("{}:{}", p.file, p.line));
            self.enqueue_event(InternalEvent::Stopped {
                reason: StopReason::Entry,
                description,
            });
            return Ok(());
        }
        self.run_program(RunCommand::Continue)
    }

    fn handle_set_breakpoints(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let args: SetBreakpointsArguments =
            serde_json::from_value(req.arguments.clone()).context("setBreakpoints arguments")?;
        let client_source = args.source.clone();
        let target_source = SourceRef {
            name: client_source.name.clone(),
            path: client_source
                .path
                .as_deref()
                .map(|p| self.source_map.map_client_to_target(p)),
        };
        let requests = args.requests();

        let Some(identity) = self.normalizer.normalize(&target_source) else {
            return self.send_err(req, Error::MissingSource);
        };
        self.client_sources.insert(identity.clone(), client_source.clone());

        let Some(launched) = &self.launched else {
            let lines: Vec<u64> = requests
                .iter()
                .filter_map(|r| r.line.and_then(|l| u64::try_from(l).ok()))
                .filter(|&l| l > 0)
                .unique()
                .collect();
            let body: Vec<_> = lines
                .iter()
                .map(|line| {
                    json!({
                        "verified": false,
                        "line": line,
                        "message": "pending until the debugger starts",
                        "source": client_source,
                    })
                })
                .collect();
            self.pending.insert(identity, (target_source, requests));
            return self.send_success_body(req, json!({"breakpoints": body}));
        };

        match launched.breakpoints.reconcile(&target_source, &requests) {
            Ok(set) => {
                let body: Vec<_> = set
                    .iter()
                    .map(|bp| BreakpointBody::new(bp, &client_source))
                    .collect();
                self.send_success_body(req, json!({"breakpoints": body}))
            }
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => self.send_err(req, e),
        }
    }

    fn handle_threads(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let threads = match self.launched {
            Some(_) => vec![json!({"id": THREAD_ID, "name": "main"})],
            None => vec![],
        };
        self.send_success_body(req, json!({"threads": threads}))
    }

    fn handle_stack_trace(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let position = self.launched()?.debugger.position();

        let frames: Vec<Value> = position
            .into_iter()
            .map(|pos| {
                let client_path = self.source_map.map_target_to_client(&pos.file);
                let identity = self.normalizer.normalize(&SourceRef::from_path(&pos.file));
                let name = identity
                    .as_ref()
                    .map(|i| i.to_string())
                    .unwrap_or_else(|| pos.file.clone());
                let source = identity
                    .and_then(|i| self.client_sources.get(&i).cloned())
                    .filter(|s| s.path.is_some())
                    .unwrap_or(SourceRef {
                        name: Some(name.clone()),
                        path: Some(client_path),
                    });
                json!({
                    "id": 1,
                    "name": name,
                    "source": source,
                    "line": pos.line,
                    "column": 1,
                })
            })
            .collect();

        self.send_success_body(
            req,
            json!({"stackFrames": frames, "totalFrames": frames.len()}),
        )
    }

    fn handle_run(&mut self, req: &DapRequest, command: RunCommand) -> anyhow::Result<()> {
        self.launched()?;
        self.send_success_body(req, json!({"allThreadsContinued": true}))?;
        self.run_program(command)
    }

    fn run_program(&mut self, command: RunCommand) -> anyhow::Result<()> {
        let debugger = self.launched()?.debugger.clone();
        let reply = debugger.run(command)?;
        self.forward_output(&debugger, &reply);

        if reply.exited {
            let code = debugger.exit_code().unwrap_or(0);
            info!(target: "dap", "debugger exited with code {code}");
            self.teardown();
            self.enqueue_event(InternalEvent::Exited { code });
            return Ok(());
        }

        let reason = match command {
            RunCommand::Continue => StopReason::Breakpoint,
            _ => StopReason::Step,
        };
        let description = match &reply.position {
            Some(pos) => format!("{}:{}", pos.file, pos.line),
            None => "stopped at unknown position".to_string(),
        };
        self.enqueue_event(InternalEvent::Stopped {
            reason,
            description: Some(description),
        });
        Ok(())
    }

    fn forward_output(&mut self, debugger: &ExternalDebugger, reply: &Reply) {
        if !reply.output.is_empty() {
            self.enqueue_event(InternalEvent::Output {
                category: "stdout",
                output: reply.output.clone(),
            });
        }
        let stderr = debugger.take_stderr();
        if !stderr.is_empty() {
            self.enqueue_event(InternalEvent::Output {
                category: "stderr",
                output: stderr.iter().map(|l| format!("{l}\n")).collect(),
            });
        }
    }

    /// Stop the debugger, breakpoint results still in flight are dropped.
    fn teardown(&mut self) {
        if let Some(launched) = self.launched.take() {
            launched.breakpoints.close();
            launched.debugger.quit();
            debug!(target: "dap", "debugger session is torn down");
        }
        self.started = false;
    }

    fn handle_terminate(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let code = self
            .launched
            .as_ref()
            .and_then(|l| l.debugger.exit_code())
            .unwrap_or(0);
        self.teardown();
        self.send_success(req)?;
        self.enqueue_event(InternalEvent::Exited { code });
        Ok(())
    }

    fn handle_disconnect(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        self.teardown();
        self.send_success(req)
    }

    fn dispatch(&mut self, req: &DapRequest) -> anyhow::Result<bool> {
        if let Ok(command) = RunCommand::from_str(&req.command) {
            self.handle_run(req, command)?;
            return Ok(true);
        }

        match req.command.as_str() {
            "initialize" => self.handle_initialize(req)?,
            "launch" => self.handle_launch(req)?,
            "configurationDone" => self.handle_configuration_done(req)?,
            "setBreakpoints" => self.handle_set_breakpoints(req)?,
            "threads" => self.handle_threads(req)?,
            "stackTrace" => self.handle_stack_trace(req)?,
            "terminate" => self.handle_terminate(req)?,
            "disconnect" => {
                self.handle_disconnect(req)?;
                return Ok(false);
            }
            other => {
                self.send_err(req, format!("Unsupported DAP command: {other}"))?;
            }
        }
        Ok(true)
    }

    pub fn run(mut self) -> anyhow::Result<()> {
        let result = self.serve();
        self.teardown();
        result
    }

    fn serve(&mut self) -> anyhow::Result<()> {
        loop {
            self.drain_events()?;
            let msg = self.io.read_message()?;
            let req: DapRequest = serde_json::from_value(msg)?;
            if req.r#type != "request" {
                continue;
            }

            self.answered = None;
            let cont = match self.dispatch(&req) {
                Ok(cont) => cont,
                Err(e) => {
                    let fatal = e.downcast_ref::<Error>().is_some_and(Error::is_fatal);
                    warn!(target: "dap", "{} failed: {e:#}", req.command);
                    if self.answered == Some(req.seq) {
                        // request was already answered, the failure is reported by events only
                        self.enqueue_event(InternalEvent::Output {
                            category: "console",
                            output: format!("{} failed: {e:#}\n", req.command),
                        });
                    } else {
                        weak_error!(self.send_err(&req, format!("{e:#}")), "send error response:");
                    }
                    if fatal {
                        self.teardown();
                        self.enqueue_event(InternalEvent::Exited { code: -1 });
                        self.drain_events()?;
                    }
                    true
                }
            };
            if !cont {
                break;
            }
        }
        self.drain_events()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{AdapterConfig, Overrides};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// In-memory transport, output is shared with the test.
    struct MemoryTransport {
        input: VecDeque<Value>,
        output: Arc<Mutex<Vec<Value>>>,
    }

    impl DapTransport for MemoryTransport {
        fn read_message(&mut self) -> anyhow::Result<Value> {
            self.input
                .pop_front()
                .ok_or_else(|| anyhow!("DAP connection closed"))
        }

        fn write_message(&mut self, message: &Value) -> anyhow::Result<()> {
            self.output.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn run_session(requests: Vec<Value>, settings: Settings) -> Vec<Value> {
        let output = Arc::new(Mutex::new(vec![]));
        let input = requests
            .into_iter()
            .enumerate()
            .map(|(i, mut r)| {
                r["seq"] = json!(i + 1);
                r["type"] = json!("request");
                r
            })
            .collect();
        let transport = MemoryTransport {
            input,
            output: output.clone(),
        };
        DebugSession::new(transport, Arc::new(settings))
            .run()
            .unwrap();
        let output = output.lock().unwrap().clone();
        output
    }

    fn settings() -> Settings {
        Settings::resolve(AdapterConfig::default(), Overrides::default()).unwrap()
    }

    fn response<'a>(output: &'a [Value], command: &str) -> &'a Value {
        output
            .iter()
            .find(|m| m["type"] == "response" && m["command"] == command)
            .unwrap()
    }

    #[test]
    fn test_initialize() {
        let output = run_session(
            vec![
                json!({"command": "initialize", "arguments": {"adapterID": "cobol"}}),
                json!({"command": "disconnect"}),
            ],
            settings(),
        );

        let rsp = response(&output, "initialize");
        assert_eq!(rsp["success"], true);
        assert_eq!(rsp["request_seq"], 1);
        assert_eq!(rsp["body"]["supportsConfigurationDoneRequest"], true);
        assert_eq!(output[1]["event"], "initialized");
        assert_eq!(response(&output, "disconnect")["success"], true);

        let seqs: Vec<_> = output.iter().map(|m| m["seq"].as_i64().unwrap()).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn test_breakpoints_before_launch_are_pending() {
        let output = run_session(
            vec![
                json!({"command": "setBreakpoints", "arguments": {
                    "source": {"path": "/src/PROG.CBL"},
                    "breakpoints": [{"line": 12}, {"line": 12}, {"line": 30}],
                }}),
                json!({"command": "setBreakpoints", "arguments": {
                    "source": {},
                    "breakpoints": [{"line": 1}],
                }}),
                json!({"command": "disconnect"}),
            ],
            settings(),
        );

        let rsp = &output[0];
        assert_eq!(rsp["success"], true);
        let bps = rsp["body"]["breakpoints"].as_array().unwrap();
        assert_eq!(bps.len(), 2);
        assert_eq!(bps[0]["line"], 12);
        assert_eq!(bps[0]["verified"], false);
        assert_eq!(bps[1]["source"]["path"], "/src/PROG.CBL");

        assert_eq!(output[1]["success"], false);
        assert_eq!(
            output[1]["message"],
            "breakpoint source has neither name nor path"
        );
    }

    #[test]
    fn test_requests_without_debugger() {
        let output = run_session(
            vec![
                json!({"command": "threads"}),
                json!({"command": "stackTrace", "arguments": {"threadId": 1}}),
                json!({"command": "next", "arguments": {"threadId": 1}}),
                json!({"command": "evaluate", "arguments": {"expression": "W-X"}}),
                json!({"command": "launch", "arguments": {"program": "PROG"}}),
                json!({"command": "launch", "arguments": {}}),
                json!({"command": "disconnect"}),
            ],
            settings(),
        );

        assert_eq!(output[0]["body"]["threads"], json!([]));
        assert_eq!(output[1]["success"], false);
        assert_eq!(output[2]["success"], false);
        assert_eq!(output[2]["message"], "debugger is not launched");
        assert_eq!(output[3]["message"], "Unsupported DAP command: evaluate");
        assert_eq!(output[4]["success"], false);
        assert!(output[4]["message"]
            .as_str()
            .unwrap()
            .contains("no debugger program configured"));
        assert_eq!(output[5]["success"], false);
        assert_eq!(response(&output, "disconnect")["success"], true);
    }

    #[test]
    fn test_one_response_when_debugger_dies() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("isdb.sh");
        std::fs::write(&script, "echo 'isdb>'\n").unwrap();
        let mut config = AdapterConfig::default();
        config.debugger.program = Some("sh".to_string());
        config.debugger.args = vec![script.to_string_lossy().to_string()];
        let settings = Settings::resolve(config, Overrides::default()).unwrap();

        let output = run_session(
            vec![
                json!({"command": "launch", "arguments": {
                    "program": "PROG.CBL",
                    "stopOnEntry": true,
                }}),
                json!({"command": "next", "arguments": {"threadId": 1}}),
                json!({"command": "disconnect"}),
            ],
            settings,
        );

        assert_eq!(response(&output, "launch")["success"], true);
        let next: Vec<_> = output
            .iter()
            .filter(|m| m["type"] == "response" && m["request_seq"] == 2)
            .collect();
        assert_eq!(next.len(), 1);
        assert!(output
            .iter()
            .any(|m| m["type"] == "event" && m["event"] == "terminated"));
        assert_eq!(response(&output, "disconnect")["success"], true);
    }

    #[test]
    fn test_unknown_dialect_on_launch() {
        let output = run_session(
            vec![
                json!({"command": "launch", "arguments": {
                    "program": "PROG",
                    "debugger": "isdb",
                    "dialect": "mainframe",
                }}),
                json!({"command": "disconnect"}),
            ],
            settings(),
        );
        assert_eq!(output[0]["success"], false);
        assert_eq!(output[0]["message"], "unknown dialect `mainframe`");
    }
}
