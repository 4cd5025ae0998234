//! Driver of an external line-oriented debugger process.
//!
//! Debugger is controlled by writing command lines into its stdin. Its stdout is read line by
//! line in a dedicated thread, lines are grouped into replies: a reply ends with a prompt line
//! (if the dialect has one) or with the first line matching the expected grammar.

mod process;

pub use process::{Child, Installed, Pipes, Template};

use crate::breakpoint::{BreakpointPosition, DebuggerControl};
use crate::error::Error;
use crate::muted_error;
use crate::position::{match_position, CommandGrammar, CommandTemplates, DebugPosition, Dialect};
use log::{debug, info};
use regex::Regex;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::ChildStdin;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use strum_macros::{Display, EnumString};

/// Execution control commands, passed to the debugger verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum RunCommand {
    #[strum(serialize = "continue")]
    Continue,
    #[strum(serialize = "next")]
    Next,
    #[strum(serialize = "stepIn")]
    StepIn,
    #[strum(serialize = "stepOut")]
    StepOut,
}

#[derive(Debug, Clone, Copy)]
pub struct DebuggerOptions {
    /// How long to wait for an answer to a breakpoint command.
    pub command_timeout: Duration,
    /// How long to wait for the first prompt after the debugger started.
    pub startup_timeout: Duration,
}

impl Default for DebuggerOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(5),
            startup_timeout: Duration::from_secs(30),
        }
    }
}

/// Output collected in response to a single command.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    /// Debugger output, prompt line excluded.
    pub output: String,
    /// Position (or breakpoint confirmation) found in the output.
    pub position: Option<DebugPosition>,
    /// Debugger closed its output before reply was complete.
    pub exited: bool,
}

struct Exchange {
    stdin: ChildStdin,
    lines: Receiver<String>,
}

impl Exchange {
    fn send(&mut self, command: &str) -> Result<(), Error> {
        loop {
            match self.lines.try_recv() {
                Ok(stale) => debug!(target: "debugger", "skip stale output: {stale}"),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Err(Error::ProcessExited),
            }
        }

        debug!(target: "debugger", "-> {command}");
        writeln!(self.stdin, "{command}")
            .and_then(|_| self.stdin.flush())
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::BrokenPipe => Error::ProcessExited,
                _ => Error::IO(e),
            })
    }

    fn read_reply(
        &mut self,
        command: &str,
        prompt: Option<&Regex>,
        grammar: &CommandGrammar,
        timeout: Option<Duration>,
    ) -> Result<Reply, Error> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut output = String::new();
        let mut exited = false;

        loop {
            let next = match deadline {
                Some(deadline) => self
                    .lines
                    .recv_timeout(deadline.saturating_duration_since(Instant::now())),
                None => self.lines.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match next {
                Ok(line) => {
                    if prompt.is_some_and(|p| p.is_match(&line)) {
                        break;
                    }
                    let complete = prompt.is_none() && match_position(grammar, &line).is_some();
                    output.push_str(&line);
                    output.push('\n');
                    if complete {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    // without a prompt silence is the only sign of a refused command
                    if prompt.is_some() {
                        return Err(Error::CommandTimeout(
                            command.to_string(),
                            timeout.unwrap_or_default(),
                        ));
                    }
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    exited = true;
                    break;
                }
            }
        }

        Ok(Reply {
            position: match_position(grammar, &output),
            output,
            exited,
        })
    }
}

fn forward_lines(
    name: &str,
    stream: impl Read + Send + 'static,
    mut sink: impl FnMut(String) -> bool + Send + 'static,
) -> Result<(), Error> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut buf = String::new();
            loop {
                buf.clear();
                match reader.read_line(&mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = buf.trim_end_matches(['\r', '\n']).to_string();
                        if !sink(line) {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        })?;
    Ok(())
}

/// External debugger process bound to one dialect.
///
/// One command is in flight at a time, concurrent callers wait for the exchange lock.
pub struct ExternalDebugger {
    dialect: Arc<Dialect>,
    options: DebuggerOptions,
    exchange: Mutex<Exchange>,
    process: Mutex<Child<Installed>>,
    position: Mutex<Option<DebugPosition>>,
    stderr: Arc<Mutex<Vec<String>>>,
}

impl ExternalDebugger {
    /// Spawn a debugger and wait until it is ready for commands.
    ///
    /// Return the debugger and its startup output, position in this output is the program entry.
    pub fn launch(
        template: Child<Template>,
        dialect: Arc<Dialect>,
        options: DebuggerOptions,
    ) -> Result<(Self, Reply), Error> {
        let (process, pipes) = template.install()?;
        info!(
            target: "debugger",
            "debugger `{}` started, pid {:?}, dialect `{}`",
            process.program(),
            process.pid(),
            dialect.name
        );

        let (tx, rx) = mpsc::channel();
        forward_lines("debugger-stdout", pipes.stdout, move |line| {
            tx.send(line).is_ok()
        })?;

        let stderr = Arc::new(Mutex::new(Vec::new()));
        let stderr_sink = stderr.clone();
        forward_lines("debugger-stderr", pipes.stderr, move |line| {
            stderr_sink
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(line);
            true
        })?;

        let mut exchange = Exchange {
            stdin: pipes.stdin,
            lines: rx,
        };
        let startup = exchange.read_reply(
            "<startup>",
            dialect.prompt.as_ref(),
            &dialect.position,
            Some(options.startup_timeout),
        )?;

        let debugger = Self {
            dialect,
            options,
            exchange: Mutex::new(exchange),
            process: Mutex::new(process),
            position: Mutex::new(startup.position.clone()),
            stderr,
        };
        Ok((debugger, startup))
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    /// Send a command and collect output until the reply is complete.
    ///
    /// `timeout` of [`None`] waits as long as the debugger is alive, used for commands that run
    /// the program.
    pub fn execute(
        &self,
        command: &str,
        grammar: &CommandGrammar,
        timeout: Option<Duration>,
    ) -> Result<Reply, Error> {
        let mut exchange = self.exchange.lock().unwrap_or_else(PoisonError::into_inner);
        exchange.send(command)?;
        let reply = exchange.read_reply(command, self.dialect.prompt.as_ref(), grammar, timeout)?;
        debug!(target: "debugger", "<- {}", reply.output.trim_end());
        Ok(reply)
    }

    /// Resume or step the program, wait until it stops again.
    pub fn run(&self, command: RunCommand) -> Result<Reply, Error> {
        let commands = &self.dialect.commands;
        let template = match command {
            RunCommand::Continue => &commands.resume,
            RunCommand::Next => &commands.next,
            RunCommand::StepIn => &commands.step_in,
            RunCommand::StepOut => &commands.step_out,
        };

        let reply = self.execute(template, &self.dialect.position, None)?;
        let mut position = self.position.lock().unwrap_or_else(PoisonError::into_inner);
        if reply.exited {
            *position = None;
        } else if reply.position.is_some() {
            position.clone_from(&reply.position);
        }
        Ok(reply)
    }

    /// Last known execution position.
    pub fn position(&self) -> Option<DebugPosition> {
        self.position
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain lines the debugger wrote into stderr since the last call.
    pub fn take_stderr(&self) -> Vec<String> {
        std::mem::take(&mut *self.stderr.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Exit code if debugger process is already finished.
    pub fn exit_code(&self) -> Option<i32> {
        self.process
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_exit_code()
    }

    /// Ask debugger to quit and kill it if it is still alive after that.
    pub fn quit(&self) {
        let quit = self.dialect.commands.quit.clone();
        muted_error!(
            self.execute(&quit, &self.dialect.position, Some(self.options.command_timeout)),
            "quit debugger:"
        );
        self.process
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .kill();
    }

    fn breakpoint_command(
        &self,
        template: &str,
        position: &BreakpointPosition,
    ) -> Result<Reply, Error> {
        let command = CommandTemplates::render(template, position.line, &position.source);
        let reply = self.execute(
            &command,
            &self.dialect.breakpoint,
            Some(self.options.command_timeout),
        )?;
        if reply.exited {
            return Err(Error::ProcessExited);
        }
        Ok(reply)
    }
}

/// Whether a breakpoint announcement is about the requested line of the requested source.
fn confirms(announced: &DebugPosition, requested: &BreakpointPosition) -> bool {
    let file = announced
        .file
        .trim()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    announced.line == requested.line && file.eq_ignore_ascii_case(&requested.source)
}

impl DebuggerControl for ExternalDebugger {
    fn add_breakpoint(&self, position: &BreakpointPosition) -> Result<bool, Error> {
        let reply = self.breakpoint_command(&self.dialect.commands.add_breakpoint, position)?;
        let confirmed = reply.position.as_ref().is_some_and(|p| confirms(p, position));
        if !confirmed {
            if let Some(other) = &reply.position {
                debug!(
                    target: "debugger",
                    "breakpoint answer {}:{} doesn't match {}:{}",
                    other.file, other.line, position.source, position.line
                );
            }
        }
        Ok(confirmed)
    }

    fn remove_breakpoint(&self, position: &BreakpointPosition) -> Result<(), Error> {
        self.breakpoint_command(&self.dialect.commands.remove_breakpoint, position)?;
        Ok(())
    }
}

impl Drop for ExternalDebugger {
    fn drop(&mut self) {
        self.process
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .kill();
    }
}
