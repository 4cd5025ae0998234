use crate::error::Error;
use log::debug;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::process::{ChildStderr, ChildStdin, ChildStdout, Command, Stdio};

/// Process state.
pub trait State {}

/// Process is running, its standard streams are taken by the driver.
pub struct Installed;

impl State for Installed {}

/// Process is prepared but not spawned yet.
pub struct Template;

impl State for Template {}

/// Standard streams of an installed debugger process.
pub struct Pipes {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// External debugger process.
pub struct Child<S: State> {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    inner: Option<std::process::Child>,
    exit_code: Option<i32>,
    _p: PhantomData<S>,
}

impl Child<Template> {
    /// Create new process, but dont start it.
    ///
    /// # Arguments
    ///
    /// * `program`: debugger executable, looked up in `PATH` if it is not an existing path
    /// * `args`: debugger arguments, debugged program is usually one of them
    /// * `cwd`: working directory of the debugger
    pub fn new<ARGS: IntoIterator<Item = I>, I: Into<String>>(
        program: impl Into<String>,
        args: ARGS,
        cwd: Option<impl Into<PathBuf>>,
    ) -> Child<Template> {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: cwd.map(Into::into),
            inner: None,
            exit_code: None,
            _p: PhantomData,
        }
    }

    fn resolve_program(&self) -> Result<PathBuf, Error> {
        let path = Path::new(&self.program);
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        which::which(&self.program).map_err(|e| Error::ProgramNotFound(self.program.clone(), e))
    }

    /// Spawn the debugger with piped standard streams.
    pub fn install(mut self) -> Result<(Child<Installed>, Pipes), Error> {
        let program = self.resolve_program()?;
        debug!(
            target: "debugger",
            "spawn `{}` with args {:?}", program.display(), self.args
        );

        let mut command = Command::new(&program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        let mut inner = command.spawn()?;
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (inner.stdin.take(), inner.stdout.take(), inner.stderr.take())
        else {
            _ = inner.kill();
            return Err(Error::ProcessNotStarted);
        };

        let child = Child {
            program: std::mem::take(&mut self.program),
            args: std::mem::take(&mut self.args),
            cwd: self.cwd.take(),
            inner: Some(inner),
            exit_code: None,
            _p: PhantomData,
        };
        Ok((
            child,
            Pipes {
                stdin,
                stdout,
                stderr,
            },
        ))
    }
}

impl Child<Installed> {
    /// Return running process pid.
    pub fn pid(&self) -> Option<u32> {
        self.inner.as_ref().map(std::process::Child::id)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Return exit code if process is already finished.
    pub fn try_exit_code(&mut self) -> Option<i32> {
        if self.exit_code.is_none() {
            if let Some(Ok(Some(status))) = self.inner.as_mut().map(|c| c.try_wait()) {
                self.exit_code = Some(status.code().unwrap_or(-1));
            }
        }
        self.exit_code
    }

    /// Kill the process if it is still alive.
    pub fn kill(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            if let Ok(None) = inner.try_wait() {
                debug!(target: "debugger", "kill `{}`", self.program);
                _ = inner.kill();
            }
            if let Ok(status) = inner.wait() {
                self.exit_code = Some(status.code().unwrap_or(-1));
            }
        }
    }
}

impl<S: State> Drop for Child<S> {
    fn drop(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            _ = inner.kill();
            _ = inner.wait();
        }
    }
}
