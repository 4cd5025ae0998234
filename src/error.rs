use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- generic errors --------------------------------------------
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    // --------------------------------- configuration errors --------------------------------------
    #[error("grammar `{name}` has invalid pattern: {source}")]
    InvalidGrammar {
        name: String,
        #[source]
        source: regex::Error,
    },
    #[error("grammar `{0}` must define a named capture `{1}`")]
    MissingCapture(String, &'static str),
    #[error("unknown grammar `{0}`")]
    GrammarNotFound(String),
    #[error("unknown dialect `{0}`")]
    DialectNotFound(String),
    #[error("registry file parsing error: {0}")]
    RegistryParsing(#[from] toml::de::Error),
    #[error("command template `{0}` references unknown placeholder `{{{1}}}`")]
    InvalidTemplate(String, String),

    // --------------------------------- request validation errors ---------------------------------
    #[error("breakpoint source has neither name nor path")]
    MissingSource,
    #[error("{count} breakpoint(s) for `{source_name}` have no valid line")]
    MalformedBreakpoints { source_name: String, count: usize },

    // --------------------------------- debugger process errors -----------------------------------
    #[error("debugger program `{0}` not found: {1}")]
    ProgramNotFound(String, #[source] which::Error),
    #[error("debugger process is not started")]
    ProcessNotStarted,
    #[error("debugger process exited")]
    ProcessExited,
    #[error("debugger did not answer `{0}` within {1:?}")]
    CommandTimeout(String, Duration),
    #[error("debugger session is closed")]
    SessionClosed,
}

impl Error {
    /// Return a hint to a session - keep serving the client after error or tear the session down.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Json(_) => false,
            Error::InvalidGrammar { .. } => false,
            Error::MissingCapture(_, _) => false,
            Error::GrammarNotFound(_) => false,
            Error::DialectNotFound(_) => false,
            Error::RegistryParsing(_) => false,
            Error::InvalidTemplate(_, _) => false,
            Error::MissingSource => false,
            Error::MalformedBreakpoints { .. } => false,
            Error::ProgramNotFound(_, _) => false,
            Error::ProcessNotStarted => false,
            Error::CommandTimeout(_, _) => false,

            // process or transport is gone, session can't be repaired
            Error::IO(_) => true,
            Error::ProcessExited => true,
            Error::SessionClosed => true,
        }
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "debugger", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "debugger", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
