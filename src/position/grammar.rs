use crate::error::Error;
use regex::Regex;

pub const LINE_NUMBER_CAPTURE: &str = "linenumber";
pub const PATH_CAPTURE: &str = "path";

/// Named output grammar of a single debugger command.
///
/// Pattern is a regular expression with two named captures: `linenumber` and `path`.
/// A grammar is validated once, when it is loaded, so matching never fails on it.
#[derive(Debug, Clone)]
pub struct CommandGrammar {
    name: String,
    pattern: Regex,
}

impl CommandGrammar {
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, Error> {
        let name = name.into();
        let pattern = Regex::new(pattern).map_err(|source| Error::InvalidGrammar {
            name: name.clone(),
            source,
        })?;

        for capture in [LINE_NUMBER_CAPTURE, PATH_CAPTURE] {
            if !pattern.capture_names().flatten().any(|n| n == capture) {
                return Err(Error::MissingCapture(name, capture));
            }
        }

        Ok(Self { name, pattern })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }
}
