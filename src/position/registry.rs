use crate::error::Error;
use crate::position::CommandGrammar;
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use std::fs::read_to_string;
use std::path::Path;
use std::sync::Arc;

const PLACEHOLDERS: &[&str] = &["line", "source"];

/// Commands used to drive one debugger build, `{line}` and `{source}` are substituted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CommandTemplates {
    pub add_breakpoint: String,
    pub remove_breakpoint: String,
    #[serde(rename = "continue")]
    pub resume: String,
    pub next: String,
    pub step_in: String,
    pub step_out: String,
    pub quit: String,
}

impl CommandTemplates {
    fn validate(&self) -> Result<(), Error> {
        for template in [
            &self.add_breakpoint,
            &self.remove_breakpoint,
            &self.resume,
            &self.next,
            &self.step_in,
            &self.step_out,
            &self.quit,
        ] {
            let mut rest = template.as_str();
            while let Some(start) = rest.find('{') {
                let tail = &rest[start + 1..];
                let end = tail.find('}').unwrap_or(tail.len());
                let placeholder = &tail[..end];
                if !PLACEHOLDERS.contains(&placeholder) {
                    return Err(Error::InvalidTemplate(
                        template.clone(),
                        placeholder.to_string(),
                    ));
                }
                rest = &tail[end..];
            }
        }
        Ok(())
    }

    /// Substitute breakpoint placeholders.
    pub fn render(template: &str, line: u64, source: &str) -> String {
        template
            .replace("{line}", &line.to_string())
            .replace("{source}", source)
    }
}

/// Everything the adapter needs to know about a debugger build.
#[derive(Debug, Clone)]
pub struct Dialect {
    pub name: String,
    /// Grammar of an execution position announcement.
    pub position: CommandGrammar,
    /// Grammar of a breakpoint confirmation.
    pub breakpoint: CommandGrammar,
    /// Line printed when the debugger waits for the next command.
    pub prompt: Option<Regex>,
    pub commands: CommandTemplates,
}

#[derive(Deserialize)]
struct GrammarEntry {
    name: String,
    pattern: String,
}

#[derive(Clone, Deserialize)]
struct DialectEntry {
    name: String,
    position: String,
    breakpoint: String,
    #[serde(default)]
    prompt: Option<String>,
    commands: CommandTemplates,
}

#[derive(Deserialize)]
struct RegistryFile {
    #[serde(default)]
    grammar: Vec<GrammarEntry>,
    #[serde(default)]
    dialect: Vec<DialectEntry>,
}

/// Enumeration of named command grammars and the dialects built on top of them.
#[derive(Debug, Default, Clone)]
pub struct CommandRegistry {
    grammars: IndexMap<String, CommandGrammar>,
    dialects: IndexMap<String, Arc<Dialect>>,
}

impl CommandRegistry {
    /// Registry with built-in dialects only.
    pub fn with_builtin() -> Result<Self, Error> {
        let mut registry = Self::default();
        registry.merge_toml(include_str!("preset/dialects.toml"))?;
        Ok(registry)
    }

    /// Load additional grammars and dialects from a file, entries with an existing name replace
    /// the previous ones.
    pub fn merge_file(&mut self, path: &Path) -> Result<(), Error> {
        let data = read_to_string(path)?;
        self.merge_toml(&data)
    }

    /// Load additional grammars and dialects from toml text. On error registry is unchanged.
    pub fn merge_toml(&mut self, data: &str) -> Result<(), Error> {
        let file: RegistryFile = toml::de::from_str(data)?;

        let mut grammars = self.grammars.clone();
        for entry in file.grammar {
            let grammar = CommandGrammar::new(entry.name.clone(), &entry.pattern)?;
            grammars.insert(entry.name, grammar);
        }

        let mut dialects = self.dialects.clone();
        for entry in file.dialect {
            let dialect = Self::resolve(&grammars, entry)?;
            dialects.insert(dialect.name.clone(), Arc::new(dialect));
        }

        self.grammars = grammars;
        self.dialects = dialects;
        Ok(())
    }

    fn resolve(
        grammars: &IndexMap<String, CommandGrammar>,
        entry: DialectEntry,
    ) -> Result<Dialect, Error> {
        let lookup = |name: &str| {
            grammars
                .get(name)
                .cloned()
                .ok_or_else(|| Error::GrammarNotFound(name.to_string()))
        };

        let prompt = entry
            .prompt
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|source| Error::InvalidGrammar {
                name: format!("{} prompt", entry.name),
                source,
            })?;
        entry.commands.validate()?;

        Ok(Dialect {
            position: lookup(&entry.position)?,
            breakpoint: lookup(&entry.breakpoint)?,
            prompt,
            commands: entry.commands,
            name: entry.name,
        })
    }

    pub fn grammar(&self, name: &str) -> Result<&CommandGrammar, Error> {
        self.grammars
            .get(name)
            .ok_or_else(|| Error::GrammarNotFound(name.to_string()))
    }

    pub fn dialect(&self, name: &str) -> Result<Arc<Dialect>, Error> {
        self.dialects
            .get(name)
            .cloned()
            .ok_or_else(|| Error::DialectNotFound(name.to_string()))
    }

    pub fn grammars(&self) -> impl Iterator<Item = &CommandGrammar> {
        self.grammars.values()
    }

    pub fn dialects(&self) -> impl Iterator<Item = &Dialect> {
        self.dialects.values().map(AsRef::as_ref)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::position::match_position;

    #[test]
    fn test_builtin_registry() {
        let registry = CommandRegistry::with_builtin().unwrap();
        let names: Vec<_> = registry.dialects().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["iscobol", "gnucobol"]);
        assert_eq!(registry.grammars().count(), 4);

        let iscobol = registry.dialect("iscobol").unwrap();
        assert_eq!(iscobol.position.name(), "iscobol-line");
        assert!(iscobol.prompt.as_ref().unwrap().is_match("isdb>"));

        let pos = match_position(&iscobol.position, " line=12 file=PROG.CBL\n").unwrap();
        assert_eq!(pos.line, 12);

        let gnucobol = registry.dialect("gnucobol").unwrap();
        let pos = match_position(
            &gnucobol.breakpoint,
            "Breakpoint 1 at 0x401136: file demo02.cob, line 68.",
        )
        .unwrap();
        assert_eq!((pos.file.as_str(), pos.line), ("demo02.cob", 68));

        assert!(matches!(
            registry.dialect("cobol-2002"),
            Err(Error::DialectNotFound(_))
        ));
    }

    #[test]
    fn test_merge_user_dialect() {
        let mut registry = CommandRegistry::with_builtin().unwrap();
        registry
            .merge_toml(
                r#"
                [[grammar]]
                name = "iscobol-line"
                pattern = '^>> (?<path>\S+):(?<linenumber>\d+)'

                [[dialect]]
                name = "custom"
                position = "iscobol-line"
                breakpoint = "iscobol-break"

                [dialect.commands]
                add-breakpoint = "b {source} {line}"
                remove-breakpoint = "d {source} {line}"
                continue = "c"
                next = "n"
                step-in = "s"
                step-out = "o"
                quit = "q"
                "#,
            )
            .unwrap();

        let custom = registry.dialect("custom").unwrap();
        let pos = match_position(&custom.position, "noise\n>> PROG.CBL:7\n").unwrap();
        assert_eq!((pos.file.as_str(), pos.line), ("PROG.CBL", 7));
        assert_eq!(
            CommandTemplates::render(&custom.commands.add_breakpoint, 7, "PROG.CBL"),
            "b PROG.CBL 7"
        );
        // already resolved dialects keep their grammars
        let iscobol = registry.dialect("iscobol").unwrap();
        assert!(match_position(&iscobol.position, " line=3 file=PROG.CBL").is_some());
    }

    #[test]
    fn test_merge_errors_keep_registry() {
        let mut registry = CommandRegistry::with_builtin().unwrap();

        let err = registry
            .merge_toml(
                r#"
                [[grammar]]
                name = "bad"
                pattern = 'line=(?<linenumber>\d+)'
                "#,
            )
            .unwrap_err();
        assert!(matches!(err, Error::MissingCapture(_, "path")));

        let err = registry
            .merge_toml(
                r#"
                [[dialect]]
                name = "orphan"
                position = "nope"
                breakpoint = "iscobol-break"

                [dialect.commands]
                add-breakpoint = "b {line}"
                remove-breakpoint = "d {line}"
                continue = "c"
                next = "n"
                step-in = "s"
                step-out = "o"
                quit = "q"
                "#,
            )
            .unwrap_err();
        assert!(matches!(err, Error::GrammarNotFound(ref name) if name == "nope"));

        let err = registry
            .merge_toml(
                r#"
                [[dialect]]
                name = "typo"
                position = "iscobol-line"
                breakpoint = "iscobol-break"

                [dialect.commands]
                add-breakpoint = "b {lien}"
                remove-breakpoint = "d {line}"
                continue = "c"
                next = "n"
                step-in = "s"
                step-out = "o"
                quit = "q"
                "#,
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTemplate(_, ref p) if p == "lien"));

        assert!(registry.grammar("bad").is_err());
        assert_eq!(registry.dialects().count(), 2);
    }
}
