//! Stand-in for an isCOBOL-like command line debugger.
//!
//! Takes a source file as the only argument and "executes" it line by line. Speaks the
//! `iscobol` dialect: announces positions as ` line=N file=PATH`, echoes the source line, mixes
//! in monitor noise and prints `isdb>` when ready for the next command.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process::exit;

static BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(break|clear)\s+(\d+)\s+(\S+)$").expect("valid regex"));

struct Program {
    path: String,
    name: String,
    lines: Vec<String>,
    current: usize,
    breakpoints: BTreeSet<usize>,
}

impl Program {
    fn position(&self) {
        println!("+ changed variables: ");
        println!(" W-COUNTER [{}] = {}", self.name, self.current);
        println!(" line={} file={}", self.current, self.path);
        println!(
            "            {}",
            self.lines.get(self.current - 1).map(String::as_str).unwrap_or("")
        );
    }

    fn next(&mut self) {
        self.current += 1;
        if self.current > self.lines.len() {
            finish();
        }
        self.position();
    }

    fn resume(&mut self) {
        match self.breakpoints.range(self.current + 1..).next() {
            Some(&line) => {
                println!("+ at  line={} file={}", self.current, self.name);
                self.current = line;
                self.position();
            }
            None => finish(),
        }
    }

    fn breakpoint(&mut self, command: &str, line: usize, file: &str) {
        let file_name = file.rsplit(['/', '\\']).next().unwrap_or(file);
        let known = file_name.eq_ignore_ascii_case(&self.name);
        match command {
            "break" if known && line >= 1 && line <= self.lines.len() => {
                self.breakpoints.insert(line);
                println!("breakpoint set line={line} file={file_name}");
            }
            "break" => println!("no executable code at line {line} in {file}"),
            _ => {
                self.breakpoints.remove(&line);
                println!("breakpoint cleared");
            }
        }
    }
}

fn prompt() {
    println!("isdb>");
    _ = io::stdout().flush();
}

fn finish() -> ! {
    println!("program terminated");
    _ = io::stdout().flush();
    exit(0)
}

fn main() {
    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: scripted_debugger <program>");
        exit(2);
    };
    let source = match std::fs::read_to_string(&path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("can't open {path}: {e}");
            exit(1);
        }
    };
    let name = Path::new(&path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.clone());

    let mut program = Program {
        lines: source.lines().map(str::to_string).collect(),
        path,
        name,
        current: 1,
        breakpoints: BTreeSet::new(),
    };
    if program.lines.is_empty() {
        finish();
    }

    println!("isCOBOL scripted debugger");
    eprintln!("warning: running without license file");
    program.position();
    prompt();

    for command in io::stdin().lock().lines() {
        let Ok(command) = command else { break };
        let command = command.trim();
        match command {
            "next" | "step" => program.next(),
            "continue" | "finish" => program.resume(),
            "quit" => exit(0),
            _ => match BREAK.captures(command) {
                Some(caps) => {
                    let line = caps[2].parse().unwrap_or(0);
                    program.breakpoint(&caps[1], line, &caps[3]);
                }
                None => println!("unknown command `{command}`"),
            },
        }
        prompt();
    }
}
