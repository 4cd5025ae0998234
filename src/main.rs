//! cobdap - Debug Adapter Protocol server for line-oriented COBOL debuggers.
//!
//! Every DAP client connected over TCP gets its own debugger process.

use anyhow::Context;
use clap::Parser;
use cobdap::config::{AdapterConfig, Overrides, Settings};
use cobdap::dap::tracer::FileTracer;
use cobdap::dap::Server;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on (default: 127.0.0.1:4711)
    #[clap(long, env = "COBDAP_LISTEN")]
    listen: Option<String>,

    /// Exit after the first debug session ends (single-client mode).
    #[clap(long)]
    oneshot: bool,

    /// Optional log file for adapter diagnostics (no output to stdout).
    #[clap(long)]
    log_file: Option<PathBuf>,

    /// Trace DAP traffic (requests/responses/events) into the log file.
    /// Requires --log-file.
    #[clap(long)]
    trace_dap: bool,

    /// Configuration file (default: ~/.config/cobdap/config.toml)
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Debugger dialect used when a launch request doesn't name one
    #[clap(short, long)]
    dialect: Option<String>,

    /// Debugger executable used when a launch request doesn't name one
    #[clap(long)]
    debugger: Option<String>,

    /// File with additional grammars and dialects
    #[clap(long)]
    dialects_file: Option<PathBuf>,

    /// Print available dialects and exit
    #[clap(long)]
    list_dialects: bool,

    /// Disable diagnostic logging
    #[clap(short, long)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    let logger = env_logger::Logger::from_default_env();
    let filter = logger.filter();
    cobdap::log::LOGGER_SWITCHER.switch(logger, filter);

    let args = Args::parse();
    if args.quiet {
        cobdap::log::disable();
    }

    let config = AdapterConfig::load(args.config.as_deref())?;
    let overrides = Overrides {
        listen: args.listen,
        dialect: args.dialect,
        debugger: args.debugger,
        dialects_file: args.dialects_file,
    };
    let settings = Arc::new(Settings::resolve(config, overrides)?);

    if args.list_dialects {
        for dialect in settings.registry.dialects() {
            let marker = if dialect.name == settings.dialect { "*" } else { " " };
            println!(
                "{marker} {:<12} position: {}, breakpoint: {}",
                dialect.name,
                dialect.position.name(),
                dialect.breakpoint.name()
            );
        }
        return Ok(());
    }

    let tracer = match &args.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            let logger = env_logger::Builder::from_default_env()
                .target(env_logger::Target::Pipe(Box::new(file)))
                .build();
            let filter = logger.filter();
            cobdap::log::LOGGER_SWITCHER.switch(logger, filter);
            Some(FileTracer::new(path)?)
        }
        None => None,
    };

    let server = Server::bind(settings, tracer, args.trace_dap)?;
    if args.oneshot {
        return server.serve_one();
    }
    server.serve()
}
