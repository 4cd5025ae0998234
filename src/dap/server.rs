use crate::config::Settings;
use crate::dap::io::DapIo;
use crate::dap::session::DebugSession;
use crate::dap::tracer::FileTracer;
use anyhow::Context;
use log::{info, warn};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

/// DAP server. Every accepted client gets its own session (and its own debugger process) served
/// by a dedicated thread.
pub struct Server {
    listener: TcpListener,
    settings: Arc<Settings>,
    tracer: Option<FileTracer>,
    trace: bool,
}

impl Server {
    pub fn bind(
        settings: Arc<Settings>,
        tracer: Option<FileTracer>,
        trace: bool,
    ) -> anyhow::Result<Self> {
        let addr: SocketAddr = settings.listen.parse().context("Invalid listen address")?;
        let listener = TcpListener::bind(addr).with_context(|| format!("bind {addr}"))?;
        info!(target: "dap", "cobdap listening on {}", listener.local_addr()?);

        if trace && tracer.is_none() {
            warn!(target: "dap", "--trace-dap requires --log-file; tracing disabled");
        }
        Ok(Self {
            listener,
            settings,
            tracer,
            trace,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    fn serve_client(&self, stream: TcpStream, peer: SocketAddr) {
        if let Some(t) = &self.tracer {
            t.line(&format!("client connected: {peer}"));
        }

        let io = match DapIo::new(stream, self.tracer.clone(), self.trace) {
            Ok(v) => v,
            Err(err) => {
                warn!(target: "dap", "failed to init DAP I/O: {err:#}");
                return;
            }
        };

        let res = DebugSession::new(io, self.settings.clone()).run();
        match res {
            Err(err) => {
                warn!(target: "dap", "session {peer} ended with error: {err:#}");
                if let Some(t) = &self.tracer {
                    t.line(&format!("session error: {err:#}"));
                }
            }
            Ok(()) => {
                info!(target: "dap", "session {peer} finished");
                if let Some(t) = &self.tracer {
                    t.line("session finished OK");
                }
            }
        }
    }

    /// Serve a single client on the calling thread and return.
    pub fn serve_one(&self) -> anyhow::Result<()> {
        let (stream, peer) = self.listener.accept().context("accept")?;
        info!(target: "dap", "DAP client connected: {peer}");
        self.serve_client(stream, peer);
        Ok(())
    }

    /// Accept clients until the listener fails. Sessions run concurrently and share nothing
    /// but the settings.
    pub fn serve(self) -> anyhow::Result<()> {
        let server = Arc::new(self);
        loop {
            let (stream, peer) = match server.listener.accept() {
                Ok(v) => v,
                Err(err) => {
                    warn!(target: "dap", "accept failed: {err:#}");
                    continue;
                }
            };
            info!(target: "dap", "DAP client connected: {peer}");

            let server = server.clone();
            let spawned = thread::Builder::new()
                .name(format!("session-{peer}"))
                .spawn(move || server.serve_client(stream, peer));
            if let Err(err) = spawned {
                warn!(target: "dap", "failed to start session thread: {err:#}");
            }
        }
    }
}
