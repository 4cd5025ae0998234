use crate::dap::tracer::FileTracer;
use anyhow::anyhow;
use serde_json::Value;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;

/// DAP message transport.
pub trait DapTransport: Send {
    /// Read a single DAP message (with Content-Length framing).
    fn read_message(&mut self) -> anyhow::Result<Value>;

    /// Write a single DAP message (with Content-Length framing).
    fn write_message(&mut self, message: &Value) -> anyhow::Result<()>;
}

/// Read one Content-Length framed message.
pub fn read_frame(reader: &mut impl BufRead) -> anyhow::Result<Value> {
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        let read_n = reader.read_line(&mut line)?;
        if read_n == 0 {
            return Err(anyhow!("DAP connection closed"));
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        if let Some(v) = line.strip_prefix("Content-Length:") {
            content_length = Some(v.trim().parse()?);
        }
    }

    let len = content_length.ok_or_else(|| anyhow!("Missing Content-Length header"))?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(serde_json::from_slice(&buf)?)
}

/// Write one message with Content-Length framing.
pub fn write_frame(writer: &mut impl Write, message: &Value) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(message)?;
    write!(writer, "Content-Length: {}\r\n\r\n", payload.len())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// TCP transport of a single client.
pub struct DapIo {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    tracer: Option<FileTracer>,
    trace: bool,
}

impl DapIo {
    pub fn new(stream: TcpStream, tracer: Option<FileTracer>, trace: bool) -> anyhow::Result<Self> {
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            stream,
            reader,
            tracer,
            trace,
        })
    }

    fn trace(&self, direction: &str, message: &Value) {
        if !self.trace {
            return;
        }
        if let Some(tracer) = &self.tracer {
            tracer.line(&format!("{direction} {message}"));
        }
    }
}

impl DapTransport for DapIo {
    fn read_message(&mut self) -> anyhow::Result<Value> {
        let msg = read_frame(&mut self.reader)?;
        self.trace("<-", &msg);
        Ok(msg)
    }

    fn write_message(&mut self, message: &Value) -> anyhow::Result<()> {
        self.trace("->", message);
        write_frame(&mut self.stream, message)
    }
}
