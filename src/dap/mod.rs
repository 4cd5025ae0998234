//! Debug Adapter Protocol front end.

pub mod io;
pub mod protocol;
pub mod server;
pub mod session;
pub mod sourcemap;
pub mod tracer;

pub use server::Server;
pub use session::DebugSession;
