pub mod breakpoint;
pub mod config;
pub mod dap;
pub mod debugger;
pub mod error;
pub mod log;
pub mod position;
pub mod source;
