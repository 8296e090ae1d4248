//! IPC server (component J): local socket transport, request dispatch, and
//! the cache-check/provider-fanout/filter request pipeline.

pub mod error;
pub mod protocol;
pub mod server;

pub use error::{IpcError, IpcResult};
pub use server::IpcServer;
